use std::rc::Rc;

use crate::error::RuntimeError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    Num(f64),
    Str(Rc<str>),
    Ident(String),
    Keyword(Keyword),
    Punct(Punct),
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Keyword {
    Function,
    Return,
    Var,
    Typeof,
    This,
    True,
    False,
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Punct {
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Colon,
    Question,
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Lt,
    Le,
    Gt,
    Ge,
    StrictEq,
    StrictNe,
    AndAnd,
    OrOr,
    Assign,
}

/// Words the grammar does not use but refuses to treat as names. Most
/// are operators or statement forms the host language has and this one
/// deliberately lacks.
const RESERVED: &[&str] = &[
    "break",
    "case",
    "catch",
    "class",
    "const",
    "continue",
    "debugger",
    "default",
    "delete",
    "do",
    "else",
    "enum",
    "export",
    "extends",
    "finally",
    "for",
    "if",
    "implements",
    "import",
    "in",
    "instanceof",
    "interface",
    "let",
    "new",
    "package",
    "private",
    "protected",
    "public",
    "static",
    "super",
    "switch",
    "throw",
    "try",
    "while",
    "with",
    "yield",
];

pub(crate) fn is_reserved(word: &str) -> bool {
    RESERVED.contains(&word)
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Cursor { data, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.data.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }
}

pub(crate) struct Lexer<'a> {
    src: &'a str,
    cursor: Cursor<'a>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer {
            src,
            cursor: Cursor::new(src.as_bytes()),
        }
    }

    /// Produces the next token and the byte offset it starts at.
    pub fn next_token(&mut self) -> Result<(Tok, usize), RuntimeError> {
        self.skip_trivia()?;
        let start = self.cursor.pos;
        let byte = match self.cursor.bump() {
            Some(b) => b,
            None => return Ok((Tok::Eof, start)),
        };
        let tok = match byte {
            b'(' => Tok::Punct(Punct::LParen),
            b')' => Tok::Punct(Punct::RParen),
            b'{' => Tok::Punct(Punct::LBrace),
            b'}' => Tok::Punct(Punct::RBrace),
            b'[' => Tok::Punct(Punct::LBracket),
            b']' => Tok::Punct(Punct::RBracket),
            b',' => Tok::Punct(Punct::Comma),
            b';' => Tok::Punct(Punct::Semi),
            b':' => Tok::Punct(Punct::Colon),
            b'?' => Tok::Punct(Punct::Question),
            b'+' => Tok::Punct(Punct::Plus),
            b'-' => Tok::Punct(Punct::Minus),
            b'*' => Tok::Punct(Punct::Star),
            b'/' => Tok::Punct(Punct::Slash),
            b'%' => Tok::Punct(Punct::Percent),
            b'.' => {
                if matches!(self.cursor.peek(), Some(b'0'..=b'9')) {
                    self.cursor.pos = start;
                    self.lex_number(start)?
                } else {
                    Tok::Punct(Punct::Dot)
                }
            }
            b'!' => {
                if self.cursor.eat(b'=') {
                    if self.cursor.eat(b'=') {
                        Tok::Punct(Punct::StrictNe)
                    } else {
                        return Err(self.fail(start, "use !== instead of !="));
                    }
                } else {
                    Tok::Punct(Punct::Bang)
                }
            }
            b'=' => {
                if self.cursor.eat(b'=') {
                    if self.cursor.eat(b'=') {
                        Tok::Punct(Punct::StrictEq)
                    } else {
                        return Err(self.fail(start, "use === instead of =="));
                    }
                } else {
                    Tok::Punct(Punct::Assign)
                }
            }
            b'<' => {
                if self.cursor.eat(b'=') {
                    Tok::Punct(Punct::Le)
                } else {
                    Tok::Punct(Punct::Lt)
                }
            }
            b'>' => {
                if self.cursor.eat(b'=') {
                    Tok::Punct(Punct::Ge)
                } else {
                    Tok::Punct(Punct::Gt)
                }
            }
            b'&' => {
                if self.cursor.eat(b'&') {
                    Tok::Punct(Punct::AndAnd)
                } else {
                    return Err(self.fail(start, "bitwise operators are not supported"));
                }
            }
            b'|' => {
                if self.cursor.eat(b'|') {
                    Tok::Punct(Punct::OrOr)
                } else {
                    return Err(self.fail(start, "bitwise operators are not supported"));
                }
            }
            b'0'..=b'9' => {
                self.cursor.pos = start;
                self.lex_number(start)?
            }
            b'\'' | b'"' => self.lex_string(byte, start)?,
            b'A'..=b'Z' | b'a'..=b'z' | b'_' | b'$' => {
                self.cursor.pos = start;
                self.lex_word(start)?
            }
            other => {
                return Err(self.fail(
                    start,
                    format!("unexpected character 0x{other:02x}"),
                ))
            }
        };
        Ok((tok, start))
    }

    fn skip_trivia(&mut self) -> Result<(), RuntimeError> {
        loop {
            match self.cursor.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\n') => {
                    self.cursor.pos += 1;
                }
                Some(b'/') if self.cursor.peek_at(1) == Some(b'/') => {
                    while let Some(byte) = self.cursor.peek() {
                        if byte == b'\n' {
                            break;
                        }
                        self.cursor.pos += 1;
                    }
                }
                Some(b'/') if self.cursor.peek_at(1) == Some(b'*') => {
                    let start = self.cursor.pos;
                    self.cursor.pos += 2;
                    loop {
                        match self.cursor.bump() {
                            Some(b'*') if self.cursor.peek() == Some(b'/') => {
                                self.cursor.pos += 1;
                                break;
                            }
                            Some(_) => {}
                            None => return Err(self.fail(start, "unterminated comment")),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn lex_number(&mut self, start: usize) -> Result<Tok, RuntimeError> {
        if self.cursor.peek() == Some(b'0')
            && matches!(self.cursor.peek_at(1), Some(b'x' | b'X'))
        {
            return Err(self.fail(start, "hexadecimal literals are not supported"));
        }
        while matches!(self.cursor.peek(), Some(b'0'..=b'9')) {
            self.cursor.pos += 1;
        }
        if self.cursor.peek() == Some(b'.') {
            self.cursor.pos += 1;
            while matches!(self.cursor.peek(), Some(b'0'..=b'9')) {
                self.cursor.pos += 1;
            }
        }
        if matches!(self.cursor.peek(), Some(b'e' | b'E')) {
            let mut ahead = 1;
            if matches!(self.cursor.peek_at(1), Some(b'+' | b'-')) {
                ahead = 2;
            }
            if matches!(self.cursor.peek_at(ahead), Some(b'0'..=b'9')) {
                self.cursor.pos += ahead;
                while matches!(self.cursor.peek(), Some(b'0'..=b'9')) {
                    self.cursor.pos += 1;
                }
            }
        }
        let text = &self.src[start..self.cursor.pos];
        match text.parse::<f64>() {
            Ok(num) => Ok(Tok::Num(num)),
            Err(_) => Err(self.fail(start, format!("malformed number literal {text:?}"))),
        }
    }

    fn lex_string(&mut self, quote: u8, start: usize) -> Result<Tok, RuntimeError> {
        let mut bytes = Vec::new();
        loop {
            let byte = match self.cursor.bump() {
                Some(b) => b,
                None => return Err(self.fail(start, "unterminated string literal")),
            };
            match byte {
                b if b == quote => break,
                b'\n' | b'\r' => {
                    return Err(self.fail(start, "newline inside string literal"))
                }
                b'\\' => {
                    let escape = match self.cursor.bump() {
                        Some(b) => b,
                        None => return Err(self.fail(start, "unterminated string literal")),
                    };
                    match escape {
                        b'n' => bytes.push(b'\n'),
                        b't' => bytes.push(b'\t'),
                        b'r' => bytes.push(b'\r'),
                        b'b' => bytes.push(0x08),
                        b'f' => bytes.push(0x0c),
                        b'v' => bytes.push(0x0b),
                        b'0' => bytes.push(0),
                        b'\\' | b'\'' | b'"' | b'/' => bytes.push(escape),
                        b'u' => {
                            let ch = self.lex_unicode_escape(start)?;
                            let mut buf = [0u8; 4];
                            bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                        }
                        other => {
                            return Err(self.fail(
                                start,
                                format!("unknown escape \\{}", other as char),
                            ))
                        }
                    }
                }
                other => bytes.push(other),
            }
        }
        match String::from_utf8(bytes) {
            Ok(text) => Ok(Tok::Str(Rc::from(text.as_str()))),
            Err(_) => Err(self.fail(start, "malformed string literal")),
        }
    }

    fn lex_unicode_escape(&mut self, start: usize) -> Result<char, RuntimeError> {
        let mut code = 0u32;
        for _ in 0..4 {
            let byte = match self.cursor.bump() {
                Some(b) => b,
                None => return Err(self.fail(start, "unterminated string literal")),
            };
            let digit = match byte {
                b'0'..=b'9' => u32::from(byte - b'0'),
                b'a'..=b'f' => u32::from(byte - b'a') + 10,
                b'A'..=b'F' => u32::from(byte - b'A') + 10,
                _ => return Err(self.fail(start, "invalid unicode escape")),
            };
            code = code * 16 + digit;
        }
        char::from_u32(code).ok_or_else(|| self.fail(start, "invalid unicode escape"))
    }

    fn lex_word(&mut self, start: usize) -> Result<Tok, RuntimeError> {
        while matches!(
            self.cursor.peek(),
            Some(b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'$')
        ) {
            self.cursor.pos += 1;
        }
        let word = &self.src[start..self.cursor.pos];
        let tok = match word {
            "function" => Tok::Keyword(Keyword::Function),
            "return" => Tok::Keyword(Keyword::Return),
            "var" => Tok::Keyword(Keyword::Var),
            "typeof" => Tok::Keyword(Keyword::Typeof),
            "this" => Tok::Keyword(Keyword::This),
            "true" => Tok::Keyword(Keyword::True),
            "false" => Tok::Keyword(Keyword::False),
            "null" => Tok::Keyword(Keyword::Null),
            _ if is_reserved(word) => {
                return Err(self.fail(start, format!("reserved word '{word}'")))
            }
            _ => Tok::Ident(word.to_string()),
        };
        Ok(tok)
    }

    fn fail(&self, pos: usize, message: impl Into<String>) -> RuntimeError {
        RuntimeError::syntax(format!("{} at offset {pos}", message.into()))
    }
}
