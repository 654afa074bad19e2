use crate::error::RuntimeError;
use crate::lexer;

const KEYWORDS: &[&str] = &[
    "function", "return", "var", "typeof", "this", "true", "false", "null", "undefined",
];

/// Checks that `name` can serve as a parameter or binding name: a
/// plain ASCII identifier that is not a keyword, not reserved, and not
/// one of the strict-mode restricted names. Functions assembled from
/// strings route every parameter through here, since those names never
/// pass through the tokenizer.
pub(crate) fn verify_identifier(name: &str) -> Result<(), RuntimeError> {
    let bytes = name.as_bytes();
    let start_ok = matches!(
        bytes.first().copied(),
        Some(b'A'..=b'Z' | b'a'..=b'z' | b'_' | b'$')
    );
    let rest_ok = bytes
        .iter()
        .skip(1)
        .all(|&b| matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'$'));
    if !start_ok || !rest_ok {
        return Err(RuntimeError::syntax(format!("invalid identifier {name:?}")));
    }
    if KEYWORDS.contains(&name)
        || lexer::is_reserved(name)
        || name == "eval"
        || name == "arguments"
    {
        return Err(RuntimeError::syntax(format!(
            "cannot use '{name}' as a binding name"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_names() {
        for name in ["x", "$scope", "_tmp", "now2"] {
            if let Err(err) = verify_identifier(name) {
                panic!("{name:?} should be a valid identifier: {err}");
            }
        }
    }

    #[test]
    fn rejects_sneaky_names() {
        for name in ["", "1x", "a b", "a,b", "x/*", "a\n){}", "eval", "arguments", "delete", "this"] {
            if verify_identifier(name).is_ok() {
                panic!("{name:?} should be rejected");
            }
        }
    }
}
