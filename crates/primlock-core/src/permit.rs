//! Permit trees: the policy language describing which parts of an object
//! graph survive a lockdown pass.
//!
//! A tree mirrors the shape of the graph it governs. Interior nodes carry a
//! name-to-permit map; leaves say what may be done with a single property.
//! The JSON form is the compact literal notation policies are usually written
//! in: `true` keeps a property as-is, `"*"` keeps it and lets delegating
//! objects inherit the grant, `"accessor"` keeps a getter/setter pair,
//! `false` denies, and a nested object descends.

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Reserved name under which an object's delegate is guarded, as if the
/// prototype link were a property. Real property names never collide with
/// it because `<` cannot start an identifier.
pub const DELEGATE_NAME: &str = "<proto>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Permit {
    /// Remove or neutralise the property.
    Deny,
    /// Keep the property; its value is walked under its own permits.
    AllowAsIs,
    /// Like `AllowAsIs`, and objects delegating to the owner inherit the
    /// grant for this name.
    AllowWildcard,
    /// Keep the property only if it is an accessor pair; both functions are
    /// walked.
    AllowAccessor,
    /// Descend: the named child object is governed by this map.
    Subtree(BTreeMap<String, Permit>),
}

impl Permit {
    /// Builds an interior node from literal pairs. Test and policy
    /// construction convenience.
    pub fn subtree<'a>(entries: impl IntoIterator<Item = (&'a str, Permit)>) -> Permit {
        Permit::Subtree(entries.into_iter().map(|(name, permit)| (name.to_string(), permit)).collect())
    }

    pub fn children(&self) -> Option<&BTreeMap<String, Permit>> {
        match self {
            Permit::Subtree(map) => Some(map),
            _ => None,
        }
    }

    pub fn named(&self, name: &str) -> Option<&Permit> {
        self.children().and_then(|map| map.get(name))
    }

    /// Whether a property kept under this permit is expected to be a plain
    /// value rather than an accessor pair.
    pub fn expects_value(&self) -> bool {
        !matches!(self, Permit::AllowAccessor)
    }
}

const WILDCARD_TAG: &str = "*";
const ACCESSOR_TAG: &str = "accessor";

impl Serialize for Permit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Permit::Deny => serializer.serialize_bool(false),
            Permit::AllowAsIs => serializer.serialize_bool(true),
            Permit::AllowWildcard => serializer.serialize_str(WILDCARD_TAG),
            Permit::AllowAccessor => serializer.serialize_str(ACCESSOR_TAG),
            Permit::Subtree(map) => map.serialize(serializer),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPermit {
    Flag(bool),
    Tag(String),
    Map(BTreeMap<String, RawPermit>),
}

fn lower(raw: RawPermit) -> Result<Permit, String> {
    match raw {
        RawPermit::Flag(false) => Ok(Permit::Deny),
        RawPermit::Flag(true) => Ok(Permit::AllowAsIs),
        RawPermit::Tag(tag) if tag == WILDCARD_TAG => Ok(Permit::AllowWildcard),
        RawPermit::Tag(tag) if tag == ACCESSOR_TAG => Ok(Permit::AllowAccessor),
        RawPermit::Tag(tag) => Err(format!("unknown permit tag {tag:?}")),
        RawPermit::Map(map) => {
            let mut lowered = BTreeMap::new();
            for (name, child) in map {
                lowered.insert(name, lower(child)?);
            }
            Ok(Permit::Subtree(lowered))
        }
    }
}

impl<'de> Deserialize<'de> for Permit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawPermit::deserialize(deserializer)?;
        lower(raw).map_err(D::Error::custom)
    }
}
