//! Type-prefixed identifiers and the allocator that hands them out.
//!
//! Ids look like `tr0007`: a two-letter prefix naming the kind of object and
//! a zero-padded, monotonically increasing sequence number. The allocator is
//! an explicit value passed to whoever creates objects; there is no global
//! registry.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{EngineError, ResultEngine};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdKind {
    Member,
    ListItem,
    List,
    Group,
    Transaction,
}

impl IdKind {
    pub const ALL: [IdKind; 5] = [
        IdKind::Member,
        IdKind::ListItem,
        IdKind::List,
        IdKind::Group,
        IdKind::Transaction,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            Self::Member => "mm",
            Self::ListItem => "it",
            Self::List => "ls",
            Self::Group => "gr",
            Self::Transaction => "tr",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.prefix() == prefix)
    }
}

/// A type-prefixed identifier.
///
/// Ordering follows `(kind, seq)`, so within one kind ids sort in creation
/// order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id {
    kind: IdKind,
    seq: u32,
}

impl Id {
    #[must_use]
    pub const fn new(kind: IdKind, seq: u32) -> Self {
        Self { kind, seq }
    }

    #[must_use]
    pub const fn kind(self) -> IdKind {
        self.kind
    }

    #[must_use]
    pub const fn seq(self) -> u32 {
        self.seq
    }

    /// Returns the id if it has the expected kind.
    pub fn expect_kind(self, kind: IdKind) -> ResultEngine<Self> {
        if self.kind != kind {
            return Err(EngineError::InvalidId(format!(
                "{self} is not a {} id",
                kind.prefix()
            )));
        }
        Ok(self)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:04}", self.kind.prefix(), self.seq)
    }
}

impl FromStr for Id {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EngineError::InvalidId(format!("invalid id: {s}"));
        let s = s.trim();
        let (prefix, digits) = s.get(..2).zip(s.get(2..)).ok_or_else(invalid)?;
        let kind = IdKind::from_prefix(prefix).ok_or_else(invalid)?;
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        let seq = digits.parse::<u32>().map_err(|_| invalid())?;
        Ok(Self { kind, seq })
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Hands out ids, one counter per kind.
///
/// The counters are the value persisted to `ids.json`, so a reloaded allocator
/// never reissues an id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdAllocator {
    next: BTreeMap<IdKind, u32>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a fresh id of `kind`.
    pub fn next_id(&mut self, kind: IdKind) -> Id {
        let counter = self.next.entry(kind).or_insert(0);
        let id = Id::new(kind, *counter);
        *counter += 1;
        id
    }

    /// Takes back the last id handed out for `kind`.
    ///
    /// Only the most recent id can be rolled back; rolling back in reverse
    /// allocation order undoes a batch.
    pub fn rollback(&mut self, kind: IdKind, id: Id) -> ResultEngine<()> {
        let id = id.expect_kind(kind)?;
        let counter = self.next.entry(kind).or_insert(0);
        if *counter == 0 || id.seq + 1 != *counter {
            return Err(EngineError::InvalidId(format!(
                "{id} is not the last {} id handed out",
                kind.prefix()
            )));
        }
        *counter -= 1;
        Ok(())
    }

    /// Makes sure ids up to and including `id` are never reissued.
    ///
    /// Used when objects are loaded from storage written by another allocator.
    pub fn reserve(&mut self, id: Id) {
        let counter = self.next.entry(id.kind).or_insert(0);
        if *counter <= id.seq {
            *counter = id.seq + 1;
        }
    }
}
