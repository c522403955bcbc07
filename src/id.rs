//! Opaque identifiers for libraries, documents and chunks.
//!
//! Ids are random v4 UUIDs, so they are never reused after deletion. They
//! order by their byte representation, which is the tie-break order used by
//! every index.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Serialize,
            Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh, never-before-seen id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// The first `len` hex characters, for compact display.
            pub fn short(&self, len: usize) -> String {
                let full = self.0.simple().to_string();
                full[..len.clamp(6, full.len())].to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

entity_id!(
    /// Identifier of a [`Library`](crate::model::Library).
    LibraryId
);
entity_id!(
    /// Identifier of a [`Document`](crate::model::Document).
    DocumentId
);
entity_id!(
    /// Identifier of a [`Chunk`](crate::model::Chunk).
    ChunkId
);
