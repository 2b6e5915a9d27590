//! Strongly-typed counters used across the recorder.
//!
//! Ordinals and sequence numbers are gapless and never reused; do not pass raw
//! integers around for them.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! new_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(v: u64) -> Self {
                Self(v)
            }
            pub const fn get(self) -> u64 {
                self.0
            }
            /// The following value. Counters only ever move forward by one.
            pub const fn next(self) -> Self {
                Self(self.0 + 1)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

// Step ordinal within a run; the first step is 1.
new_id!(Ordinal);
// Position of an entry in a run's hash chain; the first entry is 0.
new_id!(SequenceNo);
