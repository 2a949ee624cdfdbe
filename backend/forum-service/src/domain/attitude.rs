//! Attitude state machine
//!
//! Pure logic: given the attitude a user currently holds toward an item and
//! the attitude they want, compute the item's new like/dislike counters.
//! Nothing here touches storage; the service layer persists the result.
//!
//! NEUTRAL is never stored. At the storage boundary an attitude is
//! `Option<StoredAttitude>` (absence = neutral); only projections carry the
//! three-valued [`EffectiveAttitude`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Attitude value persisted in the attitude store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoredAttitude {
    Like,
    Dislike,
}

impl StoredAttitude {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoredAttitude::Like => "like",
            StoredAttitude::Dislike => "dislike",
        }
    }
}

impl fmt::Display for StoredAttitude {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoredAttitude {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "like" => Ok(StoredAttitude::Like),
            "dislike" => Ok(StoredAttitude::Dislike),
            other => Err(format!("unknown attitude value: {}", other)),
        }
    }
}

/// Attitude as seen by a viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EffectiveAttitude {
    Like,
    Dislike,
    Neutral,
}

impl From<Option<StoredAttitude>> for EffectiveAttitude {
    fn from(stored: Option<StoredAttitude>) -> Self {
        match stored {
            Some(StoredAttitude::Like) => EffectiveAttitude::Like,
            Some(StoredAttitude::Dislike) => EffectiveAttitude::Dislike,
            None => EffectiveAttitude::Neutral,
        }
    }
}

impl From<StoredAttitude> for EffectiveAttitude {
    fn from(stored: StoredAttitude) -> Self {
        Some(stored).into()
    }
}

/// Aggregate counters of a content item
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub likes: i64,
    pub dislikes: i64,
}

impl Counters {
    pub fn new(likes: i64, dislikes: i64) -> Self {
        Self { likes, dislikes }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CounterError {
    /// A decrement would take a counter below zero; the stored aggregate
    /// no longer matches the attitude records
    #[error("{counter} would drop below zero")]
    Underflow { counter: &'static str },

    #[error("{counter} overflowed")]
    Overflow { counter: &'static str },
}

/// Outcome of applying a LIKE or DISLIKE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub counters: Counters,
    /// Attitude record to persist
    pub record: StoredAttitude,
    /// False when the target equals the previous attitude
    pub changed: bool,
}

/// Outcome of withdrawing an attitude back to NEUTRAL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Withdrawal {
    pub counters: Counters,
    /// False when there was no attitude to remove
    pub changed: bool,
}

/// Apply `target` on top of `previous`.
///
/// | previous | LIKE                | DISLIKE             |
/// |----------|---------------------|---------------------|
/// | none     | likes+1             | dislikes+1          |
/// | LIKE     | no-op               | likes-1, dislikes+1 |
/// | DISLIKE  | likes+1, dislikes-1 | no-op               |
pub fn transition(
    previous: Option<StoredAttitude>,
    target: StoredAttitude,
    counters: Counters,
) -> Result<Transition, CounterError> {
    if previous == Some(target) {
        return Ok(Transition {
            counters,
            record: target,
            changed: false,
        });
    }

    let counters = match previous {
        Some(prior) => increment(decrement(counters, prior)?, target)?,
        None => increment(counters, target)?,
    };

    Ok(Transition {
        counters,
        record: target,
        changed: true,
    })
}

/// Drop `previous` back to NEUTRAL.
pub fn withdraw(
    previous: Option<StoredAttitude>,
    counters: Counters,
) -> Result<Withdrawal, CounterError> {
    match previous {
        Some(prior) => Ok(Withdrawal {
            counters: decrement(counters, prior)?,
            changed: true,
        }),
        None => Ok(Withdrawal {
            counters,
            changed: false,
        }),
    }
}

fn increment(mut counters: Counters, attitude: StoredAttitude) -> Result<Counters, CounterError> {
    match attitude {
        StoredAttitude::Like => {
            counters.likes = counters
                .likes
                .checked_add(1)
                .ok_or(CounterError::Overflow { counter: "likes" })?;
        }
        StoredAttitude::Dislike => {
            counters.dislikes = counters
                .dislikes
                .checked_add(1)
                .ok_or(CounterError::Overflow { counter: "dislikes" })?;
        }
    }
    Ok(counters)
}

fn decrement(mut counters: Counters, attitude: StoredAttitude) -> Result<Counters, CounterError> {
    match attitude {
        StoredAttitude::Like => {
            if counters.likes <= 0 {
                return Err(CounterError::Underflow { counter: "likes" });
            }
            counters.likes -= 1;
        }
        StoredAttitude::Dislike => {
            if counters.dislikes <= 0 {
                return Err(CounterError::Underflow { counter: "dislikes" });
            }
            counters.dislikes -= 1;
        }
    }
    Ok(counters)
}
