//! Winner determination for competing writes to the same (row, column).
//!
//! 1. No local clock entry: the remote write wins.
//! 2. Higher column version wins.
//! 3. Equal versions: the greater value under [`Value`]'s total order wins.
//! 4. Equal versions and equal values: already converged.
//!
//! Tie-breaking on values rather than site ids keeps the outcome a function of
//! observable state only, so every replica that has seen the same two writes
//! keeps the same one regardless of delivery order.

use crate::clock::DbVersion;
use crate::value::Value;
use std::cmp::Ordering;

/// The local side of a comparison.
#[derive(Clone, Copy, Debug)]
pub struct LocalState<'a> {
    pub column_version: DbVersion,
    pub value: &'a Value,
}

/// Outcome of comparing a remote write against local state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    RemoteWins,
    LocalWins,
    /// Same version and same value on both sides.
    Converged,
}

impl Verdict {
    /// Whether the remote write should be applied. A converged pair is only
    /// rewritten when `merge_equal_values` asks for it.
    pub fn should_apply(self, merge_equal_values: bool) -> bool {
        match self {
            Verdict::RemoteWins => true,
            Verdict::LocalWins => false,
            Verdict::Converged => merge_equal_values,
        }
    }
}

/// Decide whether a remote `(column_version, value)` beats the local state.
pub fn remote_wins(
    remote_version: DbVersion,
    remote_value: &Value,
    local: Option<LocalState<'_>>,
) -> Verdict {
    let local = match local {
        Some(local) => local,
        None => return Verdict::RemoteWins,
    };

    match remote_version.cmp(&local.column_version) {
        Ordering::Greater => Verdict::RemoteWins,
        Ordering::Less => Verdict::LocalWins,
        Ordering::Equal => match remote_value.cmp(local.value) {
            Ordering::Greater => Verdict::RemoteWins,
            Ordering::Less => Verdict::LocalWins,
            Ordering::Equal => Verdict::Converged,
        },
    }
}
