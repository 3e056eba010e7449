use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// A position in the transaction log: a `(commit, prepare)` pair of 64-bit
/// signed offsets, totally ordered lexicographically by `(commit, prepare)`.
///
/// Mirrors how `actyx_sdk::Offset`/`OffsetOrMin` give the teacher's own log a
/// total order usable as a merge key; here the key is a pair rather than a
/// single scalar because the underlying log addresses events by
/// commit-record plus prepare-record offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TfPos {
    pub commit: i64,
    pub prepare: i64,
}

impl TfPos {
    /// Sentinel denoting "before any event" — the position from which a
    /// fresh reader starts scanning if no resume point was given.
    pub const START: TfPos = TfPos {
        commit: 0,
        prepare: -10,
    };

    pub const fn new(commit: i64, prepare: i64) -> Self {
        Self { commit, prepare }
    }

    /// `(commit, prepare)` as required by `ReadAllEventsForward`, clamping a
    /// `-1` prepare sentinel (meaning "start of this commit record, prepare
    /// offset unknown") up to `0` the way the underlying read RPC expects.
    pub fn read_all_params(self) -> (i64, i64) {
        let prepare = if self.prepare == -1 { 0 } else { self.prepare };
        (self.commit, prepare)
    }
}

impl Ord for TfPos {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.commit, self.prepare).cmp(&(other.commit, other.prepare))
    }
}

impl PartialOrd for TfPos {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for TfPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.commit, self.prepare)
    }
}
