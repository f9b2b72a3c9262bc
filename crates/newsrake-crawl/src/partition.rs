//! Deterministic work partitioning
//!
//! Every worker computes the same sort and the same split from the same
//! inputs, so no coordination is needed: the roster is the only shared
//! agreement.

use crate::catalog::ArchiveDescriptor;
use std::cmp::Ordering;
use std::ops::Range;
use tracing::{info, warn};

/// Ordered list of worker identities taking part in a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    members: Vec<String>,
}

impl Roster {
    pub fn new<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            members: members
                .into_iter()
                .map(Into::into)
                .map(|m: String| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    /// Comma-separated list, e.g. `"crawler-1,crawler-2"`
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(','))
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn ordinal_of(&self, identity: &str) -> Option<usize> {
        self.members.iter().position(|m| m == identity)
    }
}

/// Configured worker id, falling back to the machine hostname
pub fn resolve_identity(configured: Option<&str>) -> String {
    if let Some(id) = configured.map(str::trim).filter(|id| !id.is_empty()) {
        return id.to_string();
    }
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string())
}

/// This worker's place in the roster, resolved once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardAssignment {
    Member { ordinal: usize, roster_size: usize },
    /// Identity not in the roster (or no roster): process everything
    Unpartitioned,
}

impl ShardAssignment {
    pub fn resolve(roster: &Roster, identity: &str) -> Self {
        if roster.is_empty() {
            info!(identity = %identity, "No roster configured, processing the whole catalog");
            return Self::Unpartitioned;
        }
        match roster.ordinal_of(identity) {
            Some(ordinal) => {
                info!(
                    identity = %identity,
                    ordinal,
                    roster_size = roster.len(),
                    "Resolved shard assignment"
                );
                Self::Member {
                    ordinal,
                    roster_size: roster.len(),
                }
            },
            None => {
                warn!(
                    identity = %identity,
                    roster_size = roster.len(),
                    "Identity not in roster, processing the whole catalog"
                );
                Self::Unpartitioned
            },
        }
    }
}

/// Contiguous chunk lengths: the first `len % n` chunks get one extra item
pub fn chunk_sizes(len: usize, n: usize) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    let base = len / n;
    let extra = len % n;
    (0..n).map(|i| base + usize::from(i < extra)).collect()
}

/// Index range of chunk `ordinal` out of `n`
pub fn chunk_range(len: usize, n: usize, ordinal: usize) -> Range<usize> {
    if n == 0 || ordinal >= n {
        return 0..0;
    }
    let base = len / n;
    let extra = len % n;
    let start = ordinal * base + ordinal.min(extra);
    let size = base + usize::from(ordinal < extra);
    start..start + size
}

/// Newest first; ties broken by remote path descending; undated entries last
pub fn sort_newest_first(items: &mut [ArchiveDescriptor]) {
    items.sort_by(|a, b| match (a.timestamp, b.timestamp) {
        (Some(x), Some(y)) => y.cmp(&x).then_with(|| b.remote_path.cmp(&a.remote_path)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.remote_path.cmp(&a.remote_path),
    });
}

/// The shard of `unprocessed` belonging to `assignment`, newest first
pub fn partition(
    mut unprocessed: Vec<ArchiveDescriptor>,
    assignment: ShardAssignment,
) -> Vec<ArchiveDescriptor> {
    sort_newest_first(&mut unprocessed);
    match assignment {
        ShardAssignment::Unpartitioned => unprocessed,
        ShardAssignment::Member { ordinal, roster_size } => {
            let range = chunk_range(unprocessed.len(), roster_size, ordinal);
            unprocessed.drain(range).collect()
        },
    }
}

/// Resolve `identity` against `roster` and partition
pub fn partition_for(
    unprocessed: Vec<ArchiveDescriptor>,
    roster: &Roster,
    identity: &str,
) -> Vec<ArchiveDescriptor> {
    partition(unprocessed, ShardAssignment::resolve(roster, identity))
}
