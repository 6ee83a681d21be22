//! Steal selection for lease load balancing
//!
//! Pure decision logic: given the leases other hosts hold and our own
//! count, pick at most one lease to take from the most loaded host.

use std::collections::HashMap;

use tracing::debug;

use crate::store::Lease;

/// Minimum gap to the biggest owner before stealing is worthwhile.
///
/// A steal moves one lease from the biggest owner to us, shrinking the gap
/// by exactly two. Requiring a gap of at least two therefore guarantees we
/// never end up holding more than the host we stole from, which is what
/// keeps two hosts from trading the same lease back and forth.
const STEAL_GAP: usize = 2;

/// Pick the lease to steal this iteration, if any.
///
/// Returns at most one lease per call: the first lease in `others` held by
/// the biggest owner, and only when that owner is at least [`STEAL_GAP`]
/// ahead of `own_count`. With L partitions over H hosts the most even
/// split keeps every host within one lease of the others, so a gap of two
/// or more means the cluster is not yet balanced.
pub fn steal_candidate(others: &[Lease], own_count: usize) -> Option<Lease> {
    let (biggest_owner, biggest_count) = find_biggest_owner(others)?;

    if biggest_count < own_count + STEAL_GAP {
        return None;
    }

    let candidate = others.iter().find(|l| l.owner == biggest_owner)?;
    debug!(
        "Proposing steal of partition {} from {} ({} leases vs our {})",
        candidate.partition_id, biggest_owner, biggest_count, own_count
    );
    Some(candidate.clone())
}

/// Lease counts keyed by owner
pub fn counts_by_owner(leases: &[Lease]) -> HashMap<&str, usize> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for lease in leases {
        *counts.entry(lease.owner.as_str()).or_insert(0) += 1;
    }
    counts
}

/// Owner holding the most leases, with its count.
///
/// Ties go to whichever owner appears first in `leases`; any tied owner is
/// an equally valid victim.
fn find_biggest_owner(leases: &[Lease]) -> Option<(&str, usize)> {
    let counts = counts_by_owner(leases);

    let mut biggest: Option<(&str, usize)> = None;
    for lease in leases {
        let owner = lease.owner.as_str();
        let count = counts[owner];
        match biggest {
            Some((_, best)) if best >= count => {}
            _ => biggest = Some((owner, count)),
        }
    }
    biggest
}
