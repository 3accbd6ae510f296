//! Log matching predicate for installed log filters.
//!
//! Check order (first failure rejects):
//! 1. `fromBlock` is a number and `fromBlock >= log.blockNumber`
//! 2. `toBlock` is a number and `toBlock <= log.blockNumber`
//! 3. filter address differs from `log.address`
//! 4. any topic position fails (AND across positions, OR within a position)
//!
//! Both block bounds are exclusive. Filters store their `fromBlock` as the
//! last block already consumed, so a log exactly at that block has been
//! reported before and must not match again.

use crate::types::{FilterParams, Log, TopicPattern};

/// Does `log` satisfy the stored (already resolved) filter params?
pub fn log_matches(params: &FilterParams, log: &Log) -> bool {
    if let Some(log_block) = log.block_number_u64() {
        if let Some(from) = params.from_block.as_number() {
            if from >= log_block {
                return false;
            }
        }
        if let Some(to) = params.to_block.as_number() {
            if to <= log_block {
                return false;
            }
        }
    }

    address_matches(params.address.as_deref(), &log.address) && topics_match(&params.topics, &log.topics)
}

/// Exact comparison against the already-lowercased filter address.
pub fn address_matches(filter_address: Option<&str>, log_address: &str) -> bool {
    match filter_address {
        Some(address) => address == log_address,
        None => true,
    }
}

/// Position-dependent topic matching.
///
/// A `None` pattern is a wildcard. A log with fewer topics than a
/// constrained position is rejected. An alternative set containing `None`
/// accepts any topic that is present. Positions beyond the pattern list are
/// unconstrained.
pub fn topics_match(patterns: &[Option<TopicPattern>], topics: &[String]) -> bool {
    patterns.iter().enumerate().all(|(index, pattern)| {
        let Some(pattern) = pattern else {
            return true;
        };
        let Some(topic) = topics.get(index) else {
            return false;
        };
        let alternatives = pattern.alternatives();
        alternatives.contains(&None) || alternatives.contains(&Some(topic.as_str()))
    })
}
