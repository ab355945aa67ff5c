//! Nonce tracking for sequential submissions
//!
//! The node's pending transaction count is authoritative, but a node behind
//! a load balancer can lag a just-mined transaction. The tracker remembers
//! the next nonce handed out per account so back-to-back submissions never
//! reuse one.

use dashmap::DashMap;
use ethers::types::{Address, U256};
use tracing::debug;

/// Per-account next-nonce bookkeeping
#[derive(Debug, Default)]
pub struct NonceTracker {
    /// Next nonce to hand out, per sender
    next: DashMap<Address, u64>,
}

impl NonceTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the nonce for the next transaction given the on-chain count
    pub fn reserve(&self, address: Address, on_chain: U256) -> u64 {
        let on_chain = on_chain.as_u64();
        let mut next = self.next.entry(address).or_insert(on_chain);

        if *next > on_chain {
            debug!(
                "Node reports nonce {} for {:?}, using local {}",
                on_chain, address, *next
            );
        }

        let nonce = std::cmp::max(*next, on_chain);
        *next = nonce + 1;

        debug!("Allocated nonce {} for {:?}", nonce, address);
        nonce
    }

    /// Release a nonce whose transaction never reached the node
    pub fn release(&self, address: Address, nonce: u64) {
        if let Some(mut next) = self.next.get_mut(&address) {
            // Only the most recent reservation can be handed back
            if *next == nonce + 1 {
                *next = nonce;
                debug!("Released nonce {} for {:?}", nonce, address);
            }
        }
    }

    /// Next nonce the tracker would hand out, if the account has been seen
    #[cfg(test)]
    pub fn peek(&self, address: Address) -> Option<u64> {
        self.next.get(&address).map(|n| *n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reservation_uses_on_chain_count() {
        let tracker = NonceTracker::new();
        let sender = Address::repeat_byte(1);
        assert_eq!(tracker.peek(sender), None);
        assert_eq!(tracker.reserve(sender, U256::from(7)), 7);
        assert_eq!(tracker.peek(sender), Some(8));
    }

    #[test]
    fn test_lagging_node_still_yields_increasing_nonces() {
        let tracker = NonceTracker::new();
        let sender = Address::repeat_byte(1);
        assert_eq!(tracker.reserve(sender, U256::from(3)), 3);
        assert_eq!(tracker.reserve(sender, U256::from(3)), 4);
        assert_eq!(tracker.reserve(sender, U256::from(3)), 5);
    }

    #[test]
    fn test_node_ahead_of_tracker_wins() {
        let tracker = NonceTracker::new();
        let sender = Address::repeat_byte(1);
        assert_eq!(tracker.reserve(sender, U256::from(3)), 3);
        // Another client used the account in between
        assert_eq!(tracker.reserve(sender, U256::from(10)), 10);
    }

    #[test]
    fn test_release_only_latest() {
        let tracker = NonceTracker::new();
        let sender = Address::repeat_byte(1);
        let first = tracker.reserve(sender, U256::zero());
        let second = tracker.reserve(sender, U256::zero());

        tracker.release(sender, first);
        assert_eq!(tracker.peek(sender), Some(2));

        tracker.release(sender, second);
        assert_eq!(tracker.peek(sender), Some(1));
        assert_eq!(tracker.reserve(sender, U256::zero()), 1);
    }

    #[test]
    fn test_accounts_are_independent() {
        let tracker = NonceTracker::new();
        assert_eq!(tracker.reserve(Address::repeat_byte(1), U256::from(5)), 5);
        assert_eq!(tracker.reserve(Address::repeat_byte(2), U256::zero()), 0);
    }
}
