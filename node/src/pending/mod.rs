//! Bytes exchanged with counterparties that are not yet recorded in a block.
//!
//! The counter-signing side registers what it observed here. A proposal is only signed when the
//! pending amount covers what the proposer claims, signing consumes that amount again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::utilities::crypto::PublicKey;

/// Snapshot of a pending entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingBytes {
    pub up: u64,
    pub down: u64,
}

impl PendingBytes {
    pub fn is_empty(&self) -> bool {
        self.up == 0 && self.down == 0
    }
}

#[derive(Debug)]
struct PendingEntry {
    bytes: PendingBytes,
    expires_at: Instant,
    /// Set when the entry was taken out of the ledger, later writers must start a new one.
    removed: bool,
}

impl PendingEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }

    fn live_bytes(&self, now: Instant) -> PendingBytes {
        if self.removed || self.is_expired(now) {
            PendingBytes::default()
        } else {
            self.bytes
        }
    }
}

/// Per counterparty tally of unconfirmed bytes.
///
/// Entries are independent, every entry has its own lock. An entry expires when it was not
/// touched by a successful [`PendingLedger::add`] within the expiry period.
pub struct PendingLedger {
    entries: RwLock<HashMap<PublicKey, Arc<Mutex<PendingEntry>>>>,
    expiry: Duration,
}

impl PendingLedger {
    pub fn new(expiry: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            expiry,
        }
    }

    /// Adds signed deltas to the entry of `counterparty`.
    ///
    /// Returns false and changes nothing when a delta would take a running total below zero.
    /// On success the expiry is re-armed.
    pub fn add(&self, counterparty: PublicKey, up: i64, down: i64) -> bool {
        loop {
            let Some(entry) = self.entry_for_update(counterparty, up, down) else {
                log::debug!("Pending bytes of {counterparty:?} can't go below zero: up {up}, down {down}");
                return false;
            };

            let mut entry = entry.lock();
            if entry.removed {
                continue;
            }

            let now = Instant::now();
            let current = entry.live_bytes(now);
            let Some(next_up) = apply_delta(current.up, up) else {
                log::debug!("Rejecting pending up delta {up} for {counterparty:?}, current {}", current.up);
                return false;
            };
            let Some(next_down) = apply_delta(current.down, down) else {
                log::debug!("Rejecting pending down delta {down} for {counterparty:?}, current {}", current.down);
                return false;
            };

            entry.bytes = PendingBytes {
                up: next_up,
                down: next_down,
            };
            entry.expires_at = now + self.expiry;
            log::trace!("Pending bytes of {counterparty:?}: {:?}", entry.bytes);
            return true;
        }
    }

    /// Consumes bytes claimed by a signed block and drops the entry once it is exhausted.
    pub fn consume(&self, counterparty: PublicKey, up: u64, down: u64) -> bool {
        let (Ok(up), Ok(down)) = (i64::try_from(up), i64::try_from(down)) else {
            return false;
        };
        if !self.add(counterparty, -up, -down) {
            return false;
        }
        if self.get(&counterparty).map_or(true, |bytes| bytes.is_empty()) {
            self.cleanup(&counterparty);
        }
        true
    }

    pub fn get(&self, counterparty: &PublicKey) -> Option<PendingBytes> {
        let entry = self.entries.read().get(counterparty).cloned()?;
        let entry = entry.lock();
        let now = Instant::now();
        (!entry.removed && !entry.is_expired(now)).then_some(entry.bytes)
    }

    /// Removes the entry of `counterparty` immediately.
    pub fn cleanup(&self, counterparty: &PublicKey) -> Option<PendingBytes> {
        let entry = self.entries.write().remove(counterparty)?;
        let mut entry = entry.lock();
        let bytes = entry.live_bytes(Instant::now());
        entry.removed = true;
        Some(bytes)
    }

    /// Drops all expired entries, returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|counterparty, entry| {
            let mut entry = entry.lock();
            if entry.is_expired(now) {
                log::debug!("Pending bytes of {counterparty:?} expired: {:?}", entry.bytes);
                entry.removed = true;
                false
            } else {
                true
            }
        });
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Existing entry, or a new one when the deltas could succeed on an empty entry.
    fn entry_for_update(&self, counterparty: PublicKey, up: i64, down: i64) -> Option<Arc<Mutex<PendingEntry>>> {
        if let Some(entry) = self.entries.read().get(&counterparty) {
            return Some(entry.clone());
        }
        if up < 0 || down < 0 {
            return None;
        }
        let entry = self
            .entries
            .write()
            .entry(counterparty)
            .or_insert_with(|| {
                Arc::new(Mutex::new(PendingEntry {
                    bytes: PendingBytes::default(),
                    expires_at: Instant::now() + self.expiry,
                    removed: false,
                }))
            })
            .clone();
        Some(entry)
    }
}

fn apply_delta(current: u64, delta: i64) -> Option<u64> {
    if delta >= 0 {
        Some(current.saturating_add(delta.unsigned_abs()))
    } else {
        current.checked_sub(delta.unsigned_abs())
    }
}

#[cfg(test)]
mod test {
    use crate::block::types::block::test::keypair;
    use crate::utilities::crypto::TrustChainKeypair;

    use super::*;

    const EXPIRY: Duration = Duration::from_secs(120);

    fn counterparty() -> PublicKey {
        keypair("bob").public_key()
    }

    #[tokio::test]
    async fn add_merges_amounts() {
        let ledger = PendingLedger::new(EXPIRY);
        let bob = counterparty();

        assert!(ledger.add(bob, 10, 5));
        assert!(ledger.add(bob, 5, 5));

        assert_eq!(ledger.get(&bob), Some(PendingBytes { up: 15, down: 10 }));
    }

    #[tokio::test]
    async fn negative_delta_is_limited_to_accumulated_amount() {
        let ledger = PendingLedger::new(EXPIRY);
        let bob = counterparty();

        assert!(!ledger.add(bob, -1, 0));
        assert!(ledger.is_empty());

        assert!(ledger.add(bob, 10, 5));
        assert!(!ledger.add(bob, -11, 0));
        assert!(!ledger.add(bob, 0, -6));
        assert_eq!(ledger.get(&bob), Some(PendingBytes { up: 10, down: 5 }));

        assert!(ledger.add(bob, -10, -5));
        assert_eq!(ledger.get(&bob), Some(PendingBytes { up: 0, down: 0 }));
    }

    #[tokio::test]
    async fn consume_removes_exhausted_entry() {
        let ledger = PendingLedger::new(EXPIRY);
        let bob = counterparty();

        ledger.add(bob, 10, 5);
        assert!(ledger.consume(bob, 4, 5));
        assert_eq!(ledger.get(&bob), Some(PendingBytes { up: 6, down: 0 }));

        assert!(!ledger.consume(bob, 7, 0));
        assert!(ledger.consume(bob, 6, 0));
        assert_eq!(ledger.get(&bob), None);
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn cleanup_removes_entry() {
        let ledger = PendingLedger::new(EXPIRY);
        let bob = counterparty();

        ledger.add(bob, 10, 5);
        assert_eq!(ledger.cleanup(&bob), Some(PendingBytes { up: 10, down: 5 }));
        assert_eq!(ledger.get(&bob), None);
        assert_eq!(ledger.cleanup(&bob), None);
    }

    #[tokio::test(start_paused = true)]
    async fn untouched_entry_expires() {
        let ledger = PendingLedger::new(EXPIRY);
        let bob = counterparty();

        ledger.add(bob, 10, 5);
        tokio::time::advance(Duration::from_secs(100)).await;
        assert!(ledger.add(bob, 1, 1));

        tokio::time::advance(Duration::from_secs(100)).await;
        assert_eq!(ledger.get(&bob), Some(PendingBytes { up: 11, down: 6 }));
        assert_eq!(ledger.purge_expired(), 0);

        tokio::time::advance(Duration::from_secs(21)).await;
        assert_eq!(ledger.get(&bob), None);
        assert!(!ledger.add(bob, -1, 0));
        assert_eq!(ledger.purge_expired(), 1);
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn tallies_never_go_negative_under_concurrency() {
        let ledger = Arc::new(PendingLedger::new(EXPIRY));
        let bob = counterparty();
        ledger.add(bob, 100, 100);

        let mut handles = vec![];
        for _ in 0..8 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                let mut consumed = 0;
                for _ in 0..50 {
                    if ledger.add(bob, -1, -1) {
                        consumed += 1;
                    }
                }
                consumed
            }));
        }

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }
        assert_eq!(total, 100);
        assert_eq!(ledger.get(&bob), Some(PendingBytes { up: 0, down: 0 }));
    }
}
