//! Pending-ack table and the retry engine behind reliable sends.
//!
//! One retry task per outstanding packet. Marking a sequence acknowledged
//! only flips a flag; the entry is removed by its retry task when the loop
//! ends. An ack that lands after the final retry decision is therefore a
//! short false failure, an accepted trade-off of not rendezvousing the
//! two tasks.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::driver::Driver;
use crate::wire::{FieldKind, MessageKind, Packet};

/// Bookkeeping for one reliably-sent packet awaiting acknowledgment.
#[derive(Debug, Clone)]
pub struct AckEntry {
    pub seq: u32,
    pub retries_left: u32,
    pub timeout: Duration,
    pub packet: Packet,
    pub dest: SocketAddr,
    pub acked: bool,
}

impl AckEntry {
    pub fn new(packet: Packet, dest: SocketAddr, retries: u32, timeout: Duration) -> Self {
        Self {
            seq: packet.seq,
            retries_left: retries,
            timeout,
            packet,
            dest,
            acked: false,
        }
    }
}

/// The table of outstanding reliable sends, keyed by sequence number.
/// Shared between dispatch tasks and retry tasks; the lock is never held
/// across an await point.
#[derive(Default)]
pub struct PendingAcks {
    inner: Mutex<BTreeMap<u32, AckEntry>>,
}

impl PendingAcks {
    pub fn insert(&self, entry: AckEntry) {
        self.inner
            .lock()
            .expect("pending-ack table poisoned")
            .insert(entry.seq, entry);
    }

    /// Flip the acknowledged flag. Returns false when no entry exists;
    /// that happens when the retry task already resolved the send and is
    /// silently harmless.
    pub fn mark_acked(&self, seq: u32) -> bool {
        let mut inner = self.inner.lock().expect("pending-ack table poisoned");
        match inner.get_mut(&seq) {
            Some(entry) => {
                entry.acked = true;
                true
            }
            None => false,
        }
    }

    /// Kind of the packet waiting on this sequence, for dispatch
    /// correlation (an ACTIVE only acks a pending PING, and so on).
    pub fn kind_of(&self, seq: u32) -> Option<MessageKind> {
        self.inner
            .lock()
            .expect("pending-ack table poisoned")
            .get(&seq)
            .map(|e| e.packet.kind)
    }

    pub fn remove(&self, seq: u32) -> Option<AckEntry> {
        self.inner
            .lock()
            .expect("pending-ack table poisoned")
            .remove(&seq)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("pending-ack table poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claim the next send attempt: while the entry is unacknowledged and
    /// retries remain, decrement and hand back what the retry task needs.
    fn next_attempt(&self, seq: u32) -> Option<(Packet, SocketAddr, Duration)> {
        let mut inner = self.inner.lock().expect("pending-ack table poisoned");
        let entry = inner.get_mut(&seq)?;
        if entry.acked || entry.retries_left == 0 {
            return None;
        }
        entry.retries_left -= 1;
        Some((entry.packet.clone(), entry.dest, entry.timeout))
    }
}

/// The retry task for one reliable send: resend until acknowledged,
/// exhausted, or shut down, then apply the per-kind resolution policy and
/// drop the entry regardless of outcome.
pub(crate) async fn run_retry(driver: Arc<Driver>, seq: u32) {
    while driver.is_running() {
        match driver.acks().next_attempt(seq) {
            Some((packet, dest, timeout)) => {
                driver.send_datagram(&packet, dest).await;
                tokio::time::sleep(timeout).await;
            }
            None => break,
        }
    }
    if let Some(entry) = driver.acks().remove(seq) {
        resolve(&driver, entry).await;
    }
}

/// Per-message-kind resolution once the retry loop ends.
async fn resolve(driver: &Arc<Driver>, entry: AckEntry) {
    match entry.packet.kind {
        // No DUPLICATE reply means no name collision: the login stands.
        MessageKind::Sense => {
            if entry.acked {
                driver.stop();
                driver.display().login_failed();
            } else {
                driver.display().login_succeeded();
            }
        }
        MessageKind::Ping => {
            if !entry.acked {
                if let Some(peer) = driver.directory().remove_by_addr(entry.dest) {
                    tracing::debug!(peer = %peer.name, "ping went unanswered, peer evicted");
                    driver
                        .display()
                        .log(&format!("peer {} stopped answering and was removed", peer.name));
                }
            }
        }
        MessageKind::News => {
            if !entry.acked {
                driver.discard_news_rendezvous();
                driver.display().command_result("news", "no response received");
            }
        }
        MessageKind::Rank => {
            if !entry.acked {
                // Feed an invalid response so the aggregation still
                // reaches its expected total and finalizes.
                let target = entry.packet.field(FieldKind::Target).unwrap_or_default();
                driver.feed_rank_response(target, 0, false);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Field;

    fn dest() -> SocketAddr {
        "10.0.0.2:7355".parse().unwrap()
    }

    fn entry(seq: u32, kind: MessageKind, retries: u32) -> AckEntry {
        AckEntry::new(
            Packet::new(kind, "alice", seq),
            dest(),
            retries,
            Duration::from_millis(50),
        )
    }

    #[test]
    fn mark_acked_flips_flag_without_removal() {
        let acks = PendingAcks::default();
        acks.insert(entry(1, MessageKind::Ping, 3));
        assert!(acks.mark_acked(1));
        assert_eq!(acks.len(), 1);
        let removed = acks.remove(1).unwrap();
        assert!(removed.acked);
    }

    #[test]
    fn mark_acked_on_absent_sequence_is_harmless() {
        let acks = PendingAcks::default();
        assert!(!acks.mark_acked(99));
    }

    #[test]
    fn next_attempt_counts_down_retries() {
        let acks = PendingAcks::default();
        acks.insert(entry(4, MessageKind::Titles, 3));
        assert!(acks.next_attempt(4).is_some());
        assert!(acks.next_attempt(4).is_some());
        assert!(acks.next_attempt(4).is_some());
        assert!(acks.next_attempt(4).is_none());
    }

    #[test]
    fn next_attempt_stops_after_ack() {
        let acks = PendingAcks::default();
        acks.insert(entry(5, MessageKind::News, 3));
        assert!(acks.next_attempt(5).is_some());
        acks.mark_acked(5);
        assert!(acks.next_attempt(5).is_none());
    }

    #[test]
    fn kind_of_reports_pending_packet_kind() {
        let acks = PendingAcks::default();
        let mut pending = entry(7, MessageKind::Rank, 3);
        pending.packet.fields.push(Field::new(FieldKind::Target, "bob"));
        acks.insert(pending);
        assert_eq!(acks.kind_of(7), Some(MessageKind::Rank));
        assert_eq!(acks.kind_of(8), None);
    }
}
