//! In-memory peer directory: a mutex-guarded map keyed by lowercased
//! name, plus the local node's own record (created once, never removed).

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Mutex;

use crate::peer::{Directory, Peer};

struct Inner {
    local: Peer,
    peers: BTreeMap<String, Peer>,
}

/// The default [`Directory`] implementation, shared by dispatch tasks,
/// retry tasks and the timer.
pub struct InMemoryDirectory {
    inner: Mutex<Inner>,
}

impl InMemoryDirectory {
    pub fn new(local: Peer) -> Self {
        Self {
            inner: Mutex::new(Inner {
                local,
                peers: BTreeMap::new(),
            }),
        }
    }

    fn key(name: &str) -> String {
        name.to_ascii_lowercase()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("peer directory poisoned")
    }
}

impl Directory for InMemoryDirectory {
    fn local(&self) -> Peer {
        self.lock().local.clone()
    }

    fn replace_local_catalog(&self, catalog: BTreeMap<i64, String>) {
        self.lock().local.replace_catalog(catalog);
    }

    fn upsert(&self, name: &str, addr: SocketAddr) -> Peer {
        let mut inner = self.lock();
        let entry = inner
            .peers
            .entry(Self::key(name))
            .or_insert_with(|| Peer::new(name, addr));
        // Rebinding keeps the name key; the address is informational and
        // follows the latest packet.
        entry.addr = addr;
        entry.touch();
        entry.clone()
    }

    fn remove_by_name(&self, name: &str) -> Option<Peer> {
        self.lock().peers.remove(&Self::key(name))
    }

    fn remove_by_addr(&self, addr: SocketAddr) -> Option<Peer> {
        let mut inner = self.lock();
        let key = inner
            .peers
            .iter()
            .find(|(_, p)| p.addr == addr)
            .map(|(k, _)| k.clone())?;
        inner.peers.remove(&key)
    }

    fn get(&self, name: &str) -> Option<Peer> {
        self.lock().peers.get(&Self::key(name)).cloned()
    }

    fn get_by_addr(&self, addr: SocketAddr) -> Option<Peer> {
        self.lock().peers.values().find(|p| p.addr == addr).cloned()
    }

    fn peers(&self) -> Vec<Peer> {
        self.lock().peers.values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.lock().peers.len()
    }

    fn set_stats(&self, name: &str, total_docs: usize, last_doc_date: i64) {
        if let Some(peer) = self.lock().peers.get_mut(&Self::key(name)) {
            peer.total_docs = total_docs;
            peer.last_doc_date = last_doc_date;
        }
    }

    fn set_rating(&self, name: &str, rating: u8) -> bool {
        match self.lock().peers.get_mut(&Self::key(name)) {
            Some(peer) => {
                peer.rating = rating;
                true
            }
            None => false,
        }
    }

    fn replace_catalog(&self, name: &str, catalog: BTreeMap<i64, String>) {
        if let Some(peer) = self.lock().peers.get_mut(&Self::key(name)) {
            peer.catalog = catalog;
        }
    }

    fn touch_by_addr(&self, addr: SocketAddr) {
        let mut inner = self.lock();
        if let Some(peer) = inner.peers.values_mut().find(|p| p.addr == addr) {
            peer.touch();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> SocketAddr {
        format!("10.0.0.{last}:7355").parse().unwrap()
    }

    fn directory() -> InMemoryDirectory {
        InMemoryDirectory::new(Peer::new("me", addr(1)))
    }

    #[test]
    fn upsert_creates_then_updates_in_place() {
        let dir = directory();
        let created = dir.upsert("Alice", addr(2));
        assert_eq!(created.name, "Alice");
        assert_eq!(dir.len(), 1);

        // Same name, different case and address: one entry, new address.
        let updated = dir.upsert("alice", addr(3));
        assert_eq!(dir.len(), 1);
        assert_eq!(updated.addr, addr(3));
        assert_eq!(updated.name, "Alice");
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let dir = directory();
        dir.upsert("Bob", addr(2));
        assert!(dir.get("BOB").is_some());
        assert!(dir.get("bob").is_some());
        assert!(dir.get("carol").is_none());
    }

    #[test]
    fn remove_by_addr_finds_the_right_peer() {
        let dir = directory();
        dir.upsert("alice", addr(2));
        dir.upsert("bob", addr(3));
        let removed = dir.remove_by_addr(addr(2)).unwrap();
        assert_eq!(removed.name, "alice");
        assert_eq!(dir.len(), 1);
        assert!(dir.remove_by_addr(addr(9)).is_none());
    }

    #[test]
    fn stats_and_rating_update_known_peers_only() {
        let dir = directory();
        dir.upsert("alice", addr(2));
        dir.set_stats("ALICE", 5, 1700000000);
        let alice = dir.get("alice").unwrap();
        assert_eq!(alice.total_docs, 5);
        assert_eq!(alice.last_doc_date, 1700000000);

        assert!(dir.set_rating("alice", 4));
        assert!(!dir.set_rating("ghost", 4));
        assert_eq!(dir.get("alice").unwrap().rating, 4);
    }

    #[test]
    fn local_record_survives_peer_removal() {
        let dir = directory();
        dir.upsert("alice", addr(2));
        dir.remove_by_name("alice");
        assert_eq!(dir.len(), 0);
        assert_eq!(dir.local().name, "me");
    }
}
