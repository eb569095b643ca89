//! Peer records and the two collaborator seams the core talks to:
//! the peer directory and the display sink.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Instant;

/// Case-insensitive name comparison. Names are the unique peer key; the
/// stored spelling is preserved for display.
pub fn names_equal(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// One peer of the network, the local node included.
///
/// `total_docs` and `last_doc_date` are cached summaries of `catalog` and
/// must stay consistent with it; the catalog maps document timestamp to
/// filename (local node) or title (remote peers, filled from
/// PROVIDE_TITLES).
#[derive(Debug, Clone)]
pub struct Peer {
    pub name: String,
    pub addr: SocketAddr,
    pub total_docs: usize,
    pub last_doc_date: i64,
    /// 0 means unrated, otherwise 1-5.
    pub rating: u8,
    pub last_seen: Instant,
    pub catalog: BTreeMap<i64, String>,
}

impl Peer {
    pub fn new(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            addr,
            total_docs: 0,
            last_doc_date: 0,
            rating: 0,
            last_seen: Instant::now(),
            catalog: BTreeMap::new(),
        }
    }

    /// Replace the catalog and re-derive the cached count and newest date.
    pub fn replace_catalog(&mut self, catalog: BTreeMap<i64, String>) {
        self.total_docs = catalog.len();
        self.last_doc_date = catalog.keys().next_back().copied().unwrap_or(0);
        self.catalog = catalog;
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Render the newest-document date for tables; `-` when unset.
    pub fn format_last_doc_date(&self) -> String {
        format_timestamp(self.last_doc_date)
    }
}

/// Render a Unix timestamp the way tables show it.
pub fn format_timestamp(ts: i64) -> String {
    match chrono::DateTime::from_timestamp(ts, 0) {
        Some(dt) if ts != 0 => dt.format("%a, %-d %b %Y %H:%M:%S").to_string(),
        _ => "-".to_string(),
    }
}

/// The peer directory the core queries and mutates. Implemented outside
/// the core (the node keeps an in-memory map); every method must be safe
/// under concurrent dispatch tasks.
pub trait Directory: Send + Sync {
    /// Snapshot of the local node's own record.
    fn local(&self) -> Peer;
    /// Replace the local record's catalog (and its derived fields).
    fn replace_local_catalog(&self, catalog: BTreeMap<i64, String>);

    /// Insert the peer if the name is unknown, otherwise update its
    /// address and last-seen. Returns a snapshot of the stored record.
    fn upsert(&self, name: &str, addr: SocketAddr) -> Peer;
    fn remove_by_name(&self, name: &str) -> Option<Peer>;
    fn remove_by_addr(&self, addr: SocketAddr) -> Option<Peer>;
    fn get(&self, name: &str) -> Option<Peer>;
    fn get_by_addr(&self, addr: SocketAddr) -> Option<Peer>;
    /// Snapshot of all remote peers, ordered by name.
    fn peers(&self) -> Vec<Peer>;
    /// Number of remote peers.
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Update the cached document count and newest date of a known peer.
    fn set_stats(&self, name: &str, total_docs: usize, last_doc_date: i64);
    /// Set the local rating for a known peer. Returns false if unknown.
    fn set_rating(&self, name: &str, rating: u8) -> bool;
    /// Replace a known peer's cached catalog.
    fn replace_catalog(&self, name: &str, catalog: BTreeMap<i64, String>);
    /// Refresh last-seen for the peer at this address, if known.
    fn touch_by_addr(&self, addr: SocketAddr);
}

/// The display surface the core pushes results and lifecycle events to.
/// Implemented by the front end; the core never blocks on it.
pub trait DisplaySink: Send + Sync {
    /// Operational log line.
    fn log(&self, line: &str);
    /// Result of a user command (the command echo plus its output).
    fn command_result(&self, command: &str, result: &str);
    /// Received news text.
    fn news(&self, text: &str);
    fn login_succeeded(&self);
    fn login_failed(&self);
    /// The startup sequence finished; the front end may accept input.
    fn application_enabled(&self);
    /// Ask the front end to terminate the process.
    fn close_application(&self, message: &str, exit_code: i32);
}
