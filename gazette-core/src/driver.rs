//! The protocol driver: one shared context holding the UDP socket, the
//! sequence counter, the pending-ack table and the rating aggregation.
//! Dispatch tasks, retry tasks, the timer and the front end all talk to
//! the network through it.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpListener, UdpSocket};

use crate::ack::{run_retry, AckEntry, PendingAcks};
use crate::catalog;
use crate::peer::{names_equal, Directory, DisplaySink};
use crate::transfer;
use crate::wire::{encode_packet, Field, FieldKind, MessageKind, Packet};

/// SENSE waits less than the other reliable sends: a collision answer
/// comes from a live node on the same segment or not at all.
pub const SENSE_RETRIES: u32 = 2;
pub const SENSE_TIMEOUT: Duration = Duration::from_millis(2000);

/// A single probe for a sender we have never seen.
pub const PROBE_PING_RETRIES: u32 = 1;
/// Liveness checks push harder before giving a peer up.
pub const LIVENESS_PING_RETRIES: u32 = 3;
pub const PING_TIMEOUT: Duration = Duration::from_millis(3000);

pub const TITLES_RETRIES: u32 = 3;
pub const TITLES_TIMEOUT: Duration = Duration::from_millis(3000);
pub const NEWS_RETRIES: u32 = 3;
pub const NEWS_TIMEOUT: Duration = Duration::from_millis(3000);
pub const RANK_RETRIES: u32 = 3;
pub const RANK_TIMEOUT: Duration = Duration::from_millis(3000);

/// Pause between the two ACTIVE announcements at startup, and between
/// the two BYE datagrams at shutdown.
const REPEAT_PAUSE: Duration = Duration::from_secs(2);

/// Running totals for one rating target.
struct RankTally {
    /// Display spelling of the target name.
    name: String,
    sum: f64,
    responders: usize,
    /// Replies seen for this target, the local seed included.
    received: usize,
}

/// One in-flight rating query. At most one exists at a time.
struct RankQuery {
    /// Command echo for the final result.
    command: String,
    /// Replies required per target before the table renders: the number
    /// of remote peers at query start.
    expected: usize,
    /// Keyed by lowercased target name.
    tallies: BTreeMap<String, RankTally>,
}

impl RankQuery {
    fn is_complete(&self) -> bool {
        self.tallies.values().all(|t| t.received >= self.expected)
    }

    fn render(&self) -> String {
        let mut out = String::from("peer\t\tresponses\taverage");
        for tally in self.tallies.values() {
            out.push('\n');
            if tally.responders > 0 && tally.sum != 0.0 {
                let average = tally.sum / tally.responders as f64;
                out.push_str(&format!(
                    "{}\t\t{}\t\t{:.2}",
                    tally.name, tally.responders, average
                ));
            } else {
                out.push_str(&format!("{}\t\t-\t\t-", tally.name));
            }
        }
        out
    }
}

pub struct Driver {
    socket: UdpSocket,
    local_addr: SocketAddr,
    broadcast: SocketAddr,
    news_dir: PathBuf,
    seq: AtomicU32,
    running: AtomicBool,
    acks: PendingAcks,
    directory: Arc<dyn Directory>,
    display: Arc<dyn DisplaySink>,
    ranking: Mutex<Option<RankQuery>>,
    /// Listener bound for an outstanding NEWS request, waiting for the
    /// peer's NEWS_ACK before the TCP transfer starts.
    news_rendezvous: Mutex<Option<TcpListener>>,
}

impl Driver {
    pub fn new(
        socket: UdpSocket,
        local_addr: SocketAddr,
        broadcast: SocketAddr,
        news_dir: PathBuf,
        directory: Arc<dyn Directory>,
        display: Arc<dyn DisplaySink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            socket,
            local_addr,
            broadcast,
            news_dir,
            seq: AtomicU32::new(0),
            running: AtomicBool::new(true),
            acks: PendingAcks::default(),
            directory,
            display,
            ranking: Mutex::new(None),
            news_rendezvous: Mutex::new(None),
        })
    }

    pub(crate) fn socket(&self) -> &UdpSocket {
        &self.socket
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn broadcast(&self) -> SocketAddr {
        self.broadcast
    }

    pub fn news_dir(&self) -> &Path {
        &self.news_dir
    }

    pub fn acks(&self) -> &PendingAcks {
        &self.acks
    }

    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    pub fn display(&self) -> &Arc<dyn DisplaySink> {
        &self.display
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop all loops: the listener, the timer and every retry task check
    /// this flag.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn local_name(&self) -> String {
        self.directory.local().name
    }

    fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    /// A fresh packet from the local node with a newly allocated sequence.
    fn packet(&self, kind: MessageKind, fields: Vec<Field>) -> Packet {
        Packet::with_fields(kind, self.local_name(), self.next_seq(), fields)
    }

    /// A reply packet echoing the inbound sequence number.
    fn reply(&self, kind: MessageKind, seq: u32, fields: Vec<Field>) -> Packet {
        Packet::with_fields(kind, self.local_name(), seq, fields)
    }

    /// Fire-and-forget send. Send errors are logged and swallowed; UDP
    /// gives no delivery promise anyway.
    pub async fn send_datagram(&self, packet: &Packet, dest: SocketAddr) {
        let bytes = encode_packet(packet);
        match self.socket.send_to(&bytes, dest).await {
            Ok(_) => {
                tracing::trace!(%dest, kind = %packet.kind, seq = packet.seq, "datagram sent");
            }
            Err(error) => {
                tracing::warn!(%dest, kind = %packet.kind, %error, "datagram send failed");
            }
        }
    }

    /// Register the packet in the pending-ack table and hand it to its
    /// own retry task.
    fn send_reliable(
        self: &Arc<Self>,
        packet: Packet,
        dest: SocketAddr,
        retries: u32,
        timeout: Duration,
    ) {
        let seq = packet.seq;
        self.acks.insert(AckEntry::new(packet, dest, retries, timeout));
        tokio::spawn(run_retry(self.clone(), seq));
    }

    // Lifecycle -----------------------------------------------------------

    /// Broadcast SENSE and wait for a name collision. The outcome arrives
    /// through the display sink: an unanswered SENSE is a successful
    /// login, a DUPLICATE reply a failed one.
    pub fn login(self: &Arc<Self>) {
        self.display
            .log(&format!("joining as {}", self.local_name()));
        let packet = self.packet(MessageKind::Sense, Vec::new());
        self.send_reliable(packet, self.broadcast, SENSE_RETRIES, SENSE_TIMEOUT);
    }

    /// Announce the node after a successful login: two ACTIVE broadcasts
    /// a pause apart, then one broadcast PING so existing peers reveal
    /// themselves.
    pub async fn announce(self: &Arc<Self>) {
        self.send_active(None, self.broadcast).await;
        tokio::time::sleep(REPEAT_PAUSE).await;
        self.send_active(None, self.broadcast).await;
        let ping = self.packet(MessageKind::Ping, Vec::new());
        self.send_datagram(&ping, self.broadcast).await;
        self.display.application_enabled();
    }

    /// Leave the network: stop all loops, then broadcast BYE twice.
    pub async fn shutdown(self: &Arc<Self>) {
        self.stop();
        let bye = self.packet(MessageKind::Bye, Vec::new());
        self.send_datagram(&bye, self.broadcast).await;
        tokio::time::sleep(REPEAT_PAUSE).await;
        let bye = self.packet(MessageKind::Bye, Vec::new());
        self.send_datagram(&bye, self.broadcast).await;
    }

    // Outbound builders ---------------------------------------------------

    /// Reply to a colliding SENSE.
    pub async fn send_duplicate(&self, reply_to: u32, dest: SocketAddr) {
        let packet = self.reply(MessageKind::Duplicate, reply_to, Vec::new());
        self.send_datagram(&packet, dest).await;
    }

    /// ACTIVE carries the local catalog summary. With `reply_to` it acks
    /// a PING; without, it is a standalone announcement.
    pub async fn send_active(&self, reply_to: Option<u32>, dest: SocketAddr) {
        let local = self.directory.local();
        let fields = vec![
            Field::new(FieldKind::Number, local.total_docs.to_string()),
            Field::new(FieldKind::Date, local.last_doc_date.to_string()),
        ];
        let seq = match reply_to {
            Some(seq) => seq,
            None => self.next_seq(),
        };
        let packet = Packet::with_fields(MessageKind::Active, local.name, seq, fields);
        self.send_datagram(&packet, dest).await;
    }

    /// Reliable PING to one peer. An unanswered one evicts the peer, so
    /// callers choose how hard to try.
    pub fn send_ping(self: &Arc<Self>, dest: SocketAddr, retries: u32, timeout: Duration) {
        let packet = self.packet(MessageKind::Ping, Vec::new());
        self.send_reliable(packet, dest, retries, timeout);
    }

    /// Single probe for an address that sent us traffic under an unknown
    /// name.
    pub fn probe_peer(self: &Arc<Self>, dest: SocketAddr) {
        self.send_ping(dest, PROBE_PING_RETRIES, PING_TIMEOUT);
    }

    /// Liveness check for a peer that has been quiet too long.
    pub fn ping_peer(self: &Arc<Self>, dest: SocketAddr) {
        self.send_ping(dest, LIVENESS_PING_RETRIES, PING_TIMEOUT);
    }

    /// Ask a peer for its document titles.
    pub fn request_titles(self: &Arc<Self>, dest: SocketAddr) {
        let packet = self.packet(MessageKind::Titles, Vec::new());
        self.send_reliable(packet, dest, TITLES_RETRIES, TITLES_TIMEOUT);
    }

    /// Reply to TITLES with the catalog, read fresh from disk: a NUMBER
    /// field with the document count, then a TITLE/DATE pair per readable
    /// document.
    pub async fn send_provide_titles(&self, reply_to: u32, dest: SocketAddr) {
        let documents = match catalog::list_documents(&self.news_dir) {
            Ok(documents) => documents,
            Err(error) => {
                tracing::warn!(%error, "cannot read the news directory for a titles reply");
                return;
            }
        };
        let mut fields = vec![Field::new(FieldKind::Number, documents.len().to_string())];
        for document in &documents {
            match catalog::read_title(&document.path) {
                Ok(title) => {
                    fields.push(Field::new(FieldKind::Title, title));
                    fields.push(Field::new(FieldKind::Date, document.timestamp.to_string()));
                }
                Err(error) => {
                    tracing::warn!(%error, "skipping unreadable document in titles reply");
                }
            }
        }
        let packet = self.reply(MessageKind::ProvideTitles, reply_to, fields);
        self.send_datagram(&packet, dest).await;
    }

    /// Ask a peer for its `count` newest documents (0 means all). Binds
    /// the TCP listener first and advertises its port in the request; the
    /// listener waits in the rendezvous slot until NEWS_ACK arrives.
    pub async fn request_news(self: &Arc<Self>, dest: SocketAddr, count: usize) {
        let listener = match transfer::bind_receiver().await {
            Ok(listener) => listener,
            Err(error) => {
                tracing::warn!(%error, "cannot bind the bulk transfer listener");
                self.display
                    .command_result("news", "could not open a local port for the transfer");
                return;
            }
        };
        let port = match listener.local_addr() {
            Ok(addr) => addr.port(),
            Err(error) => {
                tracing::warn!(%error, "cannot read the bulk transfer listener address");
                self.display
                    .command_result("news", "could not open a local port for the transfer");
                return;
            }
        };
        *self
            .news_rendezvous
            .lock()
            .expect("news rendezvous poisoned") = Some(listener);

        let packet = self.packet(
            MessageKind::News,
            vec![
                Field::new(FieldKind::Number, count.to_string()),
                Field::new(FieldKind::Port, port.to_string()),
            ],
        );
        self.send_reliable(packet, dest, NEWS_RETRIES, NEWS_TIMEOUT);
    }

    /// Claim the listener bound by [`request_news`], if one is waiting.
    pub fn take_news_rendezvous(&self) -> Option<TcpListener> {
        self.news_rendezvous
            .lock()
            .expect("news rendezvous poisoned")
            .take()
    }

    /// Drop the waiting listener, closing its port.
    pub fn discard_news_rendezvous(&self) {
        self.take_news_rendezvous();
    }

    /// Acknowledge a NEWS request before connecting to its port.
    pub async fn send_news_ack(&self, reply_to: u32, dest: SocketAddr) {
        let packet = self.reply(MessageKind::NewsAck, reply_to, Vec::new());
        self.send_datagram(&packet, dest).await;
    }

    /// Ask one peer for its rating of `target`.
    pub fn send_rank(self: &Arc<Self>, dest: SocketAddr, target: &str) {
        let packet = self.packet(
            MessageKind::Rank,
            vec![Field::new(FieldKind::Target, target)],
        );
        self.send_reliable(packet, dest, RANK_RETRIES, RANK_TIMEOUT);
    }

    /// Answer a RANK with the local score for the target.
    pub async fn send_rank_ack(&self, reply_to: u32, dest: SocketAddr, target: &str, score: u8) {
        let packet = self.reply(
            MessageKind::RankAck,
            reply_to,
            vec![
                Field::new(FieldKind::Target, target),
                Field::new(FieldKind::Score, score.to_string()),
            ],
        );
        self.send_datagram(&packet, dest).await;
    }

    // Ratings -------------------------------------------------------------

    /// Store the local score for a peer.
    pub fn rate_peer(&self, name: &str, score: u8) {
        let command = format!("rank {name} {score}");
        if names_equal(name, &self.local_name()) {
            self.display
                .command_result(&command, "you cannot rate yourself");
            return;
        }
        if !(1..=5).contains(&score) {
            self.display
                .command_result(&command, "the score must be between 1 and 5");
            return;
        }
        if self.directory.set_rating(name, score) {
            self.display
                .command_result(&command, &format!("{name} rated {score}"));
        } else {
            self.display
                .command_result(&command, &format!("{name} is not on the network"));
        }
    }

    /// Open a network-wide rating query: one target, or with `None` the
    /// local node and every known peer. Each target's tally is seeded
    /// with the local score, then a RANK goes to every peer other than
    /// the target itself.
    pub async fn start_rank_query(self: &Arc<Self>, target: Option<&str>) {
        let command = match target {
            Some(name) => format!("rank {name}"),
            None => "rank".to_string(),
        };
        let peers = self.directory.peers();
        let targets: Vec<String> = match target {
            Some(name) => vec![name.to_string()],
            None => std::iter::once(self.local_name())
                .chain(peers.iter().map(|p| p.name.clone()))
                .collect(),
        };

        {
            let mut ranking = self.ranking.lock().expect("rating query poisoned");
            if ranking.is_some() {
                self.display
                    .command_result(&command, "a rating query is already in progress");
                return;
            }
            let mut tallies = BTreeMap::new();
            for name in &targets {
                // A known target contributes the local score as its first
                // reply; the local node and unknown names start empty.
                let tally = match self.directory.get(name) {
                    Some(peer) => RankTally {
                        name: name.clone(),
                        sum: f64::from(peer.rating),
                        responders: 1,
                        received: 1,
                    },
                    None => RankTally {
                        name: name.clone(),
                        sum: 0.0,
                        responders: 0,
                        received: 0,
                    },
                };
                tallies.insert(name.to_ascii_lowercase(), tally);
            }
            *ranking = Some(RankQuery {
                command,
                expected: peers.len(),
                tallies,
            });
        }

        for peer in &peers {
            for name in &targets {
                if !names_equal(&peer.name, name) {
                    self.send_rank(peer.addr, name);
                }
            }
        }
        // With no peers (or every seed already counted) the query is
        // complete before the first reply.
        self.maybe_finalize_rank();
    }

    /// Record one rating reply. Invalid replies (a missing answer fed by
    /// the retry engine, or a zero score) advance the received count
    /// without touching the tally, so the query still terminates.
    pub fn feed_rank_response(&self, target: &str, score: u8, valid: bool) {
        {
            let mut ranking = self.ranking.lock().expect("rating query poisoned");
            let Some(query) = ranking.as_mut() else {
                tracing::debug!(target, "rating reply with no query in progress");
                return;
            };
            let Some(tally) = query.tallies.get_mut(&target.to_ascii_lowercase()) else {
                tracing::debug!(target, "rating reply for a target outside the query");
                return;
            };
            if valid && score != 0 {
                tally.sum += f64::from(score);
                tally.responders += 1;
            }
            tally.received += 1;
        }
        self.maybe_finalize_rank();
    }

    /// Render and clear the query once every target has all its replies.
    /// The take-then-render order makes finalization happen exactly once.
    fn maybe_finalize_rank(&self) {
        let finished = {
            let mut ranking = self.ranking.lock().expect("rating query poisoned");
            match ranking.as_ref() {
                Some(query) if query.is_complete() => ranking.take(),
                _ => None,
            }
        };
        if let Some(query) = finished {
            self.display.command_result(&query.command, &query.render());
        }
    }
}
