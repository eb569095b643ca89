//! Inbound side: the receive loop and the per-packet state machine.
//!
//! One listener task per process; every decoded datagram is handed to its
//! own short-lived dispatch task, so a blocking exchange (the TCP bulk
//! transfer) never stalls the loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::catalog;
use crate::driver::Driver;
use crate::peer::{format_timestamp, names_equal};
use crate::transfer;
use crate::wire::{decode_packet, FieldKind, MessageKind, Packet};

/// Grace before connecting out to serve a NEWS request, giving the
/// requester time to reach its accept call.
const NEWS_CONNECT_DELAY: Duration = Duration::from_secs(1);

/// The receive loop. Exits when the running flag clears or when the
/// node's own BYE broadcast loops back.
pub async fn run_listener(driver: Arc<Driver>) {
    let mut buf = vec![0u8; 64 * 1024];
    while driver.is_running() {
        let (len, from) = match driver.socket().recv_from(&mut buf).await {
            Ok(received) => received,
            Err(error) => {
                tracing::warn!(%error, "datagram receive failed");
                continue;
            }
        };
        let packet = match decode_packet(&buf[..len]) {
            Ok(packet) => packet,
            Err(error) => {
                tracing::warn!(%from, %error, "dropping undecodable datagram");
                continue;
            }
        };
        // Broadcasts loop back through our own socket, and anything
        // loopback-sourced is this machine talking to itself.
        if from == driver.local_addr() || from.ip().is_loopback() {
            if packet.kind == MessageKind::Bye
                && names_equal(&packet.sender, &driver.local_name())
            {
                tracing::debug!("own BYE observed, listener stopping");
                break;
            }
            continue;
        }
        tracing::trace!(%from, kind = %packet.kind, seq = packet.seq, "dispatching");
        let driver = driver.clone();
        tokio::spawn(async move {
            dispatch_packet(driver, packet, from).await;
        });
    }
}

/// Handle one inbound packet.
pub async fn dispatch_packet(driver: Arc<Driver>, packet: Packet, from: SocketAddr) {
    if !driver.is_running() {
        return;
    }
    let seq = packet.seq;
    match packet.kind {
        MessageKind::Sense => {
            // Another node probing with our name collides with us.
            if names_equal(&packet.sender, &driver.local_name()) {
                driver.send_duplicate(seq, from).await;
            }
        }
        MessageKind::Duplicate => {
            // Our SENSE found a twin: the login is lost. Even a reply
            // arriving after the retries were spent means the name
            // collided, so the transport stops regardless.
            if driver.acks().kind_of(seq) == Some(MessageKind::Sense) {
                driver.acks().mark_acked(seq);
            }
            driver.stop();
        }
        MessageKind::Active => handle_active(&driver, &packet, from),
        MessageKind::Ping => {
            if driver.directory().get(&packet.sender).is_none() {
                driver.probe_peer(from);
            }
            driver.send_active(Some(seq), from).await;
        }
        MessageKind::Titles => {
            driver.send_provide_titles(seq, from).await;
        }
        MessageKind::ProvideTitles => handle_provide_titles(&driver, &packet),
        MessageKind::News => handle_news(&driver, &packet, from).await,
        MessageKind::NewsAck => handle_news_ack(&driver, &packet).await,
        MessageKind::Rank => {
            if let Some(target) = packet.field(FieldKind::Target) {
                if let Some(peer) = driver.directory().get(target) {
                    if peer.rating != 0 {
                        driver.send_rank_ack(seq, from, target, peer.rating).await;
                    }
                }
            }
        }
        MessageKind::RankAck => {
            if driver.acks().kind_of(seq) == Some(MessageKind::Rank) {
                driver.acks().mark_acked(seq);
            }
            if let Some(target) = packet.field(FieldKind::Target) {
                match packet.field(FieldKind::Score).and_then(|s| s.parse::<u8>().ok()) {
                    Some(score) => driver.feed_rank_response(target, score, true),
                    None => driver.feed_rank_response(target, 0, false),
                }
            }
        }
        MessageKind::Bye => {
            if let Some(peer) = driver.directory().remove_by_name(&packet.sender) {
                driver
                    .display()
                    .log(&format!("{} left the network", peer.name));
            }
        }
    }
    if packet.kind != MessageKind::Duplicate {
        driver.directory().touch_by_addr(from);
    }
}

/// ACTIVE doubles as a PING ack and as the carrier of a peer's catalog
/// summary.
fn handle_active(driver: &Arc<Driver>, packet: &Packet, from: SocketAddr) {
    if driver.acks().kind_of(packet.seq) == Some(MessageKind::Ping) {
        driver.acks().mark_acked(packet.seq);
    }
    let known = driver.directory().get(&packet.sender).is_some();
    driver.directory().upsert(&packet.sender, from);
    let total_docs = packet
        .field(FieldKind::Number)
        .and_then(|v| v.parse::<usize>().ok());
    let last_doc_date = packet
        .field(FieldKind::Date)
        .and_then(|v| v.parse::<i64>().ok());
    if let (Some(total_docs), Some(last_doc_date)) = (total_docs, last_doc_date) {
        driver
            .directory()
            .set_stats(&packet.sender, total_docs, last_doc_date);
    }
    if !known {
        driver
            .display()
            .log(&format!("{} joined the network", packet.sender));
    }
}

/// Parse the (title, date) pairs of a titles reply, validate the declared
/// count, and cache the sender's catalog. Only answers to an outstanding
/// TITLES request are processed; anything unsolicited is dropped.
fn handle_provide_titles(driver: &Arc<Driver>, packet: &Packet) {
    if driver.acks().kind_of(packet.seq) != Some(MessageKind::Titles) {
        tracing::debug!(sender = %packet.sender, "unsolicited titles reply dropped");
        return;
    }
    driver.acks().mark_acked(packet.seq);
    let declared = packet
        .field(FieldKind::Number)
        .and_then(|v| v.parse::<usize>().ok());
    let Some(declared) = declared else {
        tracing::warn!(sender = %packet.sender, "titles reply without a document count");
        return;
    };

    let mut catalog = std::collections::BTreeMap::new();
    let mut pending_title: Option<&str> = None;
    for field in &packet.fields {
        match field.kind {
            FieldKind::Title => pending_title = Some(&field.value),
            FieldKind::Date => {
                if let (Some(title), Ok(date)) = (pending_title.take(), field.value.parse::<i64>())
                {
                    catalog.insert(date, title.to_string());
                }
            }
            _ => {}
        }
    }

    let command = format!("titles {}", packet.sender);
    if catalog.len() != declared {
        driver.display().command_result(
            &command,
            &format!(
                "{} announced {declared} documents but listed {}",
                packet.sender,
                catalog.len()
            ),
        );
        return;
    }

    let mut listing = format!("{} holds {declared} documents", packet.sender);
    for (date, title) in &catalog {
        listing.push('\n');
        listing.push_str(&format!("{}\t{}", format_timestamp(*date), title));
    }
    driver.directory().replace_catalog(&packet.sender, catalog);
    driver.display().command_result(&command, &listing);
}

/// Serve a NEWS request: ack it, then connect back to the advertised
/// port and stream the newest document bodies.
async fn handle_news(driver: &Arc<Driver>, packet: &Packet, from: SocketAddr) {
    driver.send_news_ack(packet.seq, from).await;

    let count = packet
        .field(FieldKind::Number)
        .and_then(|v| v.parse::<usize>().ok());
    let port = packet
        .field(FieldKind::Port)
        .and_then(|v| v.parse::<u16>().ok());
    let (Some(count), Some(port)) = (count, port) else {
        tracing::warn!(sender = %packet.sender, "news request with malformed fields");
        return;
    };

    let documents = match catalog::newest_documents(driver.news_dir(), count) {
        Ok(documents) => documents,
        Err(error) => {
            tracing::warn!(%error, "cannot read the news directory to serve a request");
            return;
        }
    };
    let mut bodies = Vec::with_capacity(documents.len());
    for document in &documents {
        match catalog::read_document(&document.path) {
            Ok(body) => bodies.push(body),
            Err(error) => tracing::warn!(%error, "skipping unreadable document"),
        }
    }

    // Give the requester time to reach accept on its listener.
    tokio::time::sleep(NEWS_CONNECT_DELAY).await;
    let dest = SocketAddr::new(from.ip(), port);
    tracing::debug!(%dest, count = bodies.len(), sender = %packet.sender, "serving documents");
    if let Err(error) = transfer::send_documents(dest, &transfer::join_documents(&bodies)).await {
        tracing::warn!(%dest, %error, "bulk transfer send failed");
    }
}

/// The peer accepted our NEWS request: receive the documents on the
/// listener bound when the request went out.
async fn handle_news_ack(driver: &Arc<Driver>, packet: &Packet) {
    if driver.acks().kind_of(packet.seq) == Some(MessageKind::News) {
        driver.acks().mark_acked(packet.seq);
    }
    let Some(listener) = driver.take_news_rendezvous() else {
        tracing::debug!(sender = %packet.sender, "news ack without a waiting listener");
        return;
    };
    match transfer::receive_documents(listener).await {
        Ok(text) => {
            driver
                .display()
                .news(&format!("from {}:\n{text}", packet.sender));
        }
        Err(error) => {
            tracing::warn!(%error, "bulk transfer receive failed");
            driver
                .display()
                .command_result("news", "the transfer failed");
        }
    }
}
