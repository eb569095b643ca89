//! Serverless LAN news exchange: peer discovery over UDP broadcast, a
//! home-grown at-least-once retry layer, and a TCP side-channel for bulk
//! document transfer. The front end supplies the display sink and drives
//! the lifecycle; everything else lives here.

pub mod ack;
pub mod catalog;
pub mod directory;
pub mod dispatch;
pub mod driver;
pub mod peer;
pub mod timer;
pub mod transfer;
pub mod wire;

pub use directory::InMemoryDirectory;
pub use dispatch::run_listener;
pub use driver::Driver;
pub use peer::{format_timestamp, names_equal, Directory, DisplaySink, Peer};
pub use timer::{run_timer, TimerConfig};
pub use wire::{decode_packet, encode_packet, DecodeError, FieldKind, MessageKind, Packet};

#[cfg(test)]
pub(crate) mod testutil;
