//! Shared doubles for the driver/dispatch/timer tests.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::net::UdpSocket;

use crate::directory::InMemoryDirectory;
use crate::driver::Driver;
use crate::peer::{DisplaySink, Peer};

/// Everything a [`DisplaySink`] was told, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayEvent {
    Log(String),
    Command(String, String),
    News(String),
    LoginSucceeded,
    LoginFailed,
    ApplicationEnabled,
    Close(String, i32),
}

#[derive(Default)]
pub struct RecordingDisplay {
    events: Mutex<Vec<DisplayEvent>>,
}

impl RecordingDisplay {
    pub fn events(&self) -> Vec<DisplayEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn command_results(&self) -> Vec<(String, String)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                DisplayEvent::Command(c, r) => Some((c, r)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: DisplayEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl DisplaySink for RecordingDisplay {
    fn log(&self, line: &str) {
        self.push(DisplayEvent::Log(line.to_string()));
    }
    fn command_result(&self, command: &str, result: &str) {
        self.push(DisplayEvent::Command(command.to_string(), result.to_string()));
    }
    fn news(&self, text: &str) {
        self.push(DisplayEvent::News(text.to_string()));
    }
    fn login_succeeded(&self) {
        self.push(DisplayEvent::LoginSucceeded);
    }
    fn login_failed(&self) {
        self.push(DisplayEvent::LoginFailed);
    }
    fn application_enabled(&self) {
        self.push(DisplayEvent::ApplicationEnabled);
    }
    fn close_application(&self, message: &str, exit_code: i32) {
        self.push(DisplayEvent::Close(message.to_string(), exit_code));
    }
}

/// A loopback harness: the driver plus a socket standing in for the
/// broadcast address, so tests can count what actually hit the wire.
pub struct Harness {
    pub driver: Arc<Driver>,
    pub directory: Arc<InMemoryDirectory>,
    pub display: Arc<RecordingDisplay>,
    pub wire: Arc<UdpSocket>,
}

impl Harness {
    pub async fn new(local_name: &str, news_dir: PathBuf) -> Self {
        let socket = UdpSocket::bind(("127.0.0.1", 0)).await.unwrap();
        let local_addr = socket.local_addr().unwrap();

        let wire = Arc::new(UdpSocket::bind(("127.0.0.1", 0)).await.unwrap());
        let broadcast = wire.local_addr().unwrap();

        let directory = Arc::new(InMemoryDirectory::new(Peer::new(local_name, local_addr)));
        let display = Arc::new(RecordingDisplay::default());
        let driver = Driver::new(
            socket,
            local_addr,
            broadcast,
            news_dir,
            directory.clone(),
            display.clone(),
        );
        Self {
            driver,
            directory,
            display,
            wire,
        }
    }

    /// Receive one datagram on the stand-in wire socket, decoded.
    pub async fn recv_packet(&self) -> crate::wire::Packet {
        let mut buf = vec![0u8; 64 * 1024];
        let (n, _) = self.wire.recv_from(&mut buf).await.unwrap();
        crate::wire::decode_packet(&buf[..n]).unwrap()
    }

    pub fn peer_addr(&self, last: u8) -> SocketAddr {
        format!("127.1.0.{last}:7355").parse().unwrap()
    }
}
