//! Gazette terminal node: UDP discovery daemon plus interactive console.

mod commands;
mod config;
mod display;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use gazette_core::{catalog, dispatch, timer, Directory, Driver, InMemoryDirectory, Peer, TimerConfig};

use display::{ConsoleDisplay, LifecycleEvent};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const USAGE: &str = "usage: gazette-node <nick> [port] [broadcast]";

/// Exit codes mirrored in the service docs: 1 means the nick is already
/// taken, 2 means the UDP socket could not be opened.
const EXIT_DUPLICATE_NAME: i32 = 1;
const EXIT_BIND_FAILURE: i32 = 2;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("gazette-node {VERSION}");
        return Ok(());
    }
    let Some(nick) = args.first().cloned() else {
        bail!("{USAGE}");
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut cfg = config::load();
    if let Some(port) = args.get(1) {
        cfg.udp_port = port.parse().with_context(|| format!("bad port `{port}`"))?;
    }
    if let Some(broadcast) = args.get(2) {
        cfg.broadcast = broadcast.clone();
    }

    std::fs::create_dir_all(&cfg.news_dir)
        .with_context(|| format!("cannot create news directory {}", cfg.news_dir.display()))?;

    let socket = match bind_udp(cfg.udp_port) {
        Ok(socket) => socket,
        Err(error) => {
            eprintln!("cannot open UDP port {}: {error}", cfg.udp_port);
            std::process::exit(EXIT_BIND_FAILURE);
        }
    };

    let local_ip = match local_ip_address::local_ip() {
        Ok(ip) => ip,
        Err(error) => {
            tracing::warn!(%error, "cannot detect the local address, using loopback");
            IpAddr::from([127, 0, 0, 1])
        }
    };
    let local_addr = SocketAddr::new(local_ip, cfg.udp_port);
    let broadcast: SocketAddr = format!("{}:{}", cfg.broadcast, cfg.udp_port)
        .parse()
        .with_context(|| format!("bad broadcast address `{}`", cfg.broadcast))?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(nick, cfg, socket, local_addr, broadcast))
}

fn bind_udp(port: u16) -> std::io::Result<std::net::UdpSocket> {
    let socket = std::net::UdpSocket::bind(("0.0.0.0", port))?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

async fn run(
    nick: String,
    cfg: config::Config,
    socket: std::net::UdpSocket,
    local_addr: SocketAddr,
    broadcast: SocketAddr,
) -> anyhow::Result<()> {
    let socket = tokio::net::UdpSocket::from_std(socket)?;
    let directory = Arc::new(InMemoryDirectory::new(Peer::new(nick.clone(), local_addr)));
    match catalog::scan(&cfg.news_dir) {
        Ok(scanned) => directory.replace_local_catalog(scanned),
        Err(error) => tracing::warn!(%error, "initial catalog scan failed"),
    }

    let (display, mut lifecycle) = ConsoleDisplay::new();
    let driver = Driver::new(
        socket,
        local_addr,
        broadcast,
        cfg.news_dir.clone(),
        directory,
        Arc::new(display),
    );

    tokio::spawn(dispatch::run_listener(driver.clone()));

    driver.login();
    match lifecycle.recv().await {
        Some(LifecycleEvent::LoginSucceeded) => {
            println!("* logged in as {nick}");
        }
        _ => {
            eprintln!("the name {nick} is already in use on this network");
            std::process::exit(EXIT_DUPLICATE_NAME);
        }
    }

    driver.announce().await;
    tokio::spawn(timer::run_timer(driver.clone(), TimerConfig::default()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = lifecycle.recv() => {
                if let Some(LifecycleEvent::Close { message, exit_code }) = event {
                    eprintln!("{message}");
                    driver.shutdown().await;
                    std::process::exit(exit_code);
                }
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !commands::handle(&driver, line.trim()).await {
                        break;
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    tracing::warn!(%error, "stdin read failed");
                    break;
                }
            },
        }
    }

    println!("* leaving the network");
    driver.shutdown().await;
    Ok(())
}
