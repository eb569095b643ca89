//! Bulk transfer: the TCP side-channel that carries full document bodies
//! after a UDP NEWS/NEWS_ACK handshake has exchanged a port.
//!
//! Plain text lines with a sentinel terminator; documents inside the
//! payload are separated by a single NUL byte. There is no length
//! framing: correctness depends on both sides honoring the sentinel.

use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};

/// Literal line that ends a transmission in either direction.
pub const SENTINEL: &str = "TRANSMISSION_OVER";

/// Byte separating two document bodies inside the payload.
pub const DOCUMENT_SEPARATOR: char = '\0';

/// Bind the receiving listener on an ephemeral port. The bound port is
/// advertised in the NEWS packet.
pub async fn bind_receiver() -> std::io::Result<TcpListener> {
    TcpListener::bind(("0.0.0.0", 0)).await
}

/// Receiver side: accept one connection, accumulate lines until the
/// sentinel (or EOF), echo the sentinel back and return the text.
///
/// There is deliberately no timeout here beyond socket behavior: a sender
/// that never transmits the sentinel stalls this exchange.
pub async fn receive_documents(listener: TcpListener) -> std::io::Result<String> {
    let (stream, from) = listener.accept().await?;
    tracing::debug!(%from, "bulk transfer connection accepted");
    let (reader, writer) = stream.into_split();
    let mut writer = BufWriter::new(writer);
    let mut lines = BufReader::new(reader).lines();

    let mut text = String::new();
    while let Some(line) = lines.next_line().await? {
        if line == SENTINEL {
            break;
        }
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&line);
    }
    writer.write_all(SENTINEL.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(text)
}

/// Sender side: connect to the advertised port, write a count line
/// (non-empty payload lines), the payload, then the sentinel; wait for
/// the echoed sentinel before closing.
pub async fn send_documents(dest: SocketAddr, payload: &str) -> std::io::Result<()> {
    let stream = TcpStream::connect(dest).await?;
    tracing::debug!(%dest, "bulk transfer connection opened");
    let (reader, writer) = stream.into_split();
    let mut writer = BufWriter::new(writer);

    let line_count = payload.lines().filter(|l| !l.is_empty()).count();
    writer.write_all(line_count.to_string().as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.write_all(payload.as_bytes()).await?;
    if !payload.ends_with('\n') {
        writer.write_all(b"\n").await?;
    }
    writer.write_all(SENTINEL.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.eq_ignore_ascii_case(SENTINEL) {
            break;
        }
    }
    Ok(())
}

/// Join document bodies into one payload with the NUL separator.
pub fn join_documents(bodies: &[String]) -> String {
    bodies.join(&DOCUMENT_SEPARATOR.to_string())
}

/// Split received text back into document segments.
pub fn split_documents(text: &str) -> Vec<&str> {
    text.split(DOCUMENT_SEPARATOR).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_exchange_roundtrips_two_documents() {
        let listener = bind_receiver().await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let bodies = vec![
            "headline one\nbody line a\nbody line b".to_string(),
            "headline two\nbody line c".to_string(),
        ];
        let payload = join_documents(&bodies);

        let receiver = tokio::spawn(receive_documents(listener));
        let dest: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        send_documents(dest, &payload).await.unwrap();

        let text = receiver.await.unwrap().unwrap();
        let segments = split_documents(&text);
        assert_eq!(segments.len(), 2);
        assert!(segments[0].contains("headline one"));
        assert!(segments[0].contains("body line b"));
        assert!(segments[1].contains("headline two"));
        // The count line travels ahead of the first document.
        assert!(segments[0].starts_with('4'));
    }

    #[tokio::test]
    async fn receiver_stops_at_eof_without_sentinel() {
        let listener = bind_receiver().await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let receiver = tokio::spawn(receive_documents(listener));
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(b"1\nonly line\n").await.unwrap();
        stream.shutdown().await.unwrap();

        let text = receiver.await.unwrap().unwrap();
        assert!(text.contains("only line"));
    }

    #[test]
    fn join_and_split_are_inverse() {
        let bodies = vec!["a\nb".to_string(), "c".to_string(), "d\ne\nf".to_string()];
        let joined = join_documents(&bodies);
        let split: Vec<&str> = split_documents(&joined);
        assert_eq!(split, vec!["a\nb", "c", "d\ne\nf"]);
    }
}
