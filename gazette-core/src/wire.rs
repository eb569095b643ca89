//! Wire codec: NUL-terminated text lines over UDP.
//!
//! Layout: line 1 is the message kind name, line 2 `USER: <name>`,
//! line 3 `SEQUENCE: <n>`, then one `<FIELD-KIND>: <value>` line per
//! optional field. A single NUL byte terminates the datagram.

use std::fmt;

const USER_PREFIX: &str = "USER: ";
const SEQUENCE_PREFIX: &str = "SEQUENCE: ";
const FIELD_DELIM: &str = ": ";

/// All eleven message kinds carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Probe the network for another node using the same name.
    Sense,
    /// Reply to a SENSE whose name collides with the local one.
    Duplicate,
    /// Ask a node (or the whole broadcast domain) to identify itself.
    Ping,
    /// Advertise the sender's identity and catalog summary.
    Active,
    /// Request a node's document titles.
    Titles,
    /// Reply to TITLES with the title/date catalog.
    ProvideTitles,
    /// Request document bodies; carries count and the reply TCP port.
    News,
    /// Acknowledge a NEWS request before the TCP transfer starts.
    NewsAck,
    /// Ask a node for its rating of a target name.
    Rank,
    /// Reply to RANK with the target name and score.
    RankAck,
    /// Leave the network.
    Bye,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Sense => "SENSE",
            MessageKind::Duplicate => "DUPLICATE",
            MessageKind::Ping => "PING",
            MessageKind::Active => "ACTIVE",
            MessageKind::Titles => "TITLES",
            MessageKind::ProvideTitles => "PROVIDE_TITLES",
            MessageKind::News => "NEWS",
            MessageKind::NewsAck => "NEWS_ACK",
            MessageKind::Rank => "RANK",
            MessageKind::RankAck => "RANK_ACK",
            MessageKind::Bye => "BYE",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "SENSE" => MessageKind::Sense,
            "DUPLICATE" => MessageKind::Duplicate,
            "PING" => MessageKind::Ping,
            "ACTIVE" => MessageKind::Active,
            "TITLES" => MessageKind::Titles,
            "PROVIDE_TITLES" => MessageKind::ProvideTitles,
            "NEWS" => MessageKind::News,
            "NEWS_ACK" => MessageKind::NewsAck,
            "RANK" => MessageKind::Rank,
            "RANK_ACK" => MessageKind::RankAck,
            "BYE" => MessageKind::Bye,
            _ => return None,
        })
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of the optional fields after the fixed header lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Document count, or how many documents to send.
    Number,
    /// Unix timestamp rendered in decimal.
    Date,
    /// Document title.
    Title,
    /// TCP port awaiting the bulk transfer.
    Port,
    /// Name of the peer a rating refers to.
    Target,
    /// Rating value, 1 to 5.
    Score,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Number => "NUMBER",
            FieldKind::Date => "DATE",
            FieldKind::Title => "TITLE",
            FieldKind::Port => "PORT",
            FieldKind::Target => "TARGET",
            FieldKind::Score => "SCORE",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "NUMBER" => FieldKind::Number,
            "DATE" => FieldKind::Date,
            "TITLE" => FieldKind::Title,
            "PORT" => FieldKind::Port,
            "TARGET" => FieldKind::Target,
            "SCORE" => FieldKind::Score,
            _ => return None,
        })
    }
}

/// One typed field of a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub kind: FieldKind,
    pub value: String,
}

impl Field {
    pub fn new(kind: FieldKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

/// A decoded (or to-be-encoded) protocol message.
///
/// Sequence numbers are a correlation key inside one sender's pending-ack
/// table only; they are not ordered across senders and never deduplicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: MessageKind,
    pub sender: String,
    pub seq: u32,
    pub fields: Vec<Field>,
}

impl Packet {
    pub fn new(kind: MessageKind, sender: impl Into<String>, seq: u32) -> Self {
        Self {
            kind,
            sender: sender.into(),
            seq,
            fields: Vec::new(),
        }
    }

    pub fn with_fields(
        kind: MessageKind,
        sender: impl Into<String>,
        seq: u32,
        fields: Vec<Field>,
    ) -> Self {
        Self {
            kind,
            sender: sender.into(),
            seq,
            fields,
        }
    }

    /// First field of the given kind, if present.
    pub fn field(&self, kind: FieldKind) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.kind == kind)
            .map(|f| f.value.as_str())
    }
}

/// Encode a packet into its datagram bytes.
pub fn encode_packet(packet: &Packet) -> Vec<u8> {
    let mut out = String::new();
    out.push_str(packet.kind.as_str());
    out.push('\n');
    out.push_str(USER_PREFIX);
    out.push_str(&packet.sender);
    out.push('\n');
    out.push_str(SEQUENCE_PREFIX);
    out.push_str(&packet.seq.to_string());
    for field in &packet.fields {
        out.push('\n');
        out.push_str(field.kind.as_str());
        out.push_str(FIELD_DELIM);
        out.push_str(&field.value);
    }
    out.push('\0');
    out.into_bytes()
}

/// Error decoding a datagram. Callers drop the packet, never crash the
/// receive loop.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("datagram is not valid UTF-8")]
    NotText,
    #[error("missing NUL terminator")]
    MissingTerminator,
    #[error("unknown message kind `{0}`")]
    UnknownKind(String),
    #[error("missing or malformed `USER: ` line")]
    BadUser,
    #[error("missing or malformed `SEQUENCE: ` line")]
    BadSequence,
    #[error("malformed field line `{0}`")]
    BadField(String),
    #[error("unknown field kind `{0}`")]
    UnknownFieldKind(String),
}

/// Decode a datagram back into a packet. Exact inverse of
/// [`encode_packet`] for any valid packet.
pub fn decode_packet(bytes: &[u8]) -> Result<Packet, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::NotText)?;
    let text = match text.find('\0') {
        Some(idx) => &text[..idx],
        None => return Err(DecodeError::MissingTerminator),
    };
    let mut lines = text.split('\n');

    let kind_line = lines.next().unwrap_or_default();
    let kind = MessageKind::parse(kind_line)
        .ok_or_else(|| DecodeError::UnknownKind(kind_line.to_string()))?;

    let sender = lines
        .next()
        .and_then(|l| l.strip_prefix(USER_PREFIX))
        .ok_or(DecodeError::BadUser)?
        .to_string();

    let seq = lines
        .next()
        .and_then(|l| l.strip_prefix(SEQUENCE_PREFIX))
        .and_then(|v| v.parse::<u32>().ok())
        .ok_or(DecodeError::BadSequence)?;

    let mut fields = Vec::new();
    for line in lines {
        let delim = line
            .find(FIELD_DELIM)
            .ok_or_else(|| DecodeError::BadField(line.to_string()))?;
        let name = line[..delim].to_ascii_uppercase();
        let kind = FieldKind::parse(&name).ok_or(DecodeError::UnknownFieldKind(name))?;
        fields.push(Field::new(kind, &line[delim + FIELD_DELIM.len()..]));
    }

    Ok(Packet {
        kind,
        sender,
        seq,
        fields,
    })
}
