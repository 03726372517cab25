//! Message sync projection.
//!
//! The engine does not model MIME. It keeps raw RFC 5322 bytes plus the
//! handful of envelope fields it needs, extracted with `mail-parser`.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use mail_parser::MessageParser;
use serde::{Deserialize, Serialize};

/// Message flag as understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Flag {
    Deleted,
    Seen,
    Answered,
    Flagged,
    Draft,
    Recent,
    Forwarded,
}

impl Flag {
    /// Returns the storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deleted => "DELETED",
            Self::Seen => "SEEN",
            Self::Answered => "ANSWERED",
            Self::Flagged => "FLAGGED",
            Self::Draft => "DRAFT",
            Self::Recent => "RECENT",
            Self::Forwarded => "FORWARDED",
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Flag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DELETED" => Ok(Self::Deleted),
            "SEEN" => Ok(Self::Seen),
            "ANSWERED" => Ok(Self::Answered),
            "FLAGGED" => Ok(Self::Flagged),
            "DRAFT" => Ok(Self::Draft),
            "RECENT" => Ok(Self::Recent),
            "FORWARDED" => Ok(Self::Forwarded),
            other => Err(format!("unknown flag: {other}")),
        }
    }
}

/// How much of a message has been downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageDownloadState {
    /// Only the envelope (headers, flags) is known.
    Envelope,
    /// Some body parts are present.
    Partial,
    /// The complete message is stored.
    Full,
}

impl MessageDownloadState {
    /// Returns the storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Envelope => "envelope",
            Self::Partial => "partial",
            Self::Full => "full",
        }
    }

    /// Parses the storage representation, falling back to `Envelope`.
    pub fn parse(value: &str) -> Self {
        match value {
            "full" => Self::Full,
            "partial" => Self::Partial,
            _ => Self::Envelope,
        }
    }
}

/// Error returned when raw bytes cannot be parsed as a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("could not parse message {server_id}")]
pub struct MessageParseError {
    pub server_id: String,
}

/// A message as seen by the synchronization engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server id, unique within its folder.
    pub server_id: String,
    /// Flags currently set.
    pub flags: HashSet<Flag>,
    /// Subject header.
    pub subject: Option<String>,
    /// RFC 5322 Message-ID header.
    pub message_id: Option<String>,
    /// Date header.
    pub date: Option<DateTime<Utc>>,
    /// Full size on the server in bytes.
    pub size: u64,
    /// Raw message bytes downloaded so far.
    #[serde(default, with = "base64_serde")]
    pub body: Option<Vec<u8>>,
}

impl Message {
    /// Creates an envelope-only message.
    pub fn envelope(server_id: impl Into<String>, size: u64) -> Self {
        Self {
            server_id: server_id.into(),
            flags: HashSet::new(),
            subject: None,
            message_id: None,
            date: None,
            size,
            body: None,
        }
    }

    /// Parses raw RFC 5322 bytes into a fully downloaded message.
    pub fn parse(server_id: impl Into<String>, raw: Vec<u8>) -> Result<Self, MessageParseError> {
        let server_id = server_id.into();
        let parsed = MessageParser::default()
            .parse(&raw)
            .ok_or_else(|| MessageParseError {
                server_id: server_id.clone(),
            })?;

        let subject = parsed.subject().map(str::to_owned);
        let message_id = parsed.message_id().map(str::to_owned);
        let date = parsed
            .date()
            .and_then(|d| Utc.timestamp_opt(d.to_timestamp(), 0).single());
        drop(parsed);

        Ok(Self {
            server_id,
            flags: HashSet::new(),
            subject,
            message_id,
            date,
            size: raw.len() as u64,
            body: Some(raw),
        })
    }

    /// Returns the message with the given flags.
    pub fn with_flags(mut self, flags: impl IntoIterator<Item = Flag>) -> Self {
        self.flags = flags.into_iter().collect();
        self
    }

    /// Returns whether a flag is set.
    pub fn is_set(&self, flag: Flag) -> bool {
        self.flags.contains(&flag)
    }

    /// Derives the download state from how many bytes are present.
    pub fn download_state(&self) -> MessageDownloadState {
        match &self.body {
            None => MessageDownloadState::Envelope,
            Some(body) if (body.len() as u64) < self.size => MessageDownloadState::Partial,
            Some(_) => MessageDownloadState::Full,
        }
    }
}

mod base64_serde {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        bytes
            .as_ref()
            .map(|b| STANDARD.encode(b))
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = Option::<String>::deserialize(deserializer)?;
        encoded
            .map(|s| {
                STANDARD
                    .decode(&s)
                    .map_err(|e| serde::de::Error::custom(e.to_string()))
            })
            .transpose()
    }
}
