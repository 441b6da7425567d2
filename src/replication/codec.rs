//! Replicated statement codec
//!
//! A TOI statement travels through the provider as an opaque buffer:
//! - Magic (4 bytes, "ACRS")
//! - Format version (u8)
//! - Payload length (u32 LE)
//! - Payload (JSON `ReplicatedStatement`)
//! - Checksum (u32 LE, CRC32 of the payload)
//!
//! Every node decodes and verifies the buffer before applying it.

use std::io::{Cursor, Read};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{ReplicationError, ReplicationResult};
use super::session::SessionId;

const MAGIC: [u8; 4] = *b"ACRS";
const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = 4 + 1 + 4;
const TRAILER_LEN: usize = 4;

/// A statement executed under total order isolation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicatedStatement {
    /// Originating session
    pub session_id: SessionId,
    pub database: Option<String>,
    pub table: Option<String>,
    /// Statement text
    pub query: String,
    pub issued_at: DateTime<Utc>,
}

impl ReplicatedStatement {
    pub fn new(
        session_id: SessionId,
        database: Option<&str>,
        table: Option<&str>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            database: database.map(str::to_string),
            table: table.map(str::to_string),
            query: query.into(),
            issued_at: Utc::now(),
        }
    }

    /// Frame the statement, refusing buffers above `max_size` bytes.
    pub fn encode(&self, max_size: usize) -> ReplicationResult<Vec<u8>> {
        let payload = serde_json::to_vec(self).map_err(|e| {
            ReplicationError::write_set_preparation(format!("cannot serialize statement: {}", e))
        })?;

        let total = HEADER_LEN + payload.len() + TRAILER_LEN;
        if total > max_size {
            return Err(ReplicationError::write_set_preparation(format!(
                "replicated statement of {} bytes exceeds max_ws_size {}",
                total, max_size
            )));
        }
        let payload_len = u32::try_from(payload.len()).map_err(|_| {
            ReplicationError::write_set_preparation("replicated statement too large to frame")
        })?;

        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(&MAGIC);
        buf.push(FORMAT_VERSION);
        buf.extend_from_slice(&payload_len.to_le_bytes());
        buf.extend_from_slice(&payload);
        buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        Ok(buf)
    }

    /// Verify and parse a framed statement.
    pub fn decode(buf: &[u8]) -> ReplicationResult<Self> {
        let mut cursor = Cursor::new(buf);

        let mut magic = [0u8; 4];
        read_exact(&mut cursor, &mut magic)?;
        if magic != MAGIC {
            return Err(corrupt("bad magic"));
        }

        let mut version = [0u8; 1];
        read_exact(&mut cursor, &mut version)?;
        if version[0] != FORMAT_VERSION {
            return Err(corrupt(&format!("unknown format version {}", version[0])));
        }

        let mut len_buf = [0u8; 4];
        read_exact(&mut cursor, &mut len_buf)?;
        let payload_len = u32::from_le_bytes(len_buf) as usize;
        if buf.len() != HEADER_LEN + payload_len + TRAILER_LEN {
            return Err(corrupt("length mismatch"));
        }

        let mut payload = vec![0u8; payload_len];
        read_exact(&mut cursor, &mut payload)?;
        let mut crc_buf = [0u8; 4];
        read_exact(&mut cursor, &mut crc_buf)?;
        if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
            return Err(corrupt("checksum mismatch"));
        }

        serde_json::from_slice(&payload).map_err(|e| corrupt(&e.to_string()))
    }
}

fn read_exact(cursor: &mut Cursor<&[u8]>, buf: &mut [u8]) -> ReplicationResult<()> {
    cursor.read_exact(buf).map_err(|_| corrupt("truncated"))
}

fn corrupt(reason: &str) -> ReplicationError {
    ReplicationError::invalid_state(format!("corrupt replicated statement: {}", reason))
}
