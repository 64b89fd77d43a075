//! Structural reader for the RDB snapshot format.
//!
//! Only the subset needed to bootstrap a string keyspace is understood:
//!
//! ```text
//! "REDIS" <4 ascii digits>                 magic + version
//! 0xFA <string> <string>                   auxiliary field (skipped)
//! 0xFE <length>                            select database
//! 0xFB <length> <length>                   hash table size hints (skipped)
//! [0xFD <u32 LE> | 0xFC <u64 LE>]          expiry of the next record (skipped)
//! 0x00 <string> <string>                   string key / value
//! 0xFF [<u64 checksum>]                    end of records
//! ```
//!
//! Every length is checked against the bytes that remain before anything is
//! read, so a truncated or garbled file produces [`SnapshotError::Corrupt`]
//! instead of an out-of-bounds read.

use super::SnapshotError;
use bytes::{Buf, Bytes};
use tracing::trace;

pub const MAGIC: &[u8] = b"REDIS";
const VERSION_LEN: usize = 4;

pub const OPCODE_AUX: u8 = 0xFA;
pub const OPCODE_RESIZEDB: u8 = 0xFB;
pub const OPCODE_EXPIRETIME_MS: u8 = 0xFC;
pub const OPCODE_EXPIRETIME: u8 = 0xFD;
pub const OPCODE_SELECTDB: u8 = 0xFE;
pub const OPCODE_EOF: u8 = 0xFF;
pub const TYPE_STRING: u8 = 0x00;

const ENC_INT8: u8 = 0;
const ENC_INT16: u8 = 1;
const ENC_INT32: u8 = 2;
const ENC_LZF: u8 = 3;

const CHECKSUM_LEN: usize = 8;

/// A key/value pair read from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub key: Bytes,
    pub value: Bytes,
}

/// A decoded length field.
enum Length {
    Plain(u64),
    /// A string stored in a special encoding (integer or compressed).
    Encoded(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Header,
    Records,
    Done,
}

/// Iterates over the records of an in-memory snapshot.
///
/// Yields `Err` at most once, after which the iterator is exhausted.
///
/// # Example
///
/// ```
/// use snapkv::snapshot::RdbReader;
/// use bytes::Bytes;
///
/// let data = Bytes::from_static(b"REDIS0011\xfe\x00\x00\x03foo\x03bar\xff");
/// let records: Vec<_> = RdbReader::new(data).collect::<Result<_, _>>().unwrap();
/// assert_eq!(records[0].key, Bytes::from("foo"));
/// ```
pub struct RdbReader {
    buf: Bytes,
    total_len: usize,
    state: State,
    version: Option<u32>,
}

impl RdbReader {
    pub fn new(data: Bytes) -> Self {
        Self {
            total_len: data.len(),
            buf: data,
            state: State::Header,
            version: None,
        }
    }

    /// Format version from the header, once it has been read.
    pub fn version(&self) -> Option<u32> {
        self.version
    }

    fn offset(&self) -> usize {
        self.total_len - self.buf.remaining()
    }

    fn corrupt(&self, reason: impl Into<String>) -> SnapshotError {
        SnapshotError::Corrupt {
            offset: self.offset(),
            reason: reason.into(),
        }
    }

    /// Fails unless at least `n` more bytes are available.
    fn need(&self, n: u64, what: &str) -> Result<usize, SnapshotError> {
        if n > self.buf.remaining() as u64 {
            return Err(self.corrupt(format!(
                "{} of {} bytes runs past end of file ({} bytes left)",
                what,
                n,
                self.buf.remaining()
            )));
        }
        Ok(n as usize)
    }

    fn read_u8(&mut self, what: &str) -> Result<u8, SnapshotError> {
        self.need(1, what)?;
        Ok(self.buf.get_u8())
    }

    fn read_header(&mut self) -> Result<(), SnapshotError> {
        if self.buf.remaining() < MAGIC.len() + VERSION_LEN || !self.buf.starts_with(MAGIC) {
            return Err(self.corrupt("missing REDIS magic header"));
        }
        self.buf.advance(MAGIC.len());

        let digits = self.buf.split_to(VERSION_LEN);
        let version = std::str::from_utf8(&digits)
            .ok()
            .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| self.corrupt("invalid version in header"))?;

        trace!(version, "Snapshot header");
        self.version = Some(version);
        Ok(())
    }

    fn read_length(&mut self) -> Result<Length, SnapshotError> {
        let first = self.read_u8("length")?;
        match first >> 6 {
            0b00 => Ok(Length::Plain(u64::from(first & 0x3F))),
            0b01 => {
                let next = self.read_u8("14-bit length")?;
                Ok(Length::Plain((u64::from(first & 0x3F) << 8) | u64::from(next)))
            }
            0b10 => match first {
                0x80 => {
                    self.need(4, "32-bit length")?;
                    Ok(Length::Plain(u64::from(self.buf.get_u32())))
                }
                0x81 => {
                    self.need(8, "64-bit length")?;
                    Ok(Length::Plain(self.buf.get_u64()))
                }
                _ => Err(self.corrupt(format!("invalid length prefix {:#04x}", first))),
            },
            _ => Ok(Length::Encoded(first & 0x3F)),
        }
    }

    fn read_plain_length(&mut self, what: &str) -> Result<u64, SnapshotError> {
        match self.read_length()? {
            Length::Plain(n) => Ok(n),
            Length::Encoded(_) => Err(self.corrupt(format!("expected a plain {}", what))),
        }
    }

    fn read_string(&mut self) -> Result<Bytes, SnapshotError> {
        match self.read_length()? {
            Length::Plain(n) => {
                let n = self.need(n, "string")?;
                Ok(self.buf.copy_to_bytes(n))
            }
            Length::Encoded(ENC_INT8) => {
                self.need(1, "int8 string")?;
                Ok(Bytes::from(self.buf.get_i8().to_string()))
            }
            Length::Encoded(ENC_INT16) => {
                self.need(2, "int16 string")?;
                Ok(Bytes::from(self.buf.get_i16_le().to_string()))
            }
            Length::Encoded(ENC_INT32) => {
                self.need(4, "int32 string")?;
                Ok(Bytes::from(self.buf.get_i32_le().to_string()))
            }
            Length::Encoded(ENC_LZF) => {
                Err(self.corrupt("LZF-compressed strings are not supported"))
            }
            Length::Encoded(other) => {
                Err(self.corrupt(format!("unknown string encoding {}", other)))
            }
        }
    }

    fn read_record(&mut self, value_type: u8) -> Result<SnapshotRecord, SnapshotError> {
        if value_type != TYPE_STRING {
            return Err(self.corrupt(format!("unsupported value type {:#04x}", value_type)));
        }
        let key = self.read_string()?;
        let value = self.read_string()?;
        Ok(SnapshotRecord { key, value })
    }

    fn next_record(&mut self) -> Result<Option<SnapshotRecord>, SnapshotError> {
        if self.state == State::Header {
            self.read_header()?;
            self.state = State::Records;
        }

        loop {
            if !self.buf.has_remaining() {
                return Err(self.corrupt("unexpected end of file before EOF marker"));
            }

            match self.buf.get_u8() {
                OPCODE_AUX => {
                    let key = self.read_string()?;
                    let value = self.read_string()?;
                    trace!(
                        key = %String::from_utf8_lossy(&key),
                        value = %String::from_utf8_lossy(&value),
                        "Skipping auxiliary field"
                    );
                }
                OPCODE_SELECTDB => {
                    let db = self.read_plain_length("database number")?;
                    trace!(db, "Database section");
                }
                OPCODE_RESIZEDB => {
                    self.read_plain_length("hash table size")?;
                    self.read_plain_length("expires table size")?;
                }
                OPCODE_EXPIRETIME_MS => {
                    let n = self.need(8, "millisecond expiry")?;
                    self.buf.advance(n);
                    let value_type = self.read_u8("value type")?;
                    return self.read_record(value_type).map(Some);
                }
                OPCODE_EXPIRETIME => {
                    let n = self.need(4, "second expiry")?;
                    self.buf.advance(n);
                    let value_type = self.read_u8("value type")?;
                    return self.read_record(value_type).map(Some);
                }
                OPCODE_EOF => {
                    if self.buf.remaining() >= CHECKSUM_LEN {
                        self.buf.advance(CHECKSUM_LEN);
                    }
                    self.state = State::Done;
                    return Ok(None);
                }
                value_type => return self.read_record(value_type).map(Some),
            }
        }
    }
}

impl Iterator for RdbReader {
    type Item = Result<SnapshotRecord, SnapshotError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state == State::Done {
            return None;
        }

        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.state = State::Done;
                Some(Err(e))
            }
        }
    }
}
