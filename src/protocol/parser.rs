//! Incremental RESP Request Parser
//!
//! Clients send every command as an array of bulk strings:
//!
//! ```text
//! *2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n
//! ```
//!
//! ## How the Parser Works
//!
//! The parser reads from a buffer and returns either:
//! - `Ok(Some((request, consumed)))` - A complete request, `consumed` bytes were used
//! - `Ok(None)` - Need more data, the request is incomplete
//! - `Err(ParseError)` - Invalid protocol data
//!
//! This lets the caller:
//! 1. Append incoming network data to a buffer
//! 2. Call `parse()` to attempt parsing
//! 3. If successful, advance the buffer by `consumed` bytes
//! 4. If incomplete, wait for more data
//! 5. If error, reply with a protocol error and disconnect the client
//!
//! Nothing is consumed until the whole request is present, so a client that
//! stalls mid-frame only ever costs its own buffer.

use crate::protocol::types::{prefix, Request, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur during request parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// The request does not start with an array header
    #[error("expected '*', got {0:#04x}")]
    NotAnArray(u8),

    /// An array element is not a bulk string
    #[error("expected '$', got {0:#04x}")]
    ExpectedBulkString(u8),

    /// Invalid integer in a count or length header
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Bulk string length is negative
    #[error("invalid bulk length: {0}")]
    InvalidBulkLength(i64),

    /// Array count is not positive or exceeds the limit
    #[error("invalid multibulk length: {0}")]
    InvalidArrayLength(i64),

    /// Protocol violation (missing CRLF, overlong header, etc.)
    #[error("{0}")]
    Protocol(String),

    /// A bulk string exceeds the maximum allowed size
    #[error("bulk string too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of arguments in one request
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Longest count/length header line accepted before CRLF must appear.
/// `$` or `*` plus an i64 fits comfortably.
pub const MAX_HEADER_LEN: usize = 64;

/// Parser for client requests.
///
/// # Example
///
/// ```
/// use snapkv::protocol::RespParser;
/// use bytes::Bytes;
///
/// let parser = RespParser::new();
/// let buf = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
///
/// let (request, consumed) = parser.parse(buf).unwrap().unwrap();
/// assert_eq!(request, vec![Bytes::from("GET"), Bytes::from("name")]);
/// assert_eq!(consumed, buf.len());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct RespParser {
    max_bulk_size: usize,
    max_array_len: usize,
}

impl Default for RespParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RespParser {
    /// Creates a parser with the default limits.
    pub fn new() -> Self {
        Self {
            max_bulk_size: MAX_BULK_SIZE,
            max_array_len: MAX_ARRAY_LEN,
        }
    }

    /// Creates a parser with custom size limits.
    pub fn with_limits(max_bulk_size: usize, max_array_len: usize) -> Self {
        Self {
            max_bulk_size,
            max_array_len,
        }
    }

    /// Upper bound on the bytes a single request may occupy while buffered.
    pub fn max_request_size(&self) -> usize {
        self.max_bulk_size
            .saturating_mul(2)
            .saturating_add(MAX_HEADER_LEN * 4)
    }

    /// Attempts to parse one complete request from the front of `buf`.
    ///
    /// Stateless: an incomplete request is scanned again from the start on
    /// the next call. Connections use [`RespParser::scan`] instead.
    pub fn parse(&self, buf: &[u8]) -> ParseResult<Option<(Request, usize)>> {
        let mut progress = FrameProgress::new();
        match self.scan(buf, &mut progress)? {
            Some(len) => Ok(Some((progress.take_request(buf), len))),
            None => Ok(None),
        }
    }

    /// Advances `progress` over the bytes of `buf` it has not seen yet.
    ///
    /// Returns the frame length once every argument is present. Until then
    /// `buf` must keep its existing bytes and only grow, since `progress`
    /// records offsets into it. Arguments already located are never scanned
    /// again, so a request trickling in over many reads costs linear time.
    pub fn scan(&self, buf: &[u8], progress: &mut FrameProgress) -> ParseResult<Option<usize>> {
        let count = match progress.count {
            Some(count) => count,
            None => {
                let Some(&first) = buf.first() else {
                    return Ok(None);
                };
                if first != prefix::ARRAY {
                    return Err(ParseError::NotAnArray(first));
                }

                let (count, used) = match parse_header(buf)? {
                    Some(header) => header,
                    None => return Ok(None),
                };
                if count < 1 || count as u64 > self.max_array_len as u64 {
                    return Err(ParseError::InvalidArrayLength(count));
                }

                let count = count as usize;
                progress.count = Some(count);
                progress.offset = used;
                progress.spans.reserve(count.min(16));
                count
            }
        };

        while progress.spans.len() < count {
            let rest = buf.get(progress.offset..).unwrap_or_default();
            if rest.is_empty() {
                return Ok(None);
            }

            match self.scan_bulk_string(rest)? {
                Some((start, len, used)) => {
                    progress.spans.push((progress.offset + start, len));
                    progress.offset += used;
                }
                None => return Ok(None),
            }
        }

        Ok(Some(progress.offset))
    }

    /// Locates a bulk string `$<length>\r\n<data>\r\n` without copying it.
    ///
    /// Returns the data's start and length relative to `buf`, and the bytes
    /// the whole element occupies.
    fn scan_bulk_string(&self, buf: &[u8]) -> ParseResult<Option<(usize, usize, usize)>> {
        if buf[0] != prefix::BULK_STRING {
            return Err(ParseError::ExpectedBulkString(buf[0]));
        }

        let (length, data_start) = match parse_header(buf)? {
            Some(header) => header,
            None => return Ok(None),
        };

        if length < 0 {
            return Err(ParseError::InvalidBulkLength(length));
        }

        if length as u64 > self.max_bulk_size as u64 {
            return Err(ParseError::MessageTooLarge {
                size: length as usize,
                max: self.max_bulk_size,
            });
        }
        let length = length as usize;

        let total_needed = data_start + length + 2;
        if buf.len() < total_needed {
            return Ok(None);
        }

        if &buf[data_start + length..total_needed] != CRLF {
            return Err(ParseError::Protocol(
                "bulk string missing trailing CRLF".to_string(),
            ));
        }

        Ok(Some((data_start, length, total_needed)))
    }
}

/// Parse state of a request that has not fully arrived yet.
#[derive(Debug, Default)]
pub struct FrameProgress {
    /// Argument count, once the array header has been read
    count: Option<usize>,
    /// First byte not yet scanned
    offset: usize,
    /// `(start, len)` of every argument located so far
    spans: Vec<(usize, usize)>,
}

impl FrameProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of arguments located so far.
    pub fn args_scanned(&self) -> usize {
        self.spans.len()
    }

    /// Copies the arguments of a completed frame out of `buf` and resets the
    /// progress for the next request.
    pub fn take_request(&mut self, buf: &[u8]) -> Request {
        let request = self
            .spans
            .iter()
            .map(|&(start, len)| Bytes::copy_from_slice(&buf[start..start + len]))
            .collect();
        self.count = None;
        self.offset = 0;
        self.spans.clear();
        request
    }
}

/// Parses a `<prefix><integer>\r\n` header line.
///
/// Returns the integer and the number of bytes the line occupies.
fn parse_header(buf: &[u8]) -> ParseResult<Option<(i64, usize)>> {
    let search_end = buf.len().min(1 + MAX_HEADER_LEN + 2);

    let pos = match find_crlf(&buf[1..search_end]) {
        Some(pos) => pos,
        None if buf.len() > 1 + MAX_HEADER_LEN => {
            return Err(ParseError::Protocol("header line too long".to_string()));
        }
        None => return Ok(None),
    };

    let digits = &buf[1..1 + pos];
    let n = parse_i64(digits)
        .ok_or_else(|| ParseError::InvalidInteger(String::from_utf8_lossy(digits).into_owned()))?;

    Ok(Some((n, 1 + pos + 2)))
}

/// Parses a base-10 integer: an optional `-` followed by ASCII digits.
///
/// Stricter than `str::parse`, which also takes a leading `+`.
pub fn parse_i64(digits: &[u8]) -> Option<i64> {
    let unsigned = digits.strip_prefix(b"-").unwrap_or(digits);
    if unsigned.is_empty() || !unsigned.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Parses a single request with the default limits.
pub fn parse_request(buf: &[u8]) -> ParseResult<Option<(Request, usize)>> {
    RespParser::new().parse(buf)
}
