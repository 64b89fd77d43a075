//! RESP Protocol Implementation
//!
//! The wire codec for SnapKV: requests come in as arrays of bulk strings,
//! responses go out as status, error, bulk, null or array replies.
//!
//! ## Modules
//!
//! - `types`: `RespValue` responses and their serialization
//! - `parser`: incremental request parser
//!
//! ## Example
//!
//! ```
//! use snapkv::protocol::{parse_request, RespValue};
//! use bytes::Bytes;
//!
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (request, consumed) = parse_request(data).unwrap().unwrap();
//! assert_eq!(request[0], Bytes::from("GET"));
//! assert_eq!(consumed, data.len());
//!
//! let response = RespValue::bulk_string(Bytes::from("Ariz"));
//! assert_eq!(response.serialize(), b"$4\r\nAriz\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_i64, parse_request, FrameProgress, ParseError, ParseResult, RespParser};
pub use types::{Request, RespValue};
