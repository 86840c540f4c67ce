//! Per-user HTTP transport: client construction (cookie jar, proxy, TLS
//! bypass), timed dispatch with request-write / first-byte hooks, transport
//! failure classification and wire-size estimation.

mod client;
mod error;
mod estimate;
mod jar;
mod raw;

pub use client::{ClientConfig, PreparedRequest, SendOutcome, TransportFailure, UserClient};
pub use error::{root_cause, Error, Result};
pub use estimate::{request_head_bytes, response_head_bytes};
pub use raw::{parse_raw_request, RawRequest};
