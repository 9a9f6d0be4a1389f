//! HTTP module
//!
//! Request templates, the HTTP/1.1 wire codec, connections to the target,
//! the pooled request engine and its result type.

mod client;
mod request;
mod response;
mod transport;
mod wire;

pub use client::{EngineConfig, RequestEngine};
pub use request::{FuzzedRequest, HeaderInput, HeaderMap, RequestBody, RequestTemplate};
pub use response::{format_duration, RequestResult};

#[cfg(test)]
pub use response::SizeBreakdown;
