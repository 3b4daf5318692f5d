//! Minimal HTTP/1.x plumbing
//!
//! Just enough to read a request head, answer buffered requests and write a
//! streaming preamble on a hijacked transport.

pub mod headers;
pub mod request;
pub mod response;
pub mod status;

pub use headers::Headers;
pub use request::{Request, RequestError, RequestLimits, Version};
pub use response::{write_preamble, Response};
pub use status::StatusCode;
