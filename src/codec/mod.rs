//! Marshallers and compressors consumed by stream connections
//!
//! Content negotiation picks one of each per request; the stream only ever
//! talks to them through the [`Marshaller`] and [`Compressor`] traits.

pub mod compressor;
pub mod marshaller;

pub use compressor::{Compressor, Compressors, DeflateCompressor, Encoder, GzipCompressor};
pub use marshaller::{JsonMarshaller, MarshalError, Marshaller, Marshallers, TextMarshaller};
