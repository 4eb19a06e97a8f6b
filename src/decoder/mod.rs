//! Streaming CSV decoding.
//!
//! [`RowDecoder`] turns a byte stream into a lazy, single-pass sequence of
//! [`DecodedRow`]s. Individual bad lines become [`RejectedRow`]s and decoding
//! carries on; only an unreadable header or an I/O failure ends the stream.

mod coercion;
mod errors;
mod merchants;
mod row_decoder;

use crate::models::{RejectedRow, Transaction};
use crate::types::Monetary;

pub use errors::DecodeError;
pub use merchants::read_merchants;
pub use row_decoder::RowDecoder;

/// Outcome of decoding a single data line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedRow {
    Valid(Transaction),
    Rejected(RejectedRow)
}

/// Field separator, quoting convention and validation limits for a decoder.
#[derive(Debug, Clone, Copy)]
pub struct DecoderOptions {
    pub delimiter: u8,
    pub quote: u8,
    /// Amounts above this are rejected.
    pub max_amount: Monetary
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
            max_amount: Monetary::whole(1_000_000)
        }
    }
}
