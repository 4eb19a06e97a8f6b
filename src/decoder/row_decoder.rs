use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use chrono::{DateTime, Utc};
use csv::{Reader, ReaderBuilder, StringRecord, Trim};
use tracing::trace;

use crate::decoder::coercion::{coerce, ColumnMap};
use crate::decoder::{DecodeError, DecodedRow, DecoderOptions};
use crate::models::{RejectReason, RejectedRow};

/// Pull-based decoder over a delimited byte stream.
///
/// A single record buffer is reused for every line, so memory use does not
/// grow with the size of the source. The sequence is single-pass: once a row
/// has been yielded the underlying reader has moved past it.
pub struct RowDecoder<R: Read> {
    reader: Reader<R>,
    columns: ColumnMap,
    options: DecoderOptions,
    record: StringRecord,
    started_at: DateTime<Utc>,
    finished: bool
}

impl RowDecoder<BufReader<File>> {
    pub fn open(path: &Path, options: DecoderOptions) -> Result<Self, DecodeError> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file), options)
    }
}

impl<R: Read> RowDecoder<R> {
    /// Reads and validates the header row. A missing or malformed header is fatal.
    pub fn new(source: R, options: DecoderOptions) -> Result<Self, DecodeError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(options.delimiter)
            .quote(options.quote)
            .trim(Trim::All)
            .flexible(true)
            .has_headers(true)
            .from_reader(source);

        let headers = match reader.headers() {
            Ok(headers) => headers.clone(),
            Err(error) if error.is_io_error() => return Err(DecodeError::from_stream(error)),
            Err(error) => return Err(DecodeError::MalformedHeader(error))
        };

        if headers.iter().all(|header| header.trim().is_empty()) {
            return Err(DecodeError::EmptyInput);
        }

        let columns = ColumnMap::from_headers(&headers)?;

        Ok(Self {
            reader,
            columns,
            options,
            record: StringRecord::new(),
            started_at: Utc::now(),
            finished: false
        })
    }

    fn decode_current(&self) -> DecodedRow {
        match coerce(&self.record, &self.columns, &self.options, self.started_at) {
            Ok(transaction) => DecodedRow::Valid(transaction),
            Err(reason) => self.reject(reason)
        }
    }

    fn reject(&self, reason: RejectReason) -> DecodedRow {
        let line = self.record.position().map(|position| position.line()).unwrap_or_default();
        trace!("Rejected line [{line}] {:?}: {reason}", self.record);

        DecodedRow::Rejected(RejectedRow {
            line,
            fields: self.record.iter().map(str::to_string).collect(),
            reason
        })
    }
}

impl<R: Read> Iterator for RowDecoder<R> {
    type Item = Result<DecodedRow, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.reader.read_record(&mut self.record) {
            Ok(true) => Some(Ok(self.decode_current())),
            Ok(false) => {
                self.finished = true;
                None
            }
            Err(error) if error.is_io_error() => {
                self.finished = true;
                Some(Err(DecodeError::from_stream(error)))
            }
            Err(error) => {
                let line = error.position().map(|position| position.line()).unwrap_or_default();
                trace!("Rejected line [{line}]: {error}");

                Some(Ok(DecodedRow::Rejected(RejectedRow {
                    line,
                    fields: Vec::new(),
                    reason: RejectReason::MalformedRow(error.to_string())
                })))
            }
        }
    }
}
