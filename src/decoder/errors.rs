use thiserror::Error;

/// Failures that end decoding of the whole source.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Source is empty or has no header row")]
    EmptyInput,
    #[error("Header row is malformed: {0}")]
    MalformedHeader(csv::Error),
    #[error("Missing required columns: {}", .0.join(", "))]
    MissingHeaders(Vec<String>),
    #[error("Record is malformed: {0}")]
    MalformedRecord(csv::Error),
    #[error("Source could not be read: {0}")]
    Io(#[from] std::io::Error)
}

impl DecodeError {
    /// Converts a `csv` error raised while reading records. Only I/O failures are
    /// fatal mid-stream, so anything else is reported as an I/O error of kind `InvalidData`.
    pub(crate) fn from_stream(error: csv::Error) -> Self {
        match error.into_kind() {
            csv::ErrorKind::Io(io) => Self::Io(io),
            kind => Self::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, format!("{kind:?}")))
        }
    }
}
