mod config;
mod errors;
mod ingest_controller;
mod service;
#[cfg(test)]
mod tests;

pub use config::{IngestConfig, DEFAULT_BATCH_SIZE, DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_FILE_SIZE, DEFAULT_RETRY_DELAY};
pub use errors::{IngestError, SubmitRejection};
pub use ingest_controller::IngestController;
pub use service::{IngestService, Submission};
