use std::time::Duration;

use crate::decoder::DecoderOptions;
use crate::types::Monetary;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_FILE_SIZE: u64 = 3 * 1024 * 1024 * 1024;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Tunables for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Rows per bulk insert.
    pub batch_size: usize,
    /// Pause before the single retry of a failed batch.
    pub retry_delay: Duration,
    /// Largest file `submit` accepts, in bytes.
    pub max_file_size: u64,
    /// Decoded rows allowed in flight between the decoder thread and the controller.
    pub channel_capacity: usize,
    pub decoder: DecoderOptions
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            decoder: DecoderOptions::default()
        }
    }
}

impl IngestConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn with_channel_capacity(mut self, channel_capacity: usize) -> Self {
        self.channel_capacity = channel_capacity.max(1);
        self
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.decoder.delimiter = delimiter;
        self
    }

    pub fn with_max_amount(mut self, max_amount: Monetary) -> Self {
        self.decoder.max_amount = max_amount;
        self
    }
}
