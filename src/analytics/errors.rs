use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("Invalid page [{page}] of size [{page_size}]: page must be at least 1 and size between 1 and {}", super::MAX_PAGE_SIZE)]
    InvalidPage {
        page: u32,
        page_size: u32
    },
    #[error("Analytics query failed: {0}")]
    Database(#[from] sqlx::Error)
}
