//! Read-only analytics over stored transactions.
//!
//! Grouping, filtering and ordering happen in SQLite. The only statistic
//! computed in Rust is the population mean and standard deviation used for
//! anomaly detection, which is folded over a row stream in constant memory.

mod aggregation_engine;
mod errors;
mod welford;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

pub use aggregation_engine::AggregationEngine;
pub use errors::AnalyticsError;
pub use welford::Welford;

pub const LEADERBOARD_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: u32 = 1000;
pub const DEFAULT_DORMANT_PAGE_SIZE: u32 = 100;
pub const DEFAULT_ANOMALY_PAGE_SIZE: u32 = 50;
/// Standard deviations above the mean beyond which an amount is anomalous.
pub const ANOMALY_SIGMA: f64 = 3.0;

/// A validated 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Page {
    pub page: u32,
    pub page_size: u32
}

impl Page {
    pub fn new(page: u32, page_size: u32) -> Result<Self, AnalyticsError> {
        if page < 1 || page_size < 1 || page_size > MAX_PAGE_SIZE {
            return Err(AnalyticsError::InvalidPage { page, page_size });
        }

        Ok(Self { page, page_size })
    }

    pub fn first(page_size: u32) -> Self {
        Self {
            page: 1,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE)
        }
    }

    pub(crate) fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }

    pub(crate) fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.page_size)
    }
}

/// One page of results plus the size of the whole result set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub total_pages: u64
}

impl<T> Paginated<T> {
    pub(crate) fn new(items: Vec<T>, page: Page, total: u64) -> Self {
        Self {
            items,
            page: page.page,
            page_size: page.page_size,
            total,
            total_pages: total.div_ceil(u64::from(page.page_size))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneTotal {
    pub rank: u32,
    pub zone: String,
    pub total_amount: Decimal,
    pub transaction_count: u64,
    pub average_amount: Decimal
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryShare {
    pub category: String,
    pub transaction_count: u64,
    /// Share of all stored transactions, 0 to 100.
    pub percentage: f64
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DormantMerchant {
    pub merchant_id: String,
    pub name: Option<String>
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyBucket {
    /// Hour of day in UTC, 0 to 23.
    pub hour: u32,
    pub transaction_count: u64,
    pub total_amount: Decimal,
    pub average_amount: Decimal
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    pub transaction_id: String,
    pub merchant_id: String,
    pub zone: String,
    pub category: String,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
    pub customer_id: Option<String>,
    /// Standard deviations above the population mean.
    pub z_score: f64
}

/// Anomalous transactions together with the statistics they were judged against.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyReport {
    pub mean: Decimal,
    pub standard_deviation: Decimal,
    pub threshold: Decimal,
    pub anomalies: Paginated<Anomaly>
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetentionSummary {
    pub total_customers: u64,
    pub repeat_customers: u64,
    pub single_transaction_customers: u64,
    /// Repeat customers over all customers, 0 to 1.
    pub retention_rate: f64,
    pub average_transactions_per_customer: f64
}

/// Every analytic result, computed against one consistent view of the data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsReport {
    pub generated_at: DateTime<Utc>,
    pub transaction_count: u64,
    pub zone_leaderboard: Vec<ZoneTotal>,
    pub category_distribution: Vec<CategoryShare>,
    pub dormant_merchants: Paginated<DormantMerchant>,
    pub hourly_pattern: Vec<HourlyBucket>,
    pub anomalies: AnomalyReport,
    pub customer_retention: RetentionSummary
}
