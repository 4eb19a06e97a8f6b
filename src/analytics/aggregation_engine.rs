use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use moka::future::Cache;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::analytics::{
    AnalyticsError, AnalyticsReport, Anomaly, AnomalyReport, CategoryShare, DormantMerchant, HourlyBucket, Page, Paginated,
    RetentionSummary, Welford, ZoneTotal, ANOMALY_SIGMA, DEFAULT_ANOMALY_PAGE_SIZE, DEFAULT_DORMANT_PAGE_SIZE, LEADERBOARD_SIZE
};
use crate::types::Monetary;

type AnomalyRow = (String, String, String, String, i64, i64, Option<String>);

const ZONE_LEADERBOARD: &str = r#"
    SELECT zone, SUM(amount) AS total, COUNT(*) AS count
    FROM transactions
    GROUP BY zone
    ORDER BY total DESC, zone ASC
    LIMIT ?
"#;

const CATEGORY_COUNTS: &str = r#"
    SELECT category, COUNT(*) AS count
    FROM transactions
    GROUP BY category
    ORDER BY count DESC, category ASC
"#;

const DORMANT_FILTER: &str = r#"
    FROM merchants m
    WHERE NOT EXISTS (SELECT 1 FROM transactions t WHERE t.merchant_id = m.merchant_id)
"#;

const HOURLY_BUCKETS: &str = r#"
    SELECT CAST(strftime('%H', timestamp, 'unixepoch') AS INTEGER) AS hour, COUNT(*), SUM(amount)
    FROM transactions
    GROUP BY hour
"#;

const ANOMALIES: &str = r#"
    SELECT transaction_id, merchant_id, zone, category, amount, timestamp, customer_id
    FROM transactions
    WHERE amount > ?
    ORDER BY amount DESC, transaction_id ASC
    LIMIT ? OFFSET ?
"#;

const RETENTION: &str = r#"
    SELECT COUNT(*), COALESCE(SUM(CASE WHEN visits >= 2 THEN 1 ELSE 0 END), 0), COALESCE(SUM(visits), 0)
    FROM (
        SELECT customer_id, COUNT(*) AS visits
        FROM transactions
        WHERE customer_id IS NOT NULL
        GROUP BY customer_id
    )
"#;

/// Answers the analytic queries against the transaction store.
///
/// Every query reads from one transaction snapshot, so a query made of several
/// statements never mixes rows from before and after a concurrent batch commit.
/// [`report`](Self::report) shares one snapshot across all of its parts.
pub struct AggregationEngine {
    pool: SqlitePool,
    cache: Option<Cache<(), Arc<AnalyticsReport>>>
}

impl AggregationEngine {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, cache: None }
    }

    /// Serves [`report`](Self::report) from memory for `ttl` after it is computed.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache = Some(Cache::builder().max_capacity(1).time_to_live(ttl).build());
        self
    }

    /// Top zones by summed amount.
    pub async fn zone_leaderboard(&self) -> Result<Vec<ZoneTotal>, AnalyticsError> {
        let mut tx = self.pool.begin().await?;
        let result = zone_leaderboard(&mut tx).await?;
        tx.commit().await?;

        Ok(result)
    }

    pub async fn category_distribution(&self) -> Result<Vec<CategoryShare>, AnalyticsError> {
        let mut tx = self.pool.begin().await?;
        let result = category_distribution(&mut tx).await?;
        tx.commit().await?;

        Ok(result)
    }

    /// Known merchants with no stored transactions, ordered by merchant ID.
    pub async fn dormant_merchants(&self, page: Page) -> Result<Paginated<DormantMerchant>, AnalyticsError> {
        let mut tx = self.pool.begin().await?;
        let result = dormant_merchants(&mut tx, page).await?;
        tx.commit().await?;

        Ok(result)
    }

    /// Activity per hour of day (UTC). Always 24 buckets; empty hours are zero.
    pub async fn hourly_pattern(&self) -> Result<Vec<HourlyBucket>, AnalyticsError> {
        let mut tx = self.pool.begin().await?;
        let result = hourly_pattern(&mut tx).await?;
        tx.commit().await?;

        Ok(result)
    }

    /// Transactions more than three population standard deviations above the mean amount.
    pub async fn anomalies(&self, page: Page) -> Result<AnomalyReport, AnalyticsError> {
        let mut tx = self.pool.begin().await?;
        let result = anomalies(&mut tx, page).await?;
        tx.commit().await?;

        Ok(result)
    }

    pub async fn customer_retention(&self) -> Result<RetentionSummary, AnalyticsError> {
        let mut tx = self.pool.begin().await?;
        let result = customer_retention(&mut tx).await?;
        tx.commit().await?;

        Ok(result)
    }

    /// All analytics from a single snapshot, with the first page of each paginated part.
    pub async fn report(&self) -> Result<Arc<AnalyticsReport>, AnalyticsError> {
        if let Some(report) = self.cached().await {
            debug!("Serving analytics report from cache");
            return Ok(report);
        }

        let started = Instant::now();
        let mut tx = self.pool.begin().await?;

        let transaction_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions")
            .fetch_one(&mut *tx)
            .await?;

        let report = AnalyticsReport {
            generated_at: Utc::now(),
            transaction_count: transaction_count as u64,
            zone_leaderboard: zone_leaderboard(&mut tx).await?,
            category_distribution: category_distribution(&mut tx).await?,
            dormant_merchants: dormant_merchants(&mut tx, Page::first(DEFAULT_DORMANT_PAGE_SIZE)).await?,
            hourly_pattern: hourly_pattern(&mut tx).await?,
            anomalies: anomalies(&mut tx, Page::first(DEFAULT_ANOMALY_PAGE_SIZE)).await?,
            customer_retention: customer_retention(&mut tx).await?
        };

        tx.commit().await?;

        debug!("Analytics report over {transaction_count} transactions computed in {:?}", started.elapsed());

        let report = Arc::new(report);

        if let Some(cache) = &self.cache {
            cache.insert((), report.clone()).await;
        }

        Ok(report)
    }

    async fn cached(&self) -> Option<Arc<AnalyticsReport>> {
        match &self.cache {
            Some(cache) => cache.get(&()).await,
            None => None
        }
    }
}

async fn zone_leaderboard(connection: &mut SqliteConnection) -> Result<Vec<ZoneTotal>, AnalyticsError> {
    let rows: Vec<(String, i64, i64)> = sqlx::query_as(ZONE_LEADERBOARD)
        .bind(LEADERBOARD_SIZE)
        .fetch_all(&mut *connection)
        .await?;

    Ok(rows.into_iter()
        .enumerate()
        .map(|(index, (zone, total, count))| ZoneTotal {
            rank: index as u32 + 1,
            zone,
            total_amount: Monetary::from_units(total).to_decimal(),
            transaction_count: count as u64,
            average_amount: average(total, count)
        })
        .collect())
}

async fn category_distribution(connection: &mut SqliteConnection) -> Result<Vec<CategoryShare>, AnalyticsError> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions")
        .fetch_one(&mut *connection)
        .await?;

    if total == 0 {
        return Ok(Vec::new());
    }

    let rows: Vec<(String, i64)> = sqlx::query_as(CATEGORY_COUNTS)
        .fetch_all(&mut *connection)
        .await?;

    Ok(rows.into_iter()
        .map(|(category, count)| CategoryShare {
            category,
            transaction_count: count as u64,
            percentage: 100.0 * count as f64 / total as f64
        })
        .collect())
}

async fn dormant_merchants(connection: &mut SqliteConnection, page: Page) -> Result<Paginated<DormantMerchant>, AnalyticsError> {
    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) {DORMANT_FILTER}"))
        .fetch_one(&mut *connection)
        .await?;

    let rows: Vec<(String, Option<String>)> = sqlx::query_as(&format!("SELECT m.merchant_id, m.name {DORMANT_FILTER} ORDER BY m.merchant_id LIMIT ? OFFSET ?"))
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&mut *connection)
        .await?;

    let merchants = rows.into_iter()
        .map(|(merchant_id, name)| DormantMerchant { merchant_id, name })
        .collect();

    Ok(Paginated::new(merchants, page, total as u64))
}

async fn hourly_pattern(connection: &mut SqliteConnection) -> Result<Vec<HourlyBucket>, AnalyticsError> {
    let rows: Vec<(i64, i64, i64)> = sqlx::query_as(HOURLY_BUCKETS)
        .fetch_all(&mut *connection)
        .await?;

    let mut buckets: Vec<HourlyBucket> = (0..24)
        .map(|hour| HourlyBucket {
            hour,
            transaction_count: 0,
            total_amount: Decimal::ZERO,
            average_amount: Decimal::ZERO
        })
        .collect();

    for (hour, count, total) in rows {
        if let Some(bucket) = usize::try_from(hour).ok().and_then(|hour| buckets.get_mut(hour)) {
            bucket.transaction_count = count as u64;
            bucket.total_amount = Monetary::from_units(total).to_decimal();
            bucket.average_amount = average(total, count);
        }
    }

    Ok(buckets)
}

async fn anomalies(connection: &mut SqliteConnection, page: Page) -> Result<AnomalyReport, AnalyticsError> {
    let mut stats = Welford::new();

    {
        let mut amounts = sqlx::query_scalar::<_, i64>("SELECT amount FROM transactions").fetch(&mut *connection);

        while let Some(amount) = amounts.try_next().await? {
            stats.push(amount as f64);
        }
    }

    let mean = stats.mean();
    let deviation = stats.standard_deviation();
    let threshold = mean + ANOMALY_SIGMA * deviation;

    let summary = |anomalies| AnomalyReport {
        mean: Monetary::decimal_from_scaled_f64(mean),
        standard_deviation: Monetary::decimal_from_scaled_f64(deviation),
        threshold: Monetary::decimal_from_scaled_f64(threshold),
        anomalies
    };

    if stats.count() == 0 || deviation == 0.0 {
        return Ok(summary(Paginated::new(Vec::new(), page, 0)));
    }

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE amount > ?")
        .bind(threshold)
        .fetch_one(&mut *connection)
        .await?;

    let rows: Vec<AnomalyRow> = sqlx::query_as(ANOMALIES)
        .bind(threshold)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&mut *connection)
        .await?;

    let items = rows.into_iter()
        .map(|(transaction_id, merchant_id, zone, category, amount, timestamp, customer_id)| Anomaly {
            transaction_id,
            merchant_id,
            zone,
            category,
            amount: Monetary::from_units(amount).to_decimal(),
            timestamp: DateTime::from_timestamp(timestamp, 0).unwrap_or_default(),
            customer_id,
            z_score: (amount as f64 - mean) / deviation
        })
        .collect();

    debug!("Found {total} anomalies above {threshold:.0} units (mean {mean:.0}, stddev {deviation:.0})");

    Ok(summary(Paginated::new(items, page, total as u64)))
}

async fn customer_retention(connection: &mut SqliteConnection) -> Result<RetentionSummary, AnalyticsError> {
    let (total, repeat, visits): (i64, i64, i64) = sqlx::query_as(RETENTION)
        .fetch_one(&mut *connection)
        .await?;

    let ratio = |numerator: i64| if total > 0 { numerator as f64 / total as f64 } else { 0.0 };

    Ok(RetentionSummary {
        total_customers: total as u64,
        repeat_customers: repeat as u64,
        single_transaction_customers: (total - repeat) as u64,
        retention_rate: ratio(repeat),
        average_transactions_per_customer: ratio(visits)
    })
}

fn average(total: i64, count: i64) -> Decimal {
    Monetary::from_units(total).to_decimal()
        .checked_div(Decimal::from(count))
        .map(|value| value.round_dp(4))
        .unwrap_or_default()
}
