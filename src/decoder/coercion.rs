use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use csv::StringRecord;

use crate::decoder::{DecodeError, DecoderOptions};
use crate::models::{RejectReason, Transaction};
use crate::types::Monetary;

const TRANSACTION_ID: &str = "TRANSACTION_ID";
const MERCHANT_ID: &str = "MERCHANT_ID";
const ZONE: &str = "ZONE";
const CATEGORY: &str = "CATEGORY";
const AMOUNT: &str = "AMOUNT";
const TIMESTAMP: &str = "TIMESTAMP";
const CUSTOMER_ID: &str = "CUSTOMER_ID";
const CUSTOMER_PHONE: &str = "CUSTOMER_PHONE";
const PHONE_DIGITS: std::ops::RangeInclusive<usize> = 10..=15;

/// Tried in order after RFC 3339. Values without an offset are taken as UTC.
const NAIVE_FORMATS: [&str; 5] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%d/%m/%Y %H:%M:%S"
];

const CURRENCY_NOISE: [char; 4] = ['$', '€', '£', ','];

/// Column positions resolved from the header row.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ColumnMap {
    transaction_id: usize,
    merchant_id: usize,
    zone: usize,
    category: usize,
    amount: usize,
    timestamp: usize,
    customer: Customer
}

/// Where the customer identity comes from. Phone numbers are cleaned before use.
#[derive(Debug, Clone, Copy)]
enum Customer {
    Id(usize),
    Phone(usize)
}

impl ColumnMap {
    pub(crate) fn from_headers(headers: &StringRecord) -> Result<Self, DecodeError> {
        let position = |name: &str| {
            headers.iter().position(|header| header.trim().trim_start_matches('\u{feff}').eq_ignore_ascii_case(name))
        };
        let mut missing = Vec::new();
        let mut require = |name: &'static str| {
            position(name).unwrap_or_else(|| {
                missing.push(name.to_string());
                0
            })
        };

        let transaction_id = require(TRANSACTION_ID);
        let merchant_id = require(MERCHANT_ID);
        let zone = require(ZONE);
        let category = require(CATEGORY);
        let amount = require(AMOUNT);
        let timestamp = require(TIMESTAMP);
        let customer = position(CUSTOMER_ID).map(Customer::Id)
            .or_else(|| position(CUSTOMER_PHONE).map(Customer::Phone));

        if customer.is_none() {
            missing.push(format!("{CUSTOMER_ID}|{CUSTOMER_PHONE}"));
        }

        match customer {
            Some(customer) if missing.is_empty() => Ok(Self {
                transaction_id,
                merchant_id,
                zone,
                category,
                amount,
                timestamp,
                customer
            }),
            _ => Err(DecodeError::MissingHeaders(missing))
        }
    }
}

/// Coerces one record into a [`Transaction`], or explains why it cannot be.
pub(crate) fn coerce(record: &StringRecord, columns: &ColumnMap, options: &DecoderOptions, now: DateTime<Utc>) -> Result<Transaction, RejectReason> {
    let required = |index: usize, name: &'static str| {
        record.get(index)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(RejectReason::MissingField(name))
    };

    let transaction_id = required(columns.transaction_id, TRANSACTION_ID)?;
    let merchant_id = required(columns.merchant_id, MERCHANT_ID)?;
    let zone = required(columns.zone, ZONE)?;
    let category = required(columns.category, CATEGORY)?;
    let raw_amount = required(columns.amount, AMOUNT)?;
    let raw_timestamp = required(columns.timestamp, TIMESTAMP)?;

    let amount = parse_amount(raw_amount)?;

    if amount > options.max_amount {
        return Err(RejectReason::AmountTooLarge {
            amount: amount.to_string(),
            limit: options.max_amount.to_string()
        });
    }

    let timestamp = parse_timestamp(raw_timestamp)
        .ok_or_else(|| RejectReason::InvalidTimestamp(raw_timestamp.to_string()))?;

    if timestamp > now {
        return Err(RejectReason::FutureTimestamp(raw_timestamp.to_string()));
    }

    let customer_id = match columns.customer {
        Customer::Id(index) => record.get(index)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string),
        Customer::Phone(index) => record.get(index).and_then(clean_phone)
    };

    Ok(Transaction {
        transaction_id: transaction_id.to_string(),
        merchant_id: merchant_id.to_string(),
        zone: zone.to_uppercase(),
        category: normalize_category(category),
        amount,
        timestamp,
        customer_id
    })
}

/// Parses a non-negative fixed-point amount, tolerating currency symbols and
/// thousands separators.
pub fn parse_amount(raw: &str) -> Result<Monetary, RejectReason> {
    let cleaned: String = raw.chars()
        .filter(|character| !character.is_whitespace() && !CURRENCY_NOISE.contains(character))
        .collect();

    let amount = Monetary::from_str(&cleaned)
        .map_err(|error| RejectReason::InvalidAmount(error.to_string()))?;

    if amount.is_negative() {
        return Err(RejectReason::NegativeAmount(raw.trim().to_string()));
    }

    Ok(amount)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(timestamp.with_timezone(&Utc));
    }

    NAIVE_FORMATS.iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

/// Keeps the digits and `+` of a phone number. Numbers with fewer than 10 or
/// more than 15 digits are treated as absent.
pub fn clean_phone(raw: &str) -> Option<String> {
    let cleaned: String = raw.chars()
        .filter(|character| character.is_ascii_digit() || *character == '+')
        .collect();
    let digits = cleaned.chars().filter(char::is_ascii_digit).count();

    PHONE_DIGITS.contains(&digits).then_some(cleaned)
}

/// Folds common category spellings onto one canonical name and title-cases the rest.
pub fn normalize_category(raw: &str) -> String {
    let canonical = match raw.trim().to_uppercase().as_str() {
        "GROCERY" | "GROCERIES" => "Grocery",
        "FOOD" => "Food",
        "ELECTRONICS" | "ELECTRONIC" => "Electronics",
        "FASHION" | "CLOTHING" | "CLOTHES" => "Fashion",
        "TRANSPORT" | "TRANSPORTATION" => "Transport",
        "UTILITIES" | "UTILITY" => "Utilities",
        "HEALTHCARE" | "HEALTH" => "Healthcare",
        "EDUCATION" | "EDU" => "Education",
        _ => return title_case(raw.trim())
    };

    canonical.to_string()
}

fn title_case(value: &str) -> String {
    value.split_whitespace()
        .map(|word| {
            let mut characters = word.chars();
            match characters.next() {
                Some(first) => first.to_uppercase().chain(characters.flat_map(char::to_lowercase)).collect(),
                None => String::new()
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
