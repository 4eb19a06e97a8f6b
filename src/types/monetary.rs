use crate::types::errors::MonetaryError;
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

pub const DECIMAL_PLACES: usize = 4;
const SCALE: i64 = 10i64.pow(DECIMAL_PLACES as u32);

/// Fixed-point monetary amount stored as an integer count of 1/10_000 units.
///
/// The scaled integer is what lands in storage, so sums computed by the
/// database stay exact.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Monetary(i64);

impl Monetary {
    pub fn from_units(units: i64) -> Self {
        Monetary(units)
    }

    /// Builds a value from whole currency units, e.g. `Monetary::whole(10)` is `10.0000`.
    pub const fn whole(value: i64) -> Self {
        Monetary(value * SCALE)
    }

    pub fn units(&self) -> i64 {
        self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0, DECIMAL_PLACES as u32)
    }

    /// Converts a scaled floating point figure (such as an average computed by the
    /// database over unit values) into a decimal rounded to the monetary scale.
    pub fn decimal_from_scaled_f64(units: f64) -> Decimal {
        Decimal::from_f64_retain(units / SCALE as f64)
            .map(|value| value.round_dp(DECIMAL_PLACES as u32))
            .unwrap_or_default()
    }
}

impl Display for Monetary {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let integer = abs / SCALE as u64;
        let fraction = abs % SCALE as u64;
        write!(formatter, "{}{}.{:0width$}", sign, integer, fraction, width = DECIMAL_PLACES)
    }
}

impl FromStr for Monetary {
    type Err = MonetaryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();

        if value.is_empty() {
            return Err(MonetaryError::Empty);
        }

        let invalid = || MonetaryError::InvalidFormat(value.to_string());

        let (integer_part, fraction_part) = match value.split_once('.') {
            Some((integer, fraction)) => (integer, Some(fraction)),
            None => (value, None)
        };

        if fraction_part.is_some_and(|fraction| fraction.contains('.')) {
            return Err(invalid());
        }

        let (negative, digits) = match integer_part.strip_prefix('-') {
            Some(digits) => (true, digits),
            None => (false, integer_part.strip_prefix('+').unwrap_or(integer_part))
        };

        if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(invalid());
        }

        let integer: i64 = digits.parse().map_err(|_| MonetaryError::Overflow(value.to_string()))?;

        let fraction: i64 = match fraction_part {
            Some(fraction) if !fraction.is_empty() => {
                if !fraction.bytes().all(|byte| byte.is_ascii_digit()) {
                    return Err(invalid());
                }

                if fraction.len() > DECIMAL_PLACES {
                    return Err(MonetaryError::TooPrecise { value: value.to_string(), places: DECIMAL_PLACES });
                }

                format!("{:0<width$}", fraction, width = DECIMAL_PLACES).parse().map_err(|_| invalid())?
            }
            _ => 0
        };

        let magnitude = integer.checked_mul(SCALE)
            .and_then(|scaled| scaled.checked_add(fraction))
            .ok_or_else(|| MonetaryError::Overflow(value.to_string()))?;

        Ok(Monetary(if negative { -magnitude } else { magnitude }))
    }
}

impl Serialize for Monetary {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        Serialize::serialize(&self.to_decimal(), serializer)
    }
}
