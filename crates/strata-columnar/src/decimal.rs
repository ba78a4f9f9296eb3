//! Fixed-point 128-bit decimals.
//!
//! A decimal is a signed 128-bit integer `raw` plus a `scale`; the real value is
//! `raw / 10^scale`. Storage buffers keep the raw integers and decode on access.

use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Largest precision a 128-bit decimal can hold.
pub const MAX_PRECISION: u8 = 38;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecimalError {
    #[error("cannot encode non-finite value {0} as a decimal")]
    NonFinite(f64),
    #[error("decimal precision {0} is outside 1..=38")]
    InvalidPrecision(u8),
    #[error("{value} does not fit in decimal({precision}, {scale})")]
    Overflow { value: f64, precision: u8, scale: i8 },
    #[error("invalid decimal literal {0:?}")]
    InvalidLiteral(String),
}

/// Decodes a raw scaled integer into a float.
///
/// Pure and total: a nonsensical `raw` simply produces a nonsensical float.
#[inline]
pub fn decode(raw: i128, scale: i8) -> f64 {
    raw as f64 / 10f64.powi(i32::from(scale))
}

/// Encodes `value` as a raw scaled integer, rounding half away from zero.
pub fn encode(value: f64, precision: u8, scale: i8) -> Result<i128, DecimalError> {
    if !value.is_finite() {
        return Err(DecimalError::NonFinite(value));
    }
    if precision == 0 || precision > MAX_PRECISION {
        return Err(DecimalError::InvalidPrecision(precision));
    }

    let rounded = (value * 10f64.powi(i32::from(scale))).round();
    let limit = 10i128.pow(u32::from(precision));
    if rounded.abs() >= limit as f64 {
        return Err(DecimalError::Overflow {
            value,
            precision,
            scale,
        });
    }
    Ok(rounded as i128)
}

fn pow10(exp: u32) -> Option<i128> {
    10i128.checked_pow(exp)
}

/// A decoded-on-demand decimal: raw signed integer plus scale.
///
/// Equality and hashing are representational (`1.0` at scale 1 and `1.00` at
/// scale 2 are different values); use [`DecimalValue::compare`] for numeric
/// ordering across scales.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DecimalValue {
    raw: i128,
    scale: i8,
}

impl DecimalValue {
    pub const fn new(raw: i128, scale: i8) -> Self {
        Self { raw, scale }
    }

    /// Rebuilds a value stored as two 64-bit words.
    ///
    /// The words form one two's-complement quantity: `high` carries the sign.
    /// Composing them as the unsigned sum `high * 2^64 + low` would misread
    /// every negative value.
    pub const fn from_words(high: i64, low: u64, scale: i8) -> Self {
        Self {
            raw: ((high as i128) << 64) | low as i128,
            scale,
        }
    }

    pub const fn to_words(self) -> (i64, u64) {
        ((self.raw >> 64) as i64, self.raw as u64)
    }

    pub fn from_f64(value: f64, precision: u8, scale: i8) -> Result<Self, DecimalError> {
        encode(value, precision, scale).map(|raw| Self { raw, scale })
    }

    /// Parses a plain decimal literal such as `"-12.345"` without going through
    /// floating point.
    pub fn parse(text: &str) -> Result<Self, DecimalError> {
        let invalid = || DecimalError::InvalidLiteral(text.to_owned());
        let trimmed = text.trim();
        let (negative, digits) = match trimmed.as_bytes().first() {
            Some(b'-') => (true, &trimmed[1..]),
            Some(b'+') => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };
        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, f),
            None => (digits, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if frac_part.len() > usize::from(MAX_PRECISION) {
            return Err(invalid());
        }

        let mut raw: i128 = 0;
        for b in int_part.bytes().chain(frac_part.bytes()) {
            if !b.is_ascii_digit() {
                return Err(invalid());
            }
            raw = raw
                .checked_mul(10)
                .and_then(|r| r.checked_add(i128::from(b - b'0')))
                .ok_or_else(invalid)?;
        }
        if negative {
            raw = -raw;
        }
        Ok(Self {
            raw,
            scale: frac_part.len() as i8,
        })
    }

    pub const fn raw(self) -> i128 {
        self.raw
    }

    pub const fn scale(self) -> i8 {
        self.scale
    }

    pub fn to_f64(self) -> f64 {
        decode(self.raw, self.scale)
    }

    /// Moves the value to `scale`. Widening is exact; narrowing rounds half
    /// away from zero. Returns `None` on overflow.
    pub fn rescale(self, scale: i8) -> Option<Self> {
        let diff = i32::from(scale) - i32::from(self.scale);
        let raw = match diff.cmp(&0) {
            Ordering::Equal => self.raw,
            Ordering::Greater => self.raw.checked_mul(pow10(diff as u32)?)?,
            Ordering::Less => {
                let divisor = pow10(diff.unsigned_abs())?;
                let quotient = self.raw / divisor;
                let remainder = (self.raw % divisor).abs();
                // `remainder < divisor`, so this cannot overflow at 10^38.
                if remainder >= divisor - remainder {
                    quotient + self.raw.signum()
                } else {
                    quotient
                }
            }
        };
        Some(Self { raw, scale })
    }

    /// Numeric comparison, exact whenever both values fit at the wider scale.
    pub fn compare(&self, other: &Self) -> Ordering {
        if self.scale == other.scale {
            return self.raw.cmp(&other.raw);
        }
        let scale = self.scale.max(other.scale);
        match (self.rescale(scale), other.rescale(scale)) {
            (Some(a), Some(b)) => a.raw.cmp(&b.raw),
            _ => self.to_f64().total_cmp(&other.to_f64()),
        }
    }
}

impl fmt::Display for DecimalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale <= 0 {
            let exponent = self.scale.unsigned_abs();
            return match pow10(u32::from(exponent)).and_then(|factor| self.raw.checked_mul(factor)) {
                Some(value) => write!(f, "{value}"),
                // Too large to expand; keep the exponent visible.
                None => write!(f, "{}e{exponent}", self.raw),
            };
        }
        let Some(divisor) = pow10(self.scale as u32) else {
            return write!(f, "{}e-{}", self.raw, self.scale);
        };
        let sign = if self.raw < 0 { "-" } else { "" };
        let abs = self.raw.unsigned_abs();
        let divisor = divisor as u128;
        write!(
            f,
            "{sign}{}.{:0width$}",
            abs / divisor,
            abs % divisor,
            width = self.scale as usize
        )
    }
}
