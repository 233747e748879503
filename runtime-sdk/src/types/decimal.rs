//! Fixed-point decimal numbers.
use std::{fmt, str::FromStr};

use num::{BigInt, Signed, Zero};
use thiserror::Error;

/// Number of fractional digits.
pub const PRECISION: u32 = 18;

/// Error.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("empty decimal string")]
    Empty,
    #[error("too many fractional digits (max {PRECISION})")]
    TooPrecise,
    #[error("malformed decimal: {0}")]
    Malformed(String),
}

fn scale() -> BigInt {
    num::pow(BigInt::from(10u8), PRECISION as usize)
}

/// A signed decimal with 18 fractional digits over an arbitrary-precision integer.
///
/// All arithmetic is exact; there is no rounding except in explicit truncation.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Decimal(BigInt);

impl Decimal {
    /// The zero value.
    pub fn zero() -> Self {
        Decimal(BigInt::zero())
    }

    /// Creates a decimal from an integer value.
    pub fn from_integer<T: Into<BigInt>>(value: T) -> Self {
        Decimal(value.into() * scale())
    }

    /// Creates a decimal from its raw scaled representation.
    pub fn from_raw(raw: BigInt) -> Self {
        Decimal(raw)
    }

    /// Raw scaled representation.
    pub fn raw(&self) -> &BigInt {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }

    /// Multiplies the decimal by an integer.
    pub fn mul_int(&self, value: &BigInt) -> Self {
        Decimal(&self.0 * value)
    }

    /// Integer part, rounding toward zero.
    pub fn truncate(&self) -> BigInt {
        &self.0 / scale()
    }
}

impl FromStr for Decimal {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::Empty);
        }
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, f),
            None => (digits, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(Error::Malformed(s.to_owned()));
        }
        if frac_part.len() > PRECISION as usize {
            return Err(Error::TooPrecise);
        }
        if !int_part
            .chars()
            .chain(frac_part.chars())
            .all(|c| c.is_ascii_digit())
        {
            return Err(Error::Malformed(s.to_owned()));
        }

        let padded = format!(
            "{}{}{}",
            if int_part.is_empty() { "0" } else { int_part },
            frac_part,
            "0".repeat(PRECISION as usize - frac_part.len())
        );
        let raw = BigInt::from_str(&padded).map_err(|_| Error::Malformed(s.to_owned()))?;

        Ok(Decimal(if negative { -raw } else { raw }))
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = scale();
        let abs = self.0.abs();
        let int = &abs / &s;
        let frac = &abs % &s;
        if self.0.is_negative() {
            write!(f, "-")?;
        }
        write!(f, "{}.{:0>width$}", int, frac.to_string(), width = PRECISION as usize)
    }
}

impl fmt::Debug for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl cbor::Encode for Decimal {
    fn into_cbor_value(self) -> cbor::Value {
        cbor::Value::TextString(self.to_string())
    }
}

impl cbor::Decode for Decimal {
    fn try_from_cbor_value(value: cbor::Value) -> Result<Self, cbor::DecodeError> {
        match value {
            cbor::Value::TextString(s) => {
                Decimal::from_str(&s).map_err(|_| cbor::DecodeError::UnexpectedType)
            }
            _ => Err(cbor::DecodeError::UnexpectedType),
        }
    }
}
