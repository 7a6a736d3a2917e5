//! Raw machine quantities
//!
//! Quantities are kept as an integer count of milli-units so that summing
//! fractional cores or odd byte counts never picks up floating error.
//! Parsing follows the orchestration platform's quantity notation:
//! `500m`, `2`, `1.5`, `256Mi`, `10Gi`, `3k`, `129e6`.

use std::fmt;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TallyError};

/// Milli-units per whole unit
const MILLI: u128 = 1000;

/// Longest fractional part accepted when parsing
const MAX_FRACTION_DIGITS: u32 = 30;

/// Non-negative raw quantity held at milli-unit precision
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Quantity {
    milli: u128,
}

/// Scale applied by a quantity suffix
#[derive(Debug, Clone, Copy)]
enum Scale {
    /// Power of ten (`m` = -3, `k` = 3, ...)
    Decimal(i32),
    /// Power of two (`Ki` = 10, `Mi` = 20, ...)
    Binary(u32),
}

impl Scale {
    fn from_suffix(suffix: &str) -> Option<Self> {
        // `e`/`E` followed by a signed integer is an exponent, a bare `E` is exa
        if let Some(exp) = suffix
            .strip_prefix(|c: char| c == 'e' || c == 'E')
            .filter(|exp| !exp.is_empty())
        {
            return exp.parse().ok().map(Scale::Decimal);
        }
        let scale = match suffix {
            "" => Scale::Decimal(0),
            "n" => Scale::Decimal(-9),
            "u" => Scale::Decimal(-6),
            "m" => Scale::Decimal(-3),
            "k" => Scale::Decimal(3),
            "M" => Scale::Decimal(6),
            "G" => Scale::Decimal(9),
            "T" => Scale::Decimal(12),
            "P" => Scale::Decimal(15),
            "E" => Scale::Decimal(18),
            "Ki" => Scale::Binary(10),
            "Mi" => Scale::Binary(20),
            "Gi" => Scale::Binary(30),
            "Ti" => Scale::Binary(40),
            "Pi" => Scale::Binary(50),
            "Ei" => Scale::Binary(60),
            _ => return None,
        };
        Some(scale)
    }
}

impl Quantity {
    /// The empty quantity
    pub const ZERO: Quantity = Quantity { milli: 0 };

    /// Build from a milli-unit count
    pub const fn from_milli(milli: u128) -> Self {
        Self { milli }
    }

    /// Build from whole units (cores, bytes, counts)
    pub fn from_units(units: u64) -> Self {
        Self {
            milli: u128::from(units) * MILLI,
        }
    }

    /// Value in milli-units
    pub fn milli(&self) -> u128 {
        self.milli
    }

    pub fn is_zero(&self) -> bool {
        self.milli == 0
    }

    /// Number of `unit`s needed to cover this quantity, rounded up.
    ///
    /// Returns `None` for a zero unit.
    pub fn ceil_div(&self, unit: Quantity) -> Option<u128> {
        if unit.milli == 0 {
            return None;
        }
        Some(self.milli.div_ceil(unit.milli))
    }
}

impl Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Quantity) -> Quantity {
        Quantity {
            milli: self.milli.saturating_add(rhs.milli),
        }
    }
}

impl AddAssign for Quantity {
    fn add_assign(&mut self, rhs: Quantity) {
        *self = *self + rhs;
    }
}

impl FromStr for Quantity {
    type Err = TallyError;

    fn from_str(input: &str) -> Result<Self> {
        let s = input.trim();
        let s = s.strip_prefix('+').unwrap_or(s);
        if s.starts_with('-') {
            return Err(TallyError::quantity(input, "negative quantities are not billable"));
        }

        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(s.len());
        let (number, suffix) = s.split_at(split);
        let scale = Scale::from_suffix(suffix)
            .ok_or_else(|| TallyError::quantity(input, format!("unknown suffix {suffix:?}")))?;

        let (whole, fraction) = match number.split_once('.') {
            Some((w, f)) => (w, f),
            None => (number, ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(TallyError::quantity(input, "missing number"));
        }
        if fraction.contains('.') {
            return Err(TallyError::quantity(input, "more than one decimal point"));
        }
        let fraction_digits = fraction.len() as u32;
        if fraction_digits > MAX_FRACTION_DIGITS {
            return Err(TallyError::quantity(input, "too many fractional digits"));
        }

        let overflow = || TallyError::quantity(input, "value out of range");
        let mantissa: u128 = format!("{whole}{fraction}")
            .parse()
            .map_err(|_| overflow())?;

        let mut numerator = mantissa;
        let mut denominator = 10u128.pow(fraction_digits);
        match scale {
            Scale::Decimal(exp) => {
                let shifted = exp.checked_add(3).ok_or_else(overflow)?;
                let factor = 10u128
                    .checked_pow(shifted.unsigned_abs())
                    .ok_or_else(overflow)?;
                if shifted >= 0 {
                    numerator = numerator.checked_mul(factor).ok_or_else(overflow)?;
                } else {
                    denominator = denominator.checked_mul(factor).ok_or_else(overflow)?;
                }
            }
            Scale::Binary(pow) => {
                numerator = numerator
                    .checked_mul(1u128 << pow)
                    .and_then(|n| n.checked_mul(MILLI))
                    .ok_or_else(overflow)?;
            }
        }

        Ok(Quantity {
            milli: numerator.div_ceil(denominator),
        })
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.milli % MILLI == 0 {
            write!(f, "{}", self.milli / MILLI)
        } else {
            write!(f, "{}m", self.milli)
        }
    }
}

impl TryFrom<String> for Quantity {
    type Error = TallyError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Quantity> for String {
    fn from(q: Quantity) -> Self {
        q.to_string()
    }
}
