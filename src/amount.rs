use anyhow::Context;
use rust_decimal::Decimal;
use serde_with::DeserializeFromStr;

use std::{
    fmt::{Debug, Display},
    iter::Sum,
    ops::{Add, AddAssign, Sub},
    str::FromStr,
};

/// Represents an amount of money in the receipt's currency.
///
/// The amount is stored as an exact [`Decimal`], never as a float, so that
/// summing many small line items can't drift. It parses from the API's
/// comma-decimal strings (`"1,99"`), and the [`Display`] implementation
/// formats it with a decimal point and at least 2 decimal places.
///
/// # Examples
///
/// ```
/// # use lidl_receipts::Amount;
/// let a: Amount = "1,99".parse().unwrap();
/// let b: Amount = "2,50".parse().unwrap();
/// assert_eq!((a + b).to_string(), "4.49");
/// ```
#[derive(Clone, Copy, Default, DeserializeFromStr, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Amount(Decimal);

impl Amount {
    #[must_use]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn value(self) -> Decimal {
        self.0
    }
}

/// Parses a decimal number written with a comma as the decimal separator.
///
/// Dots are treated as thousands separators when a comma is present, so
/// `"1.234,56"` is `1234.56`. Strings without a comma are parsed as-is.
///
/// # Errors
///
/// Returns an error if `s` is not a valid decimal number.
pub fn parse_decimal(s: &str) -> anyhow::Result<Decimal> {
    let s = s.trim();
    let normalized = if s.contains(',') {
        s.replace('.', "").replace(',', ".")
    } else {
        s.to_string()
    };
    Decimal::from_str_exact(&normalized).with_context(|| format!("invalid decimal {s:?}"))
}

impl Debug for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut value = self.0;
        if value.scale() < 2 {
            value.rescale(2);
        }
        f.pad(&value.to_string())
    }
}

impl FromStr for Amount {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(parse_decimal(s)?))
    }
}

impl Add for Amount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Amount {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}
