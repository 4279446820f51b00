use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, Mul, Neg, Sub, SubAssign},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::op;

pub const IDR_CURRENCY_CODE: &str = "IDR";
pub const IDR_CURRENCY_CODE_LOWER: &str = "idr";

/// The largest order value the gateway will accept, in whole rupiah.
pub const MAX_IDR_AMOUNT: i64 = 1_000_000_000_000;

//--------------------------------------        Idr        -----------------------------------------------------------
/// A whole-rupiah amount. Indonesian rupiah has no circulating sub-unit, so all fiat amounts in the system are
/// integers.
#[derive(Debug, Clone, Copy, Default, Type, Ord, PartialOrd, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct Idr(i64);

op!(binary Idr, Add, add);
op!(binary Idr, Sub, sub);
op!(inplace Idr, SubAssign, sub_assign);
op!(unary Idr, Neg, neg);

impl Mul<i64> for Idr {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self::Output {
        Self::from(self.value() * rhs)
    }
}

impl Sum for Idr {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Value cannot be represented in rupiah: {0}")]
pub struct IdrConversionError(String);

impl From<i64> for Idr {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl PartialEq for Idr {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Idr {}

impl TryFrom<u64> for Idr {
    type Error = IdrConversionError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value > i64::MAX as u64 {
            Err(IdrConversionError(format!("Value {value} is too large to convert to Idr")))
        } else {
            #[allow(clippy::cast_possible_wrap)]
            Ok(Self(value as i64))
        }
    }
}

impl FromStr for Idr {
    type Err = IdrConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::helpers::parse_idr_input(s).map(Self).map_err(|e| IdrConversionError(e.to_string()))
    }
}

impl Display for Idr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Indonesian convention groups thousands with a dot: Rp 1.500.000
        let negative = self.0 < 0;
        let mut digits = self.0.unsigned_abs().to_string();
        let mut groups = Vec::new();
        while digits.len() > 3 {
            let tail = digits.split_off(digits.len() - 3);
            groups.push(tail);
        }
        groups.push(digits);
        groups.reverse();
        let formatted = groups.join(".");
        if negative {
            write!(f, "-Rp {formatted}")
        } else {
            write!(f, "Rp {formatted}")
        }
    }
}

impl Idr {
    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn formats_with_thousand_separators() {
        assert_eq!(Idr::from(100_000).to_string(), "Rp 100.000");
        assert_eq!(Idr::from(1_500_000).to_string(), "Rp 1.500.000");
        assert_eq!(Idr::from(999).to_string(), "Rp 999");
        assert_eq!(Idr::from(-4000).to_string(), "-Rp 4.000");
    }

    #[test]
    fn arithmetic() {
        let total = Idr::from(100_000) + Idr::from(4_000);
        assert_eq!(total, Idr::from(104_000));
        let mut v = total;
        v -= Idr::from(4_000);
        assert_eq!(v, Idr::from(100_000));
        assert_eq!(-v, Idr::from(-100_000));
        assert_eq!(Idr::from(2_000) * 3, Idr::from(6_000));
        let sum: Idr = [Idr::from(1), Idr::from(2), Idr::from(3)].into_iter().sum();
        assert_eq!(sum, Idr::from(6));
    }
}
