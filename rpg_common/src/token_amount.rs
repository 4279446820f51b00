use std::{
    borrow::Cow,
    fmt::Display,
    iter::Sum,
    ops::{Add, Neg, Sub, SubAssign},
    str::FromStr,
};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{
    decode::Decode,
    encode::{Encode, IsNull},
    error::BoxDynError,
    sqlite::{Sqlite, SqliteArgumentValue, SqliteTypeInfo, SqliteValueRef},
    Type,
};

use crate::op;

//--------------------------------------     TokenAmount     ---------------------------------------------------------
/// An exact-decimal quantity of a blockchain asset.
///
/// Token amounts never pass through floating point. SQLite has no decimal column type, so the amount is persisted as
/// its canonical string form and parsed back on the way out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenAmount(Decimal);

op!(binary TokenAmount, Add, add);
op!(binary TokenAmount, Sub, sub);
op!(inplace TokenAmount, SubAssign, sub_assign);
op!(unary TokenAmount, Neg, neg);

impl Sum for TokenAmount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

impl From<Decimal> for TokenAmount {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl From<i64> for TokenAmount {
    fn from(value: i64) -> Self {
        Self(Decimal::from(value))
    }
}

impl FromStr for TokenAmount {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s).map(Self)
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl TokenAmount {
    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// The smaller of `self` and `other`.
    pub fn min(self, other: Self) -> Self {
        if self.0 <= other.0 {
            self
        } else {
            other
        }
    }
}

impl Type<Sqlite> for TokenAmount {
    fn type_info() -> SqliteTypeInfo {
        <&str as Type<Sqlite>>::type_info()
    }

    fn compatible(ty: &SqliteTypeInfo) -> bool {
        <&str as Type<Sqlite>>::compatible(ty)
    }
}

impl<'q> Encode<'q, Sqlite> for TokenAmount {
    fn encode_by_ref(&self, buf: &mut Vec<SqliteArgumentValue<'q>>) -> Result<IsNull, BoxDynError> {
        buf.push(SqliteArgumentValue::Text(Cow::Owned(self.0.to_string())));
        Ok(IsNull::No)
    }
}

impl<'r> Decode<'r, Sqlite> for TokenAmount {
    fn decode(value: SqliteValueRef<'r>) -> Result<Self, BoxDynError> {
        let raw = <&str as Decode<Sqlite>>::decode(value)?;
        let amount = Decimal::from_str(raw)?;
        Ok(Self(amount))
    }
}

#[cfg(test)]
mod test {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn exact_arithmetic() {
        let a = TokenAmount::from(dec!(0.009248));
        let b = TokenAmount::from(dec!(0.000752));
        assert_eq!((a + b).value(), dec!(0.01));
        assert_eq!((a - b).value(), dec!(0.008496));
    }

    #[test]
    fn display_normalizes_trailing_zeros() {
        let a = TokenAmount::from(dec!(1.50000));
        assert_eq!(a.to_string(), "1.5");
    }

    #[test]
    fn parses_canonical_string() {
        let a: TokenAmount = "0.000000000000000001".parse().unwrap();
        assert!(!a.is_zero());
        assert_eq!(a.to_string(), "0.000000000000000001");
    }

    #[test]
    fn min_picks_smaller() {
        let a = TokenAmount::from(dec!(2));
        let b = TokenAmount::from(dec!(3));
        assert_eq!(a.min(b), a);
        assert_eq!(b.min(a), a);
    }
}
