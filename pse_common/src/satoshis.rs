use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, AddAssign, Sub},
};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::op;

pub const BTC_CURRENCY_CODE: &str = "BTC";
pub const SATS_PER_BTC: i64 = 100_000_000;

//--------------------------------------      Satoshis       ---------------------------------------------------------
/// An amount of bitcoin, in satoshis. Stored as a signed 64-bit integer so that it maps directly onto SQLite integers.
#[derive(Debug, Clone, Copy, Default, Type, PartialEq, Eq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct Satoshis(i64);

op!(binary Satoshis, Add, add);
op!(binary Satoshis, Sub, sub);
op!(inplace Satoshis, AddAssign, add_assign);

impl Sum for Satoshis {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Value cannot be represented in satoshis: {0}")]
pub struct SatoshisConversionError(String);

impl From<i64> for Satoshis {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl TryFrom<u64> for Satoshis {
    type Error = SatoshisConversionError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        i64::try_from(value)
            .map(Self)
            .map_err(|_| SatoshisConversionError(format!("{value} is too large to convert to Satoshis")))
    }
}

impl TryFrom<Satoshis> for u64 {
    type Error = SatoshisConversionError;

    fn try_from(value: Satoshis) -> Result<Self, Self::Error> {
        u64::try_from(value.0).map_err(|_| SatoshisConversionError(format!("{} is negative", value.0)))
    }
}

impl Display for Satoshis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let per_btc = SATS_PER_BTC.unsigned_abs();
        write!(f, "{sign}{}.{:08} {BTC_CURRENCY_CODE}", abs / per_btc, abs % per_btc)
    }
}

impl Satoshis {
    pub fn value(&self) -> i64 {
        self.0
    }

    pub const fn from_sats(sats: i64) -> Self {
        Self(sats)
    }

    pub fn from_btc(btc: i64) -> Self {
        Self(btc * SATS_PER_BTC)
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unsigned_conversions() {
        assert_eq!(Satoshis::try_from(1_500_000u64), Ok(Satoshis::from(1_500_000)));
        assert!(Satoshis::try_from(u64::MAX).is_err());
        assert_eq!(u64::try_from(Satoshis::from(7)), Ok(7));
        assert!(u64::try_from(Satoshis::from(-1)).is_err());
    }

    #[test]
    fn display() {
        assert_eq!(Satoshis::from(1_500_000).to_string(), "0.01500000 BTC");
        assert_eq!(Satoshis::from(-1).to_string(), "-0.00000001 BTC");
    }
}
