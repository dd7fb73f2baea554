//! Symbol metadata and tick-boundary normalization.

use serde::{Deserialize, Serialize};

use crate::entity::DataId;
use crate::error::CoreError;
use crate::pointer::Pointer;

/// Named sampling frequencies and their period in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frequency {
    /// Minute bars.
    M,
    /// Daily bars.
    D,
}

impl Frequency {
    pub fn period(self) -> i64 {
        match self {
            Frequency::M => 20,
            Frequency::D => 4840,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "M" => Some(Frequency::M),
            "D" => Some(Frequency::D),
            _ => None,
        }
    }
}

/// Axis metadata of one time series, as served by the symbol library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub id: DataId,
    pub axis: String,
    pub offset: String,
    pub freq: String,
}

impl Symbol {
    pub fn new(id: impl Into<DataId>, axis: impl Into<String>, offset: i64, freq: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            axis: axis.into(),
            offset: offset.to_string(),
            freq: freq.into(),
        }
    }

    pub fn offset_value(&self) -> Result<i64, CoreError> {
        self.offset.trim().parse().map_err(|_| CoreError::InvalidSymbol {
            id: self.id.to_string(),
            reason: format!("invalid offset: {:?}", self.offset),
        })
    }

    /// Period in ticks: a named frequency or a positive integer literal.
    pub fn period(&self) -> Result<i64, CoreError> {
        if let Some(freq) = Frequency::parse(self.freq.trim()) {
            return Ok(freq.period());
        }
        match self.freq.trim().parse::<i64>() {
            Ok(p) if p > 0 => Ok(p),
            _ => Err(CoreError::InvalidSymbol {
                id: self.id.to_string(),
                reason: format!("invalid frequency: {:?}", self.freq),
            }),
        }
    }

    pub fn normalize(&self, value: Pointer) -> Result<Pointer, CoreError> {
        normalize_pointer(value, self.period()?, self.offset_value()?)
    }
}

/// Floor `value` to the nearest tick boundary `k * period + offset`,
/// clamped to [`Pointer::ZERO`].
pub fn normalize_pointer(value: Pointer, period: i64, offset: i64) -> Result<Pointer, CoreError> {
    if period <= 0 {
        return Err(CoreError::InvalidPeriod(period));
    }
    if value == Pointer::MAX {
        return Ok(value);
    }
    let shifted = value.0 as i128 - offset as i128;
    let period = period as i128;
    let floored = shifted.div_euclid(period) * period + offset as i128;
    if floored < 0 {
        Ok(Pointer::ZERO)
    } else {
        Ok(Pointer(floored.min(i64::MAX as i128) as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floors_to_period() {
        assert_eq!(normalize_pointer(Pointer(10), 5, 0).unwrap(), Pointer(10));
        assert_eq!(normalize_pointer(Pointer(13), 5, 0).unwrap(), Pointer(10));
        assert_eq!(normalize_pointer(Pointer(13), 5, 2).unwrap(), Pointer(12));
        assert_eq!(normalize_pointer(Pointer(11), 5, 2).unwrap(), Pointer(7));
    }

    #[test]
    fn clamps_negative_to_zero() {
        assert_eq!(normalize_pointer(Pointer(1), 5, 3).unwrap(), Pointer::ZERO);
        assert_eq!(normalize_pointer(Pointer::ZERO, 20, 7).unwrap(), Pointer::ZERO);
    }

    #[test]
    fn max_is_unbounded() {
        assert_eq!(normalize_pointer(Pointer::MAX, 4840, 9).unwrap(), Pointer::MAX);
    }

    #[test]
    fn rejects_non_positive_period() {
        assert_eq!(normalize_pointer(Pointer(1), 0, 0), Err(CoreError::InvalidPeriod(0)));
    }

    #[test]
    fn symbol_frequencies() {
        assert_eq!(Symbol::new("s", "cn", 0, "M").period().unwrap(), 20);
        assert_eq!(Symbol::new("s", "cn", 0, "D").period().unwrap(), 4840);
        assert_eq!(Symbol::new("s", "cn", 0, "5").period().unwrap(), 5);
        assert!(Symbol::new("s", "cn", 0, "W").period().is_err());

        let mut bad = Symbol::new("s", "cn", 0, "M");
        bad.offset = "x".to_string();
        assert!(bad.normalize(Pointer(30)).is_err());
    }

    #[test]
    fn symbol_normalizes_with_offset() {
        let minute = Symbol::new("close_min", "cn", 3, "M");
        assert_eq!(minute.normalize(Pointer(50)).unwrap(), Pointer(43));
    }
}
