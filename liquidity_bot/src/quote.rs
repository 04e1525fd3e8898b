//! Ladder construction around a reference price.
//!
//! [`compute_ladder`] is pure: the same reference price, parameters and market always yield
//! the same ladder, level for level and digit for digit.

use std::collections::HashMap;

use bigdecimal::{BigDecimal, One, Signed};
use serde::{Deserialize, Serialize};
use vortex_client::Side;

use crate::error::{ConfigError, QuoteError};

const BPS_DENOMINATOR: i64 = 10_000;

/// Largest accepted `level_count`.
pub const MAX_LEVEL_COUNT: i64 = 500;
/// Largest accepted `spread_bps` and `level_spacing_bps` (1000%).
pub const MAX_BPS: i64 = 100_000;

/// Shape of the quote ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderParams {
    /// Distance between the innermost SHORT and LONG level, in basis points of the reference.
    pub spread_bps: i64,
    /// Levels per side.
    pub level_count: i64,
    /// Extra distance added per level further out.
    pub level_spacing_bps: i64,
    pub level_size: BigDecimal,
    /// Inventory bias in `[-1, 1]`. Positive values enlarge SHORT levels and shrink LONG ones.
    #[serde(default)]
    pub skew: BigDecimal,
}

impl LadderParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_LEVEL_COUNT).contains(&self.level_count) {
            return Err(ConfigError::LevelCount {
                got: self.level_count,
                max: MAX_LEVEL_COUNT,
            });
        }
        for (name, got) in [("spread_bps", self.spread_bps), ("level_spacing_bps", self.level_spacing_bps)] {
            if !(0..=MAX_BPS).contains(&got) {
                return Err(ConfigError::BpsRange { name, got, max: MAX_BPS });
            }
        }
        if !self.level_size.is_positive() {
            return Err(ConfigError::LevelSize(self.level_size.clone()));
        }
        if self.skew.abs() > BigDecimal::one() {
            return Err(ConfigError::Skew(self.skew.clone()));
        }
        Ok(())
    }
}

/// Price and size granularity the contract accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSpec {
    pub tick_size: BigDecimal,
    #[serde(default)]
    pub lot_size: Option<BigDecimal>,
}

impl MarketSpec {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.tick_size.is_positive() {
            return Err(ConfigError::NonPositiveStep {
                name: "tick_size",
                value: self.tick_size.clone(),
            });
        }
        if let Some(lot) = &self.lot_size {
            if !lot.is_positive() {
                return Err(ConfigError::NonPositiveStep {
                    name: "lot_size",
                    value: lot.clone(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Level {
    pub side: Side,
    pub price: BigDecimal,
    pub size: BigDecimal,
}

/// Desired resting orders for one cycle, innermost level first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ladder {
    levels: Vec<Level>,
}

impl Ladder {
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn iter(&self) -> impl Iterator<Item = &Level> {
        self.levels.iter()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    fn push_merged(&mut self, level: Level, index: &mut HashMap<(Side, BigDecimal), usize>) {
        let key = (level.side, level.price.clone());
        match index.get(&key) {
            Some(&at) => {
                let merged = &self.levels[at].size + &level.size;
                self.levels[at].size = merged;
            }
            None => {
                index.insert(key, self.levels.len());
                self.levels.push(level);
            }
        }
    }
}

impl FromIterator<Level> for Ladder {
    fn from_iter<T: IntoIterator<Item = Level>>(iter: T) -> Self {
        let mut ladder = Ladder::default();
        let mut index = HashMap::new();
        for level in iter {
            ladder.push_merged(level, &mut index);
        }
        ladder
    }
}

pub fn compute_ladder(
    reference_price: &BigDecimal,
    params: &LadderParams,
    market: &MarketSpec,
) -> Result<Ladder, QuoteError> {
    params.validate()?;
    market.validate()?;
    if !reference_price.is_positive() {
        return Err(QuoteError::InvalidReferencePrice(reference_price.clone()));
    }

    let denominator = BigDecimal::from(BPS_DENOMINATOR);
    let half_spread = BigDecimal::from(params.spread_bps) / BigDecimal::from(2);
    let one = BigDecimal::one();
    let short_size = lot_truncate(&(&params.level_size * (&one + &params.skew)), market);
    let long_size = lot_truncate(&(&params.level_size * (&one - &params.skew)), market);

    let spacing = BigDecimal::from(params.level_spacing_bps);

    let mut levels = Vec::new();
    for i in 0..params.level_count {
        let offset = &half_spread + BigDecimal::from(i) * &spacing;

        if short_size.is_positive() {
            let raw = reference_price * (&denominator + &offset) / &denominator;
            levels.push(Level {
                side: Side::Short,
                price: ceil_to_step(&raw, &market.tick_size),
                size: short_size.clone(),
            });
        }

        if long_size.is_positive() {
            let raw = reference_price * (&denominator - &offset) / &denominator;
            let price = floor_to_step(&raw, &market.tick_size);
            if price.is_positive() {
                levels.push(Level {
                    side: Side::Long,
                    price,
                    size: long_size.clone(),
                });
            }
        }
    }

    Ok(levels.into_iter().collect())
}

fn lot_truncate(size: &BigDecimal, market: &MarketSpec) -> BigDecimal {
    match &market.lot_size {
        Some(lot) => floor_to_step(size, lot),
        None => size.clone(),
    }
}

/// Number of whole `step`s in `value`, rounded toward negative infinity.
pub(crate) fn floor_steps(value: &BigDecimal, step: &BigDecimal) -> BigDecimal {
    let quotient = value / step;
    let truncated = quotient.with_scale(0);
    if quotient.is_negative() && truncated != quotient {
        truncated - BigDecimal::one()
    } else {
        truncated
    }
}

/// Number of `step`s nearest to `value`, halves away from zero.
pub(crate) fn nearest_steps(value: &BigDecimal, step: &BigDecimal) -> BigDecimal {
    let half = BigDecimal::new(5.into(), 1);
    let quotient = value / step;
    if quotient.is_negative() {
        -(floor_steps(&(-quotient + half), &BigDecimal::one()))
    } else {
        floor_steps(&(quotient + half), &BigDecimal::one())
    }
}

pub(crate) fn floor_to_step(value: &BigDecimal, step: &BigDecimal) -> BigDecimal {
    floor_steps(value, step) * step
}

pub(crate) fn ceil_to_step(value: &BigDecimal, step: &BigDecimal) -> BigDecimal {
    let floor = floor_steps(value, step);
    if (&floor * step) == *value {
        floor * step
    } else {
        (floor + BigDecimal::one()) * step
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::Zero;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn params(spread: i64, count: i64, spacing: i64, size: &str) -> LadderParams {
        LadderParams {
            spread_bps: spread,
            level_count: count,
            level_spacing_bps: spacing,
            level_size: dec(size),
            skew: BigDecimal::zero(),
        }
    }

    fn market(tick: &str) -> MarketSpec {
        MarketSpec {
            tick_size: dec(tick),
            lot_size: None,
        }
    }

    #[test]
    fn single_level_around_one_hundred() {
        let ladder = compute_ladder(&dec("100"), &params(20, 1, 0, "5"), &market("0.01")).unwrap();
        let got: Vec<_> = ladder.iter().map(|l| (l.side, l.price.clone())).collect();
        assert_eq!(got, vec![(Side::Short, dec("100.10")), (Side::Long, dec("99.90"))]);
        assert!(ladder.iter().all(|l| l.size == dec("5")));
    }

    #[test]
    fn levels_ordered_by_index_short_first() {
        let ladder = compute_ladder(&dec("100"), &params(20, 3, 10, "1"), &market("0.01")).unwrap();
        let got: Vec<_> = ladder.iter().map(|l| (l.side, l.price.to_string())).collect();
        assert_eq!(
            got,
            vec![
                (Side::Short, "100.10".to_string()),
                (Side::Long, "99.90".to_string()),
                (Side::Short, "100.20".to_string()),
                (Side::Long, "99.80".to_string()),
                (Side::Short, "100.30".to_string()),
                (Side::Long, "99.70".to_string()),
            ]
        );
    }

    #[test]
    fn rounding_never_moves_toward_reference() {
        // 33.333 * 1.001 = 33.366333, 33.333 * 0.999 = 33.299667
        let ladder = compute_ladder(&dec("33.333"), &params(20, 1, 0, "1"), &market("0.01")).unwrap();
        assert_eq!(ladder.levels()[0].price, dec("33.37"));
        assert_eq!(ladder.levels()[1].price, dec("33.29"));
        for level in ladder.iter() {
            match level.side {
                Side::Short => assert!(level.price > dec("33.333")),
                Side::Long => assert!(level.price < dec("33.333")),
            }
        }
    }

    #[test]
    fn identical_inputs_give_byte_identical_ladders() {
        let p = LadderParams {
            skew: dec("0.3"),
            ..params(35, 5, 7, "2.5")
        };
        let m = MarketSpec {
            tick_size: dec("0.005"),
            lot_size: Some(dec("0.1")),
        };
        let a = serde_json::to_vec(&compute_ladder(&dec("1234.5678"), &p, &m).unwrap()).unwrap();
        let b = serde_json::to_vec(&compute_ladder(&dec("1234.5678"), &p, &m).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn skew_biases_sizes_and_truncates_to_lot() {
        let p = LadderParams {
            skew: dec("0.25"),
            ..params(20, 1, 0, "3")
        };
        let m = MarketSpec {
            tick_size: dec("0.01"),
            lot_size: Some(dec("0.5")),
        };
        let ladder = compute_ladder(&dec("100"), &p, &m).unwrap();
        // 3 * 1.25 = 3.75 -> 3.5, 3 * 0.75 = 2.25 -> 2.0
        assert_eq!(ladder.levels()[0].size, dec("3.5"));
        assert_eq!(ladder.levels()[1].size, dec("2"));
    }

    #[test]
    fn full_skew_drops_the_long_side() {
        let p = LadderParams {
            skew: dec("1"),
            ..params(20, 2, 10, "1")
        };
        let ladder = compute_ladder(&dec("100"), &p, &market("0.01")).unwrap();
        assert_eq!(ladder.len(), 2);
        assert!(ladder.iter().all(|l| l.side == Side::Short && l.size == dec("2")));
    }

    #[test]
    fn non_positive_long_prices_are_omitted() {
        // Second level sits 10010 bps below the reference.
        let ladder = compute_ladder(&dec("1"), &params(20, 2, 10_000, "1"), &market("0.01")).unwrap();
        let longs: Vec<_> = ladder.iter().filter(|l| l.side == Side::Long).collect();
        assert_eq!(longs.len(), 1);
        assert_eq!(longs[0].price, dec("0.99"));
    }

    #[test]
    fn duplicate_levels_are_merged() {
        let ladder = compute_ladder(&dec("100"), &params(20, 3, 0, "2"), &market("0.01")).unwrap();
        assert_eq!(ladder.len(), 2);
        assert_eq!(ladder.levels()[0].size, dec("6"));
        assert_eq!(ladder.levels()[1].size, dec("6"));
    }

    #[test]
    fn invalid_parameters_are_config_errors() {
        let m = market("0.01");
        let cases = [
            params(20, 0, 0, "1"),
            params(-1, 1, 0, "1"),
            params(20, 1, -5, "1"),
            params(20, 1, 0, "0"),
            LadderParams {
                skew: dec("1.5"),
                ..params(20, 1, 0, "1")
            },
        ];
        for p in cases {
            assert!(matches!(
                compute_ladder(&dec("100"), &p, &m),
                Err(QuoteError::Config(_))
            ));
        }
        assert!(matches!(
            compute_ladder(&dec("100"), &params(20, 1, 0, "1"), &market("0")),
            Err(QuoteError::Config(ConfigError::NonPositiveStep { .. }))
        ));
    }

    #[test]
    fn oversized_ladders_are_rejected_without_overflow() {
        let m = market("0.01");
        let err = compute_ladder(&dec("100"), &params(20, 3, i64::MAX / 2 + 1, "1"), &m).unwrap_err();
        assert_eq!(
            err,
            QuoteError::Config(ConfigError::BpsRange {
                name: "level_spacing_bps",
                got: i64::MAX / 2 + 1,
                max: MAX_BPS,
            })
        );
        assert!(matches!(
            compute_ladder(&dec("100"), &params(20, i64::MAX, 0, "1"), &m),
            Err(QuoteError::Config(ConfigError::LevelCount { .. }))
        ));
        assert!(matches!(
            compute_ladder(&dec("100"), &params(i64::MAX, 1, 0, "1"), &m),
            Err(QuoteError::Config(ConfigError::BpsRange { name: "spread_bps", .. }))
        ));

        // The widest accepted ladder still builds; its outer LONG levels fall below zero.
        let widest = compute_ladder(&dec("100"), &params(MAX_BPS, MAX_LEVEL_COUNT, MAX_BPS, "1"), &m).unwrap();
        assert_eq!(widest.iter().filter(|l| l.side == Side::Short).count() as i64, MAX_LEVEL_COUNT);
        assert!(widest.iter().all(|l| l.side == Side::Short));
    }

    #[test]
    fn non_positive_reference_price_is_rejected() {
        let err = compute_ladder(&dec("0"), &params(20, 1, 0, "1"), &market("0.01")).unwrap_err();
        assert_eq!(err, QuoteError::InvalidReferencePrice(dec("0")));
    }

    #[test]
    fn step_helpers() {
        assert_eq!(floor_steps(&dec("-0.5"), &dec("1")), dec("-1"));
        assert_eq!(nearest_steps(&dec("100.104"), &dec("0.01")), dec("10010"));
        assert_eq!(nearest_steps(&dec("100.105"), &dec("0.01")), dec("10011"));
        assert_eq!(ceil_to_step(&dec("100.10"), &dec("0.01")), dec("100.1"));
    }
}
