//! Biweek parity relative to a configured base date.

use chrono::NaiveDate;
use plugdeck_core::HostConfig;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Parity {
    Even,
    Odd,
}

/// Base date and inversion flag. Without a base date parity is undefined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Biweek {
    pub base: Option<NaiveDate>,
    pub invert: bool,
}

impl Biweek {
    pub fn new(base: Option<NaiveDate>, invert: bool) -> Self {
        Self { base, invert }
    }

    pub fn from_config(config: &HostConfig) -> Self {
        Self::new(config.biweek_base_date, config.biweek_invert)
    }

    /// `floor(days_since_base / 7) % 2`, 0 being even.
    pub fn parity(&self, date: NaiveDate) -> Option<Parity> {
        let base = self.base?;
        let days = (date - base).num_days();
        let even = days.div_euclid(7).rem_euclid(2) == 0;
        Some(if even != self.invert { Parity::Even } else { Parity::Odd })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parity_weeks() {
        let biweek = Biweek::new(Some(date(2024, 9, 2)), false);
        assert_eq!(biweek.parity(date(2024, 9, 2)), Some(Parity::Even));
        assert_eq!(biweek.parity(date(2024, 9, 8)), Some(Parity::Even));
        assert_eq!(biweek.parity(date(2024, 9, 9)), Some(Parity::Odd));
        assert_eq!(biweek.parity(date(2024, 9, 16)), Some(Parity::Even));
        // The week before the base date is odd.
        assert_eq!(biweek.parity(date(2024, 8, 30)), Some(Parity::Odd));
    }

    #[test]
    fn test_parity_inverted_and_undefined() {
        let inverted = Biweek::new(Some(date(2024, 9, 2)), true);
        assert_eq!(inverted.parity(date(2024, 9, 3)), Some(Parity::Odd));
        assert_eq!(Biweek::default().parity(date(2024, 9, 3)), None);
    }

    #[test]
    fn test_parity_from_str() {
        assert_eq!("ODD".parse::<Parity>().unwrap(), Parity::Odd);
        assert!("weekly".parse::<Parity>().is_err());
    }
}
