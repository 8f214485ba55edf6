/// Module des intervalles temporels
///
/// Un intervalle est un nombre entier strictement positif de secondes.
/// La table des granularités fixe lesquelles sont admises comme
/// intervalle de source; un digest accepte tout intervalle strictement
/// plus grand et divisible par celui de sa source.
use chrono::{DateTime, Duration, Utc};

use crate::errors::{EngineError, Result};

/// Intervalle en secondes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval(u32);

impl Interval {
    pub const SECOND: Interval = Interval(1);
    pub const SECONDS_5: Interval = Interval(5);
    pub const SECONDS_15: Interval = Interval(15);
    pub const SECONDS_30: Interval = Interval(30);
    pub const MINUTE: Interval = Interval(60);
    pub const MINUTES_5: Interval = Interval(300);
    pub const MINUTES_15: Interval = Interval(900);
    pub const MINUTES_30: Interval = Interval(1800);
    pub const HOUR: Interval = Interval(3600);
    pub const HOURS_4: Interval = Interval(14400);
    pub const DAY: Interval = Interval(86400);
    pub const WEEK: Interval = Interval(604800);

    /// Granularités admises comme intervalle de source
    const SOURCE_TABLE: [Interval; 7] = [
        Interval::SECOND,
        Interval::SECONDS_5,
        Interval::SECONDS_15,
        Interval::MINUTE,
        Interval::MINUTES_5,
        Interval::MINUTES_15,
        Interval::HOUR,
    ];

    /// Construit un intervalle quelconque (non nul) en secondes
    pub fn from_seconds(seconds: u32) -> Result<Interval> {
        if seconds == 0 {
            return Err(EngineError::InvalidArgument(
                "an interval must be a strictly positive number of seconds".into(),
            ));
        }
        Ok(Interval(seconds))
    }

    /// Convertit un timeframe conventionnel ("5m", "1h", "1d", ...) en intervalle
    ///
    /// RETOUR: InvalidArgument pour un libellé inconnu
    pub fn from_timeframe(timeframe: &str) -> Result<Interval> {
        let seconds = match timeframe {
            "1s" => 1,
            "5s" => 5,
            "15s" => 15,
            "30s" => 30,
            "1m" => 60,
            "5m" => 300,
            "15m" => 900,
            "30m" => 1800,
            "1h" => 3600,
            "4h" => 14400,
            "1d" => 86400,
            "1w" => 604800,
            other => {
                return Err(EngineError::InvalidArgument(format!(
                    "unknown timeframe: {other}"
                )));
            }
        };
        Ok(Interval(seconds))
    }

    pub fn seconds(self) -> u32 {
        self.0
    }

    pub fn duration(self) -> Duration {
        Duration::seconds(self.0 as i64)
    }

    /// Indique si cette granularité est admise pour une source
    pub fn allowed_as_source(self) -> bool {
        Self::SOURCE_TABLE.contains(&self)
    }

    /// Indique si cette granularité est admise pour un digest d'une
    /// source à l'intervalle donné: strictement plus grande et divisible
    pub fn allowed_as_digest(self, source_interval: Interval) -> bool {
        self.0 > source_interval.0 && self.0 % source_interval.0 == 0
    }

    /// Aligne un horodatage vers le bas sur cet intervalle
    pub fn round(self, stamp: DateTime<Utc>) -> DateTime<Utc> {
        let seconds = stamp.timestamp();
        let aligned = seconds - seconds.rem_euclid(self.0 as i64);
        stamp - Duration::seconds(seconds - aligned)
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.0;
        if s % 604800 == 0 {
            write!(f, "{}w", s / 604800)
        } else if s % 86400 == 0 {
            write!(f, "{}d", s / 86400)
        } else if s % 3600 == 0 {
            write!(f, "{}h", s / 3600)
        } else if s % 60 == 0 {
            write!(f, "{}m", s / 60)
        } else {
            write!(f, "{}s", s)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn source_table_membership() {
        assert!(Interval::SECOND.allowed_as_source());
        assert!(Interval::MINUTES_5.allowed_as_source());
        assert!(Interval::HOUR.allowed_as_source());
        assert!(!Interval::SECONDS_30.allowed_as_source());
        assert!(!Interval::DAY.allowed_as_source());
    }

    #[test]
    fn digest_must_be_bigger_and_divisible() {
        assert!(Interval::HOUR.allowed_as_digest(Interval::MINUTE));
        assert!(Interval::MINUTES_15.allowed_as_digest(Interval::MINUTES_5));
        assert!(!Interval::MINUTE.allowed_as_digest(Interval::MINUTE));
        assert!(!Interval::MINUTE.allowed_as_digest(Interval::HOUR));
        // 900 n'est pas divisible par 600
        let ten_minutes = Interval::from_seconds(600).unwrap();
        assert!(!Interval::MINUTES_15.allowed_as_digest(ten_minutes));
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(Interval::from_seconds(0).is_err());
    }

    #[test]
    fn timeframe_parsing() {
        assert_eq!(Interval::from_timeframe("5m").unwrap(), Interval::MINUTES_5);
        assert_eq!(Interval::from_timeframe("1h").unwrap(), Interval::HOUR);
        assert!(Interval::from_timeframe("7x").is_err());
    }

    #[test]
    fn round_aligns_downwards() {
        let stamp = Utc.with_ymd_and_hms(2024, 3, 5, 10, 47, 31).unwrap();
        let rounded = Interval::MINUTES_5.round(stamp);
        assert_eq!(rounded, Utc.with_ymd_and_hms(2024, 3, 5, 10, 45, 0).unwrap());
        // Un horodatage déjà aligné est inchangé
        assert_eq!(Interval::MINUTES_5.round(rounded), rounded);
    }

    #[test]
    fn display_uses_timeframe_labels() {
        assert_eq!(Interval::MINUTES_5.to_string(), "5m");
        assert_eq!(Interval::HOUR.to_string(), "1h");
        assert_eq!(Interval::SECONDS_15.to_string(), "15s");
    }
}
