/// Module de l'axe temporel des séries
///
/// Toute série du moteur (source, digest, indicateur) est un timelapse:
/// un intervalle fixe et un horodatage d'origine qui correspond à
/// l'indice 0. La conversion indice <-> horodatage est partagée ici.
use chrono::{DateTime, Utc};

use crate::errors::{EngineError, Result};
use crate::intervals::Interval;

/// État temporel embarqué par chaque série
#[derive(Debug, Clone, Copy)]
pub(crate) struct TimeAxis {
    pub interval: Interval,
    pub timestamp: DateTime<Utc>,
}

impl TimeAxis {
    pub fn stamp_for(&self, index: usize) -> DateTime<Utc> {
        self.timestamp + self.interval.duration() * index as i32
    }

    /// Convertit un horodatage en indice, par troncature vers le bas
    ///
    /// RETOUR: OutOfRange pour un horodatage antérieur à l'origine
    pub fn index_for(&self, stamp: DateTime<Utc>) -> Result<usize> {
        let delta = (stamp - self.timestamp).num_seconds();
        if delta < 0 {
            return Err(EngineError::OutOfRange(format!(
                "stamp {stamp} is before the series origin {}",
                self.timestamp
            )));
        }
        Ok((delta / self.interval.seconds() as i64) as usize)
    }
}

/// Vue temporelle commune aux sources, digests et indicateurs
pub trait Timelapse {
    /// L'intervalle entre deux indices consécutifs
    fn interval(&self) -> Interval;

    /// L'horodatage de l'indice 0
    fn timestamp(&self) -> DateTime<Utc>;

    /// Le nombre d'indices couverts par des écritures
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// L'horodatage correspondant à un indice
    fn stamp_for(&self, index: usize) -> DateTime<Utc> {
        TimeAxis { interval: self.interval(), timestamp: self.timestamp() }.stamp_for(index)
    }

    /// L'indice correspondant à un horodatage (troncature vers le bas)
    fn index_for(&self, stamp: DateTime<Utc>) -> Result<usize> {
        TimeAxis { interval: self.interval(), timestamp: self.timestamp() }.index_for(stamp)
    }
}
