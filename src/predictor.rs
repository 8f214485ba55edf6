/// Module du socle des prédicteurs
///
/// Un prédicteur enveloppe une dépendance de largeur 1 et un algorithme
/// de prédiction décrit par sa taille de queue et son pas. Le socle
/// valide les entrées et entretient le tampon de sortie à cinq
/// colonnes:
/// 0. la prédiction
/// 1. l'erreur structurelle au moment où la prédiction est faite
/// 2. l'erreur structurelle au moment prédit
/// 3. le résidu (valeur observée moins valeur prédite)
/// 4. l'écart type glissant du résidu
///
/// Les algorithmes concrets sont fournis par l'appelant; tant qu'aucun
/// n'écrit, les colonnes restent NaN.
use crate::errors::{EngineError, Result};
use crate::growing_array::GrowingArray;
use crate::indicator::{Indicator, IndicatorKind, SeriesReader, Upstream};
use crate::pricing::CandleComponent;

/// Description d'un algorithme de prédiction
pub trait PredictorAlgorithm {
    /// Nombre d'éléments requis pour produire une prédiction
    fn tail_size(&self) -> usize;

    /// Nombre de pas dans le futur effectivement prédits
    fn step(&self) -> usize;
}

pub(crate) struct PredictorParams {
    /// Conservé pour les algorithmes concrets, qui lisent l'amont
    /// avec la même fenêtre de queue que les autres indicateurs
    #[allow(dead_code)]
    pub reader: SeriesReader,
    pub algorithm: Box<dyn PredictorAlgorithm>,
}

impl PredictorParams {
    pub(crate) const WIDTH: usize = 5;
}

impl Indicator {
    /// Socle d'un prédicteur au-dessus d'une dépendance de largeur 1
    pub fn predictor(
        parent: impl Into<Upstream>,
        algorithm: Box<dyn PredictorAlgorithm>,
        component: Option<CandleComponent>,
    ) -> Result<Indicator> {
        if algorithm.tail_size() < 1 {
            return Err(EngineError::InvalidArgument(
                "a predictor algorithm must declare a tail size of at least 1".into(),
            ));
        }
        if algorithm.step() < 1 {
            return Err(EngineError::InvalidArgument(
                "a predictor algorithm must declare a step of at least 1".into(),
            ));
        }
        let upstream = parent.into();
        let reader = SeriesReader::new(upstream.clone(), component)?;
        Indicator::build(
            IndicatorKind::Predictor(PredictorParams { reader, algorithm }),
            vec![upstream],
        )
    }

    /// La taille de queue de l'algorithme, pour un prédicteur
    pub fn predictor_tail_size(&self) -> Option<usize> {
        match &self.inner.kind {
            IndicatorKind::Predictor(params) => Some(params.algorithm.tail_size()),
            _ => None,
        }
    }

    /// Le pas de prédiction de l'algorithme, pour un prédicteur
    pub fn predictor_step(&self) -> Option<usize> {
        match &self.inner.kind {
            IndicatorKind::Predictor(params) => Some(params.algorithm.step()),
            _ => None,
        }
    }
}

/// Entretient le tampon sur la fenêtre notifiée
///
/// Le socle ne calcule rien: il étend seulement la série au rythme de
/// l'amont, les lignes restant à NaN.
pub(crate) fn update(
    _params: &PredictorParams,
    data: &mut GrowingArray<f64>,
    start: usize,
    end: usize,
) -> Result<()> {
    let blank = vec![f64::NAN; PredictorParams::WIDTH];
    for index in start..end {
        data.set(index, &blank)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intervals::Interval;
    use crate::pricing::SampleKind;
    use crate::source::Source;
    use crate::timelapse::Timelapse;
    use chrono::{TimeZone, Utc};

    struct FixedAlgorithm {
        tail: usize,
        step: usize,
    }

    impl PredictorAlgorithm for FixedAlgorithm {
        fn tail_size(&self) -> usize {
            self.tail
        }

        fn step(&self) -> usize {
            self.step
        }
    }

    fn price_source() -> Source {
        Source::new(
            SampleKind::Price,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Interval::HOUR,
            None,
        )
        .unwrap()
    }

    #[test]
    fn zero_tail_or_step_is_rejected() {
        let source = price_source();
        let bad_tail = Box::new(FixedAlgorithm { tail: 0, step: 1 });
        assert!(Indicator::predictor(&source, bad_tail, None).is_err());
        let bad_step = Box::new(FixedAlgorithm { tail: 4, step: 0 });
        assert!(Indicator::predictor(&source, bad_step, None).is_err());
    }

    #[test]
    fn scaffold_owns_a_five_column_buffer() {
        let source = price_source();
        source.push(vec![10u64, 11, 12], None).unwrap();
        let algorithm = Box::new(FixedAlgorithm { tail: 4, step: 2 });
        let predictor = Indicator::predictor(&source, algorithm, None).unwrap();

        assert_eq!(predictor.width(), 5);
        assert_eq!(predictor.predictor_tail_size(), Some(4));
        assert_eq!(predictor.predictor_step(), Some(2));
        assert_eq!(predictor.len(), 3);
        for index in 0..3 {
            let row = predictor.get(index).unwrap();
            assert_eq!(row.len(), 5);
            assert!(row.iter().all(|value| value.is_nan()));
        }

        source.push(13u64, None).unwrap();
        assert_eq!(predictor.len(), 4);
    }

    #[test]
    fn wide_indicator_parents_are_rejected() {
        let source = price_source();
        source.push(vec![1u64, 2, 3, 4], None).unwrap();
        let mean = Indicator::moving_mean(&source, 2, None, true).unwrap();
        let variance = Indicator::moving_variance(&mean, true, true, true).unwrap();
        let algorithm = Box::new(FixedAlgorithm { tail: 3, step: 1 });
        assert!(Indicator::predictor(&variance, algorithm, None).is_err());
    }
}
