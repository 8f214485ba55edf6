/// Module des indicateurs mobiles: moyenne et variance
///
/// La moyenne mobile sert rarement seule: elle alimente la variance
/// mobile et, au travers d'elle, les indicateurs d'enveloppe. Les deux
/// partagent le même balayage de fenêtre de queue sur l'amont.
use crate::errors::{EngineError, Result};
use crate::growing_array::GrowingArray;
use crate::indicator::{Indicator, IndicatorKind, SeriesReader, Upstream, tail_iterate, tail_slice};
use crate::pricing::CandleComponent;

/// Paramètres d'une moyenne mobile
pub(crate) struct MovingMeanParams {
    pub reader: SeriesReader,
    pub tail_size: usize,
    pub nan_on_short_tail: bool,
}

/// Paramètres d'une variance mobile
///
/// `mean_reader` lit la moyenne déjà calculée; `values_reader` relit
/// les valeurs amont de la moyenne, avec la même fenêtre de queue.
pub(crate) struct MovingVarianceParams {
    pub mean_reader: SeriesReader,
    pub values_reader: SeriesReader,
    pub tail_size: usize,
    pub use_var: bool,
    pub use_stderr: bool,
    pub unbiased: bool,
}

impl MovingVarianceParams {
    pub(crate) fn width(&self) -> usize {
        if self.use_var && self.use_stderr { 2 } else { 1 }
    }
}

impl Indicator {
    /// Moyenne mobile de queue `tail_size` sur une dépendance de largeur 1
    ///
    /// PARAMÈTRES:
    /// - parent: source de prix, source de bougies (avec `component`,
    ///   End par défaut) ou indicateur de largeur 1
    /// - tail_size: taille de fenêtre, au moins 2
    /// - nan_on_short_tail: écrire NaN tant que la fenêtre est
    ///   incomplète, plutôt qu'une moyenne partielle divisée par la
    ///   taille pleine
    pub fn moving_mean(
        parent: impl Into<Upstream>,
        tail_size: usize,
        component: Option<CandleComponent>,
        nan_on_short_tail: bool,
    ) -> Result<Indicator> {
        if tail_size < 2 {
            return Err(EngineError::InvalidArgument(format!(
                "the tail size of a moving mean must be at least 2 (got {tail_size})"
            )));
        }
        let upstream = parent.into();
        let reader = SeriesReader::new(upstream.clone(), component)?;
        Indicator::build(
            IndicatorKind::MovingMean(MovingMeanParams { reader, tail_size, nan_on_short_tail }),
            vec![upstream],
        )
    }

    /// Variance et/ou écart type mobiles au-dessus d'une moyenne mobile
    ///
    /// La dépendance doit être une moyenne mobile: sa taille de queue
    /// et son amont sont repris tels quels. Les colonnes émises suivent
    /// l'ordre [variance, écart type], selon les drapeaux actifs; au
    /// moins un des deux est requis.
    pub fn moving_variance(
        mean: &Indicator,
        var: bool,
        stderr: bool,
        unbiased: bool,
    ) -> Result<Indicator> {
        if !(var || stderr) {
            return Err(EngineError::InvalidArgument(
                "at least one of the var or stderr flags must be set".into(),
            ));
        }
        let (tail_size, values_reader) = match &mean.inner.kind {
            IndicatorKind::MovingMean(params) => (params.tail_size, params.reader.clone()),
            _ => {
                return Err(EngineError::InvalidArgument(
                    "a moving variance can only be built on top of a moving mean".into(),
                ));
            }
        };
        let upstream = Upstream::from(mean);
        let mean_reader = SeriesReader::new(upstream.clone(), None)?;
        Indicator::build(
            IndicatorKind::MovingVariance(MovingVarianceParams {
                mean_reader,
                values_reader,
                tail_size,
                use_var: var,
                use_stderr: stderr,
                unbiased,
            }),
            vec![upstream],
        )
    }
}

/// Recalcule la fenêtre `[start, end)` d'une moyenne mobile
pub(crate) fn update_mean(
    params: &MovingMeanParams,
    data: &mut GrowingArray<f64>,
    start: usize,
    end: usize,
) -> Result<()> {
    let values = tail_slice(&params.reader, start, end, params.tail_size)?;
    for window in tail_iterate(values.len(), start, end, params.tail_size) {
        let value = if window.incomplete && params.nan_on_short_tail {
            f64::NAN
        } else {
            values[window.tail_start..window.tail_end].iter().sum::<f64>()
                / params.tail_size as f64
        };
        data.set(window.index, &[value])?;
    }
    Ok(())
}

/// Recalcule la fenêtre `[start, end)` d'une variance mobile
///
/// Pour chaque position, avec mu la moyenne mobile à cette position et
/// x les valeurs de sa fenêtre: v = somme((x - mu)^2) / (T - 1) en mode
/// non biaisé, / T sinon. Une moyenne NaN (fenêtre incomplète) propage
/// NaN dans toutes les colonnes.
pub(crate) fn update_variance(
    params: &MovingVarianceParams,
    data: &mut GrowingArray<f64>,
    start: usize,
    end: usize,
) -> Result<()> {
    let means = params.mean_reader.read(start, end)?;
    let values = tail_slice(&params.values_reader, start, end, params.tail_size)?;
    let divisor = if params.unbiased { params.tail_size - 1 } else { params.tail_size } as f64;
    for window in tail_iterate(values.len(), start, end, params.tail_size) {
        let mean = means[window.index - start];
        let variance = values[window.tail_start..window.tail_end]
            .iter()
            .map(|value| (value - mean).powi(2))
            .sum::<f64>()
            / divisor;
        let mut row = Vec::with_capacity(2);
        if params.use_var {
            row.push(variance);
        }
        if params.use_stderr {
            row.push(variance.sqrt());
        }
        data.set(window.index, &row)?;
    }
    Ok(())
}
