/// Module de l'indicateur d'extraction
///
/// Extrait une composante d'une source de bougies vers une série
/// flottante de largeur 1, prête à alimenter d'autres indicateurs.
use crate::errors::{EngineError, Result};
use crate::growing_array::GrowingArray;
use crate::indicator::{Indicator, IndicatorKind, Upstream};
use crate::pricing::{CandleComponent, SampleKind};
use crate::source::Source;

pub(crate) struct PluckingParams {
    pub source: Source,
    pub component: CandleComponent,
}

impl Indicator {
    /// Extraction d'une composante d'une source de bougies
    pub fn plucking(parent: &Source, component: CandleComponent) -> Result<Indicator> {
        if parent.dtype() != SampleKind::Candle {
            return Err(EngineError::InvalidArgument(
                "a plucking indicator requires a candle-typed source".into(),
            ));
        }
        Indicator::build(
            IndicatorKind::Plucking(PluckingParams { source: parent.clone(), component }),
            vec![Upstream::from(parent)],
        )
    }
}

pub(crate) fn update(
    params: &PluckingParams,
    data: &mut GrowingArray<f64>,
    start: usize,
    end: usize,
) -> Result<()> {
    let plucked: Vec<f64> = params
        .source
        .slice(start, end)?
        .into_iter()
        .map(|sample| sample.as_candle().component(params.component) as f64)
        .collect();
    data.set_slice(start, end, &plucked)
}
