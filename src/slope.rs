/// Module de l'indicateur de pente
///
/// La différence nominale entre l'instant courant et le précédent.
/// Les intervalles étant constants, cette différence est la pente du
/// changement de prix.
use crate::errors::Result;
use crate::growing_array::GrowingArray;
use crate::indicator::{Indicator, IndicatorKind, SeriesReader, Upstream, tail_iterate, tail_slice};
use crate::pricing::CandleComponent;

const TAIL_SIZE: usize = 2;

pub(crate) struct SlopeParams {
    pub reader: SeriesReader,
}

impl Indicator {
    /// Pente d'une dépendance de largeur 1
    ///
    /// Pour l'instant 0, la différence se fait avec la valeur initiale
    /// de la source amont; sans valeur initiale, la pente vaut NaN.
    pub fn slope(parent: impl Into<Upstream>, component: Option<CandleComponent>) -> Result<Indicator> {
        let upstream = parent.into();
        let reader = SeriesReader::new(upstream.clone(), component)?;
        Indicator::build(IndicatorKind::Slope(SlopeParams { reader }), vec![upstream])
    }
}

pub(crate) fn update(
    params: &SlopeParams,
    data: &mut GrowingArray<f64>,
    start: usize,
    end: usize,
) -> Result<()> {
    let values = tail_slice(&params.reader, start, end, TAIL_SIZE)?;
    for window in tail_iterate(values.len(), start, end, TAIL_SIZE) {
        let value = if window.incomplete {
            match params.reader.initial() {
                None => f64::NAN,
                Some(initial) => values[window.tail_start] - initial,
            }
        } else {
            values[window.tail_end - 1] - values[window.tail_start]
        };
        data.set(window.index, &[value])?;
    }
    Ok(())
}
