/// Module des types de valeurs de marché
///
/// Fournit le prix standardisé (entier non signé) et la bougie OHLC
/// compacte (start, end, min, max), ainsi que le type somme `Sample`
/// qui unifie les deux pour les séries sources
use serde::{Deserialize, Serialize};

/// Prix standardisé: entier non négatif
///
/// Les prix flottants des fournisseurs sont convertis en amont en les
/// multipliant par une puissance de dix fixe, ce qui rend les
/// comparaisons et interpolations exactes.
pub type StandardizedPrice = u64;

/// Bougie compacte sur un intervalle
///
/// INVARIANT: min <= start <= max et min <= end <= max.
/// `merge` et les interpolations composante par composante préservent
/// cet invariant quand les deux opérandes le respectent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candle {
    pub start: StandardizedPrice,
    pub end: StandardizedPrice,
    pub min: StandardizedPrice,
    pub max: StandardizedPrice,
}

impl Candle {
    pub fn new(
        start: StandardizedPrice,
        end: StandardizedPrice,
        min: StandardizedPrice,
        max: StandardizedPrice,
    ) -> Self {
        Candle { start, end, min, max }
    }

    /// Bougie constante: les quatre composantes valent `value`
    pub fn constant(value: StandardizedPrice) -> Self {
        Candle { start: value, end: value, min: value, max: value }
    }

    /// Fusionne deux bougies consécutives d'un même bin
    ///
    /// ALGORITHME:
    /// - start: celui de la première bougie vue
    /// - end: celui de la dernière bougie vue
    /// - min/max: extrêmes courants
    pub fn merge(&self, other: &Candle) -> Candle {
        Candle {
            start: self.start,
            end: other.end,
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Extrait une composante de la bougie
    pub fn component(&self, component: CandleComponent) -> StandardizedPrice {
        match component {
            CandleComponent::Start => self.start,
            CandleComponent::End => self.end,
            CandleComponent::Min => self.min,
            CandleComponent::Max => self.max,
        }
    }

    /// Interpole linéairement entre deux bougies, composante par composante
    ///
    /// `step` est la position (1..=distance) entre `left` (exclu) et
    /// `right` (atteint à step == distance).
    pub(crate) fn lerp(left: &Candle, right: &Candle, step: usize, distance: usize) -> Candle {
        Candle {
            start: lerp_price(left.start, right.start, step, distance),
            end: lerp_price(left.end, right.end, step, distance),
            min: lerp_price(left.min, right.min, step, distance),
            max: lerp_price(left.max, right.max, step, distance),
        }
    }
}

/// Interpolation linéaire entière entre deux prix, tronquée vers zéro
pub(crate) fn lerp_price(
    left: StandardizedPrice,
    right: StandardizedPrice,
    step: usize,
    distance: usize,
) -> StandardizedPrice {
    let delta = right as i128 - left as i128;
    let value = left as i128 + delta * step as i128 / distance as i128;
    value.max(0) as StandardizedPrice
}

/// Composante d'une bougie, sélectionnée à la construction des
/// indicateurs qui lisent des sources de type bougie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CandleComponent {
    Start,
    #[default]
    End,
    Min,
    Max,
}

/// Échantillon d'une série source: prix ou bougie
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sample {
    Price(StandardizedPrice),
    Candle(Candle),
}

impl Sample {
    pub fn kind(&self) -> SampleKind {
        match self {
            Sample::Price(_) => SampleKind::Price,
            Sample::Candle(_) => SampleKind::Candle,
        }
    }

    /// Promotion en bougie: un prix devient une bougie constante
    pub fn as_candle(&self) -> Candle {
        match self {
            Sample::Price(p) => Candle::constant(*p),
            Sample::Candle(c) => *c,
        }
    }
}

/// Type d'échantillon d'une source, fixé à sa construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Price,
    Candle,
}
