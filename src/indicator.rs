/// Module de base des indicateurs
///
/// ARCHITECTURE:
/// Un indicateur est une série flottante de largeur fixe, calculée de
/// façon incrémentale à partir d'une ou plusieurs dépendances amont
/// (la source racine ou d'autres indicateurs), toutes issues de la
/// même source racine. Chaque dépendance notifie ses fenêtres de mise
/// à jour; l'indicateur les coalise pour ne jamais avancer au-delà de
/// la dépendance la plus lente, recalcule la fenêtre effective, puis
/// rediffuse cette même fenêtre à ses propres dépendants.
///
/// La destruction est explicite: dispose() libère le tampon, se
/// désabonne de l'amont et se propage récursivement aux dépendants.
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use chrono::{DateTime, Utc};

use crate::errors::{EngineError, Result};
use crate::events::{Broadcaster, ListenerId};
use crate::growing_array::GrowingArray;
use crate::intervals::Interval;
use crate::moving::{MovingMeanParams, MovingVarianceParams};
use crate::plucking::PluckingParams;
use crate::predictor::PredictorParams;
use crate::pricing::{CandleComponent, Sample, SampleKind};
use crate::slope::SlopeParams;
use crate::source::Source;
use crate::timelapse::{TimeAxis, Timelapse};

/// Dépendance amont d'un indicateur
///
/// SUBTILITÉ RUST: les deux variantes sont des poignées clonables; les
/// comparer par identité (et non par valeur) permet le dédoublonnage
/// des dépendances et la résolution de la source racine.
#[derive(Clone)]
pub enum Upstream {
    Source(Source),
    Indicator(Indicator),
}

impl From<&Source> for Upstream {
    fn from(source: &Source) -> Self {
        Upstream::Source(source.clone())
    }
}

impl From<Source> for Upstream {
    fn from(source: Source) -> Self {
        Upstream::Source(source)
    }
}

impl From<&Indicator> for Upstream {
    fn from(indicator: &Indicator) -> Self {
        Upstream::Indicator(indicator.clone())
    }
}

impl From<Indicator> for Upstream {
    fn from(indicator: Indicator) -> Self {
        Upstream::Indicator(indicator)
    }
}

impl Upstream {
    /// La source racine dont cette dépendance tire ses données
    pub(crate) fn root_source(&self) -> Source {
        match self {
            Upstream::Source(source) => source.clone(),
            Upstream::Indicator(indicator) => indicator.inner.source.clone(),
        }
    }

    /// Le broadcaster de rafraîchissement auquel s'abonner
    pub(crate) fn on_refresh(&self) -> &Broadcaster<(usize, usize)> {
        match self {
            Upstream::Source(source) => source.on_refresh_indicators(),
            Upstream::Indicator(indicator) => &indicator.inner.on_refresh_indicators,
        }
    }

    /// La longueur courante de la série amont
    pub(crate) fn series_len(&self) -> usize {
        match self {
            Upstream::Source(source) => source.len(),
            Upstream::Indicator(indicator) => indicator.len(),
        }
    }

    fn same_as(&self, other: &Upstream) -> bool {
        match (self, other) {
            (Upstream::Source(a), Upstream::Source(b)) => a.same_as(b),
            (Upstream::Indicator(a), Upstream::Indicator(b)) => Rc::ptr_eq(&a.inner, &b.inner),
            _ => false,
        }
    }
}

/// Lecteur flottant de largeur 1 sur une dépendance amont
///
/// Unifie les trois formes d'amont que les indicateurs à fenêtre
/// savent lire: une source de prix (prix converti en flottant), une
/// source de bougies (composante choisie, End par défaut), ou un
/// indicateur de largeur 1 (colonne 0).
#[derive(Clone)]
pub(crate) struct SeriesReader {
    upstream: Upstream,
    component: Option<CandleComponent>,
}

impl SeriesReader {
    pub(crate) fn new(upstream: Upstream, component: Option<CandleComponent>) -> Result<SeriesReader> {
        let component = match &upstream {
            Upstream::Source(source) => match source.dtype() {
                SampleKind::Candle => Some(component.unwrap_or_default()),
                SampleKind::Price => None,
            },
            Upstream::Indicator(indicator) => {
                if indicator.width() != 1 {
                    return Err(EngineError::InvalidArgument(format!(
                        "an indicator used as a dependency must have width 1 (got {})",
                        indicator.width()
                    )));
                }
                None
            }
        };
        Ok(SeriesReader { upstream, component })
    }

    /// Lit `[start, end)` comme une suite de flottants
    pub(crate) fn read(&self, start: usize, end: usize) -> Result<Vec<f64>> {
        match &self.upstream {
            Upstream::Source(source) => {
                let component = self.component.unwrap_or_default();
                Ok(source
                    .slice(start, end)?
                    .into_iter()
                    .map(|sample| match sample {
                        Sample::Price(price) => price as f64,
                        Sample::Candle(candle) => candle.component(component) as f64,
                    })
                    .collect())
            }
            Upstream::Indicator(indicator) => indicator.slice(start, end),
        }
    }

    /// La valeur initiale de l'amont, si c'est une source qui en a une
    pub(crate) fn initial(&self) -> Option<f64> {
        match &self.upstream {
            Upstream::Source(source) => {
                let component = self.component.unwrap_or_default();
                source.initial().map(|sample| match sample {
                    Sample::Price(price) => price as f64,
                    Sample::Candle(candle) => candle.component(component) as f64,
                })
            }
            Upstream::Indicator(_) => None,
        }
    }
}

/// Position de sortie d'un balayage à fenêtre glissante
///
/// `tail_start` et `tail_end` indexent la tranche rendue par
/// `tail_slice`; `index` est l'indice global de la position produite;
/// `incomplete` signale une fenêtre plus courte que la taille demandée
/// (positions trop proches de l'origine de la série).
pub(crate) struct TailWindow {
    pub tail_start: usize,
    pub tail_end: usize,
    pub incomplete: bool,
    pub index: usize,
}

/// Lit d'un coup la tranche amont couvrant toutes les fenêtres de
/// `[start, end)` pour une taille de queue donnée
pub(crate) fn tail_slice(
    reader: &SeriesReader,
    start: usize,
    end: usize,
    tail_size: usize,
) -> Result<Vec<f64>> {
    reader.read((start + 1).saturating_sub(tail_size), end)
}

/// Itère les fenêtres de queue des positions `[start, end)`
pub(crate) fn tail_iterate(
    slice_len: usize,
    start: usize,
    end: usize,
    tail_size: usize,
) -> impl Iterator<Item = TailWindow> {
    let offset = (slice_len + start).saturating_sub(end);
    (0..end.saturating_sub(start)).map(move |position| {
        let tail_end = position + 1 + offset;
        let (tail_start, incomplete) = if tail_end < tail_size {
            (0, true)
        } else {
            (tail_end - tail_size, false)
        };
        TailWindow { tail_start, tail_end, incomplete, index: start + position }
    })
}

/// Calcul concret porté par un indicateur
pub(crate) enum IndicatorKind {
    Plucking(PluckingParams),
    MovingMean(MovingMeanParams),
    MovingVariance(MovingVarianceParams),
    Slope(SlopeParams),
    Predictor(PredictorParams),
    #[cfg(test)]
    Probe(ProbeParams),
}

/// Sonde de test: journalise les fenêtres effectivement recalculées
#[cfg(test)]
pub(crate) struct ProbeParams {
    pub log: Rc<RefCell<Vec<(usize, usize)>>>,
}

impl IndicatorKind {
    fn width(&self) -> usize {
        match self {
            IndicatorKind::Plucking(_) => 1,
            IndicatorKind::MovingMean(_) => 1,
            IndicatorKind::MovingVariance(params) => params.width(),
            IndicatorKind::Slope(_) => 1,
            IndicatorKind::Predictor(_) => PredictorParams::WIDTH,
            #[cfg(test)]
            IndicatorKind::Probe(_) => 1,
        }
    }
}

/// État par dépendance: l'abonnement et la coalescence des fenêtres
struct DepState {
    upstream: Upstream,
    listener: ListenerId,
    max_requested_start: Cell<usize>,
    max_requested_end: Cell<usize>,
}

pub(crate) struct IndicatorInner {
    source: Source,
    axis: TimeAxis,
    /// None après dispose(): le tampon est rendu immédiatement
    data: RefCell<Option<GrowingArray<f64>>>,
    disposed: Cell<bool>,
    deps: RefCell<Vec<DepState>>,
    on_refresh_indicators: Broadcaster<(usize, usize)>,
    /// Références faibles vers les indicateurs construits sur celui-ci,
    /// pour la cascade de dispose(); l'événement ne possède personne
    dependents: RefCell<Vec<Weak<IndicatorInner>>>,
    pub(crate) kind: IndicatorKind,
}

/// Série dérivée flottante, recalculée incrémentalement
#[derive(Clone)]
pub struct Indicator {
    pub(crate) inner: Rc<IndicatorInner>,
}

impl Indicator {
    /// Assemble un indicateur à partir de son calcul et de ses dépendances
    ///
    /// ALGORITHME:
    /// 1. Dédoublonne les dépendances par identité
    /// 2. Vérifie qu'elles partagent toutes la même source racine
    /// 3. Alloue le tampon flottant (remplissage NaN, largeur du calcul)
    /// 4. S'abonne à chaque dépendance
    /// 5. S'hydrate immédiatement avec les données déjà présentes, une
    ///    dépendance à la fois
    pub(crate) fn build(kind: IndicatorKind, upstreams: Vec<Upstream>) -> Result<Indicator> {
        let mut unique: Vec<Upstream> = Vec::new();
        for upstream in upstreams {
            if !unique.iter().any(|known| known.same_as(&upstream)) {
                unique.push(upstream);
            }
        }
        if unique.is_empty() {
            return Err(EngineError::InvalidArgument(
                "an indicator needs at least one dependency".into(),
            ));
        }
        let root = unique[0].root_source();
        for upstream in &unique[1..] {
            if !upstream.root_source().same_as(&root) {
                return Err(EngineError::InvalidArgument(
                    "all the dependencies of an indicator must share the same root source".into(),
                ));
            }
        }

        let axis = TimeAxis { interval: root.interval(), timestamp: root.timestamp() };
        let inner = Rc::new(IndicatorInner {
            source: root,
            axis,
            data: RefCell::new(Some(GrowingArray::new(f64::NAN, 3600, kind.width())?)),
            disposed: Cell::new(false),
            deps: RefCell::new(Vec::new()),
            on_refresh_indicators: Broadcaster::new("on_refresh_indicators"),
            dependents: RefCell::new(Vec::new()),
            kind,
        });

        for (position, upstream) in unique.into_iter().enumerate() {
            let weak = Rc::downgrade(&inner);
            let listener = upstream.on_refresh().register(Rc::new(move |(start, end)| {
                match weak.upgrade() {
                    Some(indicator) => {
                        IndicatorInner::on_dependency_update(&indicator, position, start, end)
                    }
                    None => Ok(()),
                }
            }));
            if let Upstream::Indicator(parent) = &upstream {
                parent.inner.dependents.borrow_mut().push(Rc::downgrade(&inner));
            }
            inner.deps.borrow_mut().push(DepState {
                upstream,
                listener,
                max_requested_start: Cell::new(0),
                max_requested_end: Cell::new(0),
            });
        }

        let count = inner.deps.borrow().len();
        for position in 0..count {
            let length = inner.deps.borrow()[position].upstream.series_len();
            IndicatorInner::on_dependency_update(&inner, position, 0, length)?;
        }
        Ok(Indicator { inner })
    }

    /// La largeur des lignes de cet indicateur
    pub fn width(&self) -> usize {
        self.inner.kind.width()
    }

    pub fn disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// La source racine de cet indicateur
    pub fn source(&self) -> Source {
        self.inner.source.clone()
    }

    /// Les indicateurs dépendants s'abonnent ici
    pub fn on_refresh_indicators(&self) -> &Broadcaster<(usize, usize)> {
        &self.inner.on_refresh_indicators
    }

    /// Libère cet indicateur et, en cascade, tous ses dépendants
    ///
    /// Idempotent. Le tampon est rendu tout de suite, les abonnements
    /// amont sont retirés, puis chaque dépendant est disposé à son tour.
    pub fn dispose(&self) {
        IndicatorInner::dispose_inner(&self.inner);
    }

    /// Lit une ligne
    pub fn get(&self, index: usize) -> Result<Vec<f64>> {
        let guard = self.inner.data.borrow();
        let data = guard.as_ref().ok_or(EngineError::Disposed)?;
        Ok(data.get(index))
    }

    /// Lit la valeur d'un indicateur de largeur 1
    pub fn value(&self, index: usize) -> Result<f64> {
        if self.width() != 1 {
            return Err(EngineError::InvalidArgument(format!(
                "value() requires a width-1 indicator (got width {})",
                self.width()
            )));
        }
        Ok(self.get(index)?[0])
    }

    /// Lit une tranche de lignes `[start, end)`, aplatie ligne-majeure
    pub fn slice(&self, start: usize, end: usize) -> Result<Vec<f64>> {
        let guard = self.inner.data.borrow();
        let data = guard.as_ref().ok_or(EngineError::Disposed)?;
        data.get_slice(start, end)
    }

    /// Lit la ligne couvrant un horodatage
    pub fn at(&self, stamp: DateTime<Utc>) -> Result<Vec<f64>> {
        self.get(self.index_for(stamp)?)
    }

    /// Construit une sonde de test journalisant ses fenêtres de calcul
    #[cfg(test)]
    pub(crate) fn probe(
        upstreams: Vec<Upstream>,
    ) -> Result<(Indicator, Rc<RefCell<Vec<(usize, usize)>>>)> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let indicator = Indicator::build(
            IndicatorKind::Probe(ProbeParams { log: Rc::clone(&log) }),
            upstreams,
        )?;
        Ok((indicator, log))
    }
}

impl Timelapse for Indicator {
    fn interval(&self) -> Interval {
        self.inner.axis.interval
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.inner.axis.timestamp
    }

    fn len(&self) -> usize {
        self.inner.data.borrow().as_ref().map_or(0, |data| data.len())
    }
}

impl IndicatorInner {
    /// Coalise la fenêtre notifiée par une dépendance puis recalcule
    ///
    /// ALGORITHME:
    /// - max_requested_end[d] retient la borne haute la plus avancée
    ///   déjà signalée par la dépendance d; la borne effective est le
    ///   minimum, sur toutes les dépendances, de ces maxima, encore
    ///   borné par la fenêtre courante
    /// - même construction, symétrique, pour la borne basse
    /// - la fenêtre effective est recalculée puis rediffusée telle
    ///   quelle aux dépendants
    ///
    /// Les dépendances peuvent ainsi notifier dans le désordre: le
    /// calcul ne dépasse jamais la dépendance la plus en retard, et
    /// revisite tout emplacement ancien qu'une dépendance signale.
    fn on_dependency_update(
        inner: &IndicatorInner,
        dep: usize,
        start: usize,
        end: usize,
    ) -> Result<()> {
        if inner.disposed.get() {
            return Ok(());
        }
        let (effective_start, effective_end) = {
            let deps = inner.deps.borrow();
            let state = &deps[dep];

            state.max_requested_end.set(state.max_requested_end.get().max(end));
            let minimum_end = deps
                .iter()
                .map(|other| other.max_requested_end.get())
                .min()
                .unwrap_or(end);
            let effective_end = minimum_end.min(end);

            state.max_requested_start.set(state.max_requested_start.get().max(start));
            let minimum_start = deps
                .iter()
                .map(|other| other.max_requested_start.get())
                .min()
                .unwrap_or(start);
            let effective_start = minimum_start.min(start);

            (effective_start, effective_end)
        };
        inner.update(effective_start, effective_end)?;
        inner.on_refresh_indicators.trigger((effective_start, effective_end))
    }

    /// Recalcule la fenêtre `[start, end)` selon le calcul porté
    ///
    /// Une fenêtre vide est transmise telle quelle: chaque calcul la
    /// traverse sans rien écrire.
    fn update(&self, start: usize, end: usize) -> Result<()> {
        let mut guard = self.data.borrow_mut();
        let Some(data) = guard.as_mut() else {
            return Ok(());
        };
        match &self.kind {
            IndicatorKind::Plucking(params) => crate::plucking::update(params, data, start, end),
            IndicatorKind::MovingMean(params) => crate::moving::update_mean(params, data, start, end),
            IndicatorKind::MovingVariance(params) => {
                crate::moving::update_variance(params, data, start, end)
            }
            IndicatorKind::Slope(params) => crate::slope::update(params, data, start, end),
            IndicatorKind::Predictor(params) => crate::predictor::update(params, data, start, end),
            #[cfg(test)]
            IndicatorKind::Probe(params) => {
                params.log.borrow_mut().push((start, end));
                Ok(())
            }
        }
    }

    fn dispose_inner(inner: &IndicatorInner) {
        if inner.disposed.get() {
            return;
        }
        inner.disposed.set(true);
        *inner.data.borrow_mut() = None;
        for state in inner.deps.borrow().iter() {
            state.upstream.on_refresh().unregister(state.listener);
        }
        inner.deps.borrow_mut().clear();
        let dependents = inner.dependents.borrow_mut().split_off(0);
        for weak in dependents {
            if let Some(child) = weak.upgrade() {
                Self::dispose_inner(&child);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::Sample;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn price_source() -> Source {
        Source::new(SampleKind::Price, t0(), Interval::HOUR, Some(Sample::Price(1))).unwrap()
    }

    #[test]
    fn dependencies_must_share_the_root_source() {
        let a = price_source();
        let b = price_source();
        let result = Indicator::probe(vec![Upstream::from(&a), Upstream::from(&b)]);
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
    }

    #[test]
    fn duplicate_dependencies_are_collapsed() {
        let source = price_source();
        let (probe, log) =
            Indicator::probe(vec![Upstream::from(&source), Upstream::from(&source)]).unwrap();
        // Une seule hydratation, donc un seul abonnement
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(source.on_refresh_indicators().len(), 1);
        drop(probe);
    }

    #[test]
    fn hydration_replays_existing_data() {
        let source = price_source();
        source.push(vec![1u64, 2, 3], None).unwrap();
        let (_probe, log) = Indicator::probe(vec![Upstream::from(&source)]).unwrap();
        assert_eq!(*log.borrow(), vec![(0, 3)]);
    }

    #[test]
    fn coalescing_never_advances_past_the_slowest_dependency() {
        let source = price_source();
        let mean_a = Indicator::moving_mean(&source, 2, None, true).unwrap();
        let mean_b = Indicator::moving_mean(&source, 2, None, true).unwrap();
        let (_probe, log) =
            Indicator::probe(vec![Upstream::from(&mean_a), Upstream::from(&mean_b)]).unwrap();

        source.push(vec![5u64, 6, 7], None).unwrap();
        source.push(vec![8u64, 9], None).unwrap();

        assert_eq!(
            *log.borrow(),
            vec![
                // Hydratation des deux dépendances, encore vides
                (0, 0),
                (0, 0),
                // Premier push: mean_a notifie (0,3) mais mean_b n'a
                // encore rien signalé; puis mean_b notifie et débloque
                (0, 0),
                (0, 3),
                // Second push: mean_a notifie (3,5), bornée par mean_b
                // restée à 3; puis mean_b rattrape
                (0, 3),
                (3, 5),
            ]
        );
    }

    #[test]
    fn reads_after_dispose_fail() {
        let source = price_source();
        source.push(vec![1u64, 2], None).unwrap();
        let (probe, _log) = Indicator::probe(vec![Upstream::from(&source)]).unwrap();
        assert_eq!(probe.len(), 0);

        probe.dispose();
        assert!(probe.disposed());
        assert!(matches!(probe.get(0), Err(EngineError::Disposed)));
        assert!(matches!(probe.slice(0, 1), Err(EngineError::Disposed)));
        // Idempotent
        probe.dispose();
    }

    #[test]
    fn dispose_unsubscribes_from_the_upstream() {
        let source = price_source();
        let (probe, log) = Indicator::probe(vec![Upstream::from(&source)]).unwrap();
        assert_eq!(source.on_refresh_indicators().len(), 1);

        probe.dispose();
        assert_eq!(source.on_refresh_indicators().len(), 0);
        let before = log.borrow().len();
        source.push(1u64, None).unwrap();
        assert_eq!(log.borrow().len(), before);
    }

    #[test]
    fn dispose_cascades_to_dependents() {
        let source = price_source();
        let (parent, _) = Indicator::probe(vec![Upstream::from(&source)]).unwrap();
        let (child_b, _) = Indicator::probe(vec![Upstream::from(&parent)]).unwrap();
        let (child_c, _) = Indicator::probe(vec![Upstream::from(&parent)]).unwrap();

        parent.dispose();
        assert!(child_b.disposed());
        assert!(child_c.disposed());
        assert!(matches!(child_b.get(0), Err(EngineError::Disposed)));
    }

    #[test]
    fn tail_iterate_flags_short_windows() {
        // Positions 0..4 avec une queue de 3, tranche depuis l'origine
        let windows: Vec<TailWindow> = tail_iterate(4, 0, 4, 3).collect();
        let flags: Vec<bool> = windows.iter().map(|w| w.incomplete).collect();
        assert_eq!(flags, vec![true, true, false, false]);
        assert_eq!(windows[2].tail_start, 0);
        assert_eq!(windows[2].tail_end, 3);
        assert_eq!(windows[3].index, 3);
    }

    #[test]
    fn tail_iterate_offsets_into_the_slice() {
        // Mise à jour (start=5, end=7) avec une queue de 3: la tranche
        // couvre [3, 7), soit 4 éléments
        let windows: Vec<TailWindow> = tail_iterate(4, 5, 7, 3).collect();
        assert_eq!(windows.len(), 2);
        assert_eq!((windows[0].tail_start, windows[0].tail_end), (0, 3));
        assert_eq!((windows[1].tail_start, windows[1].tail_end), (1, 4));
        assert!(!windows[0].incomplete);
        assert_eq!(windows[1].index, 6);
    }
}
