/// Module des séries sources
///
/// ARCHITECTURE:
/// Une source est le point d'entrée des échantillons: une série de prix
/// ou de bougies à intervalle fixe, ancrée sur un horodatage d'origine.
/// Les trous entre le dernier indice écrit et un indice poussé plus
/// loin sont comblés par interpolation linéaire. Chaque poussée
/// rafraîchit d'abord les digests abonnés, puis les indicateurs.
///
/// Une source peut aussi être liée à un digest pour refléter sa sortie
/// dans ses propres données, tout en restant une source à part entière.
use std::cell::RefCell;
use std::rc::Rc;

use chrono::{DateTime, Utc};

use crate::digest::{Digest, DigestInner};
use crate::errors::{EngineError, Result};
use crate::events::{Broadcaster, ListenerId};
use crate::growing_array::GrowingArray;
use crate::intervals::Interval;
use crate::pricing::{Candle, Sample, SampleKind, StandardizedPrice, lerp_price};
use crate::timelapse::{TimeAxis, Timelapse};

/// Données à pousser dans une source: scalaire ou lot, prix ou bougies
#[derive(Debug, Clone)]
pub enum PushData {
    Price(StandardizedPrice),
    Prices(Vec<StandardizedPrice>),
    Candle(Candle),
    Candles(Vec<Candle>),
}

impl From<StandardizedPrice> for PushData {
    fn from(value: StandardizedPrice) -> Self {
        PushData::Price(value)
    }
}

impl From<Vec<StandardizedPrice>> for PushData {
    fn from(values: Vec<StandardizedPrice>) -> Self {
        PushData::Prices(values)
    }
}

impl From<Candle> for PushData {
    fn from(value: Candle) -> Self {
        PushData::Candle(value)
    }
}

impl From<Vec<Candle>> for PushData {
    fn from(values: Vec<Candle>) -> Self {
        PushData::Candles(values)
    }
}

/// Stockage typé d'une source, fixé par son dtype
pub(crate) enum SeriesData {
    Prices(GrowingArray<StandardizedPrice>),
    Candles(GrowingArray<Candle>),
}

impl SeriesData {
    pub(crate) fn len(&self) -> usize {
        match self {
            SeriesData::Prices(array) => array.len(),
            SeriesData::Candles(array) => array.len(),
        }
    }

    pub(crate) fn get_sample(&self, index: usize) -> Sample {
        match self {
            SeriesData::Prices(array) => Sample::Price(array.get(index)[0]),
            SeriesData::Candles(array) => Sample::Candle(array.get(index)[0]),
        }
    }

    pub(crate) fn samples(&self, start: usize, end: usize) -> Result<Vec<Sample>> {
        match self {
            SeriesData::Prices(array) => {
                Ok(array.get_slice(start, end)?.into_iter().map(Sample::Price).collect())
            }
            SeriesData::Candles(array) => {
                Ok(array.get_slice(start, end)?.into_iter().map(Sample::Candle).collect())
            }
        }
    }
}

/// Abonnement courant d'une source liée à un digest
struct LinkState {
    digest: Digest,
    listener: ListenerId,
}

pub(crate) struct SourceInner {
    dtype: SampleKind,
    axis: TimeAxis,
    initial: Option<Sample>,
    data: RefCell<SeriesData>,
    on_refresh_digests: Broadcaster<(usize, usize)>,
    on_refresh_indicators: Broadcaster<(usize, usize)>,
    link: RefCell<Option<LinkState>>,
}

/// Série source de prix ou de bougies
///
/// SUBTILITÉ RUST: Source est une poignée clonable (Rc interne).
/// Digests et indicateurs gardent des références faibles vers
/// l'intérieur; cloner la poignée ne duplique jamais les données.
#[derive(Clone)]
pub struct Source {
    pub(crate) inner: Rc<SourceInner>,
}

impl Source {
    /// Crée une source
    ///
    /// PARAMÈTRES:
    /// - dtype: prix standardisé ou bougie
    /// - stamp: horodatage de l'indice 0
    /// - interval: granularité, à prendre dans la table des sources
    /// - initial: valeur héritée de la période précédente; obligatoire
    ///   pour interpoler un trou au tout début de la série
    pub fn new(
        dtype: SampleKind,
        stamp: DateTime<Utc>,
        interval: Interval,
        initial: Option<Sample>,
    ) -> Result<Source> {
        if !interval.allowed_as_source() {
            return Err(EngineError::InvalidArgument(format!(
                "interval {interval} is not allowed as a source interval"
            )));
        }
        if let Some(value) = &initial {
            if value.kind() != dtype {
                return Err(EngineError::InvalidArgument(
                    "the initial value does not match the source dtype".into(),
                ));
            }
        }
        let data = match dtype {
            SampleKind::Price => SeriesData::Prices(GrowingArray::new(0, 3600, 1)?),
            SampleKind::Candle => SeriesData::Candles(GrowingArray::new(Candle::constant(0), 3600, 1)?),
        };
        Ok(Source {
            inner: Rc::new(SourceInner {
                dtype,
                axis: TimeAxis { interval, timestamp: stamp },
                initial,
                data: RefCell::new(data),
                on_refresh_digests: Broadcaster::new("on_refresh_digests"),
                on_refresh_indicators: Broadcaster::new("on_refresh_indicators"),
                link: RefCell::new(None),
            }),
        })
    }

    pub fn dtype(&self) -> SampleKind {
        self.inner.dtype
    }

    pub fn initial(&self) -> Option<Sample> {
        self.inner.initial
    }

    /// Les digests s'abonnent ici pour se rafraîchir à chaque poussée
    pub fn on_refresh_digests(&self) -> &Broadcaster<(usize, usize)> {
        &self.inner.on_refresh_digests
    }

    /// Les indicateurs s'abonnent ici pour se rafraîchir à chaque poussée
    pub fn on_refresh_indicators(&self) -> &Broadcaster<(usize, usize)> {
        &self.inner.on_refresh_indicators
    }

    /// Compare deux poignées par identité
    pub(crate) fn same_as(&self, other: &Source) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Lit un échantillon
    pub fn get(&self, index: usize) -> Result<Sample> {
        Ok(self.inner.data.borrow().get_sample(index))
    }

    /// Lit une tranche d'échantillons `[start, end)`
    pub fn slice(&self, start: usize, end: usize) -> Result<Vec<Sample>> {
        self.inner.data.borrow().samples(start, end)
    }

    /// Lit l'échantillon couvrant un horodatage
    pub fn at(&self, stamp: DateTime<Utc>) -> Result<Sample> {
        self.get(self.index_for(stamp)?)
    }

    /// Pousse des données à l'indice donné (par défaut: la fin)
    ///
    /// ALGORITHME:
    /// 1. Valide le lot (non vide, dtype conforme)
    /// 2. Si l'indice dépasse la longueur, comble le trou par
    ///    interpolation linéaire entière entre la dernière valeur (ou
    ///    la valeur initiale) et le premier élément poussé
    /// 3. Écrit le lot
    /// 4. Déclenche on_refresh_digests puis on_refresh_indicators sur
    ///    la fenêtre [indice, indice + taille du lot)
    ///
    /// Pousser sur un indice déjà peuplé est permis mais coûteux: la
    /// fenêtre est réécrite telle quelle, sans ré-interpolation des
    /// voisins, et re-notifiée à tout le graphe aval.
    pub fn push(&self, data: impl Into<PushData>, index: Option<usize>) -> Result<()> {
        SourceInner::push_internal(&self.inner, data.into(), index)
    }

    /// Lie cette source à un digest pour refléter sa sortie
    ///
    /// Lier remplace toute liaison précédente. Le digest doit avoir un
    /// intervalle au moins égal et une origine au moins aussi tardive
    /// que ceux de cette source; sinon IntervalMismatch. La liaison
    /// déclenche immédiatement un rattrapage de tout le contenu du
    /// digest.
    pub fn link(&self, digest: &Digest) -> Result<()> {
        self.unlink();
        if digest.interval() < self.interval() {
            return Err(EngineError::IntervalMismatch(format!(
                "cannot link to a digest with a smaller interval ({} < {})",
                digest.interval(),
                self.interval()
            )));
        }
        if digest.timestamp() < self.timestamp() {
            return Err(EngineError::IntervalMismatch(format!(
                "cannot link to a digest whose origin {} is before this source's origin {}",
                digest.timestamp(),
                self.timestamp()
            )));
        }
        let weak_source = Rc::downgrade(&self.inner);
        let weak_digest = Rc::downgrade(&digest.inner);
        let listener = digest.on_refresh_linked_sources().register(Rc::new(
            move |(start, end)| match (weak_source.upgrade(), weak_digest.upgrade()) {
                (Some(source), Some(digest)) => {
                    SourceInner::on_linked_refresh(&source, &digest, start, end)
                }
                _ => Ok(()),
            },
        ));
        *self.inner.link.borrow_mut() = Some(LinkState { digest: digest.clone(), listener });
        // Rattrapage immédiat de tout le contenu déjà produit
        let backfill =
            SourceInner::on_linked_refresh(&self.inner, &digest.inner, 0, digest.len());
        if backfill.is_err() {
            self.unlink();
        }
        backfill
    }

    /// Détache cette source de son digest lié, si elle en a un
    pub fn unlink(&self) {
        if let Some(state) = self.inner.link.borrow_mut().take() {
            state.digest.on_refresh_linked_sources().unregister(state.listener);
        }
    }

    /// Le digest actuellement lié, s'il y en a un
    pub fn linked_to(&self) -> Option<Digest> {
        self.inner.link.borrow().as_ref().map(|state| state.digest.clone())
    }
}

impl Timelapse for Source {
    fn interval(&self) -> Interval {
        self.inner.axis.interval
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.inner.axis.timestamp
    }

    fn len(&self) -> usize {
        self.inner.data.borrow().len()
    }
}

impl SourceInner {
    fn push_internal(inner: &Rc<SourceInner>, data: PushData, index: Option<usize>) -> Result<()> {
        let length = inner.data.borrow().len();
        let index = index.unwrap_or(length);
        let count;
        {
            let mut series = inner.data.borrow_mut();
            match (&mut *series, data) {
                (SeriesData::Prices(array), PushData::Price(value)) => {
                    count = 1;
                    Self::fill_price_gap(array, inner.initial, length, index, value)?;
                    array.set(index, &[value])?;
                }
                (SeriesData::Prices(array), PushData::Prices(values)) => {
                    count = Self::checked_len(values.len())?;
                    Self::fill_price_gap(array, inner.initial, length, index, values[0])?;
                    array.set_slice(index, index + count, &values)?;
                }
                (SeriesData::Candles(array), PushData::Candle(value)) => {
                    count = 1;
                    Self::fill_candle_gap(array, inner.initial, length, index, &value)?;
                    array.set(index, &[value])?;
                }
                (SeriesData::Candles(array), PushData::Candles(values)) => {
                    count = Self::checked_len(values.len())?;
                    Self::fill_candle_gap(array, inner.initial, length, index, &values[0])?;
                    array.set_slice(index, index + count, &values)?;
                }
                _ => {
                    return Err(EngineError::InvalidArgument(
                        "pushed data does not match the source dtype".into(),
                    ));
                }
            }
        }
        inner.on_refresh_digests.trigger((index, index + count))?;
        inner.on_refresh_indicators.trigger((index, index + count))?;
        Ok(())
    }

    fn checked_len(count: usize) -> Result<usize> {
        if count == 0 {
            return Err(EngineError::InvalidArgument(
                "cannot push an empty batch".into(),
            ));
        }
        Ok(count)
    }

    /// Comble `[length, index)` pour une série de prix
    ///
    /// La rampe est entière et tronquée: la pente exacte est
    /// (droite - gauche) / (index - length) et le dernier emplacement
    /// comblé atteint la valeur de droite.
    fn fill_price_gap(
        array: &mut GrowingArray<StandardizedPrice>,
        initial: Option<Sample>,
        length: usize,
        index: usize,
        right: StandardizedPrice,
    ) -> Result<()> {
        if index <= length {
            return Ok(());
        }
        let left = if length == 0 {
            match initial {
                Some(Sample::Price(value)) => value,
                Some(_) => {
                    return Err(EngineError::InvalidArgument(
                        "the initial value does not match the source dtype".into(),
                    ));
                }
                None => return Err(EngineError::Uninitialized),
            }
        } else {
            array.get(length - 1)[0]
        };
        let distance = index - length;
        for step in 0..distance {
            array.set(length + step, &[lerp_price(left, right, step + 1, distance)])?;
        }
        Ok(())
    }

    /// Comble `[length, index)` pour une série de bougies, composante
    /// par composante
    fn fill_candle_gap(
        array: &mut GrowingArray<Candle>,
        initial: Option<Sample>,
        length: usize,
        index: usize,
        right: &Candle,
    ) -> Result<()> {
        if index <= length {
            return Ok(());
        }
        let left = if length == 0 {
            match initial {
                Some(Sample::Candle(value)) => value,
                Some(_) => {
                    return Err(EngineError::InvalidArgument(
                        "the initial value does not match the source dtype".into(),
                    ));
                }
                None => return Err(EngineError::Uninitialized),
            }
        } else {
            array.get(length - 1)[0]
        };
        let distance = index - length;
        for step in 0..distance {
            array.set(length + step, &[Candle::lerp(&left, right, step + 1, distance)])?;
        }
        Ok(())
    }

    /// Reflète une mise à jour `[start, end)` du digest lié
    ///
    /// Les bornes sont en coordonnées du digest; l'écriture se fait à
    /// base + start où base est l'indice, dans cette source, de
    /// l'origine du digest. Un trou éventuel entre l'origine de la
    /// source et celle du digest est comblé par l'interpolation usuelle.
    fn on_linked_refresh(
        source: &Rc<SourceInner>,
        digest: &Rc<DigestInner>,
        start: usize,
        end: usize,
    ) -> Result<()> {
        if start >= end {
            return Ok(());
        }
        let base_index = source.axis.index_for(digest.axis.timestamp)?;
        let candles: Vec<Candle> = digest
            .data
            .borrow()
            .get_slice(start, end)?
            .into_iter()
            .map_while(|bin| bin)
            .collect();
        if candles.is_empty() {
            return Ok(());
        }
        Self::push_internal(source, PushData::Candles(candles), Some(base_index + start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::cell::RefCell;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn price_source(initial: Option<u64>) -> Source {
        Source::new(
            SampleKind::Price,
            t0(),
            Interval::HOUR,
            initial.map(Sample::Price),
        )
        .unwrap()
    }

    fn prices(source: &Source, start: usize, end: usize) -> Vec<u64> {
        source
            .slice(start, end)
            .unwrap()
            .into_iter()
            .map(|sample| match sample {
                Sample::Price(value) => value,
                Sample::Candle(_) => unreachable!(),
            })
            .collect()
    }

    #[test]
    fn interval_must_be_in_the_source_table() {
        let result = Source::new(SampleKind::Price, t0(), Interval::DAY, None);
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
    }

    #[test]
    fn initial_value_must_match_dtype() {
        let result = Source::new(
            SampleKind::Price,
            t0(),
            Interval::HOUR,
            Some(Sample::Candle(Candle::constant(1))),
        );
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
    }

    #[test]
    fn push_appends_at_the_end_by_default() {
        let source = price_source(None);
        source.push(vec![5u64, 6, 7], None).unwrap();
        source.push(8u64, None).unwrap();
        assert_eq!(source.len(), 4);
        assert_eq!(prices(&source, 0, 4), vec![5, 6, 7, 8]);
    }

    #[test]
    fn push_across_a_gap_interpolates_from_the_initial_value() {
        // Rampe entière de 1 vers 2 sur les emplacements 0..4, puis le
        // lot poussé aux emplacements 4..11
        let source = price_source(Some(1));
        source.push(vec![2u64, 4, 6, 8, 10, 12, 14], Some(4)).unwrap();
        assert_eq!(prices(&source, 0, 4), vec![1, 1, 1, 2]);
        assert_eq!(prices(&source, 4, 11), vec![2, 4, 6, 8, 10, 12, 14]);
        assert_eq!(source.len(), 11);

        source.push(vec![16u64, 18, 20, 22], None).unwrap();
        assert_eq!(source.len(), 15);
        assert_eq!(prices(&source, 11, 15), vec![16, 18, 20, 22]);
    }

    #[test]
    fn push_across_a_gap_interpolates_from_the_last_value() {
        let source = price_source(None);
        source.push(vec![10u64, 10], None).unwrap();
        source.push(22u64, Some(5)).unwrap();
        // Rampe de 10 vers 22 sur les emplacements 2..5
        assert_eq!(prices(&source, 0, 6), vec![10, 10, 14, 18, 22, 22]);
    }

    #[test]
    fn gap_without_initial_value_fails_and_writes_nothing() {
        let source = price_source(None);
        let result = source.push(9u64, Some(3));
        assert!(matches!(result, Err(EngineError::Uninitialized)));
        assert_eq!(source.len(), 0);
    }

    #[test]
    fn candle_gaps_interpolate_componentwise() {
        let left = Candle::new(10, 12, 9, 13);
        let right = Candle::new(20, 22, 19, 23);
        let source = Source::new(
            SampleKind::Candle,
            t0(),
            Interval::HOUR,
            Some(Sample::Candle(left)),
        )
        .unwrap();
        source.push(right, Some(2)).unwrap();
        assert_eq!(
            source.get(0).unwrap(),
            Sample::Candle(Candle::new(15, 17, 14, 18))
        );
        assert_eq!(source.get(1).unwrap(), Sample::Candle(right));
        assert_eq!(source.get(2).unwrap(), Sample::Candle(right));
    }

    #[test]
    fn pushed_data_must_match_dtype() {
        let source = price_source(None);
        let result = source.push(Candle::constant(3), None);
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
        let result = source.push(PushData::Prices(Vec::new()), None);
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
    }

    #[test]
    fn replace_push_overwrites_without_reinterpolation() {
        let source = price_source(None);
        source.push(vec![1u64, 2, 3, 4], None).unwrap();
        source.push(9u64, Some(1)).unwrap();
        assert_eq!(prices(&source, 0, 4), vec![1, 9, 3, 4]);
        assert_eq!(source.len(), 4);
    }

    #[test]
    fn digest_listeners_fire_before_indicator_listeners() {
        let source = price_source(None);
        let log = Rc::new(RefCell::new(Vec::new()));

        let digest_log = Rc::clone(&log);
        source.on_refresh_digests().register(Rc::new(move |(start, end)| {
            digest_log.borrow_mut().push(("digests", start, end));
            Ok(())
        }));
        let indicator_log = Rc::clone(&log);
        source.on_refresh_indicators().register(Rc::new(move |(start, end)| {
            indicator_log.borrow_mut().push(("indicators", start, end));
            Ok(())
        }));

        source.push(vec![1u64, 2, 3], None).unwrap();
        assert_eq!(
            *log.borrow(),
            vec![("digests", 0, 3), ("indicators", 0, 3)]
        );
    }

    #[test]
    fn refresh_window_covers_only_the_pushed_batch() {
        let source = price_source(Some(1));
        let windows = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&windows);
        source.on_refresh_indicators().register(Rc::new(move |window| {
            seen.borrow_mut().push(window);
            Ok(())
        }));

        source.push(vec![2u64, 3], Some(4)).unwrap();
        assert_eq!(*windows.borrow(), vec![(4, 6)]);
    }

    #[test]
    fn timestamp_reads_resolve_through_the_axis() {
        let source = price_source(None);
        source.push(vec![5u64, 6, 7], None).unwrap();
        let stamp = source.stamp_for(2);
        assert_eq!(source.at(stamp).unwrap(), Sample::Price(7));
        assert!(source.at(t0() - chrono::Duration::seconds(1)).is_err());
    }
}
