/// Module des digests
///
/// ARCHITECTURE:
/// Un digest résume une source en bougies à granularité plus grossière.
/// Il s'abonne au rafraîchissement des digests de sa source et replie
/// chaque ligne source dans le bin entier correspondant: le premier
/// échantillon initialise le bin, les suivants sont fusionnés. Les prix
/// sont promus en bougies constantes. À chaque repli, le digest
/// ré-émet son propre événement vers les sources liées.
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use chrono::{DateTime, Utc};

use crate::errors::{EngineError, Result};
use crate::events::{Broadcaster, ListenerId};
use crate::growing_array::GrowingArray;
use crate::intervals::Interval;
use crate::pricing::Candle;
use crate::source::Source;
use crate::timelapse::{TimeAxis, Timelapse};

pub(crate) struct DigestInner {
    source: Source,
    pub(crate) axis: TimeAxis,
    /// Bins de bougies; None marque un bin jamais alimenté
    pub(crate) data: RefCell<GrowingArray<Option<Candle>>>,
    /// Dernier indice source déjà replié, None tant qu'aucun ne l'est
    last_source_index: Cell<Option<usize>>,
    attached: Cell<bool>,
    listener: Cell<Option<ListenerId>>,
    relative_bin_size: usize,
    on_refresh_linked_sources: Broadcaster<(usize, usize)>,
}

/// Agrégation d'une source en bougies à intervalle plus grossier
#[derive(Clone)]
pub struct Digest {
    pub(crate) inner: Rc<DigestInner>,
}

impl Digest {
    /// Crée un digest attaché à une source
    ///
    /// L'intervalle doit être strictement plus grand que celui de la
    /// source et divisible par lui. L'origine du digest est celle de la
    /// source.
    pub fn new(source: &Source, interval: Interval) -> Result<Digest> {
        if !interval.allowed_as_digest(source.interval()) {
            return Err(EngineError::InvalidArgument(format!(
                "interval {interval} is not allowed as a digest of a {} source",
                source.interval()
            )));
        }
        let relative_bin_size =
            (interval.seconds() / source.interval().seconds()) as usize;
        let inner = Rc::new(DigestInner {
            source: source.clone(),
            axis: TimeAxis { interval, timestamp: source.timestamp() },
            data: RefCell::new(GrowingArray::new(None, 240, 1)?),
            last_source_index: Cell::new(None),
            attached: Cell::new(true),
            listener: Cell::new(None),
            relative_bin_size,
            on_refresh_linked_sources: Broadcaster::new("on_refresh_linked_sources"),
        });
        let weak = Rc::downgrade(&inner);
        let listener = source.on_refresh_digests().register(Rc::new(
            move |(start, end)| match weak.upgrade() {
                Some(digest) => DigestInner::on_refresh(&digest, start, end),
                None => Ok(()),
            },
        ));
        inner.listener.set(Some(listener));
        Ok(Digest { inner })
    }

    /// La source que ce digest résume
    pub fn source(&self) -> Source {
        self.inner.source.clone()
    }

    /// Indique si ce digest suit encore sa source
    pub fn attached(&self) -> bool {
        self.inner.attached.get()
    }

    /// Détache définitivement ce digest de sa source
    ///
    /// Les données déjà repliées restent lisibles mais ne seront plus
    /// jamais mises à jour.
    pub fn detach(&self) {
        if !self.inner.attached.get() {
            return;
        }
        if let Some(listener) = self.inner.listener.take() {
            self.inner.source.on_refresh_digests().unregister(listener);
        }
        self.inner.attached.set(false);
    }

    /// Les sources liées s'abonnent ici pour refléter ce digest
    pub fn on_refresh_linked_sources(&self) -> &Broadcaster<(usize, usize)> {
        &self.inner.on_refresh_linked_sources
    }

    /// Lit un bin; None tant qu'aucun échantillon ne l'a alimenté
    pub fn get(&self, index: usize) -> Option<Candle> {
        self.inner.data.borrow().get(index)[0]
    }

    /// Lit une tranche de bins `[start, end)`
    pub fn slice(&self, start: usize, end: usize) -> Result<Vec<Option<Candle>>> {
        self.inner.data.borrow().get_slice(start, end)
    }

    /// Lit le bin couvrant un horodatage
    pub fn at(&self, stamp: DateTime<Utc>) -> Result<Option<Candle>> {
        Ok(self.get(self.index_for(stamp)?))
    }
}

impl Timelapse for Digest {
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

impl DigestInner {
    /// Replie les lignes source nouvelles jusqu'à `end` (exclu)
    ///
    /// ALGORITHME:
    /// Le repli part toujours du lendemain du dernier indice déjà
    /// replié, jamais du début de la fenêtre notifiée. Cela couvre les
    /// lignes interpolées d'un trou (notifiées seulement via la fenêtre
    /// du lot) et rend les réécritures d'anciennes lignes inertes ici:
    /// chaque ligne source n'est fusionnée qu'une seule fois dans son
    /// bin.
    fn on_refresh(inner: &Rc<DigestInner>, _start: usize, end: usize) -> Result<()> {
        if !inner.attached.get() {
            return Ok(());
        }
        let fold_start = inner.last_source_index.get().map_or(0, |index| index + 1);
        if fold_start >= end {
            return Ok(());
        }
        {
            let mut data = inner.data.borrow_mut();
            for source_index in fold_start..end {
                let bin = source_index / inner.relative_bin_size;
                let incoming = inner.source.get(source_index)?.as_candle();
                let merged = match data.get(bin)[0] {
                    None => incoming,
                    Some(existing) => existing.merge(&incoming),
                };
                data.set(bin, &[Some(merged)])?;
            }
        }
        inner.last_source_index.set(Some(end - 1));
        let bin_start = fold_start / inner.relative_bin_size;
        let bin_end = end.div_ceil(inner.relative_bin_size);
        inner.on_refresh_linked_sources.trigger((bin_start, bin_end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::{Sample, SampleKind};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn candle_source() -> Source {
        Source::new(SampleKind::Candle, t0(), Interval::MINUTE, None).unwrap()
    }

    fn c(start: u64, end: u64, min: u64, max: u64) -> Candle {
        Candle::new(start, end, min, max)
    }

    #[test]
    fn digest_interval_must_be_compatible() {
        let source = candle_source();
        assert!(Digest::new(&source, Interval::MINUTE).is_err());
        assert!(Digest::new(&source, Interval::from_seconds(90).unwrap()).is_err());
        assert!(Digest::new(&source, Interval::MINUTES_5).is_ok());
    }

    #[test]
    fn folds_pairs_of_candles_and_keeps_the_open_bin_current() {
        let source = candle_source();
        let digest = Digest::new(&source, Interval::from_seconds(120).unwrap()).unwrap();

        let c1 = c(10, 12, 9, 13);
        let c2 = c(12, 11, 8, 15);
        let c3 = c(11, 14, 11, 16);
        let c4 = c(14, 13, 12, 17);
        let c5 = c(13, 18, 13, 19);
        source.push(vec![c1, c2, c3, c4, c5], None).unwrap();

        assert_eq!(digest.len(), 3);
        assert_eq!(digest.get(0), Some(c1.merge(&c2)));
        assert_eq!(digest.get(1), Some(c3.merge(&c4)));
        // Le dernier bin est encore ouvert: une seule bougie repliée
        assert_eq!(digest.get(2), Some(c5));

        // Une poussée suivante complète le bin ouvert
        let c6 = c(18, 20, 17, 21);
        source.push(c6, None).unwrap();
        assert_eq!(digest.get(2), Some(c5.merge(&c6)));
    }

    #[test]
    fn prices_are_promoted_to_constant_candles() {
        let source = Source::new(SampleKind::Price, t0(), Interval::MINUTE, None).unwrap();
        let digest = Digest::new(&source, Interval::from_seconds(120).unwrap()).unwrap();
        source.push(vec![10u64, 14], None).unwrap();
        assert_eq!(digest.get(0), Some(c(10, 14, 10, 14)));
    }

    #[test]
    fn interpolated_rows_are_folded_too() {
        let source = Source::new(
            SampleKind::Price,
            t0(),
            Interval::MINUTE,
            Some(Sample::Price(10)),
        )
        .unwrap();
        let digest = Digest::new(&source, Interval::from_seconds(120).unwrap()).unwrap();
        // Emplacements 0..2 interpolés (14, 18, 22), emplacement 3 = 22
        source.push(22u64, Some(3)).unwrap();
        assert_eq!(digest.len(), 2);
        assert_eq!(digest.get(0), Some(c(14, 18, 14, 18)));
        assert_eq!(digest.get(1), Some(c(22, 22, 22, 22)));
    }

    #[test]
    fn replace_pushes_do_not_merge_twice() {
        let source = candle_source();
        let digest = Digest::new(&source, Interval::from_seconds(120).unwrap()).unwrap();
        let c1 = c(10, 12, 9, 13);
        let c2 = c(12, 11, 8, 15);
        source.push(vec![c1, c2], None).unwrap();
        let folded = digest.get(0);

        // Réécriture d'une ligne déjà repliée: le digest l'ignore
        source.push(c(50, 50, 50, 50), Some(0)).unwrap();
        assert_eq!(digest.get(0), folded);
    }

    #[test]
    fn detach_is_terminal() {
        let source = candle_source();
        let digest = Digest::new(&source, Interval::from_seconds(120).unwrap()).unwrap();
        source.push(c(10, 12, 9, 13), None).unwrap();
        assert!(digest.attached());

        digest.detach();
        assert!(!digest.attached());
        digest.detach();

        source.push(c(20, 22, 19, 23), None).unwrap();
        assert_eq!(digest.len(), 1);
        assert_eq!(digest.get(0), Some(c(10, 12, 9, 13)));
    }

    #[test]
    fn bin_ranges_are_broadcast_to_linked_sources() {
        let source = candle_source();
        let digest = Digest::new(&source, Interval::from_seconds(180).unwrap()).unwrap();
        let windows = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&windows);
        digest.on_refresh_linked_sources().register(Rc::new(move |window| {
            seen.borrow_mut().push(window);
            Ok(())
        }));

        source.push(vec![c(1, 1, 1, 1); 4], None).unwrap();
        source.push(c(2, 2, 2, 2), None).unwrap();
        assert_eq!(*windows.borrow(), vec![(0, 2), (1, 2)]);
    }

    #[test]
    fn timestamp_reads_use_the_digest_scale() {
        let source = candle_source();
        let digest = Digest::new(&source, Interval::MINUTES_5).unwrap();
        source.push(vec![c(1, 1, 1, 1); 7], None).unwrap();
        let stamp = digest.stamp_for(1);
        assert_eq!(digest.at(stamp).unwrap(), digest.get(1));
        assert_eq!(digest.len(), 2);
    }
}
