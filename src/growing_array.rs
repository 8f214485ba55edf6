/// Module du tableau extensible par chunks
///
/// ARCHITECTURE:
/// Un `GrowingArray` est un tampon 2-D (lignes x largeur) qui grandit à
/// l'écriture et ne rétrécit jamais. Le stockage est découpé en chunks
/// contigus de taille identique, alloués à la demande et initialisés à
/// la valeur de remplissage. Toutes les séries du moteur (sources,
/// digests, indicateurs) reposent dessus.
use crate::errors::{EngineError, Result};

/// Segment d'une tranche couvrant un chunk
///
/// `data_*` indexe la tranche demandée (en lignes, relative au début de
/// la tranche), `chunk_*` indexe l'intérieur du chunk `chunk`.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct SliceRun {
    pub data_start: usize,
    pub data_end: usize,
    pub chunk: usize,
    pub chunk_start: usize,
    pub chunk_end: usize,
}

/// Itérateur des segments d'une tranche `[slice_start, slice_stop)`
///
/// ALGORITHME:
/// - start_chunk = slice_start / chunk_size, stop_chunk = slice_stop / chunk_size
/// - Si les deux tombent dans le même chunk, un seul segment aux offsets
///   modulo chunk_size
/// - Sinon, premier segment borné en bas par slice_start % chunk_size,
///   segments intermédiaires pleins, dernier segment borné en haut par
///   slice_stop % chunk_size; si cette borne vaut 0 le dernier segment
///   serait vide et n'est pas produit
pub(crate) struct ChunkedSlices {
    chunk_size: usize,
    stop_chunk: usize,
    chunk_stop_index: usize,
    current_chunk: usize,
    current_lbound: usize,
    data_index: usize,
    finished: bool,
}

pub(crate) fn chunked_slicing(
    slice_start: usize,
    slice_stop: usize,
    chunk_size: usize,
) -> ChunkedSlices {
    ChunkedSlices {
        chunk_size,
        stop_chunk: slice_stop / chunk_size,
        chunk_stop_index: slice_stop % chunk_size,
        current_chunk: slice_start / chunk_size,
        current_lbound: slice_start % chunk_size,
        data_index: 0,
        finished: slice_start >= slice_stop,
    }
}

impl Iterator for ChunkedSlices {
    type Item = SliceRun;

    fn next(&mut self) -> Option<SliceRun> {
        if self.finished {
            return None;
        }
        let ubound = if self.current_chunk == self.stop_chunk {
            if self.chunk_stop_index == 0 {
                self.finished = true;
                return None;
            }
            self.chunk_stop_index
        } else {
            self.chunk_size
        };
        let lbound = self.current_lbound;
        let length = ubound - lbound;
        let run = SliceRun {
            data_start: self.data_index,
            data_end: self.data_index + length,
            chunk: self.current_chunk,
            chunk_start: lbound,
            chunk_end: ubound,
        };
        if self.current_chunk == self.stop_chunk {
            self.finished = true;
        } else {
            self.current_chunk += 1;
            self.current_lbound = 0;
            self.data_index += length;
        }
        Some(run)
    }
}

/// Tampon 2-D extensible
///
/// Les lectures au-delà de la longueur logique rendent la valeur de
/// remplissage; seules les écritures font grandir la longueur.
/// Les indices négatifs et les pas différents de 1 n'existent pas dans
/// cette interface.
pub struct GrowingArray<T: Copy> {
    fill: T,
    chunk_size: usize,
    width: usize,
    chunks: Vec<Vec<T>>,
    logical_len: usize,
}

impl<T: Copy> GrowingArray<T> {
    /// Crée un tableau vide
    ///
    /// RETOUR: InvalidArgument si chunk_size < 60 ou width < 1
    pub fn new(fill: T, chunk_size: usize, width: usize) -> Result<Self> {
        if chunk_size < 60 {
            return Err(EngineError::InvalidArgument(format!(
                "chunk size cannot be lower than 60 (got {chunk_size})"
            )));
        }
        if width < 1 {
            return Err(EngineError::InvalidArgument(
                "width cannot be lower than 1".into(),
            ));
        }
        Ok(GrowingArray {
            fill,
            chunk_size,
            width,
            chunks: Vec::new(),
            logical_len: 0,
        })
    }

    /// Longueur logique (nombre de lignes écrites ou couvertes)
    pub fn len(&self) -> usize {
        self.logical_len
    }

    pub fn is_empty(&self) -> bool {
        self.logical_len == 0
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn allocated_rows(&self) -> usize {
        self.chunks.len() * self.chunk_size
    }

    /// Lit une ligne
    ///
    /// Au-delà des chunks alloués, la ligne rendue est entièrement à la
    /// valeur de remplissage.
    pub fn get(&self, index: usize) -> Vec<T> {
        let mut row = vec![self.fill; self.width];
        if index < self.allocated_rows() {
            let chunk = &self.chunks[index / self.chunk_size];
            let offset = (index % self.chunk_size) * self.width;
            row.copy_from_slice(&chunk[offset..offset + self.width]);
        }
        row
    }

    /// Lit une tranche de lignes `[start, stop)`, aplatie ligne-majeure
    pub fn get_slice(&self, start: usize, stop: usize) -> Result<Vec<T>> {
        if stop < start {
            return Err(EngineError::InvalidArgument(format!(
                "slice start {start} is beyond stop {stop}"
            )));
        }
        let mut out = vec![self.fill; (stop - start) * self.width];
        let readable = stop.min(self.allocated_rows());
        if start < readable {
            for run in chunked_slicing(start, readable, self.chunk_size) {
                let chunk = &self.chunks[run.chunk];
                out[run.data_start * self.width..run.data_end * self.width].copy_from_slice(
                    &chunk[run.chunk_start * self.width..run.chunk_end * self.width],
                );
            }
        }
        Ok(out)
    }

    /// Écrit une ligne
    pub fn set(&mut self, index: usize, row: &[T]) -> Result<()> {
        self.set_slice(index, index + 1, row)
    }

    /// Écrit une tranche de lignes `[start, stop)`
    ///
    /// `rows` est aplatie ligne-majeure et doit compter exactement
    /// (stop - start) * width éléments. Les chunks manquants sont
    /// alloués; la longueur logique ne fait que croître.
    pub fn set_slice(&mut self, start: usize, stop: usize, rows: &[T]) -> Result<()> {
        if stop < start {
            return Err(EngineError::InvalidArgument(format!(
                "slice start {start} is beyond stop {stop}"
            )));
        }
        if rows.len() != (stop - start) * self.width {
            return Err(EngineError::InvalidArgument(format!(
                "expected {} values for rows [{start}, {stop}) of width {}, got {}",
                (stop - start) * self.width,
                self.width,
                rows.len()
            )));
        }
        if start == stop {
            return Ok(());
        }
        self.allocate(stop);
        for run in chunked_slicing(start, stop, self.chunk_size) {
            let chunk = &mut self.chunks[run.chunk];
            chunk[run.chunk_start * self.width..run.chunk_end * self.width]
                .copy_from_slice(&rows[run.data_start * self.width..run.data_end * self.width]);
        }
        self.logical_len = self.logical_len.max(stop);
        Ok(())
    }

    /// Alloue les chunks nécessaires pour couvrir l'indice `stop`
    fn allocate(&mut self, stop: usize) {
        while self.allocated_rows() < stop {
            self.chunks.push(vec![self.fill; self.chunk_size * self.width]);
        }
    }
}
