//! Vector Index Adapter.
//!
//! A flat, brute-force index over an `ndarray::Array2<f32>` embedding
//! matrix, backed by `ndarray`/`ndarray-npy` for on-disk persistence. The
//! on-disk artifact is named `faiss.index` even though this isn't FAISS —
//! the name is kept as a stable on-disk label.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use ndarray::Array2;

/// Sentinel row id meaning "no result".
pub const NO_RESULT: i64 = -1;

/// Flat in-memory vector index. Rows are inner-product-compared against a
/// query row; since every row fed in by the builder is already unit-length
/// (the encoder normalizes), inner product coincides with cosine similarity
/// and "largest score" is "nearest".
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dim: usize,
    rows: Vec<f32>,
    count: usize,
}

impl VectorIndex {
    pub fn new(dim: usize) -> Self {
        VectorIndex { dim, rows: Vec::new(), count: 0 }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Append rows, in order, to the index. Each row must have length `dim`.
    pub fn add(&mut self, new_rows: &[Vec<f32>]) {
        for row in new_rows {
            debug_assert_eq!(row.len(), self.dim, "row dimension mismatch");
            self.rows.extend_from_slice(row);
            self.count += 1;
        }
    }

    /// Nearest `k` rows to `query` by descending inner product. Returns
    /// parallel `(scores, row_ids)`; `row_ids` is padded with `NO_RESULT`
    /// when fewer than `k` rows exist.
    pub fn search(&self, query: &[f32], k: usize) -> (Vec<f32>, Vec<i64>) {
        if self.count == 0 || k == 0 {
            return (vec![0.0; k], vec![NO_RESULT; k]);
        }

        let mut scored: Vec<(usize, f32)> = (0..self.count)
            .map(|i| {
                let row = &self.rows[i * self.dim..(i + 1) * self.dim];
                let score: f32 = row.iter().zip(query.iter()).map(|(a, b)| a * b).sum();
                (i, score)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        let mut scores: Vec<f32> = scored.iter().map(|(_, s)| *s).collect();
        let mut row_ids: Vec<i64> = scored.iter().map(|(i, _)| *i as i64).collect();
        while row_ids.len() < k {
            scores.push(0.0);
            row_ids.push(NO_RESULT);
        }
        (scores, row_ids)
    }

    pub fn to_array2(&self) -> Array2<f32> {
        Array2::from_shape_vec((self.count, self.dim), self.rows.clone())
            .unwrap_or_else(|_| Array2::zeros((0, self.dim)))
    }

    pub fn from_array2(arr: Array2<f32>) -> Self {
        let dim = arr.ncols();
        let count = arr.nrows();
        let rows = arr.into_raw_vec();
        VectorIndex { dim, rows, count }
    }

    /// Persist as a length-prefixed raw `f32` buffer: `[dim: u64][count: u64][rows...]`.
    /// Written via the `*.tmp` + rename pattern.
    pub fn write(&self, path: &Path) -> io::Result<()> {
        let tmp_path = path.with_extension("index.tmp");
        {
            let mut f = fs::File::create(&tmp_path)?;
            f.write_all(&(self.dim as u64).to_le_bytes())?;
            f.write_all(&(self.count as u64).to_le_bytes())?;
            for value in &self.rows {
                f.write_all(&value.to_le_bytes())?;
            }
            f.flush()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    pub fn read(path: &Path) -> io::Result<Self> {
        let mut f = fs::File::open(path)?;
        let mut header = [0u8; 16];
        f.read_exact(&mut header)?;
        let dim = u64::from_le_bytes(header[0..8].try_into().unwrap()) as usize;
        let count = u64::from_le_bytes(header[8..16].try_into().unwrap()) as usize;

        let mut rows = vec![0f32; dim * count];
        let mut buf = vec![0u8; dim * count * 4];
        f.read_exact(&mut buf)?;
        for (i, chunk) in buf.chunks_exact(4).enumerate() {
            rows[i] = f32::from_le_bytes(chunk.try_into().unwrap());
        }

        Ok(VectorIndex { dim, rows, count })
    }
}
