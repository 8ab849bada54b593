//! Immutable observation matrices.

use crate::error::{AvoError, Result};

/// Row-major matrix of observations: one independent sample per row.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    n_rows: usize,
    n_features: usize,
    data: Vec<f64>,
}

impl Batch {
    /// Wrap a flat row-major buffer.
    pub fn new(n_rows: usize, n_features: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != n_rows * n_features {
            return Err(AvoError::shape(
                "batch data",
                &[n_rows * n_features],
                &[data.len()],
            ));
        }
        Ok(Self { n_rows, n_features, data })
    }

    /// Build from rows of equal width.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let n_features = rows.first().map(Vec::len).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * n_features);
        for row in rows {
            if row.len() != n_features {
                return Err(AvoError::shape("batch row", &[n_features], &[row.len()]));
            }
            data.extend_from_slice(row);
        }
        Ok(Self { n_rows: rows.len(), n_features, data })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn shape(&self) -> [usize; 2] {
        [self.n_rows, self.n_features]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n_features..(i + 1) * self.n_features]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        // chunks_exact(0) panics; a zero-width batch has no meaningful rows
        self.data.chunks_exact(self.n_features.max(1))
    }

    /// Stack `self` on top of `other`.
    pub fn vstack(&self, other: &Batch) -> Result<Batch> {
        if self.n_features != other.n_features {
            return Err(AvoError::shape(
                "vstack",
                &[self.n_features],
                &[other.n_features],
            ));
        }
        let mut data = Vec::with_capacity(self.data.len() + other.data.len());
        data.extend_from_slice(&self.data);
        data.extend_from_slice(&other.data);
        Ok(Batch {
            n_rows: self.n_rows + other.n_rows,
            n_features: self.n_features,
            data,
        })
    }

    /// Rows at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Result<Batch> {
        let mut data = Vec::with_capacity(indices.len() * self.n_features);
        for &i in indices {
            if i >= self.n_rows {
                return Err(AvoError::shape("row index", &[self.n_rows], &[i]));
            }
            data.extend_from_slice(self.row(i));
        }
        Ok(Batch {
            n_rows: indices.len(),
            n_features: self.n_features,
            data,
        })
    }

    /// Row-wise convex combination `eps[i] * self[i] + (1 - eps[i]) * other[i]`.
    pub fn interpolate(&self, other: &Batch, eps: &[f64]) -> Result<Batch> {
        if self.shape() != other.shape() {
            return Err(AvoError::shape("interpolate", &self.shape(), &other.shape()));
        }
        if eps.len() != self.n_rows {
            return Err(AvoError::shape("interpolation weights", &[self.n_rows], &[eps.len()]));
        }
        let data = self
            .rows()
            .zip(other.rows())
            .zip(eps)
            .flat_map(|((a, b), &e)| a.iter().zip(b).map(move |(x, y)| e * x + (1.0 - e) * y))
            .collect();
        Ok(Batch {
            n_rows: self.n_rows,
            n_features: self.n_features,
            data,
        })
    }

    /// Per-column mean.
    pub fn column_means(&self) -> Vec<f64> {
        let mut means = vec![0.0; self.n_features];
        if self.n_rows == 0 {
            return means;
        }
        for row in self.rows() {
            for (m, x) in means.iter_mut().zip(row) {
                *m += x;
            }
        }
        let n = self.n_rows as f64;
        means.iter_mut().for_each(|m| *m /= n);
        means
    }
}
