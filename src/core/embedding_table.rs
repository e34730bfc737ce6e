use std::collections::HashMap;

use rand::{Rng, distr::uniform::SampleRange, rngs::ThreadRng};

use crate::{Error, Result};

/// A table of `vocab_size` dense vectors of `embedding_length`, with a sparse gradient.
///
/// Only ids seen by a backward pass get a gradient entry; repeated occurrences of an id are summed
/// into the same entry until `clear_grad`.
#[derive(Debug, Clone)]
pub struct EmbeddingTable {
    vocab_size: usize,
    embedding_length: usize,
    rows: Box<[f64]>,
    ada: Box<[f64]>,
    changes: HashMap<usize, Box<[f64]>>,
}

impl EmbeddingTable {
    pub fn new(vocab_size: usize, embedding_length: usize) -> Self {
        assert!(vocab_size != 0 && embedding_length != 0);
        Self {
            vocab_size,
            embedding_length,
            rows: bytemuck::zeroed_slice_box(vocab_size * embedding_length),
            ada: bytemuck::zeroed_slice_box(vocab_size * embedding_length),
            changes: HashMap::new(),
        }
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn embedding_length(&self) -> usize {
        self.embedding_length
    }

    #[track_caller]
    pub fn row(&self, id: usize) -> &[f64] {
        let n = self.embedding_length;
        &self.rows[id * n..(id + 1) * n]
    }

    #[track_caller]
    pub fn row_mut(&mut self, id: usize) -> &mut [f64] {
        let n = self.embedding_length;
        &mut self.rows[id * n..(id + 1) * n]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.rows
    }

    /// Replaces the whole table, one slice per word id.
    pub fn set_embeddings<R: AsRef<[f64]>>(&mut self, embeddings: &[R]) -> Result<()> {
        let shape_error = || Error::EmbeddingShape {
            expected: self.vocab_size,
            length: self.embedding_length,
            found: embeddings.len(),
        };
        if embeddings.len() != self.vocab_size {
            return Err(shape_error());
        }
        if embeddings.iter().any(|row| row.as_ref().len() != self.embedding_length) {
            return Err(shape_error());
        }
        for (id, row) in embeddings.iter().enumerate() {
            self.row_mut(id).copy_from_slice(row.as_ref());
        }
        Ok(())
    }

    pub fn randomize(&mut self, range: impl SampleRange<f64> + Clone) {
        self.randomize_with(&mut ThreadRng::default(), range);
    }

    pub fn randomize_with(&mut self, rng: &mut impl Rng, range: impl SampleRange<f64> + Clone) {
        for p in &mut self.rows[..] {
            *p = rng.random_range(range.clone());
        }
    }

    /// Adds `grad` to the pending gradient of `id`.
    pub(crate) fn accumulate(&mut self, id: usize, grad: &[f64]) {
        let n = self.embedding_length;
        let entry = self
            .changes
            .entry(id)
            .or_insert_with(|| bytemuck::zeroed_slice_box(n));
        for (g, &dg) in entry.iter_mut().zip(grad) {
            *g += dg;
        }
    }

    /// Pending gradient of `id`, if it was seen since the last `clear_grad`.
    pub fn pending_grad(&self, id: usize) -> Option<&[f64]> {
        self.changes.get(&id).map(|g| &g[..])
    }

    /// Number of ids with a pending gradient.
    pub fn n_pending(&self) -> usize {
        self.changes.len()
    }

    /// `row += eta * grad` for every touched row.
    ///
    /// With `normalize`, rows whose L2 norm ends up above 1 are projected back onto the unit
    /// sphere.
    pub fn update(&mut self, eta: f64, normalize: bool) {
        let n = self.embedding_length;
        for (&id, grad) in &self.changes {
            let row = &mut self.rows[id * n..(id + 1) * n];
            for (p, &dp) in row.iter_mut().zip(&grad[..]) {
                *p += eta * dp;
            }
            if normalize {
                project_to_unit_ball(row);
            }
        }
    }

    /// AdaGrad step over a batch of `batch_size` examples.
    pub fn update_ada_grad(&mut self, eta: f64, batch_size: usize, normalize: bool) {
        let n = self.embedding_length;
        let batch = batch_size as f64;
        for (&id, grad) in &self.changes {
            let acc = &mut self.ada[id * n..(id + 1) * n];
            for (a, &dp) in acc.iter_mut().zip(&grad[..]) {
                *a += (dp / batch) * (dp / batch);
            }
            let row = &mut self.rows[id * n..(id + 1) * n];
            for ((p, &dp), &a) in row.iter_mut().zip(&grad[..]).zip(&acc[..]) {
                if a != 0.0 {
                    *p += eta * dp / (batch * a.sqrt());
                }
            }
            if normalize {
                project_to_unit_ball(row);
            }
        }
    }

    /// `row -= lambda * row` over the whole table.
    pub fn regularize(&mut self, lambda: f64) {
        for p in &mut self.rows[..] {
            *p -= lambda * *p;
        }
    }

    pub fn clear_grad(&mut self) {
        self.changes.clear();
    }
}

fn project_to_unit_ball(row: &mut [f64]) {
    let norm = row.iter().map(|p| p * p).sum::<f64>().sqrt();
    if norm > 1.0 {
        for p in row {
            *p /= norm;
        }
    }
}
