use std::iter;

use derive_more::Display;
use faer::prelude::*;
use rand::{Rng, distr::uniform::SampleRange, rngs::ThreadRng};

use crate::{PrettyPrintLinear, core::EmbeddingTable};

/// Handle of a canonical [`LinearParams`] owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("linear#{_0}")]
pub struct LinearId(pub(crate) usize);

/// Handle of a canonical [`EmbeddingTable`] owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("table#{_0}")]
pub struct TableId(pub(crate) usize);

/// Any canonical parameter owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ParamId {
    Linear(LinearId),
    Table(TableId),
}

/// Weights, bias, their gradients and AdaGrad accumulators of one linear map.
///
/// All three buffers share one layout: `W` in column-major order (`n_outputs` rows, `n_inputs`
/// columns), followed by `b`.
#[derive(Debug, Clone)]
pub struct LinearParams {
    n_inputs: usize,
    n_outputs: usize,
    values: Box<[f64]>,
    derivs: Box<[f64]>,
    ada: Box<[f64]>,
}

impl LinearParams {
    pub fn new(n_inputs: usize, n_outputs: usize) -> Self {
        assert!(n_inputs != 0 && n_outputs != 0);
        let n_floats = n_inputs * n_outputs + n_outputs;
        Self {
            n_inputs,
            n_outputs,
            values: bytemuck::zeroed_slice_box(n_floats),
            derivs: bytemuck::zeroed_slice_box(n_floats),
            ada: bytemuck::zeroed_slice_box(n_floats),
        }
    }

    pub fn n_inputs(&self) -> usize {
        self.n_inputs
    }

    pub fn n_outputs(&self) -> usize {
        self.n_outputs
    }

    fn w_len(&self) -> usize {
        self.n_inputs * self.n_outputs
    }

    pub fn weights(&self) -> MatRef<'_, f64> {
        MatRef::from_column_major_slice(&self.values[..self.w_len()], self.n_outputs, self.n_inputs)
    }

    pub fn weights_mut(&mut self) -> MatMut<'_, f64> {
        let w_len = self.w_len();
        MatMut::from_column_major_slice_mut(&mut self.values[..w_len], self.n_outputs, self.n_inputs)
    }

    pub fn bias(&self) -> ColRef<'_, f64> {
        ColRef::from_slice(&self.values[self.w_len()..])
    }

    pub fn bias_mut(&mut self) -> ColMut<'_, f64> {
        let w_len = self.w_len();
        ColMut::from_slice_mut(&mut self.values[w_len..])
    }

    /// Short for `dI/dW`, accumulated over every backward pass since the last `clear_grad`.
    pub fn weight_grads(&self) -> MatRef<'_, f64> {
        MatRef::from_column_major_slice(&self.derivs[..self.w_len()], self.n_outputs, self.n_inputs)
    }

    pub fn bias_grads(&self) -> ColRef<'_, f64> {
        ColRef::from_slice(&self.derivs[self.w_len()..])
    }

    /// Gradient views for the backward pass: `(dW, db)` next to a read-only `W`.
    pub(crate) fn split_for_backward(&mut self) -> (MatRef<'_, f64>, MatMut<'_, f64>, ColMut<'_, f64>) {
        let w_len = self.w_len();
        let (n_outputs, n_inputs) = (self.n_outputs, self.n_inputs);
        let w = MatRef::from_column_major_slice(&self.values[..w_len], n_outputs, n_inputs);
        let (dw, db) = self.derivs.split_at_mut(w_len);
        let dw = MatMut::from_column_major_slice_mut(dw, n_outputs, n_inputs);
        (w, dw, ColMut::from_slice_mut(db))
    }

    /// Direct access to the underlying buffer.
    /// Useful for dumping/loading params from file.
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// Direct access to the underlying buffer.
    /// Useful for dumping/loading params from file.
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn randomize(&mut self, range: impl SampleRange<f64> + Clone) {
        self.randomize_with(&mut ThreadRng::default(), range);
    }

    pub fn randomize_with(&mut self, rng: &mut impl Rng, range: impl SampleRange<f64> + Clone) {
        for p in self.as_mut_slice() {
            *p = rng.random_range(range.clone());
        }
    }

    /// `p += eta * dp` for every weight and bias.
    ///
    /// The objective is maximized, hence the addition.
    pub fn update(&mut self, eta: f64) {
        for (p, dp) in iter::zip(&mut self.values[..], &self.derivs[..]) {
            *p += eta * (*dp);
        }
    }

    /// AdaGrad step over a batch of `batch_size` examples.
    pub fn update_ada_grad(&mut self, eta: f64, batch_size: usize) {
        let n = batch_size as f64;
        for ((p, dp), acc) in iter::zip(iter::zip(&mut self.values[..], &self.derivs[..]), &mut self.ada[..]) {
            *acc += (dp / n) * (dp / n);
            if *acc != 0.0 {
                *p += eta * dp / (n * acc.sqrt());
            }
        }
    }

    /// Zero all the `dW` and `db`s.
    pub fn clear_grad(&mut self) {
        bytemuck::fill_zeroes(&mut self.derivs[..]);
    }

    pub fn pretty_print(&self) -> PrettyPrintLinear<'_> {
        PrettyPrintLinear::new(self)
    }
}

/// Storage of every canonical parameter owner of a network.
///
/// Layers only ever hold handles into this store, which is what ties the parameters of cloned
/// layers together.
#[derive(Debug, Default)]
pub struct ParamStore {
    linears: Vec<LinearParams>,
    tables: Vec<EmbeddingTable>,
}

impl ParamStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_linear(&mut self, n_inputs: usize, n_outputs: usize) -> LinearId {
        self.linears.push(LinearParams::new(n_inputs, n_outputs));
        LinearId(self.linears.len() - 1)
    }

    pub fn add_table(&mut self, vocab_size: usize, embedding_length: usize) -> TableId {
        self.tables.push(EmbeddingTable::new(vocab_size, embedding_length));
        TableId(self.tables.len() - 1)
    }

    pub fn linear(&self, id: LinearId) -> &LinearParams {
        &self.linears[id.0]
    }

    pub fn linear_mut(&mut self, id: LinearId) -> &mut LinearParams {
        &mut self.linears[id.0]
    }

    pub fn table(&self, id: TableId) -> &EmbeddingTable {
        &self.tables[id.0]
    }

    pub fn table_mut(&mut self, id: TableId) -> &mut EmbeddingTable {
        &mut self.tables[id.0]
    }

    pub fn n_linears(&self) -> usize {
        self.linears.len()
    }

    pub fn n_tables(&self) -> usize {
        self.tables.len()
    }

    pub fn update(&mut self, id: ParamId, eta: f64) {
        match id {
            ParamId::Linear(id) => self.linear_mut(id).update(eta),
            ParamId::Table(id) => self.table_mut(id).update(eta, false),
        }
    }

    pub fn update_ada_grad(&mut self, id: ParamId, eta: f64, batch_size: usize) {
        match id {
            ParamId::Linear(id) => self.linear_mut(id).update_ada_grad(eta, batch_size),
            ParamId::Table(id) => self.table_mut(id).update_ada_grad(eta, batch_size, false),
        }
    }

    pub fn clear_grad(&mut self, id: ParamId) {
        match id {
            ParamId::Linear(id) => self.linear_mut(id).clear_grad(),
            ParamId::Table(id) => self.table_mut(id).clear_grad(),
        }
    }
}
