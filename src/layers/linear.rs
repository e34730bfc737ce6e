use faer::{linalg::matmul::matmul, prelude::*};
use rand::{Rng, distr::uniform::SampleRange};

use crate::{
    Result,
    core::{BufferArena, LinearId, Port, Storage},
    layers::{Binding, whole_input},
};

/// `y = W x + b`.
#[derive(Debug)]
pub struct Linear {
    params: LinearId,
    n_inputs: usize,
    n_outputs: usize,
    input: Binding,
    output: Binding,
}

impl Linear {
    /// A linear layer with fresh, zeroed parameters.
    pub fn new(storage: &mut Storage, n_inputs: usize, n_outputs: usize) -> Self {
        let params = storage.params.add_linear(n_inputs, n_outputs);
        let input = Binding::alloc(&mut storage.arena, n_inputs);
        Self::with_input(storage, params, input)
    }

    /// A layer over existing parameters reading from `input`, which it does not own.
    pub(crate) fn tied(storage: &mut Storage, params: LinearId, input: Port) -> Self {
        Self::with_input(storage, params, Binding::borrowed(input))
    }

    fn with_input(storage: &mut Storage, params: LinearId, input: Binding) -> Self {
        let linear = storage.params.linear(params);
        let (n_inputs, n_outputs) = (linear.n_inputs(), linear.n_outputs());
        debug_assert_eq!(input.port.len(), n_inputs);
        Self {
            params,
            n_inputs,
            n_outputs,
            input,
            output: Binding::alloc(&mut storage.arena, n_outputs),
        }
    }

    pub fn params(&self) -> LinearId {
        self.params
    }

    pub fn n_inputs(&self) -> usize {
        self.n_inputs
    }

    pub fn n_outputs(&self) -> usize {
        self.n_outputs
    }

    pub fn randomize(&self, storage: &mut Storage, range: impl SampleRange<f64> + Clone) {
        storage.params.linear_mut(self.params).randomize(range);
    }

    pub fn randomize_with(
        &self,
        storage: &mut Storage,
        rng: &mut impl Rng,
        range: impl SampleRange<f64> + Clone,
    ) {
        storage.params.linear_mut(self.params).randomize_with(rng, range);
    }

    pub fn forward(&self, storage: &mut Storage) {
        let Storage { arena, params } = storage;
        let layer_params = params.linear(self.params);
        let x = self.input.port.value;
        arena.with_mut(self.output.port.value, |arena, y| {
            let a_prev = ColRef::from_slice(arena.get(x));
            let mut z = ColMut::from_slice_mut(y);
            // z = W * a_prev;
            matmul(
                z.rb_mut(),
                faer::Accum::Replace,
                layer_params.weights(),
                a_prev,
                1.0,
                Par::Seq,
            );
            // z += b;
            let b = layer_params.bias();
            for k in 0..self.n_outputs {
                z[k] += b[k];
            }
        });
    }

    /// Accumulates into `dW`, `db` and the input gradient.
    ///
    /// Accumulating rather than overwriting the input gradient is what lets overlapping
    /// convolution windows share one input-gradient buffer.
    pub fn backward(&self, storage: &mut Storage) {
        let Storage { arena, params } = storage;
        let (w, mut dw, mut db) = params.linear_mut(self.params).split_for_backward();
        let x = self.input.port.value;
        let dy = self.output.port.grad;
        arena.with_mut(self.input.port.grad, |arena, dx| {
            let x = arena.get(x);
            let dy = arena.get(dy);
            for k in 0..self.n_outputs {
                let dyk = dy[k];
                if dyk == 0.0 {
                    continue;
                }
                db[k] += dyk;
                for g in 0..self.n_inputs {
                    dw[(k, g)] += dyk * x[g];
                    dx[g] += dyk * w[(k, g)];
                }
            }
        });
    }

    pub fn clear_grad(&self, arena: &mut BufferArena) {
        arena.zero(self.input.port.grad);
        arena.zero(self.output.port.grad);
    }

    pub fn input_port(&self, slot: usize) -> Result<Port> {
        whole_input(self.input, slot)
    }

    pub fn output_port(&self) -> Port {
        self.output.port
    }

    pub fn link_output(&mut self, arena: &mut BufferArena, port: Port) -> Result<()> {
        self.output.rebind(arena, port)
    }

    pub fn clone_with_tied_params(&self, storage: &mut Storage) -> Self {
        let input = Binding::alloc(&mut storage.arena, self.n_inputs);
        Self::with_input(storage, self.params, input)
    }

    pub(crate) fn release(self, arena: &mut BufferArena) {
        self.input.release(arena);
        self.output.release(arena);
    }
}
