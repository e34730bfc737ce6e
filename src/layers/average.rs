use crate::{
    Error, Result,
    core::{BufferArena, Port, Storage},
    layers::Binding,
};

/// Mean of `K` consecutive segments of length `M`: `y[i] = (1/K) Σ_k x[k*M + i]`.
///
/// Each segment is a separate input slot, so `K` upstream layers can feed one average.
#[derive(Debug)]
pub struct Average {
    n_inputs: usize,
    n_outputs: usize,
    input: Binding,
    output: Binding,
}

impl Average {
    pub fn new(storage: &mut Storage, n_inputs: usize, n_outputs: usize) -> Result<Self> {
        if n_outputs == 0 || n_inputs == 0 || n_inputs % n_outputs != 0 {
            return Err(Error::InvalidShape(format!(
                "average input length {n_inputs} is not a positive multiple of output length {n_outputs}"
            )));
        }
        Ok(Self {
            n_inputs,
            n_outputs,
            input: Binding::alloc(&mut storage.arena, n_inputs),
            output: Binding::alloc(&mut storage.arena, n_outputs),
        })
    }

    /// Number of averaged segments, `K`.
    pub fn n_slots(&self) -> usize {
        self.n_inputs / self.n_outputs
    }

    pub fn n_inputs(&self) -> usize {
        self.n_inputs
    }

    pub fn n_outputs(&self) -> usize {
        self.n_outputs
    }

    pub fn forward(&self, storage: &mut Storage) {
        let x = self.input.port.value;
        let (m, k) = (self.n_outputs, self.n_slots());
        storage.arena.with_mut(self.output.port.value, |arena, y| {
            let x = arena.get(x);
            bytemuck::fill_zeroes(y);
            for segment in x.chunks_exact(m) {
                for (yi, xi) in y.iter_mut().zip(segment) {
                    *yi += xi;
                }
            }
            for yi in y.iter_mut() {
                *yi /= k as f64;
            }
        });
    }

    pub fn backward(&self, storage: &mut Storage) {
        let dy = self.output.port.grad;
        let (m, k) = (self.n_outputs, self.n_slots());
        storage.arena.with_mut(self.input.port.grad, |arena, dx| {
            let dy = arena.get(dy);
            for segment in dx.chunks_exact_mut(m) {
                for (dxi, dyi) in segment.iter_mut().zip(dy) {
                    *dxi = dyi / k as f64;
                }
            }
        });
    }

    pub fn clear_grad(&self, arena: &mut BufferArena) {
        arena.zero(self.input.port.grad);
        arena.zero(self.output.port.grad);
    }

    /// Segment `slot` of the input, `[slot*M, (slot+1)*M)`.
    pub fn input_port(&self, slot: usize) -> Result<Port> {
        let n_slots = self.n_slots();
        if slot >= n_slots {
            return Err(Error::InvalidSlot { slot, n_slots });
        }
        Ok(self.input.port.sub(slot * self.n_outputs, self.n_outputs))
    }

    pub fn output_port(&self) -> Port {
        self.output.port
    }

    pub fn link_output(&mut self, arena: &mut BufferArena, port: Port) -> Result<()> {
        self.output.rebind(arena, port)
    }

    pub fn clone_with_tied_params(&self, storage: &mut Storage) -> Self {
        Self {
            n_inputs: self.n_inputs,
            n_outputs: self.n_outputs,
            input: Binding::alloc(&mut storage.arena, self.n_inputs),
            output: Binding::alloc(&mut storage.arena, self.n_outputs),
        }
    }

    pub(crate) fn release(self, arena: &mut BufferArena) {
        self.input.release(arena);
        self.output.release(arena);
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn forward_averages_segments() {
        let mut storage = Storage::new();
        let average = Average::new(&mut storage, 6, 2).unwrap();
        storage
            .arena
            .write(average.input.port.value, &[1.0, 2.0, 3.0, 4.0, 5.0, 9.0]);
        average.forward(&mut storage);
        let y = storage.arena.get(average.output_port().value);
        assert_relative_eq!(y[0], 3.0);
        assert_relative_eq!(y[1], 5.0);
    }

    #[test]
    fn slots_are_disjoint_segments() {
        let mut storage = Storage::new();
        let average = Average::new(&mut storage, 6, 2).unwrap();
        let slot_1 = average.input_port(1).unwrap();
        storage.arena.write(slot_1.value, &[8.0, 8.0]);
        assert_eq!(storage.arena.get(average.input.port.value), &[0.0, 0.0, 8.0, 8.0, 0.0, 0.0]);
        assert!(matches!(average.input_port(3), Err(Error::InvalidSlot { slot: 3, n_slots: 3 })));
    }

    #[test]
    fn rejects_uneven_shapes() {
        let mut storage = Storage::new();
        assert!(Average::new(&mut storage, 5, 2).is_err());
        assert!(Average::new(&mut storage, 4, 0).is_err());
    }
}
