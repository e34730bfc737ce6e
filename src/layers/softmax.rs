use crate::{
    Result,
    core::{BufferArena, Port, Storage},
    layers::{Binding, whole_input},
};

#[derive(Debug)]
pub struct Softmax {
    length: usize,
    input: Binding,
    output: Binding,
}

impl Softmax {
    pub fn new(storage: &mut Storage, length: usize) -> Self {
        assert!(length != 0);
        Self {
            length,
            input: Binding::alloc(&mut storage.arena, length),
            output: Binding::alloc(&mut storage.arena, length),
        }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Shifts by the maximum before exponentiating, so no term exceeds `exp(0)`.
    pub fn forward(&self, storage: &mut Storage) {
        let x = self.input.port.value;
        storage.arena.with_mut(self.output.port.value, |arena, y| {
            let x = arena.get(x);
            let max = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mut sum = 0.0;
            for (yi, &xi) in y.iter_mut().zip(x) {
                *yi = f64::exp(xi - max);
                sum += *yi;
            }
            for yi in y.iter_mut() {
                *yi /= sum;
            }
        });
    }

    /// Exact Jacobian-vector product: `dx[i] = Σ_j dy[j] y[j] (δ_ij - y[i])`.
    pub fn backward(&self, storage: &mut Storage) {
        let y = self.output.port.value;
        let dy = self.output.port.grad;
        storage.arena.with_mut(self.input.port.grad, |arena, dx| {
            let y = arena.get(y);
            let dy = arena.get(dy);
            bytemuck::fill_zeroes(dx);
            for j in 0..self.length {
                if dy[j] == 0.0 {
                    continue;
                }
                for i in 0..self.length {
                    let delta = if i == j { 1.0 } else { 0.0 };
                    dx[i] += dy[j] * y[j] * (delta - y[i]);
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
        Self::new(storage, self.length)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn uniform_input_gives_uniform_output() {
        let mut storage = Storage::new();
        let softmax = Softmax::new(&mut storage, 4);
        storage.arena.write(softmax.input_port(0).unwrap().value, &[7.0; 4]);
        softmax.forward(&mut storage);
        for &p in storage.arena.get(softmax.output_port().value) {
            assert_relative_eq!(p, 0.25);
        }
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut storage = Storage::new();
        let softmax = Softmax::new(&mut storage, 3);
        let x = [0.3, -1.2, 2.0];
        let c = [0.0, 1.5, -0.7];
        let objective = |storage: &mut Storage, x: &[f64]| {
            storage.arena.write(softmax.input_port(0).unwrap().value, x);
            softmax.forward(storage);
            let y = storage.arena.get(softmax.output_port().value);
            y.iter().zip(&c).map(|(y, c)| y * c).sum::<f64>()
        };
        objective(&mut storage, &x);
        storage.arena.write(softmax.output_port().grad, &c);
        softmax.backward(&mut storage);
        let dx = storage.arena.get(softmax.input_port(0).unwrap().grad).to_vec();
        let eps = 1e-6;
        for i in 0..3 {
            let mut plus = x;
            let mut minus = x;
            plus[i] += eps;
            minus[i] -= eps;
            let numeric = (objective(&mut storage, &plus) - objective(&mut storage, &minus)) / (2.0 * eps);
            assert_relative_eq!(dx[i], numeric, epsilon = 1e-7);
        }
    }
}
