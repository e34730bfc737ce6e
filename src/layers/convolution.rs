use rand::{Rng, distr::uniform::SampleRange};
use tracing::debug;

use crate::{
    Error, Result,
    activation_functions::Tanh,
    core::{BufferArena, LinearId, Port, Storage},
    layers::{Average, Elementwise, Linear, check_lengths},
};

/// Initial weights are drawn from `[-INIT_RANGE, INIT_RANGE)`.
const INIT_RANGE: f64 = 0.01;

/// One window position: `tanh(W x_w + b)` over a slice of the convolution input.
#[derive(Debug)]
struct Window {
    linear: Linear,
    tanh: Elementwise<Tanh>,
}

/// Per-input-length topology of a [`Convolution`].
#[derive(Debug)]
pub enum ConvolutionState {
    Uninitialized,
    Built(Built),
}

#[derive(Debug)]
pub struct Built {
    input: Port,
    windows: Vec<Window>,
    average: Average,
}

impl Built {
    pub fn n_windows(&self) -> usize {
        self.windows.len()
    }

    pub fn input_len(&self) -> usize {
        self.input.len()
    }

    /// Output ports of every window's linear and tanh layer, in window order.
    pub fn window_ports(&self) -> impl Iterator<Item = Port> + '_ {
        self.windows
            .iter()
            .flat_map(|window| [window.linear.output_port(), window.tanh.output_port()])
    }

    fn release(self, arena: &mut BufferArena) {
        arena.release_port(self.input);
        for window in self.windows {
            window.linear.release(arena);
            window.tanh.release(arena);
        }
        self.average.release(arena);
    }
}

/// Sliding-window convolution with averaging over windows.
///
/// The input is a flat sequence of `element_dim`-long elements whose count is only known once an
/// input is set. Every window of `window_dim` consecutive elements runs its own `Linear -> Tanh`
/// chain; all chains read the same canonical linear parameters and feed one slot each of an
/// `Average` layer, whose output is the output of the convolution.
#[derive(Debug)]
pub struct Convolution {
    params: LinearId,
    window_dim: usize,
    element_dim: usize,
    output_dim: usize,
    state: ConvolutionState,
    target: Option<Port>,
}

impl Convolution {
    /// A convolution with weights randomized in `[-0.01, 0.01)`.
    pub fn new(storage: &mut Storage, window_dim: usize, element_dim: usize, output_dim: usize) -> Self {
        let convolution = Self::zeroed(storage, window_dim, element_dim, output_dim);
        convolution.randomize(storage, -INIT_RANGE..INIT_RANGE);
        convolution
    }

    /// A convolution with all-zero weights, for callers that set or randomize them afterwards.
    pub fn zeroed(storage: &mut Storage, window_dim: usize, element_dim: usize, output_dim: usize) -> Self {
        assert!(window_dim > 0 && element_dim > 0 && output_dim > 0);
        let params = storage.params.add_linear(window_dim * element_dim, output_dim);
        Self {
            params,
            window_dim,
            element_dim,
            output_dim,
            state: ConvolutionState::Uninitialized,
            target: None,
        }
    }

    pub fn params(&self) -> LinearId {
        self.params
    }

    pub fn window_dim(&self) -> usize {
        self.window_dim
    }

    pub fn element_dim(&self) -> usize {
        self.element_dim
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    pub fn state(&self) -> &ConvolutionState {
        &self.state
    }

    /// Number of windows of the current topology, `0` before the first input.
    pub fn n_windows(&self) -> usize {
        match &self.state {
            ConvolutionState::Uninitialized => 0,
            ConvolutionState::Built(built) => built.n_windows(),
        }
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

    /// Number of windows over an input of `len` values.
    pub fn windows_for(&self, len: usize) -> Result<usize> {
        if len % self.element_dim != 0 {
            return Err(Error::RaggedInput {
                len,
                element_dim: self.element_dim,
            });
        }
        let n_elements = len / self.element_dim;
        if n_elements < self.window_dim {
            return Err(Error::InputTooShort {
                n_elements,
                window_dim: self.window_dim,
            });
        }
        Ok(n_elements - self.window_dim + 1)
    }

    /// Copies `input` in, rebuilding the windows first if its length differs from the last one.
    pub fn set_input(&mut self, storage: &mut Storage, input: &[f64]) -> Result<()> {
        let n_windows = self.windows_for(input.len())?;
        let current = match &self.state {
            ConvolutionState::Built(built) if built.n_windows() == n_windows => Some(built.input),
            _ => None,
        };
        let port = match current {
            Some(port) => port,
            None => self.rebuild(storage, n_windows)?,
        };
        storage.arena.write(port.value, input);
        Ok(())
    }

    fn rebuild(&mut self, storage: &mut Storage, n_windows: usize) -> Result<Port> {
        if let ConvolutionState::Built(old) =
            std::mem::replace(&mut self.state, ConvolutionState::Uninitialized)
        {
            debug!(from = old.n_windows(), to = n_windows, "rebuilding convolution windows");
            old.release(&mut storage.arena);
        }
        let len = (n_windows + self.window_dim - 1) * self.element_dim;
        let input = storage.arena.alloc_port(len);
        let mut average = Average::new(storage, self.output_dim * n_windows, self.output_dim)?;
        let mut windows = Vec::with_capacity(n_windows);
        for w in 0..n_windows {
            let slice = input.sub(w * self.element_dim, self.window_dim * self.element_dim);
            let mut linear = Linear::tied(storage, self.params, slice);
            let mut tanh = Elementwise::<Tanh>::new(storage, self.output_dim);
            linear.link_output(&mut storage.arena, tanh.input_port(0)?)?;
            tanh.link_output(&mut storage.arena, average.input_port(w)?)?;
            windows.push(Window { linear, tanh });
        }
        if let Some(target) = self.target {
            average.link_output(&mut storage.arena, target)?;
        }
        self.state = ConvolutionState::Built(Built {
            input,
            windows,
            average,
        });
        Ok(input)
    }

    #[track_caller]
    fn built(&self) -> &Built {
        match &self.state {
            ConvolutionState::Built(built) => built,
            ConvolutionState::Uninitialized => panic!("convolution used before any input was set"),
        }
    }

    pub fn forward(&self, storage: &mut Storage) {
        let built = self.built();
        for window in &built.windows {
            window.linear.forward(storage);
            window.tanh.forward(storage);
        }
        built.average.forward(storage);
    }

    /// Every window adds its share to the one shared `dW`, `db`.
    pub fn backward(&self, storage: &mut Storage) {
        let built = self.built();
        built.average.backward(storage);
        for window in &built.windows {
            window.tanh.backward(storage);
            window.linear.backward(storage);
        }
    }

    pub fn clear_grad(&self, arena: &mut BufferArena) {
        let ConvolutionState::Built(built) = &self.state else {
            return;
        };
        arena.zero(built.input.grad);
        for window in &built.windows {
            window.linear.clear_grad(arena);
            window.tanh.clear_grad(arena);
        }
        built.average.clear_grad(arena);
    }

    /// Gradient with respect to the whole input, summed over overlapping windows.
    pub fn input_grad<'a>(&self, arena: &'a BufferArena) -> Option<&'a [f64]> {
        match &self.state {
            ConvolutionState::Built(built) => Some(arena.get(built.input.grad)),
            ConvolutionState::Uninitialized => None,
        }
    }

    pub fn output_port(&self) -> Option<Port> {
        match &self.state {
            ConvolutionState::Built(built) => Some(built.average.output_port()),
            ConvolutionState::Uninitialized => None,
        }
    }

    /// Remembers `port` as the output target; every future topology writes into it.
    pub fn link_output(&mut self, arena: &mut BufferArena, port: Port) -> Result<()> {
        if port.len() != self.output_dim {
            return Err(Error::LengthMismatch {
                expected: self.output_dim,
                found: port.len(),
            });
        }
        if let ConvolutionState::Built(built) = &mut self.state {
            check_lengths(built.average.output_port(), port)?;
            built.average.link_output(arena, port)?;
        }
        self.target = Some(port);
        Ok(())
    }

    /// Shares the linear parameters; the clone starts uninitialized and unlinked.
    pub fn clone_with_tied_params(&self) -> Self {
        Self {
            params: self.params,
            window_dim: self.window_dim,
            element_dim: self.element_dim,
            output_dim: self.output_dim,
            state: ConvolutionState::Uninitialized,
            target: None,
        }
    }
}
