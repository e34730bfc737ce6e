//! The closed set of layer kinds, and the port protocol they share.
//!
//! Every layer reads its input port and writes its output port. Linking a layer to the next one
//! replaces its output port by an input port of the next layer, so both read and write the same
//! arena buffers from then on.

mod average;
mod convolution;
mod elementwise;
mod linear;
mod lookup;
mod softmax;

pub use average::Average;
pub use convolution::{Built, Convolution, ConvolutionState};
pub use elementwise::Elementwise;
pub use linear::Linear;
pub use lookup::Lookup;
pub use softmax::Softmax;

use derive_more::From;

use crate::{
    Error, Result,
    activation_functions::{Sigmoid, Tanh},
    core::{BufferArena, ParamId, Port, Storage},
};

/// A port together with whether the layer holding it also owns its buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Binding {
    pub(crate) port: Port,
    pub(crate) owned: bool,
}

impl Binding {
    pub(crate) fn alloc(arena: &mut BufferArena, len: usize) -> Self {
        Self {
            port: arena.alloc_port(len),
            owned: true,
        }
    }

    pub(crate) fn borrowed(port: Port) -> Self {
        Self { port, owned: false }
    }

    /// Points this binding at `port`, dropping the old buffers if they were ours.
    pub(crate) fn rebind(&mut self, arena: &mut BufferArena, port: Port) -> Result<()> {
        check_lengths(self.port, port)?;
        if self.owned {
            arena.release_port(self.port);
        }
        *self = Self::borrowed(port);
        Ok(())
    }

    pub(crate) fn release(self, arena: &mut BufferArena) {
        if self.owned {
            arena.release_port(self.port);
        }
    }
}

pub(crate) fn check_lengths(ours: Port, theirs: Port) -> Result<()> {
    if ours.value.len != theirs.value.len {
        return Err(Error::LengthMismatch {
            expected: ours.value.len,
            found: theirs.value.len,
        });
    }
    if ours.grad.len != theirs.grad.len {
        return Err(Error::LengthMismatch {
            expected: ours.grad.len,
            found: theirs.grad.len,
        });
    }
    Ok(())
}

/// Input port of a single-slot layer.
pub(crate) fn whole_input(input: Binding, slot: usize) -> Result<Port> {
    match slot {
        0 => Ok(input.port),
        slot => Err(Error::InvalidSlot { slot, n_slots: 1 }),
    }
}

#[derive(Debug, From)]
pub enum Layer {
    Linear(Linear),
    Tanh(Elementwise<Tanh>),
    Sigmoid(Elementwise<Sigmoid>),
    Softmax(Softmax),
    Average(Average),
    Lookup(Lookup),
    Convolution(Convolution),
}

macro_rules! dispatch {
    ($self:expr, $layer:ident => $body:expr) => {
        match $self {
            Layer::Linear($layer) => $body,
            Layer::Tanh($layer) => $body,
            Layer::Sigmoid($layer) => $body,
            Layer::Softmax($layer) => $body,
            Layer::Average($layer) => $body,
            Layer::Lookup($layer) => $body,
            Layer::Convolution($layer) => $body,
        }
    };
}

impl Layer {
    pub fn kind(&self) -> &'static str {
        match self {
            Layer::Linear(_) => "linear",
            Layer::Tanh(_) => "tanh",
            Layer::Sigmoid(_) => "sigmoid",
            Layer::Softmax(_) => "softmax",
            Layer::Average(_) => "average",
            Layer::Lookup(_) => "lookup",
            Layer::Convolution(_) => "convolution",
        }
    }

    /// Reads the input port, writes the output port.
    pub fn forward(&mut self, storage: &mut Storage) {
        dispatch!(self, layer => layer.forward(storage))
    }

    /// Reads the output gradient, writes the input gradient and accumulates parameter gradients.
    pub fn backward(&mut self, storage: &mut Storage) {
        dispatch!(self, layer => layer.backward(storage))
    }

    /// Canonical parameter owner this layer reads, if any.
    pub fn param_id(&self) -> Option<ParamId> {
        match self {
            Layer::Linear(layer) => Some(ParamId::Linear(layer.params())),
            Layer::Lookup(layer) => Some(ParamId::Table(layer.table())),
            Layer::Convolution(layer) => Some(ParamId::Linear(layer.params())),
            Layer::Tanh(_) | Layer::Sigmoid(_) | Layer::Softmax(_) | Layer::Average(_) => None,
        }
    }

    /// Applies the accumulated gradient to the parameters; no-op for parameterless layers.
    pub fn update(&self, storage: &mut Storage, eta: f64) {
        if let Some(id) = self.param_id() {
            storage.params.update(id, eta);
        }
    }

    pub fn update_ada_grad(&self, storage: &mut Storage, eta: f64, batch_size: usize) {
        if let Some(id) = self.param_id() {
            storage.params.update_ada_grad(id, eta, batch_size);
        }
    }

    /// Zeroes activation gradients and parameter gradients.
    pub fn clear_grad(&mut self, storage: &mut Storage) {
        dispatch!(self, layer => layer.clear_grad(&mut storage.arena));
        if let Some(id) = self.param_id() {
            storage.params.clear_grad(id);
        }
    }

    pub fn input_port(&self, slot: usize) -> Result<Port> {
        match self {
            Layer::Lookup(_) => Err(Error::NotLinkable("lookup")),
            Layer::Convolution(_) => Err(Error::NotLinkable("convolution")),
            Layer::Linear(layer) => layer.input_port(slot),
            Layer::Tanh(layer) => layer.input_port(slot),
            Layer::Sigmoid(layer) => layer.input_port(slot),
            Layer::Softmax(layer) => layer.input_port(slot),
            Layer::Average(layer) => layer.input_port(slot),
        }
    }

    /// `None` only for a convolution that has not seen an input yet.
    pub fn output_port(&self) -> Option<Port> {
        match self {
            Layer::Convolution(layer) => layer.output_port(),
            Layer::Linear(layer) => Some(layer.output_port()),
            Layer::Tanh(layer) => Some(layer.output_port()),
            Layer::Sigmoid(layer) => Some(layer.output_port()),
            Layer::Softmax(layer) => Some(layer.output_port()),
            Layer::Average(layer) => Some(layer.output_port()),
            Layer::Lookup(layer) => Some(layer.output_port()),
        }
    }

    /// Makes this layer write into `port` from now on.
    pub fn link_output(&mut self, storage: &mut Storage, port: Port) -> Result<()> {
        dispatch!(self, layer => layer.link_output(&mut storage.arena, port))
    }

    /// A new layer with its own buffers, sharing this layer's parameter owner.
    pub fn clone_with_tied_params(&self, storage: &mut Storage) -> Layer {
        match self {
            Layer::Linear(layer) => layer.clone_with_tied_params(storage).into(),
            Layer::Tanh(layer) => layer.clone_with_tied_params(storage).into(),
            Layer::Sigmoid(layer) => layer.clone_with_tied_params(storage).into(),
            Layer::Softmax(layer) => layer.clone_with_tied_params(storage).into(),
            Layer::Average(layer) => layer.clone_with_tied_params(storage).into(),
            Layer::Lookup(layer) => layer.clone_with_tied_params(storage).into(),
            Layer::Convolution(layer) => layer.clone_with_tied_params().into(),
        }
    }

    pub fn as_linear(&self) -> Option<&Linear> {
        match self {
            Layer::Linear(layer) => Some(layer),
            _ => None,
        }
    }

    pub fn as_lookup_mut(&mut self) -> Option<&mut Lookup> {
        match self {
            Layer::Lookup(layer) => Some(layer),
            _ => None,
        }
    }

    pub fn as_lookup(&self) -> Option<&Lookup> {
        match self {
            Layer::Lookup(layer) => Some(layer),
            _ => None,
        }
    }

    pub fn as_convolution(&self) -> Option<&Convolution> {
        match self {
            Layer::Convolution(layer) => Some(layer),
            _ => None,
        }
    }

    pub fn as_convolution_mut(&mut self) -> Option<&mut Convolution> {
        match self {
            Layer::Convolution(layer) => Some(layer),
            _ => None,
        }
    }
}
