use std::{fmt, marker::PhantomData};

use crate::{
    ActivationFunction, Result,
    core::{BufferArena, Port, Storage},
    layers::{Binding, whole_input},
};

/// `y[i] = φ(x[i])` over a fixed length.
pub struct Elementwise<Phi: ActivationFunction> {
    length: usize,
    input: Binding,
    output: Binding,
    _phi: PhantomData<Phi>,
}

impl<Phi: ActivationFunction> fmt::Debug for Elementwise<Phi> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Elementwise")
            .field("phi", &Phi::NAME)
            .field("length", &self.length)
            .field("input", &self.input)
            .field("output", &self.output)
            .finish()
    }
}

impl<Phi: ActivationFunction> Elementwise<Phi> {
    pub fn new(storage: &mut Storage, length: usize) -> Self {
        Self {
            length,
            input: Binding::alloc(&mut storage.arena, length),
            output: Binding::alloc(&mut storage.arena, length),
            _phi: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn forward(&self, storage: &mut Storage) {
        let x = self.input.port.value;
        storage
            .arena
            .with_mut(self.output.port.value, |arena, y| Phi::apply_multiple(arena.get(x), y));
    }

    pub fn backward(&self, storage: &mut Storage) {
        let y = self.output.port.value;
        let dy = self.output.port.grad;
        storage.arena.with_mut(self.input.port.grad, |arena, dx| {
            let y = arena.get(y);
            let dy = arena.get(dy);
            for i in 0..self.length {
                dx[i] = Phi::deriv_from_output(y[i]) * dy[i];
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

    pub(crate) fn release(self, arena: &mut BufferArena) {
        self.input.release(arena);
        self.output.release(arena);
    }
}
