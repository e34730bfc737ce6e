use derive_more::Display;
use rand::{Rng, distr::uniform::SampleRange};
use tracing::debug;

use crate::{
    Error, Layer, Result,
    core::{BufferSlice, ParamId, Port, Storage},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("layer#{_0}")]
pub struct LayerId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("pipeline#{_0}")]
pub struct PipelineId(usize);

/// One layer plus the pipelines fed by it.
#[derive(Debug)]
struct PipelineNode {
    layer: LayerId,
    downstream: Vec<PipelineId>,
    /// Set once this node has back-propagated in the current step.
    back_propagated: bool,
}

/// Owner of every layer, buffer, parameter and pipeline node of a model.
///
/// Pipelines form a DAG: several roots may reach the same downstream node. A node back-propagates
/// at most once per step however many of its upstream branches reach it, and its parameters are
/// updated at most once per step as well.
#[derive(Debug, Default)]
pub struct NeuralNetwork {
    storage: Storage,
    layers: Vec<Layer>,
    pipelines: Vec<PipelineNode>,
}

impl NeuralNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut Storage {
        &mut self.storage
    }

    /// Builds a layer against this network's storage and adds it.
    pub fn add_layer_with<L: Into<Layer>>(&mut self, build: impl FnOnce(&mut Storage) -> L) -> LayerId {
        let layer = build(&mut self.storage).into();
        self.add_layer(layer)
    }

    pub fn add_layer(&mut self, layer: impl Into<Layer>) -> LayerId {
        self.layers.push(layer.into());
        LayerId(self.layers.len() - 1)
    }

    /// Adds a tied clone of `id`: same parameter owner, fresh buffers.
    pub fn add_tied_clone(&mut self, id: LayerId) -> LayerId {
        let clone = self.layers[id.0].clone_with_tied_params(&mut self.storage);
        self.add_layer(clone)
    }

    pub fn layer(&self, id: LayerId) -> &Layer {
        &self.layers[id.0]
    }

    pub fn layer_mut(&mut self, id: LayerId) -> &mut Layer {
        &mut self.layers[id.0]
    }

    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layer_ids(&self) -> impl Iterator<Item = LayerId> + use<> {
        (0..self.layers.len()).map(LayerId)
    }

    /// Makes `from` write into input slot `slot` of `to`.
    ///
    /// A layer writes into a single port, so linking it again redirects its output.
    pub fn connect(&mut self, from: LayerId, to: LayerId, slot: usize) -> Result<()> {
        let port = self.layers[to.0].input_port(slot)?;
        self.layers[from.0].link_output(&mut self.storage, port)?;
        debug!(%from, %to, slot, "linked layers");
        Ok(())
    }

    /// A new pipeline node wrapping `layer`, with nothing downstream.
    pub fn pipeline(&mut self, layer: LayerId) -> PipelineId {
        self.pipelines.push(PipelineNode {
            layer,
            downstream: Vec::new(),
            back_propagated: false,
        });
        PipelineId(self.pipelines.len() - 1)
    }

    /// Links `layer` after `p` and returns the node wrapping `layer`.
    pub fn after(&mut self, p: PipelineId, layer: LayerId, slot: usize) -> Result<PipelineId> {
        let q = self.pipeline(layer);
        self.after_pipeline(p, q, slot)
    }

    /// Links the input layer of `q` after `p` and returns `q`.
    pub fn after_pipeline(&mut self, p: PipelineId, q: PipelineId, slot: usize) -> Result<PipelineId> {
        self.connect(self.input_layer(p), self.input_layer(q), slot)?;
        self.pipelines[p.0].downstream.push(q);
        Ok(q)
    }

    /// Like [`after`](Self::after), but returns `p` for chaining fan-out.
    pub fn link(&mut self, p: PipelineId, layer: LayerId, slot: usize) -> Result<PipelineId> {
        self.after(p, layer, slot)?;
        Ok(p)
    }

    /// Like [`after_pipeline`](Self::after_pipeline), but returns `p`.
    pub fn link_pipeline(&mut self, p: PipelineId, q: PipelineId, slot: usize) -> Result<PipelineId> {
        self.after_pipeline(p, q, slot)?;
        Ok(p)
    }

    pub fn input_layer(&self, p: PipelineId) -> LayerId {
        self.pipelines[p.0].layer
    }

    /// Layers of the pipeline ends reachable from `p`, without duplicates.
    pub fn output_layers(&self, p: PipelineId) -> Vec<LayerId> {
        let mut layers = Vec::new();
        self.collect_output_layers(p, &mut layers);
        layers
    }

    fn collect_output_layers(&self, p: PipelineId, layers: &mut Vec<LayerId>) {
        let node = &self.pipelines[p.0];
        if node.downstream.is_empty() {
            if !layers.contains(&node.layer) {
                layers.push(node.layer);
            }
            return;
        }
        for &q in &node.downstream {
            self.collect_output_layers(q, layers);
        }
    }

    /// Runs the wrapped layer, then every downstream pipeline.
    pub fn forward(&mut self, p: PipelineId) {
        let layer = self.pipelines[p.0].layer;
        self.layers[layer.0].forward(&mut self.storage);
        for i in 0..self.pipelines[p.0].downstream.len() {
            let q = self.pipelines[p.0].downstream[i];
            self.forward(q);
        }
    }

    /// Back-propagates downstream pipelines first, then the wrapped layer.
    ///
    /// No-op for a node that already back-propagated since the last update or clear.
    pub fn backward(&mut self, p: PipelineId) {
        if self.pipelines[p.0].back_propagated {
            return;
        }
        for i in 0..self.pipelines[p.0].downstream.len() {
            let q = self.pipelines[p.0].downstream[i];
            self.backward(q);
        }
        let layer = self.pipelines[p.0].layer;
        self.layers[layer.0].backward(&mut self.storage);
        self.pipelines[p.0].back_propagated = true;
    }

    /// Applies gradients to every parameter owner back-propagated through from `p`, once each.
    pub fn update(&mut self, p: PipelineId, eta: f64) {
        for id in self.take_pending_updates(p) {
            self.storage.params.update(id, eta);
        }
    }

    pub fn update_ada_grad(&mut self, p: PipelineId, eta: f64, batch_size: usize) {
        for id in self.take_pending_updates(p) {
            self.storage.params.update_ada_grad(id, eta, batch_size);
        }
    }

    /// Parameter owners of the back-propagated nodes reachable from `p`, resetting their flags.
    fn take_pending_updates(&mut self, p: PipelineId) -> Vec<ParamId> {
        let mut ids = Vec::new();
        self.collect_pending_updates(p, &mut ids);
        ids
    }

    /// Visits every node below `p`; a downstream node may have back-propagated on its own.
    fn collect_pending_updates(&mut self, p: PipelineId, ids: &mut Vec<ParamId>) {
        let node = &mut self.pipelines[p.0];
        if node.back_propagated {
            node.back_propagated = false;
            if let Some(id) = self.layers[node.layer.0].param_id()
                && !ids.contains(&id)
            {
                ids.push(id);
            }
        }
        for i in 0..self.pipelines[p.0].downstream.len() {
            let q = self.pipelines[p.0].downstream[i];
            self.collect_pending_updates(q, ids);
        }
    }

    /// Zeroes every gradient reachable from `p` and resets the back-propagation flags.
    pub fn clear_grad(&mut self, p: PipelineId) {
        let layer = self.pipelines[p.0].layer;
        self.layers[layer.0].clear_grad(&mut self.storage);
        self.pipelines[p.0].back_propagated = false;
        for i in 0..self.pipelines[p.0].downstream.len() {
            let q = self.pipelines[p.0].downstream[i];
            self.clear_grad(q);
        }
    }

    /// `backward`, `update`, `clear_grad`.
    pub fn full_backward(&mut self, p: PipelineId, eta: f64) {
        self.backward(p);
        self.update(p, eta);
        self.clear_grad(p);
    }

    pub fn output_port(&self, layer: LayerId) -> Option<Port> {
        self.layers[layer.0].output_port()
    }

    pub fn input_port(&self, layer: LayerId, slot: usize) -> Result<Port> {
        self.layers[layer.0].input_port(slot)
    }

    pub fn buffer(&self, slice: BufferSlice) -> &[f64] {
        self.storage.arena.get(slice)
    }

    pub fn buffer_mut(&mut self, slice: BufferSlice) -> &mut [f64] {
        self.storage.arena.get_mut(slice)
    }

    /// Output values of `layer`; empty for a convolution without input.
    pub fn output(&self, layer: LayerId) -> &[f64] {
        match self.output_port(layer) {
            Some(port) => self.buffer(port.value),
            None => &[],
        }
    }

    /// Copies `values` into the input of a linear, activation, softmax or average layer.
    pub fn set_input(&mut self, layer: LayerId, values: &[f64]) -> Result<()> {
        // Slot 0 of an average is its first segment; widen it to the whole input.
        let whole = match &self.layers[layer.0] {
            Layer::Average(average) => {
                let first = average.input_port(0)?;
                Port {
                    value: BufferSlice {
                        len: average.n_inputs(),
                        ..first.value
                    },
                    grad: BufferSlice {
                        len: average.n_inputs(),
                        ..first.grad
                    },
                }
            }
            layer => layer.input_port(0)?,
        };
        if whole.len() != values.len() {
            return Err(Error::LengthMismatch {
                expected: whole.len(),
                found: values.len(),
            });
        }
        self.storage.arena.write(whole.value, values);
        Ok(())
    }

    pub fn set_convolution_input(&mut self, layer: LayerId, values: &[f64]) -> Result<()> {
        let layer = &mut self.layers[layer.0];
        let found = layer.kind();
        let Some(convolution) = layer.as_convolution_mut() else {
            return Err(Error::WrongLayerKind {
                expected: "convolution",
                found,
            });
        };
        convolution.set_input(&mut self.storage, values)
    }

    pub fn set_lookup_input(&mut self, layer: LayerId, ids: &[Option<usize>]) -> Result<()> {
        let layer = &mut self.layers[layer.0];
        let found = layer.kind();
        let Some(lookup) = layer.as_lookup_mut() else {
            return Err(Error::WrongLayerKind {
                expected: "lookup",
                found,
            });
        };
        lookup.set_input(&self.storage, ids)
    }

    pub fn randomize(&mut self, layer: LayerId, range: impl SampleRange<f64> + Clone) {
        match self.layers[layer.0].param_id() {
            Some(ParamId::Linear(id)) => self.storage.params.linear_mut(id).randomize(range),
            Some(ParamId::Table(id)) => self.storage.params.table_mut(id).randomize(range),
            None => {}
        }
    }

    pub fn randomize_with(&mut self, layer: LayerId, rng: &mut impl Rng, range: impl SampleRange<f64> + Clone) {
        match self.layers[layer.0].param_id() {
            Some(ParamId::Linear(id)) => self.storage.params.linear_mut(id).randomize_with(rng, range),
            Some(ParamId::Table(id)) => self.storage.params.table_mut(id).randomize_with(rng, range),
            None => {}
        }
    }
}
