use rand::Rng;
use tracing::{debug, warn};

use crate::{
    Average, Convolution, Error, LayerId, Linear, ModelConfig, NeuralNetwork, PipelineId, Result,
    Softmax,
    core::{LinearId, LinearParams, Port},
    text::SentenceMatrix,
};

/// Sentence classifier: convolutions of several window sizes over word vectors, averaged, then
/// `Linear -> Softmax` over the classes.
///
/// ```text
/// conv(1) ─┐
/// conv(2) ─┼─> average -> linear -> softmax
/// conv(3) ─┘
/// ```
#[derive(Debug)]
pub struct SentimentCnn {
    nn: NeuralNetwork,
    config: ModelConfig,
    dim: usize,
    convolutions: Vec<(LayerId, PipelineId)>,
    output_params: LinearId,
    /// Output of the softmax, never relinked.
    probabilities: Port,
}

impl SentimentCnn {
    /// A model over word vectors of dimension `dim`, with weights from the thread-local RNG.
    pub fn new(config: ModelConfig, dim: usize) -> Result<Self> {
        Self::with_rng(config, dim, &mut rand::rng())
    }

    pub fn with_rng(config: ModelConfig, dim: usize, rng: &mut impl Rng) -> Result<Self> {
        config.validate()?;
        if dim == 0 {
            return Err(Error::InvalidShape("word vectors must not be empty".to_string()));
        }
        let range = -config.init_range..config.init_range;
        let n_windows = config.window_sizes.len();
        let mut nn = NeuralNetwork::new();

        let average = Average::new(nn.storage_mut(), dim * n_windows, dim)?;
        let average = nn.add_layer(average);
        let linear = Linear::new(nn.storage_mut(), dim, config.n_classes);
        let output_params = linear.params();
        let output_linear = nn.add_layer(linear);
        nn.randomize_with(output_linear, rng, range.clone());
        let softmax = Softmax::new(nn.storage_mut(), config.n_classes);
        let probabilities = softmax.output_port();
        let softmax = nn.add_layer(softmax);

        let head = nn.pipeline(average);
        let tail = nn.after(head, output_linear, 0)?;
        nn.after(tail, softmax, 0)?;

        let mut convolutions = Vec::with_capacity(n_windows);
        for (slot, &window) in config.window_sizes.iter().enumerate() {
            let convolution = nn.add_layer_with(|storage| Convolution::zeroed(storage, window, dim, dim));
            nn.randomize_with(convolution, rng, range.clone());
            let root = nn.pipeline(convolution);
            nn.link_pipeline(root, head, slot)?;
            convolutions.push((convolution, root));
        }
        debug!(
            dim,
            window_sizes = ?config.window_sizes,
            n_classes = config.n_classes,
            "built sentiment model"
        );

        Ok(Self {
            nn,
            config,
            dim,
            convolutions,
            output_params,
            probabilities,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn n_classes(&self) -> usize {
        self.config.n_classes
    }

    pub fn network(&self) -> &NeuralNetwork {
        &self.nn
    }

    pub fn network_mut(&mut self) -> &mut NeuralNetwork {
        &mut self.nn
    }

    /// Parameters of the output layer, mapping averaged features to class scores.
    pub fn output_params(&self) -> &LinearParams {
        self.nn.storage().params.linear(self.output_params)
    }

    /// Parameters shared by every window of the convolution over `window`-word windows.
    pub fn convolution_params(&self, window: usize) -> Option<&LinearParams> {
        self.convolutions.iter().find_map(|&(layer, _)| {
            let convolution = self.nn.layer(layer).as_convolution()?;
            (convolution.window_dim() == window)
                .then(|| self.nn.storage().params.linear(convolution.params()))
        })
    }

    /// Class probabilities of `matrix`.
    pub fn predict(&mut self, matrix: &SentenceMatrix) -> Result<&[f64]> {
        if matrix.dim() != self.dim {
            return Err(Error::LengthMismatch {
                expected: self.dim,
                found: matrix.dim(),
            });
        }
        for &(convolution, _) in &self.convolutions {
            self.nn.set_convolution_input(convolution, matrix.as_slice())?;
        }
        for i in 0..self.convolutions.len() {
            let (_, root) = self.convolutions[i];
            self.nn.forward(root);
        }
        Ok(self.nn.buffer(self.probabilities.value))
    }

    /// Most probable class of `matrix`.
    pub fn classify(&mut self, matrix: &SentenceMatrix) -> Result<usize> {
        let probabilities = self.predict(matrix)?;
        Ok(argmax(probabilities))
    }

    /// One gradient step towards `label` on a single example; returns `-ln p(label)`.
    pub fn train_example(&mut self, matrix: &SentenceMatrix, label: usize, rate: f64) -> Result<f64> {
        let n_classes = self.config.n_classes;
        if label >= n_classes {
            return Err(Error::InvalidLabel { label, n_classes });
        }
        let p = self.predict(matrix)?[label];
        let threshold = self.config.result_threshold;
        if p < threshold {
            warn!(label, p, threshold, "clamping target probability");
        }

        // d ln(p) / dp, every other class left at zero.
        let grad = self.nn.buffer_mut(self.probabilities.grad);
        bytemuck::fill_zeroes(grad);
        grad[label] = 1.0 / p.max(threshold);

        for &(_, root) in &self.convolutions {
            self.nn.backward(root);
        }
        for &(_, root) in &self.convolutions {
            self.nn.update(root, rate);
        }
        for &(_, root) in &self.convolutions {
            self.nn.clear_grad(root);
        }
        Ok(-p.max(f64::MIN_POSITIVE).ln())
    }
}

pub(crate) fn argmax(xs: &[f64]) -> usize {
    let mut best = 0;
    for (i, &x) in xs.iter().enumerate() {
        if x > xs[best] {
            best = i;
        }
    }
    best
}
