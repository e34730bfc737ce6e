use rand::{Rng, seq::SliceRandom};
use tracing::info;

use crate::{Result, SentimentCnn, model::argmax, text::SentenceMatrix};

/// A sentence matrix and its gold class.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub matrix: SentenceMatrix,
    pub label: usize,
}

impl Sample {
    pub fn new(matrix: SentenceMatrix, label: usize) -> Self {
        Self { matrix, label }
    }
}

/// Accuracy and confusion matrix of a model over a set of samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub accuracy: f64,
    /// `confusion[gold][predicted]`.
    pub confusion: Vec<Vec<usize>>,
}

impl Evaluation {
    pub fn n_samples(&self) -> usize {
        self.confusion.iter().flatten().sum()
    }
}

/// Shuffles `samples` and holds out `round(fraction * n)` of them; returns `(train, test)`.
pub fn split_holdout(samples: &[Sample], fraction: f64, rng: &mut impl Rng) -> (Vec<Sample>, Vec<Sample>) {
    assert!((0.0..=1.0).contains(&fraction), "holdout fraction {fraction} is not in [0, 1]");
    let mut shuffled = samples.to_vec();
    shuffled.shuffle(rng);
    let n_test = ((samples.len() as f64 * fraction).round() as usize).min(samples.len());
    let test = shuffled.split_off(samples.len() - n_test);
    (shuffled, test)
}

/// Trains a borrowed model one example at a time.
pub struct Gym<'a> {
    model: &'a mut SentimentCnn,
    /// Examples seen since the gym was created.
    n_seen: usize,
}

impl<'a> Gym<'a> {
    pub fn new(model: &'a mut SentimentCnn) -> Self {
        Self { model, n_seen: 0 }
    }

    pub fn finish(self) {}

    pub fn model<'b, 'x>(&'b mut self) -> &'x mut SentimentCnn
    where
        'a: 'x,
        'b: 'x,
    {
        self.model
    }

    /// One pass over `samples` in order; returns the mean loss, `0` for no samples.
    pub fn train(&mut self, eta: f64, samples: &[Sample]) -> Result<f64> {
        let order: Vec<usize> = (0..samples.len()).collect();
        self.train_in_order(eta, samples, &order)
    }

    /// One pass over `samples` in an order shuffled by `rng`; returns the mean loss.
    pub fn train_shuffled(&mut self, eta: f64, samples: &[Sample], rng: &mut impl Rng) -> Result<f64> {
        let mut order: Vec<usize> = (0..samples.len()).collect();
        order.shuffle(rng);
        self.train_in_order(eta, samples, &order)
    }

    fn train_in_order(&mut self, eta: f64, samples: &[Sample], order: &[usize]) -> Result<f64> {
        if order.is_empty() {
            return Ok(0.0);
        }
        let log_every = self.model.config().log_every;
        let mut loss = 0.0f64;
        let mut running = 0.0f64;
        for (i, &i_sample) in order.iter().enumerate() {
            let sample = &samples[i_sample];
            let l_i = self.model.train_example(&sample.matrix, sample.label, eta)?;
            loss += l_i;
            running += l_i;
            self.n_seen += 1;
            if (i + 1) % log_every == 0 {
                info!(
                    seen = self.n_seen,
                    loss = running / log_every as f64,
                    "running loss"
                );
                running = 0.0;
            }
        }
        Ok(loss / order.len() as f64)
    }

    /// `epochs` shuffled passes; returns the mean loss of each.
    pub fn train_epochs(
        &mut self,
        eta: f64,
        samples: &[Sample],
        epochs: usize,
        rng: &mut impl Rng,
    ) -> Result<Vec<f64>> {
        let mut losses = Vec::with_capacity(epochs);
        for epoch in 0..epochs {
            let loss = self.train_shuffled(eta, samples, rng)?;
            info!(epoch, loss, "finished epoch");
            losses.push(loss);
        }
        Ok(losses)
    }

    pub fn evaluate(&mut self, samples: &[Sample]) -> Result<Evaluation> {
        let n_classes = self.model.n_classes();
        let mut confusion = vec![vec![0usize; n_classes]; n_classes];
        let mut n_correct = 0usize;
        for sample in samples {
            let predicted = argmax(self.model.predict(&sample.matrix)?);
            if predicted == sample.label {
                n_correct += 1;
            }
            if let Some(row) = confusion.get_mut(sample.label) {
                row[predicted] += 1;
            }
        }
        let accuracy = match samples.len() {
            0 => 0.0,
            n => n_correct as f64 / n as f64,
        };
        Ok(Evaluation {
            accuracy,
            confusion,
        })
    }
}
