use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use clap::Parser;
use rand::{Rng, SeedableRng, rngs::StdRng};
use sentnet::{
    Gym, ModelConfig, Sample, SentimentCnn, split_holdout,
    text::{SentenceMatrix, WhitespaceTokenizer, WordVectors},
};
use tracing::info;
use tracing_subscriber::filter::Directive;

/// Trains the sentence classifier on a small built-in corpus.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// JSON model config; missing fields take their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn time<T>(f: impl FnOnce() -> T) -> (Duration, T) {
    let before = Instant::now();
    let result = f();
    let after = Instant::now();
    (after.duration_since(before), result)
}

const DIM: usize = 4;

/// Word vectors whose first coordinate carries the sentiment and the rest is noise.
fn word_vectors(rng: &mut impl Rng) -> Result<WordVectors> {
    let words: &[(&str, f64)] = &[
        ("good", 1.0),
        ("great", 1.0),
        ("fun", 0.6),
        ("lovely", 0.8),
        ("bad", -1.0),
        ("awful", -1.0),
        ("boring", -0.6),
        ("dull", -0.8),
        ("the", 0.0),
        ("movie", 0.0),
        ("was", 0.0),
        ("plot", 0.0),
        ("very", 0.0),
    ];
    let mut vectors = WordVectors::new(DIM);
    for &(word, polarity) in words {
        let mut vector = [0.0; DIM];
        vector[0] = polarity;
        for x in &mut vector[1..] {
            *x = rng.random_range(-0.3..0.3);
        }
        vectors.insert(word, &vector)?;
    }
    Ok(vectors)
}

fn corpus(vectors: &WordVectors, config: &ModelConfig) -> Vec<Sample> {
    let sentences: &[(&str, &str)] = &[
        ("the movie was good", "positive"),
        ("great plot", "positive"),
        ("very fun movie", "positive"),
        ("the plot was lovely", "positive"),
        ("good good fun", "positive"),
        ("the movie was bad", "negative"),
        ("awful plot", "negative"),
        ("very boring movie", "negative"),
        ("the plot was dull", "negative"),
        ("bad and awful", "negative"),
    ];
    sentences
        .iter()
        .map(|&(sentence, label)| {
            let matrix =
                SentenceMatrix::from_sentence(sentence, &WhitespaceTokenizer, vectors, config.padding());
            Sample::new(matrix, config.label_index(label))
        })
        .collect()
}

fn main() -> Result<()> {
    let directive: Directive = "sentnet=info".parse()?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => ModelConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ModelConfig {
            n_classes: 2,
            ..ModelConfig::default()
        },
    };
    if config.classes.is_empty() && config.n_classes == 2 {
        config.classes = vec!["negative".to_string(), "positive".to_string()];
    }
    if let Some(epochs) = cli.epochs {
        config.epochs = epochs;
    }
    if let Some(learning_rate) = cli.learning_rate {
        config.learning_rate = learning_rate;
    }
    config.validate()?;

    let mut rng = StdRng::seed_from_u64(cli.seed);
    let vectors = word_vectors(&mut rng)?;
    let samples = corpus(&vectors, &config);
    let (train, test) = split_holdout(&samples, config.test_split, &mut rng);
    info!(
        n_train = train.len(),
        n_test = test.len(),
        dim = DIM,
        "built corpus"
    );

    let (eta, epochs) = (config.learning_rate, config.epochs);
    let mut model = SentimentCnn::with_rng(config, DIM, &mut rng)?;
    let mut gym = Gym::new(&mut model);
    let (duration, losses) = time(|| gym.train_epochs(eta, &train, epochs, &mut rng));
    let losses = losses?;
    if let (Some(first), Some(last)) = (losses.first(), losses.last()) {
        println!("L = {first:.06} -> {last:.06} in {duration:?}");
    }

    let training = gym.evaluate(&train)?;
    let held_out = gym.evaluate(&test)?;
    gym.finish();
    println!("training accuracy = {:.02}%", training.accuracy * 100.0);
    println!(
        "held-out accuracy = {:.02}% over {} samples",
        held_out.accuracy * 100.0,
        held_out.n_samples()
    );
    for (gold, row) in held_out.confusion.iter().enumerate() {
        println!("{}: {row:?}", model.config().class_name(gold));
    }
    println!("{}", model.output_params().pretty_print());
    Ok(())
}
