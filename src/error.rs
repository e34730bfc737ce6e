use std::io;

use thiserror::Error;

/// Errors raised while wiring or feeding a network.
///
/// All of these are precondition violations on the caller's side; nothing in this crate retries.
#[derive(Debug, Error)]
pub enum Error {
    #[error("the lengths of linked layers do not match (expected {expected}, found {found})")]
    LengthMismatch { expected: usize, found: usize },

    #[error("layer has no input slot {slot} (it has {n_slots})")]
    InvalidSlot { slot: usize, n_slots: usize },

    #[error("{0} layers cannot be the target of a link")]
    NotLinkable(&'static str),

    #[error("expected a {expected} layer, found a {found} layer")]
    WrongLayerKind {
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid layer shape: {0}")]
    InvalidShape(String),

    #[error("input of {n_elements} elements is shorter than a window of {window_dim}")]
    InputTooShort { n_elements: usize, window_dim: usize },

    #[error("input length {len} is not a multiple of the element dimension {element_dim}")]
    RaggedInput { len: usize, element_dim: usize },

    #[error("word id {id} is outside of a vocabulary of {vocab_size}")]
    UnknownWordId { id: usize, vocab_size: usize },

    #[error("embedding table does not match (expected {expected} rows of {length}, found {found})")]
    EmbeddingShape {
        expected: usize,
        length: usize,
        found: usize,
    },

    #[error("label {label} is out of range for {n_classes} classes")]
    InvalidLabel { label: usize, n_classes: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
