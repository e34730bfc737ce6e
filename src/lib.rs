pub use faer;

mod activation;
mod config;
mod error;
mod gym;
mod layers;
mod model;
mod nn;
mod pretty_print;

pub mod core;
pub mod text;

pub use activation::*;
pub use config::*;
pub use error::*;
pub use gym::*;
pub use layers::*;
pub use model::*;
pub use nn::*;
pub use pretty_print::*;
