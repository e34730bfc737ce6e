//! Core parts of the engine without abstraction: buffers and parameter owners.

pub mod arena;
pub mod embedding_table;
pub mod param_buffer;

pub use arena::{BufferArena, BufferId, BufferSlice, Port};
pub use embedding_table::EmbeddingTable;
pub use param_buffer::{LinearId, LinearParams, ParamId, ParamStore, TableId};

/// Everything a layer reads and writes outside of its own struct.
#[derive(Debug, Default)]
pub struct Storage {
    pub arena: BufferArena,
    pub params: ParamStore,
}

impl Storage {
    pub fn new() -> Self {
        Self::default()
    }
}
