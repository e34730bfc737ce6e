use crate::{
    Error, Result,
    core::{BufferArena, Port, Storage, TableId},
    layers::Binding,
};

/// Embedding lookup over a fixed number of slots.
///
/// A slot holding `None` is an unknown word: it yields a zero vector and receives no gradient.
#[derive(Debug)]
pub struct Lookup {
    table: TableId,
    embedding_length: usize,
    ids: Vec<Option<usize>>,
    output: Binding,
}

impl Lookup {
    pub fn new(storage: &mut Storage, vocab_size: usize, embedding_length: usize, n_slots: usize) -> Self {
        let table = storage.params.add_table(vocab_size, embedding_length);
        Self::with_table(storage, table, n_slots)
    }

    fn with_table(storage: &mut Storage, table: TableId, n_slots: usize) -> Self {
        let embedding_length = storage.params.table(table).embedding_length();
        Self {
            table,
            embedding_length,
            ids: vec![None; n_slots],
            output: Binding::alloc(&mut storage.arena, embedding_length * n_slots),
        }
    }

    pub fn table(&self) -> TableId {
        self.table
    }

    pub fn n_slots(&self) -> usize {
        self.ids.len()
    }

    pub fn ids(&self) -> &[Option<usize>] {
        &self.ids
    }

    pub fn set_input(&mut self, storage: &Storage, ids: &[Option<usize>]) -> Result<()> {
        if ids.len() != self.ids.len() {
            return Err(Error::LengthMismatch {
                expected: self.ids.len(),
                found: ids.len(),
            });
        }
        let vocab_size = storage.params.table(self.table).vocab_size();
        if let Some(&id) = ids.iter().flatten().find(|&&id| id >= vocab_size) {
            return Err(Error::UnknownWordId { id, vocab_size });
        }
        self.ids.copy_from_slice(ids);
        Ok(())
    }

    pub fn forward(&self, storage: &mut Storage) {
        let Storage { arena, params } = storage;
        let table = params.table(self.table);
        let y = arena.get_mut(self.output.port.value);
        for (slot, id) in y.chunks_exact_mut(self.embedding_length).zip(&self.ids) {
            match id {
                Some(id) => slot.copy_from_slice(table.row(*id)),
                None => bytemuck::fill_zeroes(slot),
            }
        }
    }

    pub fn backward(&self, storage: &mut Storage) {
        let Storage { arena, params } = storage;
        let table = params.table_mut(self.table);
        let dy = arena.get(self.output.port.grad);
        for (grad, id) in dy.chunks_exact(self.embedding_length).zip(&self.ids) {
            if let Some(id) = id {
                table.accumulate(*id, grad);
            }
        }
    }

    /// `update` with unit-norm re-projection of every touched row.
    pub fn update_normalized(&self, storage: &mut Storage, eta: f64) {
        storage.params.table_mut(self.table).update(eta, true);
    }

    pub fn clear_grad(&self, arena: &mut BufferArena) {
        arena.zero(self.output.port.grad);
    }

    pub fn output_port(&self) -> Port {
        self.output.port
    }

    pub fn link_output(&mut self, arena: &mut BufferArena, port: Port) -> Result<()> {
        self.output.rebind(arena, port)
    }

    pub fn clone_with_tied_params(&self, storage: &mut Storage) -> Self {
        Self::with_table(storage, self.table, self.ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(storage: &mut Storage) -> Lookup {
        let lookup = Lookup::new(storage, 3, 2, 3);
        storage
            .params
            .table_mut(lookup.table())
            .set_embeddings(&[[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]])
            .unwrap();
        lookup
    }

    #[test]
    fn forward_concatenates_rows_and_zeroes_unknown_slots() {
        let mut storage = Storage::new();
        let mut lookup = lookup(&mut storage);
        lookup.set_input(&storage, &[Some(2), None, Some(0)]).unwrap();
        lookup.forward(&mut storage);
        assert_eq!(
            storage.arena.get(lookup.output_port().value),
            &[5.0, 6.0, 0.0, 0.0, 1.0, 2.0]
        );
    }

    #[test]
    fn rejects_out_of_vocabulary_ids() {
        let mut storage = Storage::new();
        let mut lookup = lookup(&mut storage);
        assert!(matches!(
            lookup.set_input(&storage, &[Some(3), None, None]),
            Err(Error::UnknownWordId { id: 3, vocab_size: 3 })
        ));
        assert!(lookup.set_input(&storage, &[None, None]).is_err());
    }

    #[test]
    fn unknown_slots_get_no_gradient() {
        let mut storage = Storage::new();
        let mut lookup = lookup(&mut storage);
        lookup.set_input(&storage, &[None, Some(1), None]).unwrap();
        lookup.forward(&mut storage);
        storage.arena.write(lookup.output_port().grad, &[1.0; 6]);
        lookup.backward(&mut storage);
        let table = storage.params.table(lookup.table());
        assert_eq!(table.n_pending(), 1);
        assert_eq!(table.pending_grad(1), Some(&[1.0, 1.0][..]));
    }

    #[test]
    fn normalized_update_keeps_rows_in_the_unit_ball() {
        let mut storage = Storage::new();
        let mut lookup = lookup(&mut storage);
        lookup.set_input(&storage, &[Some(0), None, None]).unwrap();
        lookup.forward(&mut storage);
        storage.arena.write(lookup.output_port().grad, &[2.0, 2.0, 9.0, 9.0, 9.0, 9.0]);
        lookup.backward(&mut storage);
        lookup.update_normalized(&mut storage, 1.0);
        let row = storage.params.table(lookup.table()).row(0);
        let norm = row.iter().map(|p| p * p).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-12);
        assert!((row[0] / row[1] - 3.0 / 4.0).abs() < 1e-12);
    }

    #[test]
    fn tied_clones_share_the_table() {
        let mut storage = Storage::new();
        let lookup = lookup(&mut storage);
        let mut clone = lookup.clone_with_tied_params(&mut storage);
        clone.set_input(&storage, &[Some(1), Some(1), Some(1)]).unwrap();
        clone.forward(&mut storage);
        assert_eq!(storage.arena.get(clone.output_port().value), &[3.0, 4.0, 3.0, 4.0, 3.0, 4.0]);
        assert_eq!(storage.params.n_tables(), 1);
    }
}
