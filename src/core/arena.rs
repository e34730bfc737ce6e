use std::{mem, ops::Range};

use derive_more::Display;

/// Handle of one buffer owned by a [`BufferArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("buffer#{_0}")]
pub struct BufferId(usize);

/// A view into a contiguous range of one arena buffer.
///
/// Two layers whose ports hold equal slices read and write the same numbers; this is how the
/// output of one layer becomes the input of the next without copying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSlice {
    pub id: BufferId,
    pub offset: usize,
    pub len: usize,
}

impl BufferSlice {
    pub fn range(self) -> Range<usize> {
        self.offset..self.offset + self.len
    }

    pub fn is_empty(self) -> bool {
        self.len == 0
    }

    /// A sub-range of this slice, `offset` being relative to the start of `self`.
    #[track_caller]
    pub fn sub(self, offset: usize, len: usize) -> Self {
        assert!(
            offset + len <= self.len,
            "sub-slice {offset}..{} out of a slice of {}",
            offset + len,
            self.len,
        );
        Self {
            id: self.id,
            offset: self.offset + offset,
            len,
        }
    }

    /// Whether both slices touch at least one common element.
    pub fn overlaps(self, other: Self) -> bool {
        self.id == other.id
            && self.offset < other.offset + other.len
            && other.offset < self.offset + self.len
    }
}

/// A value buffer paired with its gradient buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Port {
    pub value: BufferSlice,
    pub grad: BufferSlice,
}

impl Port {
    pub fn len(self) -> usize {
        self.value.len
    }

    pub fn is_empty(self) -> bool {
        self.value.is_empty()
    }

    pub fn sub(self, offset: usize, len: usize) -> Self {
        Self {
            value: self.value.sub(offset, len),
            grad: self.grad.sub(offset, len),
        }
    }
}

/// Owner of every activation and gradient buffer of a network.
#[derive(Debug, Default)]
pub struct BufferArena {
    buffers: Vec<Box<[f64]>>,
    free: Vec<BufferId>,
}

impl BufferArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a zeroed buffer of `len` elements.
    pub fn alloc(&mut self, len: usize) -> BufferSlice {
        let buffer: Box<[f64]> = bytemuck::zeroed_slice_box(len);
        let id = match self.free.pop() {
            Some(id) => {
                self.buffers[id.0] = buffer;
                id
            }
            None => {
                self.buffers.push(buffer);
                BufferId(self.buffers.len() - 1)
            }
        };
        BufferSlice { id, offset: 0, len }
    }

    /// Allocates a value buffer and a gradient buffer of the same length.
    pub fn alloc_port(&mut self, len: usize) -> Port {
        Port {
            value: self.alloc(len),
            grad: self.alloc(len),
        }
    }

    /// Drops the storage of `id`. The handle may be handed out again by a later `alloc`.
    pub fn release(&mut self, id: BufferId) {
        self.buffers[id.0] = Box::default();
        self.free.push(id);
    }

    pub fn release_port(&mut self, port: Port) {
        self.release(port.value.id);
        self.release(port.grad.id);
    }

    /// Number of live buffers.
    pub fn n_buffers(&self) -> usize {
        self.buffers.len() - self.free.len()
    }

    #[track_caller]
    pub fn get(&self, slice: BufferSlice) -> &[f64] {
        &self.buffers[slice.id.0][slice.range()]
    }

    #[track_caller]
    pub fn get_mut(&mut self, slice: BufferSlice) -> &mut [f64] {
        &mut self.buffers[slice.id.0][slice.range()]
    }

    #[track_caller]
    pub fn write(&mut self, slice: BufferSlice, values: &[f64]) {
        self.get_mut(slice).copy_from_slice(values);
    }

    pub fn zero(&mut self, slice: BufferSlice) {
        bytemuck::fill_zeroes(self.get_mut(slice));
    }

    /// Runs `f` with `slice` borrowed mutably while the rest of the arena stays readable.
    ///
    /// The buffer holding `slice` is checked out for the duration of the call, so reading any
    /// part of that same buffer from inside `f` panics.
    #[track_caller]
    pub fn with_mut<R>(&mut self, slice: BufferSlice, f: impl FnOnce(&Self, &mut [f64]) -> R) -> R {
        let mut buffer = mem::take(&mut self.buffers[slice.id.0]);
        let result = f(self, &mut buffer[slice.range()]);
        self.buffers[slice.id.0] = buffer;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_is_zeroed() {
        let mut arena = BufferArena::new();
        let slice = arena.alloc(4);
        assert_eq!(arena.get(slice), &[0.0; 4]);
    }

    #[test]
    fn released_handles_are_reused() {
        let mut arena = BufferArena::new();
        let a = arena.alloc(2);
        let _b = arena.alloc(3);
        arena.release(a.id);
        assert_eq!(arena.n_buffers(), 1);
        let c = arena.alloc(5);
        assert_eq!(c.id, a.id);
        assert_eq!(arena.get(c).len(), 5);
    }

    #[test]
    fn sub_slices_alias_their_parent() {
        let mut arena = BufferArena::new();
        let whole = arena.alloc(6);
        let tail = whole.sub(3, 3);
        arena.write(tail, &[1.0, 2.0, 3.0]);
        assert_eq!(arena.get(whole), &[0.0, 0.0, 0.0, 1.0, 2.0, 3.0]);
        assert!(tail.overlaps(whole));
        assert!(!tail.overlaps(whole.sub(0, 3)));
    }

    #[test]
    fn with_mut_reads_other_buffers() {
        let mut arena = BufferArena::new();
        let src = arena.alloc(3);
        let dst = arena.alloc(3);
        arena.write(src, &[1.0, 2.0, 3.0]);
        arena.with_mut(dst, |arena, out| {
            for (y, x) in out.iter_mut().zip(arena.get(src)) {
                *y = x * 2.0;
            }
        });
        assert_eq!(arena.get(dst), &[2.0, 4.0, 6.0]);
    }

    #[test]
    #[should_panic]
    fn with_mut_rejects_reading_the_checked_out_buffer() {
        let mut arena = BufferArena::new();
        let whole = arena.alloc(4);
        arena.with_mut(whole.sub(0, 2), |arena, _| {
            let _ = arena.get(whole.sub(2, 2));
        });
    }
}
