//! Logical fixed-size slicing of a source file.
//!
//! Nothing is materialized: a [`FileSlices`] is just arithmetic over
//! `(size, chunk)`, and each [`Slice`] names a byte range the uploader reads
//! on demand.

#[derive(Debug, Clone, Copy)]
pub struct FileSlices {
    size: u64,
    chunk: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slice {
    pub index: u64,
    pub offset: u64,
    pub len: u64,
}

impl FileSlices {
    /// A zero `chunk` is clamped to one byte rather than dividing by zero.
    pub fn new(size: u64, chunk: u64) -> Self {
        Self {
            size,
            chunk: chunk.max(1),
        }
    }

    pub fn count(&self) -> u64 {
        self.size.div_ceil(self.chunk)
    }

    pub fn slice(&self, index: u64) -> Option<Slice> {
        if index >= self.count() {
            return None;
        }
        let offset = index * self.chunk;
        Some(Slice {
            index,
            offset,
            len: self.chunk.min(self.size - offset),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Slice> + '_ {
        (0..self.count()).filter_map(move |i| self.slice(i))
    }
}
