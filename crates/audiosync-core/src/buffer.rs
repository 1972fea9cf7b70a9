//! Fixed-capacity, append-only sample storage with snapshot reads.
//!
//! Each stream gets one buffer, split into a write half and a read half:
//! the producer owns the [`BufferWriter`] (the only appender), while the
//! matcher holds a [`BufferReader`] and takes owned snapshots of finalized
//! prefixes. Samples below the current length are never mutated again, so
//! a snapshot stays valid for the whole match attempt regardless of what
//! the producer appends afterwards.
//!
//! The watermark the matcher actually waits on lives in the
//! [`Coordinator`](crate::coordinator::Coordinator); appends land here
//! first and are published there afterwards, so a published watermark
//! never exceeds the data a snapshot can deliver.

use parking_lot::RwLock;
use std::sync::Arc;

/// Errors from buffer operations.
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    /// An append would exceed the fixed capacity.
    #[error("append of {requested} samples exceeds capacity {capacity} ({len} already written)")]
    Overflow {
        /// Samples in the rejected append.
        requested: usize,
        /// Samples already written.
        len: usize,
        /// Fixed buffer capacity.
        capacity: usize,
    },

    /// A snapshot asked for more samples than have been finalized.
    #[error("snapshot of {requested} samples but only {available} are finalized")]
    ShortRead {
        /// Samples requested.
        requested: usize,
        /// Samples currently finalized.
        available: usize,
    },
}

struct Shared {
    capacity: usize,
    samples: RwLock<Vec<f32>>,
}

/// Create a buffer of the given capacity, split into its two halves.
///
/// Storage is allocated up front so appends never reallocate mid-run.
pub fn sample_buffer(capacity: usize) -> (BufferWriter, BufferReader) {
    let shared = Arc::new(Shared {
        capacity,
        samples: RwLock::new(Vec::with_capacity(capacity)),
    });
    (
        BufferWriter {
            shared: Arc::clone(&shared),
        },
        BufferReader { shared },
    )
}

/// The write half of a sample buffer. Not cloneable: exactly one producer
/// appends for the buffer's whole lifetime.
pub struct BufferWriter {
    shared: Arc<Shared>,
}

impl BufferWriter {
    /// Append a chunk of mono samples, returning the new length.
    pub fn append(&mut self, chunk: &[f32]) -> Result<usize, BufferError> {
        let mut samples = self.shared.samples.write();
        if samples.len() + chunk.len() > self.shared.capacity {
            return Err(BufferError::Overflow {
                requested: chunk.len(),
                len: samples.len(),
                capacity: self.shared.capacity,
            });
        }
        samples.extend_from_slice(chunk);
        Ok(samples.len())
    }

    /// Samples written so far.
    pub fn len(&self) -> usize {
        self.shared.samples.read().len()
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity still unwritten.
    pub fn remaining(&self) -> usize {
        self.shared.capacity - self.len()
    }

    /// Fixed capacity in samples.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

/// The read half of a sample buffer.
#[derive(Clone)]
pub struct BufferReader {
    shared: Arc<Shared>,
}

impl BufferReader {
    /// Take an owned copy of the first `n` finalized samples.
    ///
    /// The caller is expected to have observed a watermark of at least `n`
    /// before asking; a larger request is a [`BufferError::ShortRead`].
    pub fn snapshot(&self, n: usize) -> Result<Vec<f32>, BufferError> {
        let samples = self.shared.samples.read();
        if n > samples.len() {
            return Err(BufferError::ShortRead {
                requested: n,
                available: samples.len(),
            });
        }
        Ok(samples[..n].to_vec())
    }

    /// Samples finalized so far.
    pub fn len(&self) -> usize {
        self.shared.samples.read().len()
    }

    /// Whether nothing has been finalized yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fixed capacity in samples.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_advances_length() {
        let (mut writer, reader) = sample_buffer(8);
        assert_eq!(writer.append(&[1.0, 2.0, 3.0]).unwrap(), 3);
        assert_eq!(writer.append(&[4.0]).unwrap(), 4);
        assert_eq!(reader.len(), 4);
        assert_eq!(writer.remaining(), 4);
    }

    #[test]
    fn test_overflow_rejected_without_partial_write() {
        let (mut writer, reader) = sample_buffer(4);
        writer.append(&[1.0, 2.0, 3.0]).unwrap();
        let err = writer.append(&[4.0, 5.0]).unwrap_err();
        assert!(matches!(
            err,
            BufferError::Overflow {
                requested: 2,
                len: 3,
                capacity: 4
            }
        ));
        // The rejected chunk must not have landed partially.
        assert_eq!(reader.len(), 3);
        assert_eq!(reader.snapshot(3).unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_snapshot_prefix_is_stable_across_appends() {
        let (mut writer, reader) = sample_buffer(16);
        writer.append(&[1.0, 2.0]).unwrap();
        let before = reader.snapshot(2).unwrap();
        writer.append(&[3.0, 4.0]).unwrap();
        let after = reader.snapshot(2).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_short_read() {
        let (mut writer, reader) = sample_buffer(8);
        writer.append(&[1.0]).unwrap();
        assert!(matches!(
            reader.snapshot(2),
            Err(BufferError::ShortRead {
                requested: 2,
                available: 1
            })
        ));
    }

    #[test]
    fn test_reader_clones_share_storage() {
        let (mut writer, reader) = sample_buffer(8);
        let other = reader.clone();
        writer.append(&[9.0]).unwrap();
        assert_eq!(other.snapshot(1).unwrap(), vec![9.0]);
    }
}
