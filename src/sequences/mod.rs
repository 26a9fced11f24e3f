use alloc::vec::Vec;

use crate::error::{Result, WrapperError};

/// Token histories for a batch of beams, stored in two ping-pong buffers.
///
/// Each step copies the surviving beams' prefixes from the current buffer into
/// the other one in their new order, appends the next tokens, then swaps.
#[derive(Clone, Debug)]
pub struct Sequences {
    buffers: [Vec<i64>; 2],
    current: usize,
    batch_beam_size: usize,
    max_length: usize,
    length: usize,
}

impl Sequences {
    /// Start from equal-length rows (already padded or expanded for beams).
    pub fn new(rows: &[Vec<i64>], max_length: usize) -> Result<Self> {
        let batch_beam_size = rows.len();
        let length = rows.first().map(|r| r.len()).unwrap_or(0);
        if let Some(row) = rows.iter().find(|r| r.len() != length) {
            return Err(WrapperError::ShapeMismatch {
                what: "sequence length",
                expected: length,
                actual: row.len(),
            });
        }
        if length > max_length {
            return Err(WrapperError::SequenceFull { max_length });
        }
        let mut first = alloc::vec![0i64; batch_beam_size * max_length];
        for (i, row) in rows.iter().enumerate() {
            first[i * max_length..i * max_length + length].copy_from_slice(row);
        }
        let second = alloc::vec![0i64; batch_beam_size * max_length];
        Ok(Self {
            buffers: [first, second],
            current: 0,
            batch_beam_size,
            max_length,
            length,
        })
    }

    pub fn batch_beam_size(&self) -> usize {
        self.batch_beam_size
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Current length shared by every beam.
    pub fn sequence_length(&self) -> usize {
        self.length
    }

    pub fn sequence(&self, beam: usize) -> &[i64] {
        let start = beam * self.max_length;
        &self.buffers[self.current][start..start + self.length]
    }

    pub fn to_rows(&self) -> Vec<Vec<i64>> {
        (0..self.batch_beam_size).map(|i| self.sequence(i).to_vec()).collect()
    }

    /// Reorder beams by `beam_indices` and append `next_tokens`, one per slot.
    pub fn append_next_tokens(&mut self, beam_indices: &[i64], next_tokens: &[i64]) -> Result<()> {
        for (what, len) in [("beam_indices", beam_indices.len()), ("next_tokens", next_tokens.len())] {
            if len != self.batch_beam_size {
                return Err(WrapperError::ShapeMismatch {
                    what,
                    expected: self.batch_beam_size,
                    actual: len,
                });
            }
        }
        if self.length >= self.max_length {
            return Err(WrapperError::SequenceFull {
                max_length: self.max_length,
            });
        }
        if let Some(&bad) = beam_indices
            .iter()
            .find(|&&b| b < 0 || b as usize >= self.batch_beam_size)
        {
            return Err(WrapperError::SequenceIndexOutOfRange {
                index: bad,
                batch: self.batch_beam_size,
            });
        }

        let (lo, hi) = self.buffers.split_at_mut(1);
        let (input, output) = if self.current == 0 {
            (&lo[0], &mut hi[0])
        } else {
            (&hi[0], &mut lo[0])
        };
        let stride = self.max_length;
        let len = self.length;
        for (i, (&src, &tok)) in beam_indices.iter().zip(next_tokens).enumerate() {
            let src = src as usize * stride;
            output[i * stride..i * stride + len].copy_from_slice(&input[src..src + len]);
            output[i * stride + len] = tok;
        }

        self.length += 1;
        self.current = 1 - self.current;
        Ok(())
    }
}
