//! Buffer — the append-only value store behind every line.
//!
//! The cursor is always the last slot: bars only move forward, so there is
//! no way to rewind it. Relative reads use `ago <= 0` offsets (0 = current,
//! -1 = previous). Any positive offset would read the future and is refused
//! here, which makes this the single place the no-look-ahead rule lives.

use super::{LineError, Series};

/// Ordered `f64` values with `NaN` marking an unset slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Buffer {
    values: Vec<f64>,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Read relative to the cursor.
    pub fn get(&self, ago: isize) -> Result<f64, LineError> {
        let len = self.values.len();
        if ago > 0 || len == 0 {
            return Err(LineError::OutOfRange { ago, len });
        }
        let back = ago.unsigned_abs();
        if back >= len {
            return Err(LineError::OutOfRange { ago, len });
        }
        Ok(self.values[len - 1 - back])
    }

    /// Append a value and move the cursor onto it.
    pub fn append(&mut self, value: f64) {
        self.values.push(value);
    }

    /// Append an unset slot.
    pub fn advance(&mut self) {
        self.values.push(f64::NAN);
    }

    /// Write the current slot.
    pub fn set(&mut self, value: f64) -> Result<(), LineError> {
        match self.values.last_mut() {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(LineError::OutOfRange { ago: 0, len: 0 }),
        }
    }

    /// The last `n` values, oldest first.
    pub fn window(&self, n: usize) -> Result<&[f64], LineError> {
        let len = self.values.len();
        if n == 0 || n > len {
            return Err(LineError::OutOfRange {
                ago: -(n as isize - 1).max(0),
                len,
            });
        }
        Ok(&self.values[len - n..])
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}

impl Series for Buffer {
    fn len(&self) -> usize {
        Buffer::len(self)
    }

    fn get(&self, ago: isize) -> Result<f64, LineError> {
        Buffer::get(self, ago)
    }

    fn window(&self, n: usize) -> Result<&[f64], LineError> {
        Buffer::window(self, n)
    }
}
