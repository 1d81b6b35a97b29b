//! Lines — named, clocked buffers and the arena that owns them.
//!
//! - [`Buffer`]: append-only `f64` storage with relative reads.
//! - [`Line`]: a buffer plus its minimum period and owning clock.
//! - [`LineStore`]: arena of all lines; everything else holds [`LineId`]s.
//! - [`LineView`]: read-only handle given to strategies; refuses reads
//!   until the line is ready.

pub mod buffer;

pub use buffer::Buffer;

use crate::domain::{FeedId, LineId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LineError {
    #[error("offset {ago} is out of range for a line of length {len}")]
    OutOfRange { ago: isize, len: usize },

    #[error("line '{name}' is not ready ({len} of {min_period} values)")]
    NotReady {
        name: String,
        len: usize,
        min_period: usize,
    },

    #[error("unknown line {0}")]
    UnknownLine(LineId),
}

/// What a clock did to its lines' slots on one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum SlotChange {
    /// No new data; lines keep their current slot.
    #[default]
    Carried,
    /// A new slot was appended.
    Appended,
    /// The current, still-open slot was rewritten.
    Updated,
}

/// Uniform relative-offset read access.
pub trait Series {
    fn len(&self) -> usize;

    /// Value `ago` slots back from the current one (`ago <= 0`).
    fn get(&self, ago: isize) -> Result<f64, LineError>;

    /// The last `n` values, oldest first.
    fn window(&self, n: usize) -> Result<&[f64], LineError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn current(&self) -> Result<f64, LineError> {
        self.get(0)
    }
}

/// A named buffer with a readiness threshold and the clock that drives it.
#[derive(Debug, Clone)]
pub struct Line {
    name: String,
    buffer: Buffer,
    min_period: usize,
    clock: FeedId,
}

impl Line {
    pub fn new(name: impl Into<String>, clock: FeedId, min_period: usize) -> Self {
        Self {
            name: name.into(),
            buffer: Buffer::new(),
            min_period: min_period.max(1),
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn clock(&self) -> FeedId {
        self.clock
    }

    pub fn min_period(&self) -> usize {
        self.min_period
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_ready(&self) -> bool {
        self.buffer.len() >= self.min_period
    }

    pub fn get(&self, ago: isize) -> Result<f64, LineError> {
        self.buffer.get(ago)
    }

    pub fn window(&self, n: usize) -> Result<&[f64], LineError> {
        self.buffer.window(n)
    }

    pub fn append(&mut self, value: f64) {
        self.buffer.append(value);
    }

    /// Rewrite the current slot. Only for slots that are still open
    /// (replayed bars and the nodes clocked on them).
    pub fn overwrite(&mut self, value: f64) -> Result<(), LineError> {
        self.buffer.set(value)
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    /// Read-only view for strategies.
    pub fn view(&self) -> LineView<'_> {
        LineView { line: self }
    }
}

impl Series for Line {
    fn len(&self) -> usize {
        Line::len(self)
    }

    fn get(&self, ago: isize) -> Result<f64, LineError> {
        Line::get(self, ago)
    }

    fn window(&self, n: usize) -> Result<&[f64], LineError> {
        Line::window(self, n)
    }
}

/// Read-only view over a line. Reads fail with `NotReady` until the line
/// has reached its minimum period.
#[derive(Debug, Clone, Copy)]
pub struct LineView<'a> {
    line: &'a Line,
}

impl<'a> LineView<'a> {
    pub fn name(&self) -> &'a str {
        self.line.name()
    }

    pub fn is_ready(&self) -> bool {
        self.line.is_ready()
    }

    fn ensure_ready(&self) -> Result<(), LineError> {
        if self.line.is_ready() {
            Ok(())
        } else {
            Err(LineError::NotReady {
                name: self.line.name.clone(),
                len: self.line.len(),
                min_period: self.line.min_period,
            })
        }
    }
}

impl Series for LineView<'_> {
    fn len(&self) -> usize {
        self.line.len()
    }

    fn get(&self, ago: isize) -> Result<f64, LineError> {
        self.ensure_ready()?;
        self.line.get(ago)
    }

    fn window(&self, n: usize) -> Result<&[f64], LineError> {
        self.ensure_ready()?;
        self.line.window(n)
    }
}

/// Arena owning every line in a run.
#[derive(Debug, Clone, Default)]
pub struct LineStore {
    lines: Vec<Line>,
}

impl LineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, clock: FeedId, min_period: usize) -> LineId {
        let id = LineId(self.lines.len());
        self.lines.push(Line::new(name, clock, min_period));
        id
    }

    pub fn get(&self, id: LineId) -> Result<&Line, LineError> {
        self.lines.get(id.0).ok_or(LineError::UnknownLine(id))
    }

    pub fn get_mut(&mut self, id: LineId) -> Result<&mut Line, LineError> {
        self.lines.get_mut(id.0).ok_or(LineError::UnknownLine(id))
    }

    pub fn view(&self, id: LineId) -> Result<LineView<'_>, LineError> {
        self.get(id).map(Line::view)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Look a line up by name (first match in declaration order).
    pub fn find(&self, name: &str) -> Option<LineId> {
        self.lines.iter().position(|l| l.name == name).map(LineId)
    }
}
