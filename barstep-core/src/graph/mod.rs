//! Computation graph — nodes that derive lines from lines.
//!
//! Nodes are declared through [`GraphBuilder`], which can only reference
//! lines that already exist, so the graph is acyclic by construction.
//! [`Graph::recompute`] runs once per step in the cached topological order:
//!
//! - clock advanced → commit the node state and append a slot;
//! - clock's open slot updated (replay) → restore the committed state and
//!   rewrite the slot;
//! - clock idle → nothing.
//!
//! A node whose output would still be shorter than its minimum period
//! writes `NaN` without evaluating its operation.

pub mod builder;
pub mod operation;

pub use builder::{GraphBuilder, NodeHandle};
pub use operation::{Comparison, OpState, Operation};

use crate::domain::{FeedId, LineId, NodeId};
use crate::line::{LineStore, SlotChange};
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("unknown line {0}")]
    UnknownLine(LineId),

    #[error("{op} takes {expected} inputs, got {got}")]
    Arity {
        op: String,
        expected: usize,
        got: usize,
    },

    #[error("{op} mixes inputs on clocks {first} and {second}")]
    MixedClocks {
        op: String,
        first: FeedId,
        second: FeedId,
    },

    #[error("invalid parameter for {op}: {reason}")]
    InvalidParameter { op: String, reason: String },

    #[error("dependency cycle among nodes {0:?}")]
    Cycle(Vec<NodeId>),

    #[error("{node} ({op}) failed: {reason}")]
    Computation {
        node: NodeId,
        op: String,
        reason: String,
    },
}

/// One computation node.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub op: Operation,
    pub inputs: Vec<LineId>,
    pub outputs: Vec<LineId>,
    pub clock: FeedId,
    pub min_period: usize,
    state: OpState,
    committed: OpState,
}

impl Node {
    fn new(
        id: NodeId,
        op: Operation,
        inputs: Vec<LineId>,
        outputs: Vec<LineId>,
        clock: FeedId,
        min_period: usize,
    ) -> Self {
        let state = op.initial_state();
        Self {
            id,
            op,
            inputs,
            outputs,
            clock,
            min_period,
            committed: state.clone(),
            state,
        }
    }

    fn fail(&self, reason: impl Into<String>) -> GraphError {
        GraphError::Computation {
            node: self.id,
            op: self.op.name(),
            reason: reason.into(),
        }
    }

    fn step(&mut self, store: &mut LineStore, change: SlotChange) -> Result<(), GraphError> {
        let current_len = store
            .get(self.outputs[0])
            .map_err(|e| self.fail(e.to_string()))?
            .len();
        let len_after = match change {
            SlotChange::Carried => return Ok(()),
            SlotChange::Appended => {
                self.committed = self.state.clone();
                current_len + 1
            }
            SlotChange::Updated => {
                if current_len == 0 {
                    return Err(self.fail("update before the first slot"));
                }
                self.state = self.committed.clone();
                current_len
            }
        };

        let mut values = vec![f64::NAN; self.outputs.len()];
        if len_after >= self.min_period {
            let inputs = self
                .inputs
                .iter()
                .map(|id| store.get(*id))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| self.fail(e.to_string()))?;
            self.op
                .evaluate(&inputs, &mut self.state, &mut values)
                .map_err(|reason| self.fail(reason))?;
        }

        for (id, value) in self.outputs.iter().zip(values) {
            let line = store.get_mut(*id).map_err(|e| self.fail(e.to_string()))?;
            match change {
                SlotChange::Appended => line.append(value),
                _ => line.overwrite(value).map_err(|e| self.fail(e.to_string()))?,
            }
        }
        Ok(())
    }
}

/// Built graph with its cached evaluation order.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    order: Vec<NodeId>,
}

impl Graph {
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Bring every node up to date with this step's clock changes.
    /// `changes[i]` is what happened on clock `FeedId(i)`.
    pub fn recompute(
        &mut self,
        store: &mut LineStore,
        changes: &[SlotChange],
    ) -> Result<(), GraphError> {
        for &NodeId(index) in &self.order {
            let node = &mut self.nodes[index];
            let change = changes.get(node.clock.0).copied().unwrap_or_default();
            trace!(node = %node.id, op = %node.op.name(), ?change, "recompute");
            node.step(store, change)?;
        }
        Ok(())
    }
}
