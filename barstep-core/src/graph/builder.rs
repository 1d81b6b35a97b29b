use super::{Graph, GraphError, Node, Operation};
use crate::domain::{FeedId, LineId, NodeId};
use crate::line::LineStore;
use std::collections::{BTreeSet, HashMap};

/// Handle returned for every declared node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeHandle {
    pub id: NodeId,
    pub outputs: Vec<LineId>,
}

impl NodeHandle {
    /// First (usually only) output line.
    pub fn line(&self) -> LineId {
        self.outputs[0]
    }

    pub fn output(&self, index: usize) -> Option<LineId> {
        self.outputs.get(index).copied()
    }
}

/// Declares nodes against a [`LineStore`] and freezes them into a [`Graph`].
#[derive(Debug, Default)]
pub struct GraphBuilder {
    store: LineStore,
    nodes: Vec<Node>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: LineStore) -> Self {
        Self {
            store,
            nodes: Vec::new(),
        }
    }

    pub fn store(&self) -> &LineStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut LineStore {
        &mut self.store
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Declare a node computing `op` over `inputs`.
    ///
    /// Validates parameters, arity, input existence and that all inputs share
    /// one clock. The node's minimum period is the largest input minimum
    /// period plus the operation's own lookback; its output lines inherit
    /// the inputs' clock.
    pub fn add(&mut self, op: Operation, inputs: &[LineId]) -> Result<NodeHandle, GraphError> {
        let name = op.name();
        if let Some(reason) = op.invalid_reason() {
            return Err(GraphError::InvalidParameter { op: name, reason });
        }
        if inputs.len() != op.arity() {
            return Err(GraphError::Arity {
                op: name,
                expected: op.arity(),
                got: inputs.len(),
            });
        }

        let mut clock: Option<FeedId> = None;
        let mut input_min = 0;
        for &id in inputs {
            let line = self.store.get(id).map_err(|_| GraphError::UnknownLine(id))?;
            match clock {
                None => clock = Some(line.clock()),
                Some(first) if first != line.clock() => {
                    return Err(GraphError::MixedClocks {
                        op: name,
                        first,
                        second: line.clock(),
                    })
                }
                Some(_) => {}
            }
            input_min = input_min.max(line.min_period());
        }
        let clock = clock.ok_or_else(|| GraphError::Arity {
            op: name.clone(),
            expected: op.arity(),
            got: 0,
        })?;

        let min_period = input_min + op.extra_lookback();
        let id = NodeId(self.nodes.len());
        let outputs: Vec<LineId> = match op.outputs() {
            [_single] => vec![self.store.add(name.clone(), clock, min_period)],
            many => many
                .iter()
                .map(|out| self.store.add(format!("{name}.{out}"), clock, min_period))
                .collect(),
        };

        self.nodes.push(Node::new(
            id,
            op,
            inputs.to_vec(),
            outputs.clone(),
            clock,
            min_period,
        ));
        Ok(NodeHandle { id, outputs })
    }

    /// Freeze the declared nodes. Computes the evaluation order once
    /// (Kahn's algorithm, ties broken by declaration order).
    pub fn build(self) -> Result<(Graph, LineStore), GraphError> {
        let order = topological_order(&self.nodes)?;
        Ok((
            Graph {
                nodes: self.nodes,
                order,
            },
            self.store,
        ))
    }
}

fn topological_order(nodes: &[Node]) -> Result<Vec<NodeId>, GraphError> {
    let producer: HashMap<LineId, usize> = nodes
        .iter()
        .enumerate()
        .flat_map(|(i, n)| n.outputs.iter().map(move |out| (*out, i)))
        .collect();

    let mut indegree = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        let mut parents: Vec<usize> = node
            .inputs
            .iter()
            .filter_map(|line| producer.get(line).copied())
            .collect();
        parents.sort_unstable();
        parents.dedup();
        for p in parents {
            indegree[i] += 1;
            dependents[p].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..nodes.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());
    while let Some(next) = ready.pop_first() {
        order.push(NodeId(next));
        for &d in &dependents[next] {
            indegree[d] -= 1;
            if indegree[d] == 0 {
                ready.insert(d);
            }
        }
    }

    if order.len() != nodes.len() {
        let stuck = (0..nodes.len())
            .filter(|&i| indegree[i] > 0)
            .map(NodeId)
            .collect();
        return Err(GraphError::Cycle(stuck));
    }
    Ok(order)
}
