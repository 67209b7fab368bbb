//! Graph compilation ahead of activation.
//!
//! Compilation never changes the graph. It rejects wiring that could
//! deadlock (a cycle made only of blocking connections), lists optional
//! inputs nobody feeds, and computes an upstream-first ordering used for
//! diagnostics.

use crate::pipeline::component::Component;
use crate::pipeline::graph::ConnectionGraph;
use crate::pipeline::id::ComponentId;
use std::collections::{HashMap, VecDeque};

/// Result of compiling the graph.
#[derive(Debug, Clone, Default)]
pub struct GraphPlan {
    /// Component names along a cycle of blocking connections, first name
    /// repeated at the end.
    pub blocking_cycle: Option<Vec<String>>,
    /// `component.port` of inputs without any connection.
    pub unconnected_inputs: Vec<String>,
    /// Components ordered upstream first. Components on a cycle are appended
    /// in declaration order.
    pub dataflow_order: Vec<ComponentId>,
    /// Graph generation this plan was compiled from.
    pub generation: u64,
    pub stats: PlanStats,
}

/// Statistics about the compiled graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanStats {
    /// Number of components in the graph
    pub components: usize,

    /// Number of live connections
    pub connections: usize,

    /// Connections with the Block overflow policy
    pub blocking_connections: usize,

    /// Components with outputs but no connected inputs
    pub source_components: usize,

    /// Components with connected inputs but no connected outputs
    pub sink_components: usize,

    /// Compilation time in microseconds
    pub compile_time_us: u64,
}

/// Compiles the component set and connection graph into a `GraphPlan`
pub struct GraphCompiler;

impl GraphCompiler {
    pub fn compile(components: &[&Component], graph: &ConnectionGraph) -> GraphPlan {
        let start_time = std::time::Instant::now();

        let index: HashMap<ComponentId, usize> = components
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id(), i))
            .collect();
        let n = components.len();

        let mut fwd_adj = vec![Vec::new(); n];
        let mut blocking_adj = vec![Vec::new(); n];
        let mut in_degree = vec![0usize; n];
        let mut has_in = vec![false; n];
        let mut has_out = vec![false; n];
        let mut blocking_connections = 0;

        for conn in graph.iter() {
            let (Some(&from), Some(&to)) =
                (index.get(&conn.source()), index.get(&conn.destination()))
            else {
                continue;
            };
            fwd_adj[from].push(to);
            in_degree[to] += 1;
            has_out[from] = true;
            has_in[to] = true;
            if conn.is_blocking() {
                blocking_adj[from].push(to);
                blocking_connections += 1;
            }
        }

        let blocking_cycle = Self::find_cycle(&blocking_adj).map(|cycle| {
            cycle
                .into_iter()
                .map(|i| components[i].name().to_string())
                .collect()
        });

        let dataflow_order = Self::topological_order(&fwd_adj, in_degree)
            .into_iter()
            .map(|i| components[i].id())
            .collect();

        let unconnected_inputs = components
            .iter()
            .flat_map(|c| {
                c.ports()
                    .inputs()
                    .filter(|p| !p.is_connected())
                    .map(move |p| format!("{}.{}", c.name(), p.name()))
            })
            .collect();

        let stats = PlanStats {
            components: n,
            connections: graph.len(),
            blocking_connections,
            source_components: (0..n)
                .filter(|&i| has_out[i] && !has_in[i])
                .count(),
            sink_components: (0..n).filter(|&i| has_in[i] && !has_out[i]).count(),
            compile_time_us: start_time.elapsed().as_micros() as u64,
        };

        GraphPlan {
            blocking_cycle,
            unconnected_inputs,
            dataflow_order,
            generation: graph.generation(),
            stats,
        }
    }

    /// Kahn's algorithm; nodes left over (cycles) keep declaration order.
    fn topological_order(fwd_adj: &[Vec<usize>], mut in_degree: Vec<usize>) -> Vec<usize> {
        let n = fwd_adj.len();
        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut placed = vec![false; n];
        let mut order = Vec::with_capacity(n);

        while let Some(node) = queue.pop_front() {
            placed[node] = true;
            order.push(node);
            for &next in &fwd_adj[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        order.extend((0..n).filter(|&i| !placed[i]));
        order
    }

    /// Depth-first search for a back edge. Returns the cycle path with the
    /// first node repeated at the end.
    fn find_cycle(adj: &[Vec<usize>]) -> Option<Vec<usize>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }

        let n = adj.len();
        let mut mark = vec![Mark::White; n];

        for root in 0..n {
            if mark[root] != Mark::White {
                continue;
            }
            // (node, next edge index)
            let mut stack = vec![(root, 0usize)];
            mark[root] = Mark::Grey;

            while let Some(top) = stack.last_mut() {
                let node = top.0;
                let next = adj[node].get(top.1).copied();
                top.1 += 1;
                if let Some(next) = next {
                    match mark[next] {
                        Mark::White => {
                            mark[next] = Mark::Grey;
                            stack.push((next, 0));
                        }
                        Mark::Grey => {
                            let start = stack.iter().position(|&(n, _)| n == next)?;
                            let mut cycle: Vec<usize> =
                                stack[start..].iter().map(|&(n, _)| n).collect();
                            cycle.push(next);
                            return Some(cycle);
                        }
                        Mark::Black => {}
                    }
                } else {
                    mark[node] = Mark::Black;
                    stack.pop();
                }
            }
        }
        None
    }
}
