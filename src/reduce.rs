//! C4: transitive reduction of the unconditional portion of the DAG.
//!
//! Removes every unconditional edge `(u, v)` for which a longer
//! unconditional path from `u` to `v` already exists, while preserving every
//! conditional edge verbatim.

use fnv::FnvHashMap;

use crate::dag::{topological_sort, DagView, VertexId};

/// The reduced graph: for each vertex, the set of successors that survive
/// reduction (unconditional edges that have no longer unconditional
/// alternative path, plus every conditional edge, unchanged).
pub type ReducedGraph = FnvHashMap<VertexId, Vec<VertexId>>;

/// Computes the transitive reduction of `view`'s unconditional edges.
///
/// `O(V^2)` space and `O(V^2 * E_uncond)` time, which is acceptable because
/// `V` is the size of a single timestepper method (tens to low hundreds of
/// instructions).
pub fn transitive_reduction(view: &DagView) -> ReducedGraph {
    let n = view.len();
    let vertices: Vec<VertexId> = view.vertices().collect();
    let index_of: FnvHashMap<VertexId, usize> =
        vertices.iter().enumerate().map(|(i, v)| (*v, i)).collect();

    let mut order = topological_sort(view);
    order.reverse(); // forward-execution order, per C4 step 1.

    // longest_path[u][v]: longest unconditional u -> v path length, -1 if
    // none is known yet, 0 on the diagonal.
    let mut longest_path = vec![vec![-1i64; n]; n];
    for (i, _) in vertices.iter().enumerate() {
        longest_path[i][i] = 0;
    }

    for (i, &u) in order.iter().enumerate() {
        let ui = index_of[&u];
        for &w in &order[i..] {
            let wi = index_of[&w];
            if longest_path[ui][wi] >= 0 {
                for &s in view.get_unconditional_edges(w) {
                    let si = index_of[&s];
                    let candidate = 1 + longest_path[ui][wi];
                    if candidate > longest_path[ui][si] {
                        longest_path[ui][si] = candidate;
                    }
                }
            }
        }
    }

    let mut reduced: ReducedGraph = FnvHashMap::with_capacity_and_hasher(n, Default::default());
    let mut dropped = 0usize;
    for &u in &vertices {
        let ui = index_of[&u];
        let uncond = view.get_unconditional_edges(u);
        let mut kept: Vec<VertexId> = uncond
            .iter()
            .filter(|&&v| longest_path[ui][index_of[&v]] == 1)
            .copied()
            .collect();
        dropped += uncond.len() - kept.len();
        kept.extend(view.get_conditional_edges(u).iter().copied());
        reduced.insert(u, kept);
    }
    log::debug!("transitive reduction dropped {dropped} redundant unconditional edges");
    reduced
}
