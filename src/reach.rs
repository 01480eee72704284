//! C3: extracts the sub-DAG of instructions a set of dependency roots needs
//! in order to run (the roots' transitive dependencies), not the instructions
//! that depend on them.

use std::collections::HashSet;

use crate::dag::{DagView, VertexId};
use crate::instruction::Instruction;

/// Returns every instruction `roots` transitively depends on (conditionally
/// or unconditionally), plus `roots` themselves: the portion of the DAG
/// necessary to satisfy them.
///
/// Walks `depends_on` (the reverse of [`DagView::successors`]): a root is
/// satisfied only once everything it depends on has run, so the needed
/// sub-DAG is the roots' transitive *dependencies*, not their dependents.
///
/// Returns an empty vector if `roots` is empty, without inspecting `view`
/// further.
pub fn extract(view: &DagView, roots: &[VertexId]) -> Vec<Instruction> {
    if roots.is_empty() {
        return Vec::new();
    }
    let mut stack: Vec<VertexId> = roots.to_vec();
    let mut reachable: HashSet<VertexId> = HashSet::with_capacity(view.len());
    while let Some(top) = stack.pop() {
        if reachable.insert(top) {
            for &dep in view.dependencies(top) {
                stack.push(dep);
            }
        }
    }
    log::debug!(
        "extracted {} instructions reachable from {} roots",
        reachable.len(),
        roots.len(),
    );
    reachable
        .into_iter()
        .map(|v| view.get_instruction(v).clone())
        .collect()
}
