//! C5: groups the reduced DAG's vertices into maximal straight-line blocks
//! and builds the block-level DAG that drives CFG emission.

use std::collections::HashSet;
use std::sync::Arc;

use fnv::FnvHashMap;

use crate::dag::{topological_sort_by, DagView, VertexId};
use crate::reduce::ReducedGraph;

/// An ordered, non-empty run of instructions that will be emitted as a
/// straight line of statements inside a single guard.
///
/// Cheaply clonable: blocks are shared between the block graph's keys,
/// values, and the instruction-to-block map, the same way the teacher shares
/// basic blocks behind an `Arc` rather than duplicating them.
pub type BlockRef = Arc<Block>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Block(Vec<VertexId>);

impl Block {
    pub fn head(&self) -> VertexId {
        self.0[0]
    }

    pub fn instructions(&self) -> &[VertexId] {
        &self.0
    }
}

/// The block-level DAG: each block's dependencies are the blocks owning the
/// *original* (pre-reduction) unconditional predecessors of its head
/// instruction.
pub type BlockGraph = FnvHashMap<BlockRef, Vec<BlockRef>>;

pub struct Partition {
    pub block_graph: BlockGraph,
    pub instruction_to_block: FnvHashMap<VertexId, BlockRef>,
}

/// Partitions `view`'s vertices (already reduced into `reduced`) into
/// maximal straight-line blocks.
///
/// A chain extends from `v` to its unique unconditional successor `w` in the
/// reduced graph as long as `w` also has `v` as its only unconditional
/// predecessor (the 1-in/1-out rule). Ties in extension order, which should
/// not arise under that rule, are broken by vertex number for
/// reproducibility.
pub fn partition(view: &DagView, reduced: &ReducedGraph) -> Partition {
    // Chaining must only follow *unconditional* reduced edges: `reduced`
    // itself carries conditional edges too (so the topological sort below
    // still respects branch ordering), but fusing a single-armed `If`'s
    // target into the same straight-line block as the `If` would erase the
    // branch entirely.
    let mut unconditional: FnvHashMap<VertexId, Vec<VertexId>> =
        FnvHashMap::with_capacity_and_hasher(reduced.len(), Default::default());
    for (&u, successors) in reduced {
        let conditional: HashSet<VertexId> =
            view.get_conditional_edges(u).iter().copied().collect();
        unconditional.insert(
            u,
            successors.iter().copied().filter(|s| !conditional.contains(s)).collect(),
        );
    }

    let mut inverse: FnvHashMap<VertexId, Vec<VertexId>> = view.vertices().map(|v| (v, Vec::new())).collect();
    for (&u, successors) in &unconditional {
        for &v in successors {
            inverse.entry(v).or_default().push(u);
        }
    }
    for preds in inverse.values_mut() {
        preds.sort();
    }

    let mut topo = topological_sort_by(view.vertices(), |v| {
        let mut succ = reduced.get(&v).cloned().unwrap_or_default();
        succ.sort();
        succ
    });

    let mut visited = vec![false; view.len()];
    let mut blocks: Vec<BlockRef> = Vec::new();
    let mut instruction_to_block: FnvHashMap<VertexId, BlockRef> = FnvHashMap::default();

    while let Some(start) = topo.pop() {
        if visited[start.index()] {
            continue;
        }
        visited[start.index()] = true;
        let mut members = vec![start];
        let mut current = start;
        loop {
            let successors = unconditional.get(&current).cloned().unwrap_or_default();
            if successors.len() != 1 {
                break;
            }
            let next = successors[0];
            let predecessors = &inverse[&next];
            if predecessors.len() != 1 {
                break;
            }
            visited[next.index()] = true;
            members.push(next);
            current = next;
        }
        let block: BlockRef = Arc::new(Block(members.clone()));
        for &m in &members {
            instruction_to_block.insert(m, block.clone());
        }
        blocks.push(block);
    }

    // A block's dependencies come from its head's own `depends_on`, not from
    // `reduced`/`get_unconditional_edges`: those give the *forward* direction
    // (what a vertex feeds into), while CFG assembly needs to know what must
    // run before a block, i.e. the head's direct predecessors.
    let mut block_graph: BlockGraph = FnvHashMap::with_capacity_and_hasher(blocks.len(), Default::default());
    for block in &blocks {
        let head = block.head();
        let head_instruction = view.get_instruction(head);
        let mut deps: Vec<BlockRef> = head_instruction
            .depends_on
            .iter()
            .filter_map(|id| view.get_number_for_id(id))
            .map(|p| instruction_to_block[&p].clone())
            .collect();
        deps.sort_by_key(|b| b.head());
        deps.dedup();
        block_graph.insert(block.clone(), deps);
    }

    log::debug!(
        "partitioned {} instructions into {} blocks",
        view.len(),
        block_graph.len(),
    );

    Partition {
        block_graph,
        instruction_to_block,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{Instruction, InstructionKind};
    use crate::reduce::transitive_reduction;

    fn view_of(instrs: Vec<Instruction>) -> DagView {
        DagView::new(instrs).unwrap()
    }

    #[test]
    fn linear_chain_becomes_one_block() {
        let view = view_of(vec![
            Instruction::new("a", [], InstructionKind::FailStep),
            Instruction::new("b", ["a".into()], InstructionKind::FailStep),
            Instruction::new("c", ["b".into()], InstructionKind::FailStep),
        ]);
        let reduced = transitive_reduction(&view);
        let part = partition(&view, &reduced);
        assert_eq!(part.block_graph.len(), 1);
        let block = part.block_graph.keys().next().unwrap();
        let ids: Vec<String> = block
            .instructions()
            .iter()
            .map(|v| view.get_id_for_number(*v).to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn diamond_yields_four_blocks() {
        let view = view_of(vec![
            Instruction::new("a", [], InstructionKind::FailStep),
            Instruction::new("b", ["a".into()], InstructionKind::FailStep),
            Instruction::new("c", ["a".into()], InstructionKind::FailStep),
            Instruction::new("d", ["b".into(), "c".into()], InstructionKind::FailStep),
        ]);
        let reduced = transitive_reduction(&view);
        let part = partition(&view, &reduced);
        assert_eq!(part.block_graph.len(), 4);
        let d = view.get_number_for_id(&"d".into()).unwrap();
        let d_block = &part.instruction_to_block[&d];
        let deps = &part.block_graph[d_block];
        assert_eq!(deps.len(), 2);
    }

    #[test]
    fn every_instruction_belongs_to_exactly_one_block() {
        let view = view_of(vec![
            Instruction::new("a", [], InstructionKind::FailStep),
            Instruction::new("b", ["a".into()], InstructionKind::FailStep),
            Instruction::new("c", ["a".into()], InstructionKind::FailStep),
            Instruction::new("d", ["b".into(), "c".into()], InstructionKind::FailStep),
        ]);
        let reduced = transitive_reduction(&view);
        let part = partition(&view, &reduced);
        assert_eq!(part.instruction_to_block.len(), view.len());
        for block in part.block_graph.keys() {
            assert!(!block.instructions().is_empty());
        }
    }

    #[test]
    fn single_armed_conditional_target_is_not_fused_into_the_if_block() {
        // `if` has only a `then` arm; `t` has exactly one predecessor (the
        // conditional edge from `if`), which used to satisfy the 1-in/1-out
        // chain rule and wrongly merge `if` and `t` into one block.
        use crate::instruction::Expr;
        use std::collections::BTreeSet;
        let view = view_of(vec![
            Instruction::new("a", [], InstructionKind::FailStep),
            Instruction::new(
                "if",
                ["a".into()],
                InstructionKind::If {
                    condition: Expr::var("a"),
                    then_depends_on: BTreeSet::from(["t".into()]),
                    else_depends_on: BTreeSet::new(),
                },
            ),
            Instruction::new("t", [], InstructionKind::FailStep),
        ]);
        let reduced = transitive_reduction(&view);
        let part = partition(&view, &reduced);
        let if_vertex = view.get_number_for_id(&"if".into()).unwrap();
        let t_vertex = view.get_number_for_id(&"t".into()).unwrap();
        assert_ne!(
            part.instruction_to_block[&if_vertex],
            part.instruction_to_block[&t_vertex]
        );
    }
}
