//! C7: drives augmentation, reduction, and partitioning, then emits the
//! resulting block graph into a [`Function`] as flag-guarded basic blocks.

use std::collections::BTreeSet;

use fnv::FnvHashMap;

use crate::augment::augment;
use crate::dag::DagView;
use crate::error::LoweringError;
use crate::flags::FlagTracker;
use crate::instruction::{Expr, Instruction, InstructionId, InstructionKind, Name};
use crate::ir::{BasicBlockId, Cond, Function};
use crate::partition::{partition, BlockGraph, BlockRef, Partition};
use crate::reduce::transitive_reduction;

/// Lowers `instructions` into a [`Function`] named `name`, computing every
/// instruction in `roots` and everything they transitively depend on.
///
/// `is_state_variable` distinguishes globally observable state from
/// function-local temporaries when populating the symbol table; it is
/// consulted once per distinct variable name the instruction set touches.
pub fn lower(
    name: impl Into<Name>,
    instructions: &[Instruction],
    roots: &[InstructionId],
    is_state_variable: impl Fn(&Name) -> bool,
) -> Result<Function, LoweringError> {
    let name = name.into();
    log::debug!(
        "lowering `{name}`: {} input instructions, {} roots",
        instructions.len(),
        roots.len()
    );

    let augmented = augment(instructions, roots);
    let view = DagView::new(augmented.instructions)?;
    let reduced = transitive_reduction(&view);
    let part = partition(&view, &reduced);

    let mut function = Function::new(name);
    populate_symbol_table(&mut function, &view, &is_state_variable);
    let flags = allocate_flags(&mut function, &part.block_graph);
    let entry_bb = zero_initialize_flags(&mut function, &flags);

    let exit_number = view
        .get_number_for_id(&augmented.exit_id)
        .expect("augment() always inserts the exit id it reports");
    let exit_block = part.instruction_to_block[&exit_number].clone();

    let universe = flags.values().cloned().collect::<BTreeSet<_>>();
    let tracker = FlagTracker::all_false(universe);

    let mut assembler = Assembler {
        view: &view,
        part: &part,
        flags: &flags,
        function: &mut function,
    };
    let (end_bb, final_tracker) = assembler.process_block(&exit_block, entry_bb, tracker);
    if !function.terminated(end_bb) {
        function.add_return(end_bb);
    }

    let elided = flags
        .values()
        .filter(|f| final_tracker.is_definitely_true(f))
        .count();
    log::debug!(
        "assembled `{}`: {} blocks, {} flags ({elided} statically provable true at exit)",
        function.name,
        function.blocks().len(),
        flags.len(),
    );

    for block in function.blocks() {
        assert!(
            block.is_terminated(),
            "assembly produced an unterminated block {}",
            block.id()
        );
    }

    Ok(function)
}

fn populate_symbol_table(
    function: &mut Function,
    view: &DagView,
    is_state_variable: &impl Fn(&Name) -> bool,
) {
    let mut names: BTreeSet<Name> = BTreeSet::new();
    for instruction in view.instructions().values() {
        names.extend(instruction.assignees());
        names.extend(instruction.read_variables());
    }
    for name in names {
        let is_global = is_state_variable(&name);
        function.symbol_table.add_variable(name, is_global, false);
    }
}

/// Allocates one fresh flag per block, in a stable order (by each block's
/// head vertex) so flag numbering is reproducible across runs.
fn allocate_flags(
    function: &mut Function,
    block_graph: &BlockGraph,
) -> FnvHashMap<BlockRef, Name> {
    let mut blocks: Vec<&BlockRef> = block_graph.keys().collect();
    blocks.sort_by_key(|b| b.head());

    let mut flags = FnvHashMap::with_capacity_and_hasher(blocks.len(), Default::default());
    for block in blocks {
        let flag = function.symbol_table.get_fresh_variable_name("flag");
        function.symbol_table.add_variable(flag.clone(), false, true);
        flags.insert(block.clone(), flag);
    }
    flags
}

fn zero_initialize_flags(
    function: &mut Function,
    flags: &FnvHashMap<BlockRef, Name>,
) -> BasicBlockId {
    let entry_bb = function.entry_block;
    let mut names: Vec<&Name> = flags.values().collect();
    names.sort();
    for flag in names {
        function.add_assignment(entry_bb, flag.clone(), Expr::literal("false"));
    }
    entry_bb
}

/// Bundles the read-only pipeline state and the in-progress [`Function`]
/// for the duration of one assembly call, mirroring the scope a single
/// `lower` invocation owns per the concurrency model: no state survives or
/// is shared past this call.
struct Assembler<'a> {
    view: &'a DagView,
    part: &'a Partition,
    flags: &'a FnvHashMap<BlockRef, Name>,
    function: &'a mut Function,
}

impl Assembler<'_> {
    /// Ensures `block` has executed by the time control reaches the
    /// returned basic block, threading the flag tracker through.
    fn process_block(
        &mut self,
        block: &BlockRef,
        top_bb: BasicBlockId,
        tracker: FlagTracker,
    ) -> (BasicBlockId, FlagTracker) {
        let flag = self.flags[block].clone();

        if tracker.is_definitely_true(&flag) {
            log::trace!("block guarded by `{flag}` proven already executed, lazy skip");
            return (top_bb, tracker);
        }
        let needs_flag = tracker.needs_guard(&flag);
        log::trace!("emitting block guarded by `{flag}` (runtime guard: {needs_flag})");

        let dependencies = self.part.block_graph[block].clone();
        let (mut main_bb, mut tracker) =
            self.process_block_sequence(&dependencies, top_bb, tracker);

        let merge_bb = if needs_flag {
            let new_main_bb = self.function.new_block();
            let merge_bb = self.function.new_block();
            self.function.add_branch(
                main_bb,
                Cond::Value(Expr::var(flag.clone())).not(),
                new_main_bb,
                merge_bb,
            );
            main_bb = new_main_bb;
            Some(merge_bb)
        } else {
            None
        };

        for &vertex in block.instructions() {
            let instruction = self.view.get_instruction(vertex);
            match &instruction.kind {
                InstructionKind::Entry => continue,
                InstructionKind::Exit => {
                    self.function.add_return(main_bb);
                    break;
                }
                InstructionKind::If {
                    condition,
                    then_depends_on,
                    else_depends_on,
                } => {
                    let then_blocks = self.blocks_for(then_depends_on);
                    let else_blocks = self.blocks_for(else_depends_on);

                    let then_bb = self.function.new_block();
                    let else_bb = self.function.new_block();
                    let join_bb = self.function.new_block();

                    let (end_then_bb, then_tracker) =
                        self.process_block_sequence(&then_blocks, then_bb, tracker.clone());
                    let (end_else_bb, else_tracker) =
                        self.process_block_sequence(&else_blocks, else_bb, tracker.clone());

                    self.function
                        .add_branch(main_bb, Cond::Value(condition.clone()), then_bb, else_bb);
                    let mut join_reachable = false;
                    if !self.function.terminated(end_then_bb) {
                        self.function.add_jump(end_then_bb, join_bb);
                        join_reachable = true;
                    }
                    if !self.function.terminated(end_else_bb) {
                        self.function.add_jump(end_else_bb, join_bb);
                        join_reachable = true;
                    }

                    tracker = then_tracker.meet(&else_tracker);
                    if join_reachable {
                        main_bb = join_bb;
                    } else {
                        // Both arms already terminated (raise/fail/return):
                        // nothing ever reaches join_bb. Terminate it so it
                        // doesn't trip the "every block terminates"
                        // invariant, and keep emitting into a fresh block,
                        // itself unreachable but terminated downstream the
                        // same way any other block is.
                        self.function.add_return(join_bb);
                        main_bb = self.function.new_block();
                    }
                }
                InstructionKind::YieldState {
                    time,
                    time_id,
                    component_id,
                    expression,
                } => {
                    self.function.add_yield_state(
                        main_bb,
                        time.clone(),
                        time_id.clone(),
                        component_id.clone(),
                        expression.clone(),
                    );
                }
                InstructionKind::AssignExpression { lhs, rhs }
                | InstructionKind::AssignSolvedRhs { lhs, rhs } => {
                    self.function.add_assignment(main_bb, lhs.clone(), rhs.clone());
                }
                InstructionKind::Raise { error } => {
                    self.function.add_raise(main_bb, error.clone());
                    break;
                }
                InstructionKind::FailStep => {
                    self.function.add_fail_step(main_bb);
                    break;
                }
            }
        }

        if self.function.terminated(main_bb) {
            // The block's own body always exits the function (Exit/Raise/
            // FailStep break the loop above before the flag is ever set):
            // nothing after it in this chain can run. Terminate any guard
            // merge point so it stays well-formed, and keep building on a
            // fresh, equally unreachable block instead of the terminated
            // one.
            if let Some(merge_bb) = merge_bb {
                self.function.add_return(merge_bb);
            }
            main_bb = self.function.new_block();
        } else {
            self.function
                .add_assignment(main_bb, flag.clone(), Expr::literal("true"));
            if let Some(merge_bb) = merge_bb {
                self.function.add_jump(main_bb, merge_bb);
                main_bb = merge_bb;
            }
        }

        (main_bb, tracker.set_true(&flag))
    }

    /// Folds [`process_block`](Self::process_block) over a sequence of
    /// blocks, threading the current basic block and tracker through each.
    fn process_block_sequence(
        &mut self,
        blocks: &[BlockRef],
        top_bb: BasicBlockId,
        tracker: FlagTracker,
    ) -> (BasicBlockId, FlagTracker) {
        let mut main_bb = top_bb;
        let mut tracker = tracker;
        for block in blocks {
            let (next_bb, next_tracker) = self.process_block(block, main_bb, tracker);
            main_bb = next_bb;
            tracker = next_tracker;
        }
        (main_bb, tracker)
    }

    /// The distinct blocks containing `ids`, in a stable order.
    fn blocks_for(&self, ids: &BTreeSet<InstructionId>) -> Vec<BlockRef> {
        let mut blocks: Vec<BlockRef> = ids
            .iter()
            .filter_map(|id| self.view.get_number_for_id(id))
            .map(|v| self.part.instruction_to_block[&v].clone())
            .collect();
        blocks.sort_by_key(|b| b.head());
        blocks.dedup();
        blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Terminator;

    fn always_local(_: &Name) -> bool {
        false
    }

    #[test]
    fn linear_chain_lowers_to_a_single_guarded_body_then_return() {
        // S1: A -> B -> C, root = {C}.
        let instrs = vec![
            Instruction::new(
                "a",
                [],
                InstructionKind::AssignExpression {
                    lhs: "x".into(),
                    rhs: Expr::literal("1"),
                },
            ),
            Instruction::new(
                "b",
                ["a".into()],
                InstructionKind::AssignExpression {
                    lhs: "y".into(),
                    rhs: Expr::var("x"),
                },
            ),
            Instruction::new("c", ["b".into()], InstructionKind::FailStep),
        ];
        let f = lower("step", &instrs, &["c".into()], always_local).unwrap();
        for block in f.blocks() {
            assert!(block.is_terminated());
        }
        // Every block the function owns must end in one of the expected
        // terminator kinds, and FailStep must be reachable.
        assert!(f.blocks().iter().any(|b| matches!(
            b.terminator(),
            Some(Terminator::FailStep)
        )));
    }

    #[test]
    fn linear_chain_needs_no_runtime_flag_guard() {
        // P9: a single block reachable only from entry with no intervening
        // branch gets no runtime flag check at all, since the tracker
        // already knows its flag is false at the point of emission.
        let instrs = vec![
            Instruction::new(
                "a",
                [],
                InstructionKind::AssignExpression {
                    lhs: "x".into(),
                    rhs: Expr::literal("1"),
                },
            ),
            Instruction::new("b", ["a".into()], InstructionKind::FailStep),
        ];
        let f = lower("step", &instrs, &["b".into()], always_local).unwrap();
        // No instruction in this program branches, so any `Branch`
        // terminator in the emitted function could only be a flag guard.
        assert!(!f
            .blocks()
            .iter()
            .any(|b| matches!(b.terminator(), Some(Terminator::Branch { .. }))));
    }

    #[test]
    fn diamond_merges_both_branches_before_the_final_block() {
        // S2: A -> {B, C}, {B, C} -> D, root = {D}.
        let instrs = vec![
            Instruction::new(
                "a",
                [],
                InstructionKind::AssignExpression {
                    lhs: "x".into(),
                    rhs: Expr::literal("0"),
                },
            ),
            Instruction::new(
                "b",
                ["a".into()],
                InstructionKind::AssignExpression {
                    lhs: "y".into(),
                    rhs: Expr::var("x"),
                },
            ),
            Instruction::new(
                "c",
                ["a".into()],
                InstructionKind::AssignExpression {
                    lhs: "z".into(),
                    rhs: Expr::var("x"),
                },
            ),
            Instruction::new("d", ["b".into(), "c".into()], InstructionKind::FailStep),
        ];
        let f = lower("step", &instrs, &["d".into()], always_local).unwrap();
        for block in f.blocks() {
            assert!(block.is_terminated());
        }
    }

    #[test]
    fn conditional_emits_a_branch_with_both_arms_reaching_a_merge() {
        // S3: A, If(cond, then=[T], else=[E]), M depends on the If, root {M}.
        use std::collections::BTreeSet;
        let instrs = vec![
            Instruction::new(
                "a",
                [],
                InstructionKind::AssignExpression {
                    lhs: "cond".into(),
                    rhs: Expr::literal("true"),
                },
            ),
            Instruction::new(
                "t",
                [],
                InstructionKind::AssignExpression {
                    lhs: "then_var".into(),
                    rhs: Expr::literal("1"),
                },
            ),
            Instruction::new(
                "e",
                [],
                InstructionKind::AssignExpression {
                    lhs: "else_var".into(),
                    rhs: Expr::literal("2"),
                },
            ),
            Instruction::new(
                "if",
                ["a".into()],
                InstructionKind::If {
                    condition: Expr::var("cond"),
                    then_depends_on: BTreeSet::from(["t".into()]),
                    else_depends_on: BTreeSet::from(["e".into()]),
                },
            ),
            Instruction::new("m", ["if".into()], InstructionKind::FailStep),
        ];
        let f = lower("step", &instrs, &["m".into()], always_local).unwrap();
        let branch_count = f
            .blocks()
            .iter()
            .filter(|b| matches!(b.terminator(), Some(Terminator::Branch { .. })))
            .count();
        assert!(branch_count >= 1);
        for block in f.blocks() {
            assert!(block.is_terminated());
        }
    }

    #[test]
    fn shared_post_conditional_block_is_emitted_once_per_arm() {
        // S4: If(cond, then=[x], else=[x]) - the same instruction appears
        // in both arms, so it lives in exactly one block. But each arm is
        // processed with its own copy of the tracker from *before* the `If`,
        // in which x's flag is still definitely-false, so each arm emits
        // x's body unconditionally rather than skipping or guarding it: the
        // two arms are mutually exclusive at runtime, so the block's code
        // still runs at most once per invocation even though it appears
        // twice in the emitted CFG (once per arm).
        use std::collections::BTreeSet;
        let instrs = vec![
            Instruction::new(
                "x",
                [],
                InstructionKind::AssignExpression {
                    lhs: "v".into(),
                    rhs: Expr::literal("1"),
                },
            ),
            Instruction::new(
                "if",
                [],
                InstructionKind::If {
                    condition: Expr::var("v"),
                    then_depends_on: BTreeSet::from(["x".into()]),
                    else_depends_on: BTreeSet::from(["x".into()]),
                },
            ),
        ];
        let f = lower("step", &instrs, &["if".into()], always_local).unwrap();
        // x's block is emitted once per arm (not deduplicated across arms),
        // since both arms start from the same pre-`If` tracker.
        let assignments_to_v = f
            .blocks()
            .iter()
            .flat_map(|b| b.statements())
            .filter(|s| matches!(s, crate::ir::Statement::Assignment { lhs, .. } if *lhs == Name::from("v")))
            .count();
        assert_eq!(assignments_to_v, 2);
    }

    #[test]
    fn yield_state_does_not_terminate_its_block() {
        // S5: a YieldState followed by further assignments in the same
        // straight-line chain.
        let instrs = vec![
            Instruction::new(
                "y",
                [],
                InstructionKind::YieldState {
                    time: Expr::literal("t"),
                    time_id: "t_id".into(),
                    component_id: "comp".into(),
                    expression: Expr::literal("v"),
                },
            ),
            Instruction::new(
                "after",
                ["y".into()],
                InstructionKind::AssignExpression {
                    lhs: "z".into(),
                    rhs: Expr::literal("2"),
                },
            ),
        ];
        let f = lower("step", &instrs, &["after".into()], always_local).unwrap();
        let has_yield = f
            .blocks()
            .iter()
            .flat_map(|b| b.statements())
            .any(|s| matches!(s, crate::ir::Statement::YieldState { .. }));
        assert!(has_yield);
        for block in f.blocks() {
            assert!(block.is_terminated());
        }
    }

    #[test]
    fn fail_step_block_has_no_statements_after_it() {
        // S6: FailStep mid-chain terminates its block immediately.
        let instrs = vec![
            Instruction::new("a", [], InstructionKind::FailStep),
        ];
        let f = lower("step", &instrs, &["a".into()], always_local).unwrap();
        let fail_block = f
            .blocks()
            .iter()
            .find(|b| matches!(b.terminator(), Some(Terminator::FailStep)))
            .unwrap();
        assert!(fail_block.statements().is_empty());
    }

    #[test]
    fn entry_block_zero_initializes_every_flag() {
        let instrs = vec![Instruction::new("a", [], InstructionKind::FailStep)];
        let f = lower("step", &instrs, &["a".into()], always_local).unwrap();
        let entry = f.block(f.entry_block);
        assert!(!entry.statements().is_empty());
        for statement in entry.statements() {
            match statement {
                crate::ir::Statement::Assignment { lhs, .. } => {
                    assert!(f.symbol_table.get(lhs).map(|s| s.is_flag).unwrap_or(false));
                }
                other => panic!("unexpected entry-block statement: {other:?}"),
            }
        }
    }

    #[test]
    fn global_state_variables_are_marked_in_the_symbol_table() {
        use maplit::hashset;
        let globals = hashset! { Name::from("y"), Name::from("z") };
        let is_state_variable = move |n: &Name| globals.contains(n);
        let instrs = vec![
            Instruction::new(
                "a",
                [],
                InstructionKind::AssignExpression {
                    lhs: "y".into(),
                    rhs: Expr::literal("0"),
                },
            ),
            Instruction::new(
                "b",
                ["a".into()],
                InstructionKind::AssignExpression {
                    lhs: "z".into(),
                    rhs: Expr::var("y"),
                },
            ),
            Instruction::new(
                "c",
                ["b".into()],
                InstructionKind::AssignExpression {
                    lhs: "local".into(),
                    rhs: Expr::var("z"),
                },
            ),
        ];
        let f = lower("step", &instrs, &["c".into()], is_state_variable).unwrap();
        assert!(f.symbol_table.get(&"y".into()).unwrap().is_global);
        assert!(f.symbol_table.get(&"z".into()).unwrap().is_global);
        assert!(!f.symbol_table.get(&"local".into()).unwrap().is_global);
    }

    #[test]
    fn dangling_root_surfaces_as_a_lowering_error() {
        let instrs = vec![Instruction::new("a", [], InstructionKind::FailStep)];
        let err = lower("step", &instrs, &["ghost".into()], always_local).unwrap_err();
        assert!(matches!(err, LoweringError::DanglingReference { .. }));
    }
}
