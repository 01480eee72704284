//! C2: adds synthetic Entry and Exit sentinels wrapping the user DAG.

use std::collections::{BTreeSet, HashSet};

use crate::instruction::{self, Instruction, InstructionId};

/// The outcome of augmenting an instruction set: the enlarged set plus the
/// ids of the two sentinels that were added.
pub struct Augmented {
    pub instructions: Vec<Instruction>,
    pub entry_id: InstructionId,
    pub exit_id: InstructionId,
}

/// Returns a new, augmented instruction set that includes an `Entry` and
/// `Exit` instruction.
///
/// Every original instruction gains `entry_id` as an unconditional
/// dependency; `Exit` depends on `entry_id` followed by every id in `roots`.
/// The input is read-only: each original instruction is cloned before its
/// `depends_on` set is extended.
pub fn augment(instructions: &[Instruction], roots: &[InstructionId]) -> Augmented {
    let existing_ids: HashSet<&InstructionId> = instructions.iter().map(|i| &i.id).collect();
    let entry_id = fresh_id("entry", &existing_ids);
    let exit_id = fresh_id("exit", &existing_ids);

    let mut augmented = Vec::with_capacity(instructions.len() + 2);
    for inst in instructions {
        let mut copy = inst.clone();
        let mut depends_on: BTreeSet<InstructionId> = [entry_id.clone()].into_iter().collect();
        depends_on.extend(copy.depends_on.iter().cloned());
        copy.depends_on = depends_on;
        augmented.push(copy);
    }

    let mut exit_depends_on: BTreeSet<InstructionId> = [entry_id.clone()].into_iter().collect();
    exit_depends_on.extend(roots.iter().cloned());

    augmented.push(instruction::new_entry(entry_id.clone()));
    augmented.push(instruction::new_exit(exit_id.clone(), exit_depends_on));

    log::debug!(
        "augmented {} instructions with entry `{entry_id}` and exit `{exit_id}` ({} roots)",
        instructions.len(),
        roots.len(),
    );

    Augmented {
        instructions: augmented,
        entry_id,
        exit_id,
    }
}

/// Generates a name of the form `prefix`, `prefix_1`, `prefix_2`, ... that
/// does not collide with any id in `existing`.
fn fresh_id(prefix: &str, existing: &HashSet<&InstructionId>) -> InstructionId {
    let candidate: InstructionId = prefix.into();
    if !existing.iter().any(|id| **id == candidate) {
        return candidate;
    }
    let mut suffix = 1u64;
    loop {
        let candidate: InstructionId = format!("{prefix}_{suffix}").into();
        if !existing.iter().any(|id| **id == candidate) {
            return candidate;
        }
        suffix += 1;
    }
}
