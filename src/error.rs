//! The closed taxonomy of errors this crate can report to a caller.
//!
//! Every variant corresponds to a violation of the input contract (§7 of the
//! specification): a malformed DAG, handed to us by whatever built the
//! instruction set. Internal invariant violations (an unterminated block, a
//! flag-tracker meet across mismatched universes) are not represented here —
//! they can only be caused by a bug in this crate, not by caller input, and
//! are reported with `assert!`/`debug_assert!` instead, per the design notes.

use crate::instruction::InstructionId;

/// Fatal errors produced while lowering a malformed instruction DAG.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoweringError {
    /// The instruction graph (conditional and unconditional edges combined)
    /// contains a cycle through the listed ids.
    #[error("cyclic dependency among instructions: {ids:?}")]
    CyclicDependency { ids: Vec<InstructionId> },

    /// An instruction names a dependency that does not exist in the set.
    #[error("instruction `{from}` depends on unknown instruction `{to}`")]
    DanglingReference {
        from: InstructionId,
        to: InstructionId,
    },

    /// Two instructions in the input set share an id.
    #[error("duplicate instruction id `{id}`")]
    DuplicateId { id: InstructionId },

    /// Reserved for callers that deserialize instructions from an external
    /// representation and need somewhere to surface an unrecognized variant;
    /// unreachable through the closed [`crate::instruction::InstructionKind`]
    /// enum itself.
    #[error("unrecognized instruction variant")]
    UnrecognizedVariant,
}
