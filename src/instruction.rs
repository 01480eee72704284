//! The input data model: instructions and the DAG they form.
//!
//! An [`Instruction`] is the atomic unit handed to this crate by the caller.
//! Every instruction carries a stable identifier, the set of instructions it
//! unconditionally depends on, and a [`InstructionKind`] describing what it
//! actually does. The kind is a closed set (no open inheritance, per the
//! design notes): augmenting it means adding a variant here, not a trait impl
//! somewhere else.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// A compact, cheaply-clonable interned string used for instruction ids,
/// variable names, and flag names.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name(Arc<str>);

impl Name {
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        Name(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Name::new(s)
    }
}

impl From<String> for Name {
    fn from(s: String) -> Self {
        Name::new(s)
    }
}

/// Identifier of an [`Instruction`]. Distinct from [`Name`] only in intent:
/// the two are structurally identical interned strings, but keeping them as
/// separate types stops an id being passed where a variable name is expected
/// and vice versa.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstructionId(Name);

impl InstructionId {
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        InstructionId(Name::new(s))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for InstructionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InstructionId {
    fn from(s: &str) -> Self {
        InstructionId::new(s)
    }
}

impl From<String> for InstructionId {
    fn from(s: String) -> Self {
        InstructionId::new(s)
    }
}

/// Name of a scalar variable assigned or read by an instruction.
pub type VarName = Name;

/// An opaque right-hand-side / condition / error payload.
///
/// The grammar of expressions belongs to the source language (an external
/// collaborator, see the crate's Non-goals); this type only needs to report
/// which variables it reads, never to be interpreted or evaluated here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// A bare variable read, e.g. the rhs of `y := x`.
    Var(VarName),
    /// A literal that reads no variables.
    Literal(Arc<str>),
    /// Any other expression from the source language, carried verbatim along
    /// with the set of variables it reads (computed by the caller, which
    /// alone understands the expression grammar).
    Opaque {
        text: Arc<str>,
        reads: Arc<[VarName]>,
    },
}

impl Expr {
    pub fn var(name: impl Into<VarName>) -> Self {
        Expr::Var(name.into())
    }

    pub fn literal(text: impl Into<Arc<str>>) -> Self {
        Expr::Literal(text.into())
    }

    pub fn opaque(text: impl Into<Arc<str>>, reads: impl IntoIterator<Item = VarName>) -> Self {
        Expr::Opaque {
            text: text.into(),
            reads: reads.into_iter().collect(),
        }
    }

    /// The set of variables this expression reads.
    pub fn free_variables(&self) -> BTreeSet<VarName> {
        match self {
            Expr::Var(v) => [v.clone()].into_iter().collect(),
            Expr::Literal(_) => BTreeSet::new(),
            Expr::Opaque { reads, .. } => reads.iter().cloned().collect(),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Var(v) => write!(f, "{v}"),
            Expr::Literal(s) => write!(f, "{s}"),
            Expr::Opaque { text, .. } => write!(f, "{text}"),
        }
    }
}

/// The closed set of instruction variants (§3 of the specification).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionKind {
    /// Synthetic entry sentinel, added by the augmenter.
    Entry,
    /// Synthetic exit sentinel, added by the augmenter. Terminates the
    /// function.
    Exit,
    /// Scalar assignment `lhs := rhs`.
    AssignExpression { lhs: VarName, rhs: Expr },
    /// Assignment whose rhs is an implicit solve.
    AssignSolvedRhs { lhs: VarName, rhs: Expr },
    /// Conditional. `then_depends_on`/`else_depends_on` name instructions
    /// whose emission is gated on the branch taken; these contribute
    /// *conditional* edges, distinct from `depends_on`.
    If {
        condition: Expr,
        then_depends_on: BTreeSet<InstructionId>,
        else_depends_on: BTreeSet<InstructionId>,
    },
    /// Emits a value observable to the driver without terminating the
    /// function.
    YieldState {
        time: Expr,
        time_id: Name,
        component_id: Name,
        expression: Expr,
    },
    /// Terminates execution with an error.
    Raise { error: Expr },
    /// Terminates the current integration step, signaling failure to retry.
    FailStep,
}

/// A single node of the input DAG.
///
/// `depends_on` holds only *unconditional* predecessors; the conditional
/// edges contributed by an `If`'s `then_depends_on`/`else_depends_on` live on
/// the `If` variant itself (see [`InstructionKind::If`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub id: InstructionId,
    pub depends_on: BTreeSet<InstructionId>,
    pub kind: InstructionKind,
}

impl Instruction {
    pub fn new(
        id: impl Into<InstructionId>,
        depends_on: impl IntoIterator<Item = InstructionId>,
        kind: InstructionKind,
    ) -> Self {
        Instruction {
            id: id.into(),
            depends_on: depends_on.into_iter().collect(),
            kind,
        }
    }

    fn entry(id: impl Into<InstructionId>) -> Self {
        Instruction::new(id, [], InstructionKind::Entry)
    }

    fn exit(id: impl Into<InstructionId>, depends_on: BTreeSet<InstructionId>) -> Self {
        Instruction::new(id, depends_on, InstructionKind::Exit)
    }

    /// The set of variables this instruction assigns.
    pub fn assignees(&self) -> BTreeSet<VarName> {
        match &self.kind {
            InstructionKind::AssignExpression { lhs, .. }
            | InstructionKind::AssignSolvedRhs { lhs, .. } => {
                [lhs.clone()].into_iter().collect()
            }
            InstructionKind::Entry
            | InstructionKind::Exit
            | InstructionKind::If { .. }
            | InstructionKind::YieldState { .. }
            | InstructionKind::Raise { .. }
            | InstructionKind::FailStep => BTreeSet::new(),
        }
    }

    /// The set of variables this instruction reads.
    pub fn read_variables(&self) -> BTreeSet<VarName> {
        match &self.kind {
            InstructionKind::Entry | InstructionKind::Exit | InstructionKind::FailStep => {
                BTreeSet::new()
            }
            InstructionKind::AssignExpression { rhs, .. }
            | InstructionKind::AssignSolvedRhs { rhs, .. } => rhs.free_variables(),
            InstructionKind::If { condition, .. } => condition.free_variables(),
            InstructionKind::YieldState { expression, .. } => expression.free_variables(),
            InstructionKind::Raise { error } => error.free_variables(),
        }
    }

    /// The conditional successor sets of an `If`; empty for every other kind.
    pub fn conditional_branches(&self) -> Option<(&BTreeSet<InstructionId>, &BTreeSet<InstructionId>)> {
        match &self.kind {
            InstructionKind::If {
                then_depends_on,
                else_depends_on,
                ..
            } => Some((then_depends_on, else_depends_on)),
            _ => None,
        }
    }

    pub fn is_entry(&self) -> bool {
        matches!(self.kind, InstructionKind::Entry)
    }

    pub fn is_exit(&self) -> bool {
        matches!(self.kind, InstructionKind::Exit)
    }
}

pub(crate) use private::{new_entry, new_exit};

mod private {
    use super::*;

    pub(crate) fn new_entry(id: impl Into<InstructionId>) -> Instruction {
        Instruction::entry(id)
    }

    pub(crate) fn new_exit(
        id: impl Into<InstructionId>,
        depends_on: BTreeSet<InstructionId>,
    ) -> Instruction {
        Instruction::exit(id, depends_on)
    }
}
