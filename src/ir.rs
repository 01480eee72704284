//! The output representation: basic blocks, statements, and the function
//! that owns them.
//!
//! Blocks are addressed by [`BasicBlockId`], a dense index into the owning
//! [`Function`]'s block table, rather than by a strong reference back to the
//! function. This sidesteps the ownership cycle a naive `BasicBlock ->
//! Function -> BasicBlock` relation would create: callers hold a `Function`
//! and a `BasicBlockId`, and ask the function to act on the block, the same
//! way the instruction DAG addresses instructions by `VertexId` rather than
//! by direct references.

use std::fmt;

use fnv::FnvHashMap;

use crate::instruction::{Expr, Name, VarName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BasicBlockId(usize);

impl fmt::Display for BasicBlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// A branch condition: either a source expression or its logical negation.
///
/// The only negation the assembler ever constructs is over a flag variable
/// (`LogicalNot(f)` in the specification's step 5), but nothing here
/// prevents negating an arbitrary expression, so `Not` wraps a `Cond` rather
/// than a bare `Name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cond {
    Value(Expr),
    Not(Box<Cond>),
}

impl Cond {
    pub fn not(self) -> Cond {
        Cond::Not(Box::new(self))
    }
}

/// A non-terminating operation inside a block: executing it never changes
/// which block control is in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Assignment { lhs: VarName, rhs: Expr },
    YieldState {
        time: Expr,
        time_id: Name,
        component_id: Name,
        expression: Expr,
    },
}

/// The single operation that ends a block and hands control elsewhere (or
/// ends the function).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    Return,
    Jump(BasicBlockId),
    Branch {
        cond: Cond,
        then_target: BasicBlockId,
        else_target: BasicBlockId,
    },
    Raise { error: Expr },
    FailStep,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    id: BasicBlockId,
    statements: Vec<Statement>,
    terminator: Option<Terminator>,
}

impl BasicBlock {
    fn new(id: BasicBlockId) -> Self {
        BasicBlock {
            id,
            statements: Vec::new(),
            terminator: None,
        }
    }

    pub fn id(&self) -> BasicBlockId {
        self.id
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn terminator(&self) -> Option<&Terminator> {
        self.terminator.as_ref()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminator.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    pub is_global: bool,
    pub is_flag: bool,
}

/// Maps every variable name this function touches to its metadata, and
/// mints fresh names for synthetic variables (flags, merge temporaries).
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: FnvHashMap<Name, Symbol>,
    fresh_counters: FnvHashMap<String, u64>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    /// Records `name` with the given metadata. Calling this more than once
    /// for the same name is fine as long as the metadata agrees; the
    /// specification has every assigned/read variable added once per
    /// distinct name it's seen under.
    pub fn add_variable(&mut self, name: Name, is_global: bool, is_flag: bool) {
        self.symbols
            .entry(name)
            .and_modify(|s| {
                s.is_global |= is_global;
                s.is_flag |= is_flag;
            })
            .or_insert(Symbol { is_global, is_flag });
    }

    pub fn get(&self, name: &Name) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &Name> {
        self.symbols.keys()
    }

    /// Returns a name of the form `prefix_0`, `prefix_1`, ... not already
    /// present in the table, and does not register it: callers still need
    /// to call `add_variable` once they know the name's `is_global`/
    /// `is_flag` metadata.
    pub fn get_fresh_variable_name(&mut self, prefix: &str) -> Name {
        let counter = self.fresh_counters.entry(prefix.to_string()).or_insert(0);
        loop {
            let candidate: Name = format!("{prefix}_{counter}").into();
            *counter += 1;
            if !self.symbols.contains_key(&candidate) {
                return candidate;
            }
        }
    }
}

/// A named control flow graph: an entry block, the full set of blocks
/// reachable from it, and the symbol table covering every variable the
/// function's statements touch.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: Name,
    pub symbol_table: SymbolTable,
    pub entry_block: BasicBlockId,
    blocks: Vec<BasicBlock>,
}

impl Function {
    /// Creates a function with a single, empty entry block.
    pub fn new(name: Name) -> Self {
        let entry = BasicBlockId(0);
        Function {
            name,
            symbol_table: SymbolTable::new(),
            entry_block: entry,
            blocks: vec![BasicBlock::new(entry)],
        }
    }

    pub fn new_block(&mut self) -> BasicBlockId {
        let id = BasicBlockId(self.blocks.len());
        self.blocks.push(BasicBlock::new(id));
        id
    }

    pub fn block(&self, id: BasicBlockId) -> &BasicBlock {
        &self.blocks[id.0]
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn terminated(&self, id: BasicBlockId) -> bool {
        self.block(id).is_terminated()
    }

    fn block_mut(&mut self, id: BasicBlockId) -> &mut BasicBlock {
        &mut self.blocks[id.0]
    }

    /// Panics if `id` is already terminated: appending a statement after a
    /// terminator is always a bug in the caller, never a malformed input.
    fn push_statement(&mut self, id: BasicBlockId, statement: Statement) {
        let block = self.block_mut(id);
        assert!(
            !block.is_terminated(),
            "cannot append a statement to already-terminated block {id}"
        );
        block.statements.push(statement);
    }

    fn set_terminator(&mut self, id: BasicBlockId, terminator: Terminator) {
        let block = self.block_mut(id);
        assert!(
            !block.is_terminated(),
            "block {id} already has a terminator"
        );
        block.terminator = Some(terminator);
    }

    pub fn add_assignment(&mut self, id: BasicBlockId, lhs: VarName, rhs: Expr) {
        self.push_statement(id, Statement::Assignment { lhs, rhs });
    }

    pub fn add_yield_state(
        &mut self,
        id: BasicBlockId,
        time: Expr,
        time_id: Name,
        component_id: Name,
        expression: Expr,
    ) {
        self.push_statement(
            id,
            Statement::YieldState {
                time,
                time_id,
                component_id,
                expression,
            },
        );
    }

    pub fn add_branch(
        &mut self,
        id: BasicBlockId,
        cond: Cond,
        then_target: BasicBlockId,
        else_target: BasicBlockId,
    ) {
        self.set_terminator(
            id,
            Terminator::Branch {
                cond,
                then_target,
                else_target,
            },
        );
    }

    pub fn add_jump(&mut self, id: BasicBlockId, target: BasicBlockId) {
        self.set_terminator(id, Terminator::Jump(target));
    }

    pub fn add_return(&mut self, id: BasicBlockId) {
        self.set_terminator(id, Terminator::Return);
    }

    pub fn add_raise(&mut self, id: BasicBlockId, error: Expr) {
        self.set_terminator(id, Terminator::Raise { error });
    }

    pub fn add_fail_step(&mut self, id: BasicBlockId) {
        self.set_terminator(id, Terminator::FailStep);
    }
}
