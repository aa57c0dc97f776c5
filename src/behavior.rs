use crate::behavior::leaves::Leaf;
use crate::game::Game;
use crate::value::{Binding, VarRef};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub mod compiler;
pub mod leaves;

/// Outcome of one node tick. `Failure` is a normal return value, not an
/// error: it is recorded in the owning context's failure list and surfaced
/// to the debug UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeResult {
    Success,
    Failure,
    Running,
    Unused,
}

#[derive(Debug)]
pub enum BranchKind {
    Sequence,
    Selector,
    Repeat { count: Binding },
    While { test: VarRef, negate: bool },
}

#[derive(Debug)]
pub enum NodeKind {
    Branch { kind: BranchKind, children: Vec<BehaviorNode> },
    Leaf(Leaf),
}

/// A compiled node. Carries the source line that introduced it for failure
/// attribution in the editor.
#[derive(Debug)]
pub struct BehaviorNode {
    pub line: u32,
    pub kind: NodeKind,
}

/// A named tree plus its typed parameters, declared in the `tree` header.
/// Parameters are ordinary context variables; `Call` copies argument values
/// into them before each invocation.
#[derive(Debug)]
pub struct BehaviorTree {
    pub name: String,
    pub line: u32,
    pub parameters: Vec<VarRef>,
    pub children: Vec<BehaviorNode>,
}

/// All trees and variables of one compiled behavior asset, plus the
/// transient per-execution failure list.
#[derive(Debug)]
pub struct BehaviorContext {
    pub name: String,
    pub trees: Vec<Rc<BehaviorTree>>,
    variables: RefCell<HashMap<String, VarRef>>,
    failed_at: RefCell<SmallVec<[u32; 8]>>,
    lines: RefCell<HashMap<u32, String>>,
}

impl BehaviorContext {
    pub fn new(name: impl Into<String>) -> BehaviorContext {
        BehaviorContext {
            name: name.into(),
            trees: Vec::new(),
            variables: RefCell::new(HashMap::new()),
            failed_at: RefCell::new(SmallVec::new()),
            lines: RefCell::new(HashMap::new()),
        }
    }

    pub fn add_variable(&self, var: VarRef) {
        self.variables.borrow_mut().insert(var.name().to_string(), var);
    }

    pub fn variable(&self, name: &str) -> Option<VarRef> {
        self.variables.borrow().get(name).cloned()
    }

    pub fn variables(&self) -> Vec<VarRef> {
        self.variables.borrow().values().cloned().collect()
    }

    pub fn tree(&self, name: &str) -> Option<Rc<BehaviorTree>> {
        self.trees.iter().find(|t| t.name == name).cloned()
    }

    pub fn record_line(&self, line: u32, node_name: &str) {
        self.lines.borrow_mut().insert(line, node_name.to_string());
    }

    /// Node name the given source line introduced, for editor context help.
    pub fn node_at_line(&self, line: u32) -> Option<String> {
        self.lines.borrow().get(&line).cloned()
    }

    pub fn add_failure(&self, line: u32) {
        self.failed_at.borrow_mut().push(line);
    }

    /// Failure lines of the most recent execution, 0-based.
    pub fn failures(&self) -> Vec<u32> {
        self.failed_at.borrow().iter().copied().collect()
    }

    /// Executes the named tree once. The failure list is reset up front;
    /// an unknown tree name yields `Failure`.
    pub fn execute(self: &Rc<Self>, name: &str, game: &mut Game) -> NodeResult {
        self.failed_at.borrow_mut().clear();
        // The clone keeps tree data alive even if a leaf (SetScene, stop)
        // drops every other owner of this context mid-run.
        let ctx = self.clone();
        let Some(tree) = ctx.tree(name) else {
            return NodeResult::Failure;
        };
        execute_tree(game, &ctx, &tree);
        NodeResult::Success
    }
}

/// The tree root runs every direct child in order regardless of individual
/// results. This does not short-circuit like `Sequence`; existing scripts
/// rely on the asymmetry.
pub(crate) fn execute_tree(game: &mut Game, ctx: &Rc<BehaviorContext>, tree: &Rc<BehaviorTree>) -> NodeResult {
    for child in &tree.children {
        execute_node(game, ctx, child);
    }
    NodeResult::Success
}

/// Single interpreter over the closed node-kind enum.
pub(crate) fn execute_node(game: &mut Game, ctx: &Rc<BehaviorContext>, node: &BehaviorNode) -> NodeResult {
    match &node.kind {
        NodeKind::Leaf(leaf) => leaf.execute(game, ctx, node.line),
        NodeKind::Branch { kind, children } => match kind {
            BranchKind::Sequence => {
                for child in children {
                    if execute_node(game, ctx, child) == NodeResult::Failure {
                        ctx.add_failure(node.line);
                        return NodeResult::Failure;
                    }
                }
                NodeResult::Success
            }
            BranchKind::Selector => {
                for child in children {
                    if execute_node(game, ctx, child) == NodeResult::Success {
                        return NodeResult::Success;
                    }
                }
                ctx.add_failure(node.line);
                NodeResult::Failure
            }
            BranchKind::Repeat { count } => {
                let count = count.value().as_int().unwrap_or(1).max(0);
                let mut result = NodeResult::Success;
                // All iterations run even when one of them fails.
                for _ in 0..count {
                    for child in children {
                        if execute_node(game, ctx, child) == NodeResult::Failure {
                            result = NodeResult::Failure;
                        }
                    }
                }
                result
            }
            BranchKind::While { test, negate } => {
                let mut entered = false;
                loop {
                    let holds = match test.bool_value() {
                        Ok(v) => v != *negate,
                        Err(_) => false,
                    };
                    if !holds {
                        break;
                    }
                    entered = true;
                    for child in children {
                        execute_node(game, ctx, child);
                    }
                }
                // A test that never held is a soft failure without a
                // recorded failure line.
                if entered {
                    NodeResult::Success
                } else {
                    NodeResult::Failure
                }
            }
        },
    }
}
