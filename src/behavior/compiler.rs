//! Indentation-driven compiler for the behavior language. Four spaces are
//! one nesting level; a `tree` header at level 0 opens a named tree, branch
//! keywords push onto a branch stack, leaves attach to the innermost open
//! branch (or the tree root), and assignments declare context variables.

use crate::assets::Asset;
use crate::behavior::leaves;
use crate::behavior::{BehaviorContext, BehaviorNode, BehaviorTree, BranchKind, NodeKind};
use crate::error::CompileError;
use crate::game::Globals;
use crate::tokenizer::{indent_level, parse_options, strip_comment, tokenize_statement};
use crate::value::{Binding, Value, ValueKind, VarRef, Variable};
use std::rc::Rc;

const BRANCH_KEYWORDS: &[&str] = &["sequence", "selector", "repeat", "while"];

struct PendingBranch {
    kind: BranchKind,
    line: u32,
    children: Vec<BehaviorNode>,
}

pub struct BehaviorCompiler {
    globals: Globals,
}

impl BehaviorCompiler {
    pub fn new(globals: &Globals) -> BehaviorCompiler {
        BehaviorCompiler { globals: globals.clone() }
    }

    /// Compiles the asset's source into a fresh context. The previous
    /// compiled state survives untouched when compilation fails.
    pub fn compile(&self, asset: &mut Asset) -> Result<(), CompileError> {
        let context = self.compile_source(&asset.name, &asset.source)?;
        asset.behavior = Some(Rc::new(context));
        Ok(())
    }

    pub fn compile_source(&self, asset_name: &str, source: &str) -> Result<BehaviorContext, CompileError> {
        let mut ctx = BehaviorContext::new(asset_name);
        ctx.add_variable(self.globals.time.clone());
        ctx.add_variable(self.globals.aspect.clone());

        let mut current_tree: Option<BehaviorTree> = None;
        let mut stack: Vec<PendingBranch> = Vec::new();
        let mut last_level: i64 = -1;

        let err = |line: usize, message: String| CompileError::new(asset_name, line as u32, message);

        for (line_number, raw) in source.lines().enumerate() {
            let level = indent_level(raw);
            let text = strip_comment(raw).trim().to_string();
            if text.is_empty() {
                continue;
            }

            // A decrease in indentation pops one branch frame per level.
            if (level as i64) < last_level {
                let drops = (last_level - level as i64) as usize;
                for _ in 0..drops {
                    pop_branch(&mut stack, &mut current_tree);
                }
            }
            last_level = level as i64;

            let first_word = text.split_whitespace().next().unwrap_or("");

            if first_word == "tree" {
                if level != 0 {
                    return Err(err(line_number, "'tree' must be declared at the top level".to_string()));
                }
                finish_tree(&mut stack, &mut current_tree, &mut ctx)
                    .map_err(|m| err(line_number, m))?;
                let tree = parse_tree_header(&text, line_number as u32, &ctx)
                    .map_err(|m| err(line_number, m))?;
                ctx.record_line(line_number as u32, "tree");
                current_tree = Some(tree);
                continue;
            }

            let statement = tokenize_statement(&text).map_err(|m| err(line_number, m))?;

            if let Some(target) = statement.target {
                // Assignments declare context variables once, at compile
                // time; runtime mutation goes through the Set/Add leaves.
                let variable = parse_declaration(&target, &statement.command, &statement.chunks)
                    .map_err(|m| err(line_number, m))?;
                ctx.add_variable(variable);
                ctx.record_line(line_number as u32, "Variable");
                continue;
            }

            if BRANCH_KEYWORDS.contains(&first_word) {
                if current_tree.is_none() {
                    return Err(err(line_number, format!("'{first_word}' outside of a tree")));
                }
                // Keep the stack depth in step with the indentation level so
                // a same-level sibling branch attaches beside, not below.
                while stack.len() + 1 > level.max(1) {
                    pop_branch(&mut stack, &mut current_tree);
                }
                let kind = parse_branch(&text, &ctx).map_err(|m| err(line_number, m))?;
                ctx.record_line(line_number as u32, first_word);
                stack.push(PendingBranch { kind, line: line_number as u32, children: Vec::new() });
                continue;
            }

            let bag = parse_options(&statement.chunks).map_err(|m| err(line_number, m))?;
            match leaves::construct(&statement.command, &bag, &ctx) {
                Some(Ok(leaf)) => {
                    ctx.record_line(line_number as u32, leaf.name());
                    let node = BehaviorNode { line: line_number as u32, kind: NodeKind::Leaf(leaf) };
                    if let Some(top) = stack.last_mut() {
                        top.children.push(node);
                    } else if let Some(tree) = current_tree.as_mut() {
                        tree.children.push(node);
                    } else {
                        return Err(err(line_number, "Leaf node without active branch".to_string()));
                    }
                }
                Some(Err(message)) => return Err(err(line_number, message)),
                None => {
                    return Err(err(line_number, format!("Unrecognized statement '{}'", statement.command)));
                }
            }
        }

        finish_tree(&mut stack, &mut current_tree, &mut ctx)
            .map_err(|m| err(source.lines().count().saturating_sub(1), m))?;
        Ok(ctx)
    }
}

fn pop_branch(stack: &mut Vec<PendingBranch>, current_tree: &mut Option<BehaviorTree>) {
    let Some(frame) = stack.pop() else {
        return;
    };
    let node = BehaviorNode {
        line: frame.line,
        kind: NodeKind::Branch { kind: frame.kind, children: frame.children },
    };
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    } else if let Some(tree) = current_tree.as_mut() {
        tree.children.push(node);
    }
}

fn finish_tree(
    stack: &mut Vec<PendingBranch>,
    current_tree: &mut Option<BehaviorTree>,
    ctx: &mut BehaviorContext,
) -> Result<(), String> {
    while !stack.is_empty() {
        pop_branch(stack, current_tree);
    }
    if let Some(tree) = current_tree.take() {
        if ctx.tree(&tree.name).is_some() {
            return Err(format!("Duplicate tree '{}'", tree.name));
        }
        ctx.trees.push(Rc::new(tree));
    }
    Ok(())
}

/// `tree Name [type<param> ...]` — the parameters become context variables
/// so leaves inside the tree resolve them like any other variable.
fn parse_tree_header(text: &str, line: u32, ctx: &BehaviorContext) -> Result<BehaviorTree, String> {
    let mut words = text.split_whitespace();
    words.next(); // "tree"
    let name = words.next().ok_or("No name given for tree")?.replace('"', "");
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(format!("Invalid name for tree '{name}'"));
    }

    let mut parameters = Vec::new();
    for word in words {
        let parameter = parse_parameter(word)?;
        ctx.add_variable(parameter.clone());
        parameters.push(parameter);
    }
    Ok(BehaviorTree { name, line, parameters, children: Vec::new() })
}

fn parse_parameter(word: &str) -> Result<VarRef, String> {
    let inner = word.strip_suffix('>').unwrap_or(word);
    let (type_name, var_name) = inner
        .split_once('<')
        .ok_or_else(|| format!("Invalid parameter '{word}'"))?;
    let kind = ValueKind::from_type_name(type_name)
        .ok_or_else(|| format!("Unknown parameter type '{type_name}'"))?;
    if var_name.is_empty() || !var_name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(format!("Invalid variable '{var_name}'"));
    }
    Ok(Variable::new(var_name, kind.zero()))
}

/// `x = Int<0>` and friends: an explicit literal type with one value chunk.
fn parse_declaration(target: &str, type_name: &str, chunks: &[String]) -> Result<VarRef, String> {
    let kind = ValueKind::from_type_name(type_name)
        .ok_or_else(|| format!("Unknown type '{type_name}'"))?;
    let raw = chunks.first().map(String::as_str).unwrap_or("");
    let value = Value::parse_literal(kind, raw)
        .ok_or_else(|| format!("Invalid {kind} literal '{raw}'"))?;
    Ok(Variable::new(target, value))
}

fn parse_branch(text: &str, ctx: &BehaviorContext) -> Result<BranchKind, String> {
    let mut words = text.split_whitespace();
    let keyword = words.next().unwrap_or("");
    match keyword {
        "sequence" => Ok(BranchKind::Sequence),
        "selector" => Ok(BranchKind::Selector),
        "repeat" => {
            let count = match words.next() {
                None => Binding::Const(Value::Int(1)),
                Some(word) => match Value::parse_literal(ValueKind::Int, word) {
                    Some(value) => Binding::Const(value),
                    None => match ctx.variable(word) {
                        Some(var) if var.kind() == ValueKind::Int => Binding::Var(var),
                        Some(var) => {
                            return Err(format!("'repeat' expects an Int count, '{}' is {}", word, var.kind()));
                        }
                        None => return Err(format!("unknown variable '{word}' for 'repeat'")),
                    },
                },
            };
            Ok(BranchKind::Repeat { count })
        }
        "while" => {
            let name = words.next().ok_or("'while' requires a Bool variable")?;
            let test = match ctx.variable(name) {
                Some(var) if var.kind() == ValueKind::Bool => var,
                Some(var) => {
                    return Err(format!("'while' expects a Bool variable, '{}' is {}", name, var.kind()));
                }
                None => return Err(format!("unknown variable '{name}' for 'while'")),
            };
            let negate = match words.next() {
                None => false,
                Some("not") => true,
                Some(other) => return Err(format!("unexpected '{other}' after 'while' test")),
            };
            Ok(BranchKind::While { test, negate })
        }
        other => Err(format!("Unknown branch '{other}'")),
    }
}
