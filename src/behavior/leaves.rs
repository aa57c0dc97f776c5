//! Leaf vocabulary of the behavior language. Every leaf validates and binds
//! its options once at compile time through its constructor (the
//! `verify_options` step), then stays pure per tick: reading bound variables,
//! mutating them, or poking the runtime through `Game`.

use crate::behavior::{BehaviorContext, NodeResult};
use crate::events::EngineEvent;
use crate::game::Game;
use crate::time::TimerTask;
use crate::tokenizer::OptionBag;
use crate::value::{unquote, Binding, Value, ValueKind, VarRef};
use glam::{Vec2, Vec3, Vec4};
use rand::Rng;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareMode {
    Equal,
    GreaterThan,
    LessThan,
}

/// The homogeneous `(value, target, clamp)` triple the arithmetic leaves
/// operate on. All three share one arity, checked at compile time.
#[derive(Debug)]
pub struct ArithPair {
    pub value: Binding,
    pub target: VarRef,
    pub clamp: Option<Binding>,
}

pub struct ResolvedCall {
    pub tree: String,
    pub targets: Vec<Rc<BehaviorContext>>,
}

impl std::fmt::Debug for ResolvedCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCall")
            .field("tree", &self.tree)
            .field("targets", &self.targets.len())
            .finish()
    }
}

/// `Call` resolves its dotted tree reference once on first execution and
/// memoizes the target contexts; a reference routed through a Text variable
/// is re-resolved every call instead.
#[derive(Debug)]
pub struct CallLeaf {
    pub tree_ref: String,
    pub via_variable: Option<VarRef>,
    pub parameters: Vec<VarRef>,
    pub resolved: RefCell<Option<ResolvedCall>>,
}

#[derive(Debug)]
pub enum Leaf {
    Set { target: VarRef, value: Binding },
    Add(ArithPair),
    Subtract(ArithPair),
    Multiply(ArithPair),
    IsVariable { target: VarRef, value: Binding, mode: CompareMode },
    Random { target: VarRef, from: Binding, to: Binding },
    RandomColor { target: VarRef, a: Binding, b: Binding, c: Binding, d: Binding },
    Log { entries: Vec<String> },
    Call(CallLeaf),
    StartTimer { tree_ref: String, interval: Binding, once: bool, parameters: Vec<VarRef> },
    SetScene { map: String, scene: String },
    IsKeyDown { key: String },
    IsButtonDown { button: String },
    Swiped { direction: String },
    HasTouch,
    HasTap,
    HasDoubleTap,
    GetTouchPos { target: VarRef },
    DistanceToShape { position: Binding, radius: Option<Binding>, shape: String, target: VarRef },
    ShapeContactCount { shape: String, target: VarRef },
    SetVisible { shape: String, value: Binding },
    IsVisible { shape: String },
    SetPosition2D { shape: String, value: Binding },
    SetLinearVelocity2D { shape: String, value: Binding },
    GetLinearVelocity2D { shape: String, target: VarRef },
    ApplyForce2D { shape: String, value: Binding },
    ApplyTexture2D { shape: String, id: String, flip_x: Option<Binding> },
    CreateInstance2D { instancer: String, position: Binding },
    DestroyInstance2D { instancer: String },
    Length { value: Binding, target: VarRef },
    Distance { from: Binding, to: Binding, target: VarRef },
    MoveTo2D { variable: VarRef, destination: Binding, step: Binding },
    SetCamera2D { offset: Option<Binding>, zoom: Option<Binding> },
    PlayAudio { id: String },
}

// ---------------------------------------------------------------------------
// Option extraction
// ---------------------------------------------------------------------------

/// Required string option; quotes are stripped.
fn extract_string(bag: &OptionBag, name: &str, leaf: &str) -> Result<String, String> {
    bag.get(name)
        .map(|v| unquote(v).to_string())
        .ok_or_else(|| format!("{leaf} requires a '{name}' option"))
}

/// Literal-or-variable binding of a known kind. A value that parses as a
/// literal of `kind` binds as a constant; otherwise it is looked up as a
/// variable of that kind in the context.
fn extract_binding(
    bag: &OptionBag,
    ctx: &BehaviorContext,
    name: &str,
    kind: ValueKind,
    optional: bool,
) -> Result<Option<Binding>, String> {
    let Some(raw) = bag.get(name) else {
        if optional {
            return Ok(None);
        }
        return Err(format!("missing required '{name}' option"));
    };
    if let Some(value) = Value::parse_literal(kind, raw) {
        return Ok(Some(Binding::Const(value)));
    }
    let reference = unquote(raw);
    match ctx.variable(reference) {
        Some(var) if var.kind() == kind => Ok(Some(Binding::Var(var))),
        Some(var) => Err(format!("option '{name}' expects {kind}, variable '{}' is {}", reference, var.kind())),
        None => Err(format!("unknown variable '{reference}' for option '{name}'")),
    }
}

/// Like `extract_binding`, but the kind is inferred: literals are tried from
/// narrow to wide, otherwise the variable's own kind decides.
fn extract_any_binding(
    bag: &OptionBag,
    ctx: &BehaviorContext,
    name: &str,
) -> Result<Binding, String> {
    let raw = bag.get(name).ok_or_else(|| format!("missing required '{name}' option"))?;
    for kind in [ValueKind::Int, ValueKind::Float, ValueKind::Float2, ValueKind::Float3, ValueKind::Float4] {
        if let Some(value) = Value::parse_literal(kind, raw) {
            return Ok(Binding::Const(value));
        }
    }
    let reference = unquote(raw);
    ctx.variable(reference)
        .map(Binding::Var)
        .ok_or_else(|| format!("unknown variable '{reference}' for option '{name}'"))
}

/// A destination option: must name an existing variable.
fn extract_var(bag: &OptionBag, ctx: &BehaviorContext, name: &str) -> Result<VarRef, String> {
    let raw = bag.get(name).ok_or_else(|| format!("missing required '{name}' option"))?;
    let reference = unquote(raw);
    ctx.variable(reference).ok_or_else(|| format!("unknown variable '{reference}' for option '{name}'"))
}

fn extract_var_of(
    bag: &OptionBag,
    ctx: &BehaviorContext,
    name: &str,
    kind: ValueKind,
) -> Result<VarRef, String> {
    let var = extract_var(bag, ctx, name)?;
    if var.kind() != kind {
        return Err(format!("option '{name}' expects a {kind} variable, '{}' is {}", var.name(), var.kind()));
    }
    Ok(var)
}

/// The value half of an arithmetic/compare pair. It is carried either under
/// the type-name key matching the target (`Int:`, `Float2:`, ...) or under a
/// generic `Value:` key; when absent, `default` applies.
fn extract_required(
    bag: &OptionBag,
    ctx: &BehaviorContext,
    name: &str,
    kind: ValueKind,
) -> Result<Binding, String> {
    extract_binding(bag, ctx, name, kind, false)?
        .ok_or_else(|| format!("missing required '{name}' option"))
}

fn extract_typed_value(
    bag: &OptionBag,
    ctx: &BehaviorContext,
    kind: ValueKind,
    default: Option<Value>,
) -> Result<Binding, String> {
    let type_key = kind.to_string().to_lowercase();
    for key in [type_key.as_str(), "value"] {
        if bag.get(key).is_some() {
            return extract_required(bag, ctx, key, kind);
        }
    }
    match default {
        Some(value) => Ok(Binding::Const(value)),
        None => Err(format!("missing '{type_key}' or 'value' option")),
    }
}

/// Binds the `(value, target, clamp)` triple for Add/Subtract/Multiply and
/// the `(value, target)` pair for IsVariable.
fn extract_pair(
    bag: &OptionBag,
    ctx: &BehaviorContext,
    target_option: &str,
    clamp_option: Option<&str>,
    default_value: bool,
) -> Result<ArithPair, String> {
    let target = extract_var(bag, ctx, target_option)?;
    let kind = target.kind();
    if !matches!(kind, ValueKind::Int | ValueKind::Float | ValueKind::Float2 | ValueKind::Float3 | ValueKind::Float4) {
        return Err(format!("option '{target_option}' expects a numeric variable, '{}' is {}", target.name(), kind));
    }
    let default = if default_value { Some(kind.one()) } else { None };
    let value = extract_typed_value(bag, ctx, kind, default)?;
    let clamp = match clamp_option {
        Some(name) => extract_binding(bag, ctx, name, kind, true)?,
        None => None,
    };
    Ok(ArithPair { value, target, clamp })
}

fn extract_bool(bag: &OptionBag, name: &str, default: bool) -> bool {
    bag.get(name).map(|v| v.trim().eq_ignore_ascii_case("true")).unwrap_or(default)
}

/// Comma-separated list of existing variables (Call/StartTimer arguments).
fn extract_variable_list(bag: &OptionBag, ctx: &BehaviorContext, name: &str) -> Result<Vec<VarRef>, String> {
    let Some(raw) = bag.get(name) else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for part in raw.split(',') {
        let reference = unquote(part.trim());
        match ctx.variable(reference) {
            Some(var) => out.push(var),
            None => return Err(format!("unknown variable '{reference}' in '{name}'")),
        }
    }
    Ok(out)
}

fn extract_mode(bag: &OptionBag) -> Result<CompareMode, String> {
    match bag.get("mode").map(unquote) {
        Some("Equal") => Ok(CompareMode::Equal),
        Some("GreaterThan") => Ok(CompareMode::GreaterThan),
        Some("LessThan") => Ok(CompareMode::LessThan),
        Some(other) => Err(format!("'mode' needs to be 'Equal', 'GreaterThan' or 'LessThan', not '{other}'")),
        None => Err("missing 'mode' option".to_string()),
    }
}

// ---------------------------------------------------------------------------
// Constructor registry
// ---------------------------------------------------------------------------

pub type LeafCtor = fn(&OptionBag, &BehaviorContext) -> Result<Leaf, String>;

/// Name → constructor table; the compiler walks this to turn a statement
/// into a bound leaf.
pub const REGISTRY: &[(&str, LeafCtor)] = &[
    ("Set", build_set),
    ("Add", build_add),
    ("Subtract", build_subtract),
    ("Multiply", build_multiply),
    ("IsVariable", build_is_variable),
    ("Random", build_random),
    ("RandomColor", build_random_color),
    ("Log", build_log),
    ("Call", build_call),
    ("StartTimer", build_start_timer),
    ("SetScene", build_set_scene),
    ("IsKeyDown", build_is_key_down),
    ("IsButtonDown", build_is_button_down),
    ("Swiped", build_swiped),
    ("HasTouch", |_, _| Ok(Leaf::HasTouch)),
    ("HasTap", |_, _| Ok(Leaf::HasTap)),
    ("HasDoubleTap", |_, _| Ok(Leaf::HasDoubleTap)),
    ("GetTouchPos", build_get_touch_pos),
    ("DistanceToShape", build_distance_to_shape),
    ("ShapeContactCount", build_shape_contact_count),
    ("SetVisible", build_set_visible),
    ("IsVisible", build_is_visible),
    ("SetPosition2D", build_set_position),
    ("SetLinearVelocity2D", build_set_linear_velocity),
    ("GetLinearVelocity2D", build_get_linear_velocity),
    ("ApplyForce2D", build_apply_force),
    ("ApplyTexture2D", build_apply_texture),
    ("CreateInstance2D", build_create_instance),
    ("DestroyInstance2D", build_destroy_instance),
    ("Length", build_length),
    ("Distance", build_distance),
    ("MoveTo2D", build_move_to),
    ("SetCamera2D", build_set_camera),
    ("PlayAudio", build_play_audio),
];

pub fn construct(name: &str, bag: &OptionBag, ctx: &BehaviorContext) -> Option<Result<Leaf, String>> {
    REGISTRY.iter().find(|(n, _)| *n == name).map(|(_, ctor)| ctor(bag, ctx))
}

fn build_set(bag: &OptionBag, ctx: &BehaviorContext) -> Result<Leaf, String> {
    let target = extract_var(bag, ctx, "variable")?;
    let value = extract_typed_value(bag, ctx, target.kind(), None)?;
    Ok(Leaf::Set { target, value })
}

fn build_add(bag: &OptionBag, ctx: &BehaviorContext) -> Result<Leaf, String> {
    Ok(Leaf::Add(extract_pair(bag, ctx, "to", Some("maximum"), true)?))
}

fn build_subtract(bag: &OptionBag, ctx: &BehaviorContext) -> Result<Leaf, String> {
    Ok(Leaf::Subtract(extract_pair(bag, ctx, "from", Some("minimum"), true)?))
}

fn build_multiply(bag: &OptionBag, ctx: &BehaviorContext) -> Result<Leaf, String> {
    Ok(Leaf::Multiply(extract_pair(bag, ctx, "with", None, false)?))
}

fn build_is_variable(bag: &OptionBag, ctx: &BehaviorContext) -> Result<Leaf, String> {
    let target = extract_var(bag, ctx, "variable")?;
    let value = extract_typed_value(bag, ctx, target.kind(), None)?;
    let mode = extract_mode(bag)?;
    Ok(Leaf::IsVariable { target, value, mode })
}

fn build_random(bag: &OptionBag, ctx: &BehaviorContext) -> Result<Leaf, String> {
    let target = extract_var(bag, ctx, "variable")?;
    let kind = target.kind();
    let from = extract_binding(bag, ctx, "from", kind, true)?.unwrap_or(Binding::Const(kind.zero()));
    let to = extract_required(bag, ctx, "to", kind)?;
    Ok(Leaf::Random { target, from, to })
}

fn build_random_color(bag: &OptionBag, ctx: &BehaviorContext) -> Result<Leaf, String> {
    // Standard cosine palette coefficients.
    let default = |v: Vec3| Binding::Const(Value::Float3(v));
    let a = extract_binding(bag, ctx, "a", ValueKind::Float3, true)?.unwrap_or(default(Vec3::splat(0.5)));
    let b = extract_binding(bag, ctx, "b", ValueKind::Float3, true)?.unwrap_or(default(Vec3::splat(0.5)));
    let c = extract_binding(bag, ctx, "c", ValueKind::Float3, true)?.unwrap_or(default(Vec3::ONE));
    let d = extract_binding(bag, ctx, "d", ValueKind::Float3, true)?.unwrap_or(default(Vec3::new(0.0, 0.33, 0.67)));
    let target = extract_var_of(bag, ctx, "variable", ValueKind::Float4)?;
    Ok(Leaf::RandomColor { target, a, b, c, d })
}

fn build_log(bag: &OptionBag, _ctx: &BehaviorContext) -> Result<Leaf, String> {
    let entries = bag.iter().map(|(_, value)| value.to_string()).collect();
    Ok(Leaf::Log { entries })
}

fn build_call(bag: &OptionBag, ctx: &BehaviorContext) -> Result<Leaf, String> {
    let tree_ref = extract_string(bag, "tree", "Call")?;
    let parameters = extract_variable_list(bag, ctx, "variables")?;
    let via_variable = ctx.variable(&tree_ref).filter(|v| v.kind() == ValueKind::Text);
    Ok(Leaf::Call(CallLeaf { tree_ref, via_variable, parameters, resolved: RefCell::new(None) }))
}

fn build_start_timer(bag: &OptionBag, ctx: &BehaviorContext) -> Result<Leaf, String> {
    let tree_ref = extract_string(bag, "tree", "StartTimer")?;
    let interval = extract_required(bag, ctx, "interval", ValueKind::Float)?;
    let once = extract_bool(bag, "once", false);
    let parameters = extract_variable_list(bag, ctx, "variables")?;
    Ok(Leaf::StartTimer { tree_ref, interval, once, parameters })
}

fn build_set_scene(bag: &OptionBag, _ctx: &BehaviorContext) -> Result<Leaf, String> {
    let map = extract_string(bag, "map", "SetScene")?;
    let scene = extract_string(bag, "sceneid", "SetScene")?;
    Ok(Leaf::SetScene { map, scene })
}

fn build_is_key_down(bag: &OptionBag, _ctx: &BehaviorContext) -> Result<Leaf, String> {
    Ok(Leaf::IsKeyDown { key: extract_string(bag, "key", "IsKeyDown")? })
}

fn build_is_button_down(bag: &OptionBag, _ctx: &BehaviorContext) -> Result<Leaf, String> {
    Ok(Leaf::IsButtonDown { button: extract_string(bag, "button", "IsButtonDown")? })
}

fn build_swiped(bag: &OptionBag, _ctx: &BehaviorContext) -> Result<Leaf, String> {
    Ok(Leaf::Swiped { direction: extract_string(bag, "direction", "Swiped")?.to_lowercase() })
}

fn build_get_touch_pos(bag: &OptionBag, ctx: &BehaviorContext) -> Result<Leaf, String> {
    Ok(Leaf::GetTouchPos { target: extract_var_of(bag, ctx, "variable", ValueKind::Float2)? })
}

fn build_distance_to_shape(bag: &OptionBag, ctx: &BehaviorContext) -> Result<Leaf, String> {
    let position = extract_required(bag, ctx, "position", ValueKind::Float2)?;
    let radius = extract_binding(bag, ctx, "radius", ValueKind::Float, true)?;
    let shape = extract_string(bag, "shapeid", "DistanceToShape")?;
    let target = extract_var_of(bag, ctx, "variable", ValueKind::Float)?;
    Ok(Leaf::DistanceToShape { position, radius, shape, target })
}

fn build_shape_contact_count(bag: &OptionBag, ctx: &BehaviorContext) -> Result<Leaf, String> {
    let shape = extract_string(bag, "shapeid", "ShapeContactCount")?;
    let target = extract_var_of(bag, ctx, "variable", ValueKind::Int)?;
    Ok(Leaf::ShapeContactCount { shape, target })
}

fn build_set_visible(bag: &OptionBag, ctx: &BehaviorContext) -> Result<Leaf, String> {
    let shape = extract_string(bag, "shapeid", "SetVisible")?;
    let value = match extract_binding(bag, ctx, "bool", ValueKind::Bool, true)? {
        Some(binding) => binding,
        None => extract_required(bag, ctx, "value", ValueKind::Bool)?,
    };
    Ok(Leaf::SetVisible { shape, value })
}

fn build_is_visible(bag: &OptionBag, _ctx: &BehaviorContext) -> Result<Leaf, String> {
    Ok(Leaf::IsVisible { shape: extract_string(bag, "shapeid", "IsVisible")? })
}

fn build_set_position(bag: &OptionBag, ctx: &BehaviorContext) -> Result<Leaf, String> {
    let shape = extract_string(bag, "shapeid", "SetPosition2D")?;
    let value = extract_typed_value(bag, ctx, ValueKind::Float2, None)?;
    Ok(Leaf::SetPosition2D { shape, value })
}

fn build_set_linear_velocity(bag: &OptionBag, ctx: &BehaviorContext) -> Result<Leaf, String> {
    let shape = extract_string(bag, "shapeid", "SetLinearVelocity2D")?;
    let value = extract_typed_value(bag, ctx, ValueKind::Float2, None)?;
    Ok(Leaf::SetLinearVelocity2D { shape, value })
}

fn build_get_linear_velocity(bag: &OptionBag, ctx: &BehaviorContext) -> Result<Leaf, String> {
    let shape = extract_string(bag, "shapeid", "GetLinearVelocity2D")?;
    let target = extract_var_of(bag, ctx, "variable", ValueKind::Float2)?;
    Ok(Leaf::GetLinearVelocity2D { shape, target })
}

fn build_apply_force(bag: &OptionBag, ctx: &BehaviorContext) -> Result<Leaf, String> {
    let shape = extract_string(bag, "shapeid", "ApplyForce2D")?;
    let value = extract_typed_value(bag, ctx, ValueKind::Float2, None)?;
    Ok(Leaf::ApplyForce2D { shape, value })
}

fn build_apply_texture(bag: &OptionBag, ctx: &BehaviorContext) -> Result<Leaf, String> {
    let shape = extract_string(bag, "shapeid", "ApplyTexture2D")?;
    let id = extract_string(bag, "id", "ApplyTexture2D")?;
    let flip_x = extract_binding(bag, ctx, "flipx", ValueKind::Bool, true)?;
    Ok(Leaf::ApplyTexture2D { shape, id, flip_x })
}

fn build_create_instance(bag: &OptionBag, ctx: &BehaviorContext) -> Result<Leaf, String> {
    let instancer = extract_string(bag, "id", "CreateInstance2D")?;
    let position = extract_required(bag, ctx, "position", ValueKind::Float2)?;
    Ok(Leaf::CreateInstance2D { instancer, position })
}

fn build_destroy_instance(bag: &OptionBag, _ctx: &BehaviorContext) -> Result<Leaf, String> {
    Ok(Leaf::DestroyInstance2D { instancer: extract_string(bag, "id", "DestroyInstance2D")? })
}

fn build_length(bag: &OptionBag, ctx: &BehaviorContext) -> Result<Leaf, String> {
    let value = extract_any_binding(bag, ctx, "value")?;
    let target = extract_var_of(bag, ctx, "variable", ValueKind::Float)?;
    Ok(Leaf::Length { value, target })
}

fn build_distance(bag: &OptionBag, ctx: &BehaviorContext) -> Result<Leaf, String> {
    let from = extract_any_binding(bag, ctx, "from")?;
    let to = extract_any_binding(bag, ctx, "to")?;
    if from.kind() != to.kind() {
        return Err(format!("'from' ({}) and 'to' ({}) disagree", from.kind(), to.kind()));
    }
    let target = extract_var_of(bag, ctx, "variable", ValueKind::Float)?;
    Ok(Leaf::Distance { from, to, target })
}

fn build_move_to(bag: &OptionBag, ctx: &BehaviorContext) -> Result<Leaf, String> {
    let variable = extract_var_of(bag, ctx, "variable", ValueKind::Float2)?;
    let destination = extract_required(bag, ctx, "destination", ValueKind::Float2)?;
    let step = extract_binding(bag, ctx, "step", ValueKind::Float, true)?
        .unwrap_or(Binding::Const(Value::Float(1.0)));
    Ok(Leaf::MoveTo2D { variable, destination, step })
}

fn build_set_camera(bag: &OptionBag, ctx: &BehaviorContext) -> Result<Leaf, String> {
    let offset = extract_binding(bag, ctx, "offset", ValueKind::Float2, true)?;
    let zoom = extract_binding(bag, ctx, "zoom", ValueKind::Float, true)?;
    Ok(Leaf::SetCamera2D { offset, zoom })
}

fn build_play_audio(bag: &OptionBag, _ctx: &BehaviorContext) -> Result<Leaf, String> {
    Ok(Leaf::PlayAudio { id: extract_string(bag, "id", "PlayAudio")? })
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum ArithOp {
    Add,
    Subtract,
    Multiply,
}

fn apply_arith(pair: &ArithPair, op: ArithOp) -> NodeResult {
    let value = pair.value.value();
    let clamp = pair.clamp.as_ref().map(|c| c.value());
    let current = pair.target.get();
    let next = match (current, value) {
        (Value::Int(a), Value::Int(b)) => {
            let mut x = match op {
                ArithOp::Add => a + b,
                ArithOp::Subtract => a - b,
                ArithOp::Multiply => a * b,
            };
            if let Some(Value::Int(c)) = clamp {
                x = match op {
                    ArithOp::Add => x.min(c),
                    ArithOp::Subtract => x.max(c),
                    ArithOp::Multiply => x,
                };
            }
            Value::Int(x)
        }
        (Value::Float(a), Value::Float(b)) => {
            let mut x = match op {
                ArithOp::Add => a + b,
                ArithOp::Subtract => a - b,
                ArithOp::Multiply => a * b,
            };
            if let Some(Value::Float(c)) = clamp {
                x = match op {
                    ArithOp::Add => x.min(c),
                    ArithOp::Subtract => x.max(c),
                    ArithOp::Multiply => x,
                };
            }
            Value::Float(x)
        }
        (Value::Float2(a), Value::Float2(b)) => {
            let mut x = match op {
                ArithOp::Add => a + b,
                ArithOp::Subtract => a - b,
                ArithOp::Multiply => a * b,
            };
            if let Some(Value::Float2(c)) = clamp {
                x = match op {
                    ArithOp::Add => x.min(c),
                    ArithOp::Subtract => x.max(c),
                    ArithOp::Multiply => x,
                };
            }
            Value::Float2(x)
        }
        (Value::Float3(a), Value::Float3(b)) => {
            let mut x = match op {
                ArithOp::Add => a + b,
                ArithOp::Subtract => a - b,
                ArithOp::Multiply => a * b,
            };
            if let Some(Value::Float3(c)) = clamp {
                x = match op {
                    ArithOp::Add => x.min(c),
                    ArithOp::Subtract => x.max(c),
                    ArithOp::Multiply => x,
                };
            }
            Value::Float3(x)
        }
        (Value::Float4(a), Value::Float4(b)) => {
            let mut x = match op {
                ArithOp::Add => a + b,
                ArithOp::Subtract => a - b,
                ArithOp::Multiply => a * b,
            };
            if let Some(Value::Float4(c)) = clamp {
                x = match op {
                    ArithOp::Add => x.min(c),
                    ArithOp::Subtract => x.max(c),
                    ArithOp::Multiply => x,
                };
            }
            Value::Float4(x)
        }
        _ => return NodeResult::Failure,
    };
    pair.target.set(next);
    NodeResult::Success
}

fn compare(target: &Value, value: &Value, mode: CompareMode) -> Option<bool> {
    // Vector comparisons AND their per-component results.
    let result = match (target, value) {
        (Value::Bool(a), Value::Bool(b)) => match mode {
            CompareMode::Equal => a == b,
            _ => return None,
        },
        (Value::Text(a), Value::Text(b)) => match mode {
            CompareMode::Equal => a == b,
            _ => return None,
        },
        (Value::Int(a), Value::Int(b)) => match mode {
            CompareMode::Equal => a == b,
            CompareMode::GreaterThan => a > b,
            CompareMode::LessThan => a < b,
        },
        (Value::Float(a), Value::Float(b)) => match mode {
            CompareMode::Equal => a == b,
            CompareMode::GreaterThan => a > b,
            CompareMode::LessThan => a < b,
        },
        (Value::Float2(a), Value::Float2(b)) => match mode {
            CompareMode::Equal => a == b,
            CompareMode::GreaterThan => a.x > b.x && a.y > b.y,
            CompareMode::LessThan => a.x < b.x && a.y < b.y,
        },
        (Value::Float3(a), Value::Float3(b)) => match mode {
            CompareMode::Equal => a == b,
            CompareMode::GreaterThan => a.cmpgt(*b).all(),
            CompareMode::LessThan => a.cmplt(*b).all(),
        },
        (Value::Float4(a), Value::Float4(b)) => match mode {
            CompareMode::Equal => a == b,
            CompareMode::GreaterThan => a.cmpgt(*b).all(),
            CompareMode::LessThan => a.cmplt(*b).all(),
        },
        _ => return None,
    };
    Some(result)
}

/// Resolves a dotted tree reference from the executing context: no dot stays
/// in-context, `game.` targets the root Game context, anything else targets a
/// map behavior binding — fanning out over every live instance pair when the
/// binding is instanced.
pub(crate) fn resolve_call_targets(
    game: &Game,
    ctx: &Rc<BehaviorContext>,
    reference: &str,
) -> Option<ResolvedCall> {
    let reference = unquote(reference);
    let mut parts = reference.splitn(2, '.');
    let head = parts.next()?;
    match parts.next() {
        None => Some(ResolvedCall { tree: head.to_string(), targets: vec![ctx.clone()] }),
        Some(tree) => {
            let mut targets = Vec::new();
            if head == "game" {
                targets.push(game.game_context()?.clone());
            } else {
                let map = game.map()?;
                let binding = map.behaviors.get(head)?;
                match binding.instancer.as_deref().and_then(|name| map.instancer_pairs(name)) {
                    Some(pairs) => {
                        for pair in pairs {
                            targets.push(pair.behavior.context.clone());
                        }
                    }
                    None => targets.push(binding.context.clone()),
                }
            }
            Some(ResolvedCall { tree: tree.to_string(), targets })
        }
    }
}

/// Copies argument values into the callee tree's parameters, then executes
/// the tree in every target context.
pub(crate) fn invoke_call(
    game: &mut Game,
    resolved: &ResolvedCall,
    parameters: &[VarRef],
) {
    for target in &resolved.targets {
        if let Some(tree) = target.tree(&resolved.tree) {
            for (index, argument) in parameters.iter().enumerate() {
                if let Some(param) = tree.parameters.get(index) {
                    param.copy_from(argument);
                }
            }
        }
    }
    for target in &resolved.targets {
        target.execute(&resolved.tree, game);
    }
}

impl Leaf {
    pub fn name(&self) -> &'static str {
        match self {
            Leaf::Set { .. } => "Set",
            Leaf::Add(_) => "Add",
            Leaf::Subtract(_) => "Subtract",
            Leaf::Multiply(_) => "Multiply",
            Leaf::IsVariable { .. } => "IsVariable",
            Leaf::Random { .. } => "Random",
            Leaf::RandomColor { .. } => "RandomColor",
            Leaf::Log { .. } => "Log",
            Leaf::Call(_) => "Call",
            Leaf::StartTimer { .. } => "StartTimer",
            Leaf::SetScene { .. } => "SetScene",
            Leaf::IsKeyDown { .. } => "IsKeyDown",
            Leaf::IsButtonDown { .. } => "IsButtonDown",
            Leaf::Swiped { .. } => "Swiped",
            Leaf::HasTouch => "HasTouch",
            Leaf::HasTap => "HasTap",
            Leaf::HasDoubleTap => "HasDoubleTap",
            Leaf::GetTouchPos { .. } => "GetTouchPos",
            Leaf::DistanceToShape { .. } => "DistanceToShape",
            Leaf::ShapeContactCount { .. } => "ShapeContactCount",
            Leaf::SetVisible { .. } => "SetVisible",
            Leaf::IsVisible { .. } => "IsVisible",
            Leaf::SetPosition2D { .. } => "SetPosition2D",
            Leaf::SetLinearVelocity2D { .. } => "SetLinearVelocity2D",
            Leaf::GetLinearVelocity2D { .. } => "GetLinearVelocity2D",
            Leaf::ApplyForce2D { .. } => "ApplyForce2D",
            Leaf::ApplyTexture2D { .. } => "ApplyTexture2D",
            Leaf::CreateInstance2D { .. } => "CreateInstance2D",
            Leaf::DestroyInstance2D { .. } => "DestroyInstance2D",
            Leaf::Length { .. } => "Length",
            Leaf::Distance { .. } => "Distance",
            Leaf::MoveTo2D { .. } => "MoveTo2D",
            Leaf::SetCamera2D { .. } => "SetCamera2D",
            Leaf::PlayAudio { .. } => "PlayAudio",
        }
    }

    pub fn execute(&self, game: &mut Game, ctx: &Rc<BehaviorContext>, line: u32) -> NodeResult {
        let fail = |result: NodeResult| {
            if result == NodeResult::Failure {
                ctx.add_failure(line);
            }
            result
        };

        match self {
            Leaf::Set { target, value } => {
                let value = value.value();
                if value.kind() == target.kind() {
                    target.set(value);
                    NodeResult::Success
                } else {
                    fail(NodeResult::Failure)
                }
            }
            Leaf::Add(pair) => apply_arith(pair, ArithOp::Add),
            Leaf::Subtract(pair) => apply_arith(pair, ArithOp::Subtract),
            Leaf::Multiply(pair) => apply_arith(pair, ArithOp::Multiply),
            Leaf::IsVariable { target, value, mode } => {
                match compare(&target.get(), &value.value(), *mode) {
                    Some(true) => NodeResult::Success,
                    _ => fail(NodeResult::Failure),
                }
            }
            Leaf::Random { target, from, to } => {
                let mut rng = rand::thread_rng();
                let next = match (from.value(), to.value()) {
                    (Value::Int(a), Value::Int(b)) if a <= b => Value::Int(rng.gen_range(a..=b)),
                    (Value::Float(a), Value::Float(b)) if a <= b => Value::Float(rng.gen_range(a..=b)),
                    (Value::Float2(a), Value::Float2(b)) if a.x <= b.x && a.y <= b.y => {
                        Value::Float2(Vec2::new(rng.gen_range(a.x..=b.x), rng.gen_range(a.y..=b.y)))
                    }
                    (Value::Float3(a), Value::Float3(b)) if a.cmple(b).all() => Value::Float3(Vec3::new(
                        rng.gen_range(a.x..=b.x),
                        rng.gen_range(a.y..=b.y),
                        rng.gen_range(a.z..=b.z),
                    )),
                    (Value::Float4(a), Value::Float4(b)) if a.cmple(b).all() => Value::Float4(Vec4::new(
                        rng.gen_range(a.x..=b.x),
                        rng.gen_range(a.y..=b.y),
                        rng.gen_range(a.z..=b.z),
                        rng.gen_range(a.w..=b.w),
                    )),
                    _ => return fail(NodeResult::Failure),
                };
                target.set(next);
                NodeResult::Success
            }
            Leaf::RandomColor { target, a, b, c, d } => {
                let (Ok(a), Ok(b), Ok(c), Ok(d)) = (
                    a.value().as_float3(),
                    b.value().as_float3(),
                    c.value().as_float3(),
                    d.value().as_float3(),
                ) else {
                    return fail(NodeResult::Failure);
                };
                let t: f32 = rand::thread_rng().gen_range(0.0..=1.0);
                let phase = 6.28318 * (c * t + d);
                let rgb = a + b * Vec3::new(phase.x.cos(), phase.y.cos(), phase.z.cos());
                let w = target.get().as_float4().map(|v| v.w).unwrap_or(1.0);
                target.set(Value::Float4(Vec4::new(rgb.x, rgb.y, rgb.z, w)));
                NodeResult::Success
            }
            Leaf::Log { entries } => {
                let mut text = String::new();
                for entry in entries {
                    if !text.is_empty() {
                        text.push(' ');
                    }
                    match ctx.variable(unquote(entry)) {
                        Some(var) => {
                            text.push_str(var.name());
                            text.push(' ');
                            text.push_str(&var.get().to_string());
                        }
                        None => text.push_str(unquote(entry)),
                    }
                }
                game.push_log(text);
                NodeResult::Success
            }
            Leaf::Call(call) => {
                let needs_resolve =
                    call.resolved.borrow().is_none() || call.via_variable.is_some();
                if needs_resolve {
                    let reference = match &call.via_variable {
                        Some(var) => var.text_value().unwrap_or_else(|_| call.tree_ref.clone()),
                        None => call.tree_ref.clone(),
                    };
                    *call.resolved.borrow_mut() = resolve_call_targets(game, ctx, &reference);
                }
                // Snapshot the memo so the borrow is released before the
                // call recurses; the target tree may contain this very leaf.
                let snapshot = call.resolved.borrow().as_ref().map(|r| ResolvedCall {
                    tree: r.tree.clone(),
                    targets: r.targets.clone(),
                });
                match snapshot {
                    Some(resolved) if !resolved.targets.is_empty() => {
                        invoke_call(game, &resolved, &call.parameters);
                        NodeResult::Success
                    }
                    _ => fail(NodeResult::Failure),
                }
            }
            Leaf::StartTimer { tree_ref, interval, once, parameters } => {
                let Ok(interval) = interval.value().as_float() else {
                    return fail(NodeResult::Failure);
                };
                game.scheduler.schedule(TimerTask {
                    fire_at: game.clock() + interval as f64,
                    interval: interval as f64,
                    once: *once,
                    origin: ctx.clone(),
                    tree_ref: tree_ref.clone(),
                    parameters: parameters.clone(),
                });
                NodeResult::Success
            }
            Leaf::SetScene { map, scene } => match game.set_scene(map, scene) {
                Ok(()) => NodeResult::Success,
                Err(_) => fail(NodeResult::Failure),
            },
            Leaf::IsKeyDown { key } => {
                if game.input.is_key_down(key) {
                    NodeResult::Success
                } else {
                    fail(NodeResult::Failure)
                }
            }
            Leaf::IsButtonDown { button } => {
                if game.input.button_down.as_deref() == Some(button.as_str()) {
                    NodeResult::Success
                } else {
                    fail(NodeResult::Failure)
                }
            }
            Leaf::Swiped { direction } => {
                if game.input.swipe.as_deref() == Some(direction.as_str()) {
                    NodeResult::Success
                } else {
                    fail(NodeResult::Failure)
                }
            }
            Leaf::HasTouch => {
                if game.input.mouse_down {
                    NodeResult::Success
                } else {
                    fail(NodeResult::Failure)
                }
            }
            Leaf::HasTap => {
                if game.input.has_tap {
                    NodeResult::Success
                } else {
                    fail(NodeResult::Failure)
                }
            }
            Leaf::HasDoubleTap => {
                if game.input.has_double_tap {
                    NodeResult::Success
                } else {
                    fail(NodeResult::Failure)
                }
            }
            Leaf::GetTouchPos { target } => {
                if !game.input.mouse_down {
                    return fail(NodeResult::Failure);
                }
                let Some(map) = game.map() else {
                    return fail(NodeResult::Failure);
                };
                let pos = game.input.mouse_pos;
                let mapped = Vec2::new(
                    (pos.x - map.view_border.x) / map.aspect.x,
                    (pos.y - map.view_border.y) / map.aspect.y,
                );
                target.set(Value::Float2(mapped));
                NodeResult::Success
            }
            Leaf::DistanceToShape { position, radius, shape, target } => {
                let Ok(position) = position.value().as_float2() else {
                    return fail(NodeResult::Failure);
                };
                let radius = radius
                    .as_ref()
                    .and_then(|r| r.value().as_float().ok())
                    .unwrap_or(1.0);
                let Some(map) = game.map_mut() else {
                    return fail(NodeResult::Failure);
                };
                let aspect = map.aspect;
                let Some(shape) = map.shape_for_context(shape, ctx) else {
                    return fail(NodeResult::Failure);
                };
                let distance = shape.data.signed_distance(position, radius, aspect)
                    - shape.data.border() * aspect.z;
                target.set(Value::Float(distance));
                NodeResult::Success
            }
            Leaf::ShapeContactCount { shape, target } => {
                let Some(map) = game.map_mut() else {
                    return fail(NodeResult::Failure);
                };
                if let Some(shape) = map.shape_for_context(shape, ctx) {
                    target.set(Value::Int(shape.contacts.len() as i32));
                }
                NodeResult::Success
            }
            Leaf::SetVisible { shape, value } => {
                let Ok(visible) = value.value().as_bool() else {
                    return fail(NodeResult::Failure);
                };
                let Some(map) = game.map_mut() else {
                    return fail(NodeResult::Failure);
                };
                match map.shape_for_context(shape, ctx) {
                    Some(shape) => {
                        shape.data.visible.set(Value::Bool(visible));
                        NodeResult::Success
                    }
                    None => fail(NodeResult::Failure),
                }
            }
            Leaf::IsVisible { shape } => {
                let Some(map) = game.map_mut() else {
                    return fail(NodeResult::Failure);
                };
                match map.shape_for_context(shape, ctx) {
                    Some(shape) if shape.data.visible.bool_value().unwrap_or(false) => NodeResult::Success,
                    _ => fail(NodeResult::Failure),
                }
            }
            Leaf::SetPosition2D { shape, value } => {
                let Ok(position) = value.value().as_float2() else {
                    return fail(NodeResult::Failure);
                };
                let Some(map) = game.map_mut() else {
                    return fail(NodeResult::Failure);
                };
                match map.body_for_context(shape, ctx) {
                    Some((world, handle, size)) => {
                        world.set_body_position(handle, position, size);
                        NodeResult::Success
                    }
                    None => fail(NodeResult::Failure),
                }
            }
            Leaf::SetLinearVelocity2D { shape, value } => {
                let Ok(velocity) = value.value().as_float2() else {
                    return fail(NodeResult::Failure);
                };
                let Some(map) = game.map_mut() else {
                    return fail(NodeResult::Failure);
                };
                match map.body_for_context(shape, ctx) {
                    Some((world, handle, _)) => {
                        world.set_linear_velocity(handle, velocity);
                        NodeResult::Success
                    }
                    None => fail(NodeResult::Failure),
                }
            }
            Leaf::GetLinearVelocity2D { shape, target } => {
                let Some(map) = game.map_mut() else {
                    return fail(NodeResult::Failure);
                };
                match map.body_for_context(shape, ctx) {
                    Some((world, handle, _)) => {
                        if let Some(velocity) = world.linear_velocity(handle) {
                            target.set(Value::Float2(velocity));
                            NodeResult::Success
                        } else {
                            fail(NodeResult::Failure)
                        }
                    }
                    None => fail(NodeResult::Failure),
                }
            }
            Leaf::ApplyForce2D { shape, value } => {
                let Ok(force) = value.value().as_float2() else {
                    return fail(NodeResult::Failure);
                };
                let Some(map) = game.map_mut() else {
                    return fail(NodeResult::Failure);
                };
                match map.body_for_context(shape, ctx) {
                    Some((world, handle, _)) => {
                        world.apply_force(handle, force);
                        NodeResult::Success
                    }
                    None => fail(NodeResult::Failure),
                }
            }
            Leaf::ApplyTexture2D { shape, id, flip_x } => {
                let flip = flip_x.as_ref().and_then(|f| f.value().as_bool().ok());
                let Some(map) = game.map_mut() else {
                    return fail(NodeResult::Failure);
                };
                if map.apply_texture_to_shape(shape, id, flip) {
                    NodeResult::Success
                } else {
                    fail(NodeResult::Failure)
                }
            }
            Leaf::CreateInstance2D { instancer, position } => {
                let Ok(position) = position.value().as_float2() else {
                    return fail(NodeResult::Failure);
                };
                match crate::map::instancing::create_on_demand(game, instancer, position) {
                    Ok(()) => NodeResult::Success,
                    Err(_) => fail(NodeResult::Failure),
                }
            }
            Leaf::DestroyInstance2D { instancer } => {
                let Some(map) = game.map_mut() else {
                    return fail(NodeResult::Failure);
                };
                if map.destroy_instance(instancer, ctx) {
                    NodeResult::Success
                } else {
                    fail(NodeResult::Failure)
                }
            }
            Leaf::Length { value, target } => {
                let length = match value.value() {
                    Value::Float2(v) => v.length(),
                    Value::Float3(v) => v.length(),
                    Value::Float4(v) => v.length(),
                    _ => return fail(NodeResult::Failure),
                };
                target.set(Value::Float(length));
                NodeResult::Success
            }
            Leaf::Distance { from, to, target } => {
                let distance = match (from.value(), to.value()) {
                    (Value::Float2(a), Value::Float2(b)) => a.distance(b),
                    (Value::Float3(a), Value::Float3(b)) => a.distance(b),
                    (Value::Float4(a), Value::Float4(b)) => (a - b).length(),
                    _ => return fail(NodeResult::Failure),
                };
                target.set(Value::Float(distance));
                NodeResult::Success
            }
            Leaf::MoveTo2D { variable, destination, step } => {
                let (Ok(current), Ok(dest), Ok(step)) = (
                    variable.float2_value(),
                    destination.value().as_float2(),
                    step.value().as_float(),
                ) else {
                    return fail(NodeResult::Failure);
                };
                let angle = (dest.y - current.y).atan2(dest.x - current.x);
                variable.set(Value::Float2(Vec2::new(step * angle.cos(), step * angle.sin())));
                NodeResult::Success
            }
            Leaf::SetCamera2D { offset, zoom } => {
                let offset = offset.as_ref().and_then(|o| o.value().as_float2().ok());
                let zoom = zoom.as_ref().and_then(|z| z.value().as_float().ok());
                let Some(map) = game.map_mut() else {
                    return fail(NodeResult::Failure);
                };
                if let Some(offset) = offset {
                    map.camera.offset = Vec2::new(offset.x * map.aspect.x, offset.y * map.aspect.y);
                }
                if let Some(zoom) = zoom {
                    map.camera.zoom = zoom;
                }
                NodeResult::Success
            }
            Leaf::PlayAudio { id } => {
                let known = game.map().map(|m| m.audio.contains_key(id)).unwrap_or(false);
                if known {
                    game.events.push(EngineEvent::PlayAudio { id: id.clone() });
                    NodeResult::Success
                } else {
                    fail(NodeResult::Failure)
                }
            }
        }
    }
}
