use anyhow::{anyhow, Result};
use glam::{Vec2, Vec3, Vec4};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Closed value model of both DSLs. Every variable, tree parameter and
/// resolved option carries exactly one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i32),
    Float(f32),
    Float2(Vec2),
    Float3(Vec3),
    Float4(Vec4),
    Text(String),
    StringList(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Float2,
    Float3,
    Float4,
    Text,
    StringList,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Bool => "Bool",
            ValueKind::Int => "Int",
            ValueKind::Float => "Float",
            ValueKind::Float2 => "Float2",
            ValueKind::Float3 => "Float3",
            ValueKind::Float4 => "Float4",
            ValueKind::Text => "Text",
            ValueKind::StringList => "StringList",
        };
        write!(f, "{name}")
    }
}

impl ValueKind {
    pub fn from_type_name(name: &str) -> Option<ValueKind> {
        match name.to_lowercase().as_str() {
            "bool" => Some(ValueKind::Bool),
            "int" => Some(ValueKind::Int),
            "float" => Some(ValueKind::Float),
            "float2" => Some(ValueKind::Float2),
            "float3" => Some(ValueKind::Float3),
            "float4" => Some(ValueKind::Float4),
            "text" => Some(ValueKind::Text),
            _ => None,
        }
    }

    pub fn zero(self) -> Value {
        match self {
            ValueKind::Bool => Value::Bool(false),
            ValueKind::Int => Value::Int(0),
            ValueKind::Float => Value::Float(0.0),
            ValueKind::Float2 => Value::Float2(Vec2::ZERO),
            ValueKind::Float3 => Value::Float3(Vec3::ZERO),
            ValueKind::Float4 => Value::Float4(Vec4::ZERO),
            ValueKind::Text => Value::Text(String::new()),
            ValueKind::StringList => Value::StringList(Vec::new()),
        }
    }

    /// Identity element for the arithmetic leaves: adding or scaling by
    /// "one" of the matching arity.
    pub fn one(self) -> Value {
        match self {
            ValueKind::Bool => Value::Bool(true),
            ValueKind::Int => Value::Int(1),
            ValueKind::Float => Value::Float(1.0),
            ValueKind::Float2 => Value::Float2(Vec2::ONE),
            ValueKind::Float3 => Value::Float3(Vec3::ONE),
            ValueKind::Float4 => Value::Float4(Vec4::ONE),
            ValueKind::Text => Value::Text(String::new()),
            ValueKind::StringList => Value::StringList(Vec::new()),
        }
    }
}

fn parse_components(raw: &str, arity: usize) -> Option<Vec<f32>> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if parts.len() != arity {
        return None;
    }
    let mut out = Vec::with_capacity(arity);
    for part in parts {
        out.push(part.parse::<f32>().ok()?);
    }
    Some(out)
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Float2(_) => ValueKind::Float2,
            Value::Float3(_) => ValueKind::Float3,
            Value::Float4(_) => ValueKind::Float4,
            Value::Text(_) => ValueKind::Text,
            Value::StringList(_) => ValueKind::StringList,
        }
    }

    /// Parses a literal of the requested kind from raw option text.
    /// `None` means "not a literal of this kind"; the caller decides whether
    /// the text is a variable reference instead.
    pub fn parse_literal(kind: ValueKind, raw: &str) -> Option<Value> {
        let raw = raw.trim();
        match kind {
            ValueKind::Bool => match raw.to_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            ValueKind::Int => raw.parse::<i32>().ok().map(Value::Int),
            ValueKind::Float => raw.parse::<f32>().ok().map(Value::Float),
            ValueKind::Float2 => {
                let c = parse_components(raw, 2)?;
                Some(Value::Float2(Vec2::new(c[0], c[1])))
            }
            ValueKind::Float3 => {
                let c = parse_components(raw, 3)?;
                Some(Value::Float3(Vec3::new(c[0], c[1], c[2])))
            }
            ValueKind::Float4 => {
                let c = parse_components(raw, 4)?;
                Some(Value::Float4(Vec4::new(c[0], c[1], c[2], c[3])))
            }
            ValueKind::Text => Some(Value::Text(unquote(raw).to_string())),
            ValueKind::StringList => Some(Value::StringList(
                raw.split(',').map(|s| unquote(s.trim()).to_string()).collect(),
            )),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(v) => Ok(*v),
            other => Err(anyhow!("expected Bool, found {}", other.kind())),
        }
    }

    pub fn as_int(&self) -> Result<i32> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(anyhow!("expected Int, found {}", other.kind())),
        }
    }

    pub fn as_float(&self) -> Result<f32> {
        match self {
            Value::Float(v) => Ok(*v),
            Value::Int(v) => Ok(*v as f32),
            other => Err(anyhow!("expected Float, found {}", other.kind())),
        }
    }

    pub fn as_float2(&self) -> Result<Vec2> {
        match self {
            Value::Float2(v) => Ok(*v),
            other => Err(anyhow!("expected Float2, found {}", other.kind())),
        }
    }

    pub fn as_float3(&self) -> Result<Vec3> {
        match self {
            Value::Float3(v) => Ok(*v),
            other => Err(anyhow!("expected Float3, found {}", other.kind())),
        }
    }

    pub fn as_float4(&self) -> Result<Vec4> {
        match self {
            Value::Float4(v) => Ok(*v),
            other => Err(anyhow!("expected Float4, found {}", other.kind())),
        }
    }

    pub fn as_text(&self) -> Result<&str> {
        match self {
            Value::Text(v) => Ok(v),
            other => Err(anyhow!("expected Text, found {}", other.kind())),
        }
    }

    pub fn as_string_list(&self) -> Result<&[String]> {
        match self {
            Value::StringList(v) => Ok(v),
            other => Err(anyhow!("expected StringList, found {}", other.kind())),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Float2(v) => write!(f, "<{}, {}>", v.x, v.y),
            Value::Float3(v) => write!(f, "<{}, {}, {}>", v.x, v.y, v.z),
            Value::Float4(v) => write!(f, "<{}, {}, {}, {}>", v.x, v.y, v.z, v.w),
            Value::Text(v) => write!(f, "{v}"),
            Value::StringList(v) => write!(f, "[{}]", v.join(", ")),
        }
    }
}

/// Strips one pair of surrounding double quotes, if present.
pub fn unquote(raw: &str) -> &str {
    let raw = raw.trim();
    raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')).unwrap_or(raw)
}

/// A named, shared, interior-mutable variable. Everything that needs live
/// sharing (cross-document references, physics write-back, Call fan-out)
/// holds clones of the same `VarRef`.
#[derive(Debug)]
pub struct Variable {
    name: String,
    value: RefCell<Value>,
}

pub type VarRef = Rc<Variable>;

impl Variable {
    pub fn new(name: impl Into<String>, value: Value) -> VarRef {
        Rc::new(Variable { name: name.into(), value: RefCell::new(value) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self) -> Value {
        self.value.borrow().clone()
    }

    pub fn kind(&self) -> ValueKind {
        self.value.borrow().kind()
    }

    pub fn set(&self, value: Value) {
        *self.value.borrow_mut() = value;
    }

    /// Component-wise copy used by `Call` parameter passing: the value is
    /// copied only when the kinds match, otherwise the parameter keeps its
    /// previous content.
    pub fn copy_from(&self, source: &Variable) {
        let value = source.get();
        if value.kind() == self.kind() {
            self.set(value);
        }
    }

    pub fn bool_value(&self) -> Result<bool> {
        self.get().as_bool().map_err(|e| anyhow!("variable '{}': {e}", self.name))
    }

    pub fn int_value(&self) -> Result<i32> {
        self.get().as_int().map_err(|e| anyhow!("variable '{}': {e}", self.name))
    }

    pub fn float_value(&self) -> Result<f32> {
        self.get().as_float().map_err(|e| anyhow!("variable '{}': {e}", self.name))
    }

    pub fn float2_value(&self) -> Result<Vec2> {
        self.get().as_float2().map_err(|e| anyhow!("variable '{}': {e}", self.name))
    }

    pub fn text_value(&self) -> Result<String> {
        self.get().as_text().map(str::to_string).map_err(|e| anyhow!("variable '{}': {e}", self.name))
    }
}

/// A leaf option bound at compile time: either a parsed literal or a live
/// variable looked up once by `verify_options`.
#[derive(Debug, Clone)]
pub enum Binding {
    Const(Value),
    Var(VarRef),
}

impl Binding {
    pub fn value(&self) -> Value {
        match self {
            Binding::Const(v) => v.clone(),
            Binding::Var(var) => var.get(),
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Binding::Const(v) => v.kind(),
            Binding::Var(var) => var.kind(),
        }
    }

    pub fn var(&self) -> Option<&VarRef> {
        match self {
            Binding::Var(var) => Some(var),
            Binding::Const(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_arity_is_enforced() {
        assert!(Value::parse_literal(ValueKind::Float2, "1, 2").is_some());
        assert!(Value::parse_literal(ValueKind::Float2, "1, 2, 3").is_none());
        assert!(Value::parse_literal(ValueKind::Float3, "1, 2").is_none());
    }

    #[test]
    fn shared_variable_is_live() {
        let var = Variable::new("speed", Value::Float(1.0));
        let alias = var.clone();
        var.set(Value::Float(4.0));
        assert_eq!(alias.float_value().expect("float"), 4.0);
    }

    #[test]
    fn copy_from_requires_matching_kind() {
        let target = Variable::new("a", Value::Int(3));
        let source = Variable::new("b", Value::Float(9.0));
        target.copy_from(&source);
        assert_eq!(target.get(), Value::Int(3));
    }
}
