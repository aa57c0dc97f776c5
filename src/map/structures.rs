//! Typed entities of the map language. Shape fields are shared `VarRef`s so
//! a cross-document reference (`enemy.speed`) and the physics write-back both
//! mutate the same live object the renderer reads.

use crate::behavior::BehaviorContext;
use crate::tokenizer::OptionBag;
use crate::value::{Value, VarRef, Variable};
use glam::{Vec2, Vec3, Vec4};
use rapier2d::prelude::RigidBodyHandle;
use smallvec::SmallVec;
use std::rc::Rc;

pub struct MapImage {
    pub resource: String,
    pub options: OptionBag,
}

pub struct MapAudio {
    pub resource: String,
    pub is_local: bool,
    pub loops: i32,
}

/// Frame-image animation; the cursor advances against the engine clock.
pub struct MapSequence {
    pub resources: Vec<String>,
    pub interval: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceCursor {
    pub index: usize,
    pub last_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasScale {
    Original,
    Full,
}

pub struct MapAliasData {
    pub offset: Vec2,
    pub rect: Option<Vec4>,
    pub size: Option<Vec2>,
    pub scale: AliasScale,
    pub repeat_x: bool,
    pub repeat_y: bool,
    pub physics_id: Option<String>,
}

pub struct MapAlias {
    pub points_to: String,
    pub data: MapAliasData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerFilter {
    Linear,
    Nearest,
}

/// A layer body is a grid of two-character alias keys collected from the
/// `:`-prefixed rows following the declaration.
pub struct MapLayer {
    pub rows: Vec<Vec<String>>,
    pub offset: Vec2,
    pub scroll: Vec2,
    pub grid_size: f32,
    pub clip_to_canvas: bool,
    pub filter: LayerFilter,
    pub shapes: Vec<String>,
    pub shaders: Vec<String>,
    pub end_line: u32,
}

pub struct MapScene {
    pub name: String,
    pub back_color: Option<Vec4>,
    pub layers: Vec<String>,
}

/// Declared physics options; the live world is built from these during
/// dependency creation.
pub struct MapPhysicsDecl {
    pub gravity: Vec2,
    pub ppm: f32,
}

/// Shader entities stay inert records here; compiling the source is the
/// render collaborator's job.
pub struct MapShader {
    pub asset: String,
    pub canvas_area: bool,
    pub bindings: Vec<(String, VarRef)>,
}

pub struct MapCommand {
    pub command: String,
    pub bag: OptionBag,
    pub line: u32,
}

/// A behavior bound into the map under a local name. `instancer` is set when
/// a grid or on-demand instancer multiplies this binding.
pub struct MapBehavior {
    pub name: String,
    pub asset_name: String,
    pub source: String,
    pub context: Rc<BehaviorContext>,
    pub instancer: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    Disk,
    Box,
    Text,
}

/// Text shape payload: either a literal or a bound numeric/text variable,
/// optionally formatted to a digit count.
pub struct TextRef {
    pub font: Option<String>,
    pub font_size: f32,
    pub text: Option<String>,
    pub digits: Option<i32>,
    pub value: Option<VarRef>,
}

impl TextRef {
    /// The display string the text renderer draws this frame.
    pub fn display(&self) -> String {
        if let Some(text) = &self.text {
            return text.clone();
        }
        let Some(value) = &self.value else {
            return String::new();
        };
        match (value.get(), self.digits) {
            (Value::Int(v), Some(digits)) => format!("{v:0width$}", width = digits.max(0) as usize),
            (Value::Int(v), None) => v.to_string(),
            (Value::Float(v), Some(digits)) => format!("{v:.prec$}", prec = digits.max(0) as usize),
            (Value::Float(v), None) => v.to_string(),
            (Value::Text(v), _) => v,
            (other, _) => other.to_string(),
        }
    }
}

pub struct MapShapeData2D {
    pub position: VarRef,
    pub size: VarRef,
    pub rotation: VarRef,
    pub radius: VarRef,
    pub border: VarRef,
    pub round: VarRef,
    pub onion: VarRef,
    pub visible: VarRef,
    pub color: VarRef,
    pub border_color: VarRef,
    pub flip_x: VarRef,
    pub flip_y: VarRef,
    pub text: Option<TextRef>,
}

impl MapShapeData2D {
    pub fn position_vec(&self) -> Vec2 {
        self.position.get().as_float2().unwrap_or(Vec2::ZERO)
    }

    pub fn size_vec(&self) -> Vec2 {
        self.size.get().as_float2().unwrap_or(Vec2::ZERO)
    }

    pub fn rotation_deg(&self) -> f32 {
        self.rotation.get().as_float().unwrap_or(0.0)
    }

    pub fn radius_value(&self) -> f32 {
        self.radius.get().as_float().unwrap_or(1.0)
    }

    pub fn border(&self) -> f32 {
        self.border.get().as_float().unwrap_or(0.0)
    }

    /// Signed distance from a point (plus probe radius) to this shape's
    /// rectangle in aspect-scaled units; the `DistanceToShape` leaf builds
    /// on it.
    pub fn signed_distance(&self, point: Vec2, probe_radius: f32, aspect: Vec3) -> f32 {
        let size = self.size_vec();
        let mut uv = point + Vec2::splat(probe_radius) - self.position_vec() - size * 0.5;
        uv.x *= aspect.x;
        uv.y *= aspect.y;
        let half = Vec2::new(size.x * aspect.x, size.y * aspect.y) * 0.5;
        let d = uv.abs() - half;
        let dist = d.max(Vec2::ZERO).length() + d.x.max(d.y).min(0.0);
        dist - probe_radius * aspect.z
    }
}

/// Runtime texture binding of a shape.
pub enum ShapeTexture {
    Image(String),
    Sequence(String, SequenceCursor),
    Alias(String),
}

/// Handle of the rigid body a shape owns, if any, plus the world that owns
/// the body.
pub struct ShapeBody {
    pub world: String,
    pub handle: RigidBodyHandle,
}

pub struct MapShape2D {
    pub name: String,
    pub kind: ShapeKind,
    pub data: MapShapeData2D,
    /// Raw declared options, kept for instancer cloning.
    pub raw: OptionBag,
    pub body: Option<ShapeBody>,
    pub category_bits: u16,
    pub texture: Option<ShapeTexture>,
    pub physics_world: Option<String>,
    /// Index of the `ApplyPhysics2D` command that bound this shape.
    pub physics_cmd: Option<usize>,
    pub instancer: Option<String>,
    pub contacts: SmallVec<[String; 4]>,
}

impl MapShape2D {
    pub fn new(name: impl Into<String>, kind: ShapeKind, data: MapShapeData2D, raw: OptionBag) -> MapShape2D {
        MapShape2D {
            name: name.into(),
            kind,
            data,
            raw,
            body: None,
            category_bits: 0,
            texture: None,
            physics_world: None,
            physics_cmd: None,
            instancer: None,
            contacts: SmallVec::new(),
        }
    }
}

/// One live clone produced by an instancer: an independent shape and an
/// independently compiled behavior context. Pairs never share compiled
/// state with each other or with their template.
pub struct InstancePair {
    pub shape: MapShape2D,
    pub behavior: MapBehavior,
}

pub struct MapGridInstance2D {
    pub shape_name: String,
    pub behavior_name: String,
    pub variable_name: String,
    pub columns: u32,
    pub rows: u32,
    pub offset: Vec2,
    pub pairs: Vec<InstancePair>,
}

pub struct MapOnDemandInstance2D {
    pub shape_name: String,
    pub behavior_name: String,
    pub variable_name: String,
    pub delay: f64,
    pub last_invocation: f64,
    pub pairs: Vec<InstancePair>,
}

#[derive(Debug, Clone, Copy)]
pub struct Camera2D {
    pub offset: Vec2,
    pub zoom: f32,
}

impl Default for Camera2D {
    fn default() -> Self {
        Camera2D { offset: Vec2::ZERO, zoom: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleMode {
    UpDown,
    Fixed,
}

/// Builds a fresh shape-data variable; named after the owning shape so the
/// debug dump reads naturally.
pub fn shape_variable(shape: &str, option: &str, value: Value) -> VarRef {
    Variable::new(format!("{shape}.{option}"), value)
}
