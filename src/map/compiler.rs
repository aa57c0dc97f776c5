//! Flat line-by-line compiler for the map language. Each statement is either
//! a bare command collected for the second pass or a named assignment
//! creating one typed entity; `Layer` declarations additionally consume the
//! `:`-prefixed tile rows that follow them.

use crate::assets::AssetKind;
use crate::behavior::compiler::BehaviorCompiler;
use crate::behavior::BehaviorContext;
use crate::error::CompileError;
use crate::game::Game;
use crate::map::structures::*;
use crate::map::{instancing, Map};
use crate::tokenizer::{parse_options, strip_comment, tokenize_statement, OptionBag};
use crate::value::{unquote, Value, ValueKind, VarRef};
use glam::{Vec2, Vec4};
use std::collections::HashMap;
use std::rc::Rc;

const COMMANDS: &[&str] = &["CanvasSize", "ApplyPhysics2D", "ApplyTexture2D"];

/// Resolution scope for `id.member` option values. During instancing,
/// references to the instanced behavior id are redirected into the clone's
/// context instead of the template's.
pub(crate) struct RefScope<'a> {
    pub behaviors: &'a HashMap<String, MapBehavior>,
    pub game_ctx: Option<&'a Rc<BehaviorContext>>,
    pub redirect: Option<(&'a str, &'a Rc<BehaviorContext>)>,
}

impl RefScope<'_> {
    /// Substitutes the live variable object, never a snapshot.
    fn resolve(&self, reference: &str) -> Result<VarRef, String> {
        let (id, member) = reference
            .split_once('.')
            .ok_or_else(|| format!("Unknown identifier '{reference}'"))?;
        let ctx: &Rc<BehaviorContext> = match self.redirect {
            Some((redirect_id, redirect_ctx)) if redirect_id == id => redirect_ctx,
            _ if id == "game" => self.game_ctx.ok_or("No game behavior to resolve 'game.' against")?,
            _ => {
                &self
                    .behaviors
                    .get(id)
                    .ok_or_else(|| format!("Unknown behavior '{id}'"))?
                    .context
            }
        };
        ctx.variable(member)
            .ok_or_else(|| format!("Unknown variable '{member}' in '{id}'"))
    }
}

pub fn compile_map(game: &mut Game, asset_name: &str) -> Result<Map, CompileError> {
    let Some(asset) = game.assets.get(asset_name, AssetKind::Map) else {
        return Err(CompileError::new(asset_name, 0, format!("Unknown map asset '{asset_name}'")));
    };
    let source = asset.source.clone();
    compile_map_source(game, asset_name, &source)
}

pub fn compile_map_source(game: &mut Game, asset_name: &str, source: &str) -> Result<Map, CompileError> {
    let mut map = Map::new(asset_name);
    let mut open_layer: Option<String> = None;

    let err = |line: usize, message: String| CompileError::new(asset_name, line as u32, message);

    for (line_number, raw) in source.lines().enumerate() {
        // A layer body runs until the first non-':' line.
        if let Some(layer_name) = open_layer.clone() {
            let trimmed = raw.trim_start();
            if let Some(row) = trimmed.strip_prefix(':') {
                if let Some(layer) = map.layers.get_mut(&layer_name) {
                    layer.rows.push(parse_layer_row(row));
                    layer.end_line = line_number as u32;
                }
                continue;
            }
            open_layer = None;
        }

        let text = strip_comment(raw).trim().to_string();
        if text.is_empty() {
            continue;
        }

        let statement = tokenize_statement(&text).map_err(|m| err(line_number, m))?;
        let bag = parse_options(&statement.chunks).map_err(|m| err(line_number, m))?;

        let Some(name) = statement.target else {
            // Bare commands apply in the second pass, in declaration order.
            if COMMANDS.contains(&statement.command.as_str()) {
                map.commands
                    .push(MapCommand { command: statement.command, bag, line: line_number as u32 });
                continue;
            }
            return Err(err(line_number, format!("Unknown command '{}'", statement.command)));
        };

        match statement.command.as_str() {
            "Image" => {
                let resource = get_string(&bag, "id").map_err(|m| err(line_number, m))?;
                map.images.insert(name.clone(), MapImage { resource, options: bag });
            }
            "Audio" => {
                let resource = get_string(&bag, "id").map_err(|m| err(line_number, m))?;
                let is_local = !get_bool(&bag, "global", false);
                let loops = get_i32(&bag, "loops", 0).map_err(|m| err(line_number, m))?;
                map.audio.insert(name.clone(), MapAudio { resource, is_local, loops });
            }
            "Sequence" => {
                let resources = get_list(&bag, "ids").map_err(|m| err(line_number, m))?;
                let interval = get_f32(&bag, "interval", 0.1).map_err(|m| err(line_number, m))? as f64;
                map.sequences.insert(name.clone(), MapSequence { resources, interval });
            }
            "Alias" => {
                let points_to = get_string(&bag, "id").map_err(|m| err(line_number, m))?;
                let data = build_alias_data(&bag).map_err(|m| err(line_number, m))?;
                map.aliases.insert(name.clone(), MapAlias { points_to, data });
            }
            "Layer" => {
                let layer = build_layer(&bag, line_number as u32).map_err(|m| err(line_number, m))?;
                map.layers.insert(name.clone(), layer);
                open_layer = Some(name.clone());
            }
            "Scene" => {
                let back_color = get_vec4_opt(&bag, "backcolor").map_err(|m| err(line_number, m))?;
                let layers = get_list(&bag, "layers").unwrap_or_default();
                map.scenes.insert(name.clone(), MapScene { name: name.clone(), back_color, layers });
            }
            "Physics2D" => {
                let gravity = get_vec2(&bag, "gravity", Vec2::new(0.0, -10.0)).map_err(|m| err(line_number, m))?;
                let ppm = get_f32(&bag, "ppm", 100.0).map_err(|m| err(line_number, m))?;
                map.physics_decls.insert(name.clone(), MapPhysicsDecl { gravity, ppm });
            }
            "Behavior" => {
                let binding = build_behavior_binding(game, &name, &bag).map_err(|m| err(line_number, m))?;
                map.behaviors.insert(name.clone(), binding);
            }
            "Shape2D" => {
                let scope = RefScope {
                    behaviors: &map.behaviors,
                    game_ctx: game.game_context(),
                    redirect: None,
                };
                let shape = build_shape(&name, &bag, &scope).map_err(|m| err(line_number, m))?;
                map.shapes.insert(name.clone(), shape);
            }
            "Shader" => {
                let asset = get_string(&bag, "id").map_err(|m| err(line_number, m))?;
                let canvas_area = get_bool(&bag, "canvasarea", false);
                let scope = RefScope {
                    behaviors: &map.behaviors,
                    game_ctx: game.game_context(),
                    redirect: None,
                };
                let mut bindings = Vec::new();
                for (key, value) in bag.iter() {
                    // Only dotted references bind shader uniforms to live
                    // behavior variables; plain options stay with the shader.
                    if key == "id" || key == "canvasarea" {
                        continue;
                    }
                    let reference = unquote(value);
                    let is_reference = reference.contains('.')
                        && reference.chars().next().is_some_and(|c| c.is_ascii_alphabetic());
                    if !is_reference {
                        continue;
                    }
                    let var = scope.resolve(reference).map_err(|m| err(line_number, m))?;
                    bindings.push((key.to_string(), var));
                }
                map.shaders.insert(name.clone(), MapShader { asset, canvas_area, bindings });
            }
            "GridInstance2D" => {
                let shape_name = get_string(&bag, "shapeid").map_err(|m| err(line_number, m))?;
                let behavior_name = get_string(&bag, "behaviorid").map_err(|m| err(line_number, m))?;
                let columns = get_i32(&bag, "columns", 1).map_err(|m| err(line_number, m))?.max(0) as u32;
                let rows = get_i32(&bag, "rows", 1).map_err(|m| err(line_number, m))?.max(0) as u32;
                let offset = Vec2::new(
                    get_f32(&bag, "offsetx", 0.0).map_err(|m| err(line_number, m))?,
                    get_f32(&bag, "offsety", 0.0).map_err(|m| err(line_number, m))?,
                );
                check_instancer_refs(&map, &shape_name, &behavior_name).map_err(|m| err(line_number, m))?;
                map.grid_instancers.insert(
                    name.clone(),
                    MapGridInstance2D {
                        shape_name,
                        behavior_name,
                        variable_name: name.clone(),
                        columns,
                        rows,
                        offset,
                        pairs: Vec::new(),
                    },
                );
                link_instancer(&mut map, &name);
                instancing::grid_instantiate(&mut map, game, &name).map_err(|m| err(line_number, m))?;
            }
            "OnDemandInstance2D" => {
                let shape_name = get_string(&bag, "shapeid").map_err(|m| err(line_number, m))?;
                let behavior_name = get_string(&bag, "behaviorid").map_err(|m| err(line_number, m))?;
                let delay = get_f32(&bag, "delay", 0.0).map_err(|m| err(line_number, m))? as f64;
                check_instancer_refs(&map, &shape_name, &behavior_name).map_err(|m| err(line_number, m))?;
                map.on_demand_instancers.insert(
                    name.clone(),
                    MapOnDemandInstance2D {
                        shape_name,
                        behavior_name,
                        variable_name: name.clone(),
                        delay,
                        last_invocation: 0.0,
                        pairs: Vec::new(),
                    },
                );
                link_instancer(&mut map, &name);
            }
            other => return Err(err(line_number, format!("Unknown type '{other}'"))),
        }

        map.index_line(line_number as u32, &name);
    }

    Ok(map)
}

fn check_instancer_refs(map: &Map, shape_name: &str, behavior_name: &str) -> Result<(), String> {
    if !map.shapes.contains_key(shape_name) {
        return Err(format!("Unknown shape '{shape_name}'"));
    }
    if !map.behaviors.contains_key(behavior_name) {
        return Err(format!("Unknown behavior '{behavior_name}'"));
    }
    Ok(())
}

/// Marks the template shape and the behavior binding as multiplied by the
/// named instancer.
fn link_instancer(map: &mut Map, instancer_name: &str) {
    let (shape_name, behavior_name) = match map.grid_instancers.get(instancer_name) {
        Some(grid) => (grid.shape_name.clone(), grid.behavior_name.clone()),
        None => match map.on_demand_instancers.get(instancer_name) {
            Some(on_demand) => (on_demand.shape_name.clone(), on_demand.behavior_name.clone()),
            None => return,
        },
    };
    if let Some(shape) = map.shapes.get_mut(&shape_name) {
        shape.instancer = Some(instancer_name.to_string());
    }
    if let Some(binding) = map.behaviors.get_mut(&behavior_name) {
        binding.instancer = Some(instancer_name.to_string());
    }
}

/// Compiles the referenced behavior asset into the binding's context. The
/// source is kept on the binding so instancers can recompile independent
/// clones later.
fn build_behavior_binding(game: &mut Game, name: &str, bag: &OptionBag) -> Result<MapBehavior, String> {
    let asset_name = get_string(bag, "id")?;
    let compiler = BehaviorCompiler::new(&game.globals);
    let Some(asset) = game.assets.get_mut(&asset_name, AssetKind::Behavior) else {
        return Err(format!("Unknown behavior asset '{asset_name}'"));
    };
    compiler.compile(asset).map_err(|e| e.message)?;
    let context = asset.behavior.clone().ok_or("behavior compiled without a context")?;
    Ok(MapBehavior {
        name: name.to_string(),
        asset_name,
        source: asset.source.clone(),
        context,
        instancer: None,
    })
}

/// Builds shape data from the typed option table. Literal parse failure
/// falls back to cross-reference resolution; unresolved identifiers are
/// compile errors.
pub(crate) fn build_shape(name: &str, bag: &OptionBag, scope: &RefScope) -> Result<MapShape2D, String> {
    let kind = match bag.get("type").map(unquote).map(str::to_lowercase).as_deref() {
        Some("disk") => ShapeKind::Disk,
        Some("text") => ShapeKind::Text,
        _ => ShapeKind::Box,
    };

    let bind = |option: &str, value_kind: ValueKind, default: Value| -> Result<VarRef, String> {
        match bag.get(option) {
            None => Ok(shape_variable(name, option, default)),
            Some(raw) => {
                if let Some(value) = Value::parse_literal(value_kind, raw) {
                    return Ok(shape_variable(name, option, value));
                }
                let var = scope.resolve(unquote(raw))?;
                if var.kind() != value_kind {
                    return Err(format!(
                        "option '{option}' expects {value_kind}, '{}' is {}",
                        var.name(),
                        var.kind()
                    ));
                }
                Ok(var)
            }
        }
    };

    let radius = bind("radius", ValueKind::Float, Value::Float(1.0))?;
    // A declared radius implies the disk's bounding size.
    let size = if bag.get("size").is_none() && bag.get("radius").is_some() {
        let r = radius.float_value().unwrap_or(1.0);
        shape_variable(name, "size", Value::Float2(Vec2::splat(r * 2.0)))
    } else {
        bind("size", ValueKind::Float2, Value::Float2(Vec2::ZERO))?
    };

    let text = if kind == ShapeKind::Text {
        let value = match bag.get("value") {
            Some(raw) => Some(scope.resolve(unquote(raw))?),
            None => None,
        };
        Some(TextRef {
            font: bag.get("font").map(|f| unquote(f).to_string()),
            font_size: get_f32(bag, "fontsize", 16.0)?,
            text: bag.get("text").map(|t| unquote(t).to_string()),
            digits: match bag.get("digits") {
                Some(raw) => Some(
                    raw.trim()
                        .parse::<i32>()
                        .map_err(|_| format!("option 'digits' expects Int, found '{raw}'"))?,
                ),
                None => None,
            },
            value,
        })
    } else {
        None
    };

    let data = MapShapeData2D {
        position: bind("position", ValueKind::Float2, Value::Float2(Vec2::ZERO))?,
        size,
        rotation: bind("rotation", ValueKind::Float, Value::Float(0.0))?,
        radius,
        border: bind("border", ValueKind::Float, Value::Float(0.0))?,
        round: bind("round", ValueKind::Float, Value::Float(0.0))?,
        onion: bind("onion", ValueKind::Float, Value::Float(0.0))?,
        visible: bind("visible", ValueKind::Bool, Value::Bool(true))?,
        color: bind("color", ValueKind::Float4, Value::Float4(Vec4::ONE))?,
        border_color: bind("bordercolor", ValueKind::Float4, Value::Float4(Vec4::ONE))?,
        flip_x: shape_variable(name, "flipx", Value::Bool(false)),
        flip_y: shape_variable(name, "flipy", Value::Bool(false)),
        text,
    };

    Ok(MapShape2D::new(name, kind, data, bag.clone()))
}

fn build_alias_data(bag: &OptionBag) -> Result<MapAliasData, String> {
    Ok(MapAliasData {
        offset: get_vec2(bag, "offset", Vec2::ZERO)?,
        rect: get_vec4_opt(bag, "rect")?,
        size: match bag.get("size") {
            Some(raw) => Some(
                Value::parse_literal(ValueKind::Float2, raw)
                    .and_then(|v| v.as_float2().ok())
                    .ok_or_else(|| format!("option 'size' expects Float2, found '{raw}'"))?,
            ),
            None => None,
        },
        scale: match bag.get("scale").map(unquote).map(str::to_lowercase).as_deref() {
            Some("full") => AliasScale::Full,
            _ => AliasScale::Original,
        },
        repeat_x: get_bool(bag, "repeatx", false),
        repeat_y: get_bool(bag, "repeaty", false),
        physics_id: bag.get("physicsid").map(|v| unquote(v).to_string()),
    })
}

fn build_layer(bag: &OptionBag, line: u32) -> Result<MapLayer, String> {
    Ok(MapLayer {
        rows: Vec::new(),
        offset: get_vec2(bag, "offset", Vec2::ZERO)?,
        scroll: get_vec2(bag, "scroll", Vec2::ZERO)?,
        grid_size: get_f32(bag, "gridsize", 16.0)?,
        clip_to_canvas: get_bool(bag, "cliptocanvas", false),
        filter: match bag.get("filter").map(unquote).map(str::to_lowercase).as_deref() {
            Some("nearest") => LayerFilter::Nearest,
            _ => LayerFilter::Linear,
        },
        shapes: get_list(bag, "shapes").unwrap_or_default(),
        shaders: get_list(bag, "shaders").unwrap_or_default(),
        end_line: line,
    })
}

/// Tile rows are two characters per cell.
fn parse_layer_row(row: &str) -> Vec<String> {
    let row = row.strip_prefix(' ').unwrap_or(row);
    let chars: Vec<char> = row.chars().collect();
    chars.chunks(2).map(|pair| pair.iter().collect::<String>()).collect()
}

// ---------------------------------------------------------------------------
// Typed option getters: a missing option yields the default, a malformed
// value is an error — missing and wrong-type never collapse into one case.
// ---------------------------------------------------------------------------

fn get_string(bag: &OptionBag, name: &str) -> Result<String, String> {
    bag.get(name)
        .map(|v| unquote(v).to_string())
        .ok_or_else(|| format!("missing required '{name}' option"))
}

fn get_list(bag: &OptionBag, name: &str) -> Result<Vec<String>, String> {
    let raw = bag.get(name).ok_or_else(|| format!("missing required '{name}' option"))?;
    Ok(raw.split(',').map(|s| unquote(s.trim()).to_string()).filter(|s| !s.is_empty()).collect())
}

fn get_f32(bag: &OptionBag, name: &str, default: f32) -> Result<f32, String> {
    match bag.get(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<f32>()
            .map_err(|_| format!("option '{name}' expects Float, found '{raw}'")),
    }
}

fn get_i32(bag: &OptionBag, name: &str, default: i32) -> Result<i32, String> {
    match bag.get(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<i32>()
            .map_err(|_| format!("option '{name}' expects Int, found '{raw}'")),
    }
}

fn get_bool(bag: &OptionBag, name: &str, default: bool) -> bool {
    bag.get(name).map(|v| v.trim().eq_ignore_ascii_case("true")).unwrap_or(default)
}

fn get_vec2(bag: &OptionBag, name: &str, default: Vec2) -> Result<Vec2, String> {
    match bag.get(name) {
        None => Ok(default),
        Some(raw) => Value::parse_literal(ValueKind::Float2, raw)
            .and_then(|v| v.as_float2().ok())
            .ok_or_else(|| format!("option '{name}' expects Float2, found '{raw}'")),
    }
}

fn get_vec4_opt(bag: &OptionBag, name: &str) -> Result<Option<Vec4>, String> {
    match bag.get(name) {
        None => Ok(None),
        Some(raw) => Value::parse_literal(ValueKind::Float4, raw)
            .and_then(|v| v.as_float4().ok())
            .map(Some)
            .ok_or_else(|| format!("option '{name}' expects Float4, found '{raw}'")),
    }
}
