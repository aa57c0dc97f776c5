//! The compiled scene aggregate: typed entity collections, the second-pass
//! command application (`create_dependencies`), and per-frame physics
//! synchronization.

use crate::behavior::BehaviorContext;
use crate::map::structures::*;
use crate::physics::{BodyOptions, BodySpec, ContactPhase, PhysicsWorld2D};
use crate::tokenizer::OptionBag;
use crate::value::{unquote, Value, ValueKind, VarRef};
use glam::{Vec2, Vec3};
use rapier2d::prelude::RigidBodyHandle;
use std::collections::HashMap;
use std::rc::Rc;

pub mod compiler;
pub mod instancing;
pub mod structures;

impl std::fmt::Debug for Map {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Map").field("name", &self.name).finish_non_exhaustive()
    }
}

pub struct Map {
    pub name: String,
    pub images: HashMap<String, MapImage>,
    pub audio: HashMap<String, MapAudio>,
    pub sequences: HashMap<String, MapSequence>,
    pub aliases: HashMap<String, MapAlias>,
    pub layers: HashMap<String, MapLayer>,
    pub scenes: HashMap<String, MapScene>,
    pub behaviors: HashMap<String, MapBehavior>,
    pub physics_decls: HashMap<String, MapPhysicsDecl>,
    pub physics: HashMap<String, PhysicsWorld2D>,
    pub shapes: HashMap<String, MapShape2D>,
    pub shaders: HashMap<String, MapShader>,
    pub grid_instancers: HashMap<String, MapGridInstance2D>,
    pub on_demand_instancers: HashMap<String, MapOnDemandInstance2D>,
    pub commands: Vec<MapCommand>,
    /// `line -> entity name` index; the last declaration of a name owns its
    /// line, used to attribute a cursor position during live preview.
    pub lines: HashMap<u32, String>,
    pub camera: Camera2D,
    pub scale_mode: ScaleMode,
    pub canvas_size: Vec2,
    pub view_border: Vec2,
    pub aspect: Vec3,
    /// Grid-instanced contexts waiting for their one-time `init` run, drained
    /// by the runtime right after the map is installed.
    pub pending_init: Vec<Rc<BehaviorContext>>,
}

impl Map {
    pub fn new(name: impl Into<String>) -> Map {
        Map {
            name: name.into(),
            images: HashMap::new(),
            audio: HashMap::new(),
            sequences: HashMap::new(),
            aliases: HashMap::new(),
            layers: HashMap::new(),
            scenes: HashMap::new(),
            behaviors: HashMap::new(),
            physics_decls: HashMap::new(),
            physics: HashMap::new(),
            shapes: HashMap::new(),
            shaders: HashMap::new(),
            grid_instancers: HashMap::new(),
            on_demand_instancers: HashMap::new(),
            commands: Vec::new(),
            lines: HashMap::new(),
            camera: Camera2D::default(),
            scale_mode: ScaleMode::UpDown,
            canvas_size: Vec2::ZERO,
            view_border: Vec2::ZERO,
            aspect: Vec3::new(1.0, 1.0, 1.0),
            pending_init: Vec::new(),
        }
    }

    /// Entity name declared at the given 0-based source line, if any.
    pub fn name_at_line(&self, line: u32) -> Option<&str> {
        self.lines.get(&line).map(String::as_str)
    }

    pub(crate) fn index_line(&mut self, line: u32, name: &str) {
        // Last writer for a name owns its line index entry.
        self.lines.retain(|_, owner| owner != name);
        self.lines.insert(line, name.to_string());
    }

    /// Computes canvas units from the `CanvasSize` commands and the host's
    /// output size: aspect maps percent-of-canvas coordinates to pixels.
    pub fn setup(&mut self, screen: Vec2, aspect_var: &VarRef) {
        self.canvas_size = screen;
        self.scale_mode = ScaleMode::UpDown;
        for cmd in &self.commands {
            if cmd.command != "CanvasSize" {
                continue;
            }
            let platform_matches = match cmd.bag.get("platform").map(unquote) {
                Some(platform) => platform == "Desktop" || platform.eq_ignore_ascii_case("any"),
                None => true,
            };
            if platform_matches {
                if let Some(size) = cmd.bag.get("size").and_then(|v| Value::parse_literal(ValueKind::Float2, v)) {
                    if let Ok(size) = size.as_float2() {
                        self.canvas_size = size;
                    }
                }
            }
            if cmd.bag.get("scale").map(unquote).is_some_and(|s| s.eq_ignore_ascii_case("fixed")) {
                self.scale_mode = ScaleMode::Fixed;
            }
        }

        let (scaled_w, scaled_h) = match self.scale_mode {
            ScaleMode::UpDown => {
                let scale = (screen.x / self.canvas_size.x).min(screen.y / self.canvas_size.y);
                (self.canvas_size.x * scale, self.canvas_size.y * scale)
            }
            ScaleMode::Fixed => (self.canvas_size.x, self.canvas_size.y),
        };
        self.view_border = Vec2::new(
            ((screen.x - scaled_w) / 2.0).round().max(0.0),
            ((screen.y - scaled_h) / 2.0).round().max(0.0),
        );
        self.aspect = Vec3::new(scaled_w / 100.0, scaled_h / 100.0, (scaled_w / 100.0).min(scaled_h / 100.0));
        aspect_var.set(Value::Float2(Vec2::new(self.aspect.x, self.aspect.y)));
    }

    /// Second pass after parsing: build one world per `Physics2D` entity,
    /// assign category bits in `ApplyPhysics2D` order, apply textures, create
    /// bodies for templates and every existing instance, and merge layer
    /// tiles with a `physicsid` into static collision runs.
    pub fn create_dependencies(&mut self, scene_name: &str) {
        self.physics.clear();
        for (name, decl) in &self.physics_decls {
            self.physics.insert(name.clone(), PhysicsWorld2D::new(decl.gravity, decl.ppm));
        }

        // First pass: category bits, doubled per physics-bound shape.
        let mut category: u16 = 1;
        for index in 0..self.commands.len() {
            if self.commands[index].command != "ApplyPhysics2D" {
                continue;
            }
            let bag = self.commands[index].bag.clone();
            let (Some(physics_name), Some(shape_name)) = (option_id(&bag, "physicsid"), option_id(&bag, "shapeid"))
            else {
                continue;
            };
            if !self.physics.contains_key(&physics_name) || !self.shapes.contains_key(&shape_name) {
                continue;
            }
            let instancer = self.shapes[&shape_name].instancer.clone();
            if let Some(shape) = self.shapes.get_mut(&shape_name) {
                shape.category_bits = category;
            }
            if let Some(name) = instancer {
                if let Some(pairs) = self.instancer_pairs_mut(&name) {
                    for pair in pairs {
                        pair.shape.category_bits = category;
                    }
                }
            }
            category = category.wrapping_mul(2).max(1);
        }

        // Second pass: textures and bodies.
        for index in 0..self.commands.len() {
            let command = self.commands[index].command.clone();
            let bag = self.commands[index].bag.clone();
            match command.as_str() {
                "ApplyTexture2D" => {
                    if let (Some(shape), Some(id)) = (option_id(&bag, "shapeid"), option_id(&bag, "id")) {
                        self.apply_texture_to_shape(&shape, &id, None);
                    }
                }
                "ApplyPhysics2D" => {
                    let (Some(physics_name), Some(shape_name)) =
                        (option_id(&bag, "physicsid"), option_id(&bag, "shapeid"))
                    else {
                        continue;
                    };
                    if !self.physics.contains_key(&physics_name) || !self.shapes.contains_key(&shape_name) {
                        continue;
                    }
                    let mask = self.calculate_mask_bits(&bag);
                    let options = parse_body_options(&bag);
                    let instancer = self.shapes[&shape_name].instancer.clone();
                    if let Some(shape) = self.shapes.get_mut(&shape_name) {
                        shape.physics_world = Some(physics_name.clone());
                        shape.physics_cmd = Some(index);
                    }
                    match instancer {
                        Some(inst_name) => {
                            // Instanced templates keep their binding but only
                            // the live pairs get bodies.
                            if let Some(world) = self.physics.get_mut(&physics_name) {
                                let pairs = match self.grid_instancers.get_mut(&inst_name) {
                                    Some(grid) => &mut grid.pairs,
                                    None => match self.on_demand_instancers.get_mut(&inst_name) {
                                        Some(on_demand) => &mut on_demand.pairs,
                                        None => continue,
                                    },
                                };
                                for pair in pairs {
                                    attach_body(world, &physics_name, index, &mut pair.shape, &options, mask);
                                }
                            }
                        }
                        None => {
                            if let (Some(world), Some(shape)) =
                                (self.physics.get_mut(&physics_name), self.shapes.get_mut(&shape_name))
                            {
                                attach_body(world, &physics_name, index, shape, &options, mask);
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        self.create_layer_tiles(scene_name, category);
    }

    /// Merges horizontal runs of layer tiles whose alias declares a
    /// `physicsid` into single static collision boxes.
    fn create_layer_tiles(&mut self, scene_name: &str, category: u16) {
        let Some(scene) = self.scenes.get(scene_name) else {
            return;
        };
        struct TileRun {
            world: String,
            start: Vec2,
            width: f32,
            height: f32,
        }
        let mut runs: Vec<TileRun> = Vec::new();
        for layer_name in &scene.layers {
            let Some(layer) = self.layers.get(layer_name) else {
                continue;
            };
            let grid = layer.grid_size;
            for (row_index, row) in layer.rows.iter().enumerate() {
                let mut open: Option<TileRun> = None;
                for (col_index, cell) in row.iter().enumerate() {
                    let x = layer.offset.x + col_index as f32 * grid;
                    let y = layer.offset.y + row_index as f32 * grid;
                    let physics = self
                        .aliases
                        .get(cell)
                        .and_then(|alias| alias.data.physics_id.clone())
                        .filter(|id| self.physics.contains_key(id));
                    match physics {
                        Some(world) => {
                            let (w, h) = self.tile_extent(cell, grid);
                            match open.as_mut() {
                                Some(run) if run.world == world => run.width += w,
                                _ => {
                                    if let Some(run) = open.take() {
                                        runs.push(run);
                                    }
                                    open = Some(TileRun { world, start: Vec2::new(x, y), width: w, height: h });
                                }
                            }
                        }
                        None => {
                            if let Some(run) = open.take() {
                                runs.push(run);
                            }
                        }
                    }
                }
                if let Some(run) = open.take() {
                    runs.push(run);
                }
            }
        }
        for run in runs {
            if let Some(world) = self.physics.get_mut(&run.world) {
                let half = Vec2::new(run.width / 2.0, run.height / 2.0);
                world.add_static_tile(run.start + half, half, category);
            }
        }
    }

    fn tile_extent(&self, alias_name: &str, grid: f32) -> (f32, f32) {
        match self.aliases.get(alias_name) {
            Some(alias) => {
                let w = alias.data.rect.map(|r| r.z).or(alias.data.size.map(|s| s.x)).unwrap_or(grid);
                let h = alias.data.rect.map(|r| r.w).or(alias.data.size.map(|s| s.y)).unwrap_or(grid);
                (w, h)
            }
            None => (grid, grid),
        }
    }

    /// OR of the category bits of every shape listed in `collisionids`;
    /// everything collides when the option is absent.
    pub fn calculate_mask_bits(&self, bag: &OptionBag) -> u16 {
        let Some(raw) = bag.get("collisionids") else {
            return 0xffff;
        };
        let mut mask: u16 = 0;
        for id in raw.split(',') {
            if let Some(shape) = self.shapes.get(unquote(id.trim())) {
                mask |= shape.category_bits;
            }
        }
        mask
    }

    /// Binds an image, sequence or alias to a shape. When the shape's size
    /// is still zero it adopts the size the image declares.
    pub fn apply_texture_to_shape(&mut self, shape_id: &str, id: &str, flip_x: Option<bool>) -> bool {
        if !self.shapes.contains_key(shape_id) {
            return false;
        }
        let texture = if self.images.contains_key(id) {
            Some(ShapeTexture::Image(id.to_string()))
        } else if self.aliases.contains_key(id) {
            Some(ShapeTexture::Alias(id.to_string()))
        } else if self.sequences.contains_key(id) {
            let cursor = match self.shapes[shape_id].texture {
                // Swapping between sequences keeps the animation cursor.
                Some(ShapeTexture::Sequence(_, cursor)) => cursor,
                _ => SequenceCursor::default(),
            };
            Some(ShapeTexture::Sequence(id.to_string(), cursor))
        } else {
            None
        };
        let Some(texture) = texture else {
            return false;
        };

        let declared_size = self
            .images
            .get(id)
            .and_then(|image| image.options.get("size"))
            .and_then(|raw| Value::parse_literal(ValueKind::Float2, raw))
            .and_then(|v| v.as_float2().ok());

        if let Some(shape) = self.shapes.get_mut(shape_id) {
            shape.texture = Some(texture);
            if let Some(flip) = flip_x {
                shape.data.flip_x.set(Value::Bool(flip));
            }
            if shape.data.size_vec().x == 0.0 {
                if let Some(size) = declared_size {
                    shape.data.size.set(Value::Float2(size));
                }
            }
        }
        true
    }

    pub fn instancer_pairs(&self, name: &str) -> Option<&[InstancePair]> {
        if let Some(grid) = self.grid_instancers.get(name) {
            return Some(&grid.pairs);
        }
        self.on_demand_instancers.get(name).map(|i| i.pairs.as_slice())
    }

    pub fn instancer_pairs_mut(&mut self, name: &str) -> Option<&mut Vec<InstancePair>> {
        if let Some(grid) = self.grid_instancers.get_mut(name) {
            return Some(&mut grid.pairs);
        }
        self.on_demand_instancers.get_mut(name).map(|i| &mut i.pairs)
    }

    /// The shape entry the executing context owns: for an instanced template
    /// this is the pair whose behavior context is `ctx`, otherwise the
    /// template itself.
    pub fn shape_for_context(&mut self, name: &str, ctx: &Rc<BehaviorContext>) -> Option<&mut MapShape2D> {
        let instancer = self.shapes.get(name)?.instancer.clone();
        match instancer {
            Some(inst) => self
                .instancer_pairs_mut(&inst)?
                .iter_mut()
                .find(|pair| Rc::ptr_eq(&pair.behavior.context, ctx))
                .map(|pair| &mut pair.shape),
            None => self.shapes.get_mut(name),
        }
    }

    /// Physics access for the shape the executing context owns: the owning
    /// world, the body handle and the shape size for coordinate conversion.
    pub fn body_for_context(
        &mut self,
        name: &str,
        ctx: &Rc<BehaviorContext>,
    ) -> Option<(&mut PhysicsWorld2D, RigidBodyHandle, Vec2)> {
        let (world_name, handle, size) = {
            let shape = self.shape_for_context(name, ctx)?;
            let body = shape.body.as_ref()?;
            (body.world.clone(), body.handle, shape.data.size_vec())
        };
        let world = self.physics.get_mut(&world_name)?;
        Some((world, handle, size))
    }

    fn shape_by_name_mut(&mut self, name: &str) -> Option<&mut MapShape2D> {
        if self.shapes.contains_key(name) {
            return self.shapes.get_mut(name);
        }
        for instancer in self.grid_instancers.values_mut() {
            if let Some(pair) = instancer.pairs.iter_mut().find(|p| p.shape.name == name) {
                return Some(&mut pair.shape);
            }
        }
        for instancer in self.on_demand_instancers.values_mut() {
            if let Some(pair) = instancer.pairs.iter_mut().find(|p| p.shape.name == name) {
                return Some(&mut pair.shape);
            }
        }
        None
    }

    /// Removes the pair owned by `ctx` from an on-demand instancer,
    /// destroying its body.
    pub fn destroy_instance(&mut self, instancer_name: &str, ctx: &Rc<BehaviorContext>) -> bool {
        let Some(instancer) = self.on_demand_instancers.get_mut(instancer_name) else {
            return false;
        };
        let Some(index) = instancer.pairs.iter().position(|p| Rc::ptr_eq(&p.behavior.context, ctx)) else {
            return false;
        };
        let pair = instancer.pairs.remove(index);
        if let Some(body) = pair.shape.body {
            if let Some(world) = self.physics.get_mut(&body.world) {
                world.remove_body(body.handle);
            }
        }
        true
    }

    /// Steps every world once at the fixed timestep, updates symmetric
    /// contact lists from the drained events, and overwrites the declared
    /// position/rotation of every body-carrying shape from its simulated
    /// transform.
    pub fn step_physics(&mut self) {
        let world_names: Vec<String> = self.physics.keys().cloned().collect();
        let mut events = Vec::new();
        for world_name in &world_names {
            if let Some(world) = self.physics.get_mut(world_name) {
                world.step();
                events.extend(world.drain_contacts());
            }
        }

        for (phase, a, b) in events {
            self.update_contact(&a, &b, phase);
            self.update_contact(&b, &a, phase);
        }

        for world_name in &world_names {
            let Some(world) = self.physics.get(world_name) else {
                continue;
            };
            for shape in self.shapes.values_mut() {
                write_back_transform(world, world_name, shape);
            }
            for instancer in self.grid_instancers.values_mut() {
                for pair in &mut instancer.pairs {
                    write_back_transform(world, world_name, &mut pair.shape);
                }
            }
            for instancer in self.on_demand_instancers.values_mut() {
                for pair in &mut instancer.pairs {
                    write_back_transform(world, world_name, &mut pair.shape);
                }
            }
        }
    }

    fn update_contact(&mut self, shape: &str, other: &str, phase: ContactPhase) {
        if let Some(shape) = self.shape_by_name_mut(shape) {
            match phase {
                ContactPhase::Begin => shape.contacts.push(other.to_string()),
                ContactPhase::End => {
                    if let Some(index) = shape.contacts.iter().position(|name| name == other) {
                        shape.contacts.remove(index);
                    }
                }
            }
        }
    }

    /// Per-world body and contact counts for the debug overlay.
    pub fn physics_counts(&self) -> Vec<(String, usize, usize)> {
        let mut out: Vec<(String, usize, usize)> = self
            .physics
            .iter()
            .map(|(name, world)| (name.clone(), world.body_count(), world.contact_count()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Drops every entity; physics worlds and their bodies go with the
    /// collections. Called between ticks when play stops.
    pub fn clear(&mut self) {
        let name = self.name.clone();
        *self = Map::new(name);
    }
}

fn write_back_transform(world: &PhysicsWorld2D, world_name: &str, shape: &mut MapShape2D) {
    let Some(body) = &shape.body else {
        return;
    };
    if body.world != world_name {
        return;
    }
    if let Some((position, rotation)) = world.body_transform(body.handle, shape.data.size_vec()) {
        shape.data.position.set(Value::Float2(position));
        shape.data.rotation.set(Value::Float(rotation));
    }
}

pub(crate) fn attach_body(
    world: &mut PhysicsWorld2D,
    world_name: &str,
    cmd_index: usize,
    shape: &mut MapShape2D,
    options: &BodyOptions,
    mask: u16,
) {
    let spec = BodySpec {
        is_disk: shape.kind == ShapeKind::Disk,
        position: shape.data.position_vec(),
        size: shape.data.size_vec(),
        radius: shape.data.radius_value(),
        rotation_deg: shape.data.rotation_deg(),
        category: shape.category_bits,
        mask,
    };
    let handle = world.add_body(&shape.name, &spec, options);
    shape.body = Some(ShapeBody { world: world_name.to_string(), handle });
    shape.physics_world = Some(world_name.to_string());
    shape.physics_cmd = Some(cmd_index);
}

/// `ApplyPhysics2D` option parsing: static unless `Body: "dynamic"`,
/// friction 0.3, restitution 0, density 0 (1 for dynamic bodies unless
/// overridden; an explicit 0 forces static).
pub(crate) fn parse_body_options(bag: &OptionBag) -> BodyOptions {
    let mut options = BodyOptions::default();
    if bag.get("body").map(unquote).is_some_and(|b| b.eq_ignore_ascii_case("dynamic")) {
        options.dynamic = true;
        options.density = 1.0;
    }
    if let Some(friction) = bag.get("friction").and_then(|v| v.trim().parse::<f32>().ok()) {
        options.friction = friction;
    }
    if let Some(restitution) = bag.get("restitution").and_then(|v| v.trim().parse::<f32>().ok()) {
        options.restitution = restitution;
    }
    if let Some(density) = bag.get("density").and_then(|v| v.trim().parse::<f32>().ok()) {
        options.density = density;
        if density == 0.0 {
            options.dynamic = false;
        }
    }
    options.fixed_rotation = bag.get("fixedrotation").is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
    options.bullet = bag.get("bullet").is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
    options
}

fn option_id(bag: &OptionBag, name: &str) -> Option<String> {
    bag.get(name).map(|v| unquote(v).to_string())
}

/// Resolves the image resource a shape draws this frame, advancing sequence
/// animation against the engine clock. The render collaborator calls this
/// while walking a scene's layers.
pub fn current_texture_resource(
    images: &HashMap<String, MapImage>,
    sequences: &HashMap<String, MapSequence>,
    texture: &mut ShapeTexture,
    clock: f64,
) -> Option<String> {
    match texture {
        ShapeTexture::Image(id) => images.get(id).map(|image| image.resource.clone()),
        ShapeTexture::Alias(_) => None,
        ShapeTexture::Sequence(id, cursor) => {
            let sequence = sequences.get(id)?;
            if sequence.resources.is_empty() {
                return None;
            }
            if cursor.last_time > 0.0 {
                if clock - cursor.last_time > sequence.interval {
                    cursor.index += 1;
                    cursor.last_time = clock;
                }
            } else {
                cursor.last_time = clock;
            }
            if cursor.index >= sequence.resources.len() {
                cursor.index = 0;
            }
            sequence.resources.get(cursor.index).cloned()
        }
    }
}
