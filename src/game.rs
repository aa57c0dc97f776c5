//! The single-threaded runtime: owns the asset folder, the root "Game"
//! behavior, the active map, input state and the timer scheduler, and drives
//! the per-frame order — behavior pass, then physics pass, then handoff of
//! shape state to the external renderer.

use crate::assets::{AssetFolder, AssetKind};
use crate::behavior::compiler::BehaviorCompiler;
use crate::behavior::{leaves, BehaviorContext};
use crate::error::CompileError;
use crate::events::{EngineEvent, EventBus};
use crate::input::Input;
use crate::map::structures::Camera2D;
use crate::map::{compiler as map_compiler, Map};
use crate::time::{EngineTime, Scheduler};
use crate::value::{Value, VarRef, Variable};
use anyhow::{anyhow, Result};
use glam::Vec2;
use std::rc::Rc;

/// Engine globals resolvable as variables from every behavior context.
/// The compiler seeds each fresh context with these shared references.
#[derive(Clone)]
pub struct Globals {
    pub time: VarRef,
    pub aspect: VarRef,
}

impl Globals {
    pub fn new() -> Globals {
        Globals {
            time: Variable::new("Time", Value::Float(0.0)),
            aspect: Variable::new("Aspect", Value::Float2(Vec2::ONE)),
        }
    }
}

impl Default for Globals {
    fn default() -> Self {
        Globals::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameState {
    Idle,
    Running,
}

pub struct Game {
    pub assets: AssetFolder,
    pub input: Input,
    pub events: EventBus,
    pub scheduler: Scheduler,
    pub globals: Globals,
    time: EngineTime,
    state: GameState,
    game_ctx: Option<Rc<BehaviorContext>>,
    current_map: Option<Map>,
    current_scene: Option<String>,
    screen: Vec2,
    log: String,
    last_error: Option<CompileError>,
}

impl Game {
    pub fn new(assets: AssetFolder) -> Game {
        Game {
            assets,
            input: Input::new(),
            events: EventBus::default(),
            scheduler: Scheduler::new(),
            globals: Globals::new(),
            time: EngineTime::new(),
            state: GameState::Idle,
            game_ctx: None,
            current_map: None,
            current_scene: None,
            screen: Vec2::new(800.0, 600.0),
            log: String::new(),
            last_error: None,
        }
    }

    pub fn set_screen_size(&mut self, width: f32, height: f32) {
        self.screen = Vec2::new(width, height);
    }

    pub fn state(&self) -> GameState {
        self.state
    }

    pub fn clock(&self) -> f64 {
        self.time.elapsed_seconds()
    }

    pub fn game_context(&self) -> Option<&Rc<BehaviorContext>> {
        self.game_ctx.as_ref()
    }

    pub fn map(&self) -> Option<&Map> {
        self.current_map.as_ref()
    }

    pub fn map_mut(&mut self) -> Option<&mut Map> {
        self.current_map.as_mut()
    }

    pub fn current_scene(&self) -> Option<&str> {
        self.current_scene.as_deref()
    }

    pub fn push_log(&mut self, line: String) {
        self.log.push_str(&line);
        self.log.push('\n');
    }

    pub fn log_text(&self) -> &str {
        &self.log
    }

    pub fn last_error(&self) -> Option<&CompileError> {
        self.last_error.as_ref()
    }

    /// Compiles one behavior asset in place, e.g. after an editor change.
    /// The previous compiled state stays untouched on error.
    pub fn compile_behavior(&mut self, asset_name: &str) -> Result<(), CompileError> {
        let compiler = BehaviorCompiler::new(&self.globals);
        let Some(asset) = self.assets.get_mut(asset_name, AssetKind::Behavior) else {
            return Err(CompileError::new(asset_name, 0, format!("Unknown behavior asset '{asset_name}'")));
        };
        let result = compiler.compile(asset);
        self.last_error = result.as_ref().err().cloned();
        result
    }

    /// Compiles a map asset for live preview without installing it.
    pub fn compile_map_preview(&mut self, asset_name: &str) -> Result<Map, CompileError> {
        let result = map_compiler::compile_map(self, asset_name);
        self.last_error = result.as_ref().err().cloned();
        result
    }

    /// Compiles the root "Game" behavior and runs its `init` tree once.
    /// A missing or failing root behavior prevents the start.
    pub fn start(&mut self) -> Result<()> {
        self.log.clear();
        self.input.reset();
        self.scheduler.clear();
        self.time.reset();
        self.globals.time.set(Value::Float(0.0));
        self.globals.aspect.set(Value::Float2(Vec2::ONE));

        let compiler = BehaviorCompiler::new(&self.globals);
        let Some(asset) = self.assets.get_mut("Game", AssetKind::Behavior) else {
            return Err(anyhow!("missing root 'Game' behavior"));
        };
        if let Err(error) = compiler.compile(asset) {
            self.last_error = Some(error.clone());
            return Err(anyhow!("root 'Game' behavior failed to compile: {error}"));
        }
        self.last_error = None;
        self.game_ctx = asset.behavior.clone();
        self.state = GameState::Running;

        if let Some(ctx) = self.game_ctx.clone() {
            ctx.execute("init", self);
        }
        Ok(())
    }

    /// Stops play between ticks: clears the map (entities, physics worlds,
    /// instancers), invalidates all timers and discards the running
    /// contexts.
    pub fn stop(&mut self) {
        if let Some(map) = &mut self.current_map {
            map.clear();
        }
        self.current_map = None;
        self.current_scene = None;
        self.game_ctx = None;
        self.scheduler.clear();
        self.state = GameState::Idle;
    }

    /// Compiles the named map, selects the scene, builds dependencies and
    /// installs the result as the active map. Grid-instanced contexts run
    /// their one-time `init` right after installation.
    pub fn set_scene(&mut self, map_name: &str, scene_name: &str) -> Result<(), CompileError> {
        let mut map = map_compiler::compile_map(self, map_name)?;
        if !map.scenes.contains_key(scene_name) {
            return Err(CompileError::new(map_name, 0, format!("Unknown scene '{scene_name}'")));
        }
        map.setup(self.screen, &self.globals.aspect);
        map.camera = Camera2D::default();
        map.create_dependencies(scene_name);
        let pending: Vec<Rc<BehaviorContext>> = map.pending_init.drain(..).collect();

        self.current_map = Some(map);
        self.current_scene = Some(scene_name.to_string());
        self.events.push(EngineEvent::SceneChanged {
            map: map_name.to_string(),
            scene: scene_name.to_string(),
        });
        for ctx in pending {
            ctx.execute("init", self);
        }
        Ok(())
    }

    /// One frame: advance the clock, fire due timers, run the behavior
    /// pass, step physics, clear one-frame input flags. Shape state is left
    /// for the external renderer to read.
    pub fn tick(&mut self, dt: f32) {
        if self.state != GameState::Running {
            return;
        }
        self.time.tick(dt);
        self.globals.time.set(Value::Float(self.time.elapsed_seconds() as f32));

        self.fire_timers();
        self.execute_game_tree("update");
        if let Some(map) = &mut self.current_map {
            map.step_physics();
        }
        self.input.end_frame();
    }

    fn fire_timers(&mut self) {
        let due = self.scheduler.take_due(self.clock());
        for task in due {
            if let Some(resolved) = leaves::resolve_call_targets(self, &task.origin, &task.tree_ref) {
                leaves::invoke_call(self, &resolved, &task.parameters);
            }
        }
    }

    /// Executes the named tree in the root Game context and in every
    /// map-level behavior binding — fanning out over live instancer pairs.
    pub fn execute_game_tree(&mut self, tree: &str) {
        let mut contexts: Vec<Rc<BehaviorContext>> = Vec::new();
        if let Some(ctx) = &self.game_ctx {
            contexts.push(ctx.clone());
        }
        if let Some(map) = &self.current_map {
            for binding in map.behaviors.values() {
                match binding.instancer.as_deref().and_then(|name| map.instancer_pairs(name)) {
                    Some(pairs) => {
                        for pair in pairs {
                            contexts.push(pair.behavior.context.clone());
                        }
                    }
                    None => contexts.push(binding.context.clone()),
                }
            }
        }
        for ctx in contexts {
            ctx.execute(tree, self);
        }
    }

    /// Failure lines (0-based) recorded by the root context in its last
    /// execution, for editor annotation.
    pub fn failures(&self) -> Vec<u32> {
        self.game_ctx.as_ref().map(|ctx| ctx.failures()).unwrap_or_default()
    }

    /// The textual runtime snapshot shown in the debug pane.
    pub fn debug_text(&self) -> String {
        let mut text = String::new();
        if let Some(map) = &self.current_map {
            text.push_str(&format!("Current map \"{}\"\n", map.name));
            if let Some(scene) = &self.current_scene {
                text.push_str(&format!("Current scene \"{scene}\"\n"));
            }
            for (name, bodies, contacts) in map.physics_counts() {
                text.push_str(&format!("\nPhysics world \"{name}\"\n"));
                text.push_str(&format!("  Bodies in world: {bodies}\n"));
                text.push_str(&format!("  Current contacts: {contacts}\n"));
            }
        }

        if let Some(ctx) = &self.game_ctx {
            text.push_str(&format!("\nBehavior variables for \"{}\"\n\n", ctx.name));
            let mut variables = ctx.variables();
            variables.sort_by(|a, b| a.name().cmp(b.name()));
            if variables.is_empty() {
                text.push_str("<None>\n");
            }
            for var in variables {
                text.push_str(&format!("{} <{}>\n", var.name(), var.get()));
            }
        }

        text.push_str("\nLog\n\n");
        if self.log.is_empty() {
            text.push_str("<Empty>\n");
        } else {
            text.push_str(&self.log);
        }
        text
    }
}
