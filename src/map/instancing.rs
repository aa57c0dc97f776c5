//! Template cloning. Both instancer flavors share one contract: recompile
//! the behavior source into an independent context, rebuild the shape from
//! the template's raw options with references redirected into the clone,
//! place it, and register the pair under the instancer.

use crate::behavior::compiler::BehaviorCompiler;
use crate::behavior::BehaviorContext;
use crate::game::{Game, Globals};
use crate::map::compiler::{build_shape, RefScope};
use crate::map::structures::{InstancePair, MapBehavior};
use crate::map::{attach_body, parse_body_options, Map};
use crate::value::Value;
use anyhow::{anyhow, Result};
use glam::Vec2;
use std::rc::Rc;
use uuid::Uuid;

fn instancer_info(map: &Map, name: &str) -> Option<(String, String, String)> {
    if let Some(grid) = map.grid_instancers.get(name) {
        return Some((grid.shape_name.clone(), grid.behavior_name.clone(), grid.variable_name.clone()));
    }
    map.on_demand_instancers
        .get(name)
        .map(|i| (i.shape_name.clone(), i.behavior_name.clone(), i.variable_name.clone()))
}

/// Clones the instancer's (shape, behavior) template into one independent
/// pair at `position` and registers it. Returns the clone's context so the
/// caller can run its `init` tree.
pub(crate) fn clone_pair(
    map: &mut Map,
    globals: &Globals,
    game_ctx: Option<&Rc<BehaviorContext>>,
    instancer_name: &str,
    instance_name: &str,
    position: Vec2,
) -> Result<Rc<BehaviorContext>, String> {
    let (shape_name, behavior_name, _) =
        instancer_info(map, instancer_name).ok_or_else(|| format!("Unknown instancer '{instancer_name}'"))?;
    let binding = map
        .behaviors
        .get(&behavior_name)
        .ok_or_else(|| format!("Unknown behavior '{behavior_name}'"))?;
    let source = binding.source.clone();
    let asset_name = binding.asset_name.clone();

    // Fresh compilation: no compiled state is shared between pairs.
    let compiler = BehaviorCompiler::new(globals);
    let context = Rc::new(compiler.compile_source(instance_name, &source).map_err(|e| e.message)?);

    let template = map.shapes.get(&shape_name).ok_or_else(|| format!("Unknown shape '{shape_name}'"))?;
    let raw = template.raw.clone();
    let template_size = template.data.size_vec();
    let category_bits = template.category_bits;

    let mut shape = {
        let scope = RefScope {
            behaviors: &map.behaviors,
            game_ctx,
            redirect: Some((behavior_name.as_str(), &context)),
        };
        build_shape(instance_name, &raw, &scope)?
    };

    // A clone that ends up sizeless inherits the template's size.
    if shape.data.size_vec() == Vec2::ZERO {
        shape.data.size.set(Value::Float2(template_size));
    }
    shape.category_bits = category_bits;
    shape.data.position.set(Value::Float2(position));
    if let Some(position_var) = context.variable("position") {
        if !Rc::ptr_eq(&position_var, &shape.data.position) {
            position_var.set(Value::Float2(position));
        }
    }

    let behavior = MapBehavior {
        name: instance_name.to_string(),
        asset_name,
        source,
        context: context.clone(),
        instancer: None,
    };
    map.instancer_pairs_mut(instancer_name)
        .ok_or_else(|| format!("Unknown instancer '{instancer_name}'"))?
        .push(InstancePair { shape, behavior });
    Ok(context)
}

/// Eager grid cloning at map-compile time: rows × columns pairs, 1-indexed,
/// each at `origin + ((c-1)·offsetX, (r-1)·offsetY)` where origin is the
/// template's pre-instancing position. Bodies come later with the
/// `ApplyPhysics2D` pass; `init` runs once the map is installed.
pub(crate) fn grid_instantiate(map: &mut Map, game: &Game, instancer_name: &str) -> Result<(), String> {
    let Some(grid) = map.grid_instancers.get(instancer_name) else {
        return Err(format!("Unknown instancer '{instancer_name}'"));
    };
    let (columns, rows, offset, variable_name) =
        (grid.columns, grid.rows, grid.offset, grid.variable_name.clone());
    let origin = map
        .shapes
        .get(&grid.shape_name)
        .ok_or_else(|| format!("Unknown shape '{}'", grid.shape_name))?
        .data
        .position_vec();

    let globals = game.globals.clone();
    let game_ctx = game.game_context().cloned();
    for row in 1..=rows {
        for column in 1..=columns {
            let instance_name = format!("{variable_name}_{column}_{row}");
            let position = origin + Vec2::new(offset.x * (column - 1) as f32, offset.y * (row - 1) as f32);
            let context =
                clone_pair(map, &globals, game_ctx.as_ref(), instancer_name, &instance_name, position)?;
            map.pending_init.push(context);
        }
    }
    Ok(())
}

/// Lazy cloning at play time, one pair per invocation, throttled by the
/// instancer's spawn delay. The clone gets a randomized unique variable-name
/// suffix, a body when the template has one, and an immediate `init` run.
pub fn create_on_demand(game: &mut Game, instancer_name: &str, position: Vec2) -> Result<()> {
    let clock = game.clock();
    let globals = game.globals.clone();
    let game_ctx = game.game_context().cloned();

    let context = {
        let map = game.map_mut().ok_or_else(|| anyhow!("no active map"))?;
        let instancer = map
            .on_demand_instancers
            .get(instancer_name)
            .ok_or_else(|| anyhow!("unknown instancer '{instancer_name}'"))?;
        if instancer.last_invocation > 0.0 && clock - instancer.last_invocation < instancer.delay {
            return Err(anyhow!("spawn delay not elapsed"));
        }
        let instance_name = format!("{}{}", instancer.variable_name, Uuid::new_v4().simple());
        let shape_name = instancer.shape_name.clone();

        let context = clone_pair(map, &globals, game_ctx.as_ref(), instancer_name, &instance_name, position)
            .map_err(|m| anyhow!(m))?;

        // Attach a body when the template is physics-bound.
        let template = map.shapes.get(&shape_name).ok_or_else(|| anyhow!("unknown shape '{shape_name}'"))?;
        if let (Some(world_name), Some(cmd_index)) = (template.physics_world.clone(), template.physics_cmd) {
            let bag = map.commands[cmd_index].bag.clone();
            let mask = map.calculate_mask_bits(&bag);
            let options = parse_body_options(&bag);
            if let Some(world) = map.physics.get_mut(&world_name) {
                if let Some(pair) = map
                    .on_demand_instancers
                    .get_mut(instancer_name)
                    .and_then(|i| i.pairs.last_mut())
                {
                    attach_body(world, &world_name, cmd_index, &mut pair.shape, &options, mask);
                }
            }
        }
        if let Some(instancer) = map.on_demand_instancers.get_mut(instancer_name) {
            instancer.last_invocation = clock;
        }
        context
    };

    context.execute("init", game);
    Ok(())
}
