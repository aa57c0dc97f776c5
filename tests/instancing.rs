use shrike_engine::assets::{Asset, AssetFolder, AssetKind};
use shrike_engine::game::{Game, GameState};
use shrike_engine::value::Value;
use std::rc::Rc;

const ENEMY: &str = "hits = Int<0>\n\
                     position = Float2<0, 0>\n\
                     tree init\n\
                     tree update\n\
                     tree poke\n\
                     \x20   Add<To: hits>\n";

const GAME_GRID: &str = "tree init\n\
                         \x20   SetScene<Map: \"main\", SceneId: \"scene\">\n\
                         tree update\n\
                         \x20   Call<Tree: \"enemyB.poke\">\n";

const MAP_GRID: &str = "enemyB = Behavior<Id: \"enemy\">\n\
                        eshape = Shape2D<Type: Box, Position: 0, 0, Size: 10, 10>\n\
                        swarm = GridInstance2D<ShapeId: eshape, BehaviorId: enemyB, Columns: 3, Rows: 2, OffsetX: 10, OffsetY: 5>\n\
                        scene = Scene\n";

fn grid_game() -> Game {
    let mut folder = AssetFolder::new();
    folder.add(Asset::new(AssetKind::Behavior, "Game", GAME_GRID));
    folder.add(Asset::new(AssetKind::Behavior, "enemy", ENEMY));
    folder.add(Asset::new(AssetKind::Map, "main", MAP_GRID));
    let mut game = Game::new(folder);
    game.start().expect("game starts");
    game
}

#[test]
fn grid_produces_deterministic_independent_pairs() {
    let game = grid_game();
    let map = game.map().expect("map installed");
    let grid = map.grid_instancers.get("swarm").expect("grid instancer");
    assert_eq!(grid.pairs.len(), 6, "3 columns x 2 rows");

    // 1-indexed cells at origin + ((c-1)*offsetX, (r-1)*offsetY).
    let mut positions: Vec<(f32, f32)> = grid
        .pairs
        .iter()
        .map(|pair| {
            let p = pair.shape.data.position_vec();
            (p.x, p.y)
        })
        .collect();
    positions.sort_by(|a, b| a.partial_cmp(b).expect("finite"));
    let expected = vec![
        (0.0, 0.0),
        (0.0, 5.0),
        (10.0, 0.0),
        (10.0, 5.0),
        (20.0, 0.0),
        (20.0, 5.0),
    ];
    assert_eq!(positions, expected);

    // Every pair owns an independently compiled context.
    for (index, a) in grid.pairs.iter().enumerate() {
        for b in grid.pairs.iter().skip(index + 1) {
            assert!(!Rc::ptr_eq(&a.behavior.context, &b.behavior.context));
        }
    }
}

#[test]
fn call_fans_out_over_every_live_instance() {
    let mut game = grid_game();
    game.tick(1.0 / 60.0);

    let map = game.map().expect("map");
    let grid = map.grid_instancers.get("swarm").expect("grid");
    for pair in &grid.pairs {
        let hits = pair.behavior.context.variable("hits").expect("hits").int_value().expect("int");
        assert_eq!(hits, 1, "each instance context received the call");
    }
}

#[test]
fn instance_state_stays_private() {
    let mut game = grid_game();
    game.tick(1.0 / 60.0);

    let map = game.map().expect("map");
    let grid = map.grid_instancers.get("swarm").expect("grid");
    grid.pairs[0].behavior.context.variable("hits").expect("hits").set(Value::Int(99));
    for pair in grid.pairs.iter().skip(1) {
        let hits = pair.behavior.context.variable("hits").expect("hits").int_value().expect("int");
        assert_eq!(hits, 1, "mutating one instance leaves the others untouched");
    }
}

#[test]
fn on_demand_spawns_one_pair_per_call() {
    let game_src = "spawned = Int<0>\n\
                    tree init\n\
                    \x20   SetScene<Map: \"main\", SceneId: \"scene\">\n\
                    tree update\n\
                    \x20   sequence\n\
                    \x20       IsVariable<Variable: spawned, Value: 0, Mode: Equal>\n\
                    \x20       CreateInstance2D<Id: spawner, Position: 30, 40>\n\
                    \x20       Set<Variable: spawned, Int: 1>\n";
    let map_src = "enemyB = Behavior<Id: \"enemy\">\n\
                   eshape = Shape2D<Type: Box, Position: 0, 0, Size: 10, 10>\n\
                   spawner = OnDemandInstance2D<ShapeId: eshape, BehaviorId: enemyB>\n\
                   scene = Scene\n";
    let mut folder = AssetFolder::new();
    folder.add(Asset::new(AssetKind::Behavior, "Game", game_src));
    folder.add(Asset::new(AssetKind::Behavior, "enemy", ENEMY));
    folder.add(Asset::new(AssetKind::Map, "main", map_src));
    let mut game = Game::new(folder);
    game.start().expect("game starts");

    game.tick(1.0 / 60.0);
    game.tick(1.0 / 60.0);

    let map = game.map().expect("map");
    let spawner = map.on_demand_instancers.get("spawner").expect("instancer");
    assert_eq!(spawner.pairs.len(), 1, "guarded update spawned exactly once");

    let pair = &spawner.pairs[0];
    assert_eq!(pair.shape.data.position_vec(), glam::Vec2::new(30.0, 40.0));
    let position = pair.behavior.context.variable("position").expect("position");
    assert_eq!(position.get(), Value::Float2(glam::Vec2::new(30.0, 40.0)));
    assert_ne!(pair.shape.name, "eshape", "clone got a unique suffixed name");
}

#[test]
fn stop_discards_map_and_instances() {
    let mut game = grid_game();
    assert_eq!(game.state(), GameState::Running);
    game.stop();
    assert_eq!(game.state(), GameState::Idle);
    assert!(game.map().is_none());
}
