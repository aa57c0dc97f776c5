use shrike_engine::assets::{Asset, AssetFolder, AssetKind};
use shrike_engine::events::EngineEvent;
use shrike_engine::game::Game;

fn game_with_root(source: &str) -> Game {
    let mut folder = AssetFolder::new();
    folder.add(Asset::new(AssetKind::Behavior, "Game", source));
    let mut game = Game::new(folder);
    game.start().expect("game starts");
    game
}

#[test]
fn clamped_accumulation_over_eleven_ticks() {
    let mut game = game_with_root(
        "tree init\n\
         tree update\n\
         \x20   x = Int<0>\n\
         \x20   Add<to: x, maximum: 10>\n",
    );
    for _ in 0..11 {
        game.tick(1.0 / 60.0);
    }
    let ctx = game.game_context().expect("root context").clone();
    let x = ctx.variable("x").expect("x").int_value().expect("int");
    assert_eq!(x, 10);
}

#[test]
fn start_requires_a_compiling_game_behavior() {
    let mut folder = AssetFolder::new();
    folder.add(Asset::new(AssetKind::Behavior, "Game", "tree update\n    Frobnicate<Id: x>\n"));
    let mut game = Game::new(folder);
    assert!(game.start().is_err());
    assert!(game.last_error().is_some(), "compile error kept for the editor");

    let mut empty = Game::new(AssetFolder::new());
    assert!(empty.start().is_err(), "missing root behavior prevents start");
}

#[test]
fn init_runs_once_at_start() {
    let mut game = game_with_root(
        "booted = Int<0>\n\
         tree init\n\
         \x20   Add<To: booted>\n\
         tree update\n",
    );
    game.tick(1.0 / 60.0);
    game.tick(1.0 / 60.0);
    let ctx = game.game_context().expect("context").clone();
    assert_eq!(ctx.variable("booted").expect("booted").int_value().expect("int"), 1);
}

#[test]
fn timers_fire_on_the_virtual_clock() {
    let mut game = game_with_root(
        "count = Int<0>\n\
         tree init\n\
         \x20   StartTimer<Tree: \"bump\", Interval: 0.5>\n\
         tree update\n\
         tree bump\n\
         \x20   Add<To: count>\n",
    );
    for _ in 0..60 {
        game.tick(1.0 / 60.0);
    }
    let ctx = game.game_context().expect("context").clone();
    let count = ctx.variable("count").expect("count").int_value().expect("int");
    assert_eq!(count, 2, "fired at 0.5s and again at 1.0s");
}

#[test]
fn one_shot_timers_do_not_repeat() {
    let mut game = game_with_root(
        "count = Int<0>\n\
         tree init\n\
         \x20   StartTimer<Tree: \"bump\", Interval: 0.1, Once: true>\n\
         tree update\n\
         tree bump\n\
         \x20   Add<To: count>\n",
    );
    for _ in 0..60 {
        game.tick(1.0 / 60.0);
    }
    let ctx = game.game_context().expect("context").clone();
    assert_eq!(ctx.variable("count").expect("count").int_value().expect("int"), 1);
}

#[test]
fn time_global_advances_with_ticks() {
    let mut game = game_with_root("tree init\ntree update\n");
    for _ in 0..30 {
        game.tick(1.0 / 60.0);
    }
    let ctx = game.game_context().expect("context").clone();
    let time = ctx.variable("Time").expect("Time global").float_value().expect("float");
    assert!((time - 0.5).abs() < 1e-3, "Time was {time}");
}

#[test]
fn stop_clears_timers_and_contexts() {
    let mut game = game_with_root(
        "tree init\n\
         \x20   StartTimer<Tree: \"bump\", Interval: 0.5>\n\
         tree update\n\
         tree bump\n",
    );
    assert_eq!(game.scheduler.len(), 1);
    game.stop();
    assert!(game.scheduler.is_empty());
    assert!(game.game_context().is_none());
}

#[test]
fn scene_change_is_announced_to_collaborators() {
    let mut folder = AssetFolder::new();
    folder.add(Asset::new(
        AssetKind::Behavior,
        "Game",
        "tree init\n\x20   SetScene<Map: \"main\", SceneId: \"scene\">\ntree update\n",
    ));
    folder.add(Asset::new(AssetKind::Map, "main", "scene = Scene\n"));
    let mut game = Game::new(folder);
    game.start().expect("game starts");

    let events = game.events.drain();
    assert!(
        events
            .iter()
            .any(|e| matches!(e, EngineEvent::SceneChanged { map, scene } if map == "main" && scene == "scene")),
        "got {events:?}"
    );
    assert_eq!(game.current_scene(), Some("scene"));
}

#[test]
fn failed_scene_reference_is_a_soft_failure() {
    let mut folder = AssetFolder::new();
    folder.add(Asset::new(
        AssetKind::Behavior,
        "Game",
        "tree init\n\x20   SetScene<Map: \"main\", SceneId: \"nosuch\">\ntree update\n",
    ));
    folder.add(Asset::new(AssetKind::Map, "main", "scene = Scene\n"));
    let mut game = Game::new(folder);
    game.start().expect("start succeeds, the failure is soft");
    assert!(game.map().is_none());
    assert!(!game.game_context().expect("context").failures().is_empty());
}
