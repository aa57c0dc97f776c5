use shrike_engine::assets::{AssetFolder, AssetKind};
use shrike_engine::game::Game;
use std::fs;

#[test]
fn project_directory_round_trips_into_a_running_game() {
    let dir = tempfile::tempdir().expect("temp project dir");
    fs::write(
        dir.path().join("Game.behavior"),
        "tree init\n    SetScene<Map: \"main\", SceneId: \"scene\">\ntree update\n",
    )
    .expect("write behavior");
    fs::write(dir.path().join("main.map"), "scene = Scene\n").expect("write map");
    fs::write(dir.path().join("notes.txt"), "ignored").expect("write stray file");

    let folder = AssetFolder::load_dir(dir.path()).expect("folder loads");
    assert!(folder.get("Game", AssetKind::Behavior).is_some());
    assert!(folder.get("main", AssetKind::Map).is_some());
    assert!(folder.get("notes", AssetKind::Image).is_none(), "unknown extensions are skipped");

    let mut game = Game::new(folder);
    game.start().expect("project starts");
    assert!(game.map().is_some());
}

#[test]
fn recompiling_an_asset_replaces_its_context_wholesale() {
    let dir = tempfile::tempdir().expect("temp project dir");
    fs::write(dir.path().join("Game.behavior"), "x = Int<1>\ntree init\ntree update\n")
        .expect("write behavior");
    let folder = AssetFolder::load_dir(dir.path()).expect("folder loads");
    let mut game = Game::new(folder);

    game.compile_behavior("Game").expect("first compile");
    let first = game
        .assets
        .get("Game", AssetKind::Behavior)
        .and_then(|a| a.behavior.clone())
        .expect("compiled context");

    game.compile_behavior("Game").expect("second compile");
    let second = game
        .assets
        .get("Game", AssetKind::Behavior)
        .and_then(|a| a.behavior.clone())
        .expect("compiled context");

    assert!(!std::rc::Rc::ptr_eq(&first, &second), "a fresh context replaces the old one");
    assert!(second.variable("x").is_some());
}

#[test]
fn compile_errors_keep_the_previous_valid_state() {
    let mut folder = AssetFolder::new();
    folder.add(shrike_engine::assets::Asset::new(
        AssetKind::Behavior,
        "Game",
        "x = Int<1>\ntree init\ntree update\n",
    ));
    let mut game = Game::new(folder);
    game.compile_behavior("Game").expect("valid source compiles");

    if let Some(asset) = game.assets.get_mut("Game", AssetKind::Behavior) {
        asset.source = "tree update\n    Frobnicate<Id: x>\n".to_string();
    }
    let error = game.compile_behavior("Game").expect_err("broken source fails");
    assert_eq!(error.line, 2);

    let asset = game.assets.get("Game", AssetKind::Behavior).expect("asset");
    let ctx = asset.behavior.as_ref().expect("previous context survives");
    assert!(ctx.variable("x").is_some(), "old compiled state is untouched");
}
