use shrike_engine::assets::{Asset, AssetFolder, AssetKind};
use shrike_engine::game::Game;
use shrike_engine::value::Value;

fn game_with(behaviors: &[(&str, &str)], maps: &[(&str, &str)]) -> Game {
    let mut folder = AssetFolder::new();
    for (name, source) in behaviors {
        folder.add(Asset::new(AssetKind::Behavior, *name, *source));
    }
    for (name, source) in maps {
        folder.add(Asset::new(AssetKind::Map, *name, *source));
    }
    Game::new(folder)
}

#[test]
fn entities_land_in_their_collections() {
    let mut game = game_with(
        &[],
        &[(
            "main",
            "bg = Image<Id: \"tiles\">\n\
             boom = Audio<Id: \"boom\", Loops: 2>\n\
             anim = Sequence<Ids: \"f1\", \"f2\", Interval: 0.2>\n\
             gr = Alias<Id: \"bg\">\n\
             world = Physics2D<Gravity: 0, -10>\n\
             box = Shape2D<Type: Box, Position: 5, 5, Size: 10, 10>\n\
             scene = Scene<Layers: l1>\n\
             l1 = Layer<GridSize: 16>\n\
             : grgr\n\
             : ..gr\n",
        )],
    );
    let map = game.compile_map_preview("main").expect("map compiles");

    assert!(map.images.contains_key("bg"));
    assert_eq!(map.audio["boom"].loops, 2);
    assert_eq!(map.sequences["anim"].resources, vec!["f1".to_string(), "f2".to_string()]);
    assert!(map.aliases.contains_key("gr"));
    assert!(map.physics_decls.contains_key("world"));
    assert!(map.shapes.contains_key("box"));
    assert_eq!(map.scenes["scene"].layers, vec!["l1".to_string()]);

    let layer = &map.layers["l1"];
    assert_eq!(layer.rows.len(), 2);
    assert_eq!(layer.rows[0], vec!["gr".to_string(), "gr".to_string()]);
    assert_eq!(layer.rows[1], vec!["..".to_string(), "gr".to_string()]);
}

#[test]
fn cross_reference_shares_the_live_variable() {
    let mut game = game_with(
        &[("hud", "score = Int<3>\nspeed = Float2<1, 2>\ntree init\ntree update\n")],
        &[(
            "main",
            "hudB = Behavior<Id: \"hud\">\n\
             label = Shape2D<Type: Text, Position: 10, 10, Value: hudB.score, Digits: 3>\n\
             mover = Shape2D<Type: Box, Position: hudB.speed, Size: 4, 4>\n\
             scene = Scene\n",
        )],
    );
    let map = game.compile_map_preview("main").expect("map compiles");

    let text = map.shapes["label"].data.text.as_ref().expect("text payload");
    assert_eq!(text.display(), "003");

    // Mutating the behavior variable after resolution is visible on the
    // next read: the option bag holds the object, not a snapshot.
    let hud = map.behaviors.get("hudB").expect("binding");
    hud.context.variable("score").expect("score").set(Value::Int(42));
    assert_eq!(text.display(), "042");

    let mover = &map.shapes["mover"];
    hud.context.variable("speed").expect("speed").set(Value::Float2(glam::Vec2::new(9.0, 9.0)));
    assert_eq!(mover.data.position_vec(), glam::Vec2::new(9.0, 9.0));
}

#[test]
fn unresolved_reference_is_a_compile_error() {
    let mut game = game_with(
        &[],
        &[("main", "s = Shape2D<Type: Box, Position: ghost.pos>\n")],
    );
    let error = game.compile_map_preview("main").expect_err("should fail");
    assert!(error.message.contains("ghost"), "{}", error.message);
    assert_eq!(error.line, 1);
}

#[test]
fn unknown_type_is_a_compile_error() {
    let mut game = game_with(&[], &[("main", "x = Wibble<Id: \"x\">\n")]);
    let error = game.compile_map_preview("main").expect_err("should fail");
    assert!(error.message.contains("Unknown type"), "{}", error.message);
}

#[test]
fn reassignment_moves_the_line_index() {
    let mut game = game_with(
        &[],
        &[("main", "a = Image<Id: \"x\">\na = Image<Id: \"y\">\nb = Image<Id: \"z\">\n")],
    );
    let map = game.compile_map_preview("main").expect("map compiles");

    assert_eq!(map.name_at_line(0), None, "stale entry for 'a' was removed");
    assert_eq!(map.name_at_line(1), Some("a"));
    assert_eq!(map.name_at_line(2), Some("b"));
    assert_eq!(map.images["a"].resource, "y", "last writer wins");
}

#[test]
fn bare_commands_collect_in_order() {
    let mut game = game_with(
        &[],
        &[(
            "main",
            "CanvasSize<Size: 320, 200>\n\
             s = Shape2D<Type: Box, Size: 8, 8>\n\
             world = Physics2D<Gravity: 0, -10>\n\
             ApplyPhysics2D<ShapeId: s, PhysicsId: world>\n\
             ApplyTexture2D<ShapeId: s, Id: bg>\n",
        )],
    );
    let map = game.compile_map_preview("main").expect("map compiles");
    let commands: Vec<&str> = map.commands.iter().map(|c| c.command.as_str()).collect();
    assert_eq!(commands, vec!["CanvasSize", "ApplyPhysics2D", "ApplyTexture2D"]);
}

#[test]
fn radius_implies_the_disk_size() {
    let mut game = game_with(&[], &[("main", "d = Shape2D<Type: Disk, Radius: 12>\n")]);
    let map = game.compile_map_preview("main").expect("map compiles");
    assert_eq!(map.shapes["d"].data.size_vec(), glam::Vec2::new(24.0, 24.0));
}

#[test]
fn behavior_binding_compile_error_surfaces() {
    let mut game = game_with(
        &[("broken", "tree update\n    Frobnicate<Id: x>\n")],
        &[("main", "b = Behavior<Id: \"broken\">\n")],
    );
    let error = game.compile_map_preview("main").expect_err("should fail");
    assert!(error.message.contains("Frobnicate"), "{}", error.message);
}
