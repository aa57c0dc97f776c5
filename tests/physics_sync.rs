use shrike_engine::assets::{Asset, AssetFolder, AssetKind};
use shrike_engine::game::Game;
use shrike_engine::physics::PHYSICS_TIMESTEP;

const GAME_SRC: &str = "tree init\n\
                        \x20   SetScene<Map: \"main\", SceneId: \"scene\">\n\
                        tree update\n";

const MAP_SRC: &str = "world = Physics2D<Gravity: 0, -10>\n\
                       floor = Shape2D<Type: Box, Position: 0, 200, Size: 200, 20>\n\
                       ball = Shape2D<Type: Disk, Radius: 10, Position: 95, 0>\n\
                       scene = Scene\n\
                       ApplyPhysics2D<ShapeId: floor, PhysicsId: world>\n\
                       ApplyPhysics2D<ShapeId: ball, PhysicsId: world, Body: \"dynamic\">\n";

fn physics_game() -> Game {
    let mut folder = AssetFolder::new();
    folder.add(Asset::new(AssetKind::Behavior, "Game", GAME_SRC));
    folder.add(Asset::new(AssetKind::Map, "main", MAP_SRC));
    let mut game = Game::new(folder);
    game.start().expect("game starts");
    game
}

#[test]
fn worlds_and_bodies_come_from_the_command_pass() {
    let game = physics_game();
    let map = game.map().expect("map installed");
    assert!(map.physics.contains_key("world"));
    assert_eq!(map.physics["world"].body_count(), 2);
    assert!(map.shapes["floor"].body.is_some());
    assert!(map.shapes["ball"].body.is_some());
}

#[test]
fn dynamic_body_transform_writes_back_into_shape_state() {
    let mut game = physics_game();
    let start_y = game.map().expect("map").shapes["ball"].data.position_vec().y;

    for _ in 0..30 {
        game.tick(PHYSICS_TIMESTEP);
    }

    let map = game.map().expect("map");
    let ball = &map.shapes["ball"];
    let after_y = ball.data.position_vec().y;
    // Declared gravity (0, -10) pulls down the screen: y grows.
    assert!(after_y > start_y + 5.0, "ball fell from {start_y} to {after_y}");

    let floor_y = map.shapes["floor"].data.position_vec().y;
    assert!((floor_y - 200.0).abs() < 1e-3, "static floor does not move, got {floor_y}");
}

#[test]
fn contact_lists_fill_symmetrically_on_landing() {
    let mut game = physics_game();
    for _ in 0..240 {
        game.tick(PHYSICS_TIMESTEP);
    }

    let map = game.map().expect("map");
    let ball = &map.shapes["ball"];
    let floor = &map.shapes["floor"];
    assert!(
        ball.contacts.iter().any(|name| name == "floor"),
        "ball contacts: {:?}",
        ball.contacts
    );
    assert!(
        floor.contacts.iter().any(|name| name == "ball"),
        "floor contacts: {:?}",
        floor.contacts
    );

    // The ball comes to rest on top of the floor, not inside it.
    let rest_y = ball.data.position_vec().y;
    assert!(rest_y > 100.0 && rest_y < 200.0, "rest position {rest_y}");
}

#[test]
fn set_linear_velocity_moves_the_owned_body() {
    let game_src = "tree init\n\
                    \x20   SetScene<Map: \"main\", SceneId: \"scene\">\n\
                    tree update\n\
                    \x20   SetLinearVelocity2D<ShapeId: ball, Float2: 3, 0>\n";
    let map_src = "world = Physics2D<Gravity: 0, 0>\n\
                   ball = Shape2D<Type: Disk, Radius: 10, Position: 0, 100>\n\
                   scene = Scene\n\
                   ApplyPhysics2D<ShapeId: ball, PhysicsId: world, Body: \"dynamic\">\n";
    let mut folder = AssetFolder::new();
    folder.add(Asset::new(AssetKind::Behavior, "Game", game_src));
    folder.add(Asset::new(AssetKind::Map, "main", map_src));
    let mut game = Game::new(folder);
    game.start().expect("game starts");

    let start_x = game.map().expect("map").shapes["ball"].data.position_vec().x;
    for _ in 0..60 {
        game.tick(PHYSICS_TIMESTEP);
    }
    let after_x = game.map().expect("map").shapes["ball"].data.position_vec().x;
    // 3 m/s at 100 px/m for one second.
    assert!(after_x > start_x + 100.0, "ball moved from {start_x} to {after_x}");
}

#[test]
fn debug_text_reports_worlds_and_log() {
    let game = physics_game();
    let text = game.debug_text();
    assert!(text.contains("Current map \"main\""), "{text}");
    assert!(text.contains("Physics world \"world\""), "{text}");
    assert!(text.contains("Bodies in world: 2"), "{text}");
}
