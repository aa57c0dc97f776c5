use shrike_engine::assets::AssetFolder;
use shrike_engine::behavior::compiler::BehaviorCompiler;
use shrike_engine::behavior::{BehaviorContext, NodeKind};
use shrike_engine::game::Game;

fn compile(source: &str) -> Result<BehaviorContext, shrike_engine::CompileError> {
    let game = Game::new(AssetFolder::new());
    BehaviorCompiler::new(&game.globals).compile_source("test", source)
}

#[test]
fn trees_and_parameters_are_declared() {
    let ctx = compile(
        "tree init\n\
         tree update int<count> float2<target>\n    sequence\n        Add<To: count>\n",
    )
    .expect("compiles");

    assert!(ctx.tree("init").is_some());
    let update = ctx.tree("update").expect("update tree");
    assert_eq!(update.parameters.len(), 2);
    assert_eq!(update.parameters[0].name(), "count");
    // Parameters double as context variables so leaves can resolve them.
    assert!(ctx.variable("count").is_some());
    assert!(ctx.variable("target").is_some());
}

#[test]
fn nesting_depth_follows_indentation() {
    let ctx = compile(
        "tree update\n    sequence\n        selector\n            HasTouch\n        HasTap\n    sequence\n        HasTouch\n",
    )
    .expect("compiles");

    let update = ctx.tree("update").expect("tree");
    assert_eq!(update.children.len(), 2, "two root-level sequences");
    let NodeKind::Branch { children, .. } = &update.children[0].kind else {
        panic!("expected a branch");
    };
    // selector plus the dedented HasTap leaf.
    assert_eq!(children.len(), 2);
}

#[test]
fn multi_level_dedent_pops_per_level() {
    let ctx = compile(
        "tree update\n    sequence\n        sequence\n            HasTouch\n    HasTap\n",
    )
    .expect("compiles");

    let update = ctx.tree("update").expect("tree");
    // The two-level dedent drops both open branches; HasTap lands on the
    // tree root next to the outer sequence.
    assert_eq!(update.children.len(), 2);
    assert!(matches!(update.children[1].kind, NodeKind::Leaf(_)));
}

#[test]
fn leaf_outside_any_tree_is_an_error() {
    let error = compile("HasTouch\n").expect_err("should fail");
    assert!(error.message.contains("without active branch"), "{}", error.message);
    assert_eq!(error.line, 1);
}

#[test]
fn unknown_statement_is_reported_with_its_line() {
    let error = compile("tree update\n    Frobnicate<Id: \"x\">\n").expect_err("should fail");
    assert!(error.message.contains("Frobnicate"), "{}", error.message);
    assert_eq!(error.line, 2);
}

#[test]
fn unterminated_option_list_is_an_error() {
    let error = compile("tree update\n    IsKeyDown<Key: \"Space\"\n").expect_err("should fail");
    assert!(error.message.contains("no closing '>'"), "{}", error.message);
}

#[test]
fn wrong_vector_arity_is_an_error() {
    let error = compile("pos = Float2<1, 2, 3>\n").expect_err("should fail");
    assert!(error.message.contains("Float2"), "{}", error.message);
}

#[test]
fn unknown_variable_in_leaf_is_an_error() {
    let error = compile("tree update\n    Add<To: missing>\n").expect_err("should fail");
    assert!(error.message.contains("missing"), "{}", error.message);
}

#[test]
fn duplicate_tree_name_is_an_error() {
    let error = compile("tree update\ntree update\n").expect_err("should fail");
    assert!(error.message.contains("Duplicate"), "{}", error.message);
}

#[test]
fn declarations_do_not_become_runtime_nodes() {
    let ctx = compile("tree update\n    x = Int<0>\n    Add<To: x>\n").expect("compiles");
    let update = ctx.tree("update").expect("tree");
    assert_eq!(update.children.len(), 1, "only the Add leaf is a node");
    assert!(ctx.variable("x").is_some());
}

#[test]
fn compiling_twice_yields_the_same_structure() {
    let source = "x = Int<4>\ntree update\n    sequence\n        Add<To: x, Maximum: 9>\n";
    let a = compile(source).expect("first compile");
    let b = compile(source).expect("second compile");
    let tree_a = a.tree("update").expect("tree");
    let tree_b = b.tree("update").expect("tree");
    assert_eq!(tree_a.children.len(), tree_b.children.len());
    assert_eq!(format!("{:?}", tree_a.children), format!("{:?}", tree_b.children));
}

#[test]
fn comments_are_stripped_at_the_first_hash() {
    let ctx = compile("x = Int<2> # the counter\ntree update\n").expect("compiles");
    assert!(ctx.variable("x").is_some());
}

#[test]
fn line_index_maps_lines_to_node_names() {
    let ctx = compile("tree update\n    sequence\n        HasTouch\n").expect("compiles");
    assert_eq!(ctx.node_at_line(0).as_deref(), Some("tree"));
    assert_eq!(ctx.node_at_line(1).as_deref(), Some("sequence"));
    assert_eq!(ctx.node_at_line(2).as_deref(), Some("HasTouch"));
}
