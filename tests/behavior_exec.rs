use shrike_engine::assets::AssetFolder;
use shrike_engine::behavior::compiler::BehaviorCompiler;
use shrike_engine::behavior::{BehaviorContext, NodeResult};
use shrike_engine::game::Game;
use shrike_engine::value::Value;
use std::rc::Rc;

fn setup(source: &str) -> (Game, Rc<BehaviorContext>) {
    let game = Game::new(AssetFolder::new());
    let ctx = BehaviorCompiler::new(&game.globals)
        .compile_source("test", source)
        .expect("source should compile");
    (game, Rc::new(ctx))
}

fn int_var(ctx: &Rc<BehaviorContext>, name: &str) -> i32 {
    ctx.variable(name).expect("variable exists").int_value().expect("int variable")
}

#[test]
fn sequence_fails_fast_and_records_its_line() {
    let (mut game, ctx) = setup(
        "a = Int<0>\n\
         c = Int<0>\n\
         flag = Bool<false>\n\
         tree update\n\
         \x20   sequence\n\
         \x20       Set<Variable: a, Int: 1>\n\
         \x20       IsVariable<Variable: flag, Value: true, Mode: Equal>\n\
         \x20       Set<Variable: c, Int: 1>\n",
    );
    ctx.execute("update", &mut game);

    assert_eq!(int_var(&ctx, "a"), 1, "leaf before the failure ran");
    assert_eq!(int_var(&ctx, "c"), 0, "leaf after the failure never ran");
    let failures = ctx.failures();
    assert!(failures.contains(&4), "sequence line recorded, got {failures:?}");
    assert!(failures.contains(&6), "failing leaf line recorded, got {failures:?}");
}

#[test]
fn selector_stops_at_the_first_success() {
    let (mut game, ctx) = setup(
        "hit = Int<0>\n\
         after = Int<0>\n\
         flag = Bool<false>\n\
         tree update\n\
         \x20   selector\n\
         \x20       IsVariable<Variable: flag, Value: true, Mode: Equal>\n\
         \x20       Set<Variable: hit, Int: 1>\n\
         \x20       Set<Variable: after, Int: 1>\n",
    );
    ctx.execute("update", &mut game);

    assert_eq!(int_var(&ctx, "hit"), 1);
    assert_eq!(int_var(&ctx, "after"), 0, "leaves after the first success do not run");
    assert!(!ctx.failures().contains(&4), "selector succeeded, no failure line");
}

#[test]
fn selector_records_failure_when_no_child_succeeds() {
    let (mut game, ctx) = setup(
        "flag = Bool<false>\n\
         tree update\n\
         \x20   selector\n\
         \x20       IsVariable<Variable: flag, Value: true, Mode: Equal>\n",
    );
    ctx.execute("update", &mut game);
    assert!(ctx.failures().contains(&2), "got {:?}", ctx.failures());
}

#[test]
fn repeat_runs_the_full_count_even_on_failure() {
    let (mut game, ctx) = setup(
        "runs = Int<0>\n\
         marker = Int<0>\n\
         flag = Bool<false>\n\
         tree update\n\
         \x20   sequence\n\
         \x20       repeat 3\n\
         \x20           Add<To: runs>\n\
         \x20           IsVariable<Variable: flag, Value: true, Mode: Equal>\n\
         \x20       Set<Variable: marker, Int: 1>\n",
    );
    ctx.execute("update", &mut game);

    assert_eq!(int_var(&ctx, "runs"), 3, "all iterations ran despite the failure");
    assert_eq!(int_var(&ctx, "marker"), 0, "repeat reported Failure to the sequence");
}

#[test]
fn while_runs_until_the_test_flips() {
    let (mut game, ctx) = setup(
        "go = Bool<true>\n\
         n = Int<0>\n\
         tree update\n\
         \x20   while go\n\
         \x20       Add<To: n>\n\
         \x20       Set<Variable: go, Value: false>\n",
    );
    ctx.execute("update", &mut game);
    assert_eq!(int_var(&ctx, "n"), 1);
}

#[test]
fn negated_while_enters_on_false() {
    let (mut game, ctx) = setup(
        "go = Bool<false>\n\
         n = Int<0>\n\
         tree update\n\
         \x20   while go not\n\
         \x20       Add<To: n>\n\
         \x20       Set<Variable: go, Value: true>\n",
    );
    ctx.execute("update", &mut game);
    assert_eq!(int_var(&ctx, "n"), 1);
}

#[test]
fn clamped_accumulation_saturates() {
    let (mut game, ctx) = setup(
        "x = Int<0>\n\
         tree update\n\
         \x20   Add<To: x, Maximum: 10>\n",
    );
    for _ in 0..11 {
        ctx.execute("update", &mut game);
    }
    assert_eq!(int_var(&ctx, "x"), 10, "clamp holds the value at the maximum");
}

#[test]
fn subtract_clamps_at_the_minimum() {
    let (mut game, ctx) = setup(
        "x = Int<5>\n\
         tree update\n\
         \x20   Subtract<From: x, Int: 2, Minimum: 0>\n",
    );
    for _ in 0..4 {
        ctx.execute("update", &mut game);
    }
    assert_eq!(int_var(&ctx, "x"), 0);
}

#[test]
fn vector_arithmetic_is_component_wise() {
    let (mut game, ctx) = setup(
        "pos = Float2<1, 2>\n\
         tree update\n\
         \x20   Add<To: pos, Float2: 3, 4, Maximum: 10, 5>\n",
    );
    ctx.execute("update", &mut game);
    let pos = ctx.variable("pos").expect("pos").float2_value().expect("float2");
    assert_eq!(pos, glam::Vec2::new(4.0, 5.0));
    ctx.execute("update", &mut game);
    let pos = ctx.variable("pos").expect("pos").float2_value().expect("float2");
    assert_eq!(pos, glam::Vec2::new(7.0, 5.0), "y clamped at 5, x still free");
}

#[test]
fn vector_comparison_requires_every_component() {
    let (mut game, ctx) = setup(
        "pos = Float2<3, 1>\n\
         won = Int<0>\n\
         tree update\n\
         \x20   sequence\n\
         \x20       IsVariable<Variable: pos, Value: 2, 2, Mode: GreaterThan>\n\
         \x20       Set<Variable: won, Int: 1>\n",
    );
    ctx.execute("update", &mut game);
    assert_eq!(int_var(&ctx, "won"), 0, "y component is not greater, comparison fails");
}

#[test]
fn call_copies_parameters_by_value() {
    let (mut game, ctx) = setup(
        "result = Int<0>\n\
         amount = Int<7>\n\
         tree update\n\
         \x20   Call<Tree: \"apply\", Variables: amount>\n\
         tree apply int<value>\n\
         \x20   Add<To: result, Int: value>\n",
    );
    ctx.execute("update", &mut game);
    assert_eq!(int_var(&ctx, "result"), 7);

    // Mutating the argument between calls is visible because the copy
    // happens per invocation.
    ctx.variable("amount").expect("amount").set(Value::Int(2));
    ctx.execute("update", &mut game);
    assert_eq!(int_var(&ctx, "result"), 9);
}

#[test]
fn tree_root_runs_all_children_without_short_circuit() {
    let (mut game, ctx) = setup(
        "flag = Bool<false>\n\
         after = Int<0>\n\
         tree update\n\
         \x20   IsVariable<Variable: flag, Value: true, Mode: Equal>\n\
         \x20   Set<Variable: after, Int: 1>\n",
    );
    ctx.execute("update", &mut game);
    assert_eq!(int_var(&ctx, "after"), 1, "root does not stop at a failing child");
}

#[test]
fn executing_an_unknown_tree_is_a_soft_failure() {
    let (mut game, ctx) = setup("tree update\n");
    assert_eq!(ctx.execute("nosuch", &mut game), NodeResult::Failure);
}

#[test]
fn failure_list_resets_per_execution() {
    let (mut game, ctx) = setup(
        "flag = Bool<false>\n\
         tree update\n\
         \x20   sequence\n\
         \x20       IsVariable<Variable: flag, Value: true, Mode: Equal>\n",
    );
    ctx.execute("update", &mut game);
    assert!(!ctx.failures().is_empty());

    ctx.variable("flag").expect("flag").set(Value::Bool(true));
    ctx.execute("update", &mut game);
    assert!(ctx.failures().is_empty(), "previous tick's failures are gone");
}

#[test]
fn random_stays_within_bounds() {
    let (mut game, ctx) = setup(
        "roll = Int<0>\n\
         tree update\n\
         \x20   Random<Variable: roll, From: 1, To: 6>\n",
    );
    for _ in 0..50 {
        ctx.execute("update", &mut game);
        let roll = int_var(&ctx, "roll");
        assert!((1..=6).contains(&roll), "roll {roll} out of range");
    }
}

#[test]
fn log_appends_variable_values() {
    let (mut game, ctx) = setup(
        "score = Int<42>\n\
         tree update\n\
         \x20   Log<V: score>\n",
    );
    ctx.execute("update", &mut game);
    assert!(game.log_text().contains("score 42"), "log was: {}", game.log_text());
}
