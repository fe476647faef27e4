mod common;

use std::rc::Rc;

use natvis_engine::schema::viz::TypeViz;
use natvis_engine::{Engine, Session, declarative_summary};

use common::{MockHost, MockTarget, MockValue, PointerTarget, StaticLoader, array_items, make_viz, summary};

fn engine_with_vizzes(vizzes: Vec<TypeViz>) -> Rc<Engine> {
    let engine = Engine::new(Session::new(), Rc::new(MockHost::default()));
    engine.with_manager(|manager| {
        manager
            .register(
                "test.natvis",
                Rc::new(StaticLoader {
                    visualizers: vizzes.into_iter().map(Rc::new).collect(),
                }),
            )
            .unwrap();
    });
    engine
}

fn vec_value(target: &Rc<MockTarget>, values: &[i64]) -> MockValue {
    let array = target.alloc_int_array(values);
    let data = target.alloc_pointer(
        &common::MockType::int(),
        Some(PointerTarget {
            object: array,
            index: 0,
        }),
    );
    let n = target.alloc_int(values.len() as i64);
    let vec = target.alloc_struct("MyVec<int>", vec![("n", n), ("data", data)]);
    MockValue::new(target, &vec, Some("vec"), Some("vec"))
}

#[test]
fn test_interpolated_summary() {
    let mut viz = make_viz(&["MyVec<*>"], 0);
    viz.summaries.push(summary("size={n}"));
    let engine = engine_with_vizzes(vec![viz]);

    let target = MockTarget::new();
    let value = vec_value(&target, &[10, 20, 30]).as_ref();
    assert_eq!(declarative_summary(&engine, &value), "size=3");
}

#[test]
fn test_summary_condition_selects_candidate() {
    let mut viz = make_viz(&["MyVec<*>"], 0);
    let mut empty = summary("empty");
    empty.condition = Some(natvis_engine::schema::viz::TypeVizCondition::expression(
        "n == 0",
    ));
    viz.summaries.push(empty);
    viz.summaries.push(summary("size={n}"));
    let engine = engine_with_vizzes(vec![viz]);

    let target = MockTarget::new();
    let non_empty = vec_value(&target, &[1]).as_ref();
    assert_eq!(declarative_summary(&engine, &non_empty), "size=1");

    let empty_vec = vec_value(&target, &[]).as_ref();
    assert_eq!(declarative_summary(&engine, &empty_vec), "empty");
}

#[test]
fn test_summary_falls_back_to_children() {
    // a visualizer without a display string summarizes from its children
    let mut viz = make_viz(&["MyVec<*>"], 0);
    viz.item_providers = Some(vec![Rc::new(array_items("n", "data"))]);
    viz.hide_raw_view = true;
    let engine = engine_with_vizzes(vec![viz]);

    let target = MockTarget::new();
    let value = vec_value(&target, &[4, 5]).as_ref();
    assert_eq!(declarative_summary(&engine, &value), "{[0]=4, [1]=5}");
}

#[test]
fn test_exact_match_wins_over_wildcard() {
    let mut wildcard = make_viz(&["MyVec<*>"], 10);
    wildcard.summaries.push(summary("wildcard"));
    let mut exact = make_viz(&["MyVec<int>"], 1);
    exact.summaries.push(summary("exact"));
    let engine = engine_with_vizzes(vec![wildcard, exact]);

    let target = MockTarget::new();
    let value = vec_value(&target, &[1, 2]).as_ref();
    assert_eq!(declarative_summary(&engine, &value), "exact");
}

#[test]
fn test_priority_orders_candidates() {
    let mut low = make_viz(&["MyVec<*>"], 1);
    low.summaries.push(summary("low"));
    let mut high = make_viz(&["MyVec<*>"], 10);
    high.summaries.push(summary("high"));
    let engine = engine_with_vizzes(vec![low, high]);

    let target = MockTarget::new();
    let value = vec_value(&target, &[1]).as_ref();
    assert_eq!(declarative_summary(&engine, &value), "high");
}

#[test]
fn test_unmatched_struct_uses_fallback() {
    let engine = engine_with_vizzes(vec![]);

    let target = MockTarget::new();
    let a = target.alloc_int(1);
    let b = target.alloc_int(2);
    let plain = target.alloc_struct("Plain", vec![("a", a), ("b", b)]);
    let value = MockValue::new(&target, &plain, Some("plain"), Some("plain")).as_ref();
    assert_eq!(declarative_summary(&engine, &value), "{a=1, b=2}");
}

#[test]
fn test_markup_summary_labels_numbers() {
    let mut viz = make_viz(&["MyVec<*>"], 0);
    viz.summaries.push(summary("n={n}"));
    let engine = engine_with_vizzes(vec![viz]);
    engine.session().settings.markup.set(true);

    let target = MockTarget::new();
    let value = vec_value(&target, &[9]).as_ref();
    let rendered = declarative_summary(&engine, &value);
    assert_eq!(rendered, "n=\u{fe}N1\u{fe}E");
}

#[test]
fn test_synth_provider_boundary() {
    let mut viz = make_viz(&["MyVec<*>"], 0);
    viz.item_providers = Some(vec![Rc::new(array_items("n", "data"))]);
    viz.hide_raw_view = true;
    let engine = engine_with_vizzes(vec![viz]);

    let target = MockTarget::new();
    let value = vec_value(&target, &[10, 20]).as_ref();

    let mut synth = natvis_engine::DeclarativeSynthProvider::new(Rc::clone(&engine), &value);
    assert!(synth.has_children());
    assert_eq!(synth.num_children(usize::MAX), 2);
    assert_eq!(
        synth.get_child_at_index(1).unwrap().value_as_signed(),
        Some(20)
    );
    assert_eq!(synth.get_child_index("[0]"), 0);
    assert!(!synth.update());
}
