mod common;

use std::rc::Rc;

use regex::Regex;

use natvis_engine::schema::viz::{
    SmartPointerUsage, TypeVizExpression, TypeVizSmartPointer,
};
use natvis_engine::{DebuggerHost, Engine, Session};

use common::{MockHost, StaticLoader, array_items, make_viz};

fn declarations_for(vizzes: Vec<natvis_engine::schema::viz::TypeViz>) -> Vec<(String, String, bool)> {
    let host = Rc::new(MockHost::default());
    let engine = Engine::new(Session::new(), Rc::clone(&host) as Rc<dyn DebuggerHost>);
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
    let declarations = host.declarations.borrow().clone();
    declarations
}

#[test]
fn test_smart_pointer_minimal_declarations() {
    let mut viz = make_viz(&["Ptr<*>"], 0);
    viz.smart_pointer = Some(TypeVizSmartPointer {
        expression: TypeVizExpression::new("p"),
        usage: SmartPointerUsage::Minimal,
    });
    let declarations = declarations_for(vec![viz]);

    let operator_decls: Vec<_> = declarations
        .iter()
        .filter(|(name, _, _)| name.contains("::operator"))
        .collect();
    assert_eq!(operator_decls.len(), 1);
    let (name, body, uses_regex) = operator_decls[0];
    assert!(uses_regex);
    // the regex form matches exactly the registered type
    let name_pattern = Regex::new(name).unwrap();
    assert!(name_pattern.is_match("Ptr<int>::operator->"));
    assert!(name_pattern.is_match("Ptr<int>::operator!="));
    assert!(!name_pattern.is_match("Other<int>::operator->"));
    assert!(!name_pattern.is_match("Ptr<int>::operator[]"));
    for op in ["operator->", "operator*", "operator!", "operator==", "operator!="] {
        assert!(body.contains(op), "missing {op} in body");
    }
    assert!(!body.contains("operator[]"));
}

#[test]
fn test_smart_pointer_indexable_declarations() {
    let mut viz = make_viz(&["Iter<*>"], 0);
    viz.smart_pointer = Some(TypeVizSmartPointer {
        expression: TypeVizExpression::new("ptr"),
        usage: SmartPointerUsage::Indexable,
    });
    let declarations = declarations_for(vec![viz]);

    let bodies: String = declarations
        .iter()
        .map(|(_, body, _)| body.clone())
        .collect::<Vec<_>>()
        .join("\n");
    assert!(bodies.contains("operator[]"));
    assert!(bodies.contains("operator+"));
    assert!(bodies.contains("operator-"));
}

#[test]
fn test_array_items_subscript_declaration() {
    let viz_rc = {
        let mut viz = make_viz(&["MyVec<*>"], 0);
        viz.item_providers = Some(vec![Rc::new(array_items("n", "data"))]);
        Rc::new(viz)
    };

    let host = Rc::new(MockHost::default());
    let engine = Engine::new(Session::new(), Rc::clone(&host) as Rc<dyn DebuggerHost>);
    engine.with_manager(|manager| {
        manager
            .register(
                "test.natvis",
                Rc::new(StaticLoader {
                    visualizers: vec![Rc::clone(&viz_rc)],
                }),
            )
            .unwrap();
    });

    let declarations = host.declarations.borrow();
    let subscript = declarations
        .iter()
        .find(|(name, _, _)| name.contains("operator"))
        .expect("subscript operator declared");
    assert!(subscript.2);
    assert!(subscript.1.contains("return ((data)[jb$internal$name$$index$$]);"));
    assert!(subscript.1.contains("const_cast"));

    // the synthesiser wires the getter slot of the provider node
    let providers = viz_rc.item_providers.as_ref().unwrap();
    let natvis_engine::schema::nodes::ItemProvider::ArrayItems(node) = &*providers[0] else {
        panic!("expected ArrayItems");
    };
    assert_eq!(
        node.getter.get(),
        Some(natvis_engine::methods::SyntheticMethod::SubscriptOperator)
    );
}

#[test]
fn test_string_comparators_for_basic_string() {
    let mut viz = make_viz(&["std::basic_string<char,*>"], 0);
    viz.item_providers = Some(vec![Rc::new(array_items("size", "buffer"))]);
    let declarations = declarations_for(vec![viz]);

    let comparator_bodies: Vec<_> = declarations
        .iter()
        .filter(|(_, body, _)| body.contains("__builtin_strncmp"))
        .collect();
    assert_eq!(comparator_bodies.len(), 2, "operator== and operator!=");
    for (_, body, _) in &comparator_bodies {
        assert!(body.contains("const char *"));
        assert!(body.contains("__builtin_strlen"));
    }
}

#[test]
fn test_reload_reemits_declarations() {
    let mut viz = make_viz(&["Ptr<*>"], 0);
    viz.smart_pointer = Some(TypeVizSmartPointer {
        expression: TypeVizExpression::new("p"),
        usage: SmartPointerUsage::Minimal,
    });
    let viz = Rc::new(viz);

    let host = Rc::new(MockHost::default());
    let engine = Engine::new(Session::new(), Rc::clone(&host) as Rc<dyn DebuggerHost>);
    let loader = Rc::new(StaticLoader {
        visualizers: vec![viz],
    });
    engine.with_manager(|manager| {
        manager.register("a.natvis", Rc::clone(&loader) as _).unwrap();
    });
    let after_register = host.declarations.borrow().len();
    assert!(after_register > 0);

    engine.with_manager(|manager| {
        assert!(manager.unregister("a.natvis"));
    });
    assert_eq!(host.declarations.borrow().len(), 0);
}
