use cinder_core::ast::{Env, LocalBinding};
use cinder_core::form::Symbol;
use cinder_core::namespace::{NamespaceTable, VarDefinition, CORE_NS, USER_NS};
use cinder_core::resolver::{Resolved, Resolver};

fn table_with_def(ns: &str, name: &str) -> NamespaceTable {
    let mut table = NamespaceTable::new();
    table
        .ensure(ns)
        .defs
        .insert(name.to_string(), VarDefinition::named(Symbol::qualified(ns, name)));
    table
}

fn var_name(resolved: Resolved) -> Symbol {
    match resolved {
        Resolved::Var(var) => var.name,
        other => panic!("expected a var, got {other:?}"),
    }
}

#[test]
fn test_local_shadows_namespace_def() {
    let table = table_with_def(USER_NS, "x");
    let local = LocalBinding {
        name: Symbol::simple("x"),
        local: true,
        ..LocalBinding::default()
    };
    let env = Env::new(USER_NS).with_local(local.clone());
    let resolved = Resolver::new(&table).resolve(&env, &Symbol::simple("x"), None);
    assert_eq!(resolved, Resolved::Local(local));
}

#[test]
fn test_current_namespace_and_core() {
    let table = table_with_def(USER_NS, "x");
    let resolver = Resolver::new(&table);
    let env = Env::new(USER_NS);
    let resolved = resolver.resolve(&env, &Symbol::simple("x"), None);
    match resolved {
        Resolved::Var(var) => {
            assert_eq!(var.name, Symbol::qualified(USER_NS, "x"));
            assert!(var.def.is_some());
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(
        var_name(resolver.resolve(&env, &Symbol::simple("when"), None)),
        Symbol::qualified(CORE_NS, "when")
    );
    assert_eq!(
        var_name(resolver.resolve(&env, &Symbol::simple("missing"), None)),
        Symbol::qualified(USER_NS, "missing")
    );
}

#[test]
fn test_excluded_core_names_resolve_locally() {
    let mut table = NamespaceTable::new();
    table.ensure(USER_NS).excludes.insert("when".into());
    let resolver = Resolver::new(&table);
    assert_eq!(
        var_name(resolver.resolve(&Env::new(USER_NS), &Symbol::simple("when"), None)),
        Symbol::qualified(USER_NS, "when")
    );
}

#[test]
fn test_aliases_uses_and_imports() {
    let mut table = table_with_def("app.util", "helper");
    {
        let user = table.ensure(USER_NS);
        user.requires.insert("u".into(), "app.util".into());
        user.uses.insert("helper".into(), "app.util".into());
        user.imports
            .insert("Widget".into(), Symbol::qualified("app.ui", "Widget"));
    }
    let resolver = Resolver::new(&table);
    let env = Env::new(USER_NS);
    assert_eq!(
        var_name(resolver.resolve(&env, &Symbol::qualified("u", "helper"), None)),
        Symbol::qualified("app.util", "helper")
    );
    assert_eq!(
        var_name(resolver.resolve(&env, &Symbol::simple("helper"), None)),
        Symbol::qualified("app.util", "helper")
    );
    assert_eq!(
        var_name(resolver.resolve(&env, &Symbol::simple("Widget"), None)),
        Symbol::qualified("app.ui", "Widget")
    );
    assert_eq!(
        var_name(resolver.resolve(&env, &Symbol::qualified("clojure.core", "when"), None)),
        Symbol::qualified(CORE_NS, "when")
    );
}

#[test]
fn test_js_references() {
    let table = NamespaceTable::new();
    let resolver = Resolver::new(&table);
    let env = Env::new(USER_NS);
    assert_eq!(
        resolver.resolve(&env, &Symbol::qualified("js", "console"), None),
        Resolved::Js {
            name: Symbol::qualified("js", "console"),
            malformed: false
        }
    );
    assert!(matches!(
        resolver.resolve(&env, &Symbol::qualified("js", "console.log"), None),
        Resolved::Js { malformed: true, .. }
    ));
}

#[test]
fn test_dotted_symbols() {
    let table = NamespaceTable::new();
    let resolver = Resolver::new(&table);
    let local = LocalBinding {
        name: Symbol::simple("obj"),
        local: true,
        ..LocalBinding::default()
    };
    let env = Env::new(USER_NS).with_local(local);
    assert_eq!(
        var_name(resolver.resolve(&env, &Symbol::simple("obj.field"), None)),
        Symbol::simple("obj.field")
    );
    assert_eq!(
        var_name(resolver.resolve(&env, &Symbol::simple("goog.string"), None)),
        Symbol::qualified("goog", "string")
    );
}

#[test]
fn test_resolve_existing_reports_undeclared() {
    let table = table_with_def(USER_NS, "known");
    let resolver = Resolver::new(&table);
    let env = Env::new(USER_NS);
    let mut missing = Vec::new();
    for name in ["known", "unknown", "when"] {
        resolver.resolve_existing(&env, &Symbol::simple(name), &mut |_, sym| {
            missing.push(sym.clone())
        });
    }
    resolver.resolve_existing(&env, &Symbol::qualified("not.loaded", "x"), &mut |_, sym| {
        missing.push(sym.clone())
    });
    assert_eq!(missing, vec![Symbol::qualified(USER_NS, "unknown")]);
}
