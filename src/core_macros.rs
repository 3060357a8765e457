//! Bootstrap macros seeded into `cinder.core`.

use crate::ast::Env;
use crate::error::{ensure, AnalysisError};
use crate::form::{Form, FormKind, Symbol};
use crate::namespace::{MacroFn, NamespaceTable, VarDefinition, CORE_NS};
use std::rc::Rc;

/// Runtime functions the generated code of the reader and these macros calls.
/// They are declared without arity information.
const RUNTIME_FNS: &[&str] = &[
    "seq", "concat", "list", "apply", "vector", "hash-map", "hash-set", "with-meta", "deref",
    "re-pattern",
];

pub(crate) fn install(table: &mut NamespaceTable) {
    let core = table.ensure(CORE_NS);
    for name in RUNTIME_FNS {
        core.defs.insert(
            name.to_string(),
            VarDefinition {
                fn_var: true,
                declared: true,
                ..VarDefinition::named(Symbol::qualified(CORE_NS, *name))
            },
        );
    }

    let macros: [(&str, MacroFn); 7] = [
        ("let", Rc::new(expand_let)),
        ("loop", Rc::new(expand_loop)),
        ("fn", Rc::new(expand_fn)),
        ("defn", Rc::new(expand_defn)),
        ("when", Rc::new(expand_when)),
        ("declare", Rc::new(expand_declare)),
        ("comment", Rc::new(expand_comment)),
    ];
    for (name, expander) in macros {
        table.register_macro(CORE_NS, name, expander);
    }
}

fn with_head(head: &str, args: &[Form]) -> Form {
    let mut items = Vec::with_capacity(args.len() + 1);
    items.push(Form::sym(head));
    items.extend_from_slice(args);
    Form::list(items)
}

fn expand_let(_: &Form, _: &Env, args: &[Form]) -> Result<Form, AnalysisError> {
    ensure(args.first().and_then(Form::as_vector).is_some(), || {
        "let requires a vector for its binding".to_string()
    })?;
    Ok(with_head("let*", args))
}

fn expand_loop(_: &Form, _: &Env, args: &[Form]) -> Result<Form, AnalysisError> {
    ensure(args.first().and_then(Form::as_vector).is_some(), || {
        "loop requires a vector for its binding".to_string()
    })?;
    Ok(with_head("loop*", args))
}

fn expand_fn(_: &Form, _: &Env, args: &[Form]) -> Result<Form, AnalysisError> {
    Ok(with_head("fn*", args))
}

fn expand_defn(_: &Form, _: &Env, args: &[Form]) -> Result<Form, AnalysisError> {
    let (name, rest) = match args.split_first() {
        Some((name, rest)) if name.as_symbol().is_some() => (name, rest),
        _ => return Err(AnalysisError::invalid("defn requires a symbol name")),
    };
    let (doc, fdecl) = match rest.split_first() {
        Some((first, tail)) if matches!(first.kind, FormKind::Str(_)) => (Some(first.clone()), tail),
        _ => (None, rest),
    };
    ensure(!fdecl.is_empty(), || format!("defn {name} has no parameter vector"))?;

    let mut fn_items = vec![Form::sym("fn*"), name.clone().with_meta(None)];
    fn_items.extend_from_slice(fdecl);
    let var_name = match doc {
        Some(doc) => name.clone().merge_meta(vec![(Form::kw("doc"), doc)]),
        None => name.clone(),
    };
    Ok(Form::list(vec![
        Form::sym("def"),
        var_name,
        Form::list(fn_items),
    ]))
}

fn expand_when(_: &Form, _: &Env, args: &[Form]) -> Result<Form, AnalysisError> {
    let (test, body) = args
        .split_first()
        .ok_or_else(|| AnalysisError::invalid("when requires a test"))?;
    Ok(Form::list(vec![
        Form::sym("if"),
        test.clone(),
        with_head("do", body),
        Form::nil(),
    ]))
}

fn expand_declare(_: &Form, _: &Env, args: &[Form]) -> Result<Form, AnalysisError> {
    let defs = args
        .iter()
        .map(|name| {
            ensure(name.as_symbol().is_some(), || {
                format!("declare expects symbols, got {name}")
            })?;
            let declared = name.clone().merge_meta(vec![(Form::kw("declared"), Form::bool(true))]);
            Ok(Form::list(vec![Form::sym("def"), declared]))
        })
        .collect::<Result<Vec<_>, AnalysisError>>()?;
    Ok(match <[Form; 1]>::try_from(defs) {
        Ok([single]) => single,
        Err(defs) => with_head("do", &defs),
    })
}

fn expand_comment(_: &Form, _: &Env, _: &[Form]) -> Result<Form, AnalysisError> {
    Ok(Form::nil())
}
