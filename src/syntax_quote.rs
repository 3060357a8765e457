//! Expansion of syntax-quoted templates into the code that rebuilds them.

use crate::form::{Form, FormKind, Symbol};
use crate::macroexpand::is_special;
use crate::namespace::CORE_NS;
use crate::reader::ReaderNamespace;
use crate::utils::next_id;
use std::collections::HashMap;

/// Keys the reader attaches for positions. They are not user metadata.
pub(crate) const POSITION_KEYS: [&str; 3] = ["line", "column", "file"];

fn core(name: &str) -> Form {
    Form::symbol(Symbol::qualified(CORE_NS, name))
}

fn call(head: &str, args: Vec<Form>) -> Form {
    let mut items = Vec::with_capacity(args.len() + 1);
    items.push(core(head));
    items.extend(args);
    Form::list(items)
}

fn quoted(form: Form) -> Form {
    Form::list(vec![Form::sym("quote"), form])
}

/// Returns the argument of `(head x)`.
fn unquoted<'a>(form: &'a Form, head: &str) -> Option<&'a Form> {
    match form.as_list()? {
        [op, arg] if op.as_symbol().is_some_and(|s| s.is_simple() && s.is(head)) => Some(arg),
        _ => None,
    }
}

/// Expands `form` as the body of a syntax-quote.
///
/// `gensyms` maps each `name#` seen during this expansion to its generated
/// symbol, so repeated occurrences agree. Callers pass a fresh map per
/// syntax-quote.
pub fn expand(
    form: &Form,
    ns: &ReaderNamespace,
    gensyms: &mut HashMap<String, Symbol>,
) -> Result<Form, String> {
    if let Some(arg) = unquoted(form, "unquote") {
        return Ok(arg.clone());
    }
    if unquoted(form, "unquote-splicing").is_some() {
        return Err("splice not in list".to_string());
    }
    let expanded = match &form.kind {
        FormKind::Symbol(sym) => quoted(Form::symbol(resolve_symbol(sym, ns, gensyms))),
        FormKind::List(items) if items.is_empty() => call("list", vec![]),
        FormKind::List(items) => call("seq", vec![call("concat", expand_items(items, ns, gensyms)?)]),
        FormKind::Vector(items) => call(
            "apply",
            vec![
                core("vector"),
                call("seq", vec![call("concat", expand_items(items, ns, gensyms)?)]),
            ],
        ),
        FormKind::Set(items) => call(
            "apply",
            vec![
                core("hash-set"),
                call("seq", vec![call("concat", expand_items(items, ns, gensyms)?)]),
            ],
        ),
        FormKind::Map(entries) => {
            let flat: Vec<Form> = entries
                .iter()
                .flat_map(|(k, v)| [k.clone(), v.clone()])
                .collect();
            call(
                "apply",
                vec![
                    core("hash-map"),
                    call("seq", vec![call("concat", expand_items(&flat, ns, gensyms)?)]),
                ],
            )
        }
        FormKind::Tagged { .. } => quoted(form.clone()),
        _ => return Ok(form.clone()),
    };
    let user_meta: Vec<(Form, Form)> = form
        .meta()
        .unwrap_or_default()
        .iter()
        .filter(|(k, _)| {
            !k.as_keyword()
                .is_some_and(|kw| kw.ns.is_none() && POSITION_KEYS.contains(&kw.name.as_str()))
        })
        .cloned()
        .collect();
    if user_meta.is_empty() {
        return Ok(expanded);
    }
    let meta = expand(&Form::map(user_meta), ns, gensyms)?;
    Ok(call("with-meta", vec![expanded, meta]))
}

fn expand_items(
    items: &[Form],
    ns: &ReaderNamespace,
    gensyms: &mut HashMap<String, Symbol>,
) -> Result<Vec<Form>, String> {
    items
        .iter()
        .map(|item| {
            if let Some(arg) = unquoted(item, "unquote") {
                Ok(call("list", vec![arg.clone()]))
            } else if let Some(arg) = unquoted(item, "unquote-splicing") {
                Ok(arg.clone())
            } else {
                Ok(call("list", vec![expand(item, ns, gensyms)?]))
            }
        })
        .collect()
}

fn resolve_symbol(sym: &Symbol, ns: &ReaderNamespace, gensyms: &mut HashMap<String, Symbol>) -> Symbol {
    if let Some(prefix) = &sym.ns {
        if prefix == "js" {
            return sym.clone();
        }
        return match ns.aliases.get(prefix) {
            Some(target) => Symbol::qualified(target.clone(), sym.name.clone()),
            None => sym.clone(),
        };
    }
    let name = sym.name.as_str();
    if is_special(name) || name == "&" || name.starts_with('.') {
        return sym.clone();
    }
    if let Some(base) = name.strip_suffix('#') {
        return gensyms
            .entry(name.to_string())
            .or_insert_with(|| Symbol::simple(format!("{base}__{}__auto__", next_id())))
            .clone();
    }
    if let Some(ctor) = name.strip_suffix('.') {
        let resolved = resolve_symbol(&Symbol::simple(ctor), ns, gensyms);
        return Symbol {
            ns: resolved.ns,
            name: format!("{}.", resolved.name),
        };
    }
    match ns.referred.get(name) {
        Some(target) => Symbol::qualified(target.clone(), name),
        None => Symbol::qualified(ns.name.clone(), name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_ns(name: &str) -> ReaderNamespace {
        ReaderNamespace::new(name)
    }

    #[test]
    fn test_symbol_resolution_order() {
        let mut ns = in_ns("app.core");
        ns.aliases.insert("str".into(), "cinder.string".into());
        ns.referred.insert("map".into(), "cinder.core".into());
        let mut gensyms = HashMap::new();
        let cases = [
            (Symbol::qualified("str", "join"), Symbol::qualified("cinder.string", "join")),
            (Symbol::simple("map"), Symbol::qualified("cinder.core", "map")),
            (Symbol::simple("helper"), Symbol::qualified("app.core", "helper")),
            (Symbol::simple("if"), Symbol::simple("if")),
            (Symbol::simple(".push"), Symbol::simple(".push")),
            (Symbol::qualified("js", "console"), Symbol::qualified("js", "console")),
            (Symbol::simple("Point."), Symbol::qualified("app.core", "Point.")),
        ];
        for (input, expected) in cases {
            assert_eq!(resolve_symbol(&input, &ns, &mut gensyms), expected);
        }
    }

    #[test]
    fn test_gensyms_are_shared_within_one_expansion() {
        let ns = in_ns("n");
        let mut gensyms = HashMap::new();
        let a = resolve_symbol(&Symbol::simple("x#"), &ns, &mut gensyms);
        let b = resolve_symbol(&Symbol::simple("x#"), &ns, &mut gensyms);
        assert_eq!(a, b);
        assert!(a.name.starts_with("x__") && a.name.ends_with("__auto__"));
        let c = resolve_symbol(&Symbol::simple("x#"), &ns, &mut HashMap::new());
        assert_ne!(a, c);
    }

    #[test]
    fn test_top_level_splice_is_rejected() {
        let form = Form::list(vec![Form::sym("unquote-splicing"), Form::sym("xs")]);
        assert_eq!(
            expand(&form, &in_ns("n"), &mut HashMap::new()).unwrap_err(),
            "splice not in list"
        );
    }

    #[test]
    fn test_self_evaluating_forms_pass_through() {
        let mut gensyms = HashMap::new();
        for form in [Form::kw("k"), Form::int(3), Form::string("s"), Form::nil()] {
            assert_eq!(expand(&form, &in_ns("n"), &mut gensyms).unwrap(), form);
        }
    }
}
