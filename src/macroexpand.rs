use crate::ast::Env;
use crate::error::AnalysisError;
use crate::form::{Form, Symbol};
use crate::namespace::{MacroFn, NamespaceTable, CORE_ALIAS, CORE_NS};
use crate::syntax_quote::POSITION_KEYS;
use log::trace;

/// Operators analyzed directly by the analyzer. They are never macros.
pub const SPECIALS: &[&str] = &[
    "if", "def", "fn*", "do", "let*", "loop*", "letfn*", "throw", "try*", "recur", "new", "set!",
    "ns", "deftype*", "defrecord*", ".", "js*", "&", "quote", "case*", "extend",
];

pub fn is_special(name: &str) -> bool {
    SPECIALS.contains(&name)
}

/// Result of one expansion step.
#[derive(Debug, Clone, PartialEq)]
pub enum Expansion {
    Unchanged,
    Expanded(Form),
}

/// Finds the native macro `sym` names in `env`, if any.
pub fn get_expander(table: &NamespaceTable, env: &Env, sym: &Symbol) -> Option<MacroFn> {
    let current = table.get(&env.ns);
    match &sym.ns {
        Some(ns) => {
            let target = if ns == CORE_ALIAS || ns == CORE_NS {
                CORE_NS.to_string()
            } else if table.contains(ns) {
                ns.clone()
            } else {
                let entry = current?;
                entry
                    .requires_macros
                    .get(ns)
                    .or_else(|| entry.requires.get(ns))?
                    .clone()
            };
            table.find_macro(&target, &sym.name)
        }
        None => {
            let name = sym.name.as_str();
            if env.local(name).is_some() {
                return None;
            }
            if let Some(target) = current.and_then(|entry| entry.use_macros.get(name)) {
                return table.find_macro(target, name);
            }
            if current.is_some_and(|entry| entry.excludes.contains(name)) {
                return None;
            }
            table
                .find_macro(&env.ns, name)
                .or_else(|| table.find_macro(CORE_NS, name))
        }
    }
}

fn position_meta(form: &Form) -> Vec<(Form, Form)> {
    POSITION_KEYS
        .iter()
        .filter_map(|key| form.meta_get(key).map(|v| (Form::kw(key), v.clone())))
        .collect()
}

/// Expands `form` once.
pub fn macroexpand_1(table: &NamespaceTable, env: &Env, form: &Form) -> Result<Expansion, AnalysisError> {
    let Some(items) = form.as_list() else {
        return Ok(Expansion::Unchanged);
    };
    let Some(op) = items.first().and_then(Form::as_symbol) else {
        return Ok(Expansion::Unchanged);
    };
    if op.is_simple() && is_special(&op.name) {
        return Ok(Expansion::Unchanged);
    }
    if let Some(expander) = get_expander(table, env, op) {
        let expanded = expander(form, env, &items[1..])?;
        trace!("macroexpand {op}: {form} => {expanded}");
        let expanded = if expanded.supports_meta() && expanded.meta_get("line").is_none() {
            expanded.merge_meta(position_meta(form))
        } else {
            expanded
        };
        return Ok(Expansion::Expanded(expanded));
    }

    let name = op.name.as_str();
    if op.is_simple() && name.len() > 1 && name.starts_with('.') && items.len() >= 2 {
        let mut rewritten = vec![Form::sym("."), items[1].clone(), Form::sym(&name[1..])];
        rewritten.extend_from_slice(&items[2..]);
        return Ok(Expansion::Expanded(
            Form::list(rewritten).with_meta(form.meta_rc().cloned()),
        ));
    }
    if name.len() > 1 && name.ends_with('.') {
        let ctor = Symbol {
            ns: op.ns.clone(),
            name: name[..name.len() - 1].to_string(),
        };
        let mut rewritten = vec![Form::sym("new"), Form::symbol(ctor)];
        rewritten.extend_from_slice(&items[1..]);
        return Ok(Expansion::Expanded(
            Form::list(rewritten).with_meta(form.meta_rc().cloned()),
        ));
    }
    Ok(Expansion::Unchanged)
}

/// Expands `form` until it no longer changes. More than `max_depth` steps is
/// an error.
pub fn macroexpand(
    table: &NamespaceTable,
    env: &Env,
    form: &Form,
    max_depth: usize,
) -> Result<Form, AnalysisError> {
    let mut current = form.clone();
    for _ in 0..max_depth {
        match macroexpand_1(table, env, &current)? {
            Expansion::Unchanged => return Ok(current),
            Expansion::Expanded(next) => current = next,
        }
    }
    Err(AnalysisError::invalid(format!(
        "Macro expansion of {form} did not finish after {max_depth} steps"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::USER_NS;
    use crate::reader::read_string;
    use std::rc::Rc;

    fn expand_1(source: &str) -> Expansion {
        let table = NamespaceTable::new();
        macroexpand_1(&table, &Env::new(USER_NS), &read_string(source).unwrap()).unwrap()
    }

    #[test]
    fn test_specials_are_not_expanded() {
        assert_eq!(expand_1("(if a b c)"), Expansion::Unchanged);
        assert_eq!(expand_1("(foo 1)"), Expansion::Unchanged);
        assert_eq!(expand_1("[when 1]"), Expansion::Unchanged);
    }

    #[test]
    fn test_dot_and_new_sugar() {
        assert_eq!(
            expand_1("(.push arr 1)"),
            Expansion::Expanded(read_string("(. arr push 1)").unwrap())
        );
        assert_eq!(
            expand_1("(js/Date. 2020 1)"),
            Expansion::Expanded(read_string("(new js/Date 2020 1)").unwrap())
        );
    }

    #[test]
    fn test_locals_hide_macros() {
        let table = NamespaceTable::new();
        let env = Env::new(USER_NS).with_local(crate::ast::LocalBinding {
            name: Symbol::simple("when"),
            local: true,
            ..Default::default()
        });
        assert!(get_expander(&table, &env, &Symbol::simple("when")).is_none());
        assert!(get_expander(&table, &Env::new(USER_NS), &Symbol::simple("when")).is_some());
        assert!(get_expander(&table, &env, &Symbol::qualified("clojure.core", "when")).is_some());
    }

    #[test]
    fn test_runaway_expansion_is_reported() {
        let mut table = NamespaceTable::new();
        let looping: MacroFn = Rc::new(|form: &Form, _: &Env, _: &[Form]| Ok(form.clone()));
        table.register_macro(USER_NS, "forever", looping);
        let err = macroexpand(&table, &Env::new(USER_NS), &read_string("(forever)").unwrap(), 10)
            .unwrap_err();
        assert!(err.message().contains("did not finish"));
    }
}
