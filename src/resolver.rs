use crate::ast::{Env, LocalBinding};
use crate::form::Symbol;
use crate::namespace::{NamespaceTable, VarDefinition, CORE_ALIAS, CORE_NS};
use crate::reader::READER_NS_PLACEHOLDER;

/// Outcome of resolving a symbol.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// `js/...` host reference. Malformed when the name contains a `.`.
    Js { name: Symbol, malformed: bool },
    Local(LocalBinding),
    Var(ResolvedVar),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedVar {
    pub name: Symbol,
    pub ns: Option<String>,
    pub def: Option<VarDefinition>,
}

/// Called with `(env, namespace, name)` before a namespace-level lookup.
pub type Confirm<'c> = &'c mut dyn FnMut(&Env, &str, &str);

/// Resolves symbols against locals and a namespace table.
pub struct Resolver<'t> {
    table: &'t NamespaceTable,
}

impl<'t> Resolver<'t> {
    pub fn new(table: &'t NamespaceTable) -> Self {
        Self { table }
    }

    /// Expands a namespace alias of the current namespace. Unknown aliases are
    /// taken to be full namespace names.
    pub fn resolve_ns_alias(&self, env: &Env, ns: &str) -> String {
        if ns == CORE_ALIAS {
            return CORE_NS.to_string();
        }
        if ns == READER_NS_PLACEHOLDER {
            return env.ns.clone();
        }
        self.table
            .get(&env.ns)
            .and_then(|entry| entry.requires.get(ns))
            .cloned()
            .unwrap_or_else(|| ns.to_string())
    }

    pub fn resolve(&self, env: &Env, sym: &Symbol, mut confirm: Option<Confirm<'_>>) -> Resolved {
        if sym.ns.as_deref() == Some("js") {
            return Resolved::Js {
                name: sym.clone(),
                malformed: sym.name.contains('.'),
            };
        }
        if sym.ns.is_none() {
            if let Some(local) = env.local(&sym.name) {
                return Resolved::Local(local.clone());
            }
        }
        let current = self.table.get(&env.ns);

        if let Some(ns) = &sym.ns {
            let full = self.resolve_ns_alias(env, ns);
            return self.var_in(env, &full, &sym.name, confirm.as_deref_mut());
        }

        let name = sym.name.as_str();
        if let Some(idx) = name.find('.').filter(|idx| *idx > 0 && *idx + 1 < name.len()) {
            let (prefix, suffix) = (&name[..idx], &name[idx + 1..]);
            if let Some(local) = env.local(prefix) {
                return Resolved::Var(ResolvedVar {
                    name: Symbol::simple(format!("{}.{suffix}", local.name.name)),
                    ns: None,
                    def: None,
                });
            }
            return self.var_in(env, prefix, suffix, confirm.as_deref_mut());
        }

        if let Some(target) = current.and_then(|entry| entry.uses.get(name)) {
            return self.var_in(env, target, name, None);
        }

        if let Some(full) = current.and_then(|entry| entry.imports.get(name)) {
            return self.resolve(env, full, confirm);
        }

        if self.table.core_name(name, &env.ns) {
            return self.var_in(env, CORE_NS, name, None);
        }
        self.var_in(env, &env.ns, name, confirm.as_deref_mut())
    }

    /// Resolves `sym`, reporting references to undeclared vars through `warn`.
    /// Resolution always completes.
    pub fn resolve_existing(
        &self,
        env: &Env,
        sym: &Symbol,
        warn: &mut dyn FnMut(&Env, &Symbol),
    ) -> Resolved {
        let mut check = |env: &Env, ns: &str, name: &str| {
            if !self.confirm_var_exists(env, ns, name) {
                warn(env, &Symbol::qualified(ns, name));
            }
        };
        let confirm: Confirm<'_> = &mut check;
        self.resolve(env, sym, Some(confirm))
    }

    /// False when `ns` is the current namespace, or one the table knows, and
    /// it has no def named `name`.
    pub fn confirm_var_exists(&self, env: &Env, ns: &str, name: &str) -> bool {
        if ns != env.ns && !self.table.contains(ns) {
            return true;
        }
        self.table.lookup_def(ns, name).is_some()
    }

    fn var_in(
        &self,
        env: &Env,
        ns: &str,
        name: &str,
        confirm: Option<&mut (dyn FnMut(&Env, &str, &str) + '_)>,
    ) -> Resolved {
        if let Some(confirm) = confirm {
            confirm(env, ns, name);
        }
        Resolved::Var(ResolvedVar {
            name: Symbol::qualified(ns, name),
            ns: Some(ns.to_string()),
            def: self.table.lookup_def(ns, name).cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::USER_NS;

    #[test]
    fn test_alias_expansion() {
        let mut table = NamespaceTable::new();
        table
            .ensure(USER_NS)
            .requires
            .insert("s".into(), "cinder.string".into());
        let resolver = Resolver::new(&table);
        let env = Env::new(USER_NS);
        assert_eq!(resolver.resolve_ns_alias(&env, "s"), "cinder.string");
        assert_eq!(resolver.resolve_ns_alias(&env, "clojure.core"), CORE_NS);
        assert_eq!(resolver.resolve_ns_alias(&env, "other"), "other");
    }

    #[test]
    fn test_confirm_skips_unknown_namespaces() {
        let table = NamespaceTable::new();
        let resolver = Resolver::new(&table);
        let env = Env::new(USER_NS);
        assert!(resolver.confirm_var_exists(&env, "not.loaded", "x"));
        assert!(!resolver.confirm_var_exists(&env, USER_NS, "x"));
        assert!(resolver.confirm_var_exists(&env, CORE_NS, "when"));
    }
}
