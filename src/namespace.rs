use crate::ast::Env;
use crate::core_macros;
use crate::error::AnalysisError;
use crate::form::{Form, Symbol};
use crate::reader::ReaderNamespace;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;

pub const CORE_NS: &str = "cinder.core";
pub const USER_NS: &str = "cinder.user";
/// Namespace prefix accepted as a synonym for `cinder.core`.
pub const CORE_ALIAS: &str = "clojure.core";

/// A native macro expander, called as `(form, env, args)`.
pub type MacroFn = Rc<dyn Fn(&Form, &Env, &[Form]) -> Result<Form, AnalysisError>>;

/// Compile-time description of one namespace-level binding.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VarDefinition {
    pub name: Symbol,
    pub doc: Option<String>,
    pub dynamic: bool,
    #[serde(rename = "macro")]
    pub macro_flag: bool,
    #[serde(rename = "type")]
    pub is_type: bool,
    pub record: bool,
    pub fn_var: bool,
    pub variadic: bool,
    pub max_fixed_arity: Option<usize>,
    pub method_params: Vec<Vec<Symbol>>,
    pub num_fields: Option<usize>,
    pub protocols: BTreeSet<String>,
    pub protocol: Option<String>,
    pub deprecated: bool,
    pub declared: bool,
    pub export: Option<String>,
    pub tag: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl VarDefinition {
    pub fn named(name: Symbol) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }
}

/// Which alias set an alias is tracked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasKind {
    Fns,
    Macros,
}

/// Aliases bound by `ns` clauses, tracked to warn when one is rebound.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AliasRegistry {
    pub fns: BTreeMap<String, String>,
    pub macros: BTreeMap<String, String>,
}

#[derive(Clone, Default)]
struct MacroTable(HashMap<String, MacroFn>);

impl fmt::Debug for MacroTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.0.keys().collect();
        names.sort();
        f.debug_list().entries(names).finish()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NamespaceEntry {
    pub name: String,
    pub doc: Option<String>,
    pub excludes: BTreeSet<String>,
    /// referred symbol -> namespace
    pub uses: BTreeMap<String, String>,
    /// alias -> namespace
    pub requires: BTreeMap<String, String>,
    pub requires_macros: BTreeMap<String, String>,
    pub use_macros: BTreeMap<String, String>,
    /// imported constructor -> fully qualified symbol
    pub imports: BTreeMap<String, Symbol>,
    pub defs: BTreeMap<String, VarDefinition>,
    pub deps: Option<BTreeSet<String>>,
    pub aliases: Option<AliasRegistry>,
    #[serde(skip)]
    macros: MacroTable,
}

impl NamespaceEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Registry of every namespace known to a compilation.
#[derive(Debug, Clone)]
pub struct NamespaceTable {
    namespaces: BTreeMap<String, NamespaceEntry>,
    /// protocol method -> implementing types
    proto_implementers: BTreeMap<String, BTreeSet<String>>,
}

impl Default for NamespaceTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceTable {
    /// A table holding `cinder.core`, with its bootstrap macros, and `cinder.user`.
    pub fn new() -> Self {
        let mut table = Self {
            namespaces: BTreeMap::new(),
            proto_implementers: BTreeMap::new(),
        };
        table.reset();
        table
    }

    /// Drops everything and re-seeds the bootstrap namespaces.
    pub fn reset(&mut self) {
        self.namespaces.clear();
        self.proto_implementers.clear();
        self.namespaces
            .insert(CORE_NS.to_string(), NamespaceEntry::new(CORE_NS));
        self.namespaces
            .insert(USER_NS.to_string(), NamespaceEntry::new(USER_NS));
        core_macros::install(self);
    }

    pub fn get(&self, name: &str) -> Option<&NamespaceEntry> {
        self.namespaces.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut NamespaceEntry> {
        self.namespaces.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.namespaces.contains_key(name)
    }

    /// Returns the entry for `name`, creating it on first reference.
    pub fn ensure(&mut self, name: &str) -> &mut NamespaceEntry {
        self.namespaces
            .entry(name.to_string())
            .or_insert_with(|| NamespaceEntry::new(name))
    }

    pub fn lookup_def(&self, ns: &str, name: &str) -> Option<&VarDefinition> {
        self.get(ns)?.defs.get(name)
    }

    /// Whether `name` is a def of the core namespace that `current_ns` has not excluded.
    pub fn core_name(&self, name: &str, current_ns: &str) -> bool {
        let excluded = self
            .get(current_ns)
            .is_some_and(|entry| entry.excludes.contains(name));
        !excluded && self.lookup_def(CORE_NS, name).is_some()
    }

    /// Installs a native expander together with a macro-flagged definition.
    pub fn register_macro(&mut self, ns: &str, name: &str, expander: MacroFn) {
        let entry = self.ensure(ns);
        entry.macros.0.insert(name.to_string(), expander);
        let def = entry
            .defs
            .entry(name.to_string())
            .or_insert_with(|| VarDefinition::named(Symbol::qualified(ns, name)));
        def.macro_flag = true;
    }

    /// Finds a native expander whose definition is still flagged as a macro.
    pub fn find_macro(&self, ns: &str, name: &str) -> Option<MacroFn> {
        let entry = self.get(ns)?;
        if !entry.defs.get(name).is_some_and(|def| def.macro_flag) {
            return None;
        }
        entry.macros.0.get(name).cloned()
    }

    pub fn proto_implementers(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.proto_implementers
    }

    pub fn implementers_of(&self, method: &str) -> Option<&BTreeSet<String>> {
        self.proto_implementers.get(method)
    }

    pub fn record_proto_implementer(&mut self, method: String, type_name: String) {
        self.proto_implementers
            .entry(method)
            .or_default()
            .insert(type_name);
    }

    pub fn add_dependency(&mut self, ns: &str, dep: &str) {
        self.ensure(ns)
            .deps
            .get_or_insert_with(BTreeSet::new)
            .insert(dep.to_string());
    }

    /// Binds `alias` to `target`. Returns true when the alias was already bound
    /// to a different namespace.
    pub fn register_alias(&mut self, ns: &str, kind: AliasKind, alias: &str, target: &str) -> bool {
        let registry = self.ensure(ns).aliases.get_or_insert_with(AliasRegistry::default);
        let set = match kind {
            AliasKind::Fns => &mut registry.fns,
            AliasKind::Macros => &mut registry.macros,
        };
        match set.insert(alias.to_string(), target.to_string()) {
            Some(previous) => previous != target,
            None => false,
        }
    }

    /// The namespace context the reader needs to read source in `ns`.
    pub fn reader_context(&self, ns: &str) -> ReaderNamespace {
        let mut context = ReaderNamespace::new(ns);
        let entry = self.get(ns);
        let excludes = entry.map(|e| &e.excludes);
        if let Some(core) = self.get(CORE_NS) {
            for name in core.defs.keys() {
                if !excludes.is_some_and(|ex| ex.contains(name)) {
                    context.referred.insert(name.clone(), CORE_NS.to_string());
                }
            }
        }
        if let Some(entry) = entry {
            for (alias, target) in entry.requires_macros.iter().chain(&entry.requires) {
                context.aliases.insert(alias.clone(), target.clone());
            }
            for (name, target) in entry.uses.iter().chain(&entry.use_macros) {
                context.referred.insert(name.clone(), target.clone());
            }
        }
        context
    }
}
