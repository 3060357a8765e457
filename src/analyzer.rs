use crate::ast::{
    Binding, CaseClause, Context, DotKind, Env, FnMethod, JsCode, LocalBinding, Node, NsClauses, Op,
    ProtocolImpl, VarRef, Warning, WarningKind,
};
use crate::error::{ensure, AnalysisError, CinderError};
use crate::form::{Form, FormKind, Keyword, Symbol};
use crate::macroexpand::{is_special, macroexpand};
use crate::namespace::{AliasKind, NamespaceTable, VarDefinition, CORE_NS, USER_NS};
use crate::reader::{Reader, READER_NS_PLACEHOLDER};
use crate::resolver::{Resolved, Resolver};
use crate::stream::{LineNumberingPushbackStream, PushbackStream};
use crate::syntax_quote::POSITION_KEYS;
use crate::tags::TagRegistry;
use crate::utils::is_earmuffed;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Meta key on a `fn*` form listing the type fields closed over by its body.
pub const FIELDS_KEY: &str = "cinder.analyzer/fields";

/// Types `extend` treats as host primitives.
pub const PRIMITIVE_TYPES: &[&str] = &[
    "nil", "object", "string", "number", "array", "function", "boolean", "default",
];

/// Analyzer settings. Missing fields take their defaults when loaded from
/// JSON or YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerOptions {
    pub warn_on_undeclared: bool,
    pub warn_on_redef: bool,
    pub warn_on_fn_var: bool,
    pub warn_on_dynamic: bool,
    pub warn_on_arity: bool,
    pub warn_on_deprecated: bool,
    pub unchecked_if: bool,
    pub max_macroexpand_depth: usize,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            warn_on_undeclared: true,
            warn_on_redef: true,
            warn_on_fn_var: true,
            warn_on_dynamic: true,
            warn_on_arity: true,
            warn_on_deprecated: true,
            unchecked_if: false,
            max_macroexpand_depth: 1000,
        }
    }
}

impl AnalyzerOptions {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }
}

/// Source text found for a namespace.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSource {
    pub name: String,
    pub text: String,
}

/// Finds the source of namespaces required by `ns` forms.
pub trait NamespaceLoader {
    /// `Ok(None)` when no source exists for `ns`.
    fn load(&mut self, ns: &str) -> Result<Option<LoadedSource>, AnalysisError>;
}

impl<L: NamespaceLoader + ?Sized> NamespaceLoader for &mut L {
    fn load(&mut self, ns: &str) -> Result<Option<LoadedSource>, AnalysisError> {
        (**self).load(ns)
    }
}

/// Loader that never finds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLoader;

impl NamespaceLoader for NoopLoader {
    fn load(&mut self, _ns: &str) -> Result<Option<LoadedSource>, AnalysisError> {
        Ok(None)
    }
}

/// Looks namespaces up as files under a list of source roots. `a.b-c` maps to
/// `a/b_c.<extension>`.
#[derive(Debug, Clone)]
pub struct SourceRootsLoader {
    roots: Vec<PathBuf>,
    extension: String,
}

impl SourceRootsLoader {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            extension: "cin".to_string(),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn relative_path(&self, ns: &str) -> PathBuf {
        let mut path: PathBuf = ns.replace('-', "_").split('.').collect();
        path.set_extension(&self.extension);
        path
    }
}

impl NamespaceLoader for SourceRootsLoader {
    fn load(&mut self, ns: &str) -> Result<Option<LoadedSource>, AnalysisError> {
        let relative = self.relative_path(ns);
        for root in &self.roots {
            let path = root.join(&relative);
            if path.is_file() {
                let text = std::fs::read_to_string(&path).map_err(|err| {
                    AnalysisError::invalid(format!("Could not read {}: {err}", path.display()))
                })?;
                return Ok(Some(LoadedSource {
                    name: path.to_string_lossy().to_string(),
                    text,
                }));
            }
        }
        Ok(None)
    }
}

#[derive(Debug, Clone)]
struct RecurFrame {
    params: Vec<LocalBinding>,
    used: bool,
}

struct FnSignature {
    name: String,
    variadic: bool,
    max_fixed_arity: Option<usize>,
    deprecated: bool,
    tag: Option<String>,
}

/// Turns forms into [`Node`]s, updating the namespace table as definitions
/// are analyzed.
pub struct Analyzer<'t> {
    table: &'t mut NamespaceTable,
    loader: Box<dyn NamespaceLoader + 't>,
    /// Tag parsers used when reading dependency sources.
    tags: TagRegistry,
    options: AnalyzerOptions,
    current_ns: String,
    current_file: Option<String>,
    /// `None` marks a position where `recur` is not allowed.
    frames: Vec<Option<RecurFrame>>,
    /// Bindings of enclosing loops. `None` marks a fn boundary.
    loop_lets: Vec<Option<Vec<LocalBinding>>>,
    unchecked_if: bool,
    bindings: Vec<LocalBinding>,
    loading: Vec<String>,
    warnings: Vec<Warning>,
}

fn wrapping_errors<T>(env: &Env, result: Result<T, AnalysisError>) -> Result<T, AnalysisError> {
    result.map_err(|err| match err {
        AnalysisError::Invalid { message } => AnalysisError::Located {
            message,
            file: env.file.clone(),
            line: env.line,
            column: env.column,
            cause: None,
        },
        located => located,
    })
}

fn simple_symbol<'f>(form: &'f Form, message: impl FnOnce() -> String) -> Result<&'f Symbol, AnalysisError> {
    match form.as_symbol() {
        Some(sym) if sym.is_simple() => Ok(sym),
        _ => Err(AnalysisError::invalid(message())),
    }
}

fn meta_string(form: &Form, key: &str) -> Option<String> {
    match &form.meta_get(key)?.kind {
        FormKind::Str(s) => Some(s.clone()),
        FormKind::Symbol(sym) => Some(sym.to_string()),
        _ => None,
    }
}

fn user_meta(form: &Form) -> Vec<(Form, Form)> {
    form.meta()
        .unwrap_or_default()
        .iter()
        .filter(|(k, _)| {
            !k.as_keyword()
                .is_some_and(|kw| kw.ns.is_none() && POSITION_KEYS.contains(&kw.name.as_str()))
        })
        .cloned()
        .collect()
}

/// `(variadic, fixed arity, params)` of a fn node.
fn fn_info(node: &Node) -> Option<(bool, usize, Vec<Symbol>)> {
    match &node.op {
        Op::Fn { method, .. } => Some((
            method.variadic,
            method.fixed_arity,
            method.params.iter().map(|p| p.name.clone()).collect(),
        )),
        _ => None,
    }
}

fn symbols_in(form: &Form, message: &str) -> Result<Vec<Symbol>, AnalysisError> {
    let items = form
        .as_sequential()
        .ok_or_else(|| AnalysisError::invalid(message))?;
    items
        .iter()
        .map(|item| {
            item.as_symbol()
                .cloned()
                .ok_or_else(|| AnalysisError::invalid(message))
        })
        .collect()
}

impl<'t> Analyzer<'t> {
    pub fn new(table: &'t mut NamespaceTable) -> Self {
        Self {
            table,
            loader: Box::new(NoopLoader),
            tags: TagRegistry::with_builtins(),
            options: AnalyzerOptions::default(),
            current_ns: USER_NS.to_string(),
            current_file: None,
            frames: Vec::new(),
            loop_lets: Vec::new(),
            unchecked_if: false,
            bindings: Vec::new(),
            loading: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn with_loader(mut self, loader: Box<dyn NamespaceLoader + 't>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_tags(mut self, tags: TagRegistry) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_options(mut self, options: AnalyzerOptions) -> Self {
        self.unchecked_if = options.unchecked_if;
        self.options = options;
        self
    }

    pub fn table(&self) -> &NamespaceTable {
        &*self.table
    }

    pub fn options(&self) -> &AnalyzerOptions {
        &self.options
    }

    pub fn current_ns(&self) -> &str {
        &self.current_ns
    }

    pub fn set_current_ns(&mut self, ns: impl Into<String>) {
        self.current_ns = ns.into();
    }

    pub fn unchecked_if(&self) -> bool {
        self.unchecked_if
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    /// Looks up a binding by arena index, e.g. to follow a `shadow` link.
    pub fn binding(&self, id: usize) -> Option<&LocalBinding> {
        self.bindings.get(id)
    }

    /// A top-level environment in the current namespace.
    pub fn empty_env(&self) -> Env {
        let mut env = Env::new(self.current_ns.clone());
        env.file = self.current_file.clone();
        env
    }

    /// Analyzes a top-level form.
    pub fn analyze_top_level(&mut self, form: &Form) -> Result<Node, AnalysisError> {
        let env = self.empty_env();
        self.analyze(&env, form, None)
    }

    /// Analyzes `form` in `env`. `name` is the var or local the form
    /// initializes, if any.
    pub fn analyze(&mut self, env: &Env, form: &Form, name: Option<&str>) -> Result<Node, AnalysisError> {
        let env = env.located_at(form);
        let result = match &form.kind {
            FormKind::Symbol(sym) => self.analyze_symbol(&env, form, sym, true),
            FormKind::List(items) if !items.is_empty() => self.analyze_seq(&env, form, name),
            FormKind::Map(entries) => self.analyze_map(&env, form, entries),
            FormKind::Vector(items) => self.analyze_items(&env, form, items, false),
            FormKind::Set(items) => self.analyze_items(&env, form, items, true),
            FormKind::Keyword(kw) => Ok(self.analyze_keyword(&env, form, kw)),
            _ => Ok(constant(&env, form)),
        };
        wrapping_errors(&env, result)
    }

    /// Reads and analyzes every form of `text`.
    pub fn analyze_source(&mut self, text: &str, name: Option<&str>) -> Result<Vec<Node>, CinderError> {
        let stream = LineNumberingPushbackStream::new(Cursor::new(text.as_bytes()));
        let mut stream = match name {
            Some(name) => stream.with_name(name),
            None => stream,
        };
        let mut reader = Reader::with_tags(self.tags.clone());
        self.analyze_stream(&mut reader, &mut stream)
    }

    /// Reads forms from `stream` until it ends, analyzing each one. The
    /// reader's namespace context follows `ns` forms as they are analyzed.
    /// Dependencies loaded on the way are read with the same tag parsers.
    pub fn analyze_stream(
        &mut self,
        reader: &mut Reader,
        stream: &mut dyn PushbackStream,
    ) -> Result<Vec<Node>, CinderError> {
        let saved_file = std::mem::replace(
            &mut self.current_file,
            stream.source_name().map(str::to_string),
        );
        let saved_tags = std::mem::replace(&mut self.tags, reader.tags().clone());
        let result = self.analyze_stream_forms(reader, stream);
        self.current_file = saved_file;
        self.tags = saved_tags;
        result
    }

    fn analyze_stream_forms(
        &mut self,
        reader: &mut Reader,
        stream: &mut dyn PushbackStream,
    ) -> Result<Vec<Node>, CinderError> {
        let mut nodes = Vec::new();
        loop {
            reader.set_namespace(self.table.reader_context(&self.current_ns));
            let Some(form) = reader.read_form(stream)? else {
                return Ok(nodes);
            };
            nodes.push(self.analyze_top_level(&form)?);
        }
    }

    /// Loads and analyzes every namespace in `deps` that the table does not
    /// know yet. A dependency that is still being loaded is a cycle.
    pub fn analyze_deps(&mut self, deps: &[String]) -> Result<(), AnalysisError> {
        for dep in deps {
            if self.loading.contains(dep) {
                return Err(AnalysisError::invalid(format!(
                    "Circular dependency detected: {} -> {dep}",
                    self.loading.join(" -> ")
                )));
            }
            if self.table.contains(dep) {
                continue;
            }
            let Some(source) = self.loader.load(dep)? else {
                debug!("no source found for namespace {dep}");
                continue;
            };
            debug!("loading namespace {dep} from {}", source.name);
            let saved_ns = std::mem::replace(&mut self.current_ns, USER_NS.to_string());
            let saved_unchecked = self.unchecked_if;
            let result = self.analyze_source(&source.text, Some(&source.name));
            self.current_ns = saved_ns;
            self.unchecked_if = saved_unchecked;
            match result {
                Ok(_) if !self.table.contains(dep) => {
                    warn!("{} does not define namespace {dep}", source.name);
                    self.table.ensure(dep);
                }
                Ok(_) => {}
                Err(CinderError::Analysis(err)) => return Err(err),
                Err(CinderError::Reader(err)) => {
                    let pos = err.position();
                    return Err(AnalysisError::Located {
                        message: format!("Could not read namespace {dep}: {err}"),
                        file: Some(source.name),
                        line: pos.line,
                        column: pos.column,
                        cause: Some(Box::new(CinderError::Reader(err))),
                    });
                }
            }
        }
        Ok(())
    }

    fn warn(&mut self, env: &Env, kind: WarningKind, message: String) {
        let warning = Warning {
            kind,
            message,
            file: env.file.clone(),
            line: env.line,
            column: env.column,
        };
        warn!("{warning}");
        self.warnings.push(warning);
    }

    fn new_local(&mut self, env: &Env, sym: &Symbol, form: &Form) -> LocalBinding {
        let binding = LocalBinding {
            id: self.bindings.len(),
            name: sym.clone(),
            tag: meta_string(form, "tag"),
            local: true,
            shadow: env.local(&sym.name).map(|b| b.id),
            ..LocalBinding::default()
        };
        self.bindings.push(binding.clone());
        binding
    }

    fn update_local(&mut self, binding: &LocalBinding) {
        if let Some(slot) = self.bindings.get_mut(binding.id) {
            *slot = binding.clone();
        }
    }

    fn disallowing_recur<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, AnalysisError>,
    ) -> Result<T, AnalysisError> {
        self.frames.push(None);
        let result = f(self);
        self.frames.pop();
        result
    }

    fn analyze_all(&mut self, env: &Env, forms: &[Form]) -> Result<Vec<Node>, AnalysisError> {
        let env = env.expr();
        self.disallowing_recur(|a| forms.iter().map(|f| a.analyze(&env, f, None)).collect())
    }

    fn analyze_keyword(&mut self, env: &Env, form: &Form, kw: &Keyword) -> Node {
        if kw.ns.as_deref() == Some(READER_NS_PLACEHOLDER) {
            let value = Form::keyword(Keyword::qualified(env.ns.clone(), kw.name.clone()));
            return Node::new(env, form, Op::Constant { value }).with_tag(Some("keyword".into()));
        }
        constant(env, form)
    }

    fn analyze_symbol(
        &mut self,
        env: &Env,
        form: &Form,
        sym: &Symbol,
        warn_deprecated: bool,
    ) -> Result<Node, AnalysisError> {
        let mut undeclared = Vec::new();
        let resolved = {
            let resolver = Resolver::new(&*self.table);
            if self.options.warn_on_undeclared {
                resolver.resolve_existing(env, sym, &mut |_, var| undeclared.push(var.clone()))
            } else {
                resolver.resolve(env, sym, None)
            }
        };
        for var in undeclared {
            self.warn(env, WarningKind::UndeclaredVar, format!("Use of undeclared Var {var}"));
        }
        let (op, tag) = match resolved {
            Resolved::Js { name, malformed } => {
                if malformed {
                    self.warn(
                        env,
                        WarningKind::MalformedJs,
                        format!("{name} is not a valid js/ reference; use (.. js/a b) for nested properties"),
                    );
                }
                (Op::Var { name, info: VarRef::Js }, None)
            }
            Resolved::Local(local) => {
                let tag = local.tag.clone();
                (
                    Op::Var {
                        name: local.name.clone(),
                        info: VarRef::Local(local),
                    },
                    tag,
                )
            }
            Resolved::Var(var) => {
                if warn_deprecated
                    && self.options.warn_on_deprecated
                    && var.def.as_ref().is_some_and(|d| d.deprecated)
                {
                    self.warn(env, WarningKind::Deprecated, format!("{} is deprecated.", var.name));
                }
                let tag = var.def.as_ref().and_then(|d| d.tag.clone());
                (
                    Op::Var {
                        name: var.name,
                        info: VarRef::Global {
                            ns: var.ns,
                            def: var.def,
                        },
                    },
                    tag,
                )
            }
        };
        Ok(Node::new(env, form, op).with_tag(tag))
    }

    fn wrap_meta(&mut self, env: &Env, form: &Form, node: Node) -> Result<Node, AnalysisError> {
        let meta = user_meta(form);
        if meta.is_empty() {
            return Ok(node);
        }
        let meta_node = self.analyze(&env.expr(), &Form::map(meta), None)?;
        Ok(Node::new(
            env,
            form,
            Op::Meta {
                expr: Box::new(node),
                meta: Box::new(meta_node),
            },
        ))
    }

    fn analyze_map(&mut self, env: &Env, form: &Form, entries: &[(Form, Form)]) -> Result<Node, AnalysisError> {
        let keys: Vec<Form> = entries.iter().map(|(k, _)| k.clone()).collect();
        let vals: Vec<Form> = entries.iter().map(|(_, v)| v.clone()).collect();
        let simple_keys = keys
            .iter()
            .all(|k| matches!(k.kind, FormKind::Str(_) | FormKind::Keyword(_)));
        let keys = self.analyze_all(env, &keys)?;
        let vals = self.analyze_all(env, &vals)?;
        let node = Node::new(
            env,
            form,
            Op::Map {
                keys,
                vals,
                simple_keys,
            },
        );
        self.wrap_meta(env, form, node)
    }

    fn analyze_items(&mut self, env: &Env, form: &Form, items: &[Form], set: bool) -> Result<Node, AnalysisError> {
        let items = self.analyze_all(env, items)?;
        let op = if set {
            Op::Set { items }
        } else {
            Op::Vector { items }
        };
        let node = Node::new(env, form, op);
        self.wrap_meta(env, form, node)
    }

    fn analyze_seq(&mut self, env: &Env, form: &Form, name: Option<&str>) -> Result<Node, AnalysisError> {
        let expanded = macroexpand(&*self.table, env, form, self.options.max_macroexpand_depth)?;
        let items = match expanded.as_list() {
            Some(items) if !items.is_empty() => items,
            _ => return self.analyze(env, &expanded, name),
        };
        if expanded != *form {
            // Re-enter so the expansion's own position is used for errors.
            let env = env.located_at(&expanded);
            return wrapping_errors(&env, self.dispatch(&env, &expanded, items, name));
        }
        self.dispatch(env, form, items, name)
    }

    fn dispatch(&mut self, env: &Env, form: &Form, items: &[Form], name: Option<&str>) -> Result<Node, AnalysisError> {
        let op = match items[0].as_symbol() {
            Some(sym) if sym.is_simple() && is_special(&sym.name) => sym.name.as_str(),
            _ => return self.parse_invoke(env, form, items),
        };
        match op {
            "if" => self.parse_if(env, form, items),
            "case*" => self.parse_case(env, form, items),
            "throw" => self.parse_throw(env, form, items),
            "try*" => self.parse_try(env, form, items),
            "def" => self.parse_def(env, form, items),
            "fn*" => self.parse_fn(env, form, items, name),
            "letfn*" => self.parse_letfn(env, form, items),
            "do" => self.parse_do(env, form, &items[1..]),
            "let*" => self.parse_let(env, form, items, false),
            "loop*" => self.parse_let(env, form, items, true),
            "recur" => self.parse_recur(env, form, items),
            "quote" => self.parse_quote(env, form, items),
            "new" => self.parse_new(env, form, items),
            "set!" => self.parse_set(env, form, items),
            "." => self.parse_dot(env, form, items),
            "js*" => self.parse_js(env, form, items),
            "ns" => self.parse_ns(env, form, items),
            "deftype*" => self.parse_deftype(env, form, items, false),
            "defrecord*" => self.parse_deftype(env, form, items, true),
            "extend" => self.parse_extend(env, form, items),
            _ => Err(AnalysisError::invalid(format!("Invalid use of {op}"))),
        }
    }

    fn parse_if(&mut self, env: &Env, form: &Form, items: &[Form]) -> Result<Node, AnalysisError> {
        ensure(items.len() >= 3, || "Too few arguments to if".to_string())?;
        ensure(items.len() <= 4, || "Too many arguments to if".to_string())?;
        let nil = Form::nil();
        let test_env = env.expr();
        let test = self.disallowing_recur(|a| a.analyze(&test_env, &items[1], None))?;
        let then = self.analyze(env, &items[2], None)?;
        let else_ = self.analyze(env, items.get(3).unwrap_or(&nil), None)?;
        Ok(Node::new(
            env,
            form,
            Op::If {
                test: Box::new(test),
                then: Box::new(then),
                else_: Box::new(else_),
                unchecked: self.unchecked_if,
            },
        ))
    }

    fn parse_case(&mut self, env: &Env, form: &Form, items: &[Form]) -> Result<Node, AnalysisError> {
        ensure(items.len() >= 2, || "case* requires a test expression".to_string())?;
        let test_env = env.expr();
        let test = self.disallowing_recur(|a| a.analyze(&test_env, &items[1], None))?;
        let clauses_forms = &items[2..];
        let (pairs, default) = match clauses_forms.split_last() {
            Some((last, pairs)) if clauses_forms.len() % 2 == 1 => (pairs, Some(last)),
            _ => (clauses_forms, None),
        };
        let mut clauses = Vec::with_capacity(pairs.len() / 2);
        for pair in pairs.chunks(2) {
            let tests = match &pair[0].kind {
                FormKind::List(constants) | FormKind::Vector(constants) => constants.clone(),
                _ => vec![pair[0].clone()],
            };
            ensure(!tests.is_empty(), || "case* clause has no test constants".to_string())?;
            let then = self.analyze(env, &pair[1], None)?;
            clauses.push(CaseClause { tests, then });
        }
        let default = default
            .map(|d| self.analyze(env, d, None).map(Box::new))
            .transpose()?;
        Ok(Node::new(
            env,
            form,
            Op::Case {
                test: Box::new(test),
                clauses,
                default,
            },
        ))
    }

    fn parse_throw(&mut self, env: &Env, form: &Form, items: &[Form]) -> Result<Node, AnalysisError> {
        ensure(items.len() == 2, || "throw requires exactly one argument".to_string())?;
        let expr_env = env.expr();
        let exception = self.disallowing_recur(|a| a.analyze(&expr_env, &items[1], None))?;
        Ok(Node::new(
            env,
            form,
            Op::Throw {
                exception: Box::new(exception),
            },
        ))
    }

    fn parse_try(&mut self, env: &Env, form: &Form, items: &[Form]) -> Result<Node, AnalysisError> {
        let body_forms = &items[1..];
        let is_clause = |f: &Form, head: &str| {
            f.as_list()
                .and_then(|l| l.first())
                .is_some_and(|h| h.is_symbol_named(head))
        };
        let split = body_forms
            .iter()
            .position(|f| is_clause(f, "catch") || is_clause(f, "finally"))
            .unwrap_or(body_forms.len());
        let (body, tail) = body_forms.split_at(split);
        let (catch, finally) = match tail {
            [] => (None, None),
            [c] if is_clause(c, "catch") => (Some(c), None),
            [f] => (None, Some(f)),
            [c, f] if is_clause(c, "catch") && is_clause(f, "finally") => (Some(c), Some(f)),
            _ => {
                return Err(AnalysisError::invalid(
                    "try* must end with at most one (catch ...) followed by at most one (finally ...)",
                ))
            }
        };
        if catch.is_none() && finally.is_none() {
            return self.parse_do(env, form, body);
        }
        let body_node = self.analyze_body(env, body)?;
        let (catch_local, catch_node) = match catch.and_then(Form::as_list) {
            Some(parts) => {
                let name_form = parts
                    .get(1)
                    .ok_or_else(|| AnalysisError::invalid("catch requires a binding name"))?;
                let sym = simple_symbol(name_form, || {
                    format!("Can't qualify symbol in catch: {name_form}")
                })?;
                let local = self.new_local(env, sym, name_form);
                let catch_env = env.with_local(local.clone());
                let node = self.analyze_body(&catch_env, &parts[2..])?;
                (Some(local), Some(Box::new(node)))
            }
            None => (None, None),
        };
        let finally_node = match finally.and_then(Form::as_list) {
            Some(parts) => Some(Box::new(self.analyze_body(&env.statement(), &parts[1..])?)),
            None => None,
        };
        Ok(Node::new(
            env,
            form,
            Op::Try {
                body: Box::new(body_node),
                catch_local,
                catch: catch_node,
                finally: finally_node,
            },
        ))
    }

    fn parse_def(&mut self, env: &Env, form: &Form, items: &[Form]) -> Result<Node, AnalysisError> {
        ensure(items.len() >= 2, || "Too few arguments to def".to_string())?;
        ensure(items.len() <= 4, || "Too many arguments to def".to_string())?;
        let sym_form = &items[1];
        let sym = match sym_form.as_symbol() {
            Some(sym) if sym.is_simple() => sym,
            Some(_) => return Err(AnalysisError::invalid("Can't def ns-qualified name")),
            None => return Err(AnalysisError::invalid("First argument to def must be a symbol")),
        };
        let (doc, init) = match items.len() {
            2 => (None, None),
            3 => (None, Some(&items[2])),
            _ => match items[2].as_str() {
                Some(doc) => (Some(doc.to_string()), Some(&items[3])),
                None => return Err(AnalysisError::invalid("Docstring passed to def must be a string")),
            },
        };
        let doc = doc.or_else(|| meta_string(sym_form, "doc"));
        let name = sym.name.clone();
        let ns = env.ns.clone();
        let qualified = Symbol::qualified(ns.clone(), name.clone());

        if ns != CORE_NS {
            let used_from = self
                .table
                .get(&ns)
                .and_then(|entry| entry.uses.get(&name))
                .cloned();
            let origin = used_from.or_else(|| {
                self.table
                    .core_name(&name, &ns)
                    .then(|| CORE_NS.to_string())
            });
            if let Some(origin) = origin {
                if self.options.warn_on_redef {
                    self.warn(
                        env,
                        WarningKind::Redefinition,
                        format!("{name} already refers to: {origin}/{name} being replaced by: {qualified}"),
                    );
                }
                let entry = self.table.ensure(&ns);
                entry.excludes.insert(name.clone());
                entry.uses.remove(&name);
            }
        }

        let dynamic = sym_form.meta_flag("dynamic");
        if is_earmuffed(&name) && !dynamic && self.options.warn_on_dynamic {
            self.warn(
                env,
                WarningKind::DynamicNotDeclared,
                format!("{name} not declared ^:dynamic"),
            );
        }

        let previous = self.table.lookup_def(&ns, &name).cloned();
        self.table
            .ensure(&ns)
            .defs
            .entry(name.clone())
            .or_insert_with(|| VarDefinition {
                declared: true,
                ..VarDefinition::named(qualified.clone())
            });

        let mut var_env = env.expr();
        var_env.locals = im::HashMap::new();
        let var = self.analyze_symbol(&var_env, sym_form, sym, false)?;
        let init_env = env.expr();
        let init_node = match init {
            Some(init) => Some(self.disallowing_recur(|a| a.analyze(&init_env, init, Some(name.as_str())))?),
            None => None,
        };
        let info = init_node.as_ref().and_then(fn_info);

        if let Some(prev) = &previous {
            if init.is_some() && !sym_form.meta_flag("declared") {
                self.warn_fn_var_change(env, &qualified, prev, info.is_some());
            }
        }

        let export = match sym_form.meta_get("export").map(|f| &f.kind) {
            Some(FormKind::Str(s)) => Some(s.clone()),
            Some(_) if sym_form.meta_flag("export") => Some(format!("{ns}.{name}")),
            _ => None,
        };
        match (&init_node, previous) {
            (None, Some(prev)) if !prev.declared => {}
            (_, previous) => {
                let (variadic, max_fixed_arity, method_params) = match info {
                    Some((variadic, arity, params)) => (variadic, Some(arity), vec![params]),
                    None => (false, None, Vec::new()),
                };
                let def = VarDefinition {
                    name: qualified.clone(),
                    doc: doc.clone(),
                    dynamic,
                    macro_flag: sym_form.meta_flag("macro"),
                    fn_var: max_fixed_arity.is_some(),
                    variadic,
                    max_fixed_arity,
                    method_params,
                    protocols: previous.map(|p| p.protocols).unwrap_or_default(),
                    protocol: meta_string(sym_form, "protocol"),
                    deprecated: sym_form.meta_flag("deprecated"),
                    declared: init_node.is_none(),
                    export: export.clone(),
                    tag: meta_string(sym_form, "tag")
                        .or_else(|| init_node.as_ref().and_then(|n| n.tag.clone())),
                    file: env.file.clone(),
                    line: env.line,
                    column: env.column,
                    ..VarDefinition::default()
                };
                self.table.ensure(&ns).defs.insert(name.clone(), def);
            }
        }

        Ok(Node::new(
            env,
            form,
            Op::Def {
                name: qualified,
                var: Box::new(var),
                doc,
                init: init_node.map(Box::new),
                dynamic,
                export,
            },
        ))
    }

    fn current_loop_lets(&self) -> Vec<LocalBinding> {
        self.loop_lets
            .iter()
            .rev()
            .take_while(|frame| frame.is_some())
            .flatten()
            .flatten()
            .cloned()
            .collect()
    }

    fn parse_fn(
        &mut self,
        env: &Env,
        form: &Form,
        items: &[Form],
        def_name: Option<&str>,
    ) -> Result<Node, AnalysisError> {
        let mut rest = &items[1..];
        let mut self_name = None;
        if let Some((first, tail)) = rest.split_first() {
            if let Some(sym) = first.as_symbol() {
                ensure(sym.is_simple(), || format!("Can't use qualified name as fn name: {sym}"))?;
                self_name = Some((sym, first));
                rest = tail;
            }
        }
        let method: &[Form] = match rest {
            [] => return Err(AnalysisError::invalid("Parameter declaration missing")),
            [first, ..] if first.as_vector().is_some() => rest,
            [single] => single
                .as_list()
                .ok_or_else(|| AnalysisError::invalid("Parameter declaration missing"))?,
            _ => {
                return Err(AnalysisError::invalid(
                    "fn* accepts a single arity; multi-arity fns must be expanded before analysis",
                ))
            }
        };
        let Some((params_form, body)) = method.split_first() else {
            return Err(AnalysisError::invalid("Parameter declaration missing"));
        };
        let Some(param_forms) = params_form.as_vector() else {
            return Err(AnalysisError::invalid(format!(
                "Parameter declaration {params_form} should be a vector"
            )));
        };

        let mut names: Vec<(&Form, &Symbol)> = Vec::with_capacity(param_forms.len());
        let mut variadic = false;
        for (i, param) in param_forms.iter().enumerate() {
            let sym = param
                .as_symbol()
                .ok_or_else(|| AnalysisError::invalid(format!("Parameter {param} must be a symbol")))?;
            if sym.is("&") {
                ensure(!variadic && i + 2 == param_forms.len(), || {
                    "& must be followed by exactly one rest parameter".to_string()
                })?;
                variadic = true;
                continue;
            }
            ensure(sym.is_simple(), || format!("Can't use qualified name as parameter: {sym}"))?;
            names.push((param, sym));
        }
        let fixed_arity = if variadic { names.len() - 1 } else { names.len() };
        let param_syms: Vec<Symbol> = names.iter().map(|(_, s)| (*s).clone()).collect();

        let mut fn_env = env.clone();
        if let Some(fields) = form.meta_get(FIELDS_KEY).and_then(Form::as_sequential) {
            for field in fields {
                if let Some(sym) = field.as_symbol() {
                    let mut local = self.new_local(&fn_env, sym, field);
                    local.field = true;
                    local.mutable = field.meta_flag("mutable");
                    self.update_local(&local);
                    fn_env = fn_env.with_local(local);
                }
            }
        }
        fn_env.protocol_impl = form.meta_get("protocol-impl").cloned();
        fn_env.protocol_inline = form.meta_get("protocol-inline").cloned();

        let name_local = match self_name {
            Some((sym, sym_form)) => {
                let mut local = self.new_local(&fn_env, sym, sym_form);
                local.fn_var = true;
                local.variadic = variadic;
                local.max_fixed_arity = Some(fixed_arity);
                local.method_params = vec![param_syms.clone()];
                self.update_local(&local);
                fn_env = fn_env.with_local(local.clone());
                fn_env.recur_name = Some(sym.clone());
                Some(local)
            }
            None => None,
        };

        let mut params = Vec::with_capacity(names.len());
        for (param_form, sym) in names {
            let local = self.new_local(&fn_env, sym, param_form);
            fn_env = fn_env.with_local(local.clone());
            params.push(local);
        }

        let loop_lets = self.current_loop_lets();
        self.frames.push(Some(RecurFrame {
            params: params.clone(),
            used: false,
        }));
        self.loop_lets.push(None);
        let body_node = self.analyze_body(&fn_env.ret(), body);
        self.loop_lets.pop();
        let recurs = matches!(self.frames.pop(), Some(Some(RecurFrame { used: true, .. })));
        let body_node = body_node?;

        Ok(Node::new(
            env,
            form,
            Op::Fn {
                name: name_local,
                def_name: def_name.map(str::to_string),
                method: FnMethod {
                    params,
                    variadic,
                    fixed_arity,
                    recurs,
                    body: Box::new(body_node),
                },
                variadic,
                max_fixed_arity: fixed_arity,
                loop_lets,
            },
        )
        .with_tag(Some("function".into())))
    }

    fn parse_letfn(&mut self, env: &Env, form: &Form, items: &[Form]) -> Result<Node, AnalysisError> {
        let pairs = items
            .get(1)
            .and_then(Form::as_vector)
            .filter(|b| b.len() % 2 == 0)
            .ok_or_else(|| AnalysisError::invalid("bindings must be vector of even number of elements"))?;
        let mut body_env = env.clone();
        let mut locals = Vec::with_capacity(pairs.len() / 2);
        for pair in pairs.chunks(2) {
            let sym = simple_symbol(&pair[0], || format!("Invalid local name: {}", pair[0]))?;
            let mut local = self.new_local(&body_env, sym, &pair[0]);
            local.fn_var = true;
            self.update_local(&local);
            body_env = body_env.with_local(local.clone());
            locals.push(local);
        }
        let mut bindings = Vec::with_capacity(locals.len());
        for (mut local, pair) in locals.into_iter().zip(pairs.chunks(2)) {
            let init_env = body_env.expr();
            let init = self.disallowing_recur(|a| a.analyze(&init_env, &pair[1], Some(local.name.name.as_str())))?;
            if let Some((variadic, arity, params)) = fn_info(&init) {
                local.variadic = variadic;
                local.max_fixed_arity = Some(arity);
                local.method_params = vec![params];
            }
            self.update_local(&local);
            bindings.push(Binding { local, init });
        }
        for binding in &bindings {
            body_env = body_env.with_local(binding.local.clone());
        }
        let body = self.analyze_body(&body_env, &items[2..])?;
        Ok(Node::new(
            env,
            form,
            Op::Letfn {
                bindings,
                body: Box::new(body),
            },
        ))
    }

    fn analyze_body(&mut self, env: &Env, exprs: &[Form]) -> Result<Node, AnalysisError> {
        let mut items = Vec::with_capacity(exprs.len() + 1);
        items.push(Form::sym("do"));
        items.extend_from_slice(exprs);
        self.parse_do(env, &Form::list(items), exprs)
    }

    fn parse_do(&mut self, env: &Env, form: &Form, exprs: &[Form]) -> Result<Node, AnalysisError> {
        let Some((last, init)) = exprs.split_last() else {
            let ret = constant(env, &Form::nil());
            return Ok(Node::new(
                env,
                form,
                Op::Do {
                    statements: Vec::new(),
                    ret: Box::new(ret),
                },
            ));
        };
        let statement_env = env.statement();
        let statements = self.disallowing_recur(|a| {
            init.iter()
                .map(|f| a.analyze(&statement_env, f, None))
                .collect::<Result<Vec<_>, _>>()
        })?;
        let ret = self.analyze(env, last, None)?;
        let tag = ret.tag.clone();
        Ok(Node::new(
            env,
            form,
            Op::Do {
                statements,
                ret: Box::new(ret),
            },
        )
        .with_tag(tag))
    }

    fn parse_let(&mut self, env: &Env, form: &Form, items: &[Form], is_loop: bool) -> Result<Node, AnalysisError> {
        let pairs = items
            .get(1)
            .and_then(Form::as_vector)
            .filter(|b| b.len() % 2 == 0)
            .ok_or_else(|| AnalysisError::invalid("bindings must be vector of even number of elements"))?;
        let mut body_env = env.clone();
        let mut bindings = Vec::with_capacity(pairs.len() / 2);
        for pair in pairs.chunks(2) {
            let (name_form, init_form) = (&pair[0], &pair[1]);
            let sym = match name_form.as_symbol() {
                Some(sym) if sym.is_simple() && !sym.name.contains('.') => sym,
                _ => return Err(AnalysisError::invalid(format!("Invalid local name: {name_form}"))),
            };
            let init_env = body_env.expr();
            let init = self.disallowing_recur(|a| a.analyze(&init_env, init_form, Some(sym.name.as_str())))?;
            let mut local = self.new_local(&body_env, sym, name_form);
            if local.tag.is_none() {
                local.tag = init.tag.clone();
            }
            if let Some((variadic, arity, params)) = fn_info(&init) {
                local.fn_var = true;
                local.variadic = variadic;
                local.max_fixed_arity = Some(arity);
                local.method_params = vec![params];
            }
            self.update_local(&local);
            body_env = body_env.with_local(local.clone());
            bindings.push(Binding { local, init });
        }

        let body = if is_loop {
            let params: Vec<LocalBinding> = bindings.iter().map(|b| b.local.clone()).collect();
            self.frames.push(Some(RecurFrame {
                params: params.clone(),
                used: false,
            }));
            self.loop_lets.push(Some(params));
            let body_env = if env.context == Context::Expr {
                body_env.ret()
            } else {
                body_env
            };
            let body = self.analyze_body(&body_env, &items[2..]);
            self.loop_lets.pop();
            self.frames.pop();
            body?
        } else {
            self.analyze_body(&body_env, &items[2..])?
        };
        let tag = body.tag.clone();
        Ok(Node::new(
            env,
            form,
            Op::Let {
                is_loop,
                bindings,
                body: Box::new(body),
            },
        )
        .with_tag(tag))
    }

    fn parse_recur(&mut self, env: &Env, form: &Form, items: &[Form]) -> Result<Node, AnalysisError> {
        let frame = match self.frames.last() {
            Some(Some(frame)) => frame.params.clone(),
            _ => return Err(AnalysisError::invalid("Can't recur here")),
        };
        let exprs = &items[1..];
        ensure(exprs.len() == frame.len(), || {
            format!(
                "recur argument count mismatch: expected {}, got {}",
                frame.len(),
                exprs.len()
            )
        })?;
        let exprs = self.analyze_all(env, exprs)?;
        if let Some(Some(frame)) = self.frames.last_mut() {
            frame.used = true;
        }
        Ok(Node::new(env, form, Op::Recur { frame, exprs }))
    }

    fn parse_quote(&mut self, env: &Env, form: &Form, items: &[Form]) -> Result<Node, AnalysisError> {
        ensure(items.len() == 2, || "quote requires exactly one argument".to_string())?;
        Ok(Node::new(
            env,
            form,
            Op::Constant {
                value: items[1].clone(),
            },
        ))
    }

    fn parse_new(&mut self, env: &Env, form: &Form, items: &[Form]) -> Result<Node, AnalysisError> {
        ensure(items.len() >= 2, || "new requires a constructor".to_string())?;
        let expr_env = env.expr();
        let ctor = self.disallowing_recur(|a| a.analyze(&expr_env, &items[1], None))?;
        let args = self.analyze_all(env, &items[2..])?;
        if let Op::Var {
            name,
            info: VarRef::Global { def: Some(def), .. },
        } = &ctor.op
        {
            if let Some(fields) = def.num_fields.filter(|_| def.is_type) {
                if fields != args.len() && self.options.warn_on_arity {
                    let message = format!(
                        "Wrong number of args ({}) passed to {name}; expected {fields}",
                        args.len()
                    );
                    self.warn(env, WarningKind::ArityMismatch, message);
                }
            }
        }
        let tag = match &ctor.op {
            Op::Var { name, .. } => Some(name.to_string()),
            _ => None,
        };
        Ok(Node::new(
            env,
            form,
            Op::New {
                ctor: Box::new(ctor),
                args,
            },
        )
        .with_tag(tag))
    }

    fn parse_set(&mut self, env: &Env, form: &Form, items: &[Form]) -> Result<Node, AnalysisError> {
        if items.len() == 4 {
            let field = Form::list(vec![Form::sym("."), items[1].clone(), items[2].clone()])
                .with_meta(form.meta_rc().cloned());
            let rewritten = Form::list(vec![items[0].clone(), field, items[3].clone()])
                .with_meta(form.meta_rc().cloned());
            return self.parse_set(env, &rewritten, rewritten.as_list().unwrap_or_default());
        }
        ensure(items.len() == 3, || "set! requires a target and a value".to_string())?;
        if items[1].is_symbol_named("*unchecked-if*") {
            self.unchecked_if = items[2].is_truthy();
            return Ok(Node::new(env, form, Op::NoOp));
        }
        let expr_env = env.expr();
        let target = self.disallowing_recur(|a| a.analyze(&expr_env, &items[1], None))?;
        let assignable = match &target.op {
            Op::Var {
                info: VarRef::Local(local),
                ..
            } => local.field && local.mutable,
            Op::Var {
                info: VarRef::Global { def, .. },
                ..
            } => def.as_ref().map_or(true, |d| d.dynamic),
            Op::Var { info: VarRef::Js, .. } => true,
            Op::Dot {
                kind: DotKind::Field(_),
                ..
            } => true,
            _ => false,
        };
        if !assignable {
            let message = match &target.op {
                Op::Var {
                    name,
                    info: VarRef::Local(_),
                } => format!("Can't set! local {name}; only mutable fields can be assigned"),
                Op::Var { name, .. } => format!("Can't set! {name}; it is not declared ^:dynamic"),
                _ => "set! target must be a field or a symbol naming a var".to_string(),
            };
            return Err(AnalysisError::invalid(message));
        }
        let val = self.disallowing_recur(|a| a.analyze(&expr_env, &items[2], None))?;
        Ok(Node::new(
            env,
            form,
            Op::SetBang {
                target: Box::new(target),
                val: Box::new(val),
            },
        ))
    }

    fn parse_dot(&mut self, env: &Env, form: &Form, items: &[Form]) -> Result<Node, AnalysisError> {
        ensure(items.len() >= 3, || "Malformed member expression, expecting (. target member ...)".to_string())?;
        let expr_env = env.expr();
        let target = self.disallowing_recur(|a| a.analyze(&expr_env, &items[1], None))?;
        let (kind, arg_forms): (DotKind, &[Form]) = match &items[2].kind {
            FormKind::List(call) => {
                let method = call
                    .first()
                    .and_then(Form::as_symbol)
                    .ok_or_else(|| AnalysisError::invalid("Method name must be a symbol"))?;
                ensure(items.len() == 3, || {
                    "Method call form (. target (method args)) takes no further arguments".to_string()
                })?;
                (DotKind::Method(method.name.clone()), &call[1..])
            }
            FormKind::Symbol(member) => match member.name.strip_prefix('-') {
                Some(field) => {
                    ensure(items.len() == 3, || {
                        format!("Property access {} does not take arguments", member.name)
                    })?;
                    (DotKind::Field(field.to_string()), &[][..])
                }
                None => (DotKind::Method(member.name.clone()), &items[3..]),
            },
            _ => return Err(AnalysisError::invalid("Member must be a symbol or a method call")),
        };
        let args = self.analyze_all(env, arg_forms)?;
        Ok(Node::new(
            env,
            form,
            Op::Dot {
                target: Box::new(target),
                kind,
                args,
            },
        )
        .with_tag(meta_string(form, "tag")))
    }

    fn parse_js(&mut self, env: &Env, form: &Form, items: &[Form]) -> Result<Node, AnalysisError> {
        let template = items
            .get(1)
            .and_then(Form::as_str)
            .ok_or_else(|| AnalysisError::invalid("js* requires a string template"))?;
        let arg_forms = &items[2..];
        let code = if arg_forms.is_empty() {
            JsCode::Raw(template.to_string())
        } else {
            JsCode::Segments(template.split("~{}").map(str::to_string).collect())
        };
        let args = self.analyze_all(env, arg_forms)?;
        Ok(Node::new(env, form, Op::Js { code, args }).with_tag(meta_string(form, "tag")))
    }

    fn parse_ns(&mut self, env: &Env, form: &Form, items: &[Form]) -> Result<Node, AnalysisError> {
        let name_form = items
            .get(1)
            .ok_or_else(|| AnalysisError::invalid("ns requires a name"))?;
        let name = simple_symbol(name_form, || format!("Invalid namespace name: {name_form}"))?
            .name
            .clone();
        let mut rest = &items[2..];
        let mut doc = meta_string(name_form, "doc");
        if let Some((first, tail)) = rest.split_first() {
            if let Some(text) = first.as_str() {
                doc = Some(text.to_string());
                rest = tail;
            }
        }

        let mut clauses = NsClauses::default();
        let mut deps: Vec<String> = Vec::new();
        let mut aliases: Vec<(AliasKind, String, String)> = Vec::new();
        let mut seen = BTreeSet::new();
        for clause in rest {
            let parts = clause.as_list().unwrap_or_default();
            let kind = parts
                .first()
                .and_then(Form::as_keyword)
                .filter(|kw| kw.ns.is_none())
                .map(|kw| kw.name.as_str())
                .ok_or_else(|| {
                    AnalysisError::invalid(
                        "Only :refer-clojure, :require, :require-macros, :use, :use-macros and :import libspecs supported",
                    )
                })?;
            if !seen.insert(kind.to_string()) {
                return Err(AnalysisError::invalid(format!(
                    "Only one :{kind} form is allowed per namespace definition"
                )));
            }
            let specs = &parts[1..];
            match kind {
                "refer-clojure" => parse_refer_clojure(specs, &mut clauses)?,
                "require" | "require-macros" => {
                    let macros = kind == "require-macros";
                    for spec in specs {
                        parse_require_spec(spec, macros, &mut clauses, &mut deps, &mut aliases)?;
                    }
                }
                "use" | "use-macros" => {
                    let macros = kind == "use-macros";
                    for spec in specs {
                        parse_use_spec(spec, macros, &mut clauses, &mut deps)?;
                    }
                }
                "import" => {
                    for spec in specs {
                        parse_import_spec(spec, &mut clauses)?;
                    }
                }
                other => {
                    return Err(AnalysisError::invalid(format!(
                        "Unsupported ns clause :{other}"
                    )))
                }
            }
        }

        self.loading.push(name.clone());
        let loaded = self.analyze_deps(&deps);
        self.loading.pop();
        loaded?;

        for (kind, alias, target) in &aliases {
            if self.table.register_alias(&name, *kind, alias, target) {
                self.warn(
                    env,
                    WarningKind::AliasReused,
                    format!("{alias} already used as an alias for another namespace in {name}; now {target}"),
                );
            }
        }
        let entry = self.table.ensure(&name);
        entry.doc = doc.clone();
        entry.excludes = clauses.excludes.clone();
        entry.uses = clauses.uses.clone();
        entry.requires = clauses.requires.clone();
        entry.requires_macros = clauses.requires_macros.clone();
        entry.use_macros = clauses.use_macros.clone();
        entry.imports = clauses.imports.clone();
        for dep in &deps {
            self.table.add_dependency(&name, dep);
        }
        debug!("committed namespace {name}");
        self.current_ns = name.clone();

        Ok(Node::new(env, form, Op::Ns { name, doc, clauses }))
    }

    fn parse_deftype(&mut self, env: &Env, form: &Form, items: &[Form], record: bool) -> Result<Node, AnalysisError> {
        let what = if record { "defrecord*" } else { "deftype*" };
        ensure((3..=4).contains(&items.len()), || {
            format!("{what} requires a name, a field vector and optional protocol masks")
        })?;
        let type_form = &items[1];
        let sym = simple_symbol(type_form, || format!("{what} name must be an unqualified symbol"))?;
        let mut fields = symbols_in(&items[2], "Fields must be a vector of symbols")?;
        ensure(items[2].as_vector().is_some(), || "Fields must be a vector of symbols".to_string())?;
        if record {
            fields.push(Symbol::simple("__meta"));
            fields.push(Symbol::simple("__extmap"));
        }
        let protocols: BTreeSet<String> = match type_form.meta_get("protocols") {
            Some(set) => symbols_in(set, "protocols must be a set of symbols")?
                .iter()
                .map(|p| self.resolve_var_name(env, p).to_string())
                .collect(),
            None => BTreeSet::new(),
        };
        let qualified = Symbol::qualified(env.ns.clone(), sym.name.clone());
        if let Some(prev) = self.table.lookup_def(&env.ns, &sym.name).cloned() {
            self.warn_fn_var_change(env, &qualified, &prev, false);
        }
        let def = VarDefinition {
            is_type: true,
            record,
            num_fields: Some(fields.len()),
            protocols: protocols.clone(),
            file: env.file.clone(),
            line: env.line,
            column: env.column,
            ..VarDefinition::named(qualified.clone())
        };
        self.table.ensure(&env.ns).defs.insert(sym.name.clone(), def);
        let pmasks = items.get(3).cloned();
        let op = if record {
            Op::Defrecord {
                name: qualified,
                fields,
                pmasks,
                protocols,
            }
        } else {
            Op::Deftype {
                name: qualified,
                fields,
                pmasks,
                protocols,
            }
        };
        Ok(Node::new(env, form, op))
    }

    /// Warns when a defined var switches between fn and non-fn. Forward
    /// declarations never count as a previous definition.
    fn warn_fn_var_change(&mut self, env: &Env, name: &Symbol, prev: &VarDefinition, now_fn: bool) {
        if prev.declared || prev.fn_var == now_fn || !self.options.warn_on_fn_var {
            return;
        }
        let message = if now_fn {
            format!("{name} is now a fn, references are stale")
        } else {
            format!("{name} no longer fn, references are stale")
        };
        self.warn(env, WarningKind::FnVarStale, message);
    }

    fn resolve_var_name(&self, env: &Env, sym: &Symbol) -> Symbol {
        match Resolver::new(&*self.table).resolve(env, sym, None) {
            Resolved::Var(var) => var.name,
            Resolved::Js { name, .. } => name,
            Resolved::Local(local) => local.name,
        }
    }

    fn parse_extend(&mut self, env: &Env, form: &Form, items: &[Form]) -> Result<Node, AnalysisError> {
        ensure(items.len() >= 2 && items.len() % 2 == 0, || {
            "extend requires a type followed by protocol/method-map pairs".to_string()
        })?;
        let type_sym = items[1]
            .as_symbol()
            .ok_or_else(|| AnalysisError::invalid("extend requires a type symbol"))?;
        let primitive = type_sym.is_simple() && PRIMITIVE_TYPES.contains(&type_sym.name.as_str());
        let etype = if primitive {
            type_sym.clone()
        } else {
            self.resolve_var_name(env, type_sym)
        };

        let mut impls = Vec::new();
        for pair in items[2..].chunks(2) {
            let proto_sym = pair[0]
                .as_symbol()
                .ok_or_else(|| AnalysisError::invalid(format!("Protocol {} must be a symbol", pair[0])))?;
            let protocol = self.resolve_var_name(env, proto_sym);
            let methods_map = pair[1].as_map().ok_or_else(|| {
                AnalysisError::invalid(format!("Methods for {protocol} must be a map of keyword to fn"))
            })?;
            let proto_ns = protocol.ns.clone().unwrap_or_else(|| env.ns.clone());
            let mut methods = Vec::with_capacity(methods_map.len());
            for (key, fn_form) in methods_map {
                let method = key
                    .as_keyword()
                    .ok_or_else(|| AnalysisError::invalid(format!("Method name {key} must be a keyword")))?;
                self.table
                    .record_proto_implementer(format!("{proto_ns}/{}", method.name), etype.to_string());
                let fn_env = env.expr();
                let node = self.disallowing_recur(|a| a.analyze(&fn_env, fn_form, Some(method.name.as_str())))?;
                methods.push((method.name.clone(), node));
            }
            if let Some(def) = self
                .table
                .get_mut(&proto_ns)
                .and_then(|entry| entry.defs.get_mut(&protocol.name))
            {
                def.protocols.insert(etype.to_string());
            }
            impls.push(ProtocolImpl { protocol, methods });
        }
        Ok(Node::new(
            env,
            form,
            Op::Extend {
                etype,
                primitive,
                impls,
            },
        ))
    }

    fn callee_signature(f: &Node) -> Option<FnSignature> {
        match &f.op {
            Op::Var {
                name,
                info: VarRef::Local(local),
            } if local.fn_var => Some(FnSignature {
                name: name.to_string(),
                variadic: local.variadic,
                max_fixed_arity: local.max_fixed_arity,
                deprecated: false,
                tag: None,
            }),
            Op::Var {
                name,
                info: VarRef::Global { def: Some(def), .. },
            } if def.fn_var => Some(FnSignature {
                name: name.to_string(),
                variadic: def.variadic,
                max_fixed_arity: def.max_fixed_arity,
                deprecated: def.deprecated,
                tag: def.tag.clone(),
            }),
            _ => None,
        }
    }

    fn parse_invoke(&mut self, env: &Env, form: &Form, items: &[Form]) -> Result<Node, AnalysisError> {
        let expr_env = env.expr();
        let f = self.disallowing_recur(|a| match items[0].as_symbol() {
            Some(sym) => {
                let callee_env = expr_env.located_at(&items[0]);
                wrapping_errors(&callee_env, a.analyze_symbol(&callee_env, &items[0], sym, false))
            }
            None => a.analyze(&expr_env, &items[0], None),
        })?;
        let args = self.analyze_all(env, &items[1..])?;
        let signature = Self::callee_signature(&f);
        if let Some(sig) = &signature {
            let argc = args.len();
            if let Some(arity) = sig.max_fixed_arity {
                let mismatch = if sig.variadic { argc < arity } else { argc != arity };
                if mismatch && self.options.warn_on_arity {
                    self.warn(
                        env,
                        WarningKind::ArityMismatch,
                        format!("Wrong number of args ({argc}) passed to {}", sig.name),
                    );
                }
            }
            if sig.deprecated && self.options.warn_on_deprecated {
                self.warn(env, WarningKind::Deprecated, format!("{} is deprecated.", sig.name));
            }
        }
        let tag = signature
            .and_then(|sig| sig.tag)
            .or_else(|| meta_string(form, "tag"));
        Ok(Node::new(
            env,
            form,
            Op::Invoke {
                f: Box::new(f),
                args,
            },
        )
        .with_tag(tag))
    }
}

fn constant(env: &Env, form: &Form) -> Node {
    let tag = match form.kind {
        FormKind::Nil | FormKind::Bool(_) | FormKind::Int(_) | FormKind::Float(_) | FormKind::Str(_) => {
            Some(form.type_name().to_string())
        }
        FormKind::Keyword(_) => Some("keyword".to_string()),
        _ => None,
    };
    Node::new(
        env,
        form,
        Op::Constant {
            value: form.clone(),
        },
    )
    .with_tag(tag)
}

fn parse_refer_clojure(specs: &[Form], clauses: &mut NsClauses) -> Result<(), AnalysisError> {
    let message = "Only [:refer-clojure :exclude [names]] form supported";
    match specs {
        [flag, names] if flag.as_keyword() == Some(&Keyword::simple("exclude")) => {
            clauses.excludes = symbols_in(names, message)?
                .into_iter()
                .map(|s| s.name)
                .collect();
            Ok(())
        }
        _ => Err(AnalysisError::invalid(message)),
    }
}

fn parse_require_spec(
    spec: &Form,
    macros: bool,
    clauses: &mut NsClauses,
    deps: &mut Vec<String>,
    aliases: &mut Vec<(AliasKind, String, String)>,
) -> Result<(), AnalysisError> {
    let message = "Only [lib.ns & options] and lib.ns specs supported in :require / :require-macros";
    let (lib, options): (&Symbol, &[Form]) = match &spec.kind {
        FormKind::Symbol(lib) => (lib, &[][..]),
        FormKind::Vector(parts) => match parts.split_first() {
            Some((lib, options)) if options.len() % 2 == 0 => (
                lib.as_symbol()
                    .ok_or_else(|| AnalysisError::invalid(message))?,
                options,
            ),
            _ => return Err(AnalysisError::invalid(message)),
        },
        _ => return Err(AnalysisError::invalid(message)),
    };
    let lib = lib.to_string();
    let (requires, refers, kind) = if macros {
        (&mut clauses.requires_macros, &mut clauses.use_macros, AliasKind::Macros)
    } else {
        deps.push(lib.clone());
        (&mut clauses.requires, &mut clauses.uses, AliasKind::Fns)
    };
    requires.insert(lib.clone(), lib.clone());
    for option in options.chunks(2) {
        match option[0].as_keyword().map(|kw| kw.name.as_str()) {
            Some("as") => {
                let alias = option[1]
                    .as_symbol()
                    .filter(|s| s.is_simple())
                    .ok_or_else(|| AnalysisError::invalid(message))?;
                requires.insert(alias.name.clone(), lib.clone());
                aliases.push((kind, alias.name.clone(), lib.clone()));
            }
            Some("refer") => {
                for sym in symbols_in(&option[1], message)? {
                    refers.insert(sym.name, lib.clone());
                }
            }
            _ => return Err(AnalysisError::invalid(message)),
        }
    }
    Ok(())
}

fn parse_use_spec(
    spec: &Form,
    macros: bool,
    clauses: &mut NsClauses,
    deps: &mut Vec<String>,
) -> Result<(), AnalysisError> {
    let message = "Only [lib.ns :only [names]] specs supported in :use / :use-macros";
    let parts = spec
        .as_vector()
        .ok_or_else(|| AnalysisError::invalid(message))?;
    let [lib, only, names] = parts else {
        return Err(AnalysisError::invalid(message));
    };
    let lib = lib
        .as_symbol()
        .ok_or_else(|| AnalysisError::invalid(message))?
        .to_string();
    ensure(only.as_keyword() == Some(&Keyword::simple("only")), || message.to_string())?;
    let target = if macros {
        &mut clauses.use_macros
    } else {
        deps.push(lib.clone());
        &mut clauses.uses
    };
    for sym in symbols_in(names, message)? {
        target.insert(sym.name, lib.clone());
    }
    Ok(())
}

fn parse_import_spec(spec: &Form, clauses: &mut NsClauses) -> Result<(), AnalysisError> {
    let message = "Only lib.Ctor and [lib Ctor ...] specs supported in :import";
    match &spec.kind {
        FormKind::Symbol(sym) => {
            let full = sym.to_string();
            let (lib, ctor) = full
                .rsplit_once('.')
                .ok_or_else(|| AnalysisError::invalid(message))?;
            clauses
                .imports
                .insert(ctor.to_string(), Symbol::qualified(lib, ctor));
            Ok(())
        }
        FormKind::Vector(parts) | FormKind::List(parts) => {
            let (lib, ctors) = parts
                .split_first()
                .ok_or_else(|| AnalysisError::invalid(message))?;
            let lib = lib
                .as_symbol()
                .ok_or_else(|| AnalysisError::invalid(message))?
                .to_string();
            for ctor in ctors {
                let ctor = simple_symbol(ctor, || message.to_string())?;
                clauses
                    .imports
                    .insert(ctor.name.clone(), Symbol::qualified(lib.clone(), ctor.name.clone()));
            }
            Ok(())
        }
        _ => Err(AnalysisError::invalid(message)),
    }
}

impl Default for SourceRootsLoader {
    fn default() -> Self {
        Self::new(vec![Path::new(".").to_path_buf()])
    }
}
