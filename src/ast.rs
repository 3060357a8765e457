use crate::form::{Form, Symbol};
use crate::namespace::VarDefinition;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display};

/// Position of an expression relative to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Context {
    Statement,
    Expr,
    Return,
}

/// Index into the analyzer's binding arena.
pub type LocalId = usize;

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct LocalBinding {
    pub id: LocalId,
    pub name: Symbol,
    pub tag: Option<String>,
    pub local: bool,
    /// The binding this one hides, if any.
    pub shadow: Option<LocalId>,
    pub field: bool,
    pub mutable: bool,
    pub fn_var: bool,
    pub variadic: bool,
    pub max_fixed_arity: Option<usize>,
    pub method_params: Vec<Vec<Symbol>>,
}

/// Lexical environment threaded through analysis. Cloning is cheap and each
/// nested scope works on its own copy.
#[derive(Debug, Clone, Serialize)]
pub struct Env {
    pub ns: String,
    pub context: Context,
    #[serde(skip)]
    pub locals: im::HashMap<String, LocalBinding>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recur_name: Option<Symbol>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_impl: Option<Form>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_inline: Option<Form>,
}

impl Env {
    pub fn new(ns: impl Into<String>) -> Self {
        Self {
            ns: ns.into(),
            context: Context::Statement,
            locals: im::HashMap::new(),
            line: None,
            column: None,
            file: None,
            recur_name: None,
            protocol_impl: None,
            protocol_inline: None,
        }
    }

    pub fn with_context(&self, context: Context) -> Self {
        Env {
            context,
            ..self.clone()
        }
    }

    pub fn expr(&self) -> Self {
        self.with_context(Context::Expr)
    }

    pub fn statement(&self) -> Self {
        self.with_context(Context::Statement)
    }

    pub fn ret(&self) -> Self {
        self.with_context(Context::Return)
    }

    pub fn local(&self, name: &str) -> Option<&LocalBinding> {
        self.locals.get(name)
    }

    pub fn with_local(&self, binding: LocalBinding) -> Self {
        let mut env = self.clone();
        env.locals.insert(binding.name.name.clone(), binding);
        env
    }

    /// Takes line, column and file from the form's metadata when present.
    pub fn located_at(&self, form: &Form) -> Self {
        let mut env = self.clone();
        let number = |key: &str| match form.meta_get(key).map(|f| &f.kind) {
            Some(crate::form::FormKind::Int(n)) => u32::try_from(*n).ok(),
            _ => None,
        };
        if let Some(line) = number("line") {
            env.line = Some(line);
            env.column = number("column");
        }
        if let Some(file) = form.meta_get("file").and_then(Form::as_str) {
            env.file = Some(file.to_string());
        }
        env
    }
}

/// How a global or local reference was resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum VarRef {
    Local(LocalBinding),
    Global {
        ns: Option<String>,
        def: Option<VarDefinition>,
    },
    Js,
}

#[derive(Debug, Clone, Serialize)]
pub struct FnMethod {
    pub params: Vec<LocalBinding>,
    pub variadic: bool,
    pub fixed_arity: usize,
    /// Whether the body contains a `recur` to this method.
    pub recurs: bool,
    pub body: Box<Node>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Binding {
    pub local: LocalBinding,
    pub init: Node,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseClause {
    pub tests: Vec<Form>,
    pub then: Node,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProtocolImpl {
    pub protocol: Symbol,
    pub methods: Vec<(String, Node)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum DotKind {
    Field(String),
    Method(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JsCode {
    Raw(String),
    Segments(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NsClauses {
    pub excludes: BTreeSet<String>,
    pub uses: BTreeMap<String, String>,
    pub requires: BTreeMap<String, String>,
    pub requires_macros: BTreeMap<String, String>,
    pub use_macros: BTreeMap<String, String>,
    pub imports: BTreeMap<String, Symbol>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Op {
    Var {
        name: Symbol,
        info: VarRef,
    },
    Constant {
        value: Form,
    },
    Map {
        keys: Vec<Node>,
        vals: Vec<Node>,
        simple_keys: bool,
    },
    Vector {
        items: Vec<Node>,
    },
    Set {
        items: Vec<Node>,
    },
    Meta {
        expr: Box<Node>,
        meta: Box<Node>,
    },
    If {
        test: Box<Node>,
        then: Box<Node>,
        #[serde(rename = "else")]
        else_: Box<Node>,
        unchecked: bool,
    },
    Case {
        test: Box<Node>,
        clauses: Vec<CaseClause>,
        default: Option<Box<Node>>,
    },
    Throw {
        exception: Box<Node>,
    },
    Try {
        body: Box<Node>,
        catch_local: Option<LocalBinding>,
        catch: Option<Box<Node>>,
        finally: Option<Box<Node>>,
    },
    Def {
        name: Symbol,
        var: Box<Node>,
        doc: Option<String>,
        init: Option<Box<Node>>,
        dynamic: bool,
        export: Option<String>,
    },
    Fn {
        name: Option<LocalBinding>,
        /// Name of the var or local this fn initializes, when known.
        def_name: Option<String>,
        method: FnMethod,
        variadic: bool,
        max_fixed_arity: usize,
        loop_lets: Vec<LocalBinding>,
    },
    Do {
        statements: Vec<Node>,
        ret: Box<Node>,
    },
    /// `let*`, and `loop*` when `is_loop` is set.
    Let {
        is_loop: bool,
        bindings: Vec<Binding>,
        body: Box<Node>,
    },
    Letfn {
        bindings: Vec<Binding>,
        body: Box<Node>,
    },
    Recur {
        frame: Vec<LocalBinding>,
        exprs: Vec<Node>,
    },
    New {
        ctor: Box<Node>,
        args: Vec<Node>,
    },
    SetBang {
        target: Box<Node>,
        val: Box<Node>,
    },
    NoOp,
    Dot {
        target: Box<Node>,
        kind: DotKind,
        args: Vec<Node>,
    },
    Js {
        code: JsCode,
        args: Vec<Node>,
    },
    Ns {
        name: String,
        doc: Option<String>,
        clauses: NsClauses,
    },
    Deftype {
        name: Symbol,
        fields: Vec<Symbol>,
        pmasks: Option<Form>,
        protocols: BTreeSet<String>,
    },
    Defrecord {
        name: Symbol,
        fields: Vec<Symbol>,
        pmasks: Option<Form>,
        protocols: BTreeSet<String>,
    },
    Extend {
        etype: Symbol,
        primitive: bool,
        impls: Vec<ProtocolImpl>,
    },
    Invoke {
        f: Box<Node>,
        args: Vec<Node>,
    },
}

impl Op {
    pub fn name(&self) -> &'static str {
        match self {
            Op::Var { .. } => "var",
            Op::Constant { .. } => "constant",
            Op::Map { .. } => "map",
            Op::Vector { .. } => "vector",
            Op::Set { .. } => "set",
            Op::Meta { .. } => "meta",
            Op::If { .. } => "if",
            Op::Case { .. } => "case",
            Op::Throw { .. } => "throw",
            Op::Try { .. } => "try",
            Op::Def { .. } => "def",
            Op::Fn { .. } => "fn",
            Op::Do { .. } => "do",
            Op::Let { .. } => "let",
            Op::Letfn { .. } => "letfn",
            Op::Recur { .. } => "recur",
            Op::New { .. } => "new",
            Op::SetBang { .. } => "set!",
            Op::NoOp => "no-op",
            Op::Dot { .. } => "dot",
            Op::Js { .. } => "js",
            Op::Ns { .. } => "ns",
            Op::Deftype { .. } => "deftype",
            Op::Defrecord { .. } => "defrecord",
            Op::Extend { .. } => "extend",
            Op::Invoke { .. } => "invoke",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub env: Env,
    pub form: Form,
    pub tag: Option<String>,
    #[serde(flatten)]
    pub op: Op,
}

impl Node {
    pub fn new(env: &Env, form: &Form, op: Op) -> Self {
        Self {
            env: env.clone(),
            form: form.clone(),
            tag: None,
            op,
        }
    }

    pub fn with_tag(mut self, tag: Option<String>) -> Self {
        self.tag = tag;
        self
    }

    /// The immediate sub-nodes, in evaluation order.
    pub fn children(&self) -> Vec<&Node> {
        match &self.op {
            Op::Var { .. } | Op::Constant { .. } | Op::NoOp | Op::Ns { .. } => vec![],
            Op::Deftype { .. } | Op::Defrecord { .. } => vec![],
            Op::Map { keys, vals, .. } => keys.iter().zip(vals).flat_map(|(k, v)| [k, v]).collect(),
            Op::Vector { items } | Op::Set { items } => items.iter().collect(),
            Op::Meta { expr, meta } => vec![&**expr, &**meta],
            Op::If { test, then, else_, .. } => vec![&**test, &**then, &**else_],
            Op::Case {
                test,
                clauses,
                default,
            } => std::iter::once(&**test)
                .chain(clauses.iter().map(|c| &c.then))
                .chain(default.as_deref())
                .collect(),
            Op::Throw { exception } => vec![&**exception],
            Op::Try {
                body,
                catch,
                finally,
                ..
            } => std::iter::once(&**body)
                .chain(catch.as_deref())
                .chain(finally.as_deref())
                .collect(),
            Op::Def { var, init, .. } => std::iter::once(&**var).chain(init.as_deref()).collect(),
            Op::Fn { method, .. } => vec![&*method.body],
            Op::Do { statements, ret } => statements.iter().chain(std::iter::once(&**ret)).collect(),
            Op::Let { bindings, body, .. } | Op::Letfn { bindings, body } => bindings
                .iter()
                .map(|b| &b.init)
                .chain(std::iter::once(&**body))
                .collect(),
            Op::Recur { exprs, .. } => exprs.iter().collect(),
            Op::New { ctor, args } => std::iter::once(&**ctor).chain(args).collect(),
            Op::SetBang { target, val } => vec![&**target, &**val],
            Op::Dot { target, args, .. } => std::iter::once(&**target).chain(args).collect(),
            Op::Js { args, .. } => args.iter().collect(),
            Op::Extend { impls, .. } => impls
                .iter()
                .flat_map(|i| i.methods.iter().map(|(_, node)| node))
                .collect(),
            Op::Invoke { f, args } => std::iter::once(&**f).chain(args).collect(),
        }
    }

    /// Visits this node and then every descendant, depth first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Node)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WarningKind {
    UndeclaredVar,
    Redefinition,
    FnVarStale,
    DynamicNotDeclared,
    ArityMismatch,
    Deprecated,
    AliasReused,
    MalformedJs,
}

/// A non-fatal diagnostic raised during analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WARNING: {}", self.message)?;
        if let Some(file) = &self.file {
            write!(f, " in {file}")?;
        }
        if let Some(line) = self.line {
            write!(f, " at line {line}")?;
        }
        Ok(())
    }
}
