use std::fmt::{self, Display};
use std::rc::Rc;

/// A symbol with an optional namespace part.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol {
    pub ns: Option<String>,
    pub name: String,
}

impl Symbol {
    pub fn simple(name: impl Into<String>) -> Self {
        Symbol {
            ns: None,
            name: name.into(),
        }
    }

    pub fn qualified(ns: impl Into<String>, name: impl Into<String>) -> Self {
        Symbol {
            ns: Some(ns.into()),
            name: name.into(),
        }
    }

    /// Splits `ns/name` on the first slash. `/` on its own stays a simple symbol.
    pub fn parse(text: &str) -> Self {
        match text.find('/') {
            Some(idx) if idx > 0 && idx + 1 < text.len() => {
                Symbol::qualified(&text[..idx], &text[idx + 1..])
            }
            _ => Symbol::simple(text),
        }
    }

    pub fn is_simple(&self) -> bool {
        self.ns.is_none()
    }

    pub fn is(&self, name: &str) -> bool {
        self.ns.is_none() && self.name == name
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ns {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A keyword, printed with a leading colon.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Keyword {
    pub ns: Option<String>,
    pub name: String,
}

impl Keyword {
    pub fn simple(name: impl Into<String>) -> Self {
        Keyword {
            ns: None,
            name: name.into(),
        }
    }

    pub fn qualified(ns: impl Into<String>, name: impl Into<String>) -> Self {
        Keyword {
            ns: Some(ns.into()),
            name: name.into(),
        }
    }
}

impl Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ns {
            Some(ns) => write!(f, ":{}/{}", ns, self.name),
            None => write!(f, ":{}", self.name),
        }
    }
}

/// Metadata attached to a form. Shared by reference so that copies of a form
/// keep pointing at the same map.
pub type Meta = Rc<Vec<(Form, Form)>>;

/// A value produced by the reader.
///
/// Equality compares `kind` only: two forms that print the same are equal
/// whatever metadata they carry.
#[derive(Debug, Clone)]
pub struct Form {
    pub kind: FormKind,
    meta: Option<Meta>,
}

#[derive(Debug, Clone)]
pub enum FormKind {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Char(char),
    Str(String),
    Symbol(Symbol),
    Keyword(Keyword),
    List(Vec<Form>),
    Vector(Vec<Form>),
    Map(Vec<(Form, Form)>),
    Set(Vec<Form>),
    /// Opaque literal produced by a tag parser, e.g. `#uuid "..."`.
    Tagged { tag: Symbol, value: Box<Form> },
}

impl PartialEq for FormKind {
    fn eq(&self, other: &Self) -> bool {
        use FormKind::*;
        match (self, other) {
            (Nil, Nil) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (Str(a), Str(b)) => a == b,
            (Symbol(a), Symbol(b)) => a == b,
            (Keyword(a), Keyword(b)) => a == b,
            (List(a), List(b)) | (Vector(a), Vector(b)) => a == b,
            (Map(a), Map(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| {
                        b.iter()
                            .find(|(k2, _)| k2 == k)
                            .is_some_and(|(_, v2)| v2 == v)
                    })
            }
            (Set(a), Set(b)) => a.len() == b.len() && a.iter().all(|x| b.contains(x)),
            (
                Tagged {
                    tag: ta,
                    value: va,
                },
                Tagged {
                    tag: tb,
                    value: vb,
                },
            ) => ta == tb && va == vb,
            _ => false,
        }
    }
}

impl PartialEq for Form {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl From<FormKind> for Form {
    fn from(kind: FormKind) -> Self {
        Form { kind, meta: None }
    }
}

impl Form {
    pub fn nil() -> Form {
        FormKind::Nil.into()
    }

    pub fn bool(value: bool) -> Form {
        FormKind::Bool(value).into()
    }

    pub fn int(value: i64) -> Form {
        FormKind::Int(value).into()
    }

    pub fn float(value: f64) -> Form {
        FormKind::Float(value).into()
    }

    pub fn char(value: char) -> Form {
        FormKind::Char(value).into()
    }

    pub fn string(value: impl Into<String>) -> Form {
        FormKind::Str(value.into()).into()
    }

    pub fn symbol(sym: Symbol) -> Form {
        FormKind::Symbol(sym).into()
    }

    /// Shorthand for a symbol parsed from `ns/name` text.
    pub fn sym(text: &str) -> Form {
        Form::symbol(Symbol::parse(text))
    }

    pub fn keyword(kw: Keyword) -> Form {
        FormKind::Keyword(kw).into()
    }

    /// Shorthand for an unqualified keyword.
    pub fn kw(name: &str) -> Form {
        Form::keyword(Keyword::simple(name))
    }

    pub fn list(items: Vec<Form>) -> Form {
        FormKind::List(items).into()
    }

    pub fn vector(items: Vec<Form>) -> Form {
        FormKind::Vector(items).into()
    }

    pub fn map(entries: Vec<(Form, Form)>) -> Form {
        FormKind::Map(entries).into()
    }

    pub fn set(items: Vec<Form>) -> Form {
        FormKind::Set(items).into()
    }

    pub fn tagged(tag: Symbol, value: Form) -> Form {
        FormKind::Tagged {
            tag,
            value: Box::new(value),
        }
        .into()
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match &self.kind {
            FormKind::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_keyword(&self) -> Option<&Keyword> {
        match &self.kind {
            FormKind::Keyword(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            FormKind::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Form]> {
        match &self.kind {
            FormKind::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[Form]> {
        match &self.kind {
            FormKind::Vector(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Form, Form)]> {
        match &self.kind {
            FormKind::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&[Form]> {
        match &self.kind {
            FormKind::Set(items) => Some(items),
            _ => None,
        }
    }

    /// Elements of a list or vector.
    pub fn as_sequential(&self) -> Option<&[Form]> {
        match &self.kind {
            FormKind::List(items) | FormKind::Vector(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self.kind, FormKind::Nil)
    }

    pub fn is_symbol_named(&self, name: &str) -> bool {
        self.as_symbol().is_some_and(|s| s.is(name))
    }

    /// `nil` and `false` are the only falsey forms.
    pub fn is_truthy(&self) -> bool {
        !matches!(self.kind, FormKind::Nil | FormKind::Bool(false))
    }

    /// Symbols and collections carry metadata; scalars do not.
    pub fn supports_meta(&self) -> bool {
        matches!(
            self.kind,
            FormKind::Symbol(_)
                | FormKind::List(_)
                | FormKind::Vector(_)
                | FormKind::Map(_)
                | FormKind::Set(_)
        )
    }

    pub fn meta(&self) -> Option<&[(Form, Form)]> {
        self.meta.as_deref().map(Vec::as_slice)
    }

    pub fn meta_rc(&self) -> Option<&Meta> {
        self.meta.as_ref()
    }

    pub fn with_meta(mut self, meta: Option<Meta>) -> Form {
        self.meta = meta.filter(|m| !m.is_empty());
        self
    }

    /// Returns a copy whose metadata is the existing map updated with `entries`.
    pub fn merge_meta(self, entries: Vec<(Form, Form)>) -> Form {
        let mut merged: Vec<(Form, Form)> = self.meta().map(<[_]>::to_vec).unwrap_or_default();
        for (k, v) in entries {
            match merged.iter_mut().find(|(existing, _)| *existing == k) {
                Some(slot) => slot.1 = v,
                None => merged.push((k, v)),
            }
        }
        self.with_meta(Some(Rc::new(merged)))
    }

    /// Looks up an unqualified (`"tag"`) or qualified (`"ns/name"`) keyword key.
    pub fn meta_get(&self, key: &str) -> Option<&Form> {
        let key = keyword_key(key);
        self.meta()?
            .iter()
            .find(|(k, _)| k.as_keyword() == Some(&key))
            .map(|(_, v)| v)
    }

    pub fn meta_flag(&self, key: &str) -> bool {
        self.meta_get(key).is_some_and(Form::is_truthy)
    }

    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            FormKind::Nil => "nil",
            FormKind::Bool(_) => "boolean",
            FormKind::Int(_) | FormKind::Float(_) => "number",
            FormKind::Char(_) => "character",
            FormKind::Str(_) => "string",
            FormKind::Symbol(_) => "symbol",
            FormKind::Keyword(_) => "keyword",
            FormKind::List(_) => "list",
            FormKind::Vector(_) => "vector",
            FormKind::Map(_) => "map",
            FormKind::Set(_) => "set",
            FormKind::Tagged { .. } => "tagged literal",
        }
    }
}

fn keyword_key(key: &str) -> Keyword {
    match key.find('/') {
        Some(idx) if idx > 0 => Keyword::qualified(&key[..idx], &key[idx + 1..]),
        _ => Keyword::simple(key),
    }
}

/// Name of a character when it is printed or read as `\name`.
pub(crate) fn char_name(c: char) -> Option<&'static str> {
    match c {
        ' ' => Some("space"),
        '\t' => Some("tab"),
        '\n' => Some("newline"),
        '\r' => Some("return"),
        '\u{8}' => Some("backspace"),
        '\u{c}' => Some("formfeed"),
        _ => None,
    }
}

fn write_string_literal(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            '\u{8}' => f.write_str("\\b")?,
            '\u{c}' => f.write_str("\\f")?,
            c if c.is_control() => write!(f, "\\u{:04x}", c as u32)?,
            c => write!(f, "{c}")?,
        }
    }
    f.write_str("\"")
}

fn write_seq(f: &mut fmt::Formatter<'_>, open: &str, items: &[Form], close: &str) -> fmt::Result {
    f.write_str(open)?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{item}")?;
    }
    f.write_str(close)
}

impl Display for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FormKind::Nil => f.write_str("nil"),
            FormKind::Bool(b) => write!(f, "{b}"),
            FormKind::Int(i) => write!(f, "{i}"),
            FormKind::Float(x) => write!(f, "{x:?}"),
            FormKind::Char(c) => match char_name(*c) {
                Some(name) => write!(f, "\\{name}"),
                None if c.is_control() => write!(f, "\\u{:04x}", *c as u32),
                None => write!(f, "\\{c}"),
            },
            FormKind::Str(s) => write_string_literal(f, s),
            FormKind::Symbol(s) => write!(f, "{s}"),
            FormKind::Keyword(k) => write!(f, "{k}"),
            FormKind::List(items) => write_seq(f, "(", items, ")"),
            FormKind::Vector(items) => write_seq(f, "[", items, "]"),
            FormKind::Set(items) => write_seq(f, "#{", items, "}"),
            FormKind::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k} {v}")?;
                }
                f.write_str("}")
            }
            FormKind::Tagged { tag, value } => write!(f, "#{tag} {value}"),
        }
    }
}
