use crate::error::{Position, ReaderError};
use crate::form::{char_name, Form, FormKind, Keyword, Symbol};
use crate::stream::{LineNumberingPushbackStream, PushbackStream, StringPushbackStream};
use crate::syntax_quote;
use crate::tags::TagRegistry;
use crate::utils::next_id;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Namespace recorded on `::kw` keywords read without a namespace context.
/// The analyzer rewrites it to the namespace being analyzed.
pub const READER_NS_PLACEHOLDER: &str = "cinder.reader.current-ns";

static INT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([-+]?)(?:(0)|([1-9][0-9]*)|0[xX]([0-9A-Fa-f]+)|0([0-7]+)|([1-9][0-9]?)[rR]([0-9A-Za-z]+))(N)?$")
        .expect("int pattern is valid")
});

static RATIO_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([-+]?[0-9]+)/([0-9]+)$").expect("ratio pattern is valid"));

static FLOAT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([-+]?[0-9]+(\.[0-9]*)?([eE][-+]?[0-9]+)?)(M)?$").expect("float pattern is valid")
});

/// Namespace context used to resolve `::kw` keywords and syntax-quoted symbols.
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderNamespace {
    pub name: String,
    /// alias -> namespace
    pub aliases: HashMap<String, String>,
    /// unqualified symbol -> namespace it is referred from
    pub referred: HashMap<String, String>,
}

impl ReaderNamespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: HashMap::new(),
            referred: HashMap::new(),
        }
    }
}

impl Default for ReaderNamespace {
    fn default() -> Self {
        Self::new(READER_NS_PLACEHOLDER)
    }
}

type MacroReader =
    fn(&mut Reader, &mut dyn PushbackStream, char) -> Result<Option<Form>, ReaderError>;

fn macro_for(ch: char) -> Option<MacroReader> {
    let f: MacroReader = match ch {
        '"' => Reader::read_string_literal,
        ':' => Reader::read_keyword,
        ';' => Reader::read_comment,
        '\'' => Reader::read_quote,
        '@' => Reader::read_deref,
        '^' => Reader::read_meta,
        '`' => Reader::read_syntax_quote,
        '~' => Reader::read_unquote,
        '(' => Reader::read_list,
        ')' | ']' | '}' => Reader::read_unmatched_delimiter,
        '[' => Reader::read_vector,
        '{' => Reader::read_map,
        '\\' => Reader::read_char_literal,
        '%' => Reader::read_arg,
        '#' => Reader::read_dispatch,
        _ => return None,
    };
    Some(f)
}

fn is_whitespace(ch: char) -> bool {
    ch == ',' || ch.is_whitespace()
}

fn is_terminating(ch: char) -> bool {
    ch != '#' && ch != '\'' && ch != ':' && macro_for(ch).is_some()
}

/// Parses text into forms.
///
/// The reader owns every piece of state that a read depends on besides the
/// stream: the tag registry, the namespace context, and the argument registry
/// of the `#(...)` literal currently being read.
#[derive(Debug, Clone)]
pub struct Reader {
    tags: TagRegistry,
    namespace: ReaderNamespace,
    arg_env: Option<BTreeMap<i64, Symbol>>,
}

impl Default for Reader {
    fn default() -> Self {
        Self::new()
    }
}

impl Reader {
    pub fn new() -> Self {
        Self::with_tags(TagRegistry::with_builtins())
    }

    pub fn with_tags(tags: TagRegistry) -> Self {
        Self {
            tags,
            namespace: ReaderNamespace::default(),
            arg_env: None,
        }
    }

    pub fn tags(&self) -> &TagRegistry {
        &self.tags
    }

    pub fn tags_mut(&mut self) -> &mut TagRegistry {
        &mut self.tags
    }

    pub fn namespace(&self) -> &ReaderNamespace {
        &self.namespace
    }

    pub fn set_namespace(&mut self, namespace: ReaderNamespace) {
        self.namespace = namespace;
    }

    /// Reads one form. At end of stream, fails when `eof_is_error` is set and
    /// returns `eof_sentinel` otherwise.
    pub fn read(
        &mut self,
        stream: &mut dyn PushbackStream,
        eof_is_error: bool,
        eof_sentinel: Form,
    ) -> Result<Form, ReaderError> {
        Ok(self
            .read_next(stream, eof_is_error)?
            .unwrap_or(eof_sentinel))
    }

    /// Reads one form, or `None` at end of stream.
    pub fn read_form(&mut self, stream: &mut dyn PushbackStream) -> Result<Option<Form>, ReaderError> {
        self.read_next(stream, false)
    }

    fn read_next(
        &mut self,
        s: &mut dyn PushbackStream,
        eof_is_error: bool,
    ) -> Result<Option<Form>, ReaderError> {
        loop {
            let start = s.position();
            let ch = match s.read_char()? {
                Some(ch) => ch,
                None if eof_is_error => return Err(ReaderError::Eof { pos: s.position() }),
                None => return Ok(None),
            };
            if is_whitespace(ch) {
                continue;
            }
            let result = if let Some(macro_reader) = macro_for(ch) {
                macro_reader(self, s, ch)?
            } else if self.is_number_literal(s, ch)? {
                Some(self.read_number(s, ch)?)
            } else {
                Some(self.read_symbol(s, ch)?)
            };
            if let Some(form) = result {
                return Ok(Some(attach_position(s, form, start)));
            }
        }
    }

    /// Reads a form that must be present.
    fn read_required(&mut self, s: &mut dyn PushbackStream) -> Result<Form, ReaderError> {
        match self.read_next(s, true)? {
            Some(form) => Ok(form),
            None => Err(ReaderError::Eof { pos: s.position() }),
        }
    }

    fn read_token(&mut self, s: &mut dyn PushbackStream, initch: char) -> Result<String, ReaderError> {
        let mut token = String::from(initch);
        loop {
            match s.read_char()? {
                None => return Ok(token),
                Some(ch) if is_whitespace(ch) || is_terminating(ch) => {
                    s.unread(ch);
                    return Ok(token);
                }
                Some(ch) => token.push(ch),
            }
        }
    }

    fn read_delimited(
        &mut self,
        s: &mut dyn PushbackStream,
        delim: char,
    ) -> Result<Vec<Form>, ReaderError> {
        let mut items = Vec::new();
        loop {
            let start = s.position();
            let ch = match s.read_char()? {
                Some(ch) => ch,
                None => return Err(ReaderError::Eof { pos: s.position() }),
            };
            if is_whitespace(ch) {
                continue;
            }
            if ch == delim {
                return Ok(items);
            }
            if let Some(macro_reader) = macro_for(ch) {
                if let Some(form) = macro_reader(self, s, ch)? {
                    items.push(attach_position(s, form, start));
                }
            } else {
                s.unread(ch);
                if let Some(form) = self.read_next(s, true)? {
                    items.push(form);
                }
            }
        }
    }

    fn is_number_literal(&mut self, s: &mut dyn PushbackStream, ch: char) -> Result<bool, ReaderError> {
        if ch.is_ascii_digit() {
            return Ok(true);
        }
        if ch == '+' || ch == '-' {
            if let Some(next) = s.read_char()? {
                s.unread(next);
                return Ok(next.is_ascii_digit());
            }
        }
        Ok(false)
    }

    fn read_number(&mut self, s: &mut dyn PushbackStream, initch: char) -> Result<Form, ReaderError> {
        let mut token = String::from(initch);
        loop {
            match s.read_char()? {
                Some(ch) if !is_whitespace(ch) && macro_for(ch).is_none() => token.push(ch),
                Some(ch) => {
                    s.unread(ch);
                    break;
                }
                None => break,
            }
        }
        match_number(&token).ok_or_else(|| ReaderError::InvalidNumber {
            token,
            pos: s.position(),
        })
    }

    fn read_symbol(&mut self, s: &mut dyn PushbackStream, initch: char) -> Result<Form, ReaderError> {
        let token = self.read_token(s, initch)?;
        match token.as_str() {
            "nil" => Ok(Form::nil()),
            "true" => Ok(Form::bool(true)),
            "false" => Ok(Form::bool(false)),
            _ => parse_symbol(&token)
                .map(Form::symbol)
                .ok_or_else(|| ReaderError::InvalidToken {
                    token,
                    pos: s.position(),
                }),
        }
    }

    fn read_keyword(&mut self, s: &mut dyn PushbackStream, _: char) -> Result<Option<Form>, ReaderError> {
        let invalid = |token: String, s: &dyn PushbackStream| ReaderError::InvalidToken {
            token: format!(":{token}"),
            pos: s.position(),
        };
        let ch = match s.read_char()? {
            Some(ch) if is_whitespace(ch) || is_terminating(ch) => {
                s.unread(ch);
                return Err(invalid(String::new(), s));
            }
            Some(ch) => ch,
            None => return Err(ReaderError::Eof { pos: s.position() }),
        };
        let token = self.read_token(s, ch)?;
        let (auto_resolve, body) = match token.strip_prefix(':') {
            Some(rest) => (true, rest),
            None => (false, token.as_str()),
        };
        if body.is_empty() || body.starts_with(':') {
            return Err(invalid(token.clone(), s));
        }
        let sym = match parse_symbol(body) {
            Some(sym) if sym.name != "/" || sym.ns.is_some() => sym,
            _ => return Err(invalid(token.clone(), s)),
        };
        let keyword = match (auto_resolve, sym.ns) {
            (false, ns) => Keyword { ns, name: sym.name },
            (true, None) => Keyword::qualified(self.namespace.name.clone(), sym.name),
            (true, Some(alias)) => match self.namespace.aliases.get(&alias) {
                Some(target) => Keyword::qualified(target.clone(), sym.name),
                None => return Err(invalid(token.clone(), s)),
            },
        };
        Ok(Some(Form::keyword(keyword)))
    }

    fn read_string_literal(
        &mut self,
        s: &mut dyn PushbackStream,
        _: char,
    ) -> Result<Option<Form>, ReaderError> {
        let mut buffer = String::new();
        loop {
            match s.read_char()? {
                None => return Err(ReaderError::Eof { pos: s.position() }),
                Some('"') => return Ok(Some(Form::string(buffer))),
                Some('\\') => buffer.push(self.read_escape(s)?),
                Some(ch) => buffer.push(ch),
            }
        }
    }

    fn read_escape(&mut self, s: &mut dyn PushbackStream) -> Result<char, ReaderError> {
        let ch = s
            .read_char()?
            .ok_or_else(|| ReaderError::Eof { pos: s.position() })?;
        match ch {
            't' => Ok('\t'),
            'r' => Ok('\r'),
            'n' => Ok('\n'),
            '\\' => Ok('\\'),
            '"' => Ok('"'),
            'b' => Ok('\u{8}'),
            'f' => Ok('\u{c}'),
            'u' => self.read_unicode_escape(s, 'u', 4),
            'x' => self.read_unicode_escape(s, 'x', 2),
            d if d.is_ascii_digit() => Ok(char::from(d as u8 - b'0')),
            other => Err(ReaderError::UnsupportedEscape {
                escape: other.to_string(),
                pos: s.position(),
            }),
        }
    }

    fn read_unicode_escape(
        &mut self,
        s: &mut dyn PushbackStream,
        kind: char,
        width: usize,
    ) -> Result<char, ReaderError> {
        let mut digits = String::with_capacity(width);
        for _ in 0..width {
            match s.read_char()? {
                Some(ch) if ch.is_ascii_hexdigit() => digits.push(ch),
                Some(ch) => {
                    digits.push(ch);
                    return Err(ReaderError::UnsupportedEscape {
                        escape: format!("{kind}{digits}"),
                        pos: s.position(),
                    });
                }
                None => return Err(ReaderError::Eof { pos: s.position() }),
            }
        }
        u32::from_str_radix(&digits, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| ReaderError::UnsupportedEscape {
                escape: format!("{kind}{digits}"),
                pos: s.position(),
            })
    }

    fn read_char_literal(&mut self, s: &mut dyn PushbackStream, _: char) -> Result<Option<Form>, ReaderError> {
        let ch = s
            .read_char()?
            .ok_or_else(|| ReaderError::Eof { pos: s.position() })?;
        let token = self.read_token(s, ch)?;
        if token.chars().count() == 1 {
            return Ok(Some(Form::char(ch)));
        }
        let named = [' ', '\t', '\n', '\r', '\u{8}', '\u{c}']
            .into_iter()
            .find(|c| char_name(*c) == Some(token.as_str()));
        if let Some(c) = named {
            return Ok(Some(Form::char(c)));
        }
        if let Some(hex) = token.strip_prefix('u') {
            if hex.len() == 4 {
                if let Some(c) = u32::from_str_radix(hex, 16).ok().and_then(char::from_u32) {
                    return Ok(Some(Form::char(c)));
                }
            }
        }
        Err(ReaderError::UnknownCharacter {
            token,
            pos: s.position(),
        })
    }

    fn read_comment(&mut self, s: &mut dyn PushbackStream, _: char) -> Result<Option<Form>, ReaderError> {
        while let Some(ch) = s.read_char()? {
            if ch == '\n' || ch == '\r' {
                break;
            }
        }
        Ok(None)
    }

    fn wrap_next(&mut self, s: &mut dyn PushbackStream, head: &str) -> Result<Option<Form>, ReaderError> {
        let form = self.read_required(s)?;
        Ok(Some(Form::list(vec![Form::sym(head), form])))
    }

    fn read_quote(&mut self, s: &mut dyn PushbackStream, _: char) -> Result<Option<Form>, ReaderError> {
        self.wrap_next(s, "quote")
    }

    fn read_deref(&mut self, s: &mut dyn PushbackStream, _: char) -> Result<Option<Form>, ReaderError> {
        self.wrap_next(s, "deref")
    }

    fn read_unquote(&mut self, s: &mut dyn PushbackStream, _: char) -> Result<Option<Form>, ReaderError> {
        match s.read_char()? {
            Some('@') => self.wrap_next(s, "unquote-splicing"),
            Some(ch) => {
                s.unread(ch);
                self.wrap_next(s, "unquote")
            }
            None => Err(ReaderError::Eof { pos: s.position() }),
        }
    }

    fn read_syntax_quote(&mut self, s: &mut dyn PushbackStream, _: char) -> Result<Option<Form>, ReaderError> {
        let form = self.read_required(s)?;
        let mut gensyms = HashMap::new();
        syntax_quote::expand(&form, &self.namespace, &mut gensyms)
            .map(Some)
            .map_err(|message| ReaderError::syntax(message, s.position()))
    }

    fn read_meta(&mut self, s: &mut dyn PushbackStream, _: char) -> Result<Option<Form>, ReaderError> {
        let meta = self.read_required(s)?;
        let entries = match &meta.kind {
            FormKind::Symbol(_) | FormKind::Str(_) => vec![(Form::kw("tag"), meta.clone())],
            FormKind::Keyword(_) => vec![(meta.clone(), Form::bool(true))],
            FormKind::Map(entries) => entries.clone(),
            _ => {
                return Err(ReaderError::InvalidMeta {
                    message: "Metadata must be Symbol, Keyword, String or Map".to_string(),
                    pos: s.position(),
                })
            }
        };
        let target = self.read_required(s)?;
        if !target.supports_meta() {
            return Err(ReaderError::InvalidMeta {
                message: format!(
                    "Metadata can only be applied to symbols and collections, not a {}",
                    target.type_name()
                ),
                pos: s.position(),
            });
        }
        Ok(Some(target.merge_meta(entries)))
    }

    fn read_list(&mut self, s: &mut dyn PushbackStream, _: char) -> Result<Option<Form>, ReaderError> {
        Ok(Some(Form::list(self.read_delimited(s, ')')?)))
    }

    fn read_vector(&mut self, s: &mut dyn PushbackStream, _: char) -> Result<Option<Form>, ReaderError> {
        Ok(Some(Form::vector(self.read_delimited(s, ']')?)))
    }

    fn read_map(&mut self, s: &mut dyn PushbackStream, _: char) -> Result<Option<Form>, ReaderError> {
        let items = self.read_delimited(s, '}')?;
        if items.len() % 2 != 0 {
            return Err(ReaderError::OddMapLiteral { pos: s.position() });
        }
        let mut entries: Vec<(Form, Form)> = Vec::with_capacity(items.len() / 2);
        let mut items = items.into_iter();
        while let (Some(k), Some(v)) = (items.next(), items.next()) {
            if entries.iter().any(|(existing, _)| *existing == k) {
                return Err(ReaderError::DuplicateKey {
                    key: k.to_string(),
                    pos: s.position(),
                });
            }
            entries.push((k, v));
        }
        Ok(Some(Form::map(entries)))
    }

    fn read_set(&mut self, s: &mut dyn PushbackStream) -> Result<Option<Form>, ReaderError> {
        let items = self.read_delimited(s, '}')?;
        for (i, item) in items.iter().enumerate() {
            if items[..i].contains(item) {
                return Err(ReaderError::DuplicateKey {
                    key: item.to_string(),
                    pos: s.position(),
                });
            }
        }
        Ok(Some(Form::set(items)))
    }

    fn read_unmatched_delimiter(
        &mut self,
        s: &mut dyn PushbackStream,
        ch: char,
    ) -> Result<Option<Form>, ReaderError> {
        Err(ReaderError::UnmatchedDelimiter {
            delimiter: ch,
            pos: s.position(),
        })
    }

    fn read_arg(&mut self, s: &mut dyn PushbackStream, ch: char) -> Result<Option<Form>, ReaderError> {
        if self.arg_env.is_none() {
            return self.read_symbol(s, ch).map(Some);
        }
        let next = s.read_char()?;
        let index = match next {
            None => 1,
            Some(c) if is_whitespace(c) || is_terminating(c) => {
                s.unread(c);
                1
            }
            Some(c) => {
                s.unread(c);
                let n = self.read_required(s)?;
                match &n.kind {
                    FormKind::Symbol(sym) if sym.is("&") => -1,
                    FormKind::Int(i) if *i >= 1 => *i,
                    _ => {
                        return Err(ReaderError::syntax(
                            "arg literal must be %, %& or %integer",
                            s.position(),
                        ))
                    }
                }
            }
        };
        Ok(Some(Form::symbol(self.register_arg(index))))
    }

    fn register_arg(&mut self, index: i64) -> Symbol {
        let env = self.arg_env.get_or_insert_with(BTreeMap::new);
        env.entry(index).or_insert_with(|| arg_symbol(index)).clone()
    }

    fn read_fn(&mut self, s: &mut dyn PushbackStream) -> Result<Option<Form>, ReaderError> {
        if self.arg_env.is_some() {
            return Err(ReaderError::syntax("Nested #()s are not allowed", s.position()));
        }
        self.arg_env = Some(BTreeMap::new());
        s.unread('(');
        let body = self.read_required(s);
        let args = self.arg_env.take().unwrap_or_default();
        let body = body?;

        let max = args.keys().copied().filter(|i| *i > 0).max().unwrap_or(0);
        let mut params: Vec<Form> = (1..=max)
            .map(|i| Form::symbol(args.get(&i).cloned().unwrap_or_else(|| arg_symbol(i))))
            .collect();
        if let Some(rest) = args.get(&-1) {
            params.push(Form::sym("&"));
            params.push(Form::symbol(rest.clone()));
        }
        Ok(Some(Form::list(vec![
            Form::sym("fn*"),
            Form::vector(params),
            body,
        ])))
    }

    fn read_regex(&mut self, s: &mut dyn PushbackStream) -> Result<Option<Form>, ReaderError> {
        let mut pattern = String::new();
        loop {
            match s.read_char()? {
                None => return Err(ReaderError::Eof { pos: s.position() }),
                Some('"') => break,
                Some('\\') => {
                    pattern.push('\\');
                    match s.read_char()? {
                        Some(ch) => pattern.push(ch),
                        None => return Err(ReaderError::Eof { pos: s.position() }),
                    }
                }
                Some(ch) => pattern.push(ch),
            }
        }
        Ok(Some(Form::list(vec![
            Form::sym("re-pattern"),
            Form::string(pattern),
        ])))
    }

    fn read_dispatch(&mut self, s: &mut dyn PushbackStream, _: char) -> Result<Option<Form>, ReaderError> {
        let pos = s.position();
        let ch = s
            .read_char()?
            .ok_or_else(|| ReaderError::Eof { pos: s.position() })?;
        match ch {
            '{' => self.read_set(s),
            '"' => self.read_regex(s),
            '!' => self.read_comment(s, ch),
            '_' => {
                self.read_required(s)?;
                Ok(None)
            }
            '(' => self.read_fn(s),
            '<' => Err(ReaderError::syntax("Unreadable form", s.position())),
            _ => self.read_tagged(s, ch, pos),
        }
    }

    fn read_tagged(
        &mut self,
        s: &mut dyn PushbackStream,
        ch: char,
        pos: Position,
    ) -> Result<Option<Form>, ReaderError> {
        if is_whitespace(ch) || macro_for(ch).is_some() || ch.is_ascii_digit() {
            return Err(ReaderError::syntax(
                format!("No dispatch macro for {ch}"),
                s.position(),
            ));
        }
        let tag = match self.read_symbol(s, ch)?.kind {
            FormKind::Symbol(sym) => sym,
            other => {
                return Err(ReaderError::syntax(
                    format!("Reader tag must be a symbol, got {}", Form::from(other)),
                    s.position(),
                ))
            }
        };
        let value = self.read_required(s)?;
        self.tags.parse(&tag.to_string(), value, pos).map(Some)
    }
}

fn arg_symbol(index: i64) -> Symbol {
    let prefix = if index == -1 {
        "rest".to_string()
    } else {
        format!("p{index}")
    };
    Symbol::simple(format!("{prefix}__{}#", next_id()))
}

fn attach_position(s: &dyn PushbackStream, form: Form, start: Position) -> Form {
    if !s.is_positioned() || !form.supports_meta() || form.meta_get("line").is_some() {
        return form;
    }
    let mut entries = Vec::with_capacity(3);
    if let Some(line) = start.line {
        entries.push((Form::kw("line"), Form::int(i64::from(line))));
    }
    if let Some(column) = start.column {
        entries.push((Form::kw("column"), Form::int(i64::from(column))));
    }
    if let Some(name) = s.source_name() {
        entries.push((Form::kw("file"), Form::string(name)));
    }
    form.merge_meta(entries)
}

/// Interprets a symbol token, splitting on a single `/`.
fn parse_symbol(token: &str) -> Option<Symbol> {
    if token == "/" {
        return Some(Symbol::simple("/"));
    }
    let inner_double_colon = token
        .char_indices()
        .skip(1)
        .any(|(i, _)| token[i..].starts_with("::"));
    if token.ends_with(':') || inner_double_colon {
        return None;
    }
    match token.matches('/').count() {
        0 => Some(Symbol::simple(token)),
        1 => {
            let idx = token.find('/')?;
            let (ns, name) = (&token[..idx], &token[idx + 1..]);
            if ns.is_empty() || name.is_empty() {
                None
            } else {
                Some(Symbol::qualified(ns, name))
            }
        }
        2 if token.len() > 2 && token.ends_with("//") => {
            Some(Symbol::qualified(&token[..token.len() - 2], "/"))
        }
        _ => None,
    }
}

fn radix_value(digits: &str, radix: u32) -> Option<Form> {
    match i64::from_str_radix(digits, radix) {
        Ok(n) => Some(Form::int(n)),
        Err(_) => {
            let mut acc = 0f64;
            for d in digits.chars() {
                acc = acc * f64::from(radix) + f64::from(d.to_digit(radix)?);
            }
            Some(Form::float(acc))
        }
    }
}

fn negate(form: Form) -> Form {
    match form.kind {
        FormKind::Int(n) => Form::int(-n),
        FormKind::Float(x) => Form::float(-x),
        _ => form,
    }
}

fn match_number(token: &str) -> Option<Form> {
    if let Some(caps) = INT_PATTERN.captures(token) {
        let negative = caps.get(1).is_some_and(|m| m.as_str() == "-");
        let value = if caps.get(2).is_some() {
            Form::int(0)
        } else if let Some(m) = caps.get(3) {
            radix_value(m.as_str(), 10)?
        } else if let Some(m) = caps.get(4) {
            radix_value(m.as_str(), 16)?
        } else if let Some(m) = caps.get(5) {
            radix_value(m.as_str(), 8)?
        } else {
            let radix: u32 = caps.get(6)?.as_str().parse().ok()?;
            if !(2..=36).contains(&radix) {
                return None;
            }
            radix_value(caps.get(7)?.as_str(), radix)?
        };
        return Some(if negative { negate(value) } else { value });
    }
    if let Some(caps) = RATIO_PATTERN.captures(token) {
        let numerator: f64 = caps.get(1)?.as_str().parse().ok()?;
        let denominator: f64 = caps.get(2)?.as_str().parse().ok()?;
        if denominator == 0.0 {
            return None;
        }
        return Some(Form::float(numerator / denominator));
    }
    if let Some(caps) = FLOAT_PATTERN.captures(token) {
        return caps.get(1)?.as_str().parse().ok().map(Form::float);
    }
    None
}

/// Lazily reads top-level forms from a stream until end of stream, then drops
/// the stream. The sequence ends after the first error.
pub struct FormSeq<S> {
    reader: Reader,
    stream: Option<S>,
}

impl<S: PushbackStream> FormSeq<S> {
    pub fn new(reader: Reader, stream: S) -> Self {
        Self {
            reader,
            stream: Some(stream),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}

impl<S: PushbackStream> Iterator for FormSeq<S> {
    type Item = Result<Form, ReaderError>;

    fn next(&mut self) -> Option<Self::Item> {
        let stream = self.stream.as_mut()?;
        match self.reader.read_form(stream) {
            Ok(Some(form)) => Some(Ok(form)),
            Ok(None) => {
                self.stream = None;
                None
            }
            Err(err) => {
                self.stream = None;
                Some(Err(err))
            }
        }
    }
}

/// Opens `path` and reads its forms lazily, with line/column metadata.
pub fn read_file(
    path: &Path,
    reader: Reader,
) -> Result<FormSeq<LineNumberingPushbackStream<BufReader<File>>>, ReaderError> {
    let file = File::open(path)?;
    let stream = LineNumberingPushbackStream::new(BufReader::new(file))
        .with_name(path.to_string_lossy().to_string());
    Ok(FormSeq::new(reader, stream))
}

/// Reads the first form of `source`. Fails on empty input.
pub fn read_string(source: &str) -> Result<Form, ReaderError> {
    let mut stream = StringPushbackStream::new(source);
    Reader::new().read(&mut stream, true, Form::nil())
}

/// Reads every form of `source`, with line/column metadata.
pub fn read_all_str(source: &str) -> Result<Vec<Form>, ReaderError> {
    let stream = LineNumberingPushbackStream::new(std::io::Cursor::new(source.as_bytes()));
    FormSeq::new(Reader::new(), stream).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_number() {
        assert_eq!(match_number("42"), Some(Form::int(42)));
        assert_eq!(match_number("-0x1F"), Some(Form::int(-31)));
        assert_eq!(match_number("017"), Some(Form::int(15)));
        assert_eq!(match_number("2r1010"), Some(Form::int(10)));
        assert_eq!(match_number("7N"), Some(Form::int(7)));
        assert_eq!(match_number("1/4"), Some(Form::float(0.25)));
        assert_eq!(match_number("1.5e3"), Some(Form::float(1500.0)));
        assert_eq!(match_number("2.5M"), Some(Form::float(2.5)));
        assert_eq!(
            match_number("99999999999999999999"),
            Some(Form::float(1e20))
        );
        assert_eq!(match_number("09"), None);
        assert_eq!(match_number("1a"), None);
        assert_eq!(match_number("40r1"), None);
    }

    #[test]
    fn test_parse_symbol() {
        assert_eq!(parse_symbol("a/b"), Some(Symbol::qualified("a", "b")));
        assert_eq!(parse_symbol("cinder.core//"), Some(Symbol::qualified("cinder.core", "/")));
        assert_eq!(parse_symbol("a/b/c"), None);
        assert_eq!(parse_symbol("a/"), None);
        assert_eq!(parse_symbol("foo:"), None);
        assert_eq!(parse_symbol("a::b"), None);
    }

    #[test]
    fn test_terminating_characters() {
        assert!(is_terminating(')'));
        assert!(is_terminating(';'));
        assert!(!is_terminating('#'));
        assert!(!is_terminating('\''));
        assert!(!is_terminating(':'));
        assert!(!is_terminating('a'));
    }

    #[test]
    fn test_form_seq_closes_stream_at_eof() {
        let mut seq = FormSeq::new(Reader::new(), StringPushbackStream::new("1 2"));
        assert_eq!(seq.next().unwrap().unwrap(), Form::int(1));
        assert_eq!(seq.next().unwrap().unwrap(), Form::int(2));
        assert!(seq.next().is_none());
        assert!(seq.is_closed());
        assert!(seq.next().is_none());
    }
}
