use crate::error::{Position, ReaderError};
use crate::form::{Form, FormKind, Symbol};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Transform applied to the form following `#tag`.
pub type TagParser = Rc<dyn Fn(Form) -> Result<Form, ReaderError>>;

/// Fallback invoked with `(tag, form)` when no specific parser is registered.
pub type DefaultTagParser = Rc<dyn Fn(&str, Form) -> Result<Form, ReaderError>>;

static INST_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\d{4})(?:-(\d{2})(?:-(\d{2})(?:T(\d{2})(?::(\d{2})(?::(\d{2})(?:\.(\d+))?)?)?)?)?)?(?:Z|([-+])(\d{2}):(\d{2}))?$",
    )
    .expect("inst pattern is valid")
});

static UUID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("uuid pattern is valid")
});

/// Registry of `#tag` literal parsers consulted by the reader's dispatch macro.
#[derive(Clone, Default)]
pub struct TagRegistry {
    parsers: HashMap<String, TagParser>,
    default: Option<DefaultTagParser>,
}

impl fmt::Debug for TagRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagRegistry")
            .field("tags", &self.known_tags())
            .field("default", &self.default.is_some())
            .finish()
    }
}

impl TagRegistry {
    /// An empty registry: every tag is unknown.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry seeded with `#inst`, `#uuid` and `#queue`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_tag_parser("inst", Rc::new(read_inst));
        registry.register_tag_parser("uuid", Rc::new(read_uuid));
        registry.register_tag_parser("queue", Rc::new(read_queue));
        registry
    }

    /// Installs `parser` for `tag`, returning whatever was registered before.
    pub fn register_tag_parser(
        &mut self,
        tag: impl Into<String>,
        parser: TagParser,
    ) -> Option<TagParser> {
        self.parsers.insert(tag.into(), parser)
    }

    pub fn deregister_tag_parser(&mut self, tag: &str) -> Option<TagParser> {
        self.parsers.remove(tag)
    }

    pub fn register_default_tag_parser(
        &mut self,
        parser: DefaultTagParser,
    ) -> Option<DefaultTagParser> {
        self.default.replace(parser)
    }

    pub fn deregister_default_tag_parser(&mut self) -> Option<DefaultTagParser> {
        self.default.take()
    }

    pub fn known_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.parsers.keys().cloned().collect();
        tags.sort();
        tags
    }

    pub fn parse(&self, tag: &str, form: Form, pos: Position) -> Result<Form, ReaderError> {
        let result = if let Some(parser) = self.parsers.get(tag) {
            parser(form)
        } else if let Some(default) = &self.default {
            default(tag, form)
        } else {
            return Err(ReaderError::UnknownTag {
                tag: tag.to_string(),
                known: self.known_tags(),
                pos,
            });
        };
        result.map_err(|err| err.at(pos))
    }
}

fn tag_error(message: String) -> ReaderError {
    ReaderError::syntax(message, Position::unknown())
}

fn is_leap_year(year: u32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: u32, month: u32) -> u32 {
    match month {
        2 if is_leap_year(year) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

fn check_inst(text: &str) -> Result<(), String> {
    let caps = INST_PATTERN
        .captures(text)
        .ok_or_else(|| format!("Unrecognized date/time syntax: {text}"))?;
    let field = |idx: usize, default: u32| -> u32 {
        caps.get(idx)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(default)
    };
    let year = field(1, 1970);
    let month = field(2, 1);
    let day = field(3, 1);
    let checks = [
        (1..=12).contains(&month),
        day >= 1 && day <= days_in_month(year, month.clamp(1, 12)),
        field(4, 0) <= 23,
        field(5, 0) <= 59,
        // leap seconds
        field(6, 0) <= 60,
        field(9, 0) <= 23,
        field(10, 0) <= 59,
    ];
    if checks.iter().all(|ok| *ok) {
        Ok(())
    } else {
        Err(format!("timestamp component out of range: {text}"))
    }
}

fn read_inst(form: Form) -> Result<Form, ReaderError> {
    match form.as_str() {
        Some(text) => {
            check_inst(text).map_err(tag_error)?;
            Ok(Form::tagged(Symbol::simple("inst"), form))
        }
        None => Err(tag_error(format!(
            "Instance literal expects a string for its timestamp, got a {}",
            form.type_name()
        ))),
    }
}

fn read_uuid(form: Form) -> Result<Form, ReaderError> {
    match form.as_str() {
        Some(text) if UUID_PATTERN.is_match(text) => Ok(Form::tagged(Symbol::simple("uuid"), form)),
        Some(text) => Err(tag_error(format!("Invalid UUID string: {text}"))),
        None => Err(tag_error(format!(
            "UUID literal expects a string as its representation, got a {}",
            form.type_name()
        ))),
    }
}

fn read_queue(form: Form) -> Result<Form, ReaderError> {
    if matches!(form.kind, FormKind::Vector(_)) {
        Ok(Form::tagged(Symbol::simple("queue"), form))
    } else {
        Err(tag_error(format!(
            "Queue literal expects a vector for its elements, got a {}",
            form.type_name()
        )))
    }
}
