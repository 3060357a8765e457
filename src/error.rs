use miette::Diagnostic;
use std::fmt::Display;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum CinderError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Reader(#[from] ReaderError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Analysis(#[from] AnalysisError),
}

/// Position of a failure inside a character stream, when the stream tracks one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self {
            line: Some(line),
            column: Some(column),
        }
    }

    pub fn unknown() -> Self {
        Self::default()
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => write!(f, " at line {line}, column {column}"),
            (Some(line), None) => write!(f, " at line {line}"),
            _ => Ok(()),
        }
    }
}

#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
pub enum ReaderError {
    #[error("EOF while reading{pos}")]
    #[diagnostic(
        code(reader::eof),
        help("The input ended before the form was complete. Check for a missing closing delimiter or quote.")
    )]
    Eof { pos: Position },

    #[error("Invalid number format [{token}]{pos}")]
    #[diagnostic(code(reader::invalid_number))]
    InvalidNumber { token: String, pos: Position },

    #[error("Invalid token: {token}{pos}")]
    #[diagnostic(
        code(reader::invalid_token),
        help("Symbols and keywords may contain at most one '/', and may not end with ':'.")
    )]
    InvalidToken { token: String, pos: Position },

    #[error("Unknown character token: {token}{pos}")]
    #[diagnostic(
        code(reader::unknown_character),
        help("Use a single character or one of \\space, \\tab, \\newline, \\return, \\backspace, \\formfeed, \\uXXXX.")
    )]
    UnknownCharacter { token: String, pos: Position },

    #[error("Unexpected unicode escape \\{escape}{pos}")]
    #[diagnostic(
        code(reader::unsupported_escape),
        help("Supported escapes are \\t \\r \\n \\\\ \\\" \\b \\f, a single digit, \\uXXXX and \\xXX.")
    )]
    UnsupportedEscape { escape: String, pos: Position },

    #[error("Unmatched delimiter: {delimiter}{pos}")]
    #[diagnostic(code(reader::unmatched_delimiter))]
    UnmatchedDelimiter { delimiter: char, pos: Position },

    #[error("Map literal must contain an even number of forms{pos}")]
    #[diagnostic(code(reader::odd_map_literal))]
    OddMapLiteral { pos: Position },

    #[error("Duplicate key: {key}{pos}")]
    #[diagnostic(code(reader::duplicate_key))]
    DuplicateKey { key: String, pos: Position },

    #[error("Could not find tag parser for {tag} in {known:?}{pos}")]
    #[diagnostic(
        code(reader::unknown_tag),
        help("Register a parser for this tag, or a default tag parser, on the reader's tag registry.")
    )]
    UnknownTag {
        tag: String,
        known: Vec<String>,
        pos: Position,
    },

    #[error("{message}{pos}")]
    #[diagnostic(code(reader::invalid_meta))]
    InvalidMeta { message: String, pos: Position },

    #[error("{message}{pos}")]
    #[diagnostic(code(reader::syntax))]
    Syntax { message: String, pos: Position },

    #[error("I/O error while reading: {message}")]
    #[diagnostic(code(reader::io))]
    Io { message: String },
}

impl ReaderError {
    pub fn syntax(message: impl Into<String>, pos: Position) -> Self {
        ReaderError::Syntax {
            message: message.into(),
            pos,
        }
    }

    pub fn position(&self) -> Position {
        match self {
            ReaderError::Eof { pos }
            | ReaderError::InvalidNumber { pos, .. }
            | ReaderError::InvalidToken { pos, .. }
            | ReaderError::UnknownCharacter { pos, .. }
            | ReaderError::UnsupportedEscape { pos, .. }
            | ReaderError::UnmatchedDelimiter { pos, .. }
            | ReaderError::OddMapLiteral { pos }
            | ReaderError::DuplicateKey { pos, .. }
            | ReaderError::UnknownTag { pos, .. }
            | ReaderError::InvalidMeta { pos, .. }
            | ReaderError::Syntax { pos, .. } => *pos,
            ReaderError::Io { .. } => Position::unknown(),
        }
    }

    /// Fills in `pos` when the error was raised without a position.
    pub fn at(mut self, pos: Position) -> Self {
        match &mut self {
            ReaderError::Eof { pos: slot }
            | ReaderError::InvalidNumber { pos: slot, .. }
            | ReaderError::InvalidToken { pos: slot, .. }
            | ReaderError::UnknownCharacter { pos: slot, .. }
            | ReaderError::UnsupportedEscape { pos: slot, .. }
            | ReaderError::UnmatchedDelimiter { pos: slot, .. }
            | ReaderError::OddMapLiteral { pos: slot }
            | ReaderError::DuplicateKey { pos: slot, .. }
            | ReaderError::UnknownTag { pos: slot, .. }
            | ReaderError::InvalidMeta { pos: slot, .. }
            | ReaderError::Syntax { pos: slot, .. } => {
                if slot.line.is_none() {
                    *slot = pos;
                }
            }
            ReaderError::Io { .. } => {}
        }
        self
    }

    pub fn is_eof(&self) -> bool {
        matches!(self, ReaderError::Eof { .. })
    }
}

impl From<std::io::Error> for ReaderError {
    fn from(err: std::io::Error) -> Self {
        ReaderError::Io {
            message: err.to_string(),
        }
    }
}

/// Failure raised while analyzing forms.
///
/// `Invalid` is a raw failure with no location yet. The analyzer converts it to
/// `Located` once, at the innermost form being analyzed, and never re-tags a
/// `Located` error on the way out.
#[derive(Error, Debug, Diagnostic)]
pub enum AnalysisError {
    #[error("{message}")]
    #[diagnostic(code(analyzer::invalid))]
    Invalid { message: String },

    #[error("{message}{}", location_suffix(.file, .line, .column))]
    #[diagnostic(code(analyzer::error))]
    Located {
        message: String,
        file: Option<String>,
        line: Option<u32>,
        column: Option<u32>,
        #[source]
        cause: Option<Box<CinderError>>,
    },
}

impl AnalysisError {
    pub fn invalid(message: impl Into<String>) -> Self {
        AnalysisError::Invalid {
            message: message.into(),
        }
    }

    pub fn is_located(&self) -> bool {
        matches!(self, AnalysisError::Located { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            AnalysisError::Invalid { message } | AnalysisError::Located { message, .. } => message,
        }
    }
}

fn location_suffix(file: &Option<String>, line: &Option<u32>, column: &Option<u32>) -> String {
    let pos = Position {
        line: *line,
        column: *column,
    };
    match file {
        Some(file) => format!(" in {file}{pos}"),
        None => pos.to_string(),
    }
}

pub(crate) fn ensure(condition: bool, message: impl FnOnce() -> String) -> Result<(), AnalysisError> {
    if condition {
        Ok(())
    } else {
        Err(AnalysisError::invalid(message()))
    }
}
