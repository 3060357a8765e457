use crate::analyzer::{Analyzer, AnalyzerOptions, NamespaceLoader, NoopLoader, SourceRootsLoader};
use crate::ast::{Node, Warning};
use crate::error::{AnalysisError, CinderError, Position, ReaderError};
use crate::namespace::{NamespaceTable, USER_NS};
use crate::reader::Reader;
use crate::serialization::{to_value, Value};
use crate::stream::{LineNumberingPushbackStream, PushbackStream};
use crate::tags::TagRegistry;
use crate::utils::offset_at;
use miette::{Diagnostic, GraphicalReportHandler, GraphicalTheme, NamedSource, SourceSpan};
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The outcome of analyzing a source text: one node per top-level form, the
/// namespace analysis ended in, and every warning raised on the way.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub namespace: String,
    pub nodes: Vec<Node>,
    pub warnings: Vec<Warning>,
}

impl AnalysisResult {
    /// Op names of the top-level nodes, in source order.
    #[must_use]
    pub fn ops(&self) -> Vec<&'static str> {
        self.nodes.iter().map(|node| node.op.name()).collect()
    }

    /// The top-level forms as plain data.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Array(self.nodes.iter().map(|node| to_value(&node.form)).collect())
    }

    /// Serializes the whole result, node trees included, as pretty-printed JSON.
    ///
    /// # Errors
    /// Returns a `serde_json::Error` if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Serializes the whole result as YAML.
    ///
    /// # Errors
    /// Returns a `serde_yaml::Error` if serialization fails.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

/// A back end consuming analyzed nodes.
pub trait Emitter {
    type Output;

    fn emit(&mut self, node: &Node) -> Self::Output;

    fn emit_all(&mut self, nodes: &[Node]) -> Vec<Self::Output> {
        nodes.iter().map(|node| self.emit(node)).collect()
    }
}

/// Long-lived compilation state: the namespace table, analyzer options, the
/// reader's tag registry and the loader used for `ns` dependencies.
///
/// Each `analyze_*` call continues in the namespace the previous one ended in.
pub struct Compiler {
    table: NamespaceTable,
    options: AnalyzerOptions,
    tags: TagRegistry,
    loader: Box<dyn NamespaceLoader>,
    current_ns: String,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            table: NamespaceTable::new(),
            options: AnalyzerOptions::default(),
            tags: TagRegistry::with_builtins(),
            loader: Box::new(NoopLoader),
            current_ns: USER_NS.to_string(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: AnalyzerOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_loader(mut self, loader: impl NamespaceLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    /// Loads `ns` dependencies from files under `roots`.
    #[must_use]
    pub fn with_source_roots(self, roots: Vec<PathBuf>) -> Self {
        self.with_loader(SourceRootsLoader::new(roots))
    }

    pub fn options(&self) -> &AnalyzerOptions {
        &self.options
    }

    pub fn table(&self) -> &NamespaceTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut NamespaceTable {
        &mut self.table
    }

    pub fn tags_mut(&mut self) -> &mut TagRegistry {
        &mut self.tags
    }

    pub fn current_ns(&self) -> &str {
        &self.current_ns
    }

    /// Forgets every namespace and starts over in `cinder.user`.
    pub fn reset(&mut self) {
        self.table.reset();
        self.current_ns = USER_NS.to_string();
    }

    /// Analyzes every form of `source`.
    ///
    /// # Errors
    /// Returns the first reader or analysis error.
    pub fn analyze_str(&mut self, source: &str, name: Option<&str>) -> Result<AnalysisResult, CinderError> {
        let stream = LineNumberingPushbackStream::new(Cursor::new(source.as_bytes()));
        let mut stream = match name {
            Some(name) => stream.with_name(name),
            None => stream,
        };
        self.analyze_stream(&mut stream)
    }

    /// Analyzes every form of the file at `path`.
    ///
    /// # Errors
    /// Returns a reader error if the file cannot be opened, otherwise the
    /// first reader or analysis error.
    pub fn analyze_file(&mut self, path: impl AsRef<Path>) -> Result<AnalysisResult, CinderError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(ReaderError::from)?;
        let mut stream =
            LineNumberingPushbackStream::new(BufReader::new(file)).with_name(path.to_string_lossy());
        self.analyze_stream(&mut stream)
    }

    fn analyze_stream(&mut self, stream: &mut dyn PushbackStream) -> Result<AnalysisResult, CinderError> {
        let mut reader = Reader::with_tags(self.tags.clone());
        let mut analyzer = Analyzer::new(&mut self.table)
            .with_loader(Box::new(&mut *self.loader))
            .with_options(self.options.clone());
        analyzer.set_current_ns(self.current_ns.clone());
        let nodes = analyzer.analyze_stream(&mut reader, stream);
        let namespace = analyzer.current_ns().to_string();
        let warnings = analyzer.take_warnings();
        self.current_ns = namespace.clone();
        Ok(AnalysisResult {
            namespace,
            nodes: nodes?,
            warnings,
        })
    }
}

/// Analyzes a source string with a fresh [`Compiler`].
///
/// # Errors
/// Returns the first reader or analysis error.
pub fn analyze(source: &str, file_name: &str) -> Result<AnalysisResult, CinderError> {
    Compiler::new().analyze_str(source, Some(file_name))
}

#[derive(Error, Debug, Diagnostic)]
#[error("{message}")]
struct SourceDiagnostic {
    message: String,
    #[source_code]
    src: NamedSource<String>,
    #[label("here")]
    span: Option<SourceSpan>,
    #[help]
    help: Option<String>,
}

fn error_position(err: &CinderError) -> Position {
    match err {
        CinderError::Reader(err) => err.position(),
        CinderError::Analysis(AnalysisError::Located { line, column, .. }) => Position {
            line: *line,
            column: *column,
        },
        CinderError::Analysis(AnalysisError::Invalid { .. }) => Position::unknown(),
    }
}

/// Renders `err` against the source it came from, pointing at the failing
/// line and column when they are known.
pub fn render_report(err: &CinderError, source: &str, name: &str) -> String {
    let pos = error_position(err);
    let span = pos.line.map(|line| {
        let offset = offset_at(source, line as usize, pos.column.unwrap_or(1) as usize);
        let len = usize::from(offset < source.len());
        SourceSpan::from((offset, len))
    });
    let diagnostic = SourceDiagnostic {
        message: err.to_string(),
        src: NamedSource::new(name, source.to_string()),
        span,
        help: err.help().map(|help| help.to_string()),
    };
    let handler = GraphicalReportHandler::new_themed(GraphicalTheme::unicode_nocolor());
    let mut buffer = String::new();
    match handler.render_report(&mut buffer, &diagnostic) {
        Ok(()) => buffer,
        Err(_) => err.to_string(),
    }
}
