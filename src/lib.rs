pub mod analyzer;
pub mod api;
pub mod ast;
mod core_macros;
pub mod error;
pub mod form;
pub mod macroexpand;
pub mod namespace;
pub mod reader;
pub mod resolver;
pub mod serialization;
pub mod stream;
pub mod syntax_quote;
pub mod tags;
pub mod utils;

pub use api::{analyze, AnalysisResult, Compiler};
pub use error::CinderError;
pub use form::Form;
