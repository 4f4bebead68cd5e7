//! Hand-written incremental tokenizers and the buffered pipe text writer
//! that sit underneath every dumper and importer.

pub mod buffer;
pub mod json;
pub mod pipe;
pub mod sql;
pub mod writer;

pub use json::{JsonTokenizer, TokenKind as JsonTokenKind};
pub use pipe::Pipe;
pub use sql::{SqlTokenizer, TokenKind as SqlTokenKind};
pub use writer::PipeTextWriter;
