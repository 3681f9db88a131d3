//! Value types shared across the host: positions, ranges, URIs and documents

pub mod document;
pub mod position;
pub mod uri;

pub use document::{DEFAULT_WORD_PATTERN, DocumentModel, TextLine};
pub use position::{Position, Range, Selection};
pub use uri::{DocumentUri, UriError};
