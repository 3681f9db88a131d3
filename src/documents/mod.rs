//! Document synchronization between the editor and the extension process

pub mod language;
pub mod synchronizer;

pub use language::language_id_for_extension;
pub use synchronizer::{DocumentError, DocumentEvent, DocumentSynchronizer, FileRename};
