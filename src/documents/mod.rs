//! Uploaded documents: identifiers, metadata store, text extraction and
//! resolution of an id to a loadable artifact.

pub mod extract;
pub mod id;
pub mod resolver;
pub mod store;

pub use extract::{ExtractionError, PdftotextExtractor, TextExtractor};
pub use id::DocumentId;
pub use resolver::{DocumentResolver, NotFoundReason, Resolution, ResolvedDocument};
pub use store::{DocumentRecord, DocumentStore, NewDocument, SqliteDocumentStore, StoreError};
