//! WDL support for omics-run: document loading, source packaging and run
//! input assembly.

pub mod document;
pub mod inputs;
pub mod package;

pub use document::{Document, DocumentError, Executable, ExecutableKind, InputDecl, SourceFile, WdlType, load};
pub use inputs::{InputArgs, InputError, assemble};
pub use package::package;
