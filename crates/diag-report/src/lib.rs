//! # diag-report
//!
//! Offline snapshot of a project directory: [`FsWalker`] builds the entry
//! tree, [`Reporter`] renders it through [`Template`]s into a static page
//! that can attach to the live server.

pub mod error;
pub mod reporter;
pub mod template;
pub mod walk;

pub use error::{ReportError, TemplateError};
pub use reporter::{anchor_id, directory_id, ReportConfig, ReportSummary, Reporter, TEMPLATE_NAMES};
pub use template::{escape, Template};
pub use walk::{DirectoryEntry, Entry, FileEntry, FsWalker, Line, Walk};
