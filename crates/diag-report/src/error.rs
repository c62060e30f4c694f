use std::path::PathBuf;

/// Template parse and render failures. `line` is 1-based in the template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("line {line}: unclosed `{open}`")]
    UnclosedTag { open: &'static str, line: usize },
    #[error("line {line}: unexpected `{tag}`")]
    UnexpectedTag { tag: String, line: usize },
    #[error("line {line}: `{block}` block is never closed")]
    UnclosedBlock { block: &'static str, line: usize },
    #[error("line {line}: bad expression `{expr}`: {reason}")]
    BadExpression {
        expr: String,
        reason: String,
        line: usize,
    },
    #[error("line {line}: unknown helper `{name}`")]
    UnknownHelper { name: String, line: usize },
    #[error("line {line}: cannot iterate over {found}")]
    NotIterable { found: &'static str, line: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),
    #[error("invalid exclude pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },
    #[error("template {0} is missing")]
    MissingTemplate(String),
    #[error("template {name}: {source}")]
    Template {
        name: String,
        #[source]
        source: TemplateError,
    },
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
