use std::path::{Path, PathBuf};

use crate::host::{LoaderInfo, ModuleRecord};
use crate::value::{Env, Scope, Value};

/// Name under which the entry program is registered and which it sees as
/// its own `__name__`.
pub const MAIN_MODULE: &str = "__main__";

/// Top-level identity of a program run as the entry point rather than
/// loaded as a library. Owned by whoever drives the run and handed to the
/// interpreter explicitly.
pub struct ExecutionContext {
    file: PathBuf,
    loader: LoaderInfo,
    namespace: Env,
}

impl ExecutionContext {
    pub fn new(path: &Path) -> Self {
        let file_str = path.to_string_lossy().into_owned();
        let namespace = Scope::new_root();
        Scope::define(&namespace, "__name__", Value::str(MAIN_MODULE));
        Scope::define(&namespace, "__file__", Value::str(file_str.as_str()));
        Self {
            file: path.to_path_buf(),
            loader: LoaderInfo {
                fullname: file_str,
            },
            namespace,
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn loader(&self) -> &LoaderInfo {
        &self.loader
    }

    pub fn namespace(&self) -> &Env {
        &self.namespace
    }

    /// Look up a top-level binding after the run.
    #[cfg(test)]
    pub(crate) fn get(&self, name: &str) -> Option<Value> {
        Scope::lookup(&self.namespace, name)
    }

    /// Registry entry describing this context.
    pub fn module_record(&self) -> ModuleRecord {
        ModuleRecord {
            name: MAIN_MODULE.to_owned(),
            file: self.file.clone(),
            loader: self.loader.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_marks_entry_point() {
        let ctx = ExecutionContext::new(Path::new("/work/app.ds"));
        assert_eq!(ctx.get("__name__").unwrap().to_string(), "__main__");
        assert_eq!(ctx.get("__file__").unwrap().to_string(), "/work/app.ds");
        assert_eq!(ctx.loader().fullname, "/work/app.ds");
    }

    #[test]
    fn module_record_uses_main_name() {
        let ctx = ExecutionContext::new(Path::new("/work/app.ds"));
        let record = ctx.module_record();
        assert_eq!(record.name, MAIN_MODULE);
        assert_eq!(record.file, PathBuf::from("/work/app.ds"));
    }

    #[test]
    fn contexts_are_independent() {
        let a = ExecutionContext::new(Path::new("/a.ds"));
        let b = ExecutionContext::new(Path::new("/b.ds"));
        Scope::define(a.namespace(), "x", Value::Int(1));
        assert!(b.get("x").is_none());
    }
}
