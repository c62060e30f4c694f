//! Renders a walked directory tree into `index.html`, `index.css` and
//! `control.js`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::ReportError;
use crate::template::Template;
use crate::walk::{DirectoryEntry, FileEntry};

/// Artifacts produced by a report, in write order.
pub const TEMPLATE_NAMES: [&str; 3] = ["index.html", "index.css", "control.js"];

const BUNDLED: [(&str, &str); 3] = [
    ("index.html", include_str!("../templates/index.html")),
    ("index.css", include_str!("../templates/index.css")),
    ("control.js", include_str!("../templates/control.js")),
];

#[derive(Clone, Debug)]
pub struct ReportConfig {
    pub out_dir: PathBuf,
    /// Every template is read from here instead of the bundled set.
    pub templates_dir: Option<PathBuf>,
    /// WebSocket URL the page connects to.
    pub server_url: String,
}

/// Result of a successful [`Reporter::write`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportSummary {
    pub index: PathBuf,
    pub files: usize,
    pub directories: usize,
}

pub struct Reporter {
    config: ReportConfig,
    templates: BTreeMap<&'static str, Template>,
}

impl Reporter {
    pub fn new(config: ReportConfig) -> Result<Self, ReportError> {
        let mut templates = BTreeMap::new();
        for (name, bundled) in BUNDLED {
            let source = match &config.templates_dir {
                Some(dir) => read_template(dir, name)?,
                None => bundled.to_string(),
            };
            let template = Template::parse(&source).map_err(|source| ReportError::Template {
                name: name.to_string(),
                source,
            })?;
            templates.insert(name, template);
        }
        Ok(Self { config, templates })
    }

    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    /// Template context for `tree`: `Directories` and `Files` in walk order,
    /// the `server` URL and `file_index` mapping source paths to anchors.
    pub fn context(&self, tree: &DirectoryEntry) -> Value {
        let root = &tree.path;
        let directories: Vec<Value> = tree
            .directories()
            .map(|dir| {
                json!({
                    "path": dir.path.to_string_lossy(),
                    "relative": relative(root, &dir.path),
                    "name": file_name(&dir.path),
                    "id": directory_id(&dir.path),
                })
            })
            .collect();

        let mut file_index = Map::new();
        let files: Vec<Value> = tree
            .files()
            .map(|file| {
                let anchor = anchor_id(&file.path);
                file_index.insert(
                    file.path.to_string_lossy().into_owned(),
                    Value::String(anchor.clone()),
                );
                file_context(root, file, anchor)
            })
            .collect();

        json!({
            "title": file_name(root),
            "root": root.to_string_lossy(),
            "server": self.config.server_url,
            "Directories": directories,
            "Files": files,
            "file_index": file_index,
        })
    }

    /// Render every template into `out_dir`, creating it if needed.
    pub fn write(&self, tree: &DirectoryEntry) -> Result<ReportSummary, ReportError> {
        let out_dir = &self.config.out_dir;
        std::fs::create_dir_all(out_dir).map_err(|source| ReportError::Write {
            path: out_dir.clone(),
            source,
        })?;

        let context = self.context(tree);
        for name in TEMPLATE_NAMES {
            let template = self
                .templates
                .get(name)
                .ok_or_else(|| ReportError::MissingTemplate(name.to_string()))?;
            let rendered = template
                .render(&context)
                .map_err(|source| ReportError::Template {
                    name: name.to_string(),
                    source,
                })?;
            let path = out_dir.join(name);
            std::fs::write(&path, rendered).map_err(|source| ReportError::Write {
                path: path.clone(),
                source,
            })?;
            debug!(path = %path.display(), "wrote report artifact");
        }

        let summary = ReportSummary {
            index: out_dir.join("index.html"),
            files: context["Files"].as_array().map_or(0, Vec::len),
            directories: context["Directories"].as_array().map_or(0, Vec::len),
        };
        info!(
            index = %summary.index.display(),
            files = summary.files,
            directories = summary.directories,
            "report written"
        );
        Ok(summary)
    }
}

fn read_template(dir: &Path, name: &str) -> Result<String, ReportError> {
    let path = dir.join(name);
    match std::fs::read_to_string(&path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ReportError::MissingTemplate(path.display().to_string()))
        }
        Err(source) => Err(ReportError::Read { path, source }),
    }
}

fn file_context(root: &Path, file: &FileEntry, anchor: String) -> Value {
    let dirname = file
        .path
        .parent()
        .map(|p| relative(root, p))
        .unwrap_or_default();
    json!({
        "path": file.path.to_string_lossy(),
        "relative": relative(root, &file.path),
        "name": file.name(),
        "dirname": dirname,
        "extension": file.extension,
        "anchor": anchor,
        "lines": file.lines,
    })
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn short_digest(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

/// Stable element id for a file: `f_<digest of dirname>_<basename>` with
/// dots in the basename replaced by underscores.
pub fn anchor_id(path: &Path) -> String {
    let basename = path
        .file_name()
        .map(|n| n.to_string_lossy().replace('.', "_"))
        .unwrap_or_default();
    let dirname = path
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("f_{}_{}", short_digest(&dirname), basename)
}

/// Stable element id for a directory: `d_<digest of path>`.
pub fn directory_id(path: &Path) -> String {
    format!("d_{}", short_digest(&path.to_string_lossy()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walk::FsWalker;
    use std::fs;

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("lib")).unwrap();
        fs::write(dir.path().join("main.ds"), "let a = 1 < 2;\nprint(a);\n").unwrap();
        fs::write(dir.path().join("lib/util.ds"), "fn f() {}\n").unwrap();
        dir
    }

    fn config(out: &Path) -> ReportConfig {
        ReportConfig {
            out_dir: out.to_path_buf(),
            templates_dir: None,
            server_url: "ws://127.0.0.1:8765/ws".into(),
        }
    }

    #[test]
    fn anchor_ids_are_stable_and_distinct() {
        let a = anchor_id(Path::new("/p/src/main.ds"));
        assert_eq!(a, anchor_id(Path::new("/p/src/main.ds")));
        assert!(a.starts_with("f_"));
        assert!(a.ends_with("_main_ds"));
        assert_eq!(a.len(), "f_".len() + 16 + "_main_ds".len());
        assert_ne!(a, anchor_id(Path::new("/p/lib/main.ds")));
        assert!(directory_id(Path::new("/p/src")).starts_with("d_"));
    }

    #[test]
    fn context_lists_files_with_anchors() {
        let src = project();
        let out = tempfile::tempdir().unwrap();
        let tree = FsWalker::new::<&str>(src.path(), &[], &[])
            .unwrap()
            .build()
            .unwrap();
        let reporter = Reporter::new(config(out.path())).unwrap();
        let ctx = reporter.context(&tree);

        assert_eq!(ctx["Files"].as_array().unwrap().len(), 2);
        assert_eq!(ctx["Directories"][0]["relative"], "lib");
        let main = &ctx["Files"][0];
        assert_eq!(main["relative"], "main.ds");
        assert_eq!(main["lines"][1]["content"], "print(a);");
        let main_path = src.path().join("main.ds");
        assert_eq!(
            ctx["file_index"][&*main_path.to_string_lossy()],
            main["anchor"]
        );
    }

    #[test]
    fn writes_three_artifacts() {
        let src = project();
        let out = tempfile::tempdir().unwrap();
        let out_dir = out.path().join("report");
        let tree = FsWalker::new::<&str>(src.path(), &[], &[])
            .unwrap()
            .build()
            .unwrap();
        let summary = Reporter::new(config(&out_dir))
            .unwrap()
            .write(&tree)
            .unwrap();

        assert_eq!(summary.files, 2);
        assert_eq!(summary.directories, 1);
        for name in TEMPLATE_NAMES {
            assert!(out_dir.join(name).is_file(), "{name} missing");
        }
        let html = fs::read_to_string(&summary.index).unwrap();
        let anchor = anchor_id(&src.path().join("main.ds"));
        assert!(html.contains(&format!("id=\"{anchor}_2\"")));
        assert!(html.contains("let&nbsp;a&nbsp;=&nbsp;1&nbsp;&lt;&nbsp;2;"));
        assert!(html.contains("2 files in 1 directory"));
        let js = fs::read_to_string(out_dir.join("control.js")).unwrap();
        assert!(js.contains(r#"const SERVER = "ws://127.0.0.1:8765/ws";"#));
        assert!(js.contains(&anchor));
    }

    #[test]
    fn custom_templates_dir_must_have_every_template() {
        let templates = tempfile::tempdir().unwrap();
        fs::write(templates.path().join("index.html"), "{{ title }}").unwrap();
        let mut cfg = config(Path::new("/unused"));
        cfg.templates_dir = Some(templates.path().to_path_buf());
        assert!(matches!(
            Reporter::new(cfg),
            Err(ReportError::MissingTemplate(_))
        ));
    }

    #[test]
    fn broken_custom_template_names_the_file() {
        let templates = tempfile::tempdir().unwrap();
        fs::write(templates.path().join("index.html"), "{% if x %}").unwrap();
        fs::write(templates.path().join("index.css"), "").unwrap();
        fs::write(templates.path().join("control.js"), "").unwrap();
        let mut cfg = config(Path::new("/unused"));
        cfg.templates_dir = Some(templates.path().to_path_buf());
        match Reporter::new(cfg) {
            Err(ReportError::Template { name, .. }) => assert_eq!(name, "index.html"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("broken template accepted"),
        }
    }
}
