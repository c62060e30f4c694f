use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::EngineError;

/// Locate the target program named by `spec`.
///
/// Absolute specs are accepted as given. Relative specs are tried against
/// `cwd` and then each entry of `search_path`, in order; the first candidate
/// that exists wins. A candidate whose existence cannot be determined counts
/// as absent.
pub fn resolve_source(
    spec: &str,
    cwd: &Path,
    search_path: &[PathBuf],
) -> Result<PathBuf, EngineError> {
    let spec_path = Path::new(spec);
    if spec_path.is_absolute() {
        return Ok(spec_path.to_path_buf());
    }

    let candidates: Vec<PathBuf> = std::iter::once(cwd)
        .chain(search_path.iter().map(PathBuf::as_path))
        .map(|dir| dir.join(spec_path).components().collect())
        .collect();

    for candidate in &candidates {
        match candidate.try_exists() {
            Ok(true) => {
                debug!(spec, resolved = %candidate.display(), "resolved target source");
                return Ok(candidate.clone());
            }
            Ok(false) => {}
            Err(e) => {
                debug!(candidate = %candidate.display(), error = %e, "existence check failed, skipping");
            }
        }
    }

    Err(EngineError::SourceNotFound {
        spec: spec.to_owned(),
        searched: candidates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    struct Layout {
        _root: tempfile::TempDir,
        work: PathBuf,
        lib_a: PathBuf,
        lib_b: PathBuf,
    }

    fn layout() -> Layout {
        let root = tempfile::tempdir().unwrap();
        let work = root.path().join("work");
        let lib_a = root.path().join("libA");
        let lib_b = root.path().join("libB");
        for dir in [&work, &lib_a, &lib_b] {
            fs::create_dir_all(dir).unwrap();
        }
        Layout {
            _root: root,
            work,
            lib_a,
            lib_b,
        }
    }

    #[test]
    fn first_search_path_hit_wins_when_cwd_misses() {
        let l = layout();
        fs::write(l.lib_a.join("app.src"), "").unwrap();
        fs::write(l.lib_b.join("app.src"), "").unwrap();

        let resolved =
            resolve_source("app.src", &l.work, &[l.lib_a.clone(), l.lib_b.clone()]).unwrap();
        assert_eq!(resolved, l.lib_a.join("app.src"));
    }

    #[test]
    fn cwd_takes_precedence() {
        let l = layout();
        fs::write(l.work.join("app.src"), "").unwrap();
        fs::write(l.lib_a.join("app.src"), "").unwrap();

        let resolved = resolve_source("app.src", &l.work, &[l.lib_a.clone()]).unwrap();
        assert_eq!(resolved, l.work.join("app.src"));
    }

    #[test]
    fn later_search_entries_are_searched() {
        let l = layout();
        fs::write(l.lib_b.join("app.src"), "").unwrap();

        let resolved =
            resolve_source("app.src", &l.work, &[l.lib_a.clone(), l.lib_b.clone()]).unwrap();
        assert_eq!(resolved, l.lib_b.join("app.src"));
    }

    #[test]
    fn absolute_spec_is_accepted_as_is() {
        let l = layout();
        let abs = l.lib_b.join("missing.src");
        let resolved = resolve_source(abs.to_str().unwrap(), &l.work, &[]).unwrap();
        assert_eq!(resolved, abs);
    }

    #[test]
    fn not_found_lists_every_candidate() {
        let l = layout();
        let err = resolve_source("nope.src", &l.work, &[l.lib_a.clone()]).unwrap_err();
        match err {
            EngineError::SourceNotFound { spec, searched } => {
                assert_eq!(spec, "nope.src");
                assert_eq!(searched, vec![l.work.join("nope.src"), l.lib_a.join("nope.src")]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn nested_relative_spec() {
        let l = layout();
        fs::create_dir_all(l.lib_a.join("pkg")).unwrap();
        fs::write(l.lib_a.join("pkg/main.src"), "").unwrap();
        let resolved = resolve_source("pkg/main.src", &l.work, &[l.lib_a.clone()]).unwrap();
        assert_eq!(resolved, l.lib_a.join("pkg/main.src"));
    }

    #[test]
    fn current_dir_components_are_dropped() {
        let l = layout();
        fs::write(l.work.join("app.src"), "").unwrap();
        let resolved = resolve_source("./app.src", &l.work, &[]).unwrap();
        assert_eq!(resolved.to_str(), l.work.join("app.src").to_str());
    }
}
