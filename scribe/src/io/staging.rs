//! Validation of the source, target directory and staged target path.

use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::core::run_state::RunTarget;
use crate::error::ScribeError;

/// Validate run inputs and resolve them into a [`RunTarget`].
///
/// The target directory must exist and live under one of `allowed_bases`
/// (an empty list allows any directory). The target file must be relative,
/// free of `..` and stay inside the target directory even through symlinks.
pub fn resolve_run_target(
    target_dir: &Path,
    source_file: &Path,
    target_file: &str,
    allowed_bases: &[PathBuf],
) -> Result<RunTarget, ScribeError> {
    let target_dir = target_dir.canonicalize().map_err(|err| {
        ScribeError::input(format!(
            "target directory {} is not accessible: {err}",
            target_dir.display()
        ))
    })?;
    if !target_dir.is_dir() {
        return Err(ScribeError::input(format!(
            "target {} is not a directory",
            target_dir.display()
        )));
    }
    ensure_allowed_base(&target_dir, allowed_bases)?;

    let relative = Path::new(target_file);
    if target_file.trim().is_empty() {
        return Err(ScribeError::input("target file must not be empty"));
    }
    if relative.is_absolute()
        || relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(ScribeError::input(format!(
            "target file '{target_file}' must be a relative path without '..'"
        )));
    }
    let staged = target_dir.join(relative);
    ensure_contained(&target_dir, relative, target_file)?;
    if staged.is_dir() {
        return Err(ScribeError::input(format!(
            "target file '{target_file}' is a directory"
        )));
    }

    let source = source_file.canonicalize().map_err(|err| {
        ScribeError::input(format!(
            "source file {} is not accessible: {err}",
            source_file.display()
        ))
    })?;
    if !source.is_file() {
        return Err(ScribeError::input(format!(
            "source {} is not a file",
            source.display()
        )));
    }

    debug!(target = %staged.display(), source = %source.display(), "run inputs resolved");
    Ok(RunTarget {
        target_dir,
        source_file: source,
        target_file: staged,
        target_file_relative: target_file.to_string(),
    })
}

fn ensure_allowed_base(target_dir: &Path, allowed_bases: &[PathBuf]) -> Result<(), ScribeError> {
    if allowed_bases.is_empty() {
        return Ok(());
    }
    let allowed = allowed_bases
        .iter()
        .filter_map(|base| base.canonicalize().ok())
        .any(|base| target_dir.starts_with(base));
    if allowed {
        return Ok(());
    }
    let bases: Vec<String> = allowed_bases
        .iter()
        .map(|b| b.display().to_string())
        .collect();
    Err(ScribeError::input(format!(
        "target directory {} is outside the allowed bases",
        target_dir.display()
    ))
    .with_detail("allowed_target_bases", bases))
}

/// Walk the target path one component at a time and reject any symlink
/// whose destination leaves `target_dir` or does not exist.
fn ensure_contained(
    target_dir: &Path,
    relative: &Path,
    target_file: &str,
) -> Result<(), ScribeError> {
    let mut current = target_dir.to_path_buf();
    for component in relative.components() {
        current.push(component);
        let Ok(meta) = fs::symlink_metadata(&current) else {
            // Nothing below a missing component exists yet.
            break;
        };
        if !meta.file_type().is_symlink() {
            continue;
        }
        let resolved = current.canonicalize().map_err(|err| {
            ScribeError::input(format!(
                "target file '{target_file}' passes through dangling symlink {}: {err}",
                current.display()
            ))
        })?;
        if !resolved.starts_with(target_dir) {
            return Err(ScribeError::input(format!(
                "target file '{target_file}' escapes {}",
                target_dir.display()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let temp = tempfile::tempdir().expect("tempdir");
        let project = temp.path().join("project");
        std::fs::create_dir_all(&project).expect("mkdir");
        let source = temp.path().join("candidate.py");
        std::fs::write(&source, "x = 1\n").expect("write");
        (temp, project, source)
    }

    #[test]
    fn resolves_nested_target() {
        let (_temp, project, source) = fixture();
        let target = resolve_run_target(&project, &source, "pkg/mod.py", &[]).expect("resolve");
        let root = project.canonicalize().expect("canon");
        assert_eq!(target.target_file, root.join("pkg/mod.py"));
        assert_eq!(target.target_file_relative, "pkg/mod.py");
        assert_eq!(target.target_dir, root);
    }

    #[test]
    fn rejects_parent_components_and_absolute_paths() {
        let (_temp, project, source) = fixture();
        for bad in ["../escape.py", "pkg/../../x.py", "/etc/passwd", ""] {
            let err = resolve_run_target(&project, &source, bad, &[]).expect_err(bad);
            assert_eq!(err.kind(), "input", "{bad}");
        }
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escape() {
        let (temp, project, source) = fixture();
        let outside = temp.path().join("outside");
        std::fs::create_dir_all(&outside).expect("mkdir");
        std::os::unix::fs::symlink(&outside, project.join("link")).expect("symlink");
        let err = resolve_run_target(&project, &source, "link/mod.py", &[]).expect_err("escape");
        assert_eq!(err.kind(), "input");
    }

    #[cfg(unix)]
    #[test]
    fn rejects_dangling_symlink_escape() {
        let (temp, project, source) = fixture();
        let outside = temp.path().join("outside_dir");
        std::os::unix::fs::symlink(outside.join("pwned.py"), project.join("app.py"))
            .expect("symlink");
        let err = resolve_run_target(&project, &source, "app.py", &[]).expect_err("dangling");
        assert_eq!(err.kind(), "input");
        assert!(!outside.exists());
    }

    #[cfg(unix)]
    #[test]
    fn accepts_symlink_that_stays_inside() {
        let (_temp, project, source) = fixture();
        std::fs::create_dir_all(project.join("real")).expect("mkdir");
        std::os::unix::fs::symlink(project.join("real"), project.join("alias")).expect("symlink");
        let target = resolve_run_target(&project, &source, "alias/mod.py", &[]).expect("inside");
        assert_eq!(target.target_file_relative, "alias/mod.py");
    }

    #[test]
    fn enforces_allowed_bases() {
        let (temp, project, source) = fixture();
        let elsewhere = tempfile::tempdir().expect("tempdir");
        let err = resolve_run_target(
            &project,
            &source,
            "mod.py",
            &[elsewhere.path().to_path_buf()],
        )
        .expect_err("outside");
        assert_eq!(err.kind(), "input");
        resolve_run_target(&project, &source, "mod.py", &[temp.path().to_path_buf()])
            .expect("inside");
    }

    #[test]
    fn missing_source_is_input_error() {
        let (_temp, project, _source) = fixture();
        let err = resolve_run_target(&project, Path::new("/no/such/file.py"), "mod.py", &[])
            .expect_err("missing");
        assert_eq!(err.kind(), "input");
    }
}
