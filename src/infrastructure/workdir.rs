//! Scratch directory naming and cleanup

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

/// `len` random lowercase alphanumerics
pub fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect()
}

/// `<base>-<random>`, unique per operation
pub fn unique_dir_name(base: &str) -> String {
    format!("{}-{}", base, random_suffix(8))
}

/// Remove a directory tree, logging instead of failing
pub fn remove_dir_quietly(path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(e) = std::fs::remove_dir_all(path) {
        warn!("Failed to clean up {}: {}", path.display(), e);
    }
}

/// Copy the contents of `src` into `dst`, overwriting existing files
pub fn copy_dir(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(std::io::Error::other)?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_suffix_shape() {
        let s = random_suffix(6);
        assert_eq!(s.len(), 6);
        assert!(s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_ne!(unique_dir_name("app"), unique_dir_name("app"));
    }

    #[test]
    fn test_remove_dir_quietly() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("work/nested");
        std::fs::create_dir_all(&dir).unwrap();
        remove_dir_quietly(&root.path().join("work"));
        assert!(!dir.exists());
        // Missing paths are ignored
        remove_dir_quietly(&root.path().join("work"));
    }

    #[test]
    fn test_copy_dir_nested() {
        let root = tempfile::tempdir().unwrap();
        let src = root.path().join("chart");
        std::fs::create_dir_all(src.join("templates")).unwrap();
        std::fs::write(src.join("Chart.yaml"), "name: web").unwrap();
        std::fs::write(src.join("templates/deployment.yaml"), "kind: Deployment").unwrap();

        let dst = root.path().join("repo/web/1.0.0");
        copy_dir(&src, &dst).unwrap();
        assert!(dst.join("Chart.yaml").exists());
        assert_eq!(
            std::fs::read_to_string(dst.join("templates/deployment.yaml")).unwrap(),
            "kind: Deployment"
        );
    }
}
