use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directory that holds attachment bytes while they are being uploaded
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    /// Create the staging directory if needed and clear files left behind by
    /// a previous run that did not shut down cleanly
    pub async fn prepare(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let removed = remove_leftovers(&dir).await?;
        if removed > 0 {
            warn!(dir = %dir.display(), removed = removed, "Removed leftover staging files");
        }

        debug!(dir = %dir.display(), "Staging directory ready");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a staging file for `file_name` lives at
    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.dir.join(sanitize_file_name(file_name))
    }

    /// Reserve the staging path for one attachment.
    ///
    /// Nothing is written here; the returned guard removes whatever ends up at
    /// the path once released or dropped.
    pub fn stage(&self, file_name: &str) -> StagedFile {
        StagedFile {
            path: self.path_for(file_name),
            released: false,
        }
    }
}

/// Delete regular files directly inside `dir`; subdirectories are left alone
async fn remove_leftovers(dir: &Path) -> io::Result<usize> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut removed = 0;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Failed to remove leftover staging file")
            }
        }
    }

    Ok(removed)
}

/// Staging file owned by a single attachment transfer
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    released: bool,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the staging file.
    ///
    /// Returns `Ok(true)` if a file was removed and `Ok(false)` if nothing was
    /// ever written.
    pub async fn release(mut self) -> io::Result<bool> {
        self.released = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // cancelled or panicked before release
        match std::fs::remove_file(&self.path) {
            Ok(()) => warn!(path = %self.path.display(), "Removed unreleased staging file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove staging file"),
        }
    }
}

/// Turn a declared filename into a single safe path component
pub fn sanitize_file_name(file_name: &str) -> String {
    let base = file_name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();

    let cleaned: String = base
        .chars()
        .map(|c| match c {
            ':' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.').trim();
    if cleaned.is_empty() {
        "attachment".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("dir\\evil.exe"), "evil.exe");
        assert_eq!(sanitize_file_name("C:secret.txt"), "C_secret.txt");
        assert_eq!(sanitize_file_name(".hidden"), "hidden");
        assert_eq!(sanitize_file_name(".."), "attachment");
        assert_eq!(sanitize_file_name(""), "attachment");
        assert_eq!(sanitize_file_name("tab\there.txt"), "tab_here.txt");
    }

    #[tokio::test]
    async fn test_release_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::prepare(dir.path().join("staging")).await.unwrap();

        let staged = area.stage("report.pdf");
        tokio::fs::write(staged.path(), b"data").await.unwrap();
        let path = staged.path().to_path_buf();

        assert!(staged.release().await.unwrap());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_release_without_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::prepare(dir.path()).await.unwrap();

        let staged = area.stage("never-written.bin");
        assert!(!staged.release().await.unwrap());
    }

    #[tokio::test]
    async fn test_prepare_clears_leftover_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("crashed-upload.bin"), b"partial").unwrap();
        std::fs::write(dir.path().join("report.pdf"), b"partial").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let area = StagingArea::prepare(dir.path()).await.unwrap();

        assert!(!area.path_for("crashed-upload.bin").exists());
        assert!(!area.path_for("report.pdf").exists());
        assert!(dir.path().join("nested").is_dir());
    }

    #[tokio::test]
    async fn test_drop_removes_unreleased_file() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::prepare(dir.path()).await.unwrap();

        let path = {
            let staged = area.stage("dropped.txt");
            std::fs::write(staged.path(), b"x").unwrap();
            staged.path().to_path_buf()
        };

        assert!(!path.exists());
    }
}
