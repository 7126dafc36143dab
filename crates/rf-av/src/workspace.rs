//! The shared work directory for intermediate files.
//!
//! Unlike a per-job throwaway directory, the work area is one configured
//! location: the wrapped tools expect to run with it as their working
//! directory, and pipe endpoints live inside it under fixed, per-kind names.

use std::path::{Path, PathBuf};

use rf_core::{Error, Result};

/// Handle to the configured intermediate-file directory.
#[derive(Debug, Clone)]
pub struct WorkArea {
    dir: PathBuf,
}

impl WorkArea {
    /// Open (creating if needed) the work directory.
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| {
            Error::Config(format!(
                "cannot create work directory {}: {e}",
                dir.display()
            ))
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Path of the work directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path for an intermediate stream file: `<base>_<label>.<ext>`.
    pub fn stream_path(&self, base: &str, label: &str, ext: &str) -> PathBuf {
        self.dir.join(format!("{base}_{label}.{ext}"))
    }

    /// Fully-qualified path of a named pipe endpoint for `channel`.
    ///
    /// Channel names are per encoder kind, so two concurrent stages of the
    /// same kind would collide here; the caller serializes them.
    pub fn pipe_path(&self, channel: &str) -> PathBuf {
        self.dir.join(format!("{channel}.fifo"))
    }

    /// Whether `input`'s file name contains characters some of the wrapped
    /// tools choke on.
    pub fn needs_safe_name(input: &Path) -> bool {
        let Some(name) = input.file_name().and_then(|n| n.to_str()) else {
            return true;
        };
        name.chars()
            .any(|c| !c.is_ascii() || matches!(c, '\'' | '"' | '&' | ';' | '$' | '`'))
    }

    /// Copy `input` into the work area under an ASCII-safe name and return
    /// the copy's path.
    pub fn safe_copy(&self, input: &Path, base: &str) -> Result<PathBuf> {
        let ext = input
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let dest = self.dir.join(format!("{base}_src.{ext}"));
        std::fs::copy(input, &dest)?;
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area() -> (tempfile::TempDir, WorkArea) {
        let tmp = tempfile::tempdir().unwrap();
        let area = WorkArea::new(tmp.path()).unwrap();
        (tmp, area)
    }

    #[test]
    fn creates_missing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a/b/work");
        let area = WorkArea::new(&nested).unwrap();
        assert!(area.dir().is_dir());
    }

    #[test]
    fn stream_path_naming() {
        let (_tmp, area) = area();
        let p = area.stream_path("movie", "a2", "ac3");
        assert_eq!(p.file_name().unwrap(), "movie_a2.ac3");
        assert!(p.starts_with(area.dir()));
    }

    #[test]
    fn pipe_path_naming() {
        let (_tmp, area) = area();
        let p = area.pipe_path("ripforge-encode");
        assert_eq!(p.file_name().unwrap(), "ripforge-encode.fifo");
    }

    #[test]
    fn safe_name_detection() {
        assert!(!WorkArea::needs_safe_name(Path::new("/tmp/Movie.2010.mkv")));
        assert!(WorkArea::needs_safe_name(Path::new("/tmp/Am\u{e9}lie.mkv")));
        assert!(WorkArea::needs_safe_name(Path::new("/tmp/It's a Movie.mkv")));
    }

    #[test]
    fn safe_copy_creates_renamed_file() {
        let (_tmp, area) = area();
        let src = area.dir().join("Am\u{e9}lie.mkv");
        std::fs::write(&src, b"data").unwrap();

        let copy = area.safe_copy(&src, "job42").unwrap();
        assert_eq!(copy.file_name().unwrap(), "job42_src.mkv");
        assert_eq!(std::fs::read(&copy).unwrap(), b"data");
    }
}
