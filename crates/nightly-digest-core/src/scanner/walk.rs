use crate::error::Error;
use glob::Pattern;
use std::path::{Path, PathBuf};
use tracing::{error, warn};
use walkdir::WalkDir;

/// Lazy, single-pass sequence of candidate session files under a root.
///
/// Unreadable directories and entries are logged and skipped; traversal
/// carries on with the next entry.
pub struct SessionFiles {
    walker: walkdir::IntoIter,
    extensions: Vec<String>,
    ignore_patterns: Vec<Pattern>,
}

/// Start a recursive scan of `root` yielding files whose extension is in
/// `extensions` (case-insensitive). Fails only when `root` is missing.
pub fn locate_session_files(
    root: &Path,
    extensions: &[String],
    ignore_globs: &[String],
) -> Result<SessionFiles, Error> {
    if !root.is_dir() {
        return Err(Error::PathNotFound(root.to_path_buf()));
    }

    let ignore_patterns: Vec<Pattern> = ignore_globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect();

    let extensions = extensions
        .iter()
        .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
        .collect();

    Ok(SessionFiles {
        walker: WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter(),
        extensions,
        ignore_patterns,
    })
}

impl SessionFiles {
    fn is_ignored(&self, path: &Path) -> bool {
        self.ignore_patterns
            .iter()
            .any(|pattern| pattern.matches_path(path))
    }

    fn has_wanted_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|wanted| *wanted == ext)
            })
            .unwrap_or(false)
    }
}

impl Iterator for SessionFiles {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    let location = err
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    warn!("Skipping unreadable entry {}: {}", location, err);
                    continue;
                }
            };

            let path = entry.path();
            if entry.file_type().is_dir() {
                if entry.depth() > 0 && self.is_ignored(path) {
                    self.walker.skip_current_dir();
                }
                continue;
            }

            if !entry.file_type().is_file() || self.is_ignored(path) {
                continue;
            }

            if self.has_wanted_extension(path) {
                return Some(entry.into_path());
            }
        }
    }
}
