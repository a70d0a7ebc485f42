//! Update package extraction.
//!
//! Packages are zip archives held in memory. They are unpacked into a fresh
//! per-session directory under the OS temp folder, named
//! `<AppName>-<12 hex chars>`. Any entry that would land outside that
//! directory aborts the extraction.

use std::fs::{self, File};
use std::io::{self, Cursor, Write};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};

use super::error::UpdateError;

/// Length of the random suffix of a session directory name.
const TEMP_SUFFIX_LEN: usize = 12;

// ============================================================================
// Temp Root
// ============================================================================

/// Creates a fresh, uniquely named session directory under `base`.
///
/// The directory is created with `create_dir`, so an existing directory of the
/// same name is an error rather than being reused.
pub fn create_temp_root(base: &Path, app_name: &str) -> Result<PathBuf, UpdateError> {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let dir = base.join(format!("{}-{}", app_name, &suffix[..TEMP_SUFFIX_LEN]));

    fs::create_dir(&dir).map_err(|e| UpdateError::io(&dir, e))?;

    info!("Created update session directory {}", dir.display());
    Ok(dir)
}

// ============================================================================
// ZIP Extraction
// ============================================================================

/// Result of a successful extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPackage {
    /// Top-level name of the first archive entry.
    pub root_name: String,
    /// Number of regular files written.
    pub files_written: usize,
}

/// Extracts an in-memory zip archive into `dest_dir`.
///
/// Entries are processed in archive order. The first entry whose resolved path
/// is not strictly inside `dest_dir` stops extraction with
/// [`UpdateError::PathTraversal`]; nothing is written for it or for any entry
/// after it.
pub fn extract_zip_bytes(data: &[u8], dest_dir: &Path) -> Result<ExtractedPackage, UpdateError> {
    let root = dest_dir
        .canonicalize()
        .map_err(|e| UpdateError::io(dest_dir, e))?;

    let mut archive = zip::ZipArchive::new(Cursor::new(data))
        .map_err(|e| UpdateError::Archive(e.to_string()))?;

    if archive.len() == 0 {
        return Err(UpdateError::Archive("package archive is empty".to_string()));
    }

    let mut root_name = None;
    let mut files_written = 0;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| UpdateError::Archive(e.to_string()))?;
        let name = entry.name().to_string();

        // The archive's own check first, then the stricter lexical one, which
        // also splits on backslashes and rejects drive prefixes.
        let Some(dest_path) = entry
            .enclosed_name()
            .and_then(|_| resolve_entry_path(&root, &name))
        else {
            warn!(entry = %name, "Rejecting archive entry outside the extraction root");
            return Err(UpdateError::PathTraversal { entry: name });
        };

        if root_name.is_none() {
            root_name = first_component(&name);
        }

        if entry.is_dir() {
            fs::create_dir_all(&dest_path).map_err(|e| UpdateError::io(&dest_path, e))?;
            continue;
        }

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).map_err(|e| UpdateError::io(parent, e))?;
        }

        let mut outfile =
            File::create(&dest_path).map_err(|e| UpdateError::io(&dest_path, e))?;
        io::copy(&mut entry, &mut outfile).map_err(|e| UpdateError::io(&dest_path, e))?;
        outfile.flush().map_err(|e| UpdateError::io(&dest_path, e))?;

        #[cfg(unix)]
        set_unix_permissions(&dest_path, entry.unix_mode())?;

        files_written += 1;
    }

    let root_name = root_name
        .ok_or_else(|| UpdateError::Archive("package has no top-level entry".to_string()))?;

    debug!(root = %root_name, files_written, "ZIP extraction complete");
    Ok(ExtractedPackage {
        root_name,
        files_written,
    })
}

/// Resolves an archive entry name against `root`.
///
/// Returns `None` unless the result is a strict descendant of `root`. The
/// check is lexical: entries are never written before they pass it, so there
/// is nothing on disk to canonicalize yet.
fn resolve_entry_path(root: &Path, name: &str) -> Option<PathBuf> {
    // Zip names use '/', but hostile archives also use '\'.
    let normalized = name.replace('\\', "/");
    let mut depth = 0usize;
    let mut resolved = root.to_path_buf();

    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                resolved.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    // Windows drive letters such as "C:evil" are only a prefix on Windows.
    if normalized.contains(':') {
        return None;
    }

    (depth > 0 && resolved.starts_with(root) && resolved != root).then_some(resolved)
}

fn first_component(name: &str) -> Option<String> {
    name.replace('\\', "/")
        .split('/')
        .find(|part| !part.is_empty() && *part != ".")
        .map(str::to_string)
}

// ============================================================================
// Unix Permissions
// ============================================================================

#[cfg(unix)]
fn set_unix_permissions(path: &Path, mode: Option<u32>) -> Result<(), UpdateError> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(mode) = mode {
        if mode & 0o111 != 0 {
            let permissions = fs::Permissions::from_mode(mode | 0o755);
            fs::set_permissions(path, permissions).map_err(|e| UpdateError::io(path, e))?;
        }
    }

    Ok(())
}

/// Sets executable permission on a file (Unix only).
///
/// On Windows, this is a no-op.
#[allow(unused_variables)]
pub fn make_executable(path: &Path) -> Result<(), UpdateError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| UpdateError::io(path, e))?;

        let mut permissions = metadata.permissions();
        let current_mode = permissions.mode();
        permissions.set_mode(current_mode | 0o755);

        fs::set_permissions(path, permissions).map_err(|e| UpdateError::io(path, e))?;

        debug!("Set executable permission on {}", path.display());
    }

    Ok(())
}

/// Writes `contents` to `path` and marks the file executable.
pub fn write_executable(path: &Path, contents: &[u8]) -> Result<(), UpdateError> {
    fs::write(path, contents).map_err(|e| UpdateError::io(path, e))?;
    make_executable(path)
}
