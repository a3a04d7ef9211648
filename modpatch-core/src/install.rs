use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::changes::InstallFile;
use crate::{PatchError, Result};

/// Container formats the patcher cannot write into.
const ARCHIVE_EXTENSIONS: [&str; 4] = ["mod", "erf", "rim", "sav"];

/// `name` inside `dir`, matching the file name case-insensitively when there
/// is no exact match.
pub(crate) fn find_in_dir(dir: &Path, name: &str) -> Option<PathBuf> {
    let exact = dir.join(name);
    if exact.exists() {
        return Some(exact);
    }
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .find(|entry| entry.file_name().to_string_lossy().eq_ignore_ascii_case(name))
        .map(|entry| entry.into_path())
}

/// Resolve a relative folder one component at a time so `override` finds
/// an existing `Override`. Components that do not exist yet are kept as given.
pub(crate) fn resolve_dir(base: &Path, relative: &str) -> PathBuf {
    let mut path = base.to_path_buf();
    for part in relative.split(['/', '\\']) {
        if part.is_empty() || part == "." {
            continue;
        }
        path = find_in_dir(&path, part).unwrap_or_else(|| path.join(part));
    }
    path
}

/// Folder in the game installation a destination names.
pub(crate) fn destination_dir(game: &Path, destination: &str) -> Result<PathBuf> {
    let is_archive = Path::new(destination)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ARCHIVE_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(ext)));
    if is_archive {
        return Err(PatchError::Config(format!(
            "destination '{destination}' is an archive; only folders are supported"
        )));
    }
    Ok(resolve_dir(game, destination))
}

/// The file a target starts from: the destination's copy, else the mod's.
/// `replace` prefers the mod's copy.
pub(crate) fn locate_source(
    dest_dir: &Path,
    mod_dir: &Path,
    output_name: &str,
    source_name: &str,
    replace: bool,
) -> Result<PathBuf> {
    let installed = || find_in_dir(dest_dir, output_name);
    let shipped = || find_in_dir(mod_dir, source_name);
    let found = if replace {
        shipped().or_else(installed)
    } else {
        installed().or_else(shipped)
    };
    found.ok_or_else(|| PatchError::SourceNotFound {
        what: format!(
            "'{output_name}' is neither in {} nor shipped as '{source_name}' in {}",
            dest_dir.display(),
            mod_dir.display()
        ),
    })
}

/// Write `data` as `name` in `dir`, reusing the existing file's spelling.
pub(crate) fn write_output(dir: &Path, name: &str, data: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = find_in_dir(dir, name).unwrap_or_else(|| dir.join(name));
    fs::write(&path, data)?;
    Ok(path)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CopyOutcome {
    Copied(PathBuf),
    Replaced(PathBuf),
    /// Already present and not marked for replacement.
    Kept(PathBuf),
}

pub(crate) fn install_file(
    source_dir: &Path,
    dest_dir: &Path,
    file: &InstallFile,
    dry_run: bool,
) -> Result<CopyOutcome> {
    let source = find_in_dir(source_dir, &file.name).ok_or_else(|| PatchError::SourceNotFound {
        what: format!("'{}' in {}", file.name, source_dir.display()),
    })?;
    let existing = find_in_dir(dest_dir, &file.name);
    let outcome = match existing {
        Some(path) if !file.replace => return Ok(CopyOutcome::Kept(path)),
        Some(path) => CopyOutcome::Replaced(path),
        None => CopyOutcome::Copied(dest_dir.join(&file.name)),
    };
    if !dry_run {
        fs::create_dir_all(dest_dir)?;
        let target = match &outcome {
            CopyOutcome::Copied(p) | CopyOutcome::Replaced(p) | CopyOutcome::Kept(p) => p,
        };
        fs::copy(&source, target)?;
    }
    Ok(outcome)
}
