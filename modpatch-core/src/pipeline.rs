use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::bytes::BytePatch;
use crate::changes::{ChangeSet, StringSection, TargetFile, DEFAULT_MIRROR_SOURCE};
use crate::codec::{self, tlk};
use crate::install::{self, CopyOutcome};
use crate::memory::TokenStore;
use crate::strings::append_strings;
use crate::table::Table;
use crate::table_patch::TableModifier;
use crate::tree::Tree;
use crate::tree_patch::TreeModifier;
use crate::{PatchError, PatcherSettings, Result};

/// String table in the game root that appended strings go to.
pub const STRING_TABLE: &str = "dialog.tlk";
/// Feminine-locale twin of [`STRING_TABLE`], kept in step when present.
pub const MIRROR_STRING_TABLE: &str = "dialogf.tlk";
pub const INSTALL_LOG: &str = "installlog.txt";

/// Sections run in this order; a later phase may read tokens only earlier
/// phases produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Strings,
    InstallCopy,
    Tables,
    Trees,
    Bytes,
    FinalInstall,
}

impl Phase {
    pub const ORDER: [Phase; 6] = [
        Phase::Strings,
        Phase::InstallCopy,
        Phase::Tables,
        Phase::Trees,
        Phase::Bytes,
        Phase::FinalInstall,
    ];
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Strings => "string table append",
            Phase::InstallCopy => "file install",
            Phase::Tables => "table modification",
            Phase::Trees => "tree modification",
            Phase::Bytes => "byte patching",
            Phase::FinalInstall => "final install",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub phase: Phase,
    pub file: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Files written, relative to the game root.
    pub written: Vec<String>,
    /// Skipped operations and kept files.
    pub warnings: Vec<String>,
    pub failures: Vec<FileFailure>,
    pub string_tokens: usize,
    pub memory_tokens: usize,
    pub dry_run: bool,
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    fn warn(&mut self, message: String) {
        log::warn!("{message}");
        self.warnings.push(message);
    }

    fn fail(&mut self, phase: Phase, file: &str, error: PatchError) {
        let error = error.located(file, None);
        log::error!("{error}");
        self.failures.push(FileFailure {
            phase,
            file: file.to_string(),
            error: error.to_string(),
        });
    }

    fn render(&self) -> String {
        let mut log = String::from("Install log\n");
        if self.dry_run {
            log.push_str("dry run: nothing was written\n");
        }
        log.push_str(&format!(
            "tokens: {} string, {} memory\n",
            self.string_tokens, self.memory_tokens
        ));
        log.push_str(&format!("written ({}):\n", self.written.len()));
        for file in &self.written {
            log.push_str(&format!("  {file}\n"));
        }
        log.push_str(&format!("warnings ({}):\n", self.warnings.len()));
        for warning in &self.warnings {
            log.push_str(&format!("  {warning}\n"));
        }
        log.push_str(&format!("failed files ({}):\n", self.failures.len()));
        for failure in &self.failures {
            log.push_str(&format!("  [{}] {}\n", failure.phase, failure.error));
        }
        log
    }
}

/// A document type a target file is loaded into, and the operation that
/// mutates it.
trait FileModifier {
    type Doc;

    fn load(data: &[u8]) -> Result<Self::Doc>;
    fn save(doc: &Self::Doc) -> Result<Vec<u8>>;
    fn apply(&self, doc: &mut Self::Doc, tokens: &mut TokenStore) -> Result<()>;
}

impl FileModifier for TableModifier {
    type Doc = Table;

    fn load(data: &[u8]) -> Result<Table> {
        codec::load_table(data)
    }

    fn save(doc: &Table) -> Result<Vec<u8>> {
        codec::save_table(doc)
    }

    fn apply(&self, doc: &mut Table, tokens: &mut TokenStore) -> Result<()> {
        TableModifier::apply(self, doc, tokens)
    }
}

impl FileModifier for TreeModifier {
    type Doc = Tree;

    fn load(data: &[u8]) -> Result<Tree> {
        codec::load_tree(data)
    }

    fn save(doc: &Tree) -> Result<Vec<u8>> {
        codec::save_tree(doc)
    }

    fn apply(&self, doc: &mut Tree, tokens: &mut TokenStore) -> Result<()> {
        TreeModifier::apply(self, doc, tokens)
    }
}

impl FileModifier for BytePatch {
    type Doc = Vec<u8>;

    fn load(data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn save(doc: &Vec<u8>) -> Result<Vec<u8>> {
        Ok(doc.clone())
    }

    fn apply(&self, doc: &mut Vec<u8>, tokens: &mut TokenStore) -> Result<()> {
        BytePatch::apply(self, doc, tokens)
    }
}

struct Patcher {
    settings: PatcherSettings,
    tokens: TokenStore,
    summary: RunSummary,
}

pub fn run(settings: PatcherSettings) -> Result<RunSummary> {
    if !settings.game_path.is_dir() {
        return Err(PatchError::Config(format!(
            "Game path does not exist: {}",
            settings.game_path.display()
        )));
    }
    if !settings.mod_path.is_dir() {
        return Err(PatchError::Config(format!(
            "Mod path does not exist: {}",
            settings.mod_path.display()
        )));
    }

    let changes = ChangeSet::load(&settings.changes_path())?;
    log::info!(
        "loaded {} ({} operation(s))",
        settings.changes_path().display(),
        changes.operation_count()
    );

    let mut patcher = Patcher {
        summary: RunSummary {
            dry_run: settings.dry_run,
            ..RunSummary::default()
        },
        settings,
        tokens: TokenStore::new(),
    };
    for phase in Phase::ORDER {
        log::info!("== {phase} ==");
        match phase {
            Phase::Strings => patcher.strings(&changes.strings),
            Phase::InstallCopy => patcher.install_copy(&changes),
            Phase::Tables => patcher.patch_files(phase, &changes.tables),
            Phase::Trees => patcher.patch_files(phase, &changes.trees),
            Phase::Bytes => patcher.patch_files(phase, &changes.bytes),
            Phase::FinalInstall => patcher.final_install(),
        }
    }

    let summary = patcher.summary;
    log::info!(
        "done: {} written, {} warning(s), {} failed file(s)",
        summary.written.len(),
        summary.warnings.len(),
        summary.failures.len()
    );
    Ok(summary)
}

impl Patcher {
    fn game_relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.settings.game_path)
            .unwrap_or(path)
            .display()
            .to_string()
    }

    fn record_written(&mut self, path: &Path) {
        let name = self.game_relative(path);
        log::info!("wrote {name}");
        self.summary.written.push(name);
    }

    fn strings(&mut self, section: &StringSection) {
        if section.appends.is_empty() {
            return;
        }
        if let Err(e) = self.append_strings(section) {
            self.summary.fail(Phase::Strings, STRING_TABLE, e);
        }
    }

    fn append_strings(&mut self, section: &StringSection) -> Result<()> {
        let game = &self.settings.game_path;
        let mod_dir = &self.settings.mod_path;

        let source_path = install::find_in_dir(mod_dir, &section.source).ok_or_else(|| {
            PatchError::SourceNotFound {
                what: format!("string source '{}' in {}", section.source, mod_dir.display()),
            }
        })?;
        let mirror_source_path = match &section.mirror_source {
            Some(name) => Some(install::find_in_dir(mod_dir, name).ok_or_else(|| {
                PatchError::SourceNotFound {
                    what: format!("mirrored string source '{name}' in {}", mod_dir.display()),
                }
            })?),
            None => install::find_in_dir(mod_dir, DEFAULT_MIRROR_SOURCE),
        };
        let dest_path = install::find_in_dir(game, STRING_TABLE).ok_or_else(|| {
            PatchError::SourceNotFound {
                what: format!("{STRING_TABLE} in {}", game.display()),
            }
        })?;
        let mirror_dest_path = install::find_in_dir(game, MIRROR_STRING_TABLE);

        let source = tlk::load_strings(&fs::read(&source_path)?)?;
        let mirror_source = match &mirror_source_path {
            Some(path) => Some(tlk::load_strings(&fs::read(path)?)?),
            None => None,
        };
        let mut dest = tlk::load_strings(&fs::read(&dest_path)?)?;
        let mut mirror_dest = match &mirror_dest_path {
            Some(path) => Some(tlk::load_strings(&fs::read(path)?)?),
            None => None,
        };
        match &mirror_dest {
            Some(mirror) if mirror.len() != dest.len() => self.summary.warn(format!(
                "{MIRROR_STRING_TABLE} has {} entries and {STRING_TABLE} has {}; \
                 appended strings land at different indices in the two tables",
                mirror.len(),
                dest.len()
            )),
            None if mirror_source.is_some() => {
                log::debug!("no {MIRROR_STRING_TABLE} installed; mirrored strings are not used")
            }
            _ => {}
        }

        let indices = append_strings(
            &mut dest,
            mirror_dest.as_mut(),
            &source,
            mirror_source.as_ref(),
            &section.appends,
            &mut self.tokens,
        )?;
        log::info!("appended {} string(s) to {STRING_TABLE}", indices.len());

        if self.settings.dry_run {
            return Ok(());
        }
        let data = tlk::save_strings(&dest)?;
        let mirror = match (mirror_dest_path, &mirror_dest) {
            (Some(path), Some(table)) => Some((path, tlk::save_strings(table)?)),
            _ => None,
        };
        fs::write(&dest_path, data)?;
        self.record_written(&dest_path);
        if let Some((path, data)) = mirror {
            if let Err(e) = fs::write(&path, data) {
                let message = format!(
                    "{STRING_TABLE} was updated but {} was not; the two tables are out of step",
                    self.game_relative(&path)
                );
                self.summary.warn(message);
                return Err(e.into());
            }
            self.record_written(&path);
        }
        Ok(())
    }

    fn install_copy(&mut self, changes: &ChangeSet) {
        for folder in &changes.installs {
            let dest_dir = match install::destination_dir(&self.settings.game_path, &folder.destination) {
                Ok(dir) => dir,
                Err(e) => {
                    self.summary.fail(Phase::InstallCopy, &folder.destination, e);
                    continue;
                }
            };
            let source_dir = install::resolve_dir(&self.settings.mod_path, &folder.source_folder);
            for file in &folder.files {
                match install::install_file(&source_dir, &dest_dir, file, self.settings.dry_run) {
                    Ok(CopyOutcome::Kept(path)) => {
                        let message = format!(
                            "{} already exists; kept the installed copy",
                            self.game_relative(&path)
                        );
                        self.summary.warn(message);
                    }
                    Ok(CopyOutcome::Copied(path) | CopyOutcome::Replaced(path)) => {
                        if self.settings.dry_run {
                            log::info!("dry run: would copy {}", file.name);
                        } else {
                            self.record_written(&path);
                        }
                    }
                    Err(e) => self.summary.fail(Phase::InstallCopy, &file.name, e),
                }
            }
        }
    }

    fn patch_files<M: FileModifier>(&mut self, phase: Phase, targets: &[TargetFile<M>]) {
        for target in targets {
            log::info!("patching {} ({} operation(s))", target.name, target.operations.len());
            match self.patch_file(target) {
                Ok(Some(path)) => self.record_written(&path),
                Ok(None) => log::info!("dry run: {} not written", target.output_name()),
                Err(e) => self.summary.fail(phase, &target.name, e),
            }
        }
    }

    /// Load, apply every operation in order, then flush. A fatal error
    /// abandons the file before anything is written.
    fn patch_file<M: FileModifier>(&mut self, target: &TargetFile<M>) -> Result<Option<PathBuf>> {
        let dest_dir = install::destination_dir(&self.settings.game_path, &target.destination)?;
        let source = install::locate_source(
            &dest_dir,
            &self.settings.mod_path,
            target.output_name(),
            target.source_name(),
            target.replace,
        )?;
        log::debug!("{} loaded from {}", target.name, source.display());
        let mut doc = M::load(&fs::read(&source)?)?;

        for op in &target.operations {
            match op.modifier.apply(&mut doc, &mut self.tokens) {
                Ok(()) => log::debug!("{}: applied {}", target.name, op.reference()),
                Err(e) => {
                    let e = e.located(&target.name, Some(op.reference()));
                    if e.is_fatal() {
                        return Err(e);
                    }
                    self.summary.warn(format!("skipped: {e}"));
                }
            }
        }

        let data = M::save(&doc)?;
        if self.settings.dry_run {
            return Ok(None);
        }
        install::write_output(&dest_dir, target.output_name(), &data).map(Some)
    }

    fn final_install(&mut self) {
        let (strings, memory) = self.tokens.counts();
        self.summary.string_tokens = strings;
        self.summary.memory_tokens = memory;

        if self.settings.dry_run || !self.settings.write_install_log {
            return;
        }
        let path = self.settings.game_path.join(INSTALL_LOG);
        if let Err(e) = fs::write(&path, self.summary.render()) {
            self.summary.fail(Phase::FinalInstall, INSTALL_LOG, e.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_run_producers_before_consumers() {
        assert_eq!(
            Phase::ORDER,
            [
                Phase::Strings,
                Phase::InstallCopy,
                Phase::Tables,
                Phase::Trees,
                Phase::Bytes,
                Phase::FinalInstall
            ]
        );
    }

    #[test]
    fn missing_folders_are_configuration_errors() {
        let dir = tempfile::tempdir().unwrap();
        let settings = PatcherSettings::new(dir.path().join("nope"), dir.path());
        assert!(matches!(run(settings), Err(PatchError::Config(_))));
    }

    #[test]
    fn render_lists_everything() {
        let summary = RunSummary {
            written: vec!["Override\\spells.2da".to_string()],
            warnings: vec!["skipped: x".to_string()],
            failures: vec![FileFailure {
                phase: Phase::Trees,
                file: "a.utc".to_string(),
                error: "a.utc: boom".to_string(),
            }],
            string_tokens: 1,
            memory_tokens: 2,
            dry_run: false,
        };
        let text = summary.render();
        assert!(text.contains("Override\\spells.2da"));
        assert!(text.contains("skipped: x"));
        assert!(text.contains("[tree modification] a.utc: boom"));
        assert!(!summary.succeeded());
    }
}
