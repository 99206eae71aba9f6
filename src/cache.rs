//! On-disk cache of rendered Stan sources and compiled executables
//!
//! Layout: `<root>/<fingerprint>.stan` next to `<root>/<fingerprint>`
//! (plus the platform executable suffix), with any `make` leftovers such as
//! `<fingerprint>.hpp` beside them. Entries live until removed with
//! [`ArtifactCache::clean`] or overwritten by a forced recompilation.
//!
//! There is no cross-process locking. Two processes compiling the same
//! fingerprint may both run `make`; the source file is replaced atomically
//! so neither ever reads a partial model.

use crate::error::Result;
use crate::model::Fingerprint;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Fingerprint-keyed artifact store
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
}

/// One cached model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub source: Option<PathBuf>,
    pub executable: Option<PathBuf>,
    /// Build leftovers sharing the fingerprint stem (`.hpp`, `.o`, `.d`)
    pub intermediates: Vec<PathBuf>,
}

impl ArtifactCache {
    /// Open (creating if needed) a cache rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root.join(format!("{}.stan", fingerprint))
    }

    pub fn executable_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root
            .join(format!("{}{}", fingerprint, std::env::consts::EXE_SUFFIX))
    }

    /// Executable for `fingerprint`, if one has been compiled.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<PathBuf> {
        let exe = self.executable_path(fingerprint);
        exe.is_file().then_some(exe)
    }

    /// Persist rendered Stan code for `fingerprint`, returning its path.
    pub fn write_source(&self, fingerprint: &Fingerprint, code: &str) -> Result<PathBuf> {
        let path = self.source_path(fingerprint);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.write_all(code.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        tracing::debug!(path = %path.display(), "wrote model source");
        Ok(path)
    }

    /// Remove a stale executable so the next build starts from scratch.
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> Result<()> {
        let exe = self.executable_path(fingerprint);
        if exe.exists() {
            fs::remove_file(&exe)?;
            tracing::debug!(path = %exe.display(), "removed cached executable");
        }
        Ok(())
    }

    /// All cached models, sorted by fingerprint.
    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        let mut entries: Vec<CacheEntry> = Vec::new();

        let mut paths: Vec<PathBuf> = fs::read_dir(&self.root)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        for path in paths {
            let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            let stem = name.split('.').next().unwrap_or(name);
            if !is_fingerprint(stem) {
                continue;
            }

            let idx = match entries.iter().position(|e| e.fingerprint == stem) {
                Some(idx) => idx,
                None => {
                    entries.push(CacheEntry {
                        fingerprint: stem.to_string(),
                        source: None,
                        executable: None,
                        intermediates: Vec::new(),
                    });
                    entries.len() - 1
                }
            };
            let entry = &mut entries[idx];
            if name == format!("{}.stan", stem) {
                entry.source = Some(path);
            } else if name == format!("{}{}", stem, std::env::consts::EXE_SUFFIX) {
                entry.executable = Some(path);
            } else {
                entry.intermediates.push(path);
            }
        }

        entries.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        Ok(entries)
    }

    /// Delete every cached source, executable and build leftover. Returns
    /// the number of files removed.
    pub fn clean(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in self.entries()? {
            let files = [entry.source, entry.executable]
                .into_iter()
                .flatten()
                .chain(entry.intermediates);
            for path in files {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        tracing::info!(root = %self.root.display(), removed, "cleaned model cache");
        Ok(removed)
    }
}

fn is_fingerprint(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}
