use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::token::{normalize_token_hex, InputError};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("token is already registered")]
    AlreadyRegistered,
    #[error("token not found")]
    NotFound,
    #[error("malformed token: {0}")]
    MalformedToken(#[from] InputError),
    #[error("ledger storage failure: {0}")]
    Storage(#[from] io::Error),
}

/// A set of token hashes keyed by their lowercase hex form. A token is added
/// when its signature is issued and removed when its vote is accepted;
/// [`TokenStore::consume_once`] is the only guard against double voting.
pub trait TokenStore {
    /// Adds the token; rejects it if already present.
    fn register_token(&mut self, token_hex: &str) -> Result<(), LedgerError>;

    fn exists(&self, token_hex: &str) -> Result<bool, LedgerError>;

    /// Removes the token atomically, or reports [`LedgerError::NotFound`]
    /// without touching the store.
    fn consume_once(&mut self, token_hex: &str) -> Result<(), LedgerError>;

    /// Number of unspent tokens.
    fn len(&self) -> Result<usize, LedgerError>;

    fn is_empty(&self) -> Result<bool, LedgerError> {
        Ok(self.len()? == 0)
    }
}

/// In-memory store, used for tests and ephemeral elections.
#[derive(Debug, Default, Clone)]
pub struct MemLedger {
    inner: BTreeSet<String>,
}

impl MemLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemLedger {
    fn register_token(&mut self, token_hex: &str) -> Result<(), LedgerError> {
        let key = normalize_token_hex(token_hex)?;
        if !self.inner.insert(key) {
            return Err(LedgerError::AlreadyRegistered);
        }
        Ok(())
    }

    fn exists(&self, token_hex: &str) -> Result<bool, LedgerError> {
        let key = normalize_token_hex(token_hex)?;
        Ok(self.inner.contains(&key))
    }

    fn consume_once(&mut self, token_hex: &str) -> Result<(), LedgerError> {
        let key = normalize_token_hex(token_hex)?;
        if !self.inner.remove(&key) {
            return Err(LedgerError::NotFound);
        }
        Ok(())
    }

    fn len(&self) -> Result<usize, LedgerError> {
        Ok(self.inner.len())
    }
}

/// Line-oriented file store: one 64-character lowercase hex token per line.
///
/// Registration appends; consumption rewrites the file to a sibling temp
/// file and renames it over the original, so an interrupted write never
/// leaves a partial ledger behind.
#[derive(Debug, Clone)]
pub struct FileLedger {
    path: PathBuf,
}

impl FileLedger {
    /// Opens the ledger at `path`, creating an empty file if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        OpenOptions::new().create(true).append(true).open(&path)?;
        sync_parent_dir(&path)?;
        log::debug!("opened token ledger at {}", path.display());
        Ok(FileLedger { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn read_entries(&self) -> Result<Vec<String>, LedgerError> {
        let file = File::open(&self.path)?;
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            entries.push(line);
        }
        Ok(entries)
    }
}

/// Flushes the directory entry for `path` so a create or rename survives a
/// crash.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

impl TokenStore for FileLedger {
    fn register_token(&mut self, token_hex: &str) -> Result<(), LedgerError> {
        let key = normalize_token_hex(token_hex)?;
        if self.read_entries()?.contains(&key) {
            return Err(LedgerError::AlreadyRegistered);
        }
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "{}", key)?;
        file.sync_data()?;
        Ok(())
    }

    fn exists(&self, token_hex: &str) -> Result<bool, LedgerError> {
        let key = normalize_token_hex(token_hex)?;
        Ok(self.read_entries()?.contains(&key))
    }

    fn consume_once(&mut self, token_hex: &str) -> Result<(), LedgerError> {
        let key = normalize_token_hex(token_hex)?;
        let mut entries = self.read_entries()?;
        let position = entries
            .iter()
            .position(|entry| *entry == key)
            .ok_or(LedgerError::NotFound)?;
        entries.remove(position);

        let temp_path = self.temp_path();
        {
            let mut writer = BufWriter::new(File::create(&temp_path)?);
            for entry in &entries {
                writeln!(writer, "{}", entry)?;
            }
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }
        if let Err(err) = fs::rename(&temp_path, &self.path) {
            log::warn!("ledger rename failed, original left intact: {}", err);
            let _ = fs::remove_file(&temp_path);
            return Err(err.into());
        }
        // The token is already gone from the live file, so the removal
        // stands even if the directory entry cannot be flushed.
        if let Err(err) = sync_parent_dir(&self.path) {
            log::warn!("ledger directory sync failed after rename: {}", err);
        }
        Ok(())
    }

    fn len(&self) -> Result<usize, LedgerError> {
        Ok(self.read_entries()?.len())
    }
}
