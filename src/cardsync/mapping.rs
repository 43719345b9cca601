use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::kind_fail;
use crate::errors::{Error, ErrorKind, Result};
use crate::record::{read_table, Table, NOTE_ID, REMOTE_ID};

/// The persistent Note_ID -> remote note id table.
///
/// Bindings are only ever added. Re-binding a Note_ID to a different remote
/// id, or one remote id to two Note_IDs, is refused.
#[derive(Clone, Debug, Default)]
pub struct MappingTable {
    path: Option<PathBuf>,
    entries: BTreeMap<String, u64>,
}

impl MappingTable {
    /// load the table at `path`; a missing file is an empty table
    pub fn load(path: &Path) -> Result<MappingTable> {
        let mut table = MappingTable {
            path: Some(path.to_path_buf()),
            entries: BTreeMap::new(),
        };
        if !path.exists() {
            debug!(path = %path.display(), "no mapping table yet");
            return Ok(table);
        }

        let tsv = read_table(path)?;
        let (id_col, remote_col) = match (tsv.column(NOTE_ID), tsv.column(REMOTE_ID)) {
            (Some(a), Some(b)) => (a, b),
            _ => return kind_fail!(MalformedSource,
                                   format!("{} needs '{}' and '{}' columns", path.display(), NOTE_ID, REMOTE_ID)),
        };
        for row in tsv.rows.iter() {
            let note_id = row[id_col].trim();
            let remote = row[remote_col].trim();
            if note_id.is_empty() || remote.is_empty() {
                continue;
            }
            let remote_id = match remote.parse::<u64>() {
                Ok(id) => id,
                Err(_) => return kind_fail!(MalformedSource,
                                            format!("mapping for {} has non-numeric id '{}'", note_id, remote)),
            };
            table.bind(note_id, remote_id)?;
        }
        info!(path = %path.display(), entries = table.len(), "loaded mapping table");
        Ok(table)
    }

    pub fn get(&self, note_id: &str) -> Option<u64> {
        self.entries.get(note_id).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &u64)> {
        self.entries.iter()
    }

    /// add a binding in memory; `Ok(false)` when it already existed unchanged
    pub fn bind(&mut self, note_id: &str, remote_id: u64) -> Result<bool> {
        if let Some(existing) = self.entries.get(note_id) {
            if *existing == remote_id {
                return Ok(false);
            }
            return Err(Error {
                kind: ErrorKind::MappingInconsistency,
                desc: format!("{} is bound to remote note {}, refusing to rebind to {}",
                              note_id, existing, remote_id),
                detail: None,
            });
        }
        if let Some((other, _)) = self.entries.iter().find(|(_, id)| **id == remote_id) {
            return kind_fail!(MappingInconsistency,
                              format!("remote note {} already belongs to {}", remote_id, other));
        }
        self.entries.insert(note_id.to_string(), remote_id);
        Ok(true)
    }

    /// bind and make the binding durable before returning
    pub fn record(&mut self, note_id: &str, remote_id: u64) -> Result<()> {
        if self.bind(note_id, remote_id)? {
            self.save()?;
            info!(note_id = %note_id, remote_id, "recorded new mapping");
        }
        Ok(())
    }

    pub fn to_table(&self) -> Table {
        let mut table = Table::new(vec![NOTE_ID.to_string(), REMOTE_ID.to_string()]);
        for (note_id, remote_id) in self.entries.iter() {
            table.rows.push(vec![note_id.clone(), remote_id.to_string()]);
        }
        table
    }

    /// write atomically: temp file in the same folder, fsync, rename
    pub fn save(&self) -> Result<()> {
        let path = match self.path {
            Some(ref p) => p,
            None => return Ok(()),
        };
        let dir = match path.parent() {
            Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(self.to_table().to_tsv().as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_an_empty_table() {
        let dir = tempdir().unwrap();
        let table = MappingTable::load(&dir.path().join("map.tsv")).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn recorded_bindings_survive_a_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("map.tsv");
        let mut table = MappingTable::load(&path).unwrap();
        table.record("B", 20).unwrap();
        table.record("A", 10).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "note_id\tnoteId\nA\t10\nB\t20\n");
        let again = MappingTable::load(&path).unwrap();
        assert_eq!(again.get("A"), Some(10));
        assert_eq!(again.get("B"), Some(20));
    }

    #[test]
    fn rebinding_is_an_inconsistency() {
        let mut table = MappingTable::default();
        assert!(table.bind("A", 1).unwrap());
        assert!(!table.bind("A", 1).unwrap());
        let err = table.bind("A", 2).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::MappingInconsistency));
        assert!(matches!(table.bind("B", 1).unwrap_err().kind, ErrorKind::MappingInconsistency));
        assert_eq!(table.get("A"), Some(1));
    }

    #[test]
    fn extra_columns_are_ignored_on_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("map.tsv");
        fs::write(&path, "note_id\tnoteId\tcomment\nA\t5\tfirst import\nB\t\t\n").unwrap();
        let table = MappingTable::load(&path).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("A"), Some(5));
    }

    #[test]
    fn conflicting_rows_on_disk_are_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("map.tsv");
        fs::write(&path, "note_id\tnoteId\nA\t5\nA\t6\n").unwrap();
        assert!(MappingTable::load(&path).is_err());
    }
}
