//! The flat directory: a fixed-capacity table binding file names to inodes.

use crate::layout::MAX_FILE;

/// One name-to-inode binding. Slots are reused after deletion; an invalid
/// entry keeps no name and no inode reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: Option<String>,
    pub valid: bool,
    pub inode: Option<usize>,
    pub hidden: bool,
    pub readonly: bool,
}

impl DirectoryEntry {
    /// Return the slot to its empty state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// The entry's name, or "" for an empty slot.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryTable {
    entries: Vec<DirectoryEntry>,
}

impl DirectoryTable {
    pub fn new() -> Self {
        Self {
            entries: vec![DirectoryEntry::default(); MAX_FILE],
        }
    }

    /// First-fit scan: lowest invalid slot, if any. Pure query.
    pub fn find_free(&self) -> Option<usize> {
        self.entries.iter().position(|entry| !entry.valid)
    }

    /// Lowest valid entry with an exact name match.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.valid && entry.name() == name)
    }

    /// Lowest valid, non-read-only entry with an exact name match.
    /// Read-only matches are skipped, indistinguishable from absence.
    pub fn find_deletable(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.valid && !entry.readonly && entry.name() == name)
    }

    pub fn entry(&self, idx: usize) -> &DirectoryEntry {
        &self.entries[idx]
    }

    pub fn entry_mut(&mut self, idx: usize) -> &mut DirectoryEntry {
        &mut self.entries[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.entries.iter()
    }

    pub fn valid_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.valid).count()
    }
}

impl Default for DirectoryTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occupy(table: &mut DirectoryTable, idx: usize, name: &str) {
        let entry = table.entry_mut(idx);
        entry.name = Some(name.to_string());
        entry.valid = true;
        entry.inode = Some(idx);
    }

    #[test]
    fn test_find_free_reuses_lowest_slot() {
        let mut table = DirectoryTable::new();
        assert_eq!(table.find_free(), Some(0));
        occupy(&mut table, 0, "a");
        occupy(&mut table, 1, "b");
        assert_eq!(table.find_free(), Some(2));
        table.entry_mut(0).reset();
        assert_eq!(table.find_free(), Some(0));
    }

    #[test]
    fn test_find_skips_invalid_entries() {
        let mut table = DirectoryTable::new();
        occupy(&mut table, 3, "ghost");
        table.entry_mut(3).valid = false;
        assert_eq!(table.find("ghost"), None);
        occupy(&mut table, 5, "real");
        assert_eq!(table.find("real"), Some(5));
    }

    #[test]
    fn test_find_deletable_skips_readonly_match() {
        let mut table = DirectoryTable::new();
        occupy(&mut table, 0, "locked");
        table.entry_mut(0).readonly = true;
        assert_eq!(table.find("locked"), Some(0));
        assert_eq!(table.find_deletable("locked"), None);
        table.entry_mut(0).readonly = false;
        assert_eq!(table.find_deletable("locked"), Some(0));
    }
}
