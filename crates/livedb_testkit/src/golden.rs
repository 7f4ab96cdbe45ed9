//! Golden test utilities for change set formats.
//!
//! Values are serialized with serde_json and compared structurally with
//! the expected JSON file, so formatting of the file does not matter.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// A golden test that compares serialized values against expected files.
pub struct GoldenTest {
    name: String,
    golden_dir: PathBuf,
    update_mode: bool,
}

impl GoldenTest {
    /// Creates a new golden test reading files from `golden_dir`.
    pub fn new(name: impl Into<String>, golden_dir: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            golden_dir: golden_dir.as_ref().to_path_buf(),
            update_mode: std::env::var("UPDATE_GOLDEN").is_ok(),
        }
    }

    /// Creates a golden test using the testkit's `golden` directory.
    pub fn with_default_dir(name: impl Into<String>) -> Self {
        Self::new(name, PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("golden"))
    }

    /// Asserts that `actual` serializes to the JSON in the golden file.
    ///
    /// If the `UPDATE_GOLDEN` environment variable is set, rewrites the
    /// golden file instead.
    pub fn assert_json<T: Serialize>(&self, suffix: &str, actual: &T) {
        let path = self.file_path(suffix);
        let actual = serde_json::to_value(actual).expect("Failed to serialize value");
        let rendered = serde_json::to_string_pretty(&actual).expect("Failed to render JSON");

        if self.update_mode {
            self.update_golden_file(&path, rendered.as_bytes());
            return;
        }

        if !path.exists() {
            panic!(
                "Golden file not found: {:?}\n\
                 Run with UPDATE_GOLDEN=1 to create it.\n\
                 Actual:\n{}",
                path, rendered
            );
        }

        let text = fs::read_to_string(&path).expect("Failed to read golden file");
        let expected: serde_json::Value = serde_json::from_str(&text).expect("Golden file is not JSON");

        if actual != expected {
            panic!(
                "Golden test '{}' failed for '{}':\n\
                 --- Expected ---\n{}\n\
                 --- Actual ---\n{}\n\
                 Run with UPDATE_GOLDEN=1 to update.",
                self.name, suffix, text, rendered
            );
        }
    }

    fn file_path(&self, suffix: &str) -> PathBuf {
        let filename = if suffix.is_empty() {
            format!("{}.json", self.name)
        } else {
            format!("{}_{}.json", self.name, suffix)
        };
        self.golden_dir.join(filename)
    }

    fn update_golden_file(&self, path: &Path, data: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create golden directory");
        }
        fs::write(path, data).expect("Failed to write golden file");
        println!("Updated golden file: {:?}", path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livedb_notify::{ChangeSet, DictionaryChangeSet, IndexSet};

    #[test]
    fn change_set_format() {
        let mut changes = ChangeSet::default();
        changes.deletions.add(1);
        changes.insertions.add_range(2, 4);
        changes.modifications.add(0);
        changes.modifications_new.add(0);
        GoldenTest::with_default_dir("change_set").assert_json("basic", &changes);
    }

    #[test]
    fn dictionary_change_set_format() {
        let changes = DictionaryChangeSet {
            deletions: vec!["b".to_owned()],
            insertions: vec!["c".to_owned()],
            modifications: vec!["a".to_owned()],
            collection_root_was_deleted: false,
        };
        GoldenTest::with_default_dir("dictionary_change_set").assert_json("", &changes);
    }

    #[test]
    fn compares_structurally() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("set.json"), "{ \"ranges\": [[0, 2], [5, 6]] }").unwrap();
        let mut set = IndexSet::new();
        set.add_range(0, 2);
        set.add(5);
        GoldenTest::new("set", dir.path()).assert_json("", &set);
    }
}
