use crate::errors::Result;
use chrono::Local;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Append-only Markdown notes, one file per tool
#[derive(Debug, Clone)]
pub struct NotesStore {
    notes_dir: PathBuf,
}

/// Where a save landed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedNote {
    pub file_name: String,
    pub path: PathBuf,
    pub timestamp: String,
}

impl NotesStore {
    pub fn new(notes_dir: impl Into<PathBuf>) -> Self {
        Self {
            notes_dir: notes_dir.into(),
        }
    }

    pub fn notes_dir(&self) -> &Path {
        &self.notes_dir
    }

    fn file_name(tool_name: &str) -> String {
        format!("{}.md", tool_name.replace(['/', '\\'], "_"))
    }

    /// Append a timestamped entry, creating the file with a header on first use
    pub fn save(&self, tool_name: &str, markdown_notes: &str) -> Result<SavedNote> {
        std::fs::create_dir_all(&self.notes_dir)?;

        let file_name = Self::file_name(tool_name);
        let path = self.notes_dir.join(&file_name);
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let is_new = !path.exists();

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        if is_new {
            writeln!(file, "# Tool Usage Notes: {}", tool_name)?;
        }
        writeln!(file, "\n\n---\n**Added:** {}\n\n{}", timestamp, markdown_notes)?;

        info!("Notes saved to {}", path.display());
        Ok(SavedNote {
            file_name,
            path,
            timestamp,
        })
    }

    /// Full notes for a tool, `None` when nothing has been saved yet
    pub fn read(&self, tool_name: &str) -> Result<Option<String>> {
        let path = self.notes_dir.join(Self::file_name(tool_name));
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        info!("Read {} characters of notes for {}", content.len(), tool_name);
        Ok(Some(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_then_read_appends() {
        let dir = tempfile::tempdir().unwrap();
        let store = NotesStore::new(dir.path().join("tool_notes"));

        let first = store.save("perplexity_sonar", "**Tip:** be specific").unwrap();
        assert_eq!(first.file_name, "perplexity_sonar.md");
        store.save("perplexity_sonar", "second lesson").unwrap();

        let content = store.read("perplexity_sonar").unwrap().unwrap();
        assert!(content.starts_with("# Tool Usage Notes: perplexity_sonar\n"));
        assert_eq!(content.matches("# Tool Usage Notes").count(), 1);
        assert_eq!(content.matches("**Added:** ").count(), 2);
        assert!(content.contains(&format!("**Added:** {}", first.timestamp)));
        let a = content.find("be specific").unwrap();
        let b = content.find("second lesson").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_read_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = NotesStore::new(dir.path());
        assert_eq!(store.read("nothing").unwrap(), None);
    }

    #[test]
    fn test_tool_name_with_separators() {
        let dir = tempfile::tempdir().unwrap();
        let store = NotesStore::new(dir.path());
        let saved = store.save("ns/tool\\x", "n").unwrap();
        assert_eq!(saved.file_name, "ns_tool_x.md");
        assert!(store.read("ns/tool\\x").unwrap().is_some());
    }
}
