//! Names and files the scanner never queues.

use glob::Pattern;
use std::time::{Duration, SystemTime};

const RESERVED_FILE_PATTERNS: &[&str] = &["~$*", "*.enc", ".DS_Store"];
const PLACEHOLDER_FOLDERS: &[&str] = &["New folder", "untitled folder"];

/// Editor lock files, already-encrypted artifacts and the placeholder
/// names file managers give freshly created folders.
#[derive(Debug, Clone)]
pub struct NameFilter {
    reserved_files: Vec<Pattern>,
    placeholder_folders: Vec<String>,
}

impl Default for NameFilter {
    fn default() -> Self {
        Self {
            reserved_files: RESERVED_FILE_PATTERNS
                .iter()
                .filter_map(|p| Pattern::new(p).ok())
                .collect(),
            placeholder_folders: PLACEHOLDER_FOLDERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl NameFilter {
    pub fn is_reserved_file(&self, name: &str) -> bool {
        self.reserved_files.iter().any(|p| p.matches(name))
    }

    pub fn is_placeholder_folder(&self, name: &str) -> bool {
        self.placeholder_folders.iter().any(|p| p == name)
    }
}

/// A file is settled once its last write is at least `window` old. A
/// modification time in the future counts as a write in progress.
pub fn is_settled(modified: SystemTime, now: SystemTime, window: Duration) -> bool {
    now.duration_since(modified)
        .map(|age| age >= window)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_files() {
        let filter = NameFilter::default();
        assert!(filter.is_reserved_file("~$report.docx"));
        assert!(filter.is_reserved_file("secret.enc"));
        assert!(filter.is_reserved_file(".DS_Store"));
        assert!(!filter.is_reserved_file("report.docx"));
        assert!(!filter.is_reserved_file("enc.txt"));
    }

    #[test]
    fn test_placeholder_folders() {
        let filter = NameFilter::default();
        assert!(filter.is_placeholder_folder("New folder"));
        assert!(filter.is_placeholder_folder("untitled folder"));
        assert!(!filter.is_placeholder_folder("New folder (2)"));
    }

    #[test]
    fn test_settled() {
        let now = SystemTime::now();
        let window = Duration::from_secs(10);
        assert!(is_settled(now - Duration::from_secs(60), now, window));
        assert!(is_settled(now - window, now, window));
        assert!(!is_settled(now - Duration::from_secs(2), now, window));
        assert!(!is_settled(now + Duration::from_secs(5), now, window));
    }
}
