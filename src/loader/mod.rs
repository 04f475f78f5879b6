//! Username input: inline lists and one-per-line files.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// One username per line; blank lines and `#` comments are skipped.
pub fn load_usernames(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read usernames from {:?}", path))?;
    let names = parse_usernames(&text);
    debug!("{} usernames in {:?}", names.len(), path);
    Ok(names)
}

pub fn parse_usernames(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Inline names first, then file names; duplicates dropped, first
/// occurrence wins.
pub fn collect_usernames(inline: &[String], file: Option<&Path>) -> Result<Vec<String>> {
    let mut all: Vec<String> = inline
        .iter()
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .collect();
    if let Some(path) = file {
        all.extend(load_usernames(path)?);
    }

    let mut seen = HashSet::new();
    all.retain(|u| seen.insert(u.clone()));
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let names = parse_usernames("# crew\nalice\n\n  bob  \n#carol\ndave\n");
        assert_eq!(names, vec!["alice", "bob", "dave"]);
    }

    #[test]
    fn test_collect_dedupes_preserving_order() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("users.txt");
        std::fs::write(&file, "carol\nalice\nerin\n").unwrap();

        let inline = vec!["alice".to_string(), "bob".to_string(), "alice".to_string()];
        let names = collect_usernames(&inline, Some(&file)).unwrap();
        assert_eq!(names, vec!["alice", "bob", "carol", "erin"]);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = collect_usernames(&[], Some(Path::new("/nonexistent/users.txt"))).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read usernames"));
    }
}
