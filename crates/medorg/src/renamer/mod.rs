//! Compose library filenames, locate actress folders, and move files.
//!
//! Target layout: `{destination}/{Actress}/{Actress} - [{Sub}] {CODE} {Title}{ext}`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use crate::error::RenameError;

/// Conservative basename limit across common filesystems.
pub const MAX_FILENAME_LEN: usize = 200;

// Characters reserved on at least one common filesystem.
static RESERVED_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static DOT_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.{2,}").unwrap());

/// Replace reserved characters with spaces and collapse the result.
pub fn sanitize_filename(name: &str) -> String {
    let replaced = RESERVED_CHARS_RE.replace_all(name, " ");
    let collapsed = WHITESPACE_RE.replace_all(&replaced, " ");
    DOT_RUN_RE.replace_all(collapsed.trim(), ".").into_owned()
}

/// Python-style title casing: first letter of each word upper, rest lower.
pub fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Remove every occurrence of `movie_code` from `title`, case-insensitively,
/// so the composed filename carries the code exactly once.
fn strip_code(title: &str, movie_code: &str) -> String {
    let stripped = match Regex::new(&format!("(?i){}", regex::escape(movie_code))) {
        Ok(re) => re.replace_all(title, "").into_owned(),
        Err(_) => title.to_string(),
    };
    stripped.trim_start_matches([' ', '-']).trim().to_string()
}

/// Build `{Actress} - [{Sub}] {CODE} {Title}{ext}`, truncating the title
/// portion (never the code or tag) to keep the basename within
/// [`MAX_FILENAME_LEN`] characters.
pub fn build_filename(
    actress: &str,
    subtitle: &str,
    movie_code: &str,
    title: &str,
    extension: &str,
) -> String {
    let ext = if extension.is_empty() || extension.starts_with('.') {
        extension.to_string()
    } else {
        format!(".{extension}")
    };

    let title = title_case(&strip_code(title, movie_code));
    let prefix = format!("{actress} - [{subtitle}] {movie_code}");

    // One separating space plus the extension come out of the title budget.
    let budget = MAX_FILENAME_LEN.saturating_sub(prefix.chars().count() + 1 + ext.chars().count());
    let title = if budget < 10 {
        String::new()
    } else if title.chars().count() > budget {
        title
            .chars()
            .take(budget)
            .collect::<String>()
            .trim_end()
            .to_string()
    } else {
        title
    };

    let base = if title.is_empty() {
        prefix
    } else {
        format!("{prefix} {title}")
    };
    format!("{}{}", sanitize_filename(&base), ext)
}

fn normalize_name(name: &str) -> String {
    WHITESPACE_RE
        .replace_all(name.trim(), " ")
        .to_lowercase()
}

/// Find an existing actress folder under `destination_dir` by
/// case-insensitive comparison. Returns the existing folder name when one
/// matches, otherwise the given spelling.
pub fn find_actress_dir(destination_dir: &Path, actress: &str) -> Result<String, RenameError> {
    if !destination_dir.exists() {
        return Ok(actress.to_string());
    }

    let wanted = normalize_name(actress);
    let entries = fs::read_dir(destination_dir).map_err(|e| RenameError::ReadDirectory {
        path: destination_dir.to_path_buf(),
        source: e,
    })?;

    for entry in entries.flatten() {
        if !entry.path().is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if normalize_name(name) == wanted {
                debug!(actress, existing = name, "reusing actress folder");
                return Ok(name.to_string());
            }
        }
    }

    Ok(actress.to_string())
}

/// Move `source` into the actress folder under `destination_dir`, resolving
/// name collisions with ` (1)`, ` (2)`, ... suffixes. Rename is tried first;
/// cross-filesystem moves copy, fsync the destination directory, re-verify
/// the collision, then unlink the source.
pub fn move_file(
    source: &Path,
    destination_dir: &Path,
    actress: &str,
    new_filename: &str,
) -> Result<PathBuf, RenameError> {
    let folder = find_actress_dir(destination_dir, actress)?;
    let target_dir = destination_dir.join(&folder);
    fs::create_dir_all(&target_dir).map_err(|e| RenameError::CreateDirectory {
        path: target_dir.clone(),
        source: e,
    })?;

    for counter in 0..1000 {
        let target = target_dir.join(numbered_name(new_filename, counter));
        if fs::symlink_metadata(&target).is_ok() {
            continue;
        }

        match fs::rename(source, &target) {
            Ok(()) => {
                info!(from = %source.display(), to = %target.display(), "moved file");
                return Ok(target);
            }
            Err(_) => match copy_then_unlink(source, &target, &target_dir) {
                Ok(()) => {
                    info!(from = %source.display(), to = %target.display(), "moved file (copied)");
                    return Ok(target);
                }
                // Lost the collision race: another writer created the
                // target between the stat and the copy. Try the next name.
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(RenameError::Move {
                        from: source.to_path_buf(),
                        to: target,
                        source: e,
                    })
                }
            },
        }
    }

    Err(RenameError::Move {
        from: source.to_path_buf(),
        to: target_dir.join(new_filename),
        source: io::Error::new(io::ErrorKind::AlreadyExists, "no free collision suffix"),
    })
}

/// `file.mp4` -> `file (1).mp4`, `file (2).mp4`, ...; counter 0 is the name
/// itself.
fn numbered_name(filename: &str, counter: u32) -> String {
    if counter == 0 {
        return filename.to_string();
    }
    match filename.rfind('.') {
        Some(dot) if dot > 0 => {
            format!("{} ({}){}", &filename[..dot], counter, &filename[dot..])
        }
        _ => format!("{filename} ({counter})"),
    }
}

fn copy_then_unlink(source: &Path, target: &Path, target_dir: &Path) -> io::Result<()> {
    let result: io::Result<()> = (|| {
        let mut reader = fs::File::open(source)?;
        // create_new re-verifies the collision atomically.
        let mut writer = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(target)?;
        io::copy(&mut reader, &mut writer)?;
        writer.sync_all()?;
        Ok(())
    })();

    if let Err(e) = result {
        if e.kind() != io::ErrorKind::AlreadyExists {
            let _ = fs::remove_file(target);
        }
        return Err(e);
    }

    // The new directory entry must be durable before the source goes away.
    fs::File::open(target_dir)?.sync_all()?;
    fs::remove_file(source)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_build_filename_happy_path() {
        let name = build_filename(
            "Ruri Saijo",
            "English Sub",
            "SONE-760",
            "The Same Commute Train As Always",
            ".mp4",
        );
        assert_eq!(
            name,
            "Ruri Saijo - [English Sub] SONE-760 The Same Commute Train As Always.mp4"
        );
    }

    #[test]
    fn test_build_filename_strips_duplicate_code() {
        let name = build_filename("Ruri Saijo", "No Sub", "SONE-760", "SONE-760 Sample", ".mp4");
        assert_eq!(name.matches("SONE-760").count(), 1);
        assert_eq!(name, "Ruri Saijo - [No Sub] SONE-760 Sample.mp4");
    }

    #[test]
    fn test_build_filename_strips_code_case_insensitively() {
        let name = build_filename("A B", "No Sub", "SONE-760", "sone-760 - sample", ".mkv");
        assert_eq!(name, "A B - [No Sub] SONE-760 Sample.mkv");
    }

    #[test]
    fn test_build_filename_adds_missing_dot() {
        let name = build_filename("A", "No Sub", "AB-1", "x", "mp4");
        assert!(name.ends_with(".mp4"));
    }

    #[test]
    fn test_build_filename_sanitizes_reserved_chars() {
        let name = build_filename("A", "No Sub", "AB-1", "What? A/B: \"quote\"", ".mp4");
        assert!(!name.contains(['?', '/', ':', '"']));
        assert!(!name.contains("  "));
    }

    #[test]
    fn test_build_filename_truncates_long_title() {
        let long_title = "word ".repeat(80);
        let name = build_filename("Ruri Saijo", "English Sub", "SONE-760", &long_title, ".mp4");
        assert!(name.chars().count() <= MAX_FILENAME_LEN);
        assert!(name.contains("SONE-760"));
        assert!(name.contains("[English Sub]"));
        assert!(name.ends_with(".mp4"));
    }

    #[test]
    fn test_build_filename_empty_title() {
        let name = build_filename("A", "No Sub", "AB-12", "", ".mp4");
        assert_eq!(name, "A - [No Sub] AB-12.mp4");
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("the SAME commute"), "The Same Commute");
        assert_eq!(title_case(""), "");
    }

    #[test]
    fn test_sanitize_collapses_dot_runs() {
        assert_eq!(sanitize_filename("a...b"), "a.b");
    }

    #[test]
    fn test_find_actress_dir_case_insensitive() {
        let dest = TempDir::new().unwrap();
        fs::create_dir(dest.path().join("Ruri Saijo")).unwrap();

        assert_eq!(
            find_actress_dir(dest.path(), "ruri saijo").unwrap(),
            "Ruri Saijo"
        );
        assert_eq!(
            find_actress_dir(dest.path(), "RURI SAIJO").unwrap(),
            "Ruri Saijo"
        );
    }

    #[test]
    fn test_find_actress_dir_new_name_keeps_spelling() {
        let dest = TempDir::new().unwrap();
        assert_eq!(
            find_actress_dir(dest.path(), "Yua Mikami").unwrap(),
            "Yua Mikami"
        );
    }

    #[test]
    fn test_find_actress_dir_missing_root() {
        let dest = TempDir::new().unwrap();
        let missing = dest.path().join("nope");
        assert_eq!(find_actress_dir(&missing, "Someone").unwrap(), "Someone");
    }

    #[test]
    fn test_move_file_creates_folder() {
        let watch = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let source = watch.path().join("a.mp4");
        fs::write(&source, b"video").unwrap();

        let moved = move_file(&source, dest.path(), "Ruri Saijo", "a.mp4").unwrap();

        assert!(!source.exists());
        assert_eq!(moved, dest.path().join("Ruri Saijo/a.mp4"));
        assert_eq!(fs::read(&moved).unwrap(), b"video");
    }

    #[test]
    fn test_move_file_reuses_existing_casing() {
        let watch = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        fs::create_dir(dest.path().join("Ruri Saijo")).unwrap();
        let source = watch.path().join("a.mp4");
        fs::write(&source, b"x").unwrap();

        let moved = move_file(&source, dest.path(), "RURI SAIJO", "a.mp4").unwrap();

        assert!(moved.starts_with(dest.path().join("Ruri Saijo")));
        // No second folder was created.
        let dirs: Vec<_> = fs::read_dir(dest.path()).unwrap().flatten().collect();
        assert_eq!(dirs.len(), 1);
    }

    #[test]
    fn test_move_file_collision_suffixes() {
        let watch = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();

        for expected in ["a.mp4", "a (1).mp4", "a (2).mp4"] {
            let source = watch.path().join("a.mp4");
            fs::write(&source, b"x").unwrap();
            let moved = move_file(&source, dest.path(), "Someone", "a.mp4").unwrap();
            assert_eq!(moved.file_name().unwrap().to_str().unwrap(), expected);
        }
    }

    #[test]
    fn test_move_file_missing_source_keeps_path() {
        let watch = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let source = watch.path().join("gone.mp4");

        let err = move_file(&source, dest.path(), "Someone", "gone.mp4").unwrap_err();
        assert_eq!(err.source_path(), Some(&source));
    }

    #[test]
    fn test_numbered_name_no_extension() {
        assert_eq!(numbered_name("name", 2), "name (2)");
        assert_eq!(numbered_name("name.mp4", 0), "name.mp4");
    }
}
