// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::path::{Path, PathBuf};

/// Suffix of the write buffer file.
pub const BUFFER_FILE_SUFFIX: &str = "t0m";

/// Suffix of in-progress cascade builds; orphans are cleaned up on create.
pub const TMP_FILE_SUFFIX: &str = "tmp";

/// Returns the path of the write buffer file, `<prefix>_t0m`.
pub fn buffer_file_path(dir: &Path, prefix: &str) -> PathBuf {
    dir.join(format!("{prefix}_{BUFFER_FILE_SUFFIX}"))
}

/// Returns the path of the tree file of the given slot, `<prefix>_<k>`.
pub fn slot_file_path(dir: &Path, prefix: &str, slot: usize) -> PathBuf {
    dir.join(format!("{prefix}_{slot}"))
}

/// Returns the path of the in-progress build file for the given slot,
/// `<prefix>_<k>.tmp`.
pub fn tmp_file_path(dir: &Path, prefix: &str, slot: usize) -> PathBuf {
    dir.join(format!("{prefix}_{slot}.{TMP_FILE_SUFFIX}"))
}

/// Parses a slot number out of a file name matching `<prefix>_<decimal>`.
///
/// Returns `None` for the buffer file, tmp files and unrelated entries.
pub fn parse_slot_file_name(prefix: &str, file_name: &str) -> Option<usize> {
    let rest = file_name.strip_prefix(prefix)?.strip_prefix('_')?;

    if rest.is_empty() || !rest.bytes().all(|c| c.is_ascii_digit()) {
        return None;
    }

    rest.parse::<usize>().ok()
}

/// Returns `true` if the file name is a leftover `<prefix>_<k>.tmp` build file.
pub fn is_tmp_file_name(prefix: &str, file_name: &str) -> bool {
    let Some(rest) = file_name
        .strip_prefix(prefix)
        .and_then(|s| s.strip_prefix('_'))
    else {
        return false;
    };

    let Some(digits) = rest.strip_suffix(&format!(".{TMP_FILE_SUFFIX}")) else {
        return false;
    };

    !digits.is_empty() && digits.bytes().all(|c| c.is_ascii_digit())
}

#[cfg(not(target_os = "windows"))]
pub fn fsync_directory(path: &Path) -> std::io::Result<()> {
    let file = std::fs::File::open(path)?;
    debug_assert!(file.metadata()?.is_dir());
    file.sync_all()
}

#[cfg(target_os = "windows")]
pub fn fsync_directory(_path: &Path) -> std::io::Result<()> {
    // Cannot fsync directory on Windows
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn slot_file_name_parse() {
        assert_eq!(Some(0), parse_slot_file_name("bkd", "bkd_0"));
        assert_eq!(Some(17), parse_slot_file_name("bkd", "bkd_17"));
        assert_eq!(None, parse_slot_file_name("bkd", "bkd_t0m"));
        assert_eq!(None, parse_slot_file_name("bkd", "bkd_3.tmp"));
        assert_eq!(None, parse_slot_file_name("bkd", "bkd_"));
        assert_eq!(None, parse_slot_file_name("bkd", "other_3"));
        assert_eq!(None, parse_slot_file_name("bkd", "bkd3"));
    }

    #[test]
    fn slot_file_name_parse_prefix_with_underscore() {
        assert_eq!(Some(2), parse_slot_file_name("my_index", "my_index_2"));
        assert_eq!(None, parse_slot_file_name("my_index", "my_index2"));
    }

    #[test]
    fn tmp_file_name_match() {
        assert!(is_tmp_file_name("bkd", "bkd_0.tmp"));
        assert!(is_tmp_file_name("bkd", "bkd_12.tmp"));
        assert!(!is_tmp_file_name("bkd", "bkd_12"));
        assert!(!is_tmp_file_name("bkd", "bkd_t0m"));
        assert!(!is_tmp_file_name("bkd", "bkd_.tmp"));
    }
}
