//! Helpers for inspecting log directories in integration tests

#![allow(dead_code)]

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

/// All files in `dir`, sorted by name.
pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    files
}

/// Contents of `path`, decompressed when it ends in `.gz`.
pub fn read_log(path: &Path) -> String {
    let raw = fs::read(path).unwrap();
    if path.extension().is_some_and(|ext| ext == "gz") {
        let mut text = String::new();
        GzDecoder::new(raw.as_slice())
            .read_to_string(&mut text)
            .unwrap();
        text
    } else {
        String::from_utf8(raw).unwrap()
    }
}

/// Every line across the active file and all backups in `dir`.
pub fn all_lines(dir: &Path) -> Vec<String> {
    files_in(dir)
        .iter()
        .flat_map(|path| {
            read_log(path)
                .lines()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}
