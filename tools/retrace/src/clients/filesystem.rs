//! Recorded filesystem operations: file reads, file writes and directory
//! searches. All three veto recording for paths inside the harness's own
//! state directory.

use crate::clients::record_path;
use crate::envelope::Operation;
use crate::errors::RetraceError;
use crate::intercept::intercept;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

// ── LoadFile ──────────────────────────────────────────────────────────────────

pub struct LoadFile;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadFileParams {
    pub path: String,
    pub strip: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadFileResult {
    pub contents: String,
}

impl Operation for LoadFile {
    const NAME: &'static str = "LoadFileRecord";
    type Params = LoadFileParams;
    type Result = LoadFileResult;
    type Output = String;

    fn to_result(output: &Self::Output) -> Self::Result {
        LoadFileResult {
            contents: output.clone(),
        }
    }

    fn to_output(result: Self::Result) -> Self::Output {
        result.contents
    }

    fn include(params: &Self::Params) -> bool {
        record_path(&params.path)
    }
}

/// Reads a file to a string, optionally stripping surrounding whitespace.
pub fn load_file_contents(path: &Path, strip: bool) -> Result<String, RetraceError> {
    intercept::<LoadFile, _, _, _>(
        || LoadFileParams {
            path: path.display().to_string(),
            strip,
        },
        || {
            let contents = fs::read_to_string(path)
                .map_err(|e| RetraceError::Io(format!("{}: {e}", path.display())))?;
            if strip {
                Ok(contents.trim().to_string())
            } else {
                Ok(contents)
            }
        },
    )
}

// ── WriteFile ─────────────────────────────────────────────────────────────────

pub struct WriteFile;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteFileParams {
    pub path: String,
    pub contents: String,
}

impl Operation for WriteFile {
    const NAME: &'static str = "WriteFileRecord";
    type Params = WriteFileParams;
    type Result = ();
    type Output = ();

    fn to_result(_output: &Self::Output) -> Self::Result {}
    fn to_output(_result: Self::Result) -> Self::Output {}

    fn include(params: &Self::Params) -> bool {
        record_path(&params.path)
    }
}

/// Writes a file, creating parent directories as needed. Records params
/// only; the write has no interesting result.
pub fn write_file(path: &Path, contents: &str) -> Result<(), RetraceError> {
    intercept::<WriteFile, _, _, _>(
        || WriteFileParams {
            path: path.display().to_string(),
            contents: contents.to_string(),
        },
        || {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)
                        .map_err(|e| RetraceError::Io(format!("{}: {e}", parent.display())))?;
                }
            }
            fs::write(path, contents)
                .map_err(|e| RetraceError::Io(format!("{}: {e}", path.display())))
        },
    )
}

// ── FindMatching ──────────────────────────────────────────────────────────────

pub struct FindMatching;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindMatchingParams {
    pub root_path: String,
    pub relative_paths_to_search: Vec<String>,
    pub file_pattern: String,
}

impl FindMatchingParams {
    /// Search paths are sorted so two calls that differ only in argument
    /// order compare equal during replay.
    pub fn new(root_path: &Path, relative_paths_to_search: &[String], file_pattern: &str) -> Self {
        let mut paths = relative_paths_to_search.to_vec();
        paths.sort();
        Self {
            root_path: root_path.display().to_string(),
            relative_paths_to_search: paths,
            file_pattern: file_pattern.to_string(),
        }
    }
}

/// One file found by [`find_matching`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMatch {
    pub searched_path: String,
    pub absolute_path: String,
    pub relative_path: String,
    pub modification_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindMatchingResult {
    pub matches: Vec<FileMatch>,
}

impl Operation for FindMatching {
    const NAME: &'static str = "FindMatchingRecord";
    type Params = FindMatchingParams;
    type Result = FindMatchingResult;
    type Output = Vec<FileMatch>;

    fn to_result(output: &Self::Output) -> Self::Result {
        FindMatchingResult {
            matches: output.clone(),
        }
    }

    fn to_output(result: Self::Result) -> Self::Output {
        result.matches
    }

    fn include(params: &Self::Params) -> bool {
        record_path(&params.root_path)
    }
}

/// Case-insensitive filename match supporting `*` and `?`.
fn glob_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let name: Vec<char> = name.to_lowercase().chars().collect();

    let mut p = 0;
    let mut n = 0;
    let mut star: Option<usize> = None;
    let mut mark = 0;
    while n < name.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == name[n]) {
            p += 1;
            n += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            mark = n;
            p += 1;
        } else if let Some(star_at) = star {
            p = star_at + 1;
            mark += 1;
            n = mark;
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

fn modification_time(path: &Path) -> f64 {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|duration| duration.as_secs_f64())
        .unwrap_or(0.0)
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), RetraceError> {
    let entries =
        fs::read_dir(dir).map_err(|e| RetraceError::Io(format!("{}: {e}", dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| RetraceError::Io(format!("{}: {e}", dir.display())))?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

/// Walks each search path under `root_path` and returns info about every
/// file whose name matches `file_pattern`. Search paths that do not exist
/// contribute nothing.
pub fn find_matching(
    root_path: &Path,
    relative_paths_to_search: &[String],
    file_pattern: &str,
) -> Result<Vec<FileMatch>, RetraceError> {
    intercept::<FindMatching, _, _, _>(
        || FindMatchingParams::new(root_path, relative_paths_to_search, file_pattern),
        || {
            let mut matching = Vec::new();
            for searched_path in relative_paths_to_search {
                let search_root = root_path.join(searched_path);
                if !search_root.is_dir() {
                    continue;
                }
                let mut files = Vec::new();
                collect_files(&search_root, &mut files)?;
                files.sort();
                for absolute_path in files {
                    let Some(name) = absolute_path.file_name().and_then(|n| n.to_str()) else {
                        continue;
                    };
                    if !glob_match(file_pattern, name) {
                        continue;
                    }
                    let relative_path = absolute_path
                        .strip_prefix(&search_root)
                        .unwrap_or(&absolute_path)
                        .display()
                        .to_string();
                    matching.push(FileMatch {
                        searched_path: searched_path.clone(),
                        absolute_path: absolute_path.display().to_string(),
                        relative_path,
                        modification_time: modification_time(&absolute_path),
                    });
                }
            }
            Ok(matching)
        },
    )
}
