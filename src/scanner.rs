//! Style manifest discovery.

use globset::{Glob, GlobSet};
use ignore::WalkBuilder;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    /// Manifest files, sorted so that builds are reproducible.
    pub files: Vec<PathBuf>,
    pub files_scanned: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ScanError {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanGlobOptions {
    pub base_path: PathBuf,
    pub respect_gitignore: bool,
    pub include_node_modules: bool,
    pub include_lock_files: bool,
}

impl Default for ScanGlobOptions {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("."),
            respect_gitignore: true,
            include_node_modules: false,
            include_lock_files: false,
        }
    }
}

/// Collects manifest files from explicit paths; directories are walked recursively.
pub fn scan(paths: &[PathBuf]) -> Result<ScanResult, ScanError> {
    let mut files = BTreeSet::new();
    let mut files_scanned = 0;

    for path in paths {
        scan_path(path, &mut files, &mut files_scanned)?;
    }

    Ok(ScanResult {
        files: files.into_iter().collect(),
        files_scanned,
    })
}

pub fn scan_globs(patterns: &[String]) -> Result<ScanResult, ScanError> {
    scan_globs_with_ignore(patterns, &[])
}

pub fn scan_globs_with_ignore(
    patterns: &[String],
    ignore_patterns: &[String],
) -> Result<ScanResult, ScanError> {
    scan_globs_with_options(patterns, ignore_patterns, &ScanGlobOptions::default())
}

pub fn scan_globs_with_options(
    patterns: &[String],
    ignore_patterns: &[String],
    options: &ScanGlobOptions,
) -> Result<ScanResult, ScanError> {
    if patterns.is_empty() {
        return Err(ScanError {
            message: "scan_globs requires at least one pattern".to_string(),
        });
    }

    let globset = build_globset(patterns)?;
    let ignore_set = build_globset(ignore_patterns)?;
    let mut paths = Vec::new();

    let mut builder = WalkBuilder::new(&options.base_path);
    builder
        .hidden(false)
        .git_ignore(options.respect_gitignore)
        .git_global(options.respect_gitignore)
        .git_exclude(options.respect_gitignore);
    let walker = builder.build();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        let relative_path = path.strip_prefix(&options.base_path).unwrap_or(path);
        if !globset.is_match(relative_path) && !globset.is_match(path) {
            continue;
        }
        if ignore_set.is_match(relative_path) || ignore_set.is_match(path) {
            continue;
        }
        if should_skip_file(path, options) {
            continue;
        }
        paths.push(path.to_path_buf());
    }

    scan(&paths)
}

fn should_skip_file(path: &Path, options: &ScanGlobOptions) -> bool {
    if !options.include_node_modules
        && path
            .components()
            .any(|component| component.as_os_str() == "node_modules")
    {
        return true;
    }

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("");
    if !options.include_lock_files && is_common_lock_file(file_name) {
        return true;
    }

    !is_manifest_file(path)
}

fn is_manifest_file(path: &Path) -> bool {
    path.extension()
        .and_then(|value| value.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

fn is_common_lock_file(file_name: &str) -> bool {
    matches!(
        file_name,
        "package-lock.json" | "npm-shrinkwrap.json"
    )
}

fn scan_path(path: &Path, files: &mut BTreeSet<PathBuf>, files_scanned: &mut usize) -> Result<(), ScanError> {
    if !path.exists() {
        return Err(ScanError {
            message: format!("path not found: {}", path.display()),
        });
    }

    if path.is_dir() {
        let entries = fs::read_dir(path).map_err(|err| ScanError {
            message: format!("failed to read directory {}: {}", path.display(), err),
        })?;
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(_) => continue,
            };
            let child = entry.path();
            if child.is_dir() || is_manifest_file(&child) {
                scan_path(&child, files, files_scanned)?;
            }
        }
        return Ok(());
    }

    if path.is_file() {
        *files_scanned += 1;
        files.insert(path.to_path_buf());
    }

    Ok(())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, ScanError> {
    let mut builder = globset::GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|err| ScanError {
            message: format!("invalid glob pattern '{}': {}", pattern, err),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|err| ScanError {
        message: format!("failed to build glob set: {}", err),
    })
}
