//! Story-file discovery.
//!
//! The storybook config names its story files with glob patterns; those
//! are expanded against the project tree. When no config can be read the
//! project is scanned for `*.stories.*` files directly. The resulting
//! list is persisted to a manifest file that every bundler worker
//! re-reads: workers are separate processes, so in-memory state set
//! while building the config never reaches them.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Directory for sherlo's own build-time files.
pub const SHERLO_DIR_NAME: &str = ".sherlo";

/// Worker-handoff manifest name.
pub const STORY_FILES_MANIFEST: &str = "story-files.json";

const STORYBOOK_CONFIG_PATHS: [&str; 4] = [
    ".rnstorybook/main.ts",
    ".storybook/main.ts",
    ".rnstorybook/main.js",
    ".storybook/main.js",
];

const STORY_FILE_EXTENSIONS: [&str; 4] = [".stories.ts", ".stories.tsx", ".stories.js", ".stories.jsx"];

const IGNORED_DIRECTORIES: [&str; 3] = ["node_modules", ".git", ".sherlo"];

const MAX_SCAN_DEPTH: usize = 20;

/// Finds every story file in the project, preferring the storybook
/// config's own `stories` globs and falling back to an extension scan.
/// The result is sorted and deduplicated, so discovery is deterministic.
pub fn discover_story_files(project_root: &Path) -> Vec<PathBuf> {
    let mut files: BTreeSet<PathBuf> = BTreeSet::new();

    if let Some((patterns, config_dir)) = read_storybook_config(project_root) {
        if let Some(globs) = build_story_globset(&patterns, &config_dir) {
            for entry in walk_project(project_root) {
                if globs.is_match(&entry) {
                    files.insert(entry);
                }
            }
        }
        debug!(count = files.len(), "story files matched storybook config globs");
    }

    if files.is_empty() {
        for entry in walk_project(project_root) {
            if is_story_file(&entry) {
                files.insert(entry);
            }
        }
        debug!(count = files.len(), "story files found by extension scan");
    }

    files.into_iter().collect()
}

pub fn is_story_file(path: &Path) -> bool {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    STORY_FILE_EXTENSIONS
        .iter()
        .any(|extension| name.ends_with(extension))
}

fn walk_project(project_root: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(project_root)
        .max_depth(MAX_SCAN_DEPTH)
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !IGNORED_DIRECTORIES.contains(&name.as_ref())
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
}

/// Reads the `stories` glob patterns out of the storybook config file.
/// The config is a JS/TS module we must not execute; the patterns are
/// recovered textually, which covers the overwhelmingly common literal
/// array form.
pub fn read_storybook_config(project_root: &Path) -> Option<(Vec<String>, PathBuf)> {
    for relative in STORYBOOK_CONFIG_PATHS {
        let config_path = project_root.join(relative);
        let Ok(content) = std::fs::read_to_string(&config_path) else {
            continue;
        };
        if let Some(patterns) = parse_stories_patterns(&content) {
            let config_dir = config_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| project_root.to_path_buf());
            return Some((patterns, config_dir));
        }
        warn!(config = %config_path.display(), "storybook config has no parseable stories array");
    }
    None
}

/// Pulls the string literals out of `stories: [ ... ]`.
fn parse_stories_patterns(content: &str) -> Option<Vec<String>> {
    let key = content.find("stories")?;
    let after_key = &content[key..];
    let open = after_key.find('[')?;
    let close = after_key[open..].find(']')? + open;
    let body = &after_key[open + 1..close];

    let mut patterns = Vec::new();
    let bytes = body.as_bytes();
    let mut index = 0;
    while index < bytes.len() {
        let byte = bytes[index];
        if byte == b'\'' || byte == b'"' {
            let Some(length) = body[index + 1..].find(byte as char) else {
                break;
            };
            patterns.push(body[index + 1..index + 1 + length].to_string());
            index += length + 2;
        } else {
            index += 1;
        }
    }

    (!patterns.is_empty()).then_some(patterns)
}

fn build_story_globset(patterns: &[String], config_dir: &Path) -> Option<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    let mut added = 0;
    for pattern in patterns {
        let absolute = normalize_path(&config_dir.join(brace_syntax(pattern)));
        match Glob::new(&absolute.to_string_lossy()) {
            Ok(glob) => {
                builder.add(glob);
                added += 1;
            }
            Err(error) => warn!(%pattern, %error, "ignoring unparseable stories glob"),
        }
    }
    if added == 0 {
        return None;
    }
    builder.build().ok()
}

/// Storybook globs use extglob alternation (`@(a|b)`); the matcher wants
/// brace syntax.
fn brace_syntax(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;
    while let Some(start) = rest.find("@(") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find(')') {
            Some(end) => {
                out.push('{');
                out.push_str(&after[..end].replace('|', ","));
                out.push('}');
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Lexically resolves `.` and `..` components; the glob matcher compares
/// text, not inodes.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// What the config process hands to the bundler workers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoryManifest {
    pub story_files: Vec<String>,
    pub project_root: String,
}

/// Writes the worker-handoff manifest. Written once while the config is
/// built; every worker reads it back instead of trusting process-local
/// state.
pub fn write_story_manifest(
    project_root: &Path,
    story_files: &[PathBuf],
) -> std::io::Result<PathBuf> {
    let dir = project_root.join(SHERLO_DIR_NAME);
    std::fs::create_dir_all(&dir)?;
    let manifest = StoryManifest {
        story_files: story_files
            .iter()
            .map(|path| path.display().to_string())
            .collect(),
        project_root: project_root.display().to_string(),
    };
    let path = dir.join(STORY_FILES_MANIFEST);
    std::fs::write(&path, serde_json::to_string_pretty(&manifest)?)?;
    Ok(path)
}

pub fn read_story_manifest(project_root: &Path) -> Option<StoryManifest> {
    let path = project_root.join(SHERLO_DIR_NAME).join(STORY_FILES_MANIFEST);
    let content = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(manifest) => Some(manifest),
        Err(error) => {
            warn!(%error, "story manifest did not parse");
            None
        }
    }
}
