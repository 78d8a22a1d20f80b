//! Filesystem tools rooted at a working directory.
//!
//! | Tool | Name | Purpose |
//! |------|------|---------|
//! | [`FileRead`] | `file_read` | Read a file, or list a directory by glob |
//! | [`FileWrite`] | `file_write` | Create/replace a file, or edit one occurrence |
//! | [`FileSearch`] | `file_search` | Find files by glob, or regex-search contents |
//!
//! Every path argument is relative to the tool's working directory. Absolute
//! paths and `..` components are rejected.

use crate::ToolDef;
use crate::tools::core::{Tool, ToolFuture, parse_tool_args};
use crate::tools::spec::ToolSpec;
use regex::RegexBuilder;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Component, Path, PathBuf};
use tokio::fs;

/// Default maximum regex matches returned by `file_search`.
pub const DEFAULT_MAX_SEARCH_MATCHES: usize = 200;

/// Resolve `relative` against `workdir`, refusing to leave it.
pub fn resolve_path(workdir: &Path, relative: &str) -> Result<PathBuf, String> {
    let mut resolved = workdir.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err("path traversal not allowed".to_string()),
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!(
                    "absolute paths are not allowed: '{relative}'; use a path relative to the working directory"
                ));
            }
        }
    }
    Ok(resolved)
}

/// Display `path` relative to `root` when possible.
fn relative_display(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

/// Run a blocking filesystem walk off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, String>
where
    F: FnOnce() -> Result<T, String> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| format!("filesystem task failed: {e}"))?
}

// ── FileRead ───────────────────────────────────────────────────────

#[derive(Deserialize, JsonSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReadOperation {
    /// Read a file's contents.
    Read,
    /// List entries in a directory.
    List,
}

/// Typed arguments for `file_read`.
#[derive(Deserialize, JsonSchema)]
pub struct FileReadArgs {
    /// 'read' a file or 'list' a directory.
    pub operation: ReadOperation,
    /// File or directory path relative to the working directory (e.g. 'src/main.rs', '.').
    pub path: String,
    /// For 'read': maximum number of lines to return (omit or 0 for the whole file).
    #[serde(default)]
    pub max_lines: Option<usize>,
    /// For 'list': glob pattern for entries (default '*', e.g. '*.md', '**/*.rs').
    #[serde(default)]
    pub pattern: Option<String>,
}

/// Read files or list directories under a working directory.
#[derive(Debug, Clone)]
pub struct FileRead {
    workdir: PathBuf,
}

impl FileRead {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }
}

impl Tool for FileRead {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder("file_read", "Read a file or list the entries of a directory")
            .when_to_use("When you know which file or directory you want to look at")
            .when_not_to_use(
                "When searching for text across many files, use file_search instead",
            )
            .parameters_for::<FileReadArgs>()
            .example(
                r#"{"operation": "read", "path": "notes.md", "max_lines": 20}"#,
                "The first 20 lines of notes.md",
            )
            .example(
                r#"{"operation": "list", "path": ".", "pattern": "*.md"}"#,
                "One entry per line; directories prefixed with [DIR]",
            )
            .to_tool_def()
    }

    fn execute(&self, arguments: &Map<String, Value>) -> ToolFuture<'_> {
        let args = parse_tool_args::<FileReadArgs>(arguments);
        Box::pin(async move {
            let args = args?;
            let full_path = resolve_path(&self.workdir, &args.path)?;
            let text = match args.operation {
                ReadOperation::Read => read_file(&full_path, &args.path, args.max_lines).await?,
                ReadOperation::List => {
                    let pattern = args.pattern.unwrap_or_else(|| "*".to_string());
                    list_dir(full_path, args.path, pattern).await?
                }
            };
            Ok(Value::String(text))
        })
    }
}

async fn read_file(full_path: &Path, shown: &str, max_lines: Option<usize>) -> Result<String, String> {
    let meta = fs::metadata(full_path)
        .await
        .map_err(|_| format!("file not found: '{shown}'"))?;
    if meta.is_dir() {
        return Err(format!(
            "'{shown}' is a directory, not a file; use operation 'list' to browse it"
        ));
    }
    let content = fs::read_to_string(full_path)
        .await
        .map_err(|e| format!("failed to read '{shown}': {e}"))?;

    Ok(match max_lines {
        Some(n) if n > 0 => content.lines().take(n).collect::<Vec<_>>().join("\n"),
        _ => content,
    })
}

async fn list_dir(dir: PathBuf, shown: String, pattern: String) -> Result<String, String> {
    let meta = fs::metadata(&dir)
        .await
        .map_err(|_| format!("directory not found: '{shown}'"))?;
    if !meta.is_dir() {
        return Err(format!("'{shown}' is not a directory"));
    }
    if pattern.contains("..") {
        return Err("path traversal not allowed".to_string());
    }

    blocking(move || {
        let full_pattern = format!(
            "{}/{}",
            glob::Pattern::escape(&dir.to_string_lossy()),
            pattern
        );
        let paths = glob::glob(&full_pattern).map_err(|e| format!("invalid pattern: {e}"))?;

        let mut entries: Vec<PathBuf> = paths.filter_map(Result::ok).collect();
        entries.sort();
        if entries.is_empty() {
            return Ok(format!("No files found matching {shown}/{pattern}"));
        }

        Ok(entries
            .iter()
            .map(|p| {
                let rel = relative_display(&dir, p);
                if p.is_dir() {
                    format!("[DIR] {rel}/")
                } else {
                    format!("      {rel}")
                }
            })
            .collect::<Vec<_>>()
            .join("\n"))
    })
    .await
}

// ── FileWrite ──────────────────────────────────────────────────────

#[derive(Deserialize, JsonSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WriteOperation {
    /// Create or replace a file.
    Write,
    /// Replace exactly one occurrence of `old_text` with `new_text`.
    Edit,
}

/// Typed arguments for `file_write`.
#[derive(Deserialize, JsonSchema)]
pub struct FileWriteArgs {
    /// 'write' a whole file or 'edit' part of one.
    pub operation: WriteOperation,
    /// File path relative to the working directory.
    pub path: String,
    /// For 'write': the full file content.
    #[serde(default)]
    pub content: Option<String>,
    /// For 'edit': text to replace. Must occur exactly once in the file.
    #[serde(default)]
    pub old_text: Option<String>,
    /// For 'edit': replacement text.
    #[serde(default)]
    pub new_text: Option<String>,
}

/// Create, replace, or edit files under a working directory.
#[derive(Debug, Clone)]
pub struct FileWrite {
    workdir: PathBuf,
}

impl FileWrite {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }
}

impl Tool for FileWrite {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder("file_write", "Create or replace a file, or edit part of an existing file")
            .when_to_use("When you need to save new content or change an existing file")
            .when_not_to_use(
                "When the edit text appears more than once; include more surrounding context in old_text instead",
            )
            .parameters_for::<FileWriteArgs>()
            .example(
                r#"{"operation": "edit", "path": "notes.md", "old_text": "draft", "new_text": "final"}"#,
                "Edited notes.md",
            )
            .to_tool_def()
    }

    fn execute(&self, arguments: &Map<String, Value>) -> ToolFuture<'_> {
        let args = parse_tool_args::<FileWriteArgs>(arguments);
        Box::pin(async move {
            let args = args?;
            let full_path = resolve_path(&self.workdir, &args.path)?;
            let msg = match args.operation {
                WriteOperation::Write => {
                    let content = args
                        .content
                        .ok_or("operation 'write' requires 'content'")?;
                    write_file(&full_path, &args.path, &content).await?
                }
                WriteOperation::Edit => {
                    let old_text = args
                        .old_text
                        .ok_or("operation 'edit' requires 'old_text'")?;
                    let new_text = args.new_text.unwrap_or_default();
                    edit_file(&full_path, &args.path, &old_text, &new_text).await?
                }
            };
            Ok(Value::String(msg))
        })
    }
}

async fn write_file(full_path: &Path, shown: &str, content: &str) -> Result<String, String> {
    if let Ok(meta) = fs::metadata(full_path).await
        && meta.is_dir()
    {
        return Err(format!("'{shown}' is a directory"));
    }
    if let Some(parent) = full_path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("failed to create parent directory for '{shown}': {e}"))?;
    }
    fs::write(full_path, content)
        .await
        .map_err(|e| format!("failed to write '{shown}': {e}"))?;
    Ok(format!(
        "Wrote {} characters to {shown}",
        content.chars().count()
    ))
}

async fn edit_file(
    full_path: &Path,
    shown: &str,
    old_text: &str,
    new_text: &str,
) -> Result<String, String> {
    if old_text.is_empty() {
        return Err("'old_text' must not be empty".to_string());
    }
    let content = fs::read_to_string(full_path)
        .await
        .map_err(|e| format!("failed to read '{shown}': {e}"))?;

    match content.matches(old_text).count() {
        0 => Err(format!("the specified text was not found in {shown}")),
        1 => {
            let updated = content.replacen(old_text, new_text, 1);
            fs::write(full_path, updated)
                .await
                .map_err(|e| format!("failed to write '{shown}': {e}"))?;
            Ok(format!("Edited {shown}"))
        }
        n => Err(format!(
            "found {n} occurrences of the specified text in {shown}; include more surrounding context so it matches exactly once"
        )),
    }
}

// ── FileSearch ─────────────────────────────────────────────────────

/// Typed arguments for `file_search`.
#[derive(Deserialize, JsonSchema)]
pub struct FileSearchArgs {
    /// Regex to search for in file contents. Omit to only find files by `file_pattern`.
    #[serde(default)]
    pub pattern: Option<String>,
    /// Glob filter for file paths (e.g. '*.py', '**/*.rs'). Defaults to all files.
    #[serde(default)]
    pub file_pattern: Option<String>,
    /// Directory to search in, relative to the working directory (default '.').
    #[serde(default)]
    pub path: Option<String>,
    /// Case-insensitive regex matching (default false).
    #[serde(default)]
    pub case_insensitive: Option<bool>,
}

/// Find files by glob or search their contents by regex.
#[derive(Debug, Clone)]
pub struct FileSearch {
    workdir: PathBuf,
    max_matches: usize,
}

impl FileSearch {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            max_matches: DEFAULT_MAX_SEARCH_MATCHES,
        }
    }

    /// Cap the number of matching lines returned.
    pub fn max_matches(mut self, max: usize) -> Self {
        self.max_matches = max;
        self
    }
}

impl Tool for FileSearch {
    fn definition(&self) -> ToolDef {
        ToolSpec::builder("file_search", "Find files by glob pattern or search file contents by regex")
            .when_to_use("When you don't know which file contains something")
            .when_not_to_use("When you already know the file path, use file_read instead")
            .parameters_for::<FileSearchArgs>()
            .example(r#"{"file_pattern": "**/*.md"}"#, "Found 3 files: ...")
            .example(
                r#"{"pattern": "TODO", "file_pattern": "**/*.py"}"#,
                "Found 2 matches: src/app.py:14: # TODO ...",
            )
            .output_format("'Found N files/matches:' followed by one entry per line")
            .to_tool_def()
    }

    fn execute(&self, arguments: &Map<String, Value>) -> ToolFuture<'_> {
        let args = parse_tool_args::<FileSearchArgs>(arguments);
        let workdir = self.workdir.clone();
        let max_matches = self.max_matches;
        Box::pin(async move {
            let args = args?;
            let root = resolve_path(&workdir, args.path.as_deref().unwrap_or("."))?;
            let pattern = args.pattern.filter(|p| !p.is_empty());
            let file_pattern = args.file_pattern.filter(|p| !p.is_empty());
            if file_pattern.as_deref().is_some_and(|p| p.contains("..")) {
                return Err("path traversal not allowed".to_string());
            }

            let text = match (pattern, file_pattern) {
                (None, None) => {
                    return Err("provide 'pattern', 'file_pattern', or both".to_string());
                }
                (None, Some(glob)) => find_files(workdir, root, glob).await?,
                (Some(regex), glob) => {
                    let glob = glob.unwrap_or_else(|| "**/*".to_string());
                    search_contents(
                        workdir,
                        root,
                        glob,
                        regex,
                        args.case_insensitive.unwrap_or(false),
                        max_matches,
                    )
                    .await?
                }
            };
            Ok(Value::String(text))
        })
    }
}

/// Glob under `root`, files only. Bare patterns like `*.rs` match at any depth.
fn glob_files(root: &Path, pattern: &str) -> Result<Vec<PathBuf>, String> {
    let pattern = if pattern.contains('/') {
        pattern.to_string()
    } else {
        format!("**/{pattern}")
    };
    let full_pattern = format!("{}/{}", glob::Pattern::escape(&root.to_string_lossy()), pattern);
    let mut files: Vec<PathBuf> = glob::glob(&full_pattern)
        .map_err(|e| format!("invalid file pattern: {e}"))?
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Ok(files)
}

async fn find_files(workdir: PathBuf, root: PathBuf, pattern: String) -> Result<String, String> {
    blocking(move || {
        let files = glob_files(&root, &pattern)?;
        if files.is_empty() {
            return Ok("No matches found".to_string());
        }
        let listed: Vec<String> = files.iter().map(|p| relative_display(&workdir, p)).collect();
        Ok(format!("Found {} files:\n{}", listed.len(), listed.join("\n")))
    })
    .await
}

async fn search_contents(
    workdir: PathBuf,
    root: PathBuf,
    file_pattern: String,
    pattern: String,
    case_insensitive: bool,
    max_matches: usize,
) -> Result<String, String> {
    let re = RegexBuilder::new(&pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|e| format!("invalid regex: {e}"))?;

    blocking(move || {
        let mut matches = Vec::new();
        let mut capped = false;
        'files: for file in glob_files(&root, &file_pattern)? {
            // Binary and unreadable files are skipped.
            let Ok(content) = std::fs::read_to_string(&file) else {
                continue;
            };
            let shown = relative_display(&workdir, &file);
            for (idx, line) in content.lines().enumerate() {
                if re.is_match(line) {
                    if matches.len() >= max_matches {
                        capped = true;
                        break 'files;
                    }
                    matches.push(format!("{shown}:{}: {}", idx + 1, line.trim_end()));
                }
            }
        }

        if matches.is_empty() {
            return Ok("No matches found".to_string());
        }
        let mut out = format!("Found {} matches:\n{}", matches.len(), matches.join("\n"));
        if capped {
            out.push_str(&format!("\n[results capped at {max_matches} matches]"));
        }
        Ok(out)
    })
    .await
}
