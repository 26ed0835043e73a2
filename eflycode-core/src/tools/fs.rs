//! File-system tool catalog: list, read, read-many, glob, grep, write,
//! replace, delete, move, and directory-tree.
//!
//! One unit-struct-plus-impl per tool, each shaped by `crate::tool::Tool`.
//! All paths are resolved against and confined to `workspace_root`; any path
//! that escapes it is rejected as an execution error.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::ToolError;
use crate::ignore::IgnoreSet;
use crate::tool::{Tool, ToolPermission, ToolResult};

/// Resolve `raw` against `root`, rejecting any path that escapes it.
pub(crate) fn resolve_path(root: &Path, raw: &str, tool_name: &str) -> ToolResult<PathBuf> {
    let candidate = root.join(raw);
    let normalized = normalize(&candidate);
    let normalized_root = normalize(root);
    if !normalized.starts_with(&normalized_root) {
        return Err(ToolError::execution(
            tool_name,
            format!("path '{raw}' escapes the workspace root"),
        ));
    }
    Ok(normalized)
}

/// Lexically normalize a path (collapse `.`/`..`) without touching the
/// file system — `Path::canonicalize` would fail for paths that don't
/// exist yet (e.g. a `write_file` target).
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn ignore_set_for(root: &Path) -> IgnoreSet {
    let mut set = IgnoreSet::new();
    set.add_file(&root.join(".gitignore"));
    set.add_file(&root.join(".eflycodeignore"));
    set
}

fn relative_str(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn string_arg<'a>(arguments: &'a Value, key: &str) -> Option<&'a str> {
    arguments.get(key).and_then(Value::as_str)
}

/// Lists files and subdirectories directly inside a directory.
pub struct ListFilesTool {
    workspace_root: PathBuf,
}

impl ListFilesTool {
    /// Create a tool confined to `workspace_root`.
    #[must_use]
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List the files and subdirectories directly inside a directory, relative to the workspace root."
    }

    fn permission(&self) -> ToolPermission {
        ToolPermission::Read
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "directory": { "type": "string", "description": "Directory to list, relative to the workspace root. Defaults to \".\"." }
            },
            "required": [],
        })
    }

    async fn run(&self, arguments: Value) -> ToolResult<String> {
        let directory = string_arg(&arguments, "directory").unwrap_or(".");
        let path = resolve_path(&self.workspace_root, directory, self.name())?;
        let ignore = ignore_set_for(&self.workspace_root);
        let mut entries = std::fs::read_dir(&path)
            .map_err(|err| ToolError::execution(self.name(), err.to_string()))?
            .filter_map(Result::ok)
            .filter_map(|entry| {
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                let rel = relative_str(&self.workspace_root, &entry.path());
                if ignore.is_ignored(&rel, is_dir) {
                    None
                } else {
                    Some(format!("{}{}", entry.file_name().to_string_lossy(), if is_dir { "/" } else { "" }))
                }
            })
            .collect::<Vec<_>>();
        entries.sort();
        Ok(entries.join("\n"))
    }
}

/// Reads the full text content of a single file.
pub struct ReadFileTool {
    workspace_root: PathBuf,
}

impl ReadFileTool {
    /// Create a tool confined to `workspace_root`.
    #[must_use]
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the full text content of a single file, relative to the workspace root."
    }

    fn permission(&self) -> ToolPermission {
        ToolPermission::Read
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"],
        })
    }

    async fn run(&self, arguments: Value) -> ToolResult<String> {
        let raw = string_arg(&arguments, "path").ok_or_else(|| ToolError::parameter(self.name(), "missing 'path'"))?;
        let path = resolve_path(&self.workspace_root, raw, self.name())?;
        std::fs::read_to_string(&path).map_err(|err| ToolError::execution(self.name(), err.to_string()))
    }
}

/// Reads several files in one call, concatenated with path headers.
pub struct ReadManyFilesTool {
    workspace_root: PathBuf,
}

impl ReadManyFilesTool {
    /// Create a tool confined to `workspace_root`.
    #[must_use]
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }
}

#[async_trait]
impl Tool for ReadManyFilesTool {
    fn name(&self) -> &str {
        "read_many_files"
    }

    fn description(&self) -> &str {
        "Read several files at once, relative to the workspace root; returns their contents concatenated with path headers."
    }

    fn permission(&self) -> ToolPermission {
        ToolPermission::Read
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "paths": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["paths"],
        })
    }

    async fn run(&self, arguments: Value) -> ToolResult<String> {
        let paths = arguments
            .get("paths")
            .and_then(Value::as_array)
            .ok_or_else(|| ToolError::parameter(self.name(), "missing 'paths'"))?;
        let mut out = String::new();
        for raw in paths {
            let Some(raw) = raw.as_str() else { continue };
            let path = resolve_path(&self.workspace_root, raw, self.name())?;
            let contents = std::fs::read_to_string(&path)
                .map_err(|err| ToolError::execution(self.name(), format!("{raw}: {err}")))?;
            out.push_str(&format!("--- {raw} ---\n{contents}\n"));
        }
        Ok(out)
    }
}

/// Finds files matching a glob pattern under the workspace.
pub struct GlobFilesTool {
    workspace_root: PathBuf,
}

impl GlobFilesTool {
    /// Create a tool confined to `workspace_root`.
    #[must_use]
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }
}

#[async_trait]
impl Tool for GlobFilesTool {
    fn name(&self) -> &str {
        "glob_files"
    }

    fn description(&self) -> &str {
        "Find files under the workspace root matching a glob pattern (e.g. \"src/**/*.rs\")."
    }

    fn permission(&self) -> ToolPermission {
        ToolPermission::Read
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "pattern": { "type": "string" } },
            "required": ["pattern"],
        })
    }

    async fn run(&self, arguments: Value) -> ToolResult<String> {
        let pattern = string_arg(&arguments, "pattern")
            .ok_or_else(|| ToolError::parameter(self.name(), "missing 'pattern'"))?;
        let full_pattern = self.workspace_root.join(pattern);
        let full_pattern = full_pattern.to_string_lossy().to_string();
        let ignore = ignore_set_for(&self.workspace_root);
        let mut matches = glob::glob(&full_pattern)
            .map_err(|err| ToolError::parameter(self.name(), err.to_string()))?
            .filter_map(Result::ok)
            .filter_map(|path| {
                let is_dir = path.is_dir();
                let rel = relative_str(&self.workspace_root, &path);
                if ignore.is_ignored(&rel, is_dir) {
                    None
                } else {
                    Some(rel)
                }
            })
            .collect::<Vec<_>>();
        matches.sort();
        Ok(matches.join("\n"))
    }
}

/// Searches file contents for a regular expression.
pub struct GrepContentTool {
    workspace_root: PathBuf,
}

impl GrepContentTool {
    /// Create a tool confined to `workspace_root`.
    #[must_use]
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }
}

#[async_trait]
impl Tool for GrepContentTool {
    fn name(&self) -> &str {
        "grep_content"
    }

    fn description(&self) -> &str {
        "Search file contents under the workspace root for a regular expression; returns matching \"path:line: text\" rows."
    }

    fn permission(&self) -> ToolPermission {
        ToolPermission::Read
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string" },
                "directory": { "type": "string", "description": "Subdirectory to search, relative to the workspace root. Defaults to \".\"." }
            },
            "required": ["pattern"],
        })
    }

    async fn run(&self, arguments: Value) -> ToolResult<String> {
        let pattern = string_arg(&arguments, "pattern")
            .ok_or_else(|| ToolError::parameter(self.name(), "missing 'pattern'"))?;
        let directory = string_arg(&arguments, "directory").unwrap_or(".");
        let root = resolve_path(&self.workspace_root, directory, self.name())?;
        let regex = regex::Regex::new(pattern)
            .map_err(|err| ToolError::parameter(self.name(), err.to_string()))?;
        let ignore = ignore_set_for(&self.workspace_root);

        let mut results = Vec::new();
        let mut stack = vec![root];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else { continue };
            for entry in entries.filter_map(Result::ok) {
                let path = entry.path();
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                let rel = relative_str(&self.workspace_root, &path);
                if ignore.is_ignored(&rel, is_dir) {
                    continue;
                }
                if is_dir {
                    stack.push(path);
                    continue;
                }
                let Ok(contents) = std::fs::read_to_string(&path) else { continue };
                for (line_no, line) in contents.lines().enumerate() {
                    if regex.is_match(line) {
                        results.push(format!("{rel}:{}: {line}", line_no + 1));
                    }
                }
            }
        }
        results.sort();
        Ok(results.join("\n"))
    }
}

/// Writes (overwriting or creating) the full contents of a file.
pub struct WriteFileTool {
    workspace_root: PathBuf,
}

impl WriteFileTool {
    /// Create a tool confined to `workspace_root`.
    #[must_use]
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write (creating or overwriting) the full contents of a file, relative to the workspace root."
    }

    fn permission(&self) -> ToolPermission {
        ToolPermission::Edit
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"],
        })
    }

    async fn run(&self, arguments: Value) -> ToolResult<String> {
        let raw = string_arg(&arguments, "path").ok_or_else(|| ToolError::parameter(self.name(), "missing 'path'"))?;
        let content = string_arg(&arguments, "content")
            .ok_or_else(|| ToolError::parameter(self.name(), "missing 'content'"))?;
        let path = resolve_path(&self.workspace_root, raw, self.name())?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| ToolError::execution(self.name(), err.to_string()))?;
        }
        std::fs::write(&path, content).map_err(|err| ToolError::execution(self.name(), err.to_string()))?;
        Ok(format!("wrote {} bytes to {raw}", content.len()))
    }
}

/// Replaces the first occurrence of a substring in a file.
pub struct ReplaceInFileTool {
    workspace_root: PathBuf,
}

impl ReplaceInFileTool {
    /// Create a tool confined to `workspace_root`.
    #[must_use]
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }
}

#[async_trait]
impl Tool for ReplaceInFileTool {
    fn name(&self) -> &str {
        "replace_in_file"
    }

    fn description(&self) -> &str {
        "Replace the first occurrence of `find` with `replace` in a file, relative to the workspace root."
    }

    fn permission(&self) -> ToolPermission {
        ToolPermission::Edit
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "find": { "type": "string" },
                "replace": { "type": "string" }
            },
            "required": ["path", "find", "replace"],
        })
    }

    async fn run(&self, arguments: Value) -> ToolResult<String> {
        let raw = string_arg(&arguments, "path").ok_or_else(|| ToolError::parameter(self.name(), "missing 'path'"))?;
        let find = string_arg(&arguments, "find").ok_or_else(|| ToolError::parameter(self.name(), "missing 'find'"))?;
        let replace = string_arg(&arguments, "replace")
            .ok_or_else(|| ToolError::parameter(self.name(), "missing 'replace'"))?;
        let path = resolve_path(&self.workspace_root, raw, self.name())?;
        let contents = std::fs::read_to_string(&path)
            .map_err(|err| ToolError::execution(self.name(), err.to_string()))?;
        let Some(pos) = contents.find(find) else {
            return Err(ToolError::execution(self.name(), format!("'{find}' not found in {raw}")));
        };
        let mut updated = contents[..pos].to_string();
        updated.push_str(replace);
        updated.push_str(&contents[pos + find.len()..]);
        std::fs::write(&path, &updated).map_err(|err| ToolError::execution(self.name(), err.to_string()))?;
        Ok(format!("replaced 1 occurrence in {raw}"))
    }
}

/// Deletes a file or an empty directory.
pub struct DeletePathTool {
    workspace_root: PathBuf,
}

impl DeletePathTool {
    /// Create a tool confined to `workspace_root`.
    #[must_use]
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }
}

#[async_trait]
impl Tool for DeletePathTool {
    fn name(&self) -> &str {
        "delete_path"
    }

    fn description(&self) -> &str {
        "Delete a file or an empty directory, relative to the workspace root."
    }

    fn permission(&self) -> ToolPermission {
        ToolPermission::Delete
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"],
        })
    }

    async fn run(&self, arguments: Value) -> ToolResult<String> {
        let raw = string_arg(&arguments, "path").ok_or_else(|| ToolError::parameter(self.name(), "missing 'path'"))?;
        let path = resolve_path(&self.workspace_root, raw, self.name())?;
        let result = if path.is_dir() {
            std::fs::remove_dir(&path)
        } else {
            std::fs::remove_file(&path)
        };
        result.map_err(|err| ToolError::execution(self.name(), err.to_string()))?;
        Ok(format!("deleted {raw}"))
    }
}

/// Moves or renames a file or directory.
pub struct MovePathTool {
    workspace_root: PathBuf,
}

impl MovePathTool {
    /// Create a tool confined to `workspace_root`.
    #[must_use]
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }
}

#[async_trait]
impl Tool for MovePathTool {
    fn name(&self) -> &str {
        "move_path"
    }

    fn description(&self) -> &str {
        "Move or rename a file or directory, both paths relative to the workspace root."
    }

    fn permission(&self) -> ToolPermission {
        ToolPermission::Edit
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "from": { "type": "string" },
                "to": { "type": "string" }
            },
            "required": ["from", "to"],
        })
    }

    async fn run(&self, arguments: Value) -> ToolResult<String> {
        let from = string_arg(&arguments, "from").ok_or_else(|| ToolError::parameter(self.name(), "missing 'from'"))?;
        let to = string_arg(&arguments, "to").ok_or_else(|| ToolError::parameter(self.name(), "missing 'to'"))?;
        let from_path = resolve_path(&self.workspace_root, from, self.name())?;
        let to_path = resolve_path(&self.workspace_root, to, self.name())?;
        if let Some(parent) = to_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| ToolError::execution(self.name(), err.to_string()))?;
        }
        std::fs::rename(&from_path, &to_path)
            .map_err(|err| ToolError::execution(self.name(), err.to_string()))?;
        Ok(format!("moved {from} to {to}"))
    }
}

/// Renders the recursive directory tree under a path.
pub struct DirectoryTreeTool {
    workspace_root: PathBuf,
}

impl DirectoryTreeTool {
    /// Create a tool confined to `workspace_root`.
    #[must_use]
    pub fn new(workspace_root: PathBuf) -> Self {
        Self { workspace_root }
    }

    fn render(&self, dir: &Path, ignore: &IgnoreSet, depth: usize, out: &mut String) {
        let Ok(mut entries) = std::fs::read_dir(dir).map(|r| r.filter_map(Result::ok).collect::<Vec<_>>()) else {
            return;
        };
        entries.sort_by_key(std::fs::DirEntry::file_name);
        for entry in entries {
            let path = entry.path();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            let rel = relative_str(&self.workspace_root, &path);
            if ignore.is_ignored(&rel, is_dir) {
                continue;
            }
            out.push_str(&"  ".repeat(depth));
            out.push_str(&entry.file_name().to_string_lossy());
            if is_dir {
                out.push('/');
                out.push('\n');
                self.render(&path, ignore, depth + 1, out);
            } else {
                out.push('\n');
            }
        }
    }
}

#[async_trait]
impl Tool for DirectoryTreeTool {
    fn name(&self) -> &str {
        "directory_tree"
    }

    fn description(&self) -> &str {
        "Render the recursive file/directory tree under a path, relative to the workspace root."
    }

    fn permission(&self) -> ToolPermission {
        ToolPermission::Read
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "directory": { "type": "string", "description": "Defaults to \".\"." }
            },
            "required": [],
        })
    }

    async fn run(&self, arguments: Value) -> ToolResult<String> {
        let directory = string_arg(&arguments, "directory").unwrap_or(".");
        let path = resolve_path(&self.workspace_root, directory, self.name())?;
        let ignore = ignore_set_for(&self.workspace_root);
        let mut out = String::new();
        self.render(&path, &ignore, 0, &mut out);
        Ok(out)
    }
}
