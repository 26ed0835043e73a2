//! Built-in tool catalog for agents.
//!
//! Every tool here is confined to a workspace root (file-system tools reject
//! paths that resolve outside it; [`exec::ExecuteCommandTool`] additionally
//! checks a command whitelist). The catalog is assembled into a
//! [`crate::tool::ToolRegistry`] by [`register_builtin_tools`]; callers that
//! want a narrower surface can register a subset directly instead.

pub mod exec;
pub mod fs;

use std::path::PathBuf;

pub use exec::ExecuteCommandTool;
pub use fs::{
    DeletePathTool, DirectoryTreeTool, GlobFilesTool, GrepContentTool, ListFilesTool, MovePathTool,
    ReadFileTool, ReadManyFilesTool, ReplaceInFileTool, WriteFileTool,
};

use crate::tool::ToolRegistry;

/// Names of every tool [`register_builtin_tools`] adds to a registry.
pub const BUILTIN_TOOL_NAMES: &[&str] = &[
    "list_files",
    "read_file",
    "read_many_files",
    "glob_files",
    "grep_content",
    "write_file",
    "replace_in_file",
    "delete_path",
    "move_path",
    "directory_tree",
    "execute_command",
];

/// Register the full built-in tool catalog, confined to `workspace_root`.
pub fn register_builtin_tools(registry: &mut ToolRegistry, workspace_root: impl Into<PathBuf>) {
    let workspace_root = workspace_root.into();
    registry.register(Box::new(ListFilesTool::new(workspace_root.clone())));
    registry.register(Box::new(ReadFileTool::new(workspace_root.clone())));
    registry.register(Box::new(ReadManyFilesTool::new(workspace_root.clone())));
    registry.register(Box::new(GlobFilesTool::new(workspace_root.clone())));
    registry.register(Box::new(GrepContentTool::new(workspace_root.clone())));
    registry.register(Box::new(WriteFileTool::new(workspace_root.clone())));
    registry.register(Box::new(ReplaceInFileTool::new(workspace_root.clone())));
    registry.register(Box::new(DeletePathTool::new(workspace_root.clone())));
    registry.register(Box::new(MovePathTool::new(workspace_root.clone())));
    registry.register(Box::new(DirectoryTreeTool::new(workspace_root.clone())));
    registry.register(Box::new(ExecuteCommandTool::new(workspace_root)));
}

/// `true` if `name` is one of the built-in tools [`register_builtin_tools`] adds.
#[must_use]
pub fn is_builtin_tool(name: &str) -> bool {
    BUILTIN_TOOL_NAMES.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_every_builtin_tool() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry, std::env::temp_dir());
        for name in BUILTIN_TOOL_NAMES {
            assert!(registry.contains(name), "missing builtin tool '{name}'");
        }
        assert_eq!(registry.len(), BUILTIN_TOOL_NAMES.len());
    }
}
