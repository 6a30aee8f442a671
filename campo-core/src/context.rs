//! Workspace (tenant) context.
//!
//! Every read and write is scoped to the workspace currently selected, e.g.
//! a specific farm. Without one, the repository refuses to do anything.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::RwLock;

use crate::error::EngineError;

/// Identifier of a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkspaceId(String);

impl WorkspaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parses a workspace identifier, rejecting values that cannot be used
    /// as a storage key or URL path segment.
    pub fn parse(id: &str) -> Result<Self, EngineError> {
        let id = id.trim();
        if id.is_empty()
            || id.contains('/')
            || id.contains('\\')
            || id.contains("..")
            || id.starts_with('.')
        {
            return Err(EngineError::InvalidWorkspace(id.to_string()));
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Holder of the currently active workspace.
#[derive(Debug, Default)]
pub struct WorkspaceContext {
    current: RwLock<Option<WorkspaceId>>,
}

impl WorkspaceContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workspace(workspace: WorkspaceId) -> Self {
        Self {
            current: RwLock::new(Some(workspace)),
        }
    }

    pub fn set(&self, workspace: WorkspaceId) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = Some(workspace);
    }

    pub fn clear(&self) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = None;
    }

    pub fn current(&self) -> Option<WorkspaceId> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Returns the active workspace or fails with [`EngineError::NoActiveContext`].
    pub fn require(&self) -> Result<WorkspaceId, EngineError> {
        self.current().ok_or(EngineError::NoActiveContext)
    }
}
