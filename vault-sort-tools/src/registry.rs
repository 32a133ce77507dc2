use crate::error::ToolError;
use crate::snapshot::SnapshotBuilder;
use crate::tools::{InspectFileTool, ListDirTool, PlanMoveTool, Tool};
use crate::vault::VaultLayout;
use crate::sandbox::PathGuard;
use std::collections::HashMap;
use std::sync::Arc;

pub struct ToolRegistryImpl {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistryImpl {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registry holding `list_dir`, `inspect_file` and `plan_move` for one vault.
    pub fn for_vault(layout: &VaultLayout, builder: Arc<SnapshotBuilder>) -> Result<Self, ToolError> {
        let guard = PathGuard::new(layout.root())?;
        let mut registry = Self::new();
        registry
            .register(Arc::new(ListDirTool::new(guard.clone(), builder.clone())))
            .register(Arc::new(InspectFileTool::new(guard, builder)))
            .register(Arc::new(PlanMoveTool::new(layout.clone())?));
        Ok(registry)
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Tool names in sorted order.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistryImpl {
    fn default() -> Self {
        Self::new()
    }
}
