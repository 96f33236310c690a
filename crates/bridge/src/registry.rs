//! Multi-source tool registry.

use channel::Tool;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Identifies one embedded guest frame instance.
///
/// Caller-supplied and stable for the lifetime of the frame; a replacement
/// frame for the same logical guest reuses the id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SourceId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// The origin of a set of tools: the host's own upstream connection, or a
/// specific connected guest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ToolSource {
    Host,
    Guest(SourceId),
}

impl ToolSource {
    pub fn guest(id: impl Into<SourceId>) -> Self {
        Self::Guest(id.into())
    }
}

impl std::fmt::Display for ToolSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolSource::Host => f.write_str("host"),
            ToolSource::Guest(id) => write!(f, "guest:{id}"),
        }
    }
}

/// A tool definition tagged with its owning source.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
    pub source: ToolSource,
}

impl ToolDescriptor {
    fn from_tool(tool: Tool, source: ToolSource) -> Self {
        Self {
            name: tool.name,
            description: tool.description,
            input_schema: tool.input_schema,
            source,
        }
    }
}

/// Aggregates tool descriptors from the host's upstream connection and every
/// connected guest.
///
/// The aggregate list order is source insertion order, then declaration
/// order within a source; a republish keeps the source's original position.
/// This ordering is observable to callers and stable for a given sequence of
/// publishes.
#[derive(Default)]
pub struct ToolRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    order: Vec<ToolSource>,
    tools: HashMap<ToolSource, Vec<ToolDescriptor>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replace all descriptors tagged with `source`.
    ///
    /// A full replace, never a merge: tools absent from `tools` disappear.
    /// Within a source, a duplicate name keeps its first declaration, so the
    /// registry never holds two descriptors with the same `(name, source)`.
    pub fn publish(&self, source: ToolSource, tools: Vec<Tool>) {
        let mut inner = self.inner.lock();
        if !inner.order.contains(&source) {
            inner.order.push(source.clone());
        }
        let mut seen = HashSet::new();
        let descriptors = tools
            .into_iter()
            .filter(|t| seen.insert(t.name.clone()))
            .map(|t| ToolDescriptor::from_tool(t, source.clone()))
            .collect();
        inner.tools.insert(source, descriptors);
    }

    /// Remove all descriptors tagged with `source`. No-op when none exist.
    pub fn unpublish(&self, source: &ToolSource) {
        let mut inner = self.inner.lock();
        inner.order.retain(|s| s != source);
        inner.tools.remove(source);
    }

    /// Aggregate snapshot in the documented order.
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|s| inner.tools.get(s))
            .flatten()
            .cloned()
            .collect()
    }

    /// Look up one descriptor by `(name, source)`.
    pub fn get(&self, name: &str, source: &ToolSource) -> Option<ToolDescriptor> {
        let inner = self.inner.lock();
        inner
            .tools
            .get(source)?
            .iter()
            .find(|d| d.name == name)
            .cloned()
    }
}
