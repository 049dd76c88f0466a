//! Namespace-based access filter
//!
//! A caller's [`ConnectionContext`] lists the namespaces it has connected.
//! Tools without a UI resource are always visible; a tool backed by
//! `ui://<namespace>/...` is visible only while that namespace is connected.
//! Visibility is recomputed from the context on every call and fails closed
//! for resource ids that do not parse.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::registry::{Registry, ToolDefinition, namespace_of};

/// Per-call authorization state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionContext {
    connected_namespaces: BTreeSet<String>,
}

impl ConnectionContext {
    /// Context with no connected namespaces.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Context with the given namespaces connected.
    pub fn with_namespaces<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            connected_namespaces: namespaces.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `namespace` is connected.
    pub fn is_connected(&self, namespace: &str) -> bool {
        self.connected_namespaces.contains(namespace)
    }

    /// Connected namespaces in sorted order.
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.connected_namespaces.iter().map(String::as_str)
    }
}

/// Visibility rule for a single tool's backing resource id.
pub fn is_visible(ui_resource: Option<&str>, context: &ConnectionContext) -> bool {
    match ui_resource {
        None => true,
        Some(raw) => namespace_of(raw).is_some_and(|ns| context.is_connected(ns)),
    }
}

/// Whether a tool is reachable under `context`.
pub fn tool_visible(tool: &ToolDefinition, context: &ConnectionContext) -> bool {
    is_visible(tool.ui_resource(), context)
}

/// Whether a resource may be listed or read under `context`.
pub fn resource_visible(uri: &str, context: &ConnectionContext) -> bool {
    is_visible(Some(uri), context)
}

/// Tools visible under `context`, in registration order.
pub fn resolve_visible_tools<'r>(
    registry: &'r Registry,
    context: &ConnectionContext,
) -> Vec<&'r ToolDefinition> {
    registry
        .tools()
        .filter(|tool| tool_visible(tool, context))
        .collect()
}

/// Source of a fresh [`ConnectionContext`] for each authorization decision.
///
/// Implemented by whatever store tracks which namespaces the user has
/// connected. The filter never reads that store directly.
pub trait ContextProvider: Send + Sync {
    /// Current authorization state.
    fn connection_context(&self) -> ConnectionContext;
}

impl ContextProvider for ConnectionContext {
    fn connection_context(&self) -> ConnectionContext {
        self.clone()
    }
}

/// Shared, mutable set of connected namespaces.
#[derive(Debug, Clone, Default)]
pub struct SharedConnections {
    inner: Arc<RwLock<BTreeSet<String>>>,
}

impl SharedConnections {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a namespace. Returns `false` if it was already connected.
    pub fn connect(&self, namespace: impl Into<String>) -> bool {
        self.inner.write().insert(namespace.into())
    }

    /// Disconnect a namespace. Returns `false` if it was not connected.
    pub fn disconnect(&self, namespace: &str) -> bool {
        self.inner.write().remove(namespace)
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> ConnectionContext {
        ConnectionContext {
            connected_namespaces: self.inner.read().clone(),
        }
    }
}

impl ContextProvider for SharedConnections {
    fn connection_context(&self) -> ConnectionContext {
        self.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::registry::{Catalog, ResourceDefinition, ToolOutput};
    use crate::runtime::schema::InputContract;
    use proptest::prelude::*;

    fn registry() -> Registry {
        let mut catalog = Catalog::new();
        for ns in ["flights", "hotels"] {
            catalog
                .register_resource(
                    ResourceDefinition::html(&format!("ui://{ns}/app.html"), "<html/>").unwrap(),
                )
                .unwrap();
        }
        let tool = |name: &str| {
            ToolDefinition::from_fn(name, InputContract::new().allow_additional(), |_| {
                Ok(ToolOutput::text("ok"))
            })
        };
        catalog
            .register_tool(tool("search-flights").with_ui_resource("ui://flights/app.html"))
            .unwrap();
        catalog
            .register_tool(tool("book-flight").with_ui_resource("ui://flights/app.html"))
            .unwrap();
        catalog
            .register_tool(tool("search-hotels").with_ui_resource("ui://hotels/app.html"))
            .unwrap();
        catalog.register_tool(tool("get-time")).unwrap();
        catalog.snapshot()
    }

    fn names(tools: Vec<&ToolDefinition>) -> Vec<&str> {
        tools.into_iter().map(ToolDefinition::name).collect()
    }

    #[test]
    fn empty_context_sees_only_utility_tools() {
        let registry = registry();
        let visible = resolve_visible_tools(&registry, &ConnectionContext::empty());
        assert_eq!(names(visible), vec!["get-time"]);
    }

    #[test]
    fn connected_namespace_unlocks_its_tools_only() {
        let registry = registry();
        let ctx = ConnectionContext::with_namespaces(["flights"]);
        let visible = resolve_visible_tools(&registry, &ctx);
        assert_eq!(names(visible), vec!["search-flights", "book-flight", "get-time"]);
    }

    #[test]
    fn malformed_resource_ids_fail_closed() {
        let ctx = ConnectionContext::with_namespaces(["flights", ""]);
        assert!(!is_visible(Some("flights/app.html"), &ctx));
        assert!(!is_visible(Some("ui:///app.html"), &ctx));
        assert!(!is_visible(Some("ui://flights"), &ctx));
        assert!(is_visible(Some("ui://flights/app.html"), &ctx));
        assert!(is_visible(None, &ctx));
    }

    #[test]
    fn shared_connections_are_read_fresh() {
        let registry = registry();
        let store = SharedConnections::new();
        assert_eq!(resolve_visible_tools(&registry, &store.connection_context()).len(), 1);

        assert!(store.connect("hotels"));
        assert!(!store.connect("hotels"));
        assert_eq!(resolve_visible_tools(&registry, &store.connection_context()).len(), 2);

        assert!(store.disconnect("hotels"));
        assert_eq!(resolve_visible_tools(&registry, &store.connection_context()).len(), 1);
    }

    proptest! {
        #[test]
        fn visibility_follows_namespace_membership(
            namespace in "[a-z]{1,8}",
            connected in proptest::collection::btree_set("[a-z]{1,8}", 0..5),
            path in "[a-z]{1,8}\\.html",
        ) {
            let ctx = ConnectionContext::with_namespaces(connected.clone());
            let uri = format!("ui://{namespace}/{path}");
            prop_assert_eq!(is_visible(Some(uri.as_str()), &ctx), connected.contains(&namespace));
            prop_assert!(is_visible(None, &ctx));
        }
    }
}
