//! Tool and resource registries
//!
//! The surrounding application registers UI resources and tools into a
//! [`Catalog`] at startup. Registration checks every invariant up front
//! (unique names, well-formed `ui://` URIs, no dangling resource references)
//! and the catalog is then frozen into an immutable [`Registry`] that is
//! shared by every channel without locking.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::error::{RegistryError, RegistryResult};
use super::schema::InputContract;

/// URI scheme for sandboxable UI resources.
pub const UI_SCHEME: &str = "ui://";

/// Content type marking a resource as sandboxable UI rather than plain data.
pub const UI_MIME_TYPE: &str = "text/html;profile=mcp-app";

/// Parsed `ui://<namespace>/<path>` identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceUri {
    raw: String,
    namespace_end: usize,
}

impl ResourceUri {
    /// Parse a resource URI. Returns `None` unless the string has the
    /// `ui://` scheme, a non-empty namespace made of `[A-Za-z0-9._-]`, and a
    /// non-empty path.
    pub fn parse(raw: &str) -> Option<Self> {
        let rest = raw.strip_prefix(UI_SCHEME)?;
        let (namespace, path) = rest.split_once('/')?;
        if namespace.is_empty() || path.is_empty() {
            return None;
        }
        if !namespace
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return None;
        }
        Some(Self {
            raw: raw.to_string(),
            namespace_end: UI_SCHEME.len() + namespace.len(),
        })
    }

    /// Namespace segment (the unit of authorization).
    pub fn namespace(&self) -> &str {
        &self.raw[UI_SCHEME.len()..self.namespace_end]
    }

    /// Path after the namespace.
    pub fn path(&self) -> &str {
        &self.raw[self.namespace_end + 1..]
    }

    /// Full URI text.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Namespace of a raw resource id, or `None` if it is not a valid `ui://` URI.
pub fn namespace_of(raw: &str) -> Option<&str> {
    let rest = raw.strip_prefix(UI_SCHEME)?;
    let (namespace, path) = rest.split_once('/')?;
    let valid = !namespace.is_empty()
        && !path.is_empty()
        && namespace
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    valid.then_some(namespace)
}

/// Renderable UI content. Immutable once registered.
#[derive(Debug, Clone)]
pub struct ResourceDefinition {
    uri: ResourceUri,
    name: Option<String>,
    content: Arc<str>,
    mime_type: String,
    digest: String,
}

impl ResourceDefinition {
    /// Resource with an explicit content type.
    pub fn new(
        uri: &str,
        content: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> RegistryResult<Self> {
        let uri =
            ResourceUri::parse(uri).ok_or_else(|| RegistryError::InvalidResourceUri(uri.into()))?;
        let content: String = content.into();
        let digest = blake3::hash(content.as_bytes()).to_hex().to_string();
        Ok(Self {
            uri,
            name: None,
            content: Arc::from(content),
            mime_type: mime_type.into(),
            digest,
        })
    }

    /// Sandboxable HTML app resource.
    pub fn html(uri: &str, content: impl Into<String>) -> RegistryResult<Self> {
        Self::new(uri, content, UI_MIME_TYPE)
    }

    /// Attach a display name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Resource identifier.
    pub fn uri(&self) -> &ResourceUri {
        &self.uri
    }

    /// Serialized content.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Content type tag.
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Blake3 digest of the content (hex).
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Whether the content type marks sandboxable UI.
    pub fn is_ui(&self) -> bool {
        self.mime_type == UI_MIME_TYPE
    }

    /// Listing entry for `resources/list`.
    pub fn describe(&self) -> Value {
        json!({
            "uri": self.uri.as_str(),
            "name": self.name.clone().unwrap_or_else(|| self.uri.path().to_string()),
            "mimeType": self.mime_type,
            "_meta": { "digest": self.digest },
        })
    }

    /// Body for `resources/read`.
    pub fn contents(&self) -> Value {
        json!({
            "contents": [{
                "uri": self.uri.as_str(),
                "mimeType": self.mime_type,
                "text": &*self.content,
            }]
        })
    }
}

/// One block of human-readable tool output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    /// Plain text
    Text {
        /// Text body
        text: String,
    },
}

/// Successful tool result. Both fields are always serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    /// Content for the agent / transcript
    pub content: Vec<ContentBlock>,
    /// Structured payload for UI consumption (`{}` when the tool has none)
    pub structured_content: Value,
}

impl ToolOutput {
    /// Text-only output.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
            structured_content: json!({}),
        }
    }

    /// Attach a structured payload.
    pub fn with_structured(mut self, value: Value) -> Self {
        self.structured_content = value;
        self
    }
}

/// Future returned by a tool handler
pub type ToolFuture = BoxFuture<'static, anyhow::Result<ToolOutput>>;

/// Type-erased tool handler
pub type ToolHandler = Arc<dyn Fn(Value) -> ToolFuture + Send + Sync>;

/// A callable operation
#[derive(Clone)]
pub struct ToolDefinition {
    name: String,
    description: String,
    input: InputContract,
    handler: ToolHandler,
    ui_resource: Option<String>,
}

impl ToolDefinition {
    /// Tool backed by an async handler.
    pub fn new<F, Fut>(name: impl Into<String>, input: InputContract, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ToolOutput>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            input,
            handler: Arc::new(move |args| handler(args).boxed()),
            ui_resource: None,
        }
    }

    /// Tool backed by a synchronous handler.
    pub fn from_fn<F>(name: impl Into<String>, input: InputContract, handler: F) -> Self
    where
        F: Fn(Value) -> anyhow::Result<ToolOutput> + Send + Sync + 'static,
    {
        Self::new(name, input, move |args| {
            let result = handler(args);
            async move { result }
        })
    }

    /// Attach a description.
    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    /// Back the tool with a UI resource.
    pub fn with_ui_resource(mut self, uri: impl Into<String>) -> Self {
        self.ui_resource = Some(uri.into());
        self
    }

    /// Unique name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Description text.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Input contract.
    pub fn input(&self) -> &InputContract {
        &self.input
    }

    /// Backing UI resource id, if any.
    pub fn ui_resource(&self) -> Option<&str> {
        self.ui_resource.as_deref()
    }

    /// Namespace of the backing resource, if the tool has a well-formed one.
    pub fn namespace(&self) -> Option<&str> {
        self.ui_resource.as_deref().and_then(namespace_of)
    }

    pub(crate) fn handler(&self) -> &ToolHandler {
        &self.handler
    }

    /// Listing entry for `tools/list`.
    pub fn describe_json(&self) -> Value {
        let mut entry = json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input.to_json_schema(),
        });
        if let Some(uri) = &self.ui_resource {
            entry["_meta"] = json!({ "ui": { "resourceUri": uri } });
        }
        entry
    }
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("ui_resource", &self.ui_resource)
            .finish_non_exhaustive()
    }
}

/// Mutable catalog populated at startup.
#[derive(Default)]
pub struct Catalog {
    tools: Vec<ToolDefinition>,
    resources: HashMap<String, ResourceDefinition>,
}

impl Catalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource. URIs must be unique.
    pub fn register_resource(&mut self, resource: ResourceDefinition) -> RegistryResult<()> {
        let key = resource.uri().as_str().to_string();
        if self.resources.contains_key(&key) {
            return Err(RegistryError::DuplicateResource(key));
        }
        tracing::debug!(uri = %key, mime = resource.mime_type(), "registered resource");
        self.resources.insert(key, resource);
        Ok(())
    }

    /// Register a tool. Its backing resource, if any, must already be registered.
    pub fn register_tool(&mut self, tool: ToolDefinition) -> RegistryResult<()> {
        if tool.name.is_empty() {
            return Err(RegistryError::EmptyToolName);
        }
        if self.tools.iter().any(|existing| existing.name == tool.name) {
            return Err(RegistryError::DuplicateTool(tool.name));
        }
        if let Some(uri) = &tool.ui_resource {
            if !self.resources.contains_key(uri) {
                return Err(RegistryError::DanglingResource {
                    tool: tool.name.clone(),
                    resource: uri.clone(),
                });
            }
        }
        tracing::debug!(tool = %tool.name, ui_resource = ?tool.ui_resource, "registered tool");
        self.tools.push(tool);
        Ok(())
    }

    /// Freeze into an immutable registry.
    pub fn snapshot(self) -> Registry {
        let index = self
            .tools
            .iter()
            .enumerate()
            .map(|(idx, tool)| (tool.name.clone(), idx))
            .collect();
        Registry {
            inner: Arc::new(RegistryInner {
                tools: self.tools,
                index,
                resources: self.resources,
            }),
        }
    }
}

struct RegistryInner {
    tools: Vec<ToolDefinition>,
    index: HashMap<String, usize>,
    resources: HashMap<String, ResourceDefinition>,
}

/// Immutable view of registered tools and resources.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Look up a tool by name.
    pub fn tool(&self, name: &str) -> Option<&ToolDefinition> {
        self.inner
            .index
            .get(name)
            .map(|&idx| &self.inner.tools[idx])
    }

    /// All tools in registration order.
    pub fn tools(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.inner.tools.iter()
    }

    /// Look up a resource by URI.
    pub fn resource(&self, uri: &str) -> Option<&ResourceDefinition> {
        self.inner.resources.get(uri)
    }

    /// All resources, sorted by URI.
    pub fn resources(&self) -> Vec<&ResourceDefinition> {
        let mut all: Vec<_> = self.inner.resources.values().collect();
        all.sort_by(|a, b| a.uri().as_str().cmp(b.uri().as_str()));
        all
    }

    /// Number of registered tools.
    pub fn tool_count(&self) -> usize {
        self.inner.tools.len()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("tools", &self.inner.tools.len())
            .field("resources", &self.inner.resources.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_resource_uris() {
        let uri = ResourceUri::parse("ui://flights/app.html").unwrap();
        assert_eq!(uri.namespace(), "flights");
        assert_eq!(uri.path(), "app.html");

        assert!(ResourceUri::parse("ui://flights").is_none());
        assert!(ResourceUri::parse("ui:///app.html").is_none());
        assert!(ResourceUri::parse("ui://flights/").is_none());
        assert!(ResourceUri::parse("https://flights/app.html").is_none());
        assert!(ResourceUri::parse("ui://fl ights/app.html").is_none());
        assert_eq!(namespace_of("ui://hotels/a/b.html"), Some("hotels"));
        assert_eq!(namespace_of("hotels/app.html"), None);
    }

    #[test]
    fn dangling_resource_reference_is_rejected() {
        let mut catalog = Catalog::new();
        let tool = ToolDefinition::from_fn("search-flights", InputContract::new(), |_| {
            Ok(ToolOutput::text("ok"))
        })
        .with_ui_resource("ui://flights/app.html");

        let err = catalog.register_tool(tool).unwrap_err();
        assert!(matches!(err, RegistryError::DanglingResource { .. }));
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut catalog = Catalog::new();
        catalog
            .register_resource(ResourceDefinition::html("ui://flights/app.html", "<p>").unwrap())
            .unwrap();
        let err = catalog
            .register_resource(ResourceDefinition::html("ui://flights/app.html", "<p>").unwrap())
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateResource("ui://flights/app.html".into()));

        let make = || ToolDefinition::from_fn("echo", InputContract::new(), |_| Ok(ToolOutput::text("")));
        catalog.register_tool(make()).unwrap();
        assert_eq!(
            catalog.register_tool(make()).unwrap_err(),
            RegistryError::DuplicateTool("echo".into())
        );
    }

    #[test]
    fn invalid_resource_uri_is_rejected() {
        let err = ResourceDefinition::html("flights/app.html", "<p>").unwrap_err();
        assert_eq!(err, RegistryError::InvalidResourceUri("flights/app.html".into()));
    }

    #[test]
    fn snapshot_preserves_lookup() {
        let mut catalog = Catalog::new();
        catalog
            .register_resource(ResourceDefinition::html("ui://flights/app.html", "<html/>").unwrap())
            .unwrap();
        catalog
            .register_tool(
                ToolDefinition::from_fn("search-flights", InputContract::new(), |_| {
                    Ok(ToolOutput::text("ok"))
                })
                .with_ui_resource("ui://flights/app.html"),
            )
            .unwrap();
        let registry = catalog.snapshot();

        let tool = registry.tool("search-flights").unwrap();
        assert_eq!(tool.namespace(), Some("flights"));
        let resource = registry.resource("ui://flights/app.html").unwrap();
        assert!(resource.is_ui());
        assert_eq!(resource.digest(), blake3::hash(b"<html/>").to_hex().as_str());
        assert_eq!(
            tool.describe_json()["_meta"]["ui"]["resourceUri"],
            "ui://flights/app.html"
        );
    }

    #[test]
    fn tool_output_always_has_both_fields() {
        let value = serde_json::to_value(ToolOutput::text("hi")).unwrap();
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["structuredContent"], json!({}));
    }
}
