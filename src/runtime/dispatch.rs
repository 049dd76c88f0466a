//! Tool invocation
//!
//! Looks a tool up, checks it against the caller's connection context,
//! validates arguments, and runs the handler. Handler errors and panics are
//! contained here and surface as [`RpcError::ToolExecution`].

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::access::{ConnectionContext, tool_visible};
use super::error::{RpcError, RpcResult};
use super::registry::{Registry, ToolDefinition, ToolOutput};

/// Parameters of a `tools/call` request.
#[derive(Debug, Clone, Deserialize)]
pub struct CallToolParams {
    /// Tool name
    pub name: String,
    /// Raw arguments
    #[serde(default)]
    pub arguments: Value,
}

impl CallToolParams {
    /// Parse request params.
    pub fn from_params(params: Value) -> RpcResult<Self> {
        serde_json::from_value(params)
            .map_err(|err| RpcError::InvalidParams(format!("tools/call: {err}")))
    }
}

/// Invoke `name` with `args` on behalf of a caller holding `context`.
pub async fn invoke(
    registry: &Registry,
    name: &str,
    args: Value,
    context: &ConnectionContext,
) -> RpcResult<ToolOutput> {
    let tool = authorize(registry, name, &args, context)?;
    execute(tool, args).await
}

/// Resolve `name` and check it against `context` and the tool's input
/// contract, without running it.
///
/// Unknown names fail before authorization, and authorization fails before
/// argument validation, so an unauthorized caller learns nothing about the
/// tool's contract.
pub fn authorize<'r>(
    registry: &'r Registry,
    name: &str,
    args: &Value,
    context: &ConnectionContext,
) -> RpcResult<&'r ToolDefinition> {
    let tool = registry
        .tool(name)
        .ok_or_else(|| RpcError::UnknownTool(name.to_string()))?;

    if !tool_visible(tool, context) {
        warn!(tool = name, "tool call denied: namespace not connected");
        return Err(RpcError::ToolNotAuthorized(name.to_string()));
    }

    tool.input()
        .validate(args)
        .map_err(RpcError::InvalidArguments)?;
    Ok(tool)
}

/// Run an authorized tool's handler.
pub async fn execute(tool: &ToolDefinition, args: Value) -> RpcResult<ToolOutput> {
    let name = tool.name();
    debug!(tool = name, "invoking tool");
    let handler = tool.handler().clone();
    let future = std::panic::catch_unwind(AssertUnwindSafe(|| handler(args)))
        .map_err(|panic| RpcError::ToolExecution(panic_message(panic)))?;

    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(err)) => {
            warn!(tool = name, error = %err, "tool handler failed");
            Err(RpcError::ToolExecution(format!("{err:#}")))
        }
        Err(panic) => {
            let message = panic_message(panic);
            warn!(tool = name, panic = %message, "tool handler panicked");
            Err(RpcError::ToolExecution(message))
        }
    }
}

pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        format!("panicked: {text}")
    } else if let Some(text) = panic.downcast_ref::<String>() {
        format!("panicked: {text}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::registry::{Catalog, ResourceDefinition, ToolDefinition};
    use crate::runtime::schema::{FieldKind, InputContract};
    use serde_json::json;

    fn registry() -> Registry {
        let mut catalog = Catalog::new();
        catalog
            .register_resource(ResourceDefinition::html("ui://flights/app.html", "<html/>").unwrap())
            .unwrap();
        catalog
            .register_tool(
                ToolDefinition::new(
                    "search-flights",
                    InputContract::new()
                        .require("origin", FieldKind::String)
                        .require("destination", FieldKind::String),
                    |args: Value| async move {
                        let route = format!("{} -> {}", args["origin"], args["destination"]);
                        anyhow::Ok(
                            ToolOutput::text(format!("3 flights {route}"))
                                .with_structured(json!({ "flights": [1, 2, 3] })),
                        )
                    },
                )
                .with_ui_resource("ui://flights/app.html"),
            )
            .unwrap();
        catalog
            .register_tool(ToolDefinition::from_fn("fail", InputContract::new(), |_| {
                Err(anyhow::anyhow!("backend unavailable"))
            }))
            .unwrap();
        catalog
            .register_tool(ToolDefinition::from_fn("explode", InputContract::new(), |_| {
                panic!("boom")
            }))
            .unwrap();
        catalog.snapshot()
    }

    #[tokio::test]
    async fn unknown_and_unauthorized_are_distinct() {
        let registry = registry();
        let err = invoke(&registry, "nope", json!({}), &ConnectionContext::empty())
            .await
            .unwrap_err();
        assert_eq!(err, RpcError::UnknownTool("nope".into()));

        let err = invoke(&registry, "search-flights", json!({}), &ConnectionContext::empty())
            .await
            .unwrap_err();
        assert_eq!(err, RpcError::ToolNotAuthorized("search-flights".into()));
    }

    #[tokio::test]
    async fn authorization_is_checked_before_arguments() {
        let registry = registry();
        let err = invoke(&registry, "search-flights", json!("garbage"), &ConnectionContext::empty())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::ToolNotAuthorized(_)));
    }

    #[tokio::test]
    async fn invalid_arguments_list_fields() {
        let registry = registry();
        let ctx = ConnectionContext::with_namespaces(["flights"]);
        let err = invoke(&registry, "search-flights", json!({"origin": "JFK"}), &ctx)
            .await
            .unwrap_err();
        match err {
            RpcError::InvalidArguments(violations) => {
                assert_eq!(violations.len(), 1);
                assert_eq!(violations[0].field, "destination");
            }
            other => panic!("expected InvalidArguments, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn authorized_call_returns_content() {
        let registry = registry();
        let ctx = ConnectionContext::with_namespaces(["flights"]);
        let output = invoke(
            &registry,
            "search-flights",
            json!({"origin": "JFK", "destination": "LAX"}),
            &ctx,
        )
        .await
        .unwrap();
        assert!(!output.content.is_empty());
        assert_eq!(output.structured_content["flights"], json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn handler_failures_become_execution_errors() {
        let registry = registry();
        let ctx = ConnectionContext::empty();
        let err = invoke(&registry, "fail", json!({}), &ctx).await.unwrap_err();
        assert_eq!(err, RpcError::ToolExecution("backend unavailable".into()));

        let err = invoke(&registry, "explode", json!({}), &ctx).await.unwrap_err();
        assert_eq!(err, RpcError::ToolExecution("panicked: boom".into()));
    }

    #[test]
    fn call_params_default_arguments() {
        let params = CallToolParams::from_params(json!({"name": "x"})).unwrap();
        assert_eq!(params.arguments, Value::Null);
        assert!(CallToolParams::from_params(json!({"arguments": {}})).is_err());
    }
}
