//! The contract between the scheduler and tool implementations.
//!
//! The core requires exactly one thing of the outside world: given a tool
//! name, a parameter mapping, and a cancellation signal, produce a result
//! or an error. Filesystem, shell, search — all tool internals live behind
//! this trait in the surrounding application layer.

use std::future::Future;
use std::pin::Pin;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::error::ToolError;

/// Invokes named tools on behalf of the scheduler.
///
/// The trait is object-safe (boxed futures) so implementations can be
/// stored as `Arc<dyn ToolDispatcher>`. For simple cases, wrap a closure
/// with [`dispatch_fn`].
///
/// Implementations are expected to observe `cancel` promptly for
/// long-running work; the scheduler additionally races every invocation
/// against the signal, so a tool that ignores it still settles as
/// cancelled — it just keeps burning resources until it returns.
///
/// # Example
///
/// ```rust
/// use std::future::Future;
/// use std::pin::Pin;
///
/// use serde_json::{Map, Value};
/// use tokio_util::sync::CancellationToken;
/// use toolrun::{ToolDispatcher, ToolError};
///
/// struct EchoDispatcher;
///
/// impl ToolDispatcher for EchoDispatcher {
///     fn invoke<'a>(
///         &'a self,
///         tool_name: &'a str,
///         params: &'a Map<String, Value>,
///         _cancel: CancellationToken,
///     ) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + 'a>> {
///         Box::pin(async move {
///             Ok(Value::String(format!("{tool_name}: {}", params.len())))
///         })
///     }
/// }
/// ```
pub trait ToolDispatcher: Send + Sync {
    /// Executes one tool invocation.
    ///
    /// Errors are classified by the [`ToolError`] variant: transient
    /// failures are eligible for retry, permanent ones terminate the call
    /// and cascade skips to its dependents.
    fn invoke<'a>(
        &'a self,
        tool_name: &'a str,
        params: &'a Map<String, Value>,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + 'a>>;
}

/// A dispatcher backed by an async closure, created via [`dispatch_fn`].
pub struct FnDispatcher<F> {
    f: F,
}

impl<F> std::fmt::Debug for FnDispatcher<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnDispatcher").finish_non_exhaustive()
    }
}

/// Wraps an async closure as a [`ToolDispatcher`].
///
/// The closure receives the tool name and parameters by reference and must
/// return a `'static` future — clone what the future needs before the
/// `async move` block. The cancellation token is not passed through;
/// implement [`ToolDispatcher`] directly for cancellation-aware tools.
///
/// # Example
///
/// ```rust
/// use serde_json::{json, Value};
/// use toolrun::{dispatch_fn, ToolError};
///
/// let dispatcher = dispatch_fn(|tool_name, _params| {
///     let name = tool_name.to_string();
///     async move {
///         if name == "version" {
///             Ok(json!("1.0"))
///         } else {
///             Err(ToolError::failed(format!("unknown tool: {name}")))
///         }
///     }
/// });
/// ```
pub fn dispatch_fn<F, Fut>(f: F) -> FnDispatcher<F>
where
    F: for<'c> Fn(&'c str, &'c Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    FnDispatcher { f }
}

impl<F, Fut> ToolDispatcher for FnDispatcher<F>
where
    F: for<'c> Fn(&'c str, &'c Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    fn invoke<'a>(
        &'a self,
        tool_name: &'a str,
        params: &'a Map<String, Value>,
        _cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + 'a>> {
        Box::pin((self.f)(tool_name, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_dispatch_fn_invokes_closure() {
        let dispatcher = dispatch_fn(|tool_name, params| {
            let reply = format!("{tool_name}/{}", params.len());
            async move { Ok(Value::String(reply)) }
        });

        let mut params = Map::new();
        params.insert("a".into(), json!(1));

        let result = dispatcher
            .invoke("echo", &params, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, json!("echo/1"));
    }

    #[tokio::test]
    async fn test_dispatch_fn_propagates_errors() {
        let dispatcher = dispatch_fn(|_, _| async { Err(ToolError::failed("nope")) });
        let result = dispatcher
            .invoke("t", &Map::new(), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ToolError::Execution { .. })));
    }

    #[test]
    fn test_dispatcher_is_object_safe() {
        fn assert_dyn(_d: &dyn ToolDispatcher) {}
        let dispatcher = dispatch_fn(|_, _| async { Ok(Value::Null) });
        assert_dyn(&dispatcher);
    }
}
