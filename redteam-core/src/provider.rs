use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use redteam_protocol::ProviderResponse;
use serde_json::Value;

use crate::error::{OrchestratorError, Result};

/// Cooperative cancellation signal threaded through every provider call
/// (§5). Cloning shares the same underlying flag; firing it must cause an
/// in-flight `call_api` to return `Err(OrchestratorError::ProviderAbort)`.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal(Arc<AtomicBool>);

impl CancellationSignal {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The raw prompt text or label the rendering layer produced, plus the
/// provider that originally rendered it — part of `context` in the
/// provider call contract (§6.1).
#[derive(Debug, Clone, Default)]
pub struct PromptMeta {
    pub raw: String,
    pub label: Option<String>,
}

/// `test.metadata` carried in `context` (§6.1): purpose/goal for the
/// attacker and grader, the plugin id for grader lookup, per-request
/// modifiers, and the two grader-config passthrough fields (§4.6).
#[derive(Debug, Clone, Default)]
pub struct TestMetadata {
    pub purpose: Option<String>,
    pub goal: Option<String>,
    pub plugin_id: Option<String>,
    pub modifiers: HashMap<String, String>,
    pub trace_context: Option<Value>,
    pub grader_examples: Option<String>,
    pub grading_guidance: Option<String>,
}

/// `context` in the provider call contract (§6.1).
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub vars: HashMap<String, Value>,
    pub prompt: PromptMeta,
    pub original_provider: Option<String>,
    pub test: Option<TestMetadata>,
}

/// `options` in the provider call contract (§6.1).
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub abort_signal: Option<CancellationSignal>,
    /// Suppresses JSON-mode coercion even for providers consulted in
    /// `jsonOnly` mode.
    pub suppress_json_mode: bool,
}

impl CallOptions {
    fn check_cancelled(&self) -> Result<()> {
        if self
            .abort_signal
            .as_ref()
            .map(|s| s.is_cancelled())
            .unwrap_or(false)
        {
            return Err(OrchestratorError::ProviderAbort(
                "cancellation signal fired".into(),
            ));
        }
        Ok(())
    }
}

/// Declared support surface for a provider implementation, queried by the
/// provider manager when resolving `jsonOnly`/`preferSmallModel` requests
/// (§4.1).
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderCapabilities {
    pub supports_json_mode: bool,
    pub is_small_model: bool,
}

/// Uniform call surface for attacker / target / scoring providers (§4.1).
/// Implementations must prefer surfacing an `error` field on
/// `ProviderResponse` over returning `Err`; `Err` is reserved for
/// cancellation and is re-raised by the attack loop without being
/// swallowed (§5, §7 provider-abort).
#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> &str;

    async fn call_api(
        &self,
        prompt: &str,
        context: &CallContext,
        options: &CallOptions,
    ) -> Result<ProviderResponse>;

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::default()
    }
}

/// A `Provider` wrapper that checks the cancellation signal before
/// delegating — every concrete provider implementation gets this for free
/// when constructed through `with_cancellation`.
pub struct CancellationAwareProvider<P> {
    inner: P,
}

impl<P: Provider> CancellationAwareProvider<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<P: Provider> Provider for CancellationAwareProvider<P> {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn call_api(
        &self,
        prompt: &str,
        context: &CallContext,
        options: &CallOptions,
    ) -> Result<ProviderResponse> {
        options.check_cancelled()?;
        let response = self.inner.call_api(prompt, context, options).await?;
        options.check_cancelled()?;
        Ok(response)
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.inner.capabilities()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::ScriptedProvider;
    use super::*;

    #[tokio::test]
    async fn cancellation_signal_aborts_call() {
        let signal = CancellationSignal::new();
        signal.cancel();
        let options = CallOptions {
            abort_signal: Some(signal),
            suppress_json_mode: false,
        };
        let provider =
            CancellationAwareProvider::new(ScriptedProvider::new("p", vec![ProviderResponse::text("x")]));
        let result = provider
            .call_api("hi", &CallContext::default(), &options)
            .await;
        assert!(matches!(result, Err(OrchestratorError::ProviderAbort(_))));
    }

    #[tokio::test]
    async fn scripted_provider_returns_responses_in_order() {
        let provider = ScriptedProvider::new(
            "p",
            vec![ProviderResponse::text("first"), ProviderResponse::text("second")],
        );
        let ctx = CallContext::default();
        let opts = CallOptions::default();
        let r1 = provider.call_api("x", &ctx, &opts).await.unwrap();
        let r2 = provider.call_api("x", &ctx, &opts).await.unwrap();
        assert_eq!(r1.output, "first");
        assert_eq!(r2.output, "second");
    }
}
