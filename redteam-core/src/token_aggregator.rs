use std::collections::HashMap;
use std::sync::Mutex;

use once_cell::sync::OnceCell;
use redteam_protocol::TokenUsage;

static GLOBAL_BREAKDOWN: OnceCell<Mutex<HashMap<String, TokenUsage>>> = OnceCell::new();

fn global() -> &'static Mutex<HashMap<String, TokenUsage>> {
    GLOBAL_BREAKDOWN.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Returns a snapshot of the process-wide per-provider usage breakdown
/// (§4.3). Intended for diagnostics; the per-call result only ever reports
/// the local accumulator (§4.3, last sentence).
pub fn global_breakdown() -> HashMap<String, TokenUsage> {
    global().lock().unwrap().clone()
}

/// Clears the process-wide breakdown. Only safe between fully-quiesced
/// runs or in tests (§9).
pub fn reset_global() {
    global().lock().unwrap().clear();
}

/// Per-call token-usage accumulator (§4.3). Not shared across calls — each
/// attack-loop invocation owns one, and only its totals are copied into
/// the final `ResultEnvelope`.
#[derive(Debug, Default, Clone)]
pub struct TokenAggregator {
    local: TokenUsage,
}

impl TokenAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one provider response's usage. Missing subfields default
    /// to 0; `numRequests` always increments by exactly 1 for this call,
    /// regardless of what (if anything) the provider reported for that
    /// field, since each `record` corresponds to exactly one request.
    pub fn record(&mut self, provider_id: &str, usage: Option<TokenUsage>) {
        let mut delta = usage.unwrap_or_default();
        delta.num_requests = 1;

        self.local.merge(&delta);

        global()
            .lock()
            .unwrap()
            .entry(provider_id.to_string())
            .or_default()
            .merge(&delta);
    }

    pub fn totals(&self) -> TokenUsage {
        self.local
    }
}
