use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;

use crate::error::{OrchestratorError, Result};
use crate::provider::Provider;

/// The three logical provider roles consumed by the core (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderRole {
    Target,
    Attacker,
    Scorer,
}

/// Resolution hints a caller passes when asking the manager for a
/// provider (§4.1): `jsonOnly` forces JSON-mode-capable resolution,
/// `preferSmallModel` forces a cheap/fast model regardless of the
/// explicit/default chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    pub json_only: bool,
    pub prefer_small_model: bool,
}

/// Process-wide singleton resolving a role to a concrete provider (§4.1,
/// §5, §9). Internally synchronized so the per-provider registration maps
/// tolerate concurrent updates from parallel attack-loop calls; reset is
/// intended for tests and between fully-quiesced evaluation runs only
/// (§9 design note on singletons).
pub struct ProviderManager {
    explicit: Mutex<HashMap<ProviderRole, Arc<dyn Provider>>>,
    defaults: Mutex<HashMap<ProviderRole, Arc<dyn Provider>>>,
    json_capable_default: Mutex<Option<Arc<dyn Provider>>>,
}

static GLOBAL: OnceCell<ProviderManager> = OnceCell::new();

impl ProviderManager {
    pub(crate) fn new() -> Self {
        Self {
            explicit: Mutex::new(HashMap::new()),
            defaults: Mutex::new(HashMap::new()),
            json_capable_default: Mutex::new(None),
        }
    }

    /// Returns the process-wide instance, initializing it on first use.
    pub fn global() -> &'static ProviderManager {
        GLOBAL.get_or_init(ProviderManager::new)
    }

    /// Registers an explicitly configured provider for a role — consulted
    /// first during resolution (priority 1 in §4.1).
    pub fn set_explicit(&self, role: ProviderRole, provider: Arc<dyn Provider>) {
        self.explicit.lock().unwrap().insert(role, provider);
    }

    /// Registers a process-wide default for a role — consulted second
    /// (priority 2 in §4.1). Environment-derived defaults (priority 3) are
    /// expected to be registered here by the caller at startup, since the
    /// core itself never reads the process environment directly.
    pub fn set_default(&self, role: ProviderRole, provider: Arc<dyn Provider>) {
        self.defaults.lock().unwrap().insert(role, provider);
    }

    /// Registers the known small/JSON-capable provider forced when
    /// `jsonOnly` or `preferSmallModel` is requested.
    pub fn set_json_capable_default(&self, provider: Arc<dyn Provider>) {
        *self.json_capable_default.lock().unwrap() = Some(provider);
    }

    pub fn resolve(&self, role: ProviderRole, options: ResolveOptions) -> Result<Arc<dyn Provider>> {
        if options.json_only || options.prefer_small_model {
            return self
                .json_capable_default
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| {
                    OrchestratorError::Configuration(
                        "no known small/JSON-capable provider registered".into(),
                    )
                });
        }

        if let Some(p) = self.explicit.lock().unwrap().get(&role) {
            return Ok(p.clone());
        }
        if let Some(p) = self.defaults.lock().unwrap().get(&role) {
            return Ok(p.clone());
        }
        Err(OrchestratorError::Configuration(format!(
            "no provider configured or defaulted for role {role:?}"
        )))
    }

    /// Clears all registrations. Only safe to call between fully-quiesced
    /// runs or in tests (§9).
    pub fn reset(&self) {
        self.explicit.lock().unwrap().clear();
        self.defaults.lock().unwrap().clear();
        *self.json_capable_default.lock().unwrap() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::test_support::ScriptedProvider;
    use redteam_protocol::ProviderResponse;

    fn provider(id: &str) -> Arc<dyn Provider> {
        Arc::new(ScriptedProvider::new(id, vec![ProviderResponse::text("ok")]))
    }

    #[test]
    fn explicit_registration_wins_over_default() {
        let mgr = ProviderManager::new();
        mgr.set_default(ProviderRole::Target, provider("default-target"));
        mgr.set_explicit(ProviderRole::Target, provider("explicit-target"));
        let resolved = mgr
            .resolve(ProviderRole::Target, ResolveOptions::default())
            .unwrap();
        assert_eq!(resolved.id(), "explicit-target");
    }

    #[test]
    fn json_only_bypasses_explicit_and_default() {
        let mgr = ProviderManager::new();
        mgr.set_explicit(ProviderRole::Attacker, provider("explicit-attacker"));
        mgr.set_json_capable_default(provider("json-capable"));
        let resolved = mgr
            .resolve(
                ProviderRole::Attacker,
                ResolveOptions {
                    json_only: true,
                    prefer_small_model: false,
                },
            )
            .unwrap();
        assert_eq!(resolved.id(), "json-capable");
    }

    #[test]
    fn unresolved_role_is_a_configuration_error() {
        let mgr = ProviderManager::new();
        let err = mgr
            .resolve(ProviderRole::Scorer, ResolveOptions::default())
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Configuration(_)));
    }

    #[test]
    fn reset_clears_all_registrations() {
        let mgr = ProviderManager::new();
        mgr.set_default(ProviderRole::Target, provider("t"));
        mgr.reset();
        assert!(mgr.resolve(ProviderRole::Target, ResolveOptions::default()).is_err());
    }
}
