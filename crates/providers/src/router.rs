//! Backend router: maps each workflow step to a generation backend.
//!
//! The table is built once from `[routing]`: every step names a tier, every
//! tier names a provider and model. A tier whose provider cannot be built is
//! logged and its steps resolve to the caller-supplied backend instead. The
//! response step always resolves to the caller-supplied backend.
//!
//! After construction the router is read-only and is shared via `Arc`.

use crate::factory::{ProviderFactory, build_provider};
use loresmith_config::AppConfig;
use loresmith_core::provider::Backend;
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{info, warn};

/// A reasoning step of the query workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStep {
    Decomposition,
    Evaluation,
    Refinement,
    Answer,
    Combination,
    /// Final rendering; never routed, always the caller's backend.
    Response,
}

impl WorkflowStep {
    pub const ALL: [WorkflowStep; 6] = [
        WorkflowStep::Decomposition,
        WorkflowStep::Evaluation,
        WorkflowStep::Refinement,
        WorkflowStep::Answer,
        WorkflowStep::Combination,
        WorkflowStep::Response,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decomposition => "decomposition",
            Self::Evaluation => "evaluation",
            Self::Refinement => "refinement",
            Self::Answer => "answer",
            Self::Combination => "combination",
            Self::Response => "response",
        }
    }

    pub fn is_routed(&self) -> bool {
        !matches!(self, Self::Response)
    }
}

impl std::fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| format!("unknown workflow step '{s}'"))
    }
}

/// One row of the routing table.
#[derive(Debug, Clone)]
struct Route {
    tier: Option<String>,
    /// `None` means the step resolves to the caller's backend.
    backend: Option<Backend>,
    fallback_reason: Option<String>,
}

/// Read-only description of a route, for `loresmith routes` and the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct RouteInfo {
    pub step: WorkflowStep,
    pub tier: Option<String>,
    pub backend: String,
    pub fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Routes workflow steps to generation backends.
#[derive(Debug, Clone)]
pub struct BackendRouter {
    routes: HashMap<WorkflowStep, Route>,
    user: Backend,
}

impl BackendRouter {
    /// A router with no tiers: every step uses `user`.
    pub fn new(user: Backend) -> Self {
        Self {
            routes: HashMap::new(),
            user,
        }
    }

    /// Pin a routed step to a specific backend.
    pub fn with_route(mut self, step: WorkflowStep, backend: Backend) -> Self {
        if step.is_routed() {
            self.routes.insert(
                step,
                Route {
                    tier: None,
                    backend: Some(backend),
                    fallback_reason: None,
                },
            );
        }
        self
    }

    /// Build the routing table from configuration.
    pub fn from_config(config: &AppConfig, user: Backend) -> Self {
        Self::from_config_with(config, user, &build_provider)
    }

    /// Build the routing table with an explicit provider factory.
    pub fn from_config_with(config: &AppConfig, user: Backend, factory: &ProviderFactory) -> Self {
        // Each tier is built at most once and shared by the steps naming it.
        let mut built: HashMap<&str, Result<Backend, String>> = HashMap::new();
        let mut routes = HashMap::new();

        for step in WorkflowStep::ALL.into_iter().filter(WorkflowStep::is_routed) {
            let Some((tier, tier_cfg)) = config.routing.tier_for(step.as_str()) else {
                routes.insert(
                    step,
                    Route {
                        tier: None,
                        backend: None,
                        fallback_reason: Some("step not routed".into()),
                    },
                );
                continue;
            };

            let outcome = built.entry(tier).or_insert_with(|| {
                factory(&tier_cfg.provider, config)
                    .map(|provider| {
                        Backend::new(provider, tier_cfg.model.clone())
                            .with_temperature(tier_cfg.temperature.unwrap_or(config.default_temperature))
                            .with_max_tokens(Some(config.default_max_tokens))
                    })
                    .map_err(|e| e.to_string())
            });

            let route = match outcome {
                Ok(backend) => Route {
                    tier: Some(tier.to_string()),
                    backend: Some(backend.clone()),
                    fallback_reason: None,
                },
                Err(reason) => {
                    warn!(
                        step = %step,
                        tier = %tier,
                        provider = %tier_cfg.provider,
                        error = %reason,
                        fallback = %user.label(),
                        "Tier backend unavailable, using caller backend"
                    );
                    Route {
                        tier: Some(tier.to_string()),
                        backend: None,
                        fallback_reason: Some(reason.clone()),
                    }
                }
            };
            routes.insert(step, route);
        }

        let router = Self { routes, user };
        info!(
            fallbacks = router.fallback_count(),
            user = %router.user.label(),
            "Backend router ready"
        );
        router
    }

    /// The backend that serves `step`.
    pub fn backend_for(&self, step: WorkflowStep) -> Backend {
        self.routes
            .get(&step)
            .and_then(|r| r.backend.clone())
            .unwrap_or_else(|| self.user.clone())
    }

    /// The caller-supplied backend (response step and fallbacks).
    pub fn user_backend(&self) -> &Backend {
        &self.user
    }

    /// Same table, different caller backend. Fallback steps follow the new backend.
    pub fn with_user_backend(&self, user: Backend) -> Self {
        Self {
            routes: self.routes.clone(),
            user,
        }
    }

    /// Whether `step` ended up on the caller's backend.
    pub fn is_fallback(&self, step: WorkflowStep) -> bool {
        self.routes.get(&step).is_none_or(|r| r.backend.is_none())
    }

    fn fallback_count(&self) -> usize {
        WorkflowStep::ALL
            .into_iter()
            .filter(|s| s.is_routed() && self.is_fallback(*s))
            .count()
    }

    /// Effective routing for every step, in pipeline order.
    pub fn describe(&self) -> Vec<RouteInfo> {
        WorkflowStep::ALL
            .into_iter()
            .map(|step| {
                let route = self.routes.get(&step);
                RouteInfo {
                    step,
                    tier: route.and_then(|r| r.tier.clone()),
                    backend: self.backend_for(step).label(),
                    fallback: step.is_routed() && self.is_fallback(step),
                    reason: route.and_then(|r| r.fallback_reason.clone()),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use loresmith_core::error::ProviderError;
    use loresmith_core::message::Message;
    use loresmith_core::provider::{Provider, ProviderRequest, ProviderResponse};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NamedProvider(String);

    #[async_trait]
    impl Provider for NamedProvider {
        fn name(&self) -> &str {
            &self.0
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            Ok(ProviderResponse {
                message: Message::assistant(self.0.clone()),
                usage: None,
                model: request.model,
            })
        }
    }

    fn user() -> Backend {
        Backend::new(Arc::new(NamedProvider("user".into())), "user-model")
    }

    fn ok_factory(name: &str, _: &AppConfig) -> Result<Arc<dyn Provider>, ProviderError> {
        Ok(Arc::new(NamedProvider(name.to_string())))
    }

    #[test]
    fn step_names_round_trip() {
        for step in WorkflowStep::ALL {
            assert_eq!(step.as_str().parse::<WorkflowStep>().unwrap(), step);
        }
        assert!("planning".parse::<WorkflowStep>().is_err());
    }

    #[test]
    fn default_table_routes_steps_to_tiers() {
        let router = BackendRouter::from_config_with(&AppConfig::default(), user(), &ok_factory);

        assert_eq!(
            router.backend_for(WorkflowStep::Decomposition).label(),
            "anthropic/claude-3-5-sonnet-latest"
        );
        assert_eq!(
            router.backend_for(WorkflowStep::Evaluation).label(),
            "anthropic/claude-3-5-haiku-latest"
        );
        assert_eq!(router.backend_for(WorkflowStep::Refinement).provider_name(), "deepseek");
        assert_eq!(router.backend_for(WorkflowStep::Answer).label(), "openai/gpt-4o-mini");
        assert!(!router.is_fallback(WorkflowStep::Combination));
    }

    #[test]
    fn response_always_uses_caller_backend() {
        let router = BackendRouter::from_config_with(&AppConfig::default(), user(), &ok_factory);
        assert_eq!(router.backend_for(WorkflowStep::Response).label(), "user/user-model");

        let pinned = BackendRouter::new(user()).with_route(
            WorkflowStep::Response,
            Backend::new(Arc::new(NamedProvider("other".into())), "x"),
        );
        assert_eq!(pinned.backend_for(WorkflowStep::Response).label(), "user/user-model");
    }

    #[test]
    fn construction_failure_falls_back_to_caller() {
        let factory = |name: &str, _: &AppConfig| -> Result<Arc<dyn Provider>, ProviderError> {
            if name == "anthropic" {
                Err(ProviderError::NotConfigured("no key".into()))
            } else {
                Ok(Arc::new(NamedProvider(name.to_string())))
            }
        };
        let router = BackendRouter::from_config_with(&AppConfig::default(), user(), &factory);

        assert_eq!(router.backend_for(WorkflowStep::Decomposition).label(), "user/user-model");
        assert_eq!(router.backend_for(WorkflowStep::Evaluation).label(), "user/user-model");
        assert!(router.is_fallback(WorkflowStep::Combination));
        assert_eq!(router.backend_for(WorkflowStep::Answer).label(), "openai/gpt-4o-mini");

        let info = router.describe();
        let decomposition = info.iter().find(|r| r.step == WorkflowStep::Decomposition).unwrap();
        assert!(decomposition.fallback);
        assert!(decomposition.reason.as_deref().unwrap().contains("no key"));
    }

    #[test]
    fn tiers_are_built_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let factory = move |name: &str, _: &AppConfig| -> Result<Arc<dyn Provider>, ProviderError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NamedProvider(name.to_string())))
        };
        BackendRouter::from_config_with(&AppConfig::default(), user(), &factory);
        // Four tiers serve five steps.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn swapping_user_backend_moves_fallback_steps() {
        let fail_all = |_: &str, _: &AppConfig| -> Result<Arc<dyn Provider>, ProviderError> {
            Err(ProviderError::NotConfigured("offline".into()))
        };
        let router = BackendRouter::from_config_with(&AppConfig::default(), user(), &fail_all);
        let other = Backend::new(Arc::new(NamedProvider("other".into())), "m");
        let swapped = router.with_user_backend(other);

        assert_eq!(swapped.backend_for(WorkflowStep::Answer).label(), "other/m");
        assert_eq!(router.backend_for(WorkflowStep::Answer).label(), "user/user-model");
    }

    #[test]
    fn unrouted_step_uses_caller_backend() {
        let mut config = AppConfig::default();
        config.routing.steps.remove("refinement");
        let router = BackendRouter::from_config_with(&config, user(), &ok_factory);
        assert!(router.is_fallback(WorkflowStep::Refinement));
        assert_eq!(router.backend_for(WorkflowStep::Refinement).label(), "user/user-model");
    }

    #[test]
    fn with_route_pins_step() {
        let router = BackendRouter::new(user()).with_route(
            WorkflowStep::Answer,
            Backend::new(Arc::new(NamedProvider("pinned".into())), "p"),
        );
        assert_eq!(router.backend_for(WorkflowStep::Answer).label(), "pinned/p");
        assert_eq!(router.backend_for(WorkflowStep::Evaluation).label(), "user/user-model");
    }
}
