//! `loresmith doctor`: Diagnose configuration, corpus and backends.

use std::collections::BTreeSet;

use loresmith_config::AppConfig;
use loresmith_core::retrieval::Retriever;
use loresmith_providers::{BackendRouter, WorkflowStep, build_user_backend, is_local};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Ok,
    Warn,
    Fail,
}

#[derive(Debug)]
struct Check {
    level: Level,
    message: String,
}

impl Check {
    fn ok(message: impl Into<String>) -> Self {
        Self { level: Level::Ok, message: message.into() }
    }
    fn warn(message: impl Into<String>) -> Self {
        Self { level: Level::Warn, message: message.into() }
    }
    fn fail(message: impl Into<String>) -> Self {
        Self { level: Level::Fail, message: message.into() }
    }

    fn print(&self) {
        let icon = match self.level {
            Level::Ok => "✅",
            Level::Warn => "⚠️ ",
            Level::Fail => "❌",
        };
        println!("  {icon} {}", self.message);
    }
}

pub async fn run(offline: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 Loresmith Doctor — System Diagnostics");
    println!("========================================\n");

    let mut checks = Vec::new();

    let config_path = AppConfig::config_dir().join("config.toml");
    if !config_path.exists() {
        checks.push(Check::warn("No config file, using defaults (run `loresmith init`)"));
    }

    match AppConfig::load() {
        Ok(config) => {
            checks.push(Check::ok("Config valid"));
            checks.extend(key_checks(&config));
            checks.push(corpus_check(&config).await);
            checks.push(Check::ok(format!(
                "History backend: {} ({})",
                config.history.backend,
                if config.history.backend == "file" {
                    config.history_dir().display().to_string()
                } else {
                    "not persisted".to_string()
                }
            )));
            if !offline {
                checks.extend(health_checks(&config).await);
            }
        }
        Err(e) => checks.push(Check::fail(format!("Config invalid: {e}"))),
    }

    for check in &checks {
        check.print();
    }

    let issues = checks.iter().filter(|c| c.level != Level::Ok).count();
    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}

/// Keys for the user backend and every configured tier.
fn key_checks(config: &AppConfig) -> Vec<Check> {
    let mut providers = BTreeSet::from([config.default_provider.clone()]);
    for step in WorkflowStep::ALL.iter().filter(|s| s.is_routed()) {
        if let Some((_, tier)) = config.routing.tier_for(step.as_str()) {
            providers.insert(tier.provider.clone());
        }
    }

    providers
        .into_iter()
        .map(|name| {
            if config.api_key_for(&name).is_some() {
                Check::ok(format!("API key for {name}"))
            } else if is_local(&name) {
                Check::ok(format!("{name} is local, no key needed"))
            } else if name == config.default_provider {
                Check::fail(format!("No API key for {name} (the user backend)"))
            } else {
                Check::warn(format!("No API key for {name}; its steps fall back to the user backend"))
            }
        })
        .collect()
}

async fn corpus_check(config: &AppConfig) -> Check {
    if config.retrieval.backend == "none" {
        return Check::warn("Retrieval disabled; answers will have no supporting documents");
    }

    match loresmith_memory::build_retriever(config) {
        Ok(retriever) => match retriever.len().await {
            Ok(0) => Check::warn("Corpus is empty (set retrieval.corpus_path or LORESMITH_CORPUS)"),
            Ok(n) => Check::ok(format!("Corpus loaded: {n} passages")),
            Err(e) => Check::fail(format!("Corpus unreadable: {e}")),
        },
        Err(e) => Check::fail(format!("Corpus failed to load: {e}")),
    }
}

/// One health probe per distinct backend.
async fn health_checks(config: &AppConfig) -> Vec<Check> {
    let user = match build_user_backend(config, None, None) {
        Ok(user) => user,
        Err(e) => return vec![Check::fail(format!("User backend unavailable: {e}"))],
    };
    let router = BackendRouter::from_config(config, user);

    let mut seen = BTreeSet::new();
    let mut checks = Vec::new();
    for step in WorkflowStep::ALL {
        let backend = router.backend_for(step);
        let label = backend.label();
        if !seen.insert(label.clone()) {
            continue;
        }
        checks.push(match backend.health_check().await {
            Ok(true) => Check::ok(format!("{label} reachable")),
            Ok(false) => Check::warn(format!("{label} did not respond as expected")),
            Err(e) => Check::fail(format!("{label} unreachable: {e}")),
        });
    }
    checks
}
