//! `loresmith routes`: Show which backend serves each workflow step.

use loresmith_config::AppConfig;
use loresmith_providers::{BackendRouter, RouteInfo, build_user_backend};

pub async fn run(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let user = build_user_backend(&config, None, None)?;
    let router = BackendRouter::from_config(&config, user);
    let routes = router.describe();

    if json {
        println!("{}", serde_json::to_string_pretty(&routes)?);
        return Ok(());
    }

    println!("🧭 Backend Routes");
    println!("─────────────────────────────────────────────────────────────");
    for line in render_table(&routes) {
        println!("{line}");
    }

    Ok(())
}

fn render_table(routes: &[RouteInfo]) -> Vec<String> {
    let mut lines = vec![format!("{:<16} {:<10} {:<36} {}", "Step", "Tier", "Backend", "Note")];
    for route in routes {
        let note = match (&route.reason, route.fallback) {
            (Some(reason), _) => format!("fallback: {reason}"),
            (None, true) => "fallback".to_string(),
            (None, false) => String::new(),
        };
        lines.push(format!(
            "{:<16} {:<10} {:<36} {}",
            route.step.as_str(),
            route.tier.as_deref().unwrap_or("-"),
            route.backend,
            note
        ));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use loresmith_providers::WorkflowStep;

    #[test]
    fn table_marks_fallback_routes() {
        let routes = vec![
            RouteInfo {
                step: WorkflowStep::Decomposition,
                tier: Some("fast".into()),
                backend: "openai/gpt-4o-mini".into(),
                fallback: false,
                reason: None,
            },
            RouteInfo {
                step: WorkflowStep::Combination,
                tier: Some("strong".into()),
                backend: "ollama/llama3".into(),
                fallback: true,
                reason: Some("no API key for provider 'anthropic'".into()),
            },
        ];

        let lines = render_table(&routes);
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("decomposition"));
        assert!(lines[1].trim_end().ends_with("openai/gpt-4o-mini"));
        assert!(lines[2].contains("fallback: no API key"));
    }
}
