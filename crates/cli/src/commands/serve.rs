//! `loresmith serve`: Start the HTTP gateway.

use loresmith_config::AppConfig;

pub async fn run(host: Option<String>, port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(host) = host {
        config.gateway.host = host;
    }
    if let Some(port) = port {
        config.gateway.port = port;
    }

    println!("📚 Loresmith Gateway");
    println!("   Listening: http://{}:{}", config.gateway.host, config.gateway.port);
    println!("   Backend:   {}/{}", config.default_provider, config.default_model);
    println!("   Retrieval: {}", config.retrieval.backend);

    loresmith_gateway::start(config).await?;

    Ok(())
}
