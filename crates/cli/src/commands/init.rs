//! `loresmith init`: Write the default configuration.

use std::path::Path;

use loresmith_config::AppConfig;

pub async fn run(force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();

    println!("📚 Loresmith — Setup");
    println!("====================\n");

    let written = write_default_config(&config_dir, force)?;
    let config_path = config_dir.join("config.toml");

    if written {
        println!("✅ Created config.toml at: {}", config_path.display());
        println!("\n📝 Next steps:");
        println!("   1. Set retrieval.corpus_path to a .txt, .md or .jsonl corpus");
        println!("   2. Add an API key, or set default_provider = \"ollama\"");
        println!("   3. Run: loresmith doctor");
        println!("   4. Run: loresmith ask \"your question\"\n");
    } else {
        println!("⚠️  Config already exists at: {}", config_path.display());
        println!("   Re-run with --force to overwrite it.\n");
    }

    Ok(())
}

/// Write `config.toml` under `dir`. Returns `false` when a file exists and
/// `force` is off.
fn write_default_config(dir: &Path, force: bool) -> std::io::Result<bool> {
    let path = dir.join("config.toml");
    if path.exists() && !force {
        return Ok(false);
    }
    std::fs::create_dir_all(dir)?;
    std::fs::write(&path, AppConfig::default_toml())?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("loresmith");

        assert!(write_default_config(&nested, false).unwrap());
        let config = AppConfig::load_from(&nested.join("config.toml")).unwrap();
        assert_eq!(config.retrieval.top_k, AppConfig::default().retrieval.top_k);
    }

    #[test]
    fn keeps_existing_file_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "default_model = \"mine\"\n").unwrap();

        assert!(!write_default_config(dir.path(), false).unwrap());
        assert!(std::fs::read_to_string(&path).unwrap().contains("mine"));

        assert!(write_default_config(dir.path(), true).unwrap());
        assert!(!std::fs::read_to_string(&path).unwrap().contains("mine"));
    }
}
