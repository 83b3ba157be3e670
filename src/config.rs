use crate::model::AppConfig;
use anyhow::Context;
use std::fs;
use std::path::Path;

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if !path.exists() {
        tracing::info!("Config file not found, creating default.");
        let defaults = get_default_config();
        save_config(path, &defaults)?;
        return Ok(defaults);
    }

    let content = fs::read_to_string(path).context("Failed to read config file")?;
    serde_json::from_str::<AppConfig>(&content).context("Failed to parse config file")
}

pub fn save_config(path: &Path, config: &AppConfig) -> anyhow::Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    let tmp_file = path.with_extension("json.tmp");
    fs::write(&tmp_file, content).context("Failed to write temp config file")?;
    fs::rename(&tmp_file, path).context("Failed to replace config file")?;
    Ok(())
}

fn get_default_config() -> AppConfig {
    AppConfig {
        endpoints: vec![
            "https://www.google.com".to_string(),
            "https://api.github.com".to_string(),
        ],
        ..Default::default()
    }
}
