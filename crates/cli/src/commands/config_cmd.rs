//! `kbchat config`: print the effective configuration.

use kbchat_config::AppConfig;

pub fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{}", render(&config)?);
    Ok(())
}

fn render(config: &AppConfig) -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(&config.redacted())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_config_has_no_secrets() {
        let mut config = AppConfig::default();
        config.provider.api_key = Some("sk-ant-secret".into());
        let rendered = render(&config).unwrap();
        assert!(!rendered.contains("sk-ant-secret"));
        assert!(rendered.contains("[gateway]"));
    }
}
