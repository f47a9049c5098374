use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_players")]
    pub max_players: u32,
    #[serde(default = "default_motd")]
    pub motd: String,
    /// Version tag fed to the resolver at startup. Booting with a tag the
    /// support table does not know is a hard error.
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: i32,
    #[serde(default)]
    pub chat_guard: ChatGuardConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatGuardConfig {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    #[serde(default = "default_mute_secs")]
    pub mute_secs: u64,
}

fn default_bind() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    25565
}

fn default_max_players() -> u32 {
    20
}

fn default_motd() -> String {
    "A Spyglass Server".into()
}

fn default_version() -> String {
    "1.12.2".into()
}

fn default_compression_threshold() -> i32 {
    256
}

fn default_window_secs() -> u64 {
    10
}

fn default_max_messages() -> usize {
    4
}

fn default_mute_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            max_players: default_max_players(),
            motd: default_motd(),
            version: default_version(),
            compression_threshold: default_compression_threshold(),
            chat_guard: ChatGuardConfig::default(),
        }
    }
}

impl Default for ChatGuardConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_messages: default_max_messages(),
            mute_secs: default_mute_secs(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: ServerConfig = toml::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::info!("No config file found at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.port, 25565);
        assert_eq!(config.version, "1.12.2");
        assert_eq!(config.chat_guard.max_messages, 4);
    }

    #[test]
    fn test_partial_override() {
        let config: ServerConfig = toml::from_str(
            r#"
            version = "1.8.9"

            [chat_guard]
            max_messages = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.version, "1.8.9");
        assert_eq!(config.chat_guard.max_messages, 2);
        assert_eq!(config.chat_guard.window_secs, 10);
    }
}
