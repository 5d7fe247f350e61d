use serde::Deserialize;

/// TOML config for the intercept server.
#[derive(Debug, Deserialize, Clone)]
pub struct InterceptConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upstream server, host:port
    pub upstream: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Zone file with override records
    #[serde(default)]
    pub zone_file: Option<String>,
    /// Inline override records in zone format
    #[serde(default)]
    pub records: Vec<String>,
    /// Globs always forwarded upstream
    #[serde(default)]
    pub skip: Vec<String>,
    /// Globs answered with NXDOMAIN
    #[serde(default)]
    pub nxdomain: Vec<String>,
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    5053
}
fn default_timeout_ms() -> u64 {
    2000
}

impl InterceptConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path, e))?;
        let config: InterceptConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config '{}': {}", path, e))?;
        Ok(config)
    }

    /// The override zone: file contents (if any) followed by inline records.
    pub fn zone_text(&self) -> anyhow::Result<String> {
        let mut text = String::new();
        if let Some(path) = &self.zone_file {
            text.push_str(&std::fs::read_to_string(path).map_err(|e| {
                anyhow::anyhow!("Failed to read zone file '{}': {}", path, e)
            })?);
            text.push('\n');
        }
        for record in &self.records {
            text.push_str(record);
            text.push('\n');
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let config: InterceptConfig = toml::from_str("upstream = \"8.8.8.8:53\"\n").unwrap();
        assert_eq!(config.address, "127.0.0.1");
        assert_eq!(config.port, 5053);
        assert_eq!(config.timeout_ms, 2000);
        assert!(config.records.is_empty());
    }

    #[test]
    fn parse_full_config() {
        let text = r#"
address = "0.0.0.0"
port = 53
upstream = "1.1.1.1:53"
timeout_ms = 500
records = ["local.dev. 60 IN A 127.0.0.1"]
skip = ["*.corp.example.com"]
nxdomain = ["*.ads.example.com"]
"#;
        let config: InterceptConfig = toml::from_str(text).unwrap();
        assert_eq!(config.port, 53);
        assert_eq!(config.records.len(), 1);
        assert_eq!(config.zone_text().unwrap(), "local.dev. 60 IN A 127.0.0.1\n");
        assert_eq!(config.skip, vec!["*.corp.example.com"]);
    }
}
