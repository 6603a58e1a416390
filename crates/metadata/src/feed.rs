use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::MetadataError;
use crate::stream::StreamConfig;

/// A market-data feed the connector attaches to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub name: String,
    pub display_name: Option<String>,
    /// WebSocket endpoint (ws:// or wss://)
    pub endpoint: String,
    /// Credential source, e.g. "env:RTX_TOKEN". None connects anonymously.
    #[serde(default)]
    pub credential: Option<String>,
    /// Channels subscribed on startup
    #[serde(default)]
    pub channels: Vec<String>,
    /// Symbols delivered first in each batch
    #[serde(default)]
    pub priority_symbols: Vec<String>,
    #[serde(default)]
    pub stream: StreamConfig,
}

impl Feed {
    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let content = std::fs::read_to_string(path)?;
        let feed: Feed = serde_yaml::from_str(&content)?;
        feed.validate()?;
        Ok(feed)
    }

    /// Reject configurations the connector cannot run with
    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.name.trim().is_empty() {
            return Err(MetadataError::Validation("feed name is empty".to_string()));
        }
        if !(self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://")) {
            return Err(MetadataError::Validation(format!(
                "endpoint must be ws:// or wss://, got: {}",
                self.endpoint
            )));
        }
        if let Some(channel) = self.channels.iter().find(|c| c.trim().is_empty()) {
            return Err(MetadataError::Validation(format!(
                "empty channel name in channels: {:?}",
                channel
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_feed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
name: rtx
display_name: RTX price stream
endpoint: wss://prices.example.com/ws
credential: env:RTX_TOKEN
channels:
  - account
  - orders
priority_symbols: [EURUSD, GBPUSD]
stream:
  flush_interval_ms: 50
  reconnect_cap_ms: 8000
"#
        )
        .unwrap();

        let feed = Feed::load(file.path()).unwrap();
        assert_eq!(feed.name, "rtx");
        assert_eq!(feed.credential.as_deref(), Some("env:RTX_TOKEN"));
        assert_eq!(feed.channels, vec!["account", "orders"]);
        assert_eq!(feed.priority_symbols, vec!["EURUSD", "GBPUSD"]);
        assert_eq!(feed.stream.flush_interval_ms, 50);
        assert_eq!(feed.stream.reconnect_cap_ms, 8000);
        assert_eq!(feed.stream.reconnect_base_ms, 1000);
    }

    #[test]
    fn test_load_minimal_feed_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name: rtx\nendpoint: ws://localhost:7999/ws").unwrap();

        let feed = Feed::load(file.path()).unwrap();
        assert!(feed.credential.is_none());
        assert!(feed.channels.is_empty());
        assert_eq!(feed.stream, StreamConfig::default());
    }

    #[test]
    fn test_rejects_http_endpoint() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name: rtx\nendpoint: https://prices.example.com").unwrap();

        match Feed::load(file.path()) {
            Err(MetadataError::Validation(msg)) => assert!(msg.contains("ws://")),
            other => panic!("Expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_empty_channel() {
        let feed = Feed {
            name: "rtx".to_string(),
            display_name: None,
            endpoint: "ws://localhost/ws".to_string(),
            credential: None,
            channels: vec!["account".to_string(), " ".to_string()],
            priority_symbols: Vec::new(),
            stream: StreamConfig::default(),
        };
        assert!(feed.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let result = Feed::load(Path::new("/nonexistent/feed.yaml"));
        assert!(matches!(result, Err(MetadataError::Io(_))));
    }
}
