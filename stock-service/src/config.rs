use anyhow::Context;
use std::env;
use std::net::{IpAddr, SocketAddr};

/// Admin UI dev servers allowed when `ALLOWED_ORIGINS` is unset.
pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:3001",
    "http://localhost:5173",
];

pub const DEFAULT_LOW_STOCK_TOPIC: &str = "inventory.low_stock";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: IpAddr,
    pub port: u16,
    /// `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub allowed_origins: Vec<String>,
    pub event_buffer_capacity: usize,
    pub low_stock_topic: String,
    pub kafka_bootstrap: Option<String>,
    pub json_logs: bool,
}

impl ServiceConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let host: IpAddr = get("HOST")
            .unwrap_or_else(|| "0.0.0.0".to_string())
            .parse()
            .context("HOST must be an IP address")?;
        let port: u16 = match get("PORT") {
            Some(v) => v.parse().with_context(|| format!("PORT must be a port number, got {v}"))?,
            None => 8087,
        };
        let db_max_connections: u32 = match get("DB_MAX_CONNECTIONS") {
            Some(v) => v.parse().context("DB_MAX_CONNECTIONS must be a positive integer")?,
            None => 10,
        };
        let event_buffer_capacity: usize = match get("EVENT_BUFFER_CAPACITY") {
            Some(v) => v.parse().context("EVENT_BUFFER_CAPACITY must be a positive integer")?,
            None => 1024,
        };
        let allowed_origins = match get("ALLOWED_ORIGINS") {
            Some(list) => list.split(',').map(str::trim).filter(|o| !o.is_empty()).map(String::from).collect(),
            None => DEFAULT_ALLOWED_ORIGINS.iter().map(|o| o.to_string()).collect(),
        };

        Ok(Self {
            host,
            port,
            database_url: get("DATABASE_URL"),
            db_max_connections,
            allowed_origins,
            event_buffer_capacity,
            low_stock_topic: get("LOW_STOCK_TOPIC").unwrap_or_else(|| DEFAULT_LOW_STOCK_TOPIC.to_string()),
            kafka_bootstrap: get("KAFKA_BOOTSTRAP"),
            json_logs: get("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
        })
    }

    pub fn bind_addr(&self) -> SocketAddr { SocketAddr::from((self.host, self.port)) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> anyhow::Result<ServiceConfig> {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ServiceConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.bind_addr().to_string(), "0.0.0.0:8087");
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.allowed_origins.len(), 3);
        assert_eq!(cfg.low_stock_topic, "inventory.low_stock");
        assert_eq!(cfg.event_buffer_capacity, 1024);
        assert!(!cfg.json_logs);
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = config(&[
            ("PORT", "9000"),
            ("DATABASE_URL", "postgres://localhost/stock"),
            ("ALLOWED_ORIGINS", "https://admin.example.com, ,https://ops.example.com"),
            ("LOG_FORMAT", "JSON"),
            ("KAFKA_BOOTSTRAP", "  "),
        ])
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/stock"));
        assert_eq!(cfg.allowed_origins, vec!["https://admin.example.com", "https://ops.example.com"]);
        assert!(cfg.json_logs);
        assert!(cfg.kafka_bootstrap.is_none());
    }

    #[test]
    fn invalid_port_is_an_error() {
        let err = config(&[("PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }
}
