use anyhow::{anyhow, Result};

#[derive(Debug, Clone)]
pub(crate) struct AppConfig {
    pub(crate) api: ApiConfig,
    pub(crate) engine: EngineConfig,
}

#[derive(Debug, Clone)]
pub(crate) struct ApiConfig {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) cors_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct EngineConfig {
    pub(crate) ingress_queue_cap: usize,
    pub(crate) match_interval_ms: u64,
    pub(crate) trade_price: TradePrice,
}

/// Which side's limit price a trade executes at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TradePrice {
    Sell,
    Buy,
}

pub(crate) fn load_config() -> Result<AppConfig> {
    let trade_price = match env_string("MATCH_TRADE_PRICE", "sell").to_lowercase().as_str() {
        "sell" => TradePrice::Sell,
        "buy" => TradePrice::Buy,
        other => return Err(anyhow!("MATCH_TRADE_PRICE must be \"sell\" or \"buy\", got {other:?}")),
    };
    let cfg = AppConfig {
        api: ApiConfig {
            host: env_string("API_HOST", "0.0.0.0"),
            port: env_u16("API_PORT", 3000),
            cors_origins: env_list("CORS_ORIGINS", &["*"]),
        },
        engine: EngineConfig {
            ingress_queue_cap: env_usize("INGRESS_QUEUE_CAP", 4096),
            match_interval_ms: env_u64("MATCH_INTERVAL_MS", 50),
            trade_price,
        },
    };
    if cfg.engine.ingress_queue_cap == 0 {
        return Err(anyhow!("INGRESS_QUEUE_CAP must be positive"));
    }
    if cfg.engine.match_interval_ms == 0 {
        return Err(anyhow!("MATCH_INTERVAL_MS must be positive"));
    }
    Ok(cfg)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(v) => parse_list_value(&v)
            .unwrap_or_else(|| default.iter().map(|s| (*s).to_string()).collect()),
        Err(_) => default.iter().map(|s| (*s).to_string()).collect(),
    }
}

fn parse_list_value(raw: &str) -> Option<Vec<String>> {
    if let Ok(v) = serde_json::from_str::<Vec<String>>(raw) {
        return Some(v.into_iter().filter(|s| !s.trim().is_empty()).collect());
    }
    let parts: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().trim_matches('"').to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts)
    }
}
