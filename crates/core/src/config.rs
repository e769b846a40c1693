use serde::{Deserialize, Serialize};

/// # Summary
/// 全局应用配置，由 `klineflow-app` 通过 `config` crate 加载
/// （config.toml 叠加 `KLINEFLOW_` 前缀的环境变量），本结构体只负责承载与提供默认值。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub cache: CacheConfig,
    pub stream: StreamConfig,
    pub health: HealthConfig,
    pub backfill: BackfillConfig,
    pub upstream: UpstreamConfig,
    pub database: DatabaseConfig,
    // 受监控的交易对列表
    pub monitored_symbols: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    // 每个分区键的缓存环形容量
    pub max_memory_candles: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub reconnect_interval_ms: u64,
    pub max_reconnect_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    pub health_check_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillConfig {
    pub max_candles_per_request: u32,
    pub request_delay_ms: u64,
    pub batch_size: usize,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub spot_ws_base_url: String,
    pub spot_rest_base_url: String,
    pub futures_ws_base_url: String,
    pub futures_rest_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub data_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig {
                max_memory_candles: 200,
            },
            stream: StreamConfig {
                reconnect_interval_ms: 5000,
                max_reconnect_attempts: 5,
            },
            health: HealthConfig {
                health_check_interval_ms: 60_000,
            },
            backfill: BackfillConfig {
                max_candles_per_request: 1500,
                request_delay_ms: 200,
                batch_size: 500,
                max_retries: 3,
            },
            upstream: UpstreamConfig {
                spot_ws_base_url: "wss://stream.binance.com:9443".to_string(),
                spot_rest_base_url: "https://api.binance.com".to_string(),
                futures_ws_base_url: "wss://fstream.binance.com".to_string(),
                futures_rest_base_url: "https://fapi.binance.com".to_string(),
            },
            database: DatabaseConfig {
                data_dir: "data".to_string(),
            },
            monitored_symbols: vec![
                "BTCUSDT".to_string(),
                "ETHUSDT".to_string(),
                "BNBUSDT".to_string(),
                "SOLUSDT".to_string(),
                "XRPUSDT".to_string(),
                "ADAUSDT".to_string(),
                "DOGEUSDT".to_string(),
                "AVAXUSDT".to_string(),
                "LINKUSDT".to_string(),
                "DOTUSDT".to_string(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.cache.max_memory_candles, 200);
        assert_eq!(config.stream.reconnect_interval_ms, 5000);
        assert_eq!(config.stream.max_reconnect_attempts, 5);
        assert_eq!(config.health.health_check_interval_ms, 60_000);
        assert_eq!(config.backfill.max_candles_per_request, 1500);
        assert_eq!(config.backfill.request_delay_ms, 200);
        assert_eq!(config.backfill.batch_size, 500);
        assert_eq!(config.backfill.max_retries, 3);
        assert_eq!(config.monitored_symbols.len(), 10);
        assert_eq!(config.database.data_dir, "data");
    }
}
