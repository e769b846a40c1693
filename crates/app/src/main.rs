use std::collections::HashMap;
use std::sync::Arc;

use klineflow_aggregator::Aggregator;
use klineflow_backfill::{BackfillEngine, BinanceRestProvider};
use klineflow_cache::InMemoryCandleCache;
use klineflow_core::backfill::port::{BackfillRunner, KlineRestProvider};
use klineflow_core::cache::port::CandleCache;
use klineflow_core::common::{CandleKey, Market};
use klineflow_core::config::AppConfig;
use klineflow_core::event::entity::{Event, EventPayload};
use klineflow_core::event::port::EventBus;
use klineflow_core::store::port::CandleStore;
use klineflow_core::stream::port::StreamTransport;
use klineflow_eventbus::InMemoryEventBus;
use klineflow_health::HealthMonitor;
use klineflow_store::SqliteCandleStore;
use klineflow_stream::WsTransport;
use tracing::info;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// # Summary
/// 应用启动入口，纯粹的 DI 容器。
/// 负责实例化所有具体实现组件并通过 `Arc<dyn Trait>` 注入到 Aggregator/BackfillEngine/HealthMonitor。
///
/// # Logic
/// 1. 初始化双路日志（控制台 + 每日滚动文件）。
/// 2. 加载配置（`config.toml` 叠加 `KLINEFLOW_` 前缀环境变量，缺省回退默认值）。
/// 3. 实例化基础设施层：CandleStore、EventBus、CandleCache、每市场一条的 WsTransport/REST Provider。
/// 4. 实例化 BackfillEngine、Aggregator、HealthMonitor，按 `monitored_symbols` 完成启动期订阅。
/// 5. 挂起等待外部信号，收到后执行优雅关闭。
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let file_appender = tracing_appender::rolling::daily("logs", "klineflow.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let filter = std::env::var("KLINEFLOW_LOG")
        .ok()
        .and_then(|v| tracing_subscriber::EnvFilter::try_new(v).ok())
        .unwrap_or_else(|| {
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
        });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(
            std::io::stdout
                .with_max_level(tracing::Level::INFO)
                .and(non_blocking.with_max_level(tracing::Level::DEBUG)),
        )
        .with_ansi(true)
        .init();

    info!("klineflow starting...");

    let config_file_path = std::path::Path::new("config.toml");
    let mut builder = config::Config::builder();
    if config_file_path.exists() {
        builder = builder.add_source(config::File::from(config_file_path).required(true));
    } else if std::path::Path::new("config").exists() {
        builder = builder.add_source(config::File::with_name("config").required(true));
    }
    builder = builder.add_source(config::Environment::with_prefix("KLINEFLOW").separator("_"));
    let config_val = builder.build()?;

    let app_config: AppConfig = if config_file_path.exists()
        || std::path::Path::new("config").exists()
        || std::env::var("KLINEFLOW_DATABASE_DATA_DIR").is_ok()
    {
        config_val.try_deserialize()?
    } else {
        AppConfig::default()
    };

    info!(?app_config, "configuration loaded");

    let data_dir = std::path::PathBuf::from(&app_config.database.data_dir);
    let store: Arc<dyn CandleStore> = Arc::new(SqliteCandleStore::new(&data_dir).await?);
    let event_bus: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::new("klineflow"));
    let cache: Arc<dyn CandleCache> =
        Arc::new(InMemoryCandleCache::new(app_config.cache.max_memory_candles));

    let ws_spot = WsTransport::new(
        Market::Spot,
        app_config.upstream.spot_ws_base_url.clone(),
        app_config.stream.reconnect_interval_ms,
        app_config.stream.max_reconnect_attempts,
    );
    let ws_futures = WsTransport::new(
        Market::Futures,
        app_config.upstream.futures_ws_base_url.clone(),
        app_config.stream.reconnect_interval_ms,
        app_config.stream.max_reconnect_attempts,
    );
    spawn_lifecycle_relay(ws_spot.clone(), Market::Spot, event_bus.clone());
    spawn_lifecycle_relay(ws_futures.clone(), Market::Futures, event_bus.clone());

    let mut transports: HashMap<Market, Arc<dyn StreamTransport>> = HashMap::new();
    transports.insert(Market::Spot, ws_spot as Arc<dyn StreamTransport>);
    transports.insert(Market::Futures, ws_futures as Arc<dyn StreamTransport>);

    let mut rest_providers: HashMap<Market, Arc<dyn KlineRestProvider>> = HashMap::new();
    rest_providers.insert(
        Market::Spot,
        Arc::new(BinanceRestProvider::new(app_config.upstream.spot_rest_base_url.clone())),
    );
    rest_providers.insert(
        Market::Futures,
        Arc::new(BinanceRestProvider::new(
            app_config.upstream.futures_rest_base_url.clone(),
        )),
    );

    let backfill: Arc<dyn BackfillRunner> = Arc::new(BackfillEngine::new(
        "klineflow",
        store.clone(),
        event_bus.clone(),
        rest_providers,
        app_config.backfill.max_candles_per_request,
        app_config.backfill.request_delay_ms,
        app_config.backfill.batch_size,
        app_config.backfill.max_retries,
    ));

    let aggregator = Aggregator::new(
        "klineflow",
        cache,
        store.clone(),
        event_bus.clone(),
        backfill,
        transports,
        app_config.cache.max_memory_candles,
    );

    let startup_keys: Vec<CandleKey> = app_config
        .monitored_symbols
        .iter()
        .map(|symbol| CandleKey::new(symbol.clone(), Market::Spot))
        .collect();
    aggregator.on_startup(startup_keys).await;
    info!("aggregator subscribed to configured symbols");

    let health_monitor = HealthMonitor::new(
        "klineflow",
        aggregator.clone(),
        store,
        event_bus,
        app_config.health.health_check_interval_ms,
    );
    let health_handle = health_monitor.spawn();

    info!("klineflow is fully running, waiting for shutdown signal...");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, shutting down gracefully...");

    health_handle.abort();
    aggregator.shutdown().await;

    info!("klineflow stopped");
    Ok(())
}

/// 将某条物理连接的生命周期事件（重连失败）中继到 EventBus 上的 `reconnect-failed` 主题
fn spawn_lifecycle_relay(
    transport: Arc<WsTransport>,
    market: Market,
    event_bus: Arc<dyn EventBus>,
) {
    let mut lifecycle_rx = transport.lifecycle();
    tokio::spawn(async move {
        while let Ok(event) = lifecycle_rx.recv().await {
            if let klineflow_stream::LifecycleEvent::ReconnectFailed { stream_name } = event {
                let Some(symbol) = stream_name.split('@').next() else {
                    continue;
                };
                event_bus.publish(Event::new(
                    "klineflow",
                    EventPayload::ReconnectFailed {
                        key: CandleKey::new(symbol.to_uppercase(), market),
                    },
                ));
            }
        }
    });
}
