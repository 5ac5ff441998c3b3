use clap::Parser;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use kama_chat::api::{self, AppState};
use kama_chat::bus::{self, BusConsumer, Ingestor, MessageBus};
use kama_chat::cache::{MemoryCache, RecentCache, RedisCache};
use kama_chat::config::{BusMode, CacheMode, Settings};
use kama_chat::dispatch::Dispatcher;
use kama_chat::error::AppError;
use kama_chat::hub::Hub;
use kama_chat::service::HistoryService;
use kama_chat::store::{MessageStore, PgMessageStore};
use kama_chat::tasks::spawn_repair_worker;
use kama_chat::ws::WsServer;

/// 命令行参数 / Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "kama-chat WebSocket & HTTP Server", long_about = None)]
struct Args {
    /// 配置文件路径 / Config file path
    #[arg(short = 'c', long = "config", default_value = "config/default")]
    config: String,
}

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let settings = Settings::load(Some(&args.config))?;
    info!(
        "🚀 kama-chat 启动 ws={}:{} http={}:{} / starting",
        settings.server.host, settings.server.ws_port, settings.server.host, settings.server.http_port
    );

    let hub = Arc::new(Hub::new());

    let store: Arc<dyn MessageStore> = {
        let pg = PgMessageStore::connect(&settings.database.url, settings.database.max_connections)
            .await?;
        pg.migrate().await?;
        Arc::new(pg)
    };

    let cache: Arc<dyn RecentCache> = match settings.cache.mode {
        CacheMode::Memory => Arc::new(MemoryCache::new(settings.cache.message_list_len)),
        CacheMode::Redis => Arc::new(
            RedisCache::connect(
                &settings.cache.url,
                settings.cache.message_list_len,
                settings.cache.ttl(),
            )
            .await?,
        ),
    };

    let (bus, consumer): (Arc<dyn MessageBus>, Box<dyn BusConsumer>) = match settings.bus.mode {
        BusMode::Channel => {
            let (bus, consumer) = bus::in_process(settings.bus.channel_size);
            (Arc::new(bus), Box::new(consumer))
        }
        #[cfg(feature = "kafka")]
        BusMode::Kafka => {
            let bus = bus::KafkaBus::new(&settings.bus.kafka_brokers, &settings.bus.kafka_topic)?;
            let consumer = bus::KafkaConsumer::new(
                &settings.bus.kafka_brokers,
                &settings.bus.kafka_topic,
                &settings.bus.kafka_group_id,
            )?;
            (Arc::new(bus), Box::new(consumer))
        }
        #[cfg(not(feature = "kafka"))]
        BusMode::Kafka => {
            return Err(AppError::Internal(anyhow::anyhow!(
                "Kafka 总线需要启用 kafka feature / kafka bus requires the kafka feature"
            )));
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher = Arc::new(Dispatcher::new(hub.clone(), store.clone(), cache.clone()));
    tokio::spawn(dispatcher.run(consumer));

    spawn_repair_worker(
        cache.clone(),
        settings.cache.repair_interval_secs,
        shutdown_rx,
    );

    let ingestor = Arc::new(Ingestor::new(bus));
    let ws_server = WsServer::new(hub.clone(), ingestor, settings.session.clone());
    let ws_host = settings.server.host.clone();
    let ws_port = settings.server.ws_port;
    tokio::spawn(async move {
        if let Err(err) = ws_server.run(&ws_host, ws_port).await {
            tracing::error!("WebSocket 服务退出 / ws server exited: {err}");
        }
    });

    let state = AppState {
        hub,
        history: Arc::new(HistoryService::new(store, cache)),
    };

    tokio::select! {
        result = api::run_http(state, &settings.server.host, settings.server.http_port) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("收到退出信号，关闭服务 / shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    Ok(())
}
