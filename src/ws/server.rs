//! WS 监听 / WS listener

use anyhow::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::bus::Ingestor;
use crate::config::SessionSettings;
use crate::hub::Hub;

pub struct WsServer {
    hub: Arc<Hub>,
    ingestor: Arc<Ingestor>,
    session: SessionSettings,
}

impl WsServer {
    pub fn new(hub: Arc<Hub>, ingestor: Arc<Ingestor>, session: SessionSettings) -> Self {
        Self {
            hub,
            ingestor,
            session,
        }
    }

    pub async fn run(&self, host: &str, port: u16) -> Result<()> {
        let addr = format!("{host}:{port}");
        let listener = TcpListener::bind(&addr).await?;
        info!("🚀 kama-chat WebSocket 服务启动 {} / ws server listening", addr);

        while let Ok((stream, peer_addr)) = listener.accept().await {
            let hub = self.hub.clone();
            let ingestor = self.ingestor.clone();
            let session = self.session.clone();
            tokio::spawn(async move {
                if let Err(err) =
                    super::connection::handle_connection(stream, peer_addr, hub, ingestor, session)
                        .await
                {
                    tracing::error!("连接处理失败 {} / connection error: {err}", peer_addr);
                }
            });
        }

        Ok(())
    }
}
