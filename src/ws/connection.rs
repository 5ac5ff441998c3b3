//! 客户端会话：每连接一读一写两个循环
//! Client session: one read loop and one write loop per connection

use anyhow::Result;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::bus::{BusError, Ingestor};
use crate::config::SessionSettings;
use crate::domain::{ChatEnvelope, ChatResponse, MessageKind};
use crate::hub::Hub;

/// 处理新连接：握手时取出已鉴权的用户标识，注册后拉起读写循环
/// Handle a new connection: extract the pre-authenticated identity during
/// the handshake, register, then run the session loops
pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    hub: Arc<Hub>,
    ingestor: Arc<Ingestor>,
    session: SessionSettings,
) -> Result<()> {
    let mut uid: Option<String> = None;
    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
            uid = uid_from_query(req.uri().query());
            Ok(resp)
        },
    )
    .await?;

    let uid = match uid {
        Some(uid) if !uid.is_empty() => uid,
        _ => {
            warn!("连接缺少用户标识，拒绝 {} / missing uid, rejecting", peer_addr);
            let (mut sink, _) = ws_stream.split();
            let _ = sink.send(Message::Close(None)).await;
            return Ok(());
        }
    };

    info!("✅ 用户 {} 已连接 {} / client connected", uid, peer_addr);

    let (outbound_tx, outbound_rx) = mpsc::channel::<String>(session.outbound_queue_size);
    let session_id = hub.register(&uid, outbound_tx);

    let (sink, stream_rx) = ws_stream.split();
    let write_task = tokio::spawn(write_loop(sink, outbound_rx, session.ping_period()));

    read_loop(stream_rx, &uid, &hub, &ingestor, session.pong_wait()).await;

    // 读循环退出是发现失效连接的唯一途径
    // A terminated read loop is the only way stale connections are discovered
    hub.unregister_session(&uid, &session_id);
    let _ = write_task.await;
    info!("👋 用户 {} 断开连接 / client disconnected", uid);
    Ok(())
}

/// 读循环：每次读取都带 pong 超时，任何错误都触发注销
/// Read loop: every read carries the pong deadline; any error unregisters
async fn read_loop(
    mut stream: SplitStream<WebSocketStream<TcpStream>>,
    uid: &str,
    hub: &Hub,
    ingestor: &Ingestor,
    pong_wait: Duration,
) {
    loop {
        let frame = match timeout(pong_wait, stream.next()).await {
            Err(_) => {
                warn!("⏰ 用户 {} 心跳超时 / pong deadline exceeded", uid);
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                error!("读取失败 uid={} / read failed: {err}", uid);
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => handle_payload(text.as_bytes(), uid, hub, ingestor).await,
            Message::Binary(data) => handle_payload(&data, uid, hub, ingestor).await,
            Message::Pong(_) => debug!("🏓 pong uid={}", uid),
            // tungstenite 在下一次写时自动应答 ping / auto-answered on next write
            Message::Ping(_) => {}
            Message::Close(_) => {
                info!("用户 {} 主动断开 / client sent close", uid);
                break;
            }
            _ => {}
        }
    }
}

/// 解码一帧并处理：心跳就地应答，其余交给接收路径
/// Decode one frame: heartbeats answered in place, the rest goes to ingestion
async fn handle_payload(payload: &[u8], uid: &str, hub: &Hub, ingestor: &Ingestor) {
    let envelope = match serde_json::from_slice::<ChatEnvelope>(payload) {
        Ok(envelope) => envelope,
        Err(err) => {
            error!("消息解码失败，丢弃 uid={} / malformed frame dropped: {err}", uid);
            return;
        }
    };

    if envelope.kind == MessageKind::Heartbeat {
        // 心跳不需要持久化和扇出，绕过总线 / no durability or fan-out needed
        reply(hub, uid, &ChatResponse::heartbeat_reply(uid));
        return;
    }

    match ingestor.ingest(&envelope).await {
        Ok(()) => {}
        Err(BusError::Busy) => {
            warn!("总线繁忙，拒绝消息 uid={} / bus busy, message rejected", uid);
            reply(
                hub,
                uid,
                &ChatResponse::system_notice(uid, "系统繁忙，消息发送失败，请稍后重试"),
            );
        }
        Err(err) => {
            error!("消息发布失败 uid={} / publish failed: {err}", uid);
            reply(
                hub,
                uid,
                &ChatResponse::system_notice(uid, "消息未送达，请稍后重试"),
            );
        }
    }
}

fn reply(hub: &Hub, uid: &str, response: &ChatResponse) {
    if let Ok(payload) = serde_json::to_string(response) {
        hub.lookup_and_send(uid, &payload);
    }
}

/// 写循环：排空出站队列并定期发协议 ping；队列关闭即发送关闭帧退出
/// Write loop: drain the outbound queue, ping on a timer; a closed queue
/// means unregistered, so send a close frame and exit
async fn write_loop(
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut outbound: mpsc::Receiver<String>,
    ping_period: Duration,
) {
    let mut ping = interval_at(Instant::now() + ping_period, ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(payload) => {
                    if let Err(err) = sink.send(Message::Text(payload)).await {
                        error!("写入失败 / write failed: {err}");
                        break;
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

fn uid_from_query(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .find_map(|pair| pair.strip_prefix("uid="))
        .map(|uid| uid.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_parsed_from_query() {
        assert_eq!(uid_from_query(Some("uid=U1001")), Some("U1001".to_string()));
        assert_eq!(
            uid_from_query(Some("token=abc&uid=U7")),
            Some("U7".to_string())
        );
        assert_eq!(uid_from_query(Some("token=abc")), None);
        assert_eq!(uid_from_query(None), None);
    }
}
