//! 端到端投递测试：总线 → 分发器 → 注册中心
//! End-to-end delivery: bus → dispatcher → hub

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use kama_chat::bus::{in_process, Ingestor};
use kama_chat::cache::MemoryCache;
use kama_chat::dispatch::Dispatcher;
use kama_chat::domain::{ChatEnvelope, ChatResponse, ChatScene, MessageKind, MessageStatus};
use kama_chat::hub::Hub;
use kama_chat::store::MemoryMessageStore;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

struct Harness {
    hub: Arc<Hub>,
    store: Arc<MemoryMessageStore>,
    ingestor: Ingestor,
}

fn start() -> Harness {
    let hub = Arc::new(Hub::new());
    let store = Arc::new(MemoryMessageStore::new());
    let cache = Arc::new(MemoryCache::new(100));
    let (bus, consumer) = in_process(16);

    let dispatcher = Arc::new(Dispatcher::new(hub.clone(), store.clone(), cache));
    tokio::spawn(dispatcher.run(Box::new(consumer)));

    Harness {
        hub,
        store,
        ingestor: Ingestor::new(Arc::new(bus)),
    }
}

/// 注册用户并排掉欢迎消息 / Register a user and drain the welcome frame
async fn connect(hub: &Hub, uid: &str) -> mpsc::Receiver<String> {
    let (tx, mut rx) = mpsc::channel(16);
    hub.register(uid, tx);
    let _ = timeout(RECV_TIMEOUT, rx.recv()).await.expect("welcome");
    rx
}

async fn recv_response(rx: &mut mpsc::Receiver<String>) -> ChatResponse {
    let frame = timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("frame within deadline")
        .expect("channel open");
    serde_json::from_str(&frame).expect("valid response json")
}

fn text_envelope(from: &str, to: &str, content: &str) -> ChatEnvelope {
    ChatEnvelope {
        send_id: from.to_string(),
        receive_id: to.to_string(),
        content: content.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn single_chat_is_delivered_in_order_with_echo() {
    let h = start();
    let mut rx_a = connect(&h.hub, "U_A").await;
    let mut rx_b = connect(&h.hub, "U_B").await;

    for i in 0..5 {
        h.ingestor
            .ingest(&text_envelope("U_A", "U_B", &format!("msg-{i}")))
            .await
            .unwrap();
    }

    for i in 0..5 {
        let to_b = recv_response(&mut rx_b).await;
        assert_eq!(to_b.content, format!("msg-{i}"));
        assert_eq!(to_b.send_id, "U_A");
        // 发送方收到同一条权威回显 / sender receives the same canonical echo
        let echo = recv_response(&mut rx_a).await;
        assert_eq!(echo.content, format!("msg-{i}"));
    }

    // 双方在线，消息最终标记已送达（状态更新在投递之后落盘）
    // Both online: rows end up marked sent; the status write lands after delivery
    for _ in 0..50 {
        let rows = h.store.messages();
        if rows.len() == 5 && rows.iter().all(|r| r.status == MessageStatus::Sent as i32) {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("rows never reached sent status");
}

#[tokio::test]
async fn offline_receiver_still_gets_a_durable_row() {
    let h = start();
    let _rx_a = connect(&h.hub, "U_A").await;

    h.ingestor
        .ingest(&text_envelope("U_A", "U_B", "while you were away"))
        .await
        .unwrap();

    // 等待分发器处理完成 / wait for the dispatcher to process
    for _ in 0..50 {
        if h.store.insert_count() == 1 {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }

    let rows = h.store.messages();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].content, "while you were away");
    // 接收方不在线，状态保持未送达 / receiver offline, status stays unsent
    assert_eq!(rows[0].status, MessageStatus::Unsent as i32);
}

#[tokio::test]
async fn group_chat_fans_out_to_members_except_sender() {
    let h = start();
    h.store.insert_group(
        "G1",
        vec!["U_A".to_string(), "U_B".to_string(), "U_C".to_string()],
    );
    let mut rx_a = connect(&h.hub, "U_A").await;
    let mut rx_b = connect(&h.hub, "U_B").await;
    let mut rx_c = connect(&h.hub, "U_C").await;

    let envelope = ChatEnvelope {
        send_id: "U_A".to_string(),
        receive_id: "G1".to_string(),
        message_type: ChatScene::Group,
        content: "hello group".to_string(),
        ..Default::default()
    };
    h.ingestor.ingest(&envelope).await.unwrap();

    for rx in [&mut rx_b, &mut rx_c] {
        let resp = recv_response(rx).await;
        assert_eq!(resp.content, "hello group");
        assert_eq!(resp.receive_id, "G1");
        assert_eq!(resp.message_type, ChatScene::Group as i32);
    }
    // 发送方只收到一次回显，不重复投递 / sender gets exactly one echo
    let echo = recv_response(&mut rx_a).await;
    assert_eq!(echo.content, "hello group");

    // 群消息只落一行 / one durable row regardless of fan-out width
    assert_eq!(h.store.messages().len(), 1);
}

#[tokio::test]
async fn av_candidate_is_live_only_and_never_echoed() {
    let h = start();
    let mut rx_a = connect(&h.hub, "U_A").await;
    let mut rx_b = connect(&h.hub, "U_B").await;

    let candidate = ChatEnvelope {
        send_id: "U_A".to_string(),
        receive_id: "U_B".to_string(),
        kind: MessageKind::AudioOrVideo,
        av_data: r#"{"messageId":"PROXY","type":"candidate"}"#.to_string(),
        ..Default::default()
    };
    h.ingestor.ingest(&candidate).await.unwrap();

    let to_b = recv_response(&mut rx_b).await;
    assert_eq!(to_b.kind, MessageKind::AudioOrVideo as i32);
    // ICE候选不落库 / ICE candidates are not persisted
    assert_eq!(h.store.insert_count(), 0);

    let start_call = ChatEnvelope {
        send_id: "U_A".to_string(),
        receive_id: "U_B".to_string(),
        kind: MessageKind::AudioOrVideo,
        av_data: r#"{"messageId":"PROXY","type":"start_call"}"#.to_string(),
        ..Default::default()
    };
    h.ingestor.ingest(&start_call).await.unwrap();

    let call = recv_response(&mut rx_b).await;
    assert!(call.av_data.contains("start_call"));
    assert_eq!(h.store.insert_count(), 1);

    // 发起方不收到任何回显 / the caller never receives an echo
    assert!(timeout(Duration::from_millis(200), rx_a.recv())
        .await
        .is_err());
}
