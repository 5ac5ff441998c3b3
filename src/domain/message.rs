use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// 消息时间展示格式 / Display format for message timestamps
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 消息类型 / Message kind
///
/// 线上协议使用整型编码，序列化时透传整数值
/// The wire protocol encodes this as an integer, passed through on serialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum MessageKind {
    Text = 0,
    Voice = 1,
    File = 2,
    AudioOrVideo = 3,
    /// 心跳帧不进总线，读循环直接应答 / Heartbeat frames bypass the bus
    Heartbeat = 4,
}

impl Default for MessageKind {
    fn default() -> Self {
        Self::Text
    }
}

impl From<MessageKind> for i32 {
    fn from(kind: MessageKind) -> Self {
        kind as i32
    }
}

impl TryFrom<i32> for MessageKind {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Text),
            1 => Ok(Self::Voice),
            2 => Ok(Self::File),
            3 => Ok(Self::AudioOrVideo),
            4 => Ok(Self::Heartbeat),
            other => Err(format!("unknown message kind: {other}")),
        }
    }
}

/// 聊天场景：单聊或群聊 / Chat scene: single or group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ChatScene {
    Single = 1,
    Group = 2,
}

impl Default for ChatScene {
    fn default() -> Self {
        Self::Single
    }
}

impl From<ChatScene> for i32 {
    fn from(scene: ChatScene) -> Self {
        scene as i32
    }
}

impl TryFrom<i32> for ChatScene {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Single),
            2 => Ok(Self::Group),
            other => Err(format!("unknown chat scene: {other}")),
        }
    }
}

/// 消息状态（仅作参考，不参与投递判定）
/// Message status (advisory only, never drives delivery decisions)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Unsent = 0,
    Sent = 1,
}

/// 聊天消息信封 / Chat message envelope
///
/// 客户端上行与总线载荷共用此结构，解码后不可变
/// Shared by the client uplink and the bus payload; immutable once decoded
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatEnvelope {
    pub session_id: String,
    pub send_id: String,
    pub send_name: String,
    pub send_avatar: String,
    pub receive_id: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub message_type: ChatScene,
    pub content: String,
    pub url: String,
    pub file_size: String,
    pub file_type: String,
    pub file_name: String,
    pub av_data: String,
}

/// 音视频信令载荷 / Audio-video signaling payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvSignal {
    #[serde(rename = "messageId", default)]
    pub message_id: String,
    #[serde(rename = "type", default)]
    pub signal_type: String,
}

impl AvSignal {
    pub fn parse(av_data: &str) -> Option<Self> {
        serde_json::from_str(av_data).ok()
    }

    /// 只有通话控制信令落库，ICE候选等只做在线转发
    /// Only call-control signaling is persisted; ICE candidates etc. are live-only
    pub fn is_persistent(&self) -> bool {
        matches!(
            self.signal_type.as_str(),
            "start_call" | "receive_call" | "reject_call"
        )
    }
}

/// 消息持久化行 / Durable message row (`t_message`)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MessageRow {
    pub uuid: String,
    pub session_id: String,
    #[sqlx(rename = "type")]
    pub kind: i32,
    pub content: String,
    pub url: String,
    pub send_id: String,
    pub send_name: String,
    pub send_avatar: String,
    pub receive_id: String,
    pub file_size: String,
    pub file_type: String,
    pub file_name: String,
    pub av_data: String,
    pub status: i32,
    pub message_type: i32,
    pub created_at: DateTime<Utc>,
}

impl MessageRow {
    /// 由信封构建落库行，按消息类型清空无关字段
    /// Build the durable row from an envelope, blanking fields irrelevant to the kind
    pub fn from_envelope(envelope: &ChatEnvelope, now: DateTime<Utc>) -> Self {
        let mut row = Self {
            uuid: new_message_uuid(),
            session_id: envelope.session_id.clone(),
            kind: envelope.kind.into(),
            content: String::new(),
            url: String::new(),
            send_id: envelope.send_id.clone(),
            send_name: envelope.send_name.clone(),
            send_avatar: normalize_path(&envelope.send_avatar),
            receive_id: envelope.receive_id.clone(),
            file_size: String::new(),
            file_type: String::new(),
            file_name: String::new(),
            av_data: String::new(),
            status: MessageStatus::Unsent as i32,
            message_type: envelope.message_type.into(),
            created_at: now,
        };
        match envelope.kind {
            MessageKind::Text => {
                row.content = envelope.content.clone();
                row.file_size = "0B".to_string();
            }
            MessageKind::File | MessageKind::Voice => {
                row.url = envelope.url.clone();
                row.file_size = envelope.file_size.clone();
                row.file_type = envelope.file_type.clone();
                row.file_name = envelope.file_name.clone();
            }
            MessageKind::AudioOrVideo => {
                row.av_data = envelope.av_data.clone();
            }
            MessageKind::Heartbeat => {}
        }
        row
    }
}

/// 下行响应结构，前端渲染的唯一权威形态
/// Outbound response shape, the single canonical form the frontend renders
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatResponse {
    pub send_id: String,
    pub send_name: String,
    pub send_avatar: String,
    pub receive_id: String,
    #[serde(rename = "type")]
    pub kind: i32,
    pub content: String,
    pub url: String,
    pub file_size: String,
    pub file_name: String,
    pub file_type: String,
    pub created_at: String,
    pub av_data: String,
    pub message_type: i32,
}

impl ChatResponse {
    pub fn from_row(row: &MessageRow) -> Self {
        Self {
            send_id: row.send_id.clone(),
            send_name: row.send_name.clone(),
            send_avatar: row.send_avatar.clone(),
            receive_id: row.receive_id.clone(),
            kind: row.kind,
            content: row.content.clone(),
            url: row.url.clone(),
            file_size: row.file_size.clone(),
            file_name: row.file_name.clone(),
            file_type: row.file_type.clone(),
            created_at: row.created_at.format(TIME_FORMAT).to_string(),
            av_data: row.av_data.clone(),
            message_type: row.message_type,
        }
    }

    /// 注册成功后的欢迎消息 / Welcome message sent right after register
    pub fn welcome(to: &str) -> Self {
        Self {
            send_id: "System".to_string(),
            receive_id: to.to_string(),
            kind: MessageKind::Text.into(),
            content: "welcome".to_string(),
            created_at: Utc::now().format(TIME_FORMAT).to_string(),
            message_type: ChatScene::Single.into(),
            ..Default::default()
        }
    }

    /// 心跳应答 / Heartbeat reply
    pub fn heartbeat_reply(to: &str) -> Self {
        Self {
            send_id: "System".to_string(),
            receive_id: to.to_string(),
            kind: MessageKind::Heartbeat.into(),
            content: "PONG".to_string(),
            created_at: Utc::now().format(TIME_FORMAT).to_string(),
            message_type: ChatScene::Single.into(),
            ..Default::default()
        }
    }

    /// 系统提示（限流、投递失败等）/ System notice (throttled, delivery failed, ...)
    pub fn system_notice(to: &str, content: &str) -> Self {
        Self {
            send_id: "System".to_string(),
            receive_id: to.to_string(),
            kind: MessageKind::Text.into(),
            content: content.to_string(),
            created_at: Utc::now().format(TIME_FORMAT).to_string(),
            message_type: ChatScene::Single.into(),
            ..Default::default()
        }
    }
}

/// 去除头像路径中 /static 之前的内容，防止IP前缀写入存储
/// Strip everything before /static in avatar paths so host prefixes never reach storage
pub fn normalize_path(path: &str) -> String {
    match path.find("/static") {
        Some(idx) => path[idx..].to_string(),
        None => path.to_string(),
    }
}

/// 生成消息UUID，M前缀加11位随机字符 / Message uuid: "M" plus 11 random chars
pub fn new_message_uuid() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..11)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    format!("M{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_decodes_bus_payload() {
        let payload = r#"{
            "session_id": "S1",
            "send_id": "U1001",
            "send_name": "alice",
            "send_avatar": "http://127.0.0.1:8080/static/a.png",
            "receive_id": "U1002",
            "type": 0,
            "message_type": 1,
            "content": "hi"
        }"#;
        let envelope: ChatEnvelope = serde_json::from_str(payload).unwrap();
        assert_eq!(envelope.kind, MessageKind::Text);
        assert_eq!(envelope.message_type, ChatScene::Single);
        assert_eq!(envelope.content, "hi");
        assert_eq!(envelope.url, "");
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let payload = r#"{"send_id":"U1","receive_id":"U2","type":42}"#;
        assert!(serde_json::from_str::<ChatEnvelope>(payload).is_err());
    }

    #[test]
    fn row_blanks_fields_per_kind() {
        let envelope = ChatEnvelope {
            send_id: "U1".into(),
            receive_id: "U2".into(),
            kind: MessageKind::File,
            content: "should be dropped".into(),
            url: "/static/file/doc.pdf".into(),
            file_size: "12KB".into(),
            file_type: "pdf".into(),
            file_name: "doc.pdf".into(),
            ..Default::default()
        };
        let row = MessageRow::from_envelope(&envelope, Utc::now());
        assert_eq!(row.content, "");
        assert_eq!(row.url, "/static/file/doc.pdf");
        assert_eq!(row.status, MessageStatus::Unsent as i32);
        assert!(row.uuid.starts_with('M') && row.uuid.len() == 12);
    }

    #[test]
    fn avatar_path_is_normalized() {
        assert_eq!(
            normalize_path("http://1.2.3.4:8080/static/avatar/u1.png"),
            "/static/avatar/u1.png"
        );
        assert_eq!(normalize_path("plain.png"), "plain.png");
        assert_eq!(normalize_path(""), "");
    }

    #[test]
    fn av_signal_persistence_rules() {
        let start = AvSignal::parse(r#"{"messageId":"PROXY","type":"start_call"}"#).unwrap();
        assert!(start.is_persistent());
        let candidate = AvSignal::parse(r#"{"messageId":"PROXY","type":"candidate"}"#).unwrap();
        assert!(!candidate.is_persistent());
        assert!(AvSignal::parse("not json").is_none());
    }

    #[test]
    fn response_uses_camel_case_keys() {
        let response = ChatResponse::welcome("U7");
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"sendId\":\"System\""));
        assert!(json.contains("\"receiveId\":\"U7\""));
        assert!(json.contains("\"content\":\"welcome\""));
        assert!(json.contains("\"messageType\":1"));
    }
}
