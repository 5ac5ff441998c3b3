//! HTTP 管理与查询接口 / HTTP management and query surface
//!
//! 聊天数据走 WebSocket，这里只承载登出与历史查询
//! Chat traffic rides the WebSocket; this surface only carries logout and
//! history queries

use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::hub::Hub;
use crate::service::HistoryService;
use crate::store::StoreError;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub history: Arc<HistoryService>,
}

#[derive(Serialize)]
struct StatusBody {
    code: i32,
    message: String,
}

impl StatusBody {
    fn ok() -> Self {
        Self {
            code: 0,
            message: "success".to_string(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            code: -1,
            message: message.into(),
        }
    }
}

#[derive(Deserialize)]
struct LogoutPayload {
    uuid: String,
}

#[derive(Deserialize)]
struct SingleHistoryQuery {
    uuid: String,
    friend_uuid: String,
}

#[derive(Deserialize)]
struct GroupHistoryQuery {
    group_uuid: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/chat")
            .route("/logout", web::post().to(logout))
            .route("/messages", web::get().to(single_messages))
            .route("/group_messages", web::get().to(group_messages)),
    );
}

/// 登出：从注册中心移除连接，出站队列关闭后会话随之结束
/// Logout: removing the hub entry closes the outbound queue, ending the session
async fn logout(state: web::Data<AppState>, payload: web::Json<LogoutPayload>) -> impl Responder {
    if state.hub.unregister(&payload.uuid) {
        info!("用户 {} 通过HTTP登出 / logout via http", payload.uuid);
        HttpResponse::Ok().json(StatusBody::ok())
    } else {
        HttpResponse::Ok().json(StatusBody::failed("用户不在线 / user not online"))
    }
}

async fn single_messages(
    state: web::Data<AppState>,
    query: web::Query<SingleHistoryQuery>,
) -> impl Responder {
    match state
        .history
        .single_messages(&query.uuid, &query.friend_uuid)
        .await
    {
        Ok(messages) => HttpResponse::Ok().json(messages),
        Err(err) => store_error_response(err),
    }
}

async fn group_messages(
    state: web::Data<AppState>,
    query: web::Query<GroupHistoryQuery>,
) -> impl Responder {
    match state.history.group_messages(&query.group_uuid).await {
        Ok(messages) => HttpResponse::Ok().json(messages),
        Err(err) => store_error_response(err),
    }
}

fn store_error_response(err: StoreError) -> HttpResponse {
    match err {
        StoreError::NotFound(what) => {
            HttpResponse::NotFound().json(StatusBody::failed(format!("记录不存在: {what}")))
        }
        StoreError::Database(detail) => {
            HttpResponse::InternalServerError().json(StatusBody::failed(detail))
        }
    }
}

pub async fn run_http(state: AppState, host: &str, port: u16) -> std::io::Result<()> {
    info!("🚀 kama-chat HTTP 服务启动 {}:{} / http server listening", host, port);
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .configure(configure)
    })
    .bind((host, port))?
    .run()
    .await
}
