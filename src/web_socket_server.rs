//web_socket_server.rs

use std::time::{Duration, Instant};

use actix::prelude::*;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use log::{debug, warn};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app_state::AppState;
use crate::auth::verify_token;
use crate::chat_server::{ChatServer, Connect, Disconnect, Emit, WsMessage};
use crate::notifier::{ServerEvent, TYPING_START, TYPING_STOP};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Frame sent by the browser: `{"event": ..., "data": ...}`.
#[derive(Debug, Deserialize)]
struct ClientFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypingData {
    chat_id: String,
    receiver_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinData {
    user_id: String,
}

/// What the session does with one client frame.
#[derive(Debug, PartialEq)]
enum Action {
    Relay { to: String, event: ServerEvent },
    Joined,
    Reject(String),
}

/// Interprets a client frame on behalf of `user_id`.
fn interpret(user_id: &str, text: &str) -> Action {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => return Action::Reject(format!("Geçersiz mesaj: {}", e)),
    };
    match frame.event.as_str() {
        "join_user" => match serde_json::from_value::<JoinData>(frame.data) {
            Ok(join) if join.user_id == user_id => Action::Joined,
            Ok(_) => Action::Reject("Başka bir kullanıcının odasına katılamazsınız".to_string()),
            Err(e) => Action::Reject(format!("Geçersiz join_user: {}", e)),
        },
        name @ (TYPING_START | TYPING_STOP) => match serde_json::from_value::<TypingData>(frame.data) {
            Ok(typing) => Action::Relay {
                to: typing.receiver_id,
                event: ServerEvent::new(name, json!({ "chatId": typing.chat_id, "userId": user_id })),
            },
            Err(e) => Action::Reject(format!("Geçersiz {}: {}", name, e)),
        },
        other => Action::Reject(format!("Bilinmeyen olay: {}", other)),
    }
}

pub struct WebSocketConnection {
    pub user_id: String,
    pub hb: Instant,
    pub addr: Addr<ChatServer>,
}

impl WebSocketConnection {
    pub fn new(user_id: String, addr: Addr<ChatServer>) -> Self {
        WebSocketConnection { user_id, hb: Instant::now(), addr }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                warn!("WebSocket heartbeat failed for {}, disconnecting", act.user_id);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn send_error(ctx: &mut ws::WebsocketContext<Self>, message: &str) {
        ctx.text(json!({ "event": "error", "data": { "message": message } }).to_string());
    }
}

impl Actor for WebSocketConnection {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);

        self.addr
            .send(Connect { user_id: self.user_id.clone(), addr: ctx.address().recipient() })
            .into_actor(self)
            .then(|res, act, ctx| {
                if res.is_err() {
                    warn!("Failed to register {} with the chat server", act.user_id);
                    ctx.stop();
                }
                fut::ready(())
            })
            .wait(ctx);
    }

    fn stopped(&mut self, ctx: &mut Self::Context) {
        self.addr.do_send(Disconnect {
            user_id: self.user_id.clone(),
            addr: ctx.address().recipient(),
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WebSocketConnection {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => match interpret(&self.user_id, &text) {
                Action::Relay { to, event } => self.addr.do_send(Emit { user_id: to, event }),
                Action::Joined => debug!("User {} joined its room", self.user_id),
                Action::Reject(reason) => {
                    warn!("Rejected frame from {}: {}", self.user_id, reason);
                    Self::send_error(ctx, &reason);
                }
            },
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                warn!("WebSocket error for {}: {}", self.user_id, e);
                ctx.stop();
            }
            _ => {}
        }
    }
}

impl Handler<WsMessage> for WebSocketConnection {
    type Result = ();

    fn handle(&mut self, msg: WsMessage, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.text(msg.0);
    }
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// GET /ws?token=<jwt>
pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<WsQuery>,
    data: web::Data<AppState>,
    server: web::Data<Addr<ChatServer>>,
) -> Result<HttpResponse, Error> {
    let user = match query.token.as_deref().map(|t| verify_token(t, &data.config.jwt_secret)) {
        Some(Ok(user)) => user,
        _ => {
            return Ok(HttpResponse::Unauthorized()
                .json(json!({ "message": "Geçersiz veya süresi dolmuş oturum" })))
        }
    };
    ws::start(
        WebSocketConnection::new(user.id, server.get_ref().clone()),
        &req,
        stream,
    )
}
