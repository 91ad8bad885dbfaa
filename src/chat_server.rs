use std::collections::HashMap;
use std::sync::Arc;

use actix::prelude::*;
use log::{error, info};
use serde_json::json;

use crate::models::User;
use crate::notifier::{Notifier, ServerEvent, USER_STATUS_CHANGED};
use crate::store::{Repository, Store};
use crate::user_management::set_presence;

/// One serialized `{event, data}` frame for a websocket session.
#[derive(Message, Clone, Debug, PartialEq)]
#[rtype(result = "()")]
pub struct WsMessage(pub String);

#[derive(Message)]
#[rtype(result = "()")]
pub struct Connect {
    pub user_id: String,
    pub addr: Recipient<WsMessage>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub user_id: String,
    pub addr: Recipient<WsMessage>,
}

/// Delivers an event to every session of one user.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Emit {
    pub user_id: String,
    pub event: ServerEvent,
}

/// Real-time hub. Each user id is a room holding all of that user's open
/// sessions; presence flips on the first connect and the last disconnect.
pub struct ChatServer {
    sessions: HashMap<String, Vec<Recipient<WsMessage>>>,
    store: Arc<dyn Store>,
}

impl ChatServer {
    pub fn new(store: Arc<dyn Store>) -> Self {
        ChatServer {
            sessions: HashMap::new(),
            store,
        }
    }

    fn frame(event: &ServerEvent) -> Option<WsMessage> {
        match serde_json::to_string(event) {
            Ok(text) => Some(WsMessage(text)),
            Err(e) => {
                error!("Failed to serialize {} event: {}", event.event, e);
                None
            }
        }
    }

    fn send_to(&self, user_id: &str, event: &ServerEvent) {
        let Some(addrs) = self.sessions.get(user_id) else {
            return;
        };
        if let Some(frame) = Self::frame(event) {
            for addr in addrs {
                addr.do_send(frame.clone());
            }
        }
    }

    /// Sends to every session except the rooms of `except`.
    fn send_to_all(&self, event: &ServerEvent, except: &str) {
        if let Some(frame) = Self::frame(event) {
            let rooms = self.sessions.iter().filter(|(id, _)| id.as_str() != except);
            for addr in rooms.flat_map(|(_, addrs)| addrs) {
                addr.do_send(frame.clone());
            }
        }
    }
}

impl Actor for ChatServer {
    type Context = Context<Self>;
}

impl Handler<Connect> for ChatServer {
    // Presence writes hold the mailbox so they land in connect/disconnect order.
    type Result = AtomicResponse<Self, ()>;

    fn handle(&mut self, msg: Connect, _: &mut Context<Self>) -> Self::Result {
        let sessions = self.sessions.entry(msg.user_id.clone()).or_default();
        sessions.push(msg.addr);
        let first = sessions.len() == 1;
        info!("User {} connected (WS), {} session(s)", msg.user_id, sessions.len());

        if !first {
            return AtomicResponse::new(Box::pin(fut::ready(())));
        }
        let online = ServerEvent::new(
            USER_STATUS_CHANGED,
            json!({ "userId": msg.user_id, "isOnline": true }),
        );
        self.send_to_all(&online, &msg.user_id);
        let users: Repository<User> = Repository::new(self.store.clone());
        let user_id = msg.user_id;
        AtomicResponse::new(Box::pin(
            async move {
                if let Err(e) = set_presence(&users, &user_id, true).await {
                    error!("Failed to mark {} online: {}", user_id, e);
                }
            }
            .into_actor(self),
        ))
    }
}

impl Handler<Disconnect> for ChatServer {
    type Result = AtomicResponse<Self, ()>;

    fn handle(&mut self, msg: Disconnect, _: &mut Context<Self>) -> Self::Result {
        info!("User {} disconnected (WS)", msg.user_id);
        let last = match self.sessions.get_mut(&msg.user_id) {
            Some(addrs) => {
                // Remove only the connection that matches the provided address.
                addrs.retain(|a| a != &msg.addr);
                addrs.is_empty()
            }
            None => false,
        };
        if !last {
            return AtomicResponse::new(Box::pin(fut::ready(())));
        }
        self.sessions.remove(&msg.user_id);

        let users: Repository<User> = Repository::new(self.store.clone());
        let user_id = msg.user_id;
        AtomicResponse::new(Box::pin(
            async move {
                let last_seen = match set_presence(&users, &user_id, false).await {
                    Ok(stamp) => stamp,
                    Err(e) => {
                        error!("Failed to mark {} offline: {}", user_id, e);
                        None
                    }
                };
                (user_id, last_seen)
            }
            .into_actor(self)
            .map(|(user_id, last_seen), act, _| {
                let event = ServerEvent::new(
                    USER_STATUS_CHANGED,
                    json!({ "userId": user_id, "isOnline": false, "lastSeen": last_seen }),
                );
                act.send_to_all(&event, &user_id);
            }),
        ))
    }
}

impl Handler<Emit> for ChatServer {
    type Result = ();

    fn handle(&mut self, msg: Emit, _: &mut Context<Self>) {
        self.send_to(&msg.user_id, &msg.event);
    }
}

impl Notifier for Addr<ChatServer> {
    fn emit(&self, user_id: &str, event: ServerEvent) {
        self.do_send(Emit { user_id: user_id.to_string(), event });
    }
}
