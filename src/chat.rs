// File: chat.rs

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::models::{
    new_id, Chat, ChatError, FileInfo, Message, MessageStatus, PublicUser, StatusDetails, User,
};
use crate::notifier::{ServerEvent, MESSAGES_READ, MESSAGE_DELETED, NEW_MESSAGE};
use crate::store::{Filter, Repository, Sort, StoreError};

/// Attempts per read-modify-write before giving up on a busy chat.
const SAVE_ATTEMPTS: usize = 5;

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        match e {
            ChatError::MessageNotFound => ApiError::NotFound(e.to_string()),
            ChatError::NotSender => ApiError::Forbidden(e.to_string()),
        }
    }
}

/// Both users map to the same chat id whichever of them starts it.
fn pair_id(a: &str, b: &str) -> String {
    if a <= b {
        format!("{}:{}", a, b)
    } else {
        format!("{}:{}", b, a)
    }
}

async fn load_chat(chats: &Repository<Chat>, chat_id: &str, user_id: &str) -> ApiResult<Chat> {
    let chat = chats
        .get(chat_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Sohbet bulunamadı"))?;
    if !chat.is_participant(user_id) {
        return Err(ApiError::forbidden("Bu sohbetin katılımcısı değilsiniz"));
    }
    Ok(chat)
}

/// Loads the chat, applies `change` and writes it back guarded by `version`.
/// A concurrent writer makes the save miss; the change is then replayed on
/// a fresh copy.
pub async fn modify_chat<R>(
    state: &AppState,
    chat_id: &str,
    user_id: &str,
    mut change: impl FnMut(&mut Chat) -> ApiResult<R>,
) -> ApiResult<(Chat, R)> {
    let chats: Repository<Chat> = state.repo();
    for attempt in 1..=SAVE_ATTEMPTS {
        let mut chat = load_chat(&chats, chat_id, user_id).await?;
        let outcome = change(&mut chat)?;
        let expected = chat.version;
        chat.version += 1;
        if chats.save_versioned(&chat, expected).await? {
            return Ok((chat, outcome));
        }
        warn!("Chat {} changed concurrently (attempt {})", chat_id, attempt);
    }
    Err(ApiError::Conflict("Sohbet şu anda güncelleniyor, lütfen tekrar deneyin".to_string()))
}

fn emit_to_all(state: &AppState, chat: &Chat, event: &str, data: serde_json::Value) {
    for participant in &chat.participants {
        state.notifier.emit(participant, ServerEvent::new(event, data.clone()));
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    #[serde(rename = "_id")]
    pub id: String,
    pub participants: Vec<String>,
    pub other_user: Option<PublicUser>,
    pub last_message: Option<String>,
    #[serde(default, with = "crate::store::timestamp::option")]
    pub last_message_time: Option<DateTime<Utc>>,
    pub unread_count: i64,
}

/// GET /chat/list/{user_id}
pub async fn list_chats(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let user_id = path.into_inner();
    auth.require_self_or_admin(&user_id)?;

    let chats: Repository<Chat> = data.repo();
    let users: Repository<User> = data.repo();
    let list = chats
        .list(&Filter::new().eq("participants", user_id.as_str()), Some(Sort::desc("lastMessageTime")))
        .await?;

    let mut summaries = Vec::with_capacity(list.len());
    for chat in list {
        let other_user = match chat.others(&user_id).next() {
            Some(other) => users.get(other).await?.map(PublicUser::from),
            None => None,
        };
        summaries.push(ChatSummary {
            unread_count: chat.unread_for(&user_id),
            id: chat.id,
            participants: chat.participants,
            other_user,
            last_message: chat.last_message,
            last_message_time: chat.last_message_time,
        });
    }
    Ok(HttpResponse::Ok().json(summaries))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartChatRequest {
    pub participant_id: String,
}

/// POST /chat/start. Returns the existing chat between the two users, or a new one.
pub async fn start_chat(
    auth: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<StartChatRequest>,
) -> ApiResult<HttpResponse> {
    let other = payload.into_inner().participant_id;
    if other == auth.id {
        return Err(ApiError::validation("Kendinizle sohbet başlatamazsınız"));
    }
    let users: Repository<User> = data.repo();
    if users.get(&other).await?.is_none() {
        return Err(ApiError::not_found("Kullanıcı bulunamadı"));
    }

    let chats: Repository<Chat> = data.repo();
    let id = pair_id(&auth.id, &other);
    if let Some(existing) = chats.get(&id).await? {
        return Ok(HttpResponse::Ok().json(existing));
    }
    let chat = Chat::new(id.clone(), &auth.id, &other, Utc::now());
    match chats.insert(&chat).await {
        Ok(()) => {
            info!("Chat {} started", chat.id);
            Ok(HttpResponse::Created().json(chat))
        }
        // The other side started it in the meantime.
        Err(StoreError::DuplicateKey(_)) => {
            let existing = chats
                .get(&id)
                .await?
                .ok_or_else(|| ApiError::Internal(format!("chat {} vanished after insert race", id)))?;
            Ok(HttpResponse::Ok().json(existing))
        }
        Err(e) => Err(e.into()),
    }
}

/// GET /chat/{chat_id}/messages. Incoming `sent` messages become `delivered`.
pub async fn get_messages(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let chat_id = path.into_inner();
    let chats: Repository<Chat> = data.repo();
    let mut chat = load_chat(&chats, &chat_id, &auth.id).await?;

    let pending = chat
        .messages
        .iter()
        .any(|m| m.sender_id != auth.id && m.status < MessageStatus::Delivered);
    if pending {
        let now = Utc::now();
        let (updated, _) =
            modify_chat(&data, &chat_id, &auth.id, |c| Ok(c.mark_delivered(&auth.id, now))).await?;
        chat = updated;
    }
    Ok(HttpResponse::Ok().json(chat.visible_messages()))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
    pub file: Option<FileInfo>,
}

/// POST /chat/{chat_id}/messages
pub async fn send_message(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<SendMessageRequest>,
) -> ApiResult<HttpResponse> {
    let chat_id = path.into_inner();
    let payload = payload.into_inner();
    let content = payload.content.trim().to_string();
    if content.is_empty() && payload.file.is_none() {
        return Err(ApiError::validation("Mesaj içeriği veya dosya gerekli"));
    }

    let now = Utc::now();
    let message = Message {
        id: new_id(),
        sender_id: auth.id.clone(),
        content,
        file: payload.file,
        status: MessageStatus::Sent,
        status_details: StatusDetails { sent_at: Some(now), ..Default::default() },
        is_deleted: false,
        deleted_at: None,
        created_at: now,
    };
    let (chat, ()) = modify_chat(&data, &chat_id, &auth.id, |c| {
        c.push_message(message.clone());
        Ok(())
    })
    .await?;

    emit_to_all(&data, &chat, NEW_MESSAGE, json!({ "chatId": chat.id, "message": message }));
    Ok(HttpResponse::Created().json(message))
}

/// PATCH /chat/{chat_id}/read
pub async fn mark_chat_read(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let chat_id = path.into_inner();
    let now = Utc::now();
    let (chat, message_ids) =
        modify_chat(&data, &chat_id, &auth.id, |c| Ok(c.mark_read(&auth.id, now))).await?;

    let payload = json!({
        "chatId": chat.id,
        "readerId": auth.id,
        "messageIds": message_ids,
        "readAt": now,
    });
    for other in chat.others(&auth.id) {
        data.notifier.emit(other, ServerEvent::new(MESSAGES_READ, payload.clone()));
    }
    Ok(HttpResponse::Ok().json(json!({ "updated": message_ids.len() })))
}

/// DELETE /chat/{chat_id}/messages/{message_id}
pub async fn delete_message(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> ApiResult<HttpResponse> {
    let (chat_id, message_id) = path.into_inner();
    let now = Utc::now();
    let (chat, ()) = modify_chat(&data, &chat_id, &auth.id, |c| {
        c.delete_message(&message_id, &auth.id, now).map_err(ApiError::from)
    })
    .await?;

    emit_to_all(
        &data,
        &chat,
        MESSAGE_DELETED,
        json!({ "chatId": chat.id, "messageId": message_id, "lastMessage": chat.last_message }),
    );
    Ok(HttpResponse::Ok().json(json!({ "message": "Mesaj silindi" })))
}

pub async fn unread_total(state: &AppState, user_id: &str) -> ApiResult<i64> {
    let chats: Repository<Chat> = state.repo();
    Ok(chats
        .list(&Filter::new().eq("participants", user_id), None)
        .await?
        .iter()
        .map(|c| c.unread_for(user_id))
        .sum())
}

/// GET /chat/unread/{user_id}
pub async fn get_unread_total(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let user_id = path.into_inner();
    auth.require_self_or_admin(&user_id)?;
    let total = unread_total(&data, &user_id).await?;
    Ok(HttpResponse::Ok().json(json!({ "total": total })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::testing::memory_state;
    use crate::auth::testing::{bearer, insert_user};
    use crate::auth::Authentication;
    use crate::models::Role;
    use actix_web::{http::StatusCode, test, App};

    macro_rules! chat_app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .wrap(Authentication::new("test-secret".into()))
                    .app_data(web::Data::new($state.clone()))
                    .service(
                        web::scope("/chat")
                            .route("/start", web::post().to(start_chat))
                            .route("/list/{user_id}", web::get().to(list_chats))
                            .route("/unread/{user_id}", web::get().to(get_unread_total))
                            .route("/{chat_id}/messages", web::get().to(get_messages))
                            .route("/{chat_id}/messages", web::post().to(send_message))
                            .route("/{chat_id}/read", web::patch().to(mark_chat_read))
                            .route(
                                "/{chat_id}/messages/{message_id}",
                                web::delete().to(delete_message),
                            ),
                    ),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn start_is_find_or_create() {
        let (state, _) = memory_state();
        insert_user(&state, "ayse", Role::Kullanici).await;
        insert_user(&state, "mehmet", Role::Kullanici).await;
        let app = chat_app!(state);

        let req = test::TestRequest::post()
            .uri("/chat/start")
            .insert_header(bearer("ayse", Role::Kullanici))
            .set_json(json!({ "participantId": "mehmet" }))
            .to_request();
        let first: Chat = test::call_and_read_body_json(&app, req).await;

        let req = test::TestRequest::post()
            .uri("/chat/start")
            .insert_header(bearer("mehmet", Role::Kullanici))
            .set_json(json!({ "participantId": "ayse" }))
            .to_request();
        let second: Chat = test::call_and_read_body_json(&app, req).await;
        assert_eq!(first.id, second.id);

        let req = test::TestRequest::post()
            .uri("/chat/start")
            .insert_header(bearer("ayse", Role::Kullanici))
            .set_json(json!({ "participantId": "ayse" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn unread_counters_follow_send_read_and_delete() {
        let (state, notifier) = memory_state();
        insert_user(&state, "ayse", Role::Kullanici).await;
        insert_user(&state, "mehmet", Role::Kullanici).await;
        let app = chat_app!(state);

        let req = test::TestRequest::post()
            .uri("/chat/start")
            .insert_header(bearer("ayse", Role::Kullanici))
            .set_json(json!({ "participantId": "mehmet" }))
            .to_request();
        let chat: Chat = test::call_and_read_body_json(&app, req).await;
        let messages_uri = format!("/chat/{}/messages", chat.id);

        let mut sent = Vec::new();
        for text in ["Merhaba", "Servis yarın mı?"] {
            let req = test::TestRequest::post()
                .uri(&messages_uri)
                .insert_header(bearer("ayse", Role::Kullanici))
                .set_json(json!({ "content": text }))
                .to_request();
            let m: Message = test::call_and_read_body_json(&app, req).await;
            sent.push(m);
        }
        assert_eq!(unread_total(&state, "mehmet").await.unwrap(), 2);
        assert_eq!(unread_total(&state, "ayse").await.unwrap(), 0);
        assert_eq!(notifier.names_for("ayse"), vec![NEW_MESSAGE.to_string(); 2]);

        // sender deletes the unread second message; mehmet's counter follows
        let req = test::TestRequest::delete()
            .uri(&format!("/chat/{}/messages/{}", chat.id, sent[1].id))
            .insert_header(bearer("ayse", Role::Kullanici))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        assert_eq!(unread_total(&state, "mehmet").await.unwrap(), 1);

        let req = test::TestRequest::get()
            .uri(&messages_uri)
            .insert_header(bearer("mehmet", Role::Kullanici))
            .to_request();
        let visible: Vec<Message> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].status, MessageStatus::Delivered);

        let req = test::TestRequest::patch()
            .uri(&format!("/chat/{}/read", chat.id))
            .insert_header(bearer("mehmet", Role::Kullanici))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        assert_eq!(unread_total(&state, "mehmet").await.unwrap(), 0);
        assert!(notifier.names_for("ayse").contains(&MESSAGES_READ.to_string()));

        let chats: Repository<Chat> = state.repo();
        let stored = chats.get(&chat.id).await.unwrap().unwrap();
        assert_eq!(stored.last_message.as_deref(), Some("Merhaba"));
        assert_eq!(stored.version, 5);
    }

    #[actix_web::test]
    async fn only_sender_deletes_and_outsiders_are_kept_out() {
        let (state, _) = memory_state();
        for id in ["ayse", "mehmet", "zeynep"] {
            insert_user(&state, id, Role::Kullanici).await;
        }
        let app = chat_app!(state);

        let req = test::TestRequest::post()
            .uri("/chat/start")
            .insert_header(bearer("ayse", Role::Kullanici))
            .set_json(json!({ "participantId": "mehmet" }))
            .to_request();
        let chat: Chat = test::call_and_read_body_json(&app, req).await;

        let req = test::TestRequest::post()
            .uri(&format!("/chat/{}/messages", chat.id))
            .insert_header(bearer("ayse", Role::Kullanici))
            .set_json(json!({ "content": "" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri(&format!("/chat/{}/messages", chat.id))
            .insert_header(bearer("ayse", Role::Kullanici))
            .set_json(json!({ "file": { "name": "fatura.pdf", "url": "/files/fatura.pdf" } }))
            .to_request();
        let message: Message = test::call_and_read_body_json(&app, req).await;

        let req = test::TestRequest::delete()
            .uri(&format!("/chat/{}/messages/{}", chat.id, message.id))
            .insert_header(bearer("mehmet", Role::Kullanici))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::get()
            .uri(&format!("/chat/{}/messages", chat.id))
            .insert_header(bearer("zeynep", Role::Kullanici))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::get()
            .uri("/chat/list/mehmet")
            .insert_header(bearer("mehmet", Role::Kullanici))
            .to_request();
        let list: Vec<ChatSummary> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].unread_count, 1);
        assert_eq!(list[0].last_message.as_deref(), Some("📎 fatura.pdf"));
        assert_eq!(list[0].other_user.as_ref().map(|u| u.id.as_str()), Some("ayse"));
    }

    #[actix_web::test]
    async fn stale_version_is_retried_not_lost() {
        let (state, _) = memory_state();
        let chats: Repository<Chat> = state.repo();
        chats.insert(&Chat::new("c1".into(), "ayse", "mehmet", Utc::now())).await.unwrap();

        // a concurrent writer bumps the version between our load and save
        let mut interfered = false;
        let store = state.clone();
        let (chat, ()) = modify_chat(&state, "c1", "ayse", |c| {
            if !interfered {
                interfered = true;
                let mut other = c.clone();
                other.version += 1;
                let repo: Repository<Chat> = store.repo();
                futures::executor::block_on(repo.save(&other)).unwrap();
            }
            c.last_message = Some("son".into());
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(chat.version, 2);
        assert_eq!(chats.get("c1").await.unwrap().unwrap().last_message.as_deref(), Some("son"));
    }
}
