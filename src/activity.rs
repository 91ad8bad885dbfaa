//! Audit log and per-user notification feed. Every workflow records its
//! activity through `record`, which also pushes the entry to the related user.

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use log::{error, info};
use mongodb::bson::doc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::models::new_id;
use crate::notifier::{ServerEvent, NOTIFICATION};
use crate::store::{Entity, Filter, Repository, Sort};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Task,
    Ticket,
    Nudge,
    Calendar,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(rename = "_id")]
    pub id: String,
    /// The acting user.
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub message: String,
    pub related_user: Option<String>,
    pub related_task: Option<String>,
    pub related_ticket: Option<String>,
    #[serde(default)]
    pub read: bool,
    #[serde(with = "crate::store::timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Entity for Activity {
    const COLLECTION: &'static str = "activities";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Input for `record`.
#[derive(Debug, Clone)]
pub struct NewActivity {
    pub actor: String,
    pub kind: ActivityKind,
    pub message: String,
    pub related_user: Option<String>,
    pub related_task: Option<String>,
    pub related_ticket: Option<String>,
}

impl NewActivity {
    pub fn new(actor: &str, kind: ActivityKind, message: impl Into<String>) -> Self {
        NewActivity {
            actor: actor.to_string(),
            kind,
            message: message.into(),
            related_user: None,
            related_task: None,
            related_ticket: None,
        }
    }

    pub fn for_user(mut self, user_id: &str) -> Self {
        self.related_user = Some(user_id.to_string());
        self
    }

    pub fn task(mut self, task_id: &str) -> Self {
        self.related_task = Some(task_id.to_string());
        self
    }

    pub fn ticket(mut self, ticket_id: &str) -> Self {
        self.related_ticket = Some(ticket_id.to_string());
        self
    }
}

pub async fn record(state: &AppState, entry: NewActivity) -> ApiResult<Activity> {
    let activity = Activity {
        id: new_id(),
        user_id: entry.actor,
        kind: entry.kind,
        message: entry.message,
        related_user: entry.related_user,
        related_task: entry.related_task,
        related_ticket: entry.related_ticket,
        read: false,
        created_at: Utc::now(),
    };
    let activities: Repository<Activity> = state.repo();
    activities.insert(&activity).await?;

    if let Some(target) = activity.related_user.as_deref() {
        if target != activity.user_id {
            let payload = serde_json::to_value(&activity)
                .map_err(|e| ApiError::Internal(e.to_string()))?;
            state.notifier.emit(target, ServerEvent::new(NOTIFICATION, payload));
        }
    }
    Ok(activity)
}

/// Like `record`, but a failed audit write only gets logged. Used after the
/// primary change has already been persisted.
pub async fn record_quietly(state: &AppState, entry: NewActivity) {
    if let Err(e) = record(state, entry).await {
        error!("Failed to record activity: {}", e);
    }
}

pub async fn unread_count(state: &AppState, user_id: &str) -> ApiResult<u64> {
    let activities: Repository<Activity> = state.repo();
    Ok(activities
        .count(&Filter::new().eq("relatedUser", user_id).eq("read", false))
        .await?)
}

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    pub unread: Option<bool>,
}

/// GET /notifications/{user_id}
pub async fn list_notifications(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<NotificationQuery>,
) -> ApiResult<HttpResponse> {
    let user_id = path.into_inner();
    auth.require_self_or_admin(&user_id)?;

    let mut filter = Filter::new().eq("relatedUser", user_id.as_str());
    if query.unread == Some(true) {
        filter = filter.eq("read", false);
    }
    let activities: Repository<Activity> = data.repo();
    let items = activities.list(&filter, Some(Sort::desc("createdAt"))).await?;
    Ok(HttpResponse::Ok().json(items))
}

/// GET /notifications/{user_id}/unread-count
pub async fn get_unread_count(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let user_id = path.into_inner();
    auth.require_self_or_admin(&user_id)?;
    let count = unread_count(&data, &user_id).await?;
    Ok(HttpResponse::Ok().json(json!({ "count": count })))
}

/// PATCH /notifications/{id}/read
pub async fn mark_read(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let id = path.into_inner();
    let activities: Repository<Activity> = data.repo();
    let activity = activities
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("Bildirim bulunamadı"))?;
    if let Some(owner) = activity.related_user.as_deref() {
        auth.require_self_or_admin(owner)?;
    } else {
        auth.require_admin()?;
    }
    activities.update_fields(&id, doc! { "read": true }).await?;
    Ok(HttpResponse::Ok().json(Activity { read: true, ..activity }))
}

/// PATCH /notifications/{user_id}/read-all
pub async fn mark_all_read(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let user_id = path.into_inner();
    auth.require_self_or_admin(&user_id)?;
    let activities: Repository<Activity> = data.repo();
    let updated = activities
        .update_many(
            &Filter::new().eq("relatedUser", user_id.as_str()).eq("read", false),
            doc! { "read": true },
        )
        .await?;
    info!("Marked {} notifications read for {}", updated, user_id);
    Ok(HttpResponse::Ok().json(json!({ "updated": updated })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::testing::memory_state;
    use crate::auth::testing::bearer;
    use crate::auth::Authentication;
    use crate::models::Role;
    use actix_web::{http::StatusCode, test, App};

    #[actix_web::test]
    async fn record_notifies_related_user_but_not_actor() {
        let (state, notifier) = memory_state();
        record(&state, NewActivity::new("ayse", ActivityKind::Task, "Yeni görev").for_user("mehmet"))
            .await
            .unwrap();
        record(&state, NewActivity::new("ayse", ActivityKind::System, "Kendine not").for_user("ayse"))
            .await
            .unwrap();
        assert_eq!(notifier.names_for("mehmet"), vec![NOTIFICATION.to_string()]);
        assert!(notifier.events_for("ayse").is_empty());
        assert_eq!(unread_count(&state, "mehmet").await.unwrap(), 1);
    }

    #[actix_web::test]
    async fn feed_is_private_and_read_all_clears_it() {
        let (state, _) = memory_state();
        for i in 0..3 {
            record(&state, NewActivity::new("ayse", ActivityKind::Task, format!("#{}", i)).for_user("mehmet"))
                .await
                .unwrap();
        }
        let app = test::init_service(
            App::new()
                .wrap(Authentication::new("test-secret".into()))
                .app_data(web::Data::new(state.clone()))
                .service(
                    web::scope("/notifications")
                        .route("/{user_id}", web::get().to(list_notifications))
                        .route("/{user_id}/read-all", web::patch().to(mark_all_read)),
                ),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/notifications/mehmet")
            .insert_header(bearer("zeynep", Role::Kullanici))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::patch()
            .uri("/notifications/mehmet/read-all")
            .insert_header(bearer("mehmet", Role::Kullanici))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
        assert_eq!(unread_count(&state, "mehmet").await.unwrap(), 0);

        let req = test::TestRequest::get()
            .uri("/notifications/mehmet")
            .insert_header(bearer("mehmet", Role::Kullanici))
            .to_request();
        let items: Vec<Activity> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|a| a.read));
    }

    #[actix_web::test]
    async fn feed_is_newest_first_within_the_same_second() {
        use chrono::TimeZone;

        let (state, _) = memory_state();
        let activities: Repository<Activity> = state.repo();
        let whole = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        for (id, at) in [("early", whole), ("late", whole + chrono::Duration::milliseconds(500))] {
            activities
                .insert(&Activity {
                    id: id.into(),
                    user_id: "ayse".into(),
                    kind: ActivityKind::Task,
                    message: id.into(),
                    related_user: Some("mehmet".into()),
                    related_task: None,
                    related_ticket: None,
                    read: false,
                    created_at: at,
                })
                .await
                .unwrap();
        }

        let feed = activities
            .list(&Filter::new().eq("relatedUser", "mehmet"), Some(Sort::desc("createdAt")))
            .await
            .unwrap();
        let ids: Vec<&str> = feed.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["late", "early"]);

        let shown = serde_json::to_value(&feed[0]).unwrap();
        assert_eq!(shown["type"], "task");
        assert!(shown.get("kind").is_none());
    }
}
