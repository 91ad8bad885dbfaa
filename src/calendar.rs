use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::activity::{record_quietly, ActivityKind, NewActivity};
use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::models::new_id;
use crate::notifier::{ServerEvent, CALENDAR_INVITE};
use crate::store::{date_value, Entity, Filter, Repository, Sort};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    #[serde(rename = "_id")]
    pub id: String,
    pub created_by: String,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    #[serde(with = "crate::store::timestamp")]
    pub start: DateTime<Utc>,
    #[serde(with = "crate::store::timestamp")]
    pub end: DateTime<Utc>,
    /// Always includes the creator.
    pub participants: Vec<String>,
    #[serde(with = "crate::store::timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Entity for CalendarEvent {
    const COLLECTION: &'static str = "calendar_events";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub participants: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// POST /calendar
pub async fn create_event(
    auth: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<CreateEventRequest>,
) -> ApiResult<HttpResponse> {
    let payload = payload.into_inner();
    let title = payload.title.trim().to_string();
    if title.is_empty() {
        return Err(ApiError::validation("Etkinlik başlığı zorunludur"));
    }
    if payload.end < payload.start {
        return Err(ApiError::validation("Bitiş zamanı başlangıçtan önce olamaz"));
    }
    if payload.participants.iter().any(|p| p.trim().is_empty()) {
        return Err(ApiError::validation("Geçersiz katılımcı"));
    }

    let mut participants = vec![auth.id.clone()];
    for p in payload.participants {
        if !participants.contains(&p) {
            participants.push(p);
        }
    }
    let event = CalendarEvent {
        id: new_id(),
        created_by: auth.id.clone(),
        title,
        description: payload.description,
        location: payload.location,
        start: payload.start,
        end: payload.end,
        participants,
        created_at: Utc::now(),
    };
    let events: Repository<CalendarEvent> = data.repo();
    events.insert(&event).await?;
    info!("Calendar event {} created by {}", event.id, auth.id);

    let invite = json!({
        "eventId": event.id,
        "title": event.title,
        "start": event.start,
        "end": event.end,
        "from": auth.id,
    });
    for participant in event.participants.iter().filter(|p| **p != auth.id) {
        data.notifier.emit(participant, ServerEvent::new(CALENDAR_INVITE, invite.clone()));
        record_quietly(
            &data,
            NewActivity::new(&auth.id, ActivityKind::Calendar, format!("Etkinlik daveti: {}", event.title))
                .for_user(participant),
        )
        .await;
    }
    Ok(HttpResponse::Created().json(event))
}

/// GET /calendar/{user_id}?from=&to=
pub async fn get_user_events(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<RangeQuery>,
) -> ApiResult<HttpResponse> {
    let user_id = path.into_inner();
    auth.require_self_or_admin(&user_id)?;

    let mut filter = Filter::new().eq("participants", user_id.as_str());
    if let Some(from) = &query.from {
        filter = filter.gte("end", date_value(from));
    }
    if let Some(to) = &query.to {
        filter = filter.lte("start", date_value(to));
    }
    let events: Repository<CalendarEvent> = data.repo();
    let list = events.list(&filter, Some(Sort::asc("start"))).await?;
    Ok(HttpResponse::Ok().json(list))
}

/// DELETE /calendar/events/{id}
pub async fn delete_event(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let events: Repository<CalendarEvent> = data.repo();
    let event = events
        .get(&path.into_inner())
        .await?
        .ok_or_else(|| ApiError::not_found("Etkinlik bulunamadı"))?;
    auth.require_self_or_admin(&event.created_by)?;
    events.delete(&event.id).await?;
    Ok(HttpResponse::Ok().json(json!({ "message": "Etkinlik silindi" })))
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
    async fn invites_go_to_participants_and_range_is_checked() {
        let (state, notifier) = memory_state();
        let app = test::init_service(
            App::new()
                .wrap(Authentication::new("test-secret".into()))
                .app_data(web::Data::new(state.clone()))
                .route("/calendar", web::post().to(create_event))
                .route("/calendar/{user_id}", web::get().to(get_user_events)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/calendar")
            .insert_header(bearer("ayse", Role::Kullanici))
            .set_json(json!({
                "title": "Bakım planı",
                "start": "2026-11-02T10:00:00Z",
                "end": "2026-11-02T09:00:00Z",
            }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        for (title, start, end) in [
            ("Bakım planı", "2026-11-02T09:00:00Z", "2026-11-02T10:00:00Z"),
            ("Müşteri ziyareti", "2026-12-10T13:00:00Z", "2026-12-10T15:00:00Z"),
        ] {
            let req = test::TestRequest::post()
                .uri("/calendar")
                .insert_header(bearer("ayse", Role::Kullanici))
                .set_json(json!({ "title": title, "start": start, "end": end,
                                  "participants": ["mehmet", "ayse"] }))
                .to_request();
            let event: CalendarEvent = test::call_and_read_body_json(&app, req).await;
            assert_eq!(event.participants, vec!["ayse".to_string(), "mehmet".to_string()]);
        }

        assert_eq!(notifier.events_for("mehmet").iter().filter(|e| e.event == CALENDAR_INVITE).count(), 2);
        assert!(notifier.events_for("ayse").is_empty());

        let req = test::TestRequest::get()
            .uri("/calendar/mehmet?to=2026-11-30T00:00:00Z")
            .insert_header(bearer("mehmet", Role::Kullanici))
            .to_request();
        let list: Vec<CalendarEvent> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].title, "Bakım planı");
    }
}
