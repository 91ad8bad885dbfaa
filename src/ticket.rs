// src/ticket.rs

use actix_web::{web, HttpResponse, Scope};
use chrono::{DateTime, Datelike, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::activity::{record_quietly, ActivityKind, NewActivity};
use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::models::{new_id, Priority, User};
use crate::notifier::{ServerEvent, NEW_ISSUE_ASSIGNED};
use crate::store::{Entity, Filter, Repository, Sort};

/// Every kind of field work shares one ticket shape and one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TicketKind {
    Issue,
    ServiceJob,
    SupportRequest,
    Onsite,
    Remote,
    Maintenance,
}

impl TicketKind {
    pub const ALL: [TicketKind; 6] = [
        TicketKind::Issue,
        TicketKind::ServiceJob,
        TicketKind::SupportRequest,
        TicketKind::Onsite,
        TicketKind::Remote,
        TicketKind::Maintenance,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TicketKind::Issue => "issue",
            TicketKind::ServiceJob => "service-job",
            TicketKind::SupportRequest => "support-request",
            TicketKind::Onsite => "onsite",
            TicketKind::Remote => "remote",
            TicketKind::Maintenance => "maintenance",
        }
    }

    /// Prefix of the human-readable ticket number.
    pub fn prefix(self) -> &'static str {
        match self {
            TicketKind::Issue => "ARZ",
            TicketKind::ServiceJob => "SRV",
            TicketKind::SupportRequest => "DST",
            TicketKind::Onsite => "YRD",
            TicketKind::Remote => "UZK",
            TicketKind::Maintenance => "BKM",
        }
    }

    /// Route prefix the kind is mounted under.
    pub fn path(self) -> &'static str {
        match self {
            TicketKind::Issue => "/issues",
            TicketKind::ServiceJob => "/support/service-jobs",
            TicketKind::SupportRequest => "/support/requests",
            TicketKind::Onsite => "/support/onsite",
            TicketKind::Remote => "/support/remote",
            TicketKind::Maintenance => "/support/maintenance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Waiting,
    Resolved,
    Closed,
    Cancelled,
}

impl TicketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in-progress",
            TicketStatus::Waiting => "waiting",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
            TicketStatus::Cancelled => "cancelled",
        }
    }

    /// Still needs someone to act on it.
    pub fn is_open(self) -> bool {
        matches!(self, TicketStatus::Open | TicketStatus::InProgress | TicketStatus::Waiting)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub address: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cost {
    #[serde(default)]
    pub labor: f64,
    #[serde(default)]
    pub parts: f64,
    #[serde(default)]
    pub travel: f64,
    /// Always `labor + parts + travel`; client values are ignored.
    #[serde(default)]
    pub total: f64,
}

impl Cost {
    fn normalized(self) -> ApiResult<Self> {
        if self.labor < 0.0 || self.parts < 0.0 || self.travel < 0.0 {
            return Err(ApiError::validation("Maliyet kalemleri negatif olamaz"));
        }
        Ok(Cost { total: self.labor + self.parts + self.travel, ..self })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    #[serde(rename = "_id")]
    pub id: String,
    pub kind: TicketKind,
    /// `<PREFIX>-<year>-<seq>`, e.g. `SRV-2026-0042`.
    pub number: String,
    pub title: String,
    pub description: Option<String>,
    pub customer_id: Option<String>,
    pub status: TicketStatus,
    pub priority: Priority,
    #[serde(default)]
    pub assigned_to: Vec<String>,
    #[serde(default)]
    pub technician_ids: Vec<String>,
    pub location: Option<Location>,
    #[serde(default)]
    pub cost: Cost,
    #[serde(default, with = "crate::store::timestamp::option")]
    pub scheduled_date: Option<DateTime<Utc>>,
    #[serde(default, with = "crate::store::timestamp::option")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, with = "crate::store::timestamp::option")]
    pub closed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_by: String,
    #[serde(with = "crate::store::timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "crate::store::timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Entity for Ticket {
    const COLLECTION: &'static str = "tickets";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Ticket {
    /// Changes status. `resolvedAt` and `closedAt` keep their first stamp.
    pub fn set_status(&mut self, status: TicketStatus, now: DateTime<Utc>) {
        match status {
            TicketStatus::Resolved => {
                self.resolved_at.get_or_insert(now);
            }
            TicketStatus::Closed => {
                self.closed_at.get_or_insert(now);
            }
            _ => {}
        }
        self.status = status;
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTicketRequest {
    pub title: String,
    pub description: Option<String>,
    pub customer_id: Option<String>,
    pub priority: Option<Priority>,
    #[serde(default)]
    pub technician_ids: Vec<String>,
    pub location: Option<Location>,
    pub cost: Option<Cost>,
    pub scheduled_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTicketRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub customer_id: Option<String>,
    pub status: Option<TicketStatus>,
    pub priority: Option<Priority>,
    pub technician_ids: Option<Vec<String>>,
    pub location: Option<Location>,
    pub cost: Option<Cost>,
    pub scheduled_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketQuery {
    pub status: Option<TicketStatus>,
    pub priority: Option<Priority>,
    pub customer_id: Option<String>,
    pub assigned_to: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    pub user_ids: Vec<String>,
}

/// Next number for `kind` in `year`. The counter is per kind and year.
pub async fn next_number(state: &AppState, kind: TicketKind, year: i32) -> ApiResult<String> {
    let seq = state
        .store
        .next_sequence(&format!("ticket-{}-{}", kind.prefix(), year))
        .await?;
    Ok(format!("{}-{}-{:04}", kind.prefix(), year, seq))
}

pub async fn open_ticket(
    state: &AppState,
    kind: TicketKind,
    actor_id: &str,
    request: CreateTicketRequest,
) -> ApiResult<Ticket> {
    let title = request.title.trim().to_string();
    if title.is_empty() {
        return Err(ApiError::validation("Başlık zorunludur"));
    }
    let cost = request.cost.unwrap_or_default().normalized()?;

    let now = Utc::now();
    let ticket = Ticket {
        id: new_id(),
        kind,
        number: next_number(state, kind, now.year()).await?,
        title,
        description: request.description,
        customer_id: request.customer_id,
        status: TicketStatus::Open,
        priority: request.priority.unwrap_or_default(),
        assigned_to: Vec::new(),
        technician_ids: request.technician_ids,
        location: request.location,
        cost,
        scheduled_date: request.scheduled_date,
        resolved_at: None,
        closed_at: None,
        notes: request.notes,
        created_by: actor_id.to_string(),
        created_at: now,
        updated_at: now,
    };
    let tickets: Repository<Ticket> = state.repo();
    tickets.insert(&ticket).await?;
    info!("{} {} opened by {}", kind.as_str(), ticket.number, actor_id);
    Ok(ticket)
}

async fn find_ticket(tickets: &Repository<Ticket>, kind: TicketKind, id: &str) -> ApiResult<Ticket> {
    tickets
        .find_one(&Filter::by_id(id).eq("kind", kind.as_str()))
        .await?
        .ok_or_else(|| ApiError::not_found("Kayıt bulunamadı"))
}

/// POST {kind}
pub async fn create_ticket(
    auth: AuthUser,
    data: web::Data<AppState>,
    kind: web::Data<TicketKind>,
    payload: web::Json<CreateTicketRequest>,
) -> ApiResult<HttpResponse> {
    let ticket = open_ticket(&data, **kind, &auth.id, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(ticket))
}

/// GET {kind}
pub async fn list_tickets(
    _auth: AuthUser,
    data: web::Data<AppState>,
    kind: web::Data<TicketKind>,
    query: web::Query<TicketQuery>,
) -> ApiResult<HttpResponse> {
    let query = query.into_inner();
    let filter = Filter::new()
        .eq("kind", kind.as_str())
        .eq_opt("status", query.status.map(TicketStatus::as_str))
        .eq_opt("priority", query.priority.map(Priority::as_str))
        .eq_opt("customerId", query.customer_id)
        .eq_opt("assignedTo", query.assigned_to);
    let tickets: Repository<Ticket> = data.repo();
    let list = tickets.list(&filter, Some(Sort::desc("createdAt"))).await?;
    Ok(HttpResponse::Ok().json(list))
}

/// GET {kind}/{id}
pub async fn get_ticket(
    _auth: AuthUser,
    data: web::Data<AppState>,
    kind: web::Data<TicketKind>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let tickets: Repository<Ticket> = data.repo();
    let ticket = find_ticket(&tickets, **kind, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ticket))
}

/// PUT {kind}/{id}
pub async fn update_ticket(
    _auth: AuthUser,
    data: web::Data<AppState>,
    kind: web::Data<TicketKind>,
    path: web::Path<String>,
    payload: web::Json<UpdateTicketRequest>,
) -> ApiResult<HttpResponse> {
    let tickets: Repository<Ticket> = data.repo();
    let mut ticket = find_ticket(&tickets, **kind, &path.into_inner()).await?;
    let payload = payload.into_inner();
    let now = Utc::now();

    if let Some(title) = payload.title {
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(ApiError::validation("Başlık zorunludur"));
        }
        ticket.title = title;
    }
    if let Some(cost) = payload.cost {
        ticket.cost = cost.normalized()?;
    }
    if payload.description.is_some() {
        ticket.description = payload.description;
    }
    if payload.customer_id.is_some() {
        ticket.customer_id = payload.customer_id;
    }
    if let Some(priority) = payload.priority {
        ticket.priority = priority;
    }
    if let Some(technicians) = payload.technician_ids {
        ticket.technician_ids = technicians;
    }
    if payload.location.is_some() {
        ticket.location = payload.location;
    }
    if payload.scheduled_date.is_some() {
        ticket.scheduled_date = payload.scheduled_date;
    }
    if payload.notes.is_some() {
        ticket.notes = payload.notes;
    }
    if let Some(status) = payload.status {
        ticket.set_status(status, now);
    }
    ticket.updated_at = now;
    tickets.save(&ticket).await?;
    Ok(HttpResponse::Ok().json(ticket))
}

/// DELETE {kind}/{id}
pub async fn delete_ticket(
    auth: AuthUser,
    data: web::Data<AppState>,
    kind: web::Data<TicketKind>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let tickets: Repository<Ticket> = data.repo();
    let ticket = find_ticket(&tickets, **kind, &path.into_inner()).await?;
    if ticket.created_by != auth.id {
        auth.require_admin()?;
    }
    tickets.delete(&ticket.id).await?;
    info!("{} deleted by {}", ticket.number, auth.id);
    Ok(HttpResponse::Ok().json(json!({ "message": "Kayıt silindi" })))
}

/// PATCH {kind}/{id}/assign. Replaces the assignee list; only users not
/// assigned before get notified.
pub async fn assign_ticket(
    auth: AuthUser,
    data: web::Data<AppState>,
    kind: web::Data<TicketKind>,
    path: web::Path<String>,
    payload: web::Json<AssignRequest>,
) -> ApiResult<HttpResponse> {
    let tickets: Repository<Ticket> = data.repo();
    let mut ticket = find_ticket(&tickets, **kind, &path.into_inner()).await?;

    let mut user_ids = payload.into_inner().user_ids;
    user_ids.sort();
    user_ids.dedup();
    let users: Repository<User> = data.repo();
    for user_id in &user_ids {
        if users.get(user_id).await?.is_none() {
            return Err(ApiError::validation(format!("Kullanıcı bulunamadı: {}", user_id)));
        }
    }

    let newly: Vec<String> = user_ids
        .iter()
        .filter(|u| !ticket.assigned_to.contains(u))
        .cloned()
        .collect();
    ticket.assigned_to = user_ids;
    ticket.updated_at = Utc::now();
    tickets.save(&ticket).await?;

    let payload = serde_json::to_value(&ticket).map_err(|e| ApiError::Internal(e.to_string()))?;
    for user_id in &newly {
        data.notifier.emit(user_id, ServerEvent::new(NEW_ISSUE_ASSIGNED, payload.clone()));
        record_quietly(
            &data,
            NewActivity::new(
                &auth.id,
                ActivityKind::Ticket,
                format!("{} size atandı: {}", ticket.number, ticket.title),
            )
            .for_user(user_id)
            .ticket(&ticket.id),
        )
        .await;
    }
    Ok(HttpResponse::Ok().json(ticket))
}

/// All routes of one ticket kind, mounted under its own prefix.
pub fn scope(kind: TicketKind) -> Scope {
    web::scope(kind.path())
        .app_data(web::Data::new(kind))
        .route("", web::post().to(create_ticket))
        .route("", web::get().to(list_tickets))
        .route("/{id}", web::get().to(get_ticket))
        .route("/{id}", web::put().to(update_ticket))
        .route("/{id}", web::delete().to(delete_ticket))
        .route("/{id}/assign", web::patch().to(assign_ticket))
}
