//! Multi-step business processes (onboarding a customer, an installation
//! project, ...). Progress and status are derived from the steps on every
//! change and stored for filtering.

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::models::new_id;
use crate::store::{Entity, Filter, Repository, Sort};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Active,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStep {
    pub title: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, with = "crate::store::timestamp::option")]
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub customer_id: Option<String>,
    pub steps: Vec<ProcessStep>,
    /// 0..=100
    pub progress: u8,
    pub status: ProcessStatus,
    pub created_by: String,
    #[serde(with = "crate::store::timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "crate::store::timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Entity for Process {
    const COLLECTION: &'static str = "processes";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Process {
    fn refresh(&mut self) {
        let done = self.steps.iter().filter(|s| s.done).count();
        self.progress = if self.steps.is_empty() {
            0
        } else {
            ((done * 100) / self.steps.len()) as u8
        };
        self.status = if !self.steps.is_empty() && done == self.steps.len() {
            ProcessStatus::Completed
        } else {
            ProcessStatus::Active
        };
    }

    /// Flips step `index`. Returns false when there is no such step.
    pub fn toggle_step(&mut self, index: usize, user_id: &str, now: DateTime<Utc>) -> bool {
        let Some(step) = self.steps.get_mut(index) else {
            return false;
        };
        step.done = !step.done;
        if step.done {
            step.completed_at = Some(now);
            step.completed_by = Some(user_id.to_string());
        } else {
            step.completed_at = None;
            step.completed_by = None;
        }
        self.updated_at = now;
        self.refresh();
        true
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPayload {
    pub name: String,
    pub description: Option<String>,
    pub customer_id: Option<String>,
    #[serde(default)]
    pub steps: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessQuery {
    pub status: Option<ProcessStatus>,
    pub customer_id: Option<String>,
}

fn status_str(status: ProcessStatus) -> &'static str {
    match status {
        ProcessStatus::Active => "active",
        ProcessStatus::Completed => "completed",
    }
}

async fn find_process(processes: &Repository<Process>, id: &str) -> ApiResult<Process> {
    processes
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Süreç bulunamadı"))
}

/// Rebuilds steps from titles, keeping completion of steps whose title is
/// unchanged. Each old step is matched at most once, in order.
fn merge_steps(old: &[ProcessStep], titles: Vec<String>) -> ApiResult<Vec<ProcessStep>> {
    let mut unused: Vec<Option<&ProcessStep>> = old.iter().map(Some).collect();
    titles
        .into_iter()
        .map(|title| {
            let title = title.trim().to_string();
            if title.is_empty() {
                return Err(ApiError::validation("Adım başlığı boş olamaz"));
            }
            let previous = unused
                .iter_mut()
                .find(|slot| slot.map_or(false, |s| s.title == title))
                .and_then(Option::take);
            Ok(previous
                .cloned()
                .unwrap_or(ProcessStep { title, done: false, completed_at: None, completed_by: None }))
        })
        .collect()
}

/// GET /processes
pub async fn list_processes(
    _auth: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<ProcessQuery>,
) -> ApiResult<HttpResponse> {
    let query = query.into_inner();
    let filter = Filter::new()
        .eq_opt("status", query.status.map(status_str))
        .eq_opt("customerId", query.customer_id);
    let processes: Repository<Process> = data.repo();
    Ok(HttpResponse::Ok().json(processes.list(&filter, Some(Sort::desc("updatedAt"))).await?))
}

/// GET /processes/{id}
pub async fn get_process(
    _auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let processes: Repository<Process> = data.repo();
    Ok(HttpResponse::Ok().json(find_process(&processes, &path.into_inner()).await?))
}

/// POST /processes
pub async fn create_process(
    auth: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<ProcessPayload>,
) -> ApiResult<HttpResponse> {
    let payload = payload.into_inner();
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::validation("Süreç adı zorunludur"));
    }
    let now = Utc::now();
    let mut process = Process {
        id: new_id(),
        name,
        description: payload.description,
        customer_id: payload.customer_id,
        steps: merge_steps(&[], payload.steps)?,
        progress: 0,
        status: ProcessStatus::Active,
        created_by: auth.id.clone(),
        created_at: now,
        updated_at: now,
    };
    process.refresh();
    let processes: Repository<Process> = data.repo();
    processes.insert(&process).await?;
    Ok(HttpResponse::Created().json(process))
}

/// PUT /processes/{id}
pub async fn update_process(
    _auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<ProcessPayload>,
) -> ApiResult<HttpResponse> {
    let processes: Repository<Process> = data.repo();
    let mut process = find_process(&processes, &path.into_inner()).await?;
    let payload = payload.into_inner();
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::validation("Süreç adı zorunludur"));
    }
    process.name = name;
    process.description = payload.description;
    process.customer_id = payload.customer_id;
    process.steps = merge_steps(&process.steps, payload.steps)?;
    process.updated_at = Utc::now();
    process.refresh();
    processes.save(&process).await?;
    Ok(HttpResponse::Ok().json(process))
}

/// PATCH /processes/{id}/steps/{index}
pub async fn toggle_process_step(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<(String, usize)>,
) -> ApiResult<HttpResponse> {
    let (id, index) = path.into_inner();
    let processes: Repository<Process> = data.repo();
    let mut process = find_process(&processes, &id).await?;
    if !process.toggle_step(index, &auth.id, Utc::now()) {
        return Err(ApiError::not_found("Adım bulunamadı"));
    }
    processes.save(&process).await?;
    Ok(HttpResponse::Ok().json(process))
}

/// DELETE /processes/{id}
pub async fn delete_process(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let processes: Repository<Process> = data.repo();
    let process = find_process(&processes, &path.into_inner()).await?;
    auth.require_self_or_admin(&process.created_by)?;
    processes.delete(&process.id).await?;
    Ok(HttpResponse::Ok().json(json!({ "message": "Süreç silindi" })))
}
