use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use log::info;
use serde::Deserialize;
use serde_json::json;

use crate::activity::{record_quietly, ActivityKind, NewActivity};
use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::models::task::Transition;
use crate::models::{new_id, Priority, Task, TaskStatus, TransitionError, User};
use crate::notifier::{
    ServerEvent, NEW_TASK_ASSIGNED, NUDGE_NOTIFICATION, TASK_APPROVED, TASK_NEEDS_APPROVAL,
    TASK_REJECTED, TASK_STATUS_UPDATED,
};
use crate::store::{Filter, Repository, Sort};

impl From<TransitionError> for ApiError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::Forbidden => ApiError::Forbidden(e.to_string()),
            TransitionError::NotAllowed { .. } | TransitionError::MissingReason => {
                ApiError::Validation(e.to_string())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub assigned_to: Option<String>,
    pub customer_id: Option<String>,
    pub priority: Option<Priority>,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub customer_id: Option<String>,
    pub priority: Option<Priority>,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQuery {
    pub assigned_to: Option<String>,
    pub assigned_by: Option<String>,
    pub status: Option<TaskStatus>,
}

#[derive(Debug, Deserialize)]
pub struct StatusChange {
    pub status: TaskStatus,
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NudgeRequest {
    pub message: Option<String>,
    pub sound: Option<bool>,
}

fn task_json(task: &Task) -> ApiResult<serde_json::Value> {
    serde_json::to_value(task).map_err(|e| ApiError::Internal(e.to_string()))
}

async fn find_task(tasks: &Repository<Task>, id: &str) -> ApiResult<Task> {
    tasks
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Görev bulunamadı"))
}

fn require_manager(task: &Task, auth: &AuthUser) -> ApiResult<()> {
    if task.assigned_by == auth.id || auth.is_admin() {
        Ok(())
    } else {
        Err(ApiError::forbidden("Bu görevi yalnızca atayan kişi değiştirebilir"))
    }
}

/// POST /tasks
pub async fn create_task(
    auth: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<CreateTaskRequest>,
) -> ApiResult<HttpResponse> {
    let payload = payload.into_inner();
    let title = payload.title.trim().to_string();
    if title.is_empty() {
        return Err(ApiError::validation("Görev başlığı zorunludur"));
    }
    let assignee = payload
        .assigned_to
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .ok_or_else(|| ApiError::validation("Görevin atanacağı kullanıcı seçilmelidir"))?;

    let users: Repository<User> = data.repo();
    if users.get(&assignee).await?.is_none() {
        return Err(ApiError::validation("Atanan kullanıcı bulunamadı"));
    }

    let now = Utc::now();
    let task = Task {
        id: new_id(),
        title,
        description: payload.description,
        assigned_to: assignee,
        assigned_by: auth.id.clone(),
        customer_id: payload.customer_id,
        priority: payload.priority.unwrap_or_default(),
        due_date: payload.due_date,
        status: TaskStatus::Pending,
        started_at: None,
        submitted_at: None,
        approved_by: None,
        approved_at: None,
        rejection_reason: None,
        completed_at: None,
        cancelled_at: None,
        created_at: now,
        updated_at: now,
    };
    let tasks: Repository<Task> = data.repo();
    tasks.insert(&task).await?;
    info!("Task {} assigned to {} by {}", task.id, task.assigned_to, task.assigned_by);

    data.notifier
        .emit(&task.assigned_to, ServerEvent::new(NEW_TASK_ASSIGNED, task_json(&task)?));
    record_quietly(
        &data,
        NewActivity::new(&auth.id, ActivityKind::Task, format!("Yeni görev atandı: {}", task.title))
            .for_user(&task.assigned_to)
            .task(&task.id),
    )
    .await;

    Ok(HttpResponse::Created().json(task))
}

/// GET /tasks
pub async fn list_tasks(
    _auth: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<TaskQuery>,
) -> ApiResult<HttpResponse> {
    let query = query.into_inner();
    let filter = Filter::new()
        .eq_opt("assignedTo", query.assigned_to)
        .eq_opt("assignedBy", query.assigned_by)
        .eq_opt("status", query.status.map(TaskStatus::as_str));
    let tasks: Repository<Task> = data.repo();
    let list = tasks.list(&filter, Some(Sort::desc("createdAt"))).await?;
    Ok(HttpResponse::Ok().json(list))
}

/// GET /tasks/{id}
pub async fn get_task(
    _auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let tasks: Repository<Task> = data.repo();
    let task = find_task(&tasks, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(task))
}

/// PUT /tasks/{id}. Content only; status goes through `update_task_status`.
pub async fn update_task(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateTaskRequest>,
) -> ApiResult<HttpResponse> {
    let tasks: Repository<Task> = data.repo();
    let mut task = find_task(&tasks, &path.into_inner()).await?;
    require_manager(&task, &auth)?;
    if task.status.is_terminal() {
        return Err(ApiError::validation("Kapanmış bir görev düzenlenemez"));
    }

    let payload = payload.into_inner();
    if let Some(title) = payload.title {
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(ApiError::validation("Görev başlığı zorunludur"));
        }
        task.title = title;
    }
    if payload.description.is_some() {
        task.description = payload.description;
    }
    if payload.customer_id.is_some() {
        task.customer_id = payload.customer_id;
    }
    if let Some(priority) = payload.priority {
        task.priority = priority;
    }
    if payload.due_date.is_some() {
        task.due_date = payload.due_date;
    }
    task.updated_at = Utc::now();
    tasks.save(&task).await?;
    Ok(HttpResponse::Ok().json(task))
}

/// Events for a status change made by `actor_id`.
fn status_events(task: &Task, actor_id: &str) -> ApiResult<Vec<(String, ServerEvent)>> {
    let payload = task_json(task)?;
    let mut events = Vec::new();
    match task.status {
        TaskStatus::PendingApproval => events.push((
            task.assigned_by.clone(),
            ServerEvent::new(TASK_NEEDS_APPROVAL, payload.clone()),
        )),
        TaskStatus::Completed => events.push((
            task.assigned_to.clone(),
            ServerEvent::new(TASK_APPROVED, payload.clone()),
        )),
        TaskStatus::Rejected => events.push((
            task.assigned_to.clone(),
            ServerEvent::new(TASK_REJECTED, payload.clone()),
        )),
        _ => {}
    }
    let mut parties = vec![task.assigned_to.as_str(), task.assigned_by.as_str()];
    parties.dedup();
    for party in parties.into_iter().filter(|p| *p != actor_id) {
        events.push((party.to_string(), ServerEvent::new(TASK_STATUS_UPDATED, payload.clone())));
    }
    Ok(events)
}

/// PATCH /tasks/{id}/status
pub async fn update_task_status(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<StatusChange>,
) -> ApiResult<HttpResponse> {
    let tasks: Repository<Task> = data.repo();
    let mut task = find_task(&tasks, &path.into_inner()).await?;
    let change = payload.into_inner();
    let actor = task.actor(&auth.id, auth.is_admin());

    let from = task.status;
    if task.transition(change.status, &auth.id, actor, change.reason, Utc::now())? == Transition::Unchanged {
        return Ok(HttpResponse::Ok().json(task));
    }
    tasks.save(&task).await?;
    info!("Task {} moved {} -> {} by {}", task.id, from.as_str(), task.status.as_str(), auth.id);

    for (user_id, event) in status_events(&task, &auth.id)? {
        data.notifier.emit(&user_id, event);
    }
    let other = if auth.id == task.assigned_to { &task.assigned_by } else { &task.assigned_to };
    record_quietly(
        &data,
        NewActivity::new(
            &auth.id,
            ActivityKind::Task,
            format!("'{}' görevinin durumu '{}' oldu", task.title, task.status.as_str()),
        )
        .for_user(other)
        .task(&task.id),
    )
    .await;

    Ok(HttpResponse::Ok().json(task))
}

/// DELETE /tasks/{id}
pub async fn delete_task(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let tasks: Repository<Task> = data.repo();
    let task = find_task(&tasks, &path.into_inner()).await?;
    require_manager(&task, &auth)?;
    tasks.delete(&task.id).await?;
    info!("Task {} deleted by {}", task.id, auth.id);
    Ok(HttpResponse::Ok().json(json!({ "message": "Görev silindi" })))
}

/// POST /tasks/{id}/nudge
pub async fn nudge_task(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: Option<web::Json<NudgeRequest>>,
) -> ApiResult<HttpResponse> {
    let tasks: Repository<Task> = data.repo();
    let task = find_task(&tasks, &path.into_inner()).await?;
    require_manager(&task, &auth)?;
    if task.status.is_terminal() {
        return Err(ApiError::validation("Kapanmış bir görev için hatırlatma gönderilemez"));
    }

    let nudge = payload.map(web::Json::into_inner).unwrap_or_default();
    let message = nudge
        .message
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("'{}' görevi için hatırlatma", task.title));

    data.notifier.emit(
        &task.assigned_to,
        ServerEvent::new(
            NUDGE_NOTIFICATION,
            json!({
                "taskId": task.id,
                "title": task.title,
                "message": message,
                "sound": nudge.sound.unwrap_or(true),
                "from": auth.id,
            }),
        ),
    );
    record_quietly(
        &data,
        NewActivity::new(&auth.id, ActivityKind::Nudge, message)
            .for_user(&task.assigned_to)
            .task(&task.id),
    )
    .await;

    Ok(HttpResponse::Ok().json(json!({ "message": "Hatırlatma gönderildi" })))
}
