// src/dashboard_data.rs

use actix_web::{web, HttpResponse};
use chrono::Utc;
use mongodb::bson::Bson;
use serde_json::{json, Map, Value};

use crate::activity::unread_count;
use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::calendar::CalendarEvent;
use crate::chat::unread_total;
use crate::customer::{expiring_contracts, Customer};
use crate::error::ApiResult;
use crate::models::{Priority, Task, TaskStatus};
use crate::store::{date_value, Filter, Repository, Sort};
use crate::ticket::{Ticket, TicketKind, TicketStatus};

const EXPIRY_WINDOW_DAYS: i64 = 30;
const UPCOMING_EVENTS: usize = 5;

fn open_statuses() -> Vec<Bson> {
    [TicketStatus::Open, TicketStatus::InProgress, TicketStatus::Waiting]
        .iter()
        .map(|s| Bson::from(s.as_str()))
        .collect()
}

async fn customer_section(state: &AppState) -> ApiResult<Value> {
    let customers: Repository<Customer> = state.repo();
    let today = Utc::now().date_naive();
    let expiring = expiring_contracts(state, today, EXPIRY_WINDOW_DAYS).await?;
    Ok(json!({
        "total": customers.count(&Filter::new()).await?,
        "withMaintenanceContract": customers.count(&Filter::new().eq("hasMaintenanceContract", true)).await?,
        "withServiceContract": customers.count(&Filter::new().eq("hasServiceContract", true)).await?,
        "expiringContracts": expiring.len(),
        "expiring": expiring,
    }))
}

async fn ticket_section(state: &AppState) -> ApiResult<Value> {
    let tickets: Repository<Ticket> = state.repo();

    // open tickets per kind
    let mut per_kind = Map::new();
    for kind in TicketKind::ALL {
        let filter = Filter::new().eq("kind", kind.as_str()).any_of("status", open_statuses());
        per_kind.insert(kind.as_str().to_string(), json!(tickets.count(&filter).await?));
    }

    // priority distribution of everything still open
    let mut per_priority = Map::new();
    for priority in [Priority::Low, Priority::Medium, Priority::High, Priority::Urgent] {
        let filter = Filter::new()
            .any_of("status", open_statuses())
            .eq("priority", priority.as_str());
        per_priority.insert(priority.as_str().to_string(), json!(tickets.count(&filter).await?));
    }
    Ok(json!({ "openByKind": per_kind, "openByPriority": per_priority }))
}

async fn task_section(state: &AppState, user_id: &str) -> ApiResult<Value> {
    let tasks: Repository<Task> = state.repo();
    let mut per_status = Map::new();
    for status in TaskStatus::ALL {
        let filter = Filter::new().eq("status", status.as_str());
        per_status.insert(status.as_str().to_string(), json!(tasks.count(&filter).await?));
    }
    let awaiting_approval = tasks
        .count(
            &Filter::new()
                .eq("assignedBy", user_id)
                .eq("status", TaskStatus::PendingApproval.as_str()),
        )
        .await?;
    let workload: Vec<Bson> = [TaskStatus::Pending, TaskStatus::InProgress, TaskStatus::Rejected]
        .iter()
        .map(|s| Bson::from(s.as_str()))
        .collect();
    let assigned_to_me = tasks
        .count(&Filter::new().eq("assignedTo", user_id).any_of("status", workload))
        .await?;
    Ok(json!({
        "byStatus": per_status,
        "assignedToMe": assigned_to_me,
        "awaitingMyApproval": awaiting_approval,
    }))
}

async fn upcoming_events(state: &AppState, user_id: &str) -> ApiResult<Vec<CalendarEvent>> {
    let events: Repository<CalendarEvent> = state.repo();
    Ok(events
        .list(
            &Filter::new().eq("participants", user_id).gte("start", date_value(&Utc::now())),
            Some(Sort::asc("start")),
        )
        .await?
        .into_iter()
        .take(UPCOMING_EVENTS)
        .collect())
}

/// Builds the summary shown on the home screen for `user_id`.
pub async fn compute_dashboard(state: &AppState, user_id: &str) -> ApiResult<Value> {
    let (customers, tickets, tasks, upcoming, notifications, messages) = tokio::try_join!(
        customer_section(state),
        ticket_section(state),
        task_section(state, user_id),
        upcoming_events(state, user_id),
        unread_count(state, user_id),
        unread_total(state, user_id),
    )?;

    Ok(json!({
        "customers": customers,
        "tickets": tickets,
        "tasks": tasks,
        "upcomingEvents": upcoming,
        "unreadNotifications": notifications,
        "unreadMessages": messages,
    }))
}

/// GET /dashboard
pub async fn get_dashboard_data(
    auth: AuthUser,
    state: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let summary = compute_dashboard(&state, &auth.id).await?;
    Ok(HttpResponse::Ok().json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::testing::memory_state;
    use crate::ticket::{open_ticket, CreateTicketRequest};

    fn ticket_request(title: &str, priority: Priority) -> CreateTicketRequest {
        CreateTicketRequest {
            title: title.into(),
            description: None,
            customer_id: None,
            priority: Some(priority),
            technician_ids: Vec::new(),
            location: None,
            cost: None,
            scheduled_date: None,
            notes: None,
        }
    }

    #[actix_web::test]
    async fn counts_open_tickets_per_kind() {
        let (state, _) = memory_state();
        open_ticket(&state, TicketKind::Issue, "ayse", ticket_request("A", Priority::High)).await.unwrap();
        open_ticket(&state, TicketKind::Issue, "ayse", ticket_request("B", Priority::Low)).await.unwrap();
        let mut closed = open_ticket(&state, TicketKind::Remote, "ayse", ticket_request("C", Priority::High))
            .await
            .unwrap();
        let tickets: Repository<Ticket> = state.repo();
        closed.set_status(TicketStatus::Closed, Utc::now());
        tickets.save(&closed).await.unwrap();

        let summary = compute_dashboard(&state, "ayse").await.unwrap();
        assert_eq!(summary["tickets"]["openByKind"]["issue"], 2);
        assert_eq!(summary["tickets"]["openByKind"]["remote"], 0);
        assert_eq!(summary["tickets"]["openByPriority"]["high"], 1);
        assert_eq!(summary["customers"]["total"], 0);
        assert_eq!(summary["tasks"]["byStatus"]["pending"], 0);
        assert_eq!(summary["unreadMessages"], 0);
    }
}
