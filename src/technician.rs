use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::models::new_id;
use crate::store::{Entity, Filter, Repository, Sort};

/// Field technician. Not necessarily a system user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Technician {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub specialties: Vec<String>,
    pub region: Option<String>,
    #[serde(default = "active_default")]
    pub active: bool,
    #[serde(with = "crate::store::timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "crate::store::timestamp")]
    pub updated_at: DateTime<Utc>,
}

fn active_default() -> bool {
    true
}

impl Entity for Technician {
    const COLLECTION: &'static str = "technicians";

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Deserialize)]
pub struct TechnicianPayload {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub specialties: Vec<String>,
    pub region: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct TechnicianQuery {
    pub active: Option<bool>,
    pub specialty: Option<String>,
}

fn clean_name(name: &str) -> ApiResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::validation("Teknisyen adı zorunludur"));
    }
    Ok(name.to_string())
}

async fn find_technician(technicians: &Repository<Technician>, id: &str) -> ApiResult<Technician> {
    technicians
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Teknisyen bulunamadı"))
}

/// GET /technicians
pub async fn list_technicians(
    _auth: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<TechnicianQuery>,
) -> ApiResult<HttpResponse> {
    let query = query.into_inner();
    let filter = Filter::new()
        .eq_opt("active", query.active)
        .eq_opt("specialties", query.specialty);
    let technicians: Repository<Technician> = data.repo();
    let list = technicians.list(&filter, Some(Sort::asc("name"))).await?;
    Ok(HttpResponse::Ok().json(list))
}

/// GET /technicians/{id}
pub async fn get_technician(
    _auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let technicians: Repository<Technician> = data.repo();
    Ok(HttpResponse::Ok().json(find_technician(&technicians, &path.into_inner()).await?))
}

/// POST /technicians
pub async fn create_technician(
    _auth: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<TechnicianPayload>,
) -> ApiResult<HttpResponse> {
    let payload = payload.into_inner();
    let now = Utc::now();
    let technician = Technician {
        id: new_id(),
        name: clean_name(&payload.name)?,
        phone: payload.phone,
        email: payload.email,
        specialties: payload.specialties,
        region: payload.region,
        active: payload.active.unwrap_or(true),
        created_at: now,
        updated_at: now,
    };
    let technicians: Repository<Technician> = data.repo();
    technicians.insert(&technician).await?;
    Ok(HttpResponse::Created().json(technician))
}

/// PUT /technicians/{id}
pub async fn update_technician(
    _auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<TechnicianPayload>,
) -> ApiResult<HttpResponse> {
    let technicians: Repository<Technician> = data.repo();
    let existing = find_technician(&technicians, &path.into_inner()).await?;
    let payload = payload.into_inner();
    let technician = Technician {
        name: clean_name(&payload.name)?,
        phone: payload.phone,
        email: payload.email,
        specialties: payload.specialties,
        region: payload.region,
        active: payload.active.unwrap_or(existing.active),
        updated_at: Utc::now(),
        ..existing
    };
    technicians.save(&technician).await?;
    Ok(HttpResponse::Ok().json(technician))
}

/// DELETE /technicians/{id}
pub async fn delete_technician(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    auth.require_admin()?;
    let technicians: Repository<Technician> = data.repo();
    if !technicians.delete(&path.into_inner()).await? {
        return Err(ApiError::not_found("Teknisyen bulunamadı"));
    }
    Ok(HttpResponse::Ok().json(json!({ "message": "Teknisyen silindi" })))
}
