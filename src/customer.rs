use std::sync::OnceLock;

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::info;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::models::new_id;
use crate::store::{Entity, Filter, Repository, Sort};

/// A company we serve, keyed by its VKN.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    #[serde(rename = "_id")]
    pub id: String,
    pub company_name: String,
    /// Turkish tax number, exactly 10 digits.
    pub vkn: String,
    pub tax_office: Option<String>,
    pub contact_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub notes: Option<String>,

    #[serde(default)]
    pub has_maintenance_contract: bool,
    pub maintenance_start: Option<NaiveDate>,
    pub maintenance_end: Option<NaiveDate>,
    pub maintenance_value: Option<f64>,

    #[serde(default)]
    pub has_service_contract: bool,
    pub service_start: Option<NaiveDate>,
    pub service_end: Option<NaiveDate>,
    pub service_value: Option<f64>,

    pub created_by: String,
    #[serde(with = "crate::store::timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "crate::store::timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Entity for Customer {
    const COLLECTION: &'static str = "customers";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Body of POST and PUT.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerPayload {
    pub company_name: String,
    pub vkn: String,
    pub tax_office: Option<String>,
    pub contact_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub has_maintenance_contract: bool,
    pub maintenance_start: Option<NaiveDate>,
    pub maintenance_end: Option<NaiveDate>,
    pub maintenance_value: Option<f64>,
    #[serde(default)]
    pub has_service_contract: bool,
    pub service_start: Option<NaiveDate>,
    pub service_end: Option<NaiveDate>,
    pub service_value: Option<f64>,
}

pub fn is_valid_vkn(vkn: &str) -> bool {
    static VKN: OnceLock<Option<Regex>> = OnceLock::new();
    VKN.get_or_init(|| Regex::new(r"^[0-9]{10}$").ok())
        .as_ref()
        .map_or(false, |re| re.is_match(vkn))
}

fn check_range(label: &str, start: Option<NaiveDate>, end: Option<NaiveDate>) -> ApiResult<()> {
    match (start, end) {
        (Some(s), Some(e)) if e < s => Err(ApiError::validation(format!(
            "{} sözleşmesinin bitiş tarihi başlangıçtan önce olamaz",
            label
        ))),
        _ => Ok(()),
    }
}

impl CustomerPayload {
    pub fn validate(&self) -> ApiResult<()> {
        if self.company_name.trim().is_empty() {
            return Err(ApiError::validation("Firma adı zorunludur"));
        }
        if !is_valid_vkn(self.vkn.trim()) {
            return Err(ApiError::validation("VKN 10 haneli bir sayı olmalıdır"));
        }
        for value in [self.maintenance_value, self.service_value].into_iter().flatten() {
            if value < 0.0 {
                return Err(ApiError::validation("Sözleşme bedeli negatif olamaz"));
            }
        }
        if self.has_maintenance_contract {
            check_range("Bakım", self.maintenance_start, self.maintenance_end)?;
        }
        if self.has_service_contract {
            check_range("Servis", self.service_start, self.service_end)?;
        }
        Ok(())
    }

    fn into_customer(self, id: String, created_by: String, created_at: DateTime<Utc>) -> Customer {
        Customer {
            id,
            company_name: self.company_name.trim().to_string(),
            vkn: self.vkn.trim().to_string(),
            tax_office: self.tax_office,
            contact_name: self.contact_name,
            phone: self.phone,
            email: self.email,
            address: self.address,
            city: self.city,
            notes: self.notes,
            has_maintenance_contract: self.has_maintenance_contract,
            maintenance_start: self.maintenance_start,
            maintenance_end: self.maintenance_end,
            maintenance_value: self.maintenance_value,
            has_service_contract: self.has_service_contract,
            service_start: self.service_start,
            service_end: self.service_end,
            service_value: self.service_value,
            created_by,
            created_at,
            updated_at: Utc::now(),
        }
    }
}

async fn ensure_vkn_free(customers: &Repository<Customer>, vkn: &str, except: Option<&str>) -> ApiResult<()> {
    let mut filter = Filter::new().eq("vkn", vkn);
    if let Some(id) = except {
        filter = filter.ne("_id", id);
    }
    if customers.find_one(&filter).await?.is_some() {
        return Err(ApiError::Conflict("Bu VKN ile kayıtlı bir müşteri zaten var".to_string()));
    }
    Ok(())
}

pub async fn find_customer(state: &AppState, id: &str) -> ApiResult<Customer> {
    let customers: Repository<Customer> = state.repo();
    customers
        .get(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Müşteri bulunamadı"))
}

#[derive(Debug, Deserialize)]
pub struct CustomerQuery {
    pub search: Option<String>,
    /// `maintenance` or `service`
    pub contract: Option<String>,
}

/// GET /customers
pub async fn list_customers(
    _auth: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<CustomerQuery>,
) -> ApiResult<HttpResponse> {
    let mut filter = Filter::new();
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        filter = filter.search(&["companyName", "vkn", "contactName", "city"], search);
    }
    match query.contract.as_deref() {
        Some("maintenance") => filter = filter.eq("hasMaintenanceContract", true),
        Some("service") => filter = filter.eq("hasServiceContract", true),
        Some(other) => {
            return Err(ApiError::validation(format!("Geçersiz sözleşme türü: {}", other)))
        }
        None => {}
    }
    let customers: Repository<Customer> = data.repo();
    let list = customers.list(&filter, Some(Sort::asc("companyName"))).await?;
    Ok(HttpResponse::Ok().json(list))
}

/// GET /customers/{id}
pub async fn get_customer(
    _auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let customer = find_customer(&data, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(customer))
}

/// POST /customers
pub async fn create_customer(
    auth: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<CustomerPayload>,
) -> ApiResult<HttpResponse> {
    let payload = payload.into_inner();
    payload.validate()?;

    let customers: Repository<Customer> = data.repo();
    ensure_vkn_free(&customers, payload.vkn.trim(), None).await?;

    let customer = payload.into_customer(new_id(), auth.id.clone(), Utc::now());
    customers.insert(&customer).await?;
    info!("Customer created: {} ({})", customer.company_name, customer.vkn);
    Ok(HttpResponse::Created().json(customer))
}

/// PUT /customers/{id}
pub async fn update_customer(
    _auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<CustomerPayload>,
) -> ApiResult<HttpResponse> {
    let id = path.into_inner();
    let payload = payload.into_inner();
    payload.validate()?;

    let existing = find_customer(&data, &id).await?;
    let customers: Repository<Customer> = data.repo();
    ensure_vkn_free(&customers, payload.vkn.trim(), Some(&id)).await?;

    let customer = payload.into_customer(id, existing.created_by, existing.created_at);
    customers.save(&customer).await?;
    Ok(HttpResponse::Ok().json(customer))
}

/// DELETE /customers/{id}
pub async fn delete_customer(
    auth: AuthUser,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    auth.require_admin()?;
    let customers: Repository<Customer> = data.repo();
    if !customers.delete(&path.into_inner()).await? {
        return Err(ApiError::not_found("Müşteri bulunamadı"));
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({ "message": "Müşteri silindi" })))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExpiringContract {
    pub customer_id: String,
    pub company_name: String,
    /// `maintenance` or `service`
    pub contract: String,
    pub end_date: NaiveDate,
    pub days_left: i64,
}

/// Active contracts ending between `today` and `today + days`, soonest first.
pub async fn expiring_contracts(
    state: &AppState,
    today: NaiveDate,
    days: i64,
) -> ApiResult<Vec<ExpiringContract>> {
    let until = today + Duration::days(days);
    let customers: Repository<Customer> = state.repo();
    let mut result = Vec::new();

    for (kind, flag, end_field) in [
        ("maintenance", "hasMaintenanceContract", "maintenanceEnd"),
        ("service", "hasServiceContract", "serviceEnd"),
    ] {
        let filter = Filter::new()
            .eq(flag, true)
            .gte(end_field, today.to_string())
            .lte(end_field, until.to_string());
        for c in customers.list(&filter, None).await? {
            let end = if kind == "maintenance" { c.maintenance_end } else { c.service_end };
            if let Some(end_date) = end {
                result.push(ExpiringContract {
                    customer_id: c.id.clone(),
                    company_name: c.company_name.clone(),
                    contract: kind.to_string(),
                    end_date,
                    days_left: (end_date - today).num_days(),
                });
            }
        }
    }
    result.sort_by_key(|e| e.end_date);
    Ok(result)
}

#[derive(Debug, Deserialize)]
pub struct ExpiringQuery {
    pub days: Option<i64>,
}

/// GET /customers/expiring?days=N
pub async fn list_expiring(
    _auth: AuthUser,
    data: web::Data<AppState>,
    query: web::Query<ExpiringQuery>,
) -> ApiResult<HttpResponse> {
    let days = query.days.unwrap_or(30);
    if !(0..=3650).contains(&days) {
        return Err(ApiError::validation("Gün sayısı 0 ile 3650 arasında olmalıdır"));
    }
    let list = expiring_contracts(&data, Utc::now().date_naive(), days).await?;
    Ok(HttpResponse::Ok().json(list))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::testing::memory_state;
    use crate::auth::testing::bearer;
    use crate::auth::Authentication;
    use crate::models::Role;
    use actix_web::{http::StatusCode, test, App};
    use serde_json::json;

    fn payload(vkn: &str) -> CustomerPayload {
        CustomerPayload {
            company_name: "Ege Soğutma Ltd.".into(),
            vkn: vkn.into(),
            tax_office: None,
            contact_name: None,
            phone: None,
            email: None,
            address: None,
            city: Some("İzmir".into()),
            notes: None,
            has_maintenance_contract: false,
            maintenance_start: None,
            maintenance_end: None,
            maintenance_value: None,
            has_service_contract: false,
            service_start: None,
            service_end: None,
            service_value: None,
        }
    }

    #[::core::prelude::v1::test]
    fn vkn_must_be_ten_digits() {
        assert!(is_valid_vkn("1234567890"));
        assert!(!is_valid_vkn("123456789"));
        assert!(!is_valid_vkn("12345678901"));
        assert!(!is_valid_vkn("12345abcde"));
        assert!(!is_valid_vkn("١٢٣٤٥٦٧٨٩٠"));
        assert!(!is_valid_vkn("１２３４５６７８９０"));
        assert!(payload(" 1234567890 ").validate().is_ok());
    }

    #[::core::prelude::v1::test]
    fn every_contract_value_must_be_non_negative() {
        let mut p = payload("1234567890");
        p.maintenance_value = Some(100.0);
        p.service_value = Some(-500.0);
        assert!(matches!(p.validate(), Err(ApiError::Validation(_))));

        p.service_value = Some(0.0);
        assert!(p.validate().is_ok());
        p.maintenance_value = Some(-1.0);
        assert!(matches!(p.validate(), Err(ApiError::Validation(_))));
    }

    #[::core::prelude::v1::test]
    fn contract_end_before_start_is_rejected() {
        let mut p = payload("1234567890");
        p.has_maintenance_contract = true;
        p.maintenance_start = NaiveDate::from_ymd_opt(2026, 5, 1);
        p.maintenance_end = NaiveDate::from_ymd_opt(2026, 4, 1);
        assert!(matches!(p.validate(), Err(ApiError::Validation(_))));
    }

    #[actix_web::test]
    async fn invalid_vkn_returns_400_and_persists_nothing() {
        let (state, _) = memory_state();
        let app = test::init_service(
            App::new()
                .wrap(Authentication::new("test-secret".into()))
                .app_data(web::Data::new(state.clone()))
                .route("/customers", web::post().to(create_customer)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/customers")
            .insert_header(bearer("ayse", Role::Kullanici))
            .set_json(json!({ "companyName": "Ege Soğutma", "vkn": "12345" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/customers")
            .insert_header(bearer("ayse", Role::Kullanici))
            .set_json(json!({ "companyName": "Ege Soğutma", "vkn": "１２３４５６７８９０" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let customers: Repository<Customer> = state.repo();
        assert_eq!(customers.count(&Filter::new()).await.unwrap(), 0);

        let body = json!({ "companyName": "Ege Soğutma", "vkn": "1234567890" });
        let req = test::TestRequest::post()
            .uri("/customers")
            .insert_header(bearer("ayse", Role::Kullanici))
            .set_json(&body)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

        let req = test::TestRequest::post()
            .uri("/customers")
            .insert_header(bearer("ayse", Role::Kullanici))
            .set_json(&body)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);
        assert_eq!(customers.count(&Filter::new()).await.unwrap(), 1);
    }

    #[actix_web::test]
    async fn expiring_contracts_are_listed_soonest_first() {
        let (state, _) = memory_state();
        let customers: Repository<Customer> = state.repo();
        let today = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();

        let mut near = payload("1111111111");
        near.has_service_contract = true;
        near.service_end = NaiveDate::from_ymd_opt(2026, 10, 20);
        let mut later = payload("2222222222");
        later.has_maintenance_contract = true;
        later.maintenance_end = NaiveDate::from_ymd_opt(2026, 11, 5);
        let mut far = payload("3333333333");
        far.has_maintenance_contract = true;
        far.maintenance_end = NaiveDate::from_ymd_opt(2027, 6, 1);
        let mut lapsed_flag = payload("4444444444");
        lapsed_flag.maintenance_end = NaiveDate::from_ymd_opt(2026, 10, 18);

        for (i, p) in [near, later, far, lapsed_flag].into_iter().enumerate() {
            customers
                .insert(&p.into_customer(format!("c{}", i), "ayse".into(), Utc::now()))
                .await
                .unwrap();
        }

        let found = expiring_contracts(&state, today, 30).await.unwrap();
        let summary: Vec<(&str, &str, i64)> = found
            .iter()
            .map(|e| (e.customer_id.as_str(), e.contract.as_str(), e.days_left))
            .collect();
        assert_eq!(summary, vec![("c0", "service", 4), ("c1", "maintenance", 20)]);
    }
}
