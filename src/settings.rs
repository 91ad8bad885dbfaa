//! Company-wide settings, stored as a single document. Secrets are masked
//! on the way out and the mask is never written back.

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::store::{Entity, Repository};

pub const SECRET_MASK: &str = "********";
const SETTINGS_ID: &str = "app";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    #[serde(rename = "_id")]
    pub id: String,
    pub company_name: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
    pub sms_provider: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub sms_sender: Option<String>,
    pub email_notifications: bool,
    pub sms_notifications: bool,
    pub contract_reminder_days: Option<i64>,
    pub updated_by: Option<String>,
    #[serde(default, with = "crate::store::timestamp::option")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Entity for Settings {
    const COLLECTION: &'static str = "settings";

    fn id(&self) -> &str {
        &self.id
    }
}

fn mask(secret: &Option<String>) -> Option<String> {
    secret.as_ref().filter(|s| !s.is_empty()).map(|_| SECRET_MASK.to_string())
}

/// Keeps `current` when the client echoed the mask back.
fn merge_secret(current: Option<String>, incoming: Option<String>) -> Option<String> {
    match incoming {
        Some(value) if value == SECRET_MASK => current,
        other => other,
    }
}

impl Settings {
    pub fn masked(&self) -> Settings {
        Settings {
            smtp_pass: mask(&self.smtp_pass),
            api_secret: mask(&self.api_secret),
            ..self.clone()
        }
    }

    fn merged(self, incoming: Settings) -> Settings {
        Settings {
            id: SETTINGS_ID.to_string(),
            smtp_pass: merge_secret(self.smtp_pass, incoming.smtp_pass),
            api_secret: merge_secret(self.api_secret, incoming.api_secret),
            ..incoming
        }
    }
}

pub async fn load_settings(state: &AppState) -> ApiResult<Settings> {
    let settings: Repository<Settings> = state.repo();
    Ok(settings
        .get(SETTINGS_ID)
        .await?
        .unwrap_or_else(|| Settings { id: SETTINGS_ID.to_string(), ..Settings::default() }))
}

/// GET /settings
pub async fn get_settings(auth: AuthUser, data: web::Data<AppState>) -> ApiResult<HttpResponse> {
    auth.require_admin()?;
    Ok(HttpResponse::Ok().json(load_settings(&data).await?.masked()))
}

/// PUT /settings
pub async fn update_settings(
    auth: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<Settings>,
) -> ApiResult<HttpResponse> {
    auth.require_admin()?;
    let incoming = payload.into_inner();
    if incoming.smtp_port == Some(0) {
        return Err(ApiError::validation("Geçersiz SMTP portu"));
    }

    let current = load_settings(&data).await?;
    let mut updated = current.merged(incoming);
    updated.updated_by = Some(auth.id.clone());
    updated.updated_at = Some(Utc::now());

    let settings: Repository<Settings> = data.repo();
    if !settings.save(&updated).await? {
        settings.insert(&updated).await?;
    }
    info!("Settings updated by {}", auth.id);
    Ok(HttpResponse::Ok().json(updated.masked()))
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

    #[actix_web::test]
    async fn secrets_are_masked_and_mask_never_overwrites() {
        let (state, _) = memory_state();
        let app = test::init_service(
            App::new()
                .wrap(Authentication::new("test-secret".into()))
                .app_data(web::Data::new(state.clone()))
                .route("/settings", web::get().to(get_settings))
                .route("/settings", web::put().to(update_settings)),
        )
        .await;

        let req = test::TestRequest::put()
            .uri("/settings")
            .insert_header(bearer("admin", Role::Yonetici))
            .set_json(json!({ "companyName": "Ege Teknik", "smtpPass": "gercek-sifre", "apiSecret": "s3cr3t" }))
            .to_request();
        let shown: Settings = test::call_and_read_body_json(&app, req).await;
        assert_eq!(shown.smtp_pass.as_deref(), Some(SECRET_MASK));

        let req = test::TestRequest::put()
            .uri("/settings")
            .insert_header(bearer("admin", Role::Yonetici))
            .set_json(json!({ "companyName": "Ege Teknik A.Ş.", "smtpPass": SECRET_MASK, "apiSecret": "yeni" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let stored = load_settings(&state).await.unwrap();
        assert_eq!(stored.smtp_pass.as_deref(), Some("gercek-sifre"));
        assert_eq!(stored.api_secret.as_deref(), Some("yeni"));
        assert_eq!(stored.company_name.as_deref(), Some("Ege Teknik A.Ş."));

        let req = test::TestRequest::get()
            .uri("/settings")
            .insert_header(bearer("mehmet", Role::Kullanici))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);
    }

    #[::core::prelude::v1::test]
    fn empty_secret_is_not_masked() {
        let s = Settings { smtp_pass: Some(String::new()), ..Settings::default() };
        assert_eq!(s.masked().smtp_pass, None);
    }
}
