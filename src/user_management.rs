use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use log::info;
use mongodb::bson::{doc, Document};
use serde::Deserialize;

use crate::app_state::AppState;
use crate::auth::{hash_password, AuthUser};
use crate::error::{ApiError, ApiResult};
use crate::models::{new_id, PublicUser, Role, User};
use crate::store::{date_value, to_value, Filter, Repository, Sort, StoreResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub avatar: Option<String>,
    pub role: Option<Role>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FindUserQuery {
    pub query: String,
}

pub async fn find_user(state: &AppState, user_id: &str) -> ApiResult<User> {
    let users: Repository<User> = state.repo();
    users
        .get(user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Kullanıcı bulunamadı"))
}

/// Records presence. Returns the `lastSeen` stamp written when going offline.
pub async fn set_presence(
    users: &Repository<User>,
    user_id: &str,
    online: bool,
) -> StoreResult<Option<DateTime<Utc>>> {
    let mut fields = doc! { "isOnline": online };
    let last_seen = if online {
        None
    } else {
        let now = Utc::now();
        fields.insert("lastSeen", date_value(&now));
        Some(now)
    };
    users.update_fields(user_id, fields).await?;
    Ok(last_seen)
}

/// GET /users
pub async fn list_users(_auth: AuthUser, data: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let users: Repository<User> = data.repo();
    let list: Vec<PublicUser> = users
        .list(&Filter::new(), Some(Sort::asc("fullName")))
        .await?
        .into_iter()
        .map(PublicUser::from)
        .collect();
    Ok(HttpResponse::Ok().json(list))
}

/// GET /users/{id}
pub async fn get_user_by_id(
    _auth: AuthUser,
    path: web::Path<String>,
    data: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let user = find_user(&data, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(PublicUser::from(user)))
}

/// GET /users/search?query=
pub async fn search_users(
    _auth: AuthUser,
    query: web::Query<FindUserQuery>,
    data: web::Data<AppState>,
) -> ApiResult<HttpResponse> {
    let users: Repository<User> = data.repo();
    let filter = Filter::new().search(&["username", "email", "fullName"], query.query.trim());
    let found: Vec<PublicUser> = users
        .list(&filter, None)
        .await?
        .into_iter()
        .map(PublicUser::from)
        .collect();
    Ok(HttpResponse::Ok().json(found))
}

/// POST /users (admin only)
pub async fn create_user(
    auth: AuthUser,
    data: web::Data<AppState>,
    payload: web::Json<CreateUserRequest>,
) -> ApiResult<HttpResponse> {
    auth.require_admin()?;
    let payload = payload.into_inner();
    let username = payload.username.trim().to_string();
    if username.is_empty() || payload.full_name.trim().is_empty() {
        return Err(ApiError::validation("Kullanıcı adı ve ad soyad zorunludur"));
    }
    if payload.password.len() < 6 {
        return Err(ApiError::validation("Şifre en az 6 karakter olmalıdır"));
    }

    let users: Repository<User> = data.repo();
    if users.find_one(&Filter::new().eq("username", username.as_str())).await?.is_some() {
        return Err(ApiError::Conflict("Bu kullanıcı adı zaten kullanılıyor".to_string()));
    }

    let now = Utc::now();
    let user = User {
        id: new_id(),
        username,
        full_name: payload.full_name.trim().to_string(),
        email: payload.email,
        phone: payload.phone,
        avatar: None,
        role: payload.role.unwrap_or(Role::Kullanici),
        password_hash: hash_password(payload.password).await?,
        is_online: false,
        last_seen: None,
        created_at: now,
        updated_at: now,
    };
    users.insert(&user).await?;
    info!("User created: {} ({})", user.username, user.id);
    Ok(HttpResponse::Created().json(PublicUser::from(user)))
}

/// PUT /users/{id}
pub async fn update_user(
    auth: AuthUser,
    path: web::Path<String>,
    data: web::Data<AppState>,
    payload: web::Json<UpdateUserRequest>,
) -> ApiResult<HttpResponse> {
    let user_id = path.into_inner();
    auth.require_self_or_admin(&user_id)?;
    let payload = payload.into_inner();

    let mut update_doc = Document::new();
    if let Some(full_name) = payload.full_name.as_deref().map(str::trim) {
        if full_name.is_empty() {
            return Err(ApiError::validation("Ad soyad boş olamaz"));
        }
        update_doc.insert("fullName", full_name);
    }
    if let Some(email) = &payload.email {
        update_doc.insert("email", email);
    }
    if let Some(phone) = &payload.phone {
        update_doc.insert("phone", phone);
    }
    if let Some(avatar) = &payload.avatar {
        update_doc.insert("avatar", avatar);
    }
    if let Some(role) = payload.role {
        auth.require_admin()?;
        update_doc.insert("role", to_value(&role)?);
    }
    if let Some(password) = payload.password {
        if password.len() < 6 {
            return Err(ApiError::validation("Şifre en az 6 karakter olmalıdır"));
        }
        update_doc.insert("passwordHash", hash_password(password).await?);
    }
    if update_doc.is_empty() {
        return Err(ApiError::validation("Güncellenecek alan yok"));
    }
    update_doc.insert("updatedAt", date_value(&Utc::now()));

    let users: Repository<User> = data.repo();
    if !users.update_fields(&user_id, update_doc).await? {
        return Err(ApiError::not_found("Kullanıcı bulunamadı"));
    }
    let user = find_user(&data, &user_id).await?;
    Ok(HttpResponse::Ok().json(PublicUser::from(user)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::testing::memory_state;
    use crate::auth::testing::{bearer, insert_user};
    use crate::auth::Authentication;
    use actix_web::{http::StatusCode, test, App};
    use serde_json::json;

    #[actix_web::test]
    async fn presence_round_trip() {
        let (state, _) = memory_state();
        insert_user(&state, "ayse", Role::Kullanici).await;
        let users: Repository<User> = state.repo();
        set_presence(&users, "ayse", true).await.unwrap();
        assert!(find_user(&state, "ayse").await.unwrap().is_online);
        let stamp = set_presence(&users, "ayse", false).await.unwrap();
        let user = find_user(&state, "ayse").await.unwrap();
        assert!(!user.is_online);
        assert!(stamp.is_some() && user.last_seen.is_some());
    }

    #[actix_web::test]
    async fn only_admins_create_users_and_roles() {
        let (state, _) = memory_state();
        insert_user(&state, "admin", Role::Yonetici).await;
        insert_user(&state, "mehmet", Role::Kullanici).await;
        let app = test::init_service(
            App::new()
                .wrap(Authentication::new("test-secret".into()))
                .app_data(web::Data::new(state.clone()))
                .route("/users", web::post().to(create_user))
                .route("/users/{id}", web::put().to(update_user)),
        )
        .await;

        let body = json!({ "username": "zeynep", "password": "gizli123", "fullName": "Zeynep K." });
        let req = test::TestRequest::post()
            .uri("/users")
            .insert_header(bearer("mehmet", Role::Kullanici))
            .set_json(&body)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::post()
            .uri("/users")
            .insert_header(bearer("admin", Role::Yonetici))
            .set_json(&body)
            .to_request();
        let created: PublicUser = test::call_and_read_body_json(&app, req).await;
        assert_eq!(created.role, Role::Kullanici);

        let req = test::TestRequest::put()
            .uri("/users/mehmet")
            .insert_header(bearer("mehmet", Role::Kullanici))
            .set_json(json!({ "role": "yonetici" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::put()
            .uri("/users/mehmet")
            .insert_header(bearer("mehmet", Role::Kullanici))
            .set_json(json!({ "phone": "0532 000 00 00" }))
            .to_request();
        let updated: PublicUser = test::call_and_read_body_json(&app, req).await;
        assert_eq!(updated.phone.as_deref(), Some("0532 000 00 00"));
    }
}
