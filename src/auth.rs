use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{Payload, Service, ServiceRequest, ServiceResponse, Transform},
    http, web, Error, FromRequest, HttpMessage, HttpRequest, HttpResponse,
};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use futures::future::{ok, ready, Ready};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::app_state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::models::{new_id, PublicUser, Role, User};
use crate::store::{Filter, Repository};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: usize,
}

/// Identity attached to the request by `Authentication`.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub id: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    pub fn require_admin(&self) -> ApiResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::forbidden("Bu işlem için yönetici yetkisi gerekiyor"))
        }
    }

    /// Callers may act on their own records; admins on anyone's.
    pub fn require_self_or_admin(&self, user_id: &str) -> ApiResult<()> {
        if self.id == user_id || self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::forbidden("Başka bir kullanıcının verilerine erişemezsiniz"))
        }
    }
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(req.extensions().get::<AuthUser>().cloned().ok_or(ApiError::Unauthorized))
    }
}

pub fn create_jwt(user_id: &str, role: Role, secret: &str, ttl_hours: i64) -> ApiResult<String> {
    let expiration = Utc::now() + Duration::hours(ttl_hours);
    let claims = Claims {
        sub: user_id.to_string(),
        role,
        exp: expiration.timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_ref()))
        .map_err(|e| ApiError::Internal(format!("Token encode error: {}", e)))
}

pub fn verify_token(token: &str, secret: &str) -> Result<AuthUser, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;
    Ok(AuthUser { id: token_data.claims.sub, role: token_data.claims.role })
}

pub async fn hash_password(password: String) -> ApiResult<String> {
    web::block(move || hash(password, DEFAULT_COST))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| ApiError::Internal(format!("Error hashing password: {}", e)))
}

async fn password_matches(password: String, password_hash: String) -> bool {
    web::block(move || verify(password, &password_hash).unwrap_or(false))
        .await
        .unwrap_or(false)
}

/// Verifies `Authorization: Bearer <jwt>` when present. Requests without the
/// header pass through; handlers that need an identity take `AuthUser`.
#[derive(Debug, Clone)]
pub struct Authentication {
    secret: String,
}

impl Authentication {
    pub fn new(secret: String) -> Self {
        Authentication { secret }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddleware { service, secret: self.secret.clone() })
    }
}

pub struct AuthMiddleware<S> {
    service: S,
    secret: String,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let bearer = req
            .headers()
            .get(http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string());

        if let Some(token) = bearer {
            match verify_token(&token, &self.secret) {
                Ok(user) => {
                    req.extensions_mut().insert(user);
                }
                Err(e) => {
                    warn!("Rejected bearer token: {}", e);
                    let (req_parts, _payload) = req.into_parts();
                    let resp = HttpResponse::Unauthorized()
                        .json(json!({ "message": "Geçersiz veya süresi dolmuş oturum" }))
                        .map_into_boxed_body();
                    let srv_resp = ServiceResponse::new(req_parts, resp);
                    return Box::pin(async move { Ok(srv_resp) });
                }
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_boxed_body())
        })
    }
}

#[derive(Deserialize)]
pub struct LoginInfo {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: PublicUser,
}

/// POST /login
pub async fn login(
    data: web::Data<AppState>,
    login_info: web::Json<LoginInfo>,
) -> ApiResult<HttpResponse> {
    let login_info = login_info.into_inner();
    let users: Repository<User> = data.repo();
    let user = users
        .find_one(&Filter::new().eq("username", login_info.username.trim()))
        .await?
        .ok_or(ApiError::InvalidCredentials)?;

    if !password_matches(login_info.password, user.password_hash.clone()).await {
        return Err(ApiError::InvalidCredentials);
    }

    let token = create_jwt(&user.id, user.role, &data.config.jwt_secret, data.config.jwt_ttl_hours)?;
    info!("User {} logged in", user.username);
    Ok(HttpResponse::Ok().json(LoginResponse { token, user: user.into() }))
}

/// Creates the configured admin account when the user collection is empty.
pub async fn seed_admin(state: &AppState) -> ApiResult<()> {
    let (Some(username), Some(password)) =
        (state.config.admin_username.clone(), state.config.admin_password.clone())
    else {
        return Ok(());
    };
    let users: Repository<User> = state.repo();
    if users.count(&Filter::new()).await? > 0 {
        return Ok(());
    }
    let now = Utc::now();
    let admin = User {
        id: new_id(),
        username: username.clone(),
        full_name: "Sistem Yöneticisi".to_string(),
        email: None,
        phone: None,
        avatar: None,
        role: Role::Yonetici,
        password_hash: hash_password(password).await?,
        is_online: false,
        last_seen: None,
        created_at: now,
        updated_at: now,
    };
    users.insert(&admin).await?;
    info!("Seeded admin account {}", username);
    Ok(())
}

#[cfg(test)]
pub mod testing {
    use actix_web::http::header::{HeaderName, AUTHORIZATION};
    use chrono::Utc;

    use crate::app_state::AppState;
    use crate::models::{Role, User};
    use crate::store::Repository;

    /// `Authorization` header for the secret used by `Config::for_tests`.
    pub fn bearer(user_id: &str, role: Role) -> (HeaderName, String) {
        let token = super::create_jwt(user_id, role, "test-secret", 1).unwrap();
        (AUTHORIZATION, format!("Bearer {}", token))
    }

    /// Inserts a user whose password is `parola123` (low bcrypt cost).
    pub async fn insert_user(state: &AppState, id: &str, role: Role) -> User {
        let now = Utc::now();
        let user = User {
            id: id.to_string(),
            username: id.to_string(),
            full_name: format!("{} test", id),
            email: Some(format!("{}@example.com", id)),
            phone: None,
            avatar: None,
            role,
            password_hash: bcrypt::hash("parola123", 4).unwrap(),
            is_online: false,
            last_seen: None,
            created_at: now,
            updated_at: now,
        };
        let users: Repository<User> = state.repo();
        users.insert(&user).await.unwrap();
        user
    }
}

#[cfg(test)]
mod tests {
    use super::testing::insert_user;
    use super::*;
    use crate::app_state::testing::memory_state;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn token_round_trip_keeps_identity() {
        let (state, _) = memory_state();
        let user = insert_user(&state, "ayse", Role::Yonetici).await;
        let token = create_jwt(&user.id, user.role, "s3cret", 1).unwrap();
        let auth = verify_token(&token, "s3cret").unwrap();
        assert_eq!(auth, AuthUser { id: "ayse".into(), role: Role::Yonetici });
        assert!(verify_token(&token, "other").is_err());
    }

    #[actix_web::test]
    async fn login_accepts_valid_credentials_only() {
        let (state, _) = memory_state();
        insert_user(&state, "mehmet", Role::Kullanici).await;
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/login", web::post().to(login)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/login")
            .set_json(json!({ "username": "mehmet", "password": "parola123" }))
            .to_request();
        let body: LoginResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.user.id, "mehmet");
        assert_eq!(verify_token(&body.token, "test-secret").unwrap().id, "mehmet");

        let req = test::TestRequest::post()
            .uri("/login")
            .set_json(json!({ "username": "mehmet", "password": "yanlis" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), http::StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn middleware_rejects_bad_tokens_and_passes_anonymous() {
        async fn whoami(user: AuthUser) -> HttpResponse {
            HttpResponse::Ok().body(user.id)
        }
        let app = test::init_service(
            App::new()
                .wrap(Authentication::new("test-secret".into()))
                .route("/me", web::get().to(whoami)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/me")
            .insert_header((http::header::AUTHORIZATION, "Bearer not-a-jwt"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), http::StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get().uri("/me").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), http::StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn seed_admin_runs_once() {
        let (mut state, _) = memory_state();
        state.config.admin_username = Some("admin".into());
        state.config.admin_password = Some("admin123".into());
        seed_admin(&state).await.unwrap();
        seed_admin(&state).await.unwrap();
        let users: Repository<User> = state.repo();
        assert_eq!(users.count(&Filter::new()).await.unwrap(), 1);
    }
}
