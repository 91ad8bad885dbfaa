use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::Entity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Manager / administrator.
    Yonetici,
    /// Staff member.
    Kullanici,
}

impl Role {
    pub fn is_admin(self) -> bool {
        self == Role::Yonetici
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub avatar: Option<String>,
    pub role: Role,
    /// bcrypt hash; never serialized to clients (see `PublicUser`).
    pub password_hash: String,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default, with = "crate::store::timestamp::option")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(with = "crate::store::timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "crate::store::timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Entity for User {
    const COLLECTION: &'static str = "users";

    fn id(&self) -> &str {
        &self.id
    }
}

/// What we expose to the frontend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub avatar: Option<String>,
    pub role: Role,
    pub is_online: bool,
    #[serde(default, with = "crate::store::timestamp::option")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        PublicUser {
            id: u.id,
            username: u.username,
            full_name: u.full_name,
            email: u.email,
            phone: u.phone,
            avatar: u.avatar,
            role: u.role,
            is_online: u.is_online,
            last_seen: u.last_seen,
        }
    }
}
