use std::env;
use std::net::SocketAddr;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Which `Store` implementation backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Mongo,
    Memory,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub store_backend: StoreBackend,
    pub mongo_uri: String,
    pub database_name: String,
    pub jwt_secret: String,
    pub jwt_ttl_hours: i64,
    pub frontend_origin: String,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let bind_address_str =
            env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let store_backend = match env::var("STORE")
            .unwrap_or_else(|_| "mongo".to_string())
            .to_lowercase()
            .as_str()
        {
            "mongo" => StoreBackend::Mongo,
            "memory" => StoreBackend::Memory,
            other => {
                return Err(ConfigError::InvalidValue(
                    "STORE".to_string(),
                    format!("'{}' is not one of mongo, memory", other),
                ))
            }
        };

        // The URI is only required when Mongo actually backs the service.
        let mongo_uri = match (env::var("MONGO_URI"), store_backend) {
            (Ok(uri), _) => uri,
            (Err(_), StoreBackend::Memory) => String::new(),
            (Err(_), StoreBackend::Mongo) => {
                return Err(ConfigError::MissingVar("MONGO_URI".to_string()))
            }
        };

        let jwt_ttl_hours = env::var("JWT_TTL_HOURS")
            .unwrap_or_else(|_| "24".to_string())
            .parse::<i64>()
            .map_err(|e| ConfigError::InvalidValue("JWT_TTL_HOURS".to_string(), e.to_string()))?;

        Ok(Self {
            bind_address,
            store_backend,
            mongo_uri,
            database_name: env::var("DATABASE_NAME")
                .unwrap_or_else(|_| "surec_yonetimi".to_string()),
            jwt_secret: env::var("JWT_SECRET")
                .map_err(|_| ConfigError::MissingVar("JWT_SECRET".to_string()))?,
            jwt_ttl_hours,
            frontend_origin: env::var("FRONTEND_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            admin_username: env::var("ADMIN_USERNAME").ok(),
            admin_password: env::var("ADMIN_PASSWORD").ok(),
        })
    }
}

#[cfg(test)]
impl Config {
    pub fn for_tests() -> Self {
        Self {
            bind_address: ([127, 0, 0, 1], 0).into(),
            store_backend: StoreBackend::Memory,
            mongo_uri: String::new(),
            database_name: "surec_yonetimi_test".to_string(),
            jwt_secret: "test-secret".to_string(),
            jwt_ttl_hours: 1,
            frontend_origin: "http://localhost:3000".to_string(),
            admin_username: None,
            admin_password: None,
        }
    }
}
