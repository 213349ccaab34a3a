use secrecy::SecretString;
use serde::Deserialize;
use std::env;
use std::time::Duration;

use identity_core::config as core_config;
use identity_core::error::AppError;

use crate::services::PollConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct UsersConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub identity: IdentityProviderConfig,
    pub directory: DirectoryConfig,
    pub security: SecurityConfig,
    pub swagger: SwaggerConfig,
    #[serde(skip, default)]
    pub poll: PollConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

/// The app registration this service runs as in the tenant.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityProviderConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub login_endpoint: String,
    /// Scope probed by the can-authenticate check.
    pub service_scope: String,
}

impl IdentityProviderConfig {
    /// v2.0 token endpoint for the configured tenant.
    pub fn token_endpoint(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.login_endpoint.trim_end_matches('/'),
            self.tenant_id
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    pub endpoint: String,
    pub api_version: String,
    /// Delegated scopes requested when acting on behalf of a caller.
    pub scopes: Vec<String>,
    /// Group granted to invited guests.
    pub access_group_id: String,
    /// Default post-redemption redirect for invitations.
    pub invite_redirect_url: String,
}

impl DirectoryConfig {
    pub fn base_url(&self) -> String {
        format!(
            "{}/{}",
            self.endpoint.trim_end_matches('/'),
            self.api_version
        )
    }

    /// App-only scope covering the service's own directory access.
    pub fn app_scope(&self) -> String {
        format!("{}/.default", self.endpoint.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub accepted_scopes: Vec<String>,
    pub accepted_app_roles: Vec<String>,
    pub public_key_path: String,
    pub audience: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwaggerConfig {
    pub enabled: SwaggerMode,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SwaggerMode {
    Public,
    Authenticated,
    Disabled,
}

impl UsersConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = UsersConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("users-api"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            identity: IdentityProviderConfig {
                tenant_id: get_env("IDENTITY_TENANT_ID", None, is_prod)?,
                client_id: get_env("IDENTITY_CLIENT_ID", None, is_prod)?,
                client_secret: SecretString::new(get_env("IDENTITY_CLIENT_SECRET", None, is_prod)?),
                login_endpoint: get_env(
                    "IDENTITY_LOGIN_ENDPOINT",
                    Some("https://login.microsoftonline.com"),
                    is_prod,
                )?,
                service_scope: get_env("IDENTITY_SERVICE_SCOPE", None, is_prod)?,
            },
            directory: DirectoryConfig {
                endpoint: get_env(
                    "DIRECTORY_ENDPOINT",
                    Some("https://graph.microsoft.com"),
                    is_prod,
                )?,
                api_version: get_env("DIRECTORY_API_VERSION", Some("v1.0"), is_prod)?,
                scopes: get_env(
                    "DIRECTORY_SCOPES",
                    Some("https://graph.microsoft.com/.default"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
                access_group_id: get_env("DIRECTORY_ACCESS_GROUP_ID", None, is_prod)?,
                invite_redirect_url: get_env("DIRECTORY_INVITE_REDIRECT_URL", None, is_prod)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect(),
                accepted_scopes: get_env(
                    "ACCEPTED_SCOPES",
                    Some("Users.Read,Users.ReadWrite"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
                accepted_app_roles: get_env(
                    "ACCEPTED_APP_ROLES",
                    Some("Users.Read.All,Users.ReadWrite.All"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
                public_key_path: get_env("TOKEN_PUBLIC_KEY_PATH", None, is_prod)?,
                audience: env::var("TOKEN_AUDIENCE").ok(),
            },
            swagger: SwaggerConfig {
                enabled: get_env("ENABLE_SWAGGER", Some("public"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            },
            poll: PollConfig {
                interval: Duration::from_secs(
                    get_env("INVITE_POLL_INTERVAL_SECONDS", Some("2"), is_prod)?
                        .parse()
                        .unwrap_or(2),
                ),
                max_attempts: get_env("INVITE_POLL_MAX_ATTEMPTS", Some("5"), is_prod)?
                    .parse()
                    .unwrap_or(5),
                backoff_multiplier: get_env("INVITE_POLL_BACKOFF_MULTIPLIER", Some("2.0"), is_prod)?
                    .parse()
                    .unwrap_or(2.0),
                max_interval: Duration::from_secs(
                    get_env("INVITE_POLL_MAX_INTERVAL_SECONDS", Some("30"), is_prod)?
                        .parse()
                        .unwrap_or(30),
                ),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.directory.scopes.is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DIRECTORY_SCOPES must name at least one scope"
            )));
        }

        if self.poll.max_attempts == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "INVITE_POLL_MAX_ATTEMPTS must be greater than 0"
            )));
        }

        if self.poll.backoff_multiplier < 1.0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "INVITE_POLL_BACKOFF_MULTIPLIER must be at least 1.0"
            )));
        }

        // In production, ensure stricter validation
        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.swagger.enabled == SwaggerMode::Public {
                tracing::error!("Swagger is publicly accessible in production - consider using 'authenticated' or 'disabled'");
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl std::str::FromStr for SwaggerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(SwaggerMode::Public),
            "authenticated" => Ok(SwaggerMode::Authenticated),
            "disabled" => Ok(SwaggerMode::Disabled),
            _ => Err(format!("Invalid swagger mode: {}", s)),
        }
    }
}
