use secrecy::{ExposeSecret, Secret};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct SsoConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub session: SessionConfig,
    pub clock_resolution: Duration,
    pub sms_cooldown: Duration,
    /// `None` when no external MFA gateway is configured.
    pub mfa: Option<MfaGatewayConfig>,
    pub totp: TotpConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub idle: Duration,
    pub total: Duration,
}

#[derive(Debug, Clone)]
pub struct MfaGatewayConfig {
    pub url: Url,
    pub secret: Secret<String>,
    pub code_lifetime: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct TotpConfig {
    pub issuer: String,
    pub skew_steps: u8,
}

/// Knobs of the login flow itself.
#[derive(Debug, Clone)]
pub struct LoginSettings {
    pub sms_cooldown: Duration,
    pub totp_issuer: String,
    pub totp_skew_steps: u8,
}

impl Default for LoginSettings {
    fn default() -> Self {
        Self {
            sms_cooldown: Duration::from_secs(60),
            totp_issuer: "sso".to_string(),
            totp_skew_steps: 1,
        }
    }
}

impl SsoConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let mfa = match optional_env("MFA_GATEWAY_URL") {
            Some(raw) => Some(MfaGatewayConfig {
                url: Url::parse(&raw).map_err(|e| {
                    AppError::ConfigError(anyhow::anyhow!("MFA_GATEWAY_URL is invalid: {}", e))
                })?,
                secret: Secret::new(optional_env("MFA_GATEWAY_SECRET").unwrap_or_default()),
                code_lifetime: Duration::from_secs(parse_env(
                    "MFA_CODE_LIFETIME_SECONDS",
                    Some("300"),
                    is_prod,
                )?),
                timeout: Duration::from_secs(parse_env(
                    "MFA_GATEWAY_TIMEOUT_SECONDS",
                    Some("10"),
                    is_prod,
                )?),
            }),
            None => None,
        };

        let otlp_endpoint = optional_env("OTLP_ENDPOINT").or_else(|| common_config.otlp_endpoint.clone());

        let config = SsoConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("sso-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint,
            session: SessionConfig {
                idle: Duration::from_secs(60 * parse_env::<u64>("SESSION_IDLE_MINUTES", Some("30"), is_prod)?),
                total: Duration::from_secs(60 * parse_env::<u64>("SESSION_TOTAL_MINUTES", Some("480"), is_prod)?),
            },
            clock_resolution: Duration::from_millis(parse_env("CLOCK_RESOLUTION_MS", Some("1000"), is_prod)?),
            sms_cooldown: Duration::from_secs(parse_env("SMS_COOLDOWN_SECONDS", Some("60"), is_prod)?),
            mfa,
            totp: TotpConfig {
                issuer: get_env("TOTP_ISSUER", Some("sso"), is_prod)?,
                skew_steps: parse_env("TOTP_SKEW_STEPS", Some("1"), is_prod)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn login_settings(&self) -> LoginSettings {
        LoginSettings {
            sms_cooldown: self.sms_cooldown,
            totp_issuer: self.totp.issuer.clone(),
            totp_skew_steps: self.totp.skew_steps,
        }
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.session.idle.is_zero() || self.session.total.is_zero() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SESSION_IDLE_MINUTES and SESSION_TOTAL_MINUTES must be positive"
            )));
        }

        if self.session.idle > self.session.total {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SESSION_IDLE_MINUTES must not exceed SESSION_TOTAL_MINUTES"
            )));
        }

        if self.clock_resolution.is_zero() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "CLOCK_RESOLUTION_MS must be positive"
            )));
        }

        if self.totp.issuer.contains(':') {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "TOTP_ISSUER must not contain ':'"
            )));
        }

        if let Some(mfa) = &self.mfa {
            if mfa.code_lifetime.is_zero() || mfa.timeout.is_zero() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "MFA_CODE_LIFETIME_SECONDS and MFA_GATEWAY_TIMEOUT_SECONDS must be positive"
                )));
            }

            if self.environment == Environment::Prod && mfa.secret.expose_secret().is_empty() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "MFA_GATEWAY_SECRET is required in production when MFA_GATEWAY_URL is set"
                )));
            }
        } else {
            tracing::warn!("MFA_GATEWAY_URL not set - SMS second factor is disabled");
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

fn parse_env<T>(key: &str, default: Option<&str>, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: Display,
{
    get_env(key, default, is_prod)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{} is invalid: {}", key, e)))
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
