//! Environment-driven configuration tree (spec §6, §0 of SPEC_FULL).
//!
//! Mirrors the teacher's nested `CallCenterConfig { general, database, .. }`
//! shape: one top-level [`Config`] composed of per-subsystem structs, each
//! with sane defaults so tests can construct `Config::default()` without
//! touching the environment.

use std::env;
use std::time::Duration;

use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub general: GeneralConfig,
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    pub digit_capture: DigitCaptureConfig,
    pub stream_pump: StreamPumpConfig,
    pub delivery: DeliveryConfig,
    pub control_plane: ControlPlaneConfig,
}

#[derive(Debug, Clone)]
pub struct GeneralConfig {
    /// `production`, `staging`, or `development`. Drives required-env checks.
    pub environment: String,
    pub max_concurrent_calls: usize,
    pub slo_first_media_ms: u64,
    pub slo_answer_delay_ms: u64,
    pub slo_stt_failures: u32,
    pub compliance_mode: ComplianceMode,
    pub dtmf_encryption_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplianceMode {
    Safe,
    DevInsecure,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub preference_order: Vec<String>,
    pub health_window: Duration,
    pub health_error_threshold: u32,
    pub cooldown: Duration,
    pub failover_enabled: bool,
    pub webhook_validation: WebhookValidationMode,
    pub adapter_call_timeout: Duration,
    pub machine_detection_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookValidationMode {
    Strict,
    Warn,
    Off,
}

#[derive(Debug, Clone)]
pub struct DigitCaptureConfig {
    pub inter_digit_timeout: Duration,
    pub overall_timeout: Duration,
    pub default_max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct StreamPumpConfig {
    pub audio_tick: Duration,
    /// Normalized RMS (0.0-1.0) above which inbound audio counts as speech
    /// for barge-in purposes. Not specified upstream; chosen conservatively
    /// so ordinary line noise doesn't cut off TTS prematurely.
    pub user_level_threshold: f32,
    /// How long the level must stay above threshold before a barge-in is
    /// declared. Not specified upstream; chosen long enough to reject a
    /// cough or DTMF click but short enough to feel responsive.
    pub user_hold_ms: Duration,
    pub reorder_window: usize,
}

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub queue_interval: Duration,
    pub batch_size: usize,
    pub max_retries: u32,
    pub rate_limit_provider_per_min: u32,
    pub rate_limit_tenant_per_min: u32,
    pub rate_limit_domain_per_min: u32,
    pub warmup_max_per_day: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    pub api_secret: String,
    pub max_skew: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig {
                environment: "development".into(),
                max_concurrent_calls: 200,
                slo_first_media_ms: 4_000,
                slo_answer_delay_ms: 12_000,
                slo_stt_failures: 3,
                compliance_mode: ComplianceMode::Safe,
                dtmf_encryption_key: None,
            },
            database: DatabaseConfig { url: "sqlite::memory:".into() },
            provider: ProviderConfig {
                preference_order: vec!["twilio".into(), "connect".into(), "vonage".into()],
                health_window: Duration::from_secs(120),
                health_error_threshold: 5,
                cooldown: Duration::from_secs(60),
                failover_enabled: true,
                webhook_validation: WebhookValidationMode::Warn,
                adapter_call_timeout: Duration::from_secs(10),
                machine_detection_timeout: Duration::from_secs(5),
            },
            digit_capture: DigitCaptureConfig {
                inter_digit_timeout: Duration::from_secs(5),
                overall_timeout: Duration::from_secs(30),
                default_max_retries: 3,
            },
            stream_pump: StreamPumpConfig {
                audio_tick: Duration::from_millis(160),
                user_level_threshold: 0.35,
                user_hold_ms: Duration::from_millis(200),
                reorder_window: 32,
            },
            delivery: DeliveryConfig {
                queue_interval: Duration::from_secs(5),
                batch_size: 50,
                max_retries: 5,
                rate_limit_provider_per_min: 600,
                rate_limit_tenant_per_min: 300,
                rate_limit_domain_per_min: 120,
                warmup_max_per_day: None,
            },
            control_plane: ControlPlaneConfig {
                api_secret: "dev-secret".into(),
                max_skew: Duration::from_secs(300),
            },
        }
    }
}

impl Config {
    /// Load configuration from environment variables (spec §6), falling
    /// back to [`Config::default`] for anything unset. In `production`,
    /// required variables missing is a configuration error (exit code 1
    /// at the bin entry point).
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(env_name) = env::var("CALL_ORCHESTRATOR_ENV") {
            config.general.environment = env_name;
        }
        if let Ok(mode) = env::var("CONFIG_COMPLIANCE_MODE") {
            config.general.compliance_mode = match mode.as_str() {
                "safe" => ComplianceMode::Safe,
                "dev_insecure" => ComplianceMode::DevInsecure,
                other => {
                    return Err(OrchestratorError::validation(format!(
                        "unknown CONFIG_COMPLIANCE_MODE: {other}"
                    )))
                }
            };
        }
        config.general.dtmf_encryption_key = env::var("DTMF_ENCRYPTION_KEY").ok();

        if let Ok(provider) = env::var("CALL_PROVIDER") {
            config.provider.preference_order = vec![provider];
        }
        if let Ok(mode) = env::var("TWILIO_WEBHOOK_VALIDATION") {
            config.provider.webhook_validation = match mode.as_str() {
                "strict" => WebhookValidationMode::Strict,
                "warn" => WebhookValidationMode::Warn,
                "off" => WebhookValidationMode::Off,
                other => {
                    return Err(OrchestratorError::validation(format!(
                        "unknown TWILIO_WEBHOOK_VALIDATION: {other}"
                    )))
                }
            };
        }
        if let Ok(ms) = env::var("CALL_SLO_FIRST_MEDIA_MS") {
            config.general.slo_first_media_ms = ms.parse().map_err(|_| {
                OrchestratorError::validation("CALL_SLO_FIRST_MEDIA_MS must be an integer")
            })?;
        }
        if let Ok(ms) = env::var("CALL_SLO_ANSWER_DELAY_MS") {
            config.general.slo_answer_delay_ms = ms.parse().map_err(|_| {
                OrchestratorError::validation("CALL_SLO_ANSWER_DELAY_MS must be an integer")
            })?;
        }
        if let Ok(secret) = env::var("API_SECRET") {
            config.control_plane.api_secret = secret;
        } else if config.general.environment == "production" {
            return Err(OrchestratorError::validation(
                "API_SECRET is required in production",
            ));
        }
        if let Ok(skew) = env::var("API_HMAC_MAX_SKEW_MS") {
            let ms: u64 = skew.parse().map_err(|_| {
                OrchestratorError::validation("API_HMAC_MAX_SKEW_MS must be an integer")
            })?;
            config.control_plane.max_skew = Duration::from_millis(ms);
        }
        if let Ok(url) = env::var("DATABASE_URL") {
            config.database.url = url;
        }
        if let Ok(ms) = env::var("STREAM_AUDIO_TICK_MS") {
            let ms: u64 = ms.parse().map_err(|_| {
                OrchestratorError::validation("STREAM_AUDIO_TICK_MS must be an integer")
            })?;
            config.stream_pump.audio_tick = Duration::from_millis(ms);
        }
        if let Ok(v) = env::var("STREAM_USER_LEVEL_THRESHOLD") {
            config.stream_pump.user_level_threshold = v.parse().map_err(|_| {
                OrchestratorError::validation("STREAM_USER_LEVEL_THRESHOLD must be a float")
            })?;
        }
        if let Ok(ms) = env::var("STREAM_USER_HOLD_MS") {
            let ms: u64 = ms.parse().map_err(|_| {
                OrchestratorError::validation("STREAM_USER_HOLD_MS must be an integer")
            })?;
            config.stream_pump.user_hold_ms = Duration::from_millis(ms);
        }
        if let Ok(n) = env::var("EMAIL_RATE_LIMIT_PROVIDER_PER_MIN") {
            config.delivery.rate_limit_provider_per_min = n.parse().map_err(|_| {
                OrchestratorError::validation("EMAIL_RATE_LIMIT_PROVIDER_PER_MIN must be an integer")
            })?;
        }
        if let Ok(n) = env::var("EMAIL_RATE_LIMIT_TENANT_PER_MIN") {
            config.delivery.rate_limit_tenant_per_min = n.parse().map_err(|_| {
                OrchestratorError::validation("EMAIL_RATE_LIMIT_TENANT_PER_MIN must be an integer")
            })?;
        }
        if let Ok(n) = env::var("EMAIL_RATE_LIMIT_DOMAIN_PER_MIN") {
            config.delivery.rate_limit_domain_per_min = n.parse().map_err(|_| {
                OrchestratorError::validation("EMAIL_RATE_LIMIT_DOMAIN_PER_MIN must be an integer")
            })?;
        }
        if let Ok(n) = env::var("EMAIL_WARMUP_MAX_PER_DAY") {
            config.delivery.warmup_max_per_day = Some(n.parse().map_err(|_| {
                OrchestratorError::validation("EMAIL_WARMUP_MAX_PER_DAY must be an integer")
            })?);
        }

        Ok(config)
    }
}
