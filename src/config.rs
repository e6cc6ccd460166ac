use std::env::var;
use std::time::Duration;

use dotenvy::dotenv;

use crate::{
    application::{broadcast::DispatchConfig, retry_scheduler::RetryConfig},
    infrastructure::gateway::twilio::TwilioConfig,
};

pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub twilio: TwilioConfig,
    pub retry: RetryConfig,
    pub dispatch: DispatchConfig,
}

impl Config {
    /// Reads everything once at startup; the retry schedule and dispatch
    /// settings are static for the process lifetime.
    pub fn try_parse() -> Result<Config, String> {
        let _ = dotenv();

        let port = var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()
            .map_err(|_| "PORT is not a valid port number".to_string())?;

        let database_url =
            var("DATABASE_URL").map_err(|_| "DATABASE_URL is required".to_string())?;

        let twilio = TwilioConfig {
            account_sid: var("TWILIO_ACCOUNT_SID")
                .map_err(|_| "TWILIO_ACCOUNT_SID is required".to_string())?,
            auth_token: var("TWILIO_AUTH_TOKEN")
                .map_err(|_| "TWILIO_AUTH_TOKEN is required".to_string())?,
            from: var("TWILIO_WHATSAPP_FROM")
                .map_err(|_| "TWILIO_WHATSAPP_FROM is required".to_string())?,
            base_url: var("TWILIO_BASE_URL")
                .unwrap_or_else(|_| "https://api.twilio.com".to_string()),
            timeout_secs: parse_or("TWILIO_TIMEOUT_SECS", 15)?,
        };

        let backoff_minutes = var("RETRY_BACKOFF_MINUTES")
            .unwrap_or_else(|_| "5,15,60".to_string())
            .split(',')
            .map(|step| {
                step.trim()
                    .parse::<i64>()
                    .map_err(|_| format!("RETRY_BACKOFF_MINUTES has a bad step: {step}"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if backoff_minutes.is_empty() {
            return Err("RETRY_BACKOFF_MINUTES must not be empty".to_string());
        }
        let max_attempts = parse_or("RETRY_MAX_ATTEMPTS", backoff_minutes.len() as u32)?;
        let tick_secs: u64 = parse_or("RETRY_TICK_SECS", 60)?;
        // The pass interval must not be coarser than the smallest step.
        let smallest = *backoff_minutes.iter().min().expect("non-empty schedule");
        if tick_secs > (smallest as u64) * 60 {
            return Err(format!(
                "RETRY_TICK_SECS={tick_secs} is coarser than the smallest backoff step ({smallest}m)"
            ));
        }
        let retry = RetryConfig {
            enabled: var("RETRY_ENABLED")
                .map(|value| value != "0" && value.to_ascii_lowercase() != "false")
                .unwrap_or(true),
            backoff_minutes,
            max_attempts,
            tick: Duration::from_secs(tick_secs),
            batch_size: parse_or("RETRY_BATCH_SIZE", 100)?,
        };

        let dispatch = DispatchConfig {
            rate_per_sec: parse_or("DISPATCH_RATE_PER_SEC", 10)?,
            confirmation_template_id: var("CONFIRMATION_TEMPLATE_SID")
                .map_err(|_| "CONFIRMATION_TEMPLATE_SID is required".to_string())?,
            reclaim_after_minutes: parse_or("DISPATCH_RECLAIM_MINUTES", 5)?,
        };

        Ok(Config {
            port,
            database_url,
            twilio,
            retry,
            dispatch,
        })
    }
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, String> {
    match var(name) {
        Err(_) => Ok(default),
        Ok(value) => value
            .parse::<T>()
            .map_err(|_| format!("{name} has an invalid value")),
    }
}
