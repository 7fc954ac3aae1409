//! External API call recovered by retry with exponential backoff

use std::sync::atomic::{AtomicU32, Ordering};

use rampart_resilience::{ResilienceError, ResilienceResult};

use crate::settings::ApiSettings;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("simulated temporary API error")]
    Unavailable,
}

/// Service that is down for its first few calls
#[derive(Debug)]
struct ExternalApi {
    attempts: AtomicU32,
    failures_before_success: u32,
}

impl ExternalApi {
    fn call(&self) -> ResilienceResult<String, ApiError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        println!("[API] Attempt {attempt}: calling external service...");
        if attempt <= self.failures_before_success {
            return Err(ResilienceError::Operation(ApiError::Unavailable));
        }
        Ok("Data from external API".to_string())
    }
}

pub async fn run(settings: &ApiSettings) -> anyhow::Result<()> {
    println!("--- Scenario: external API call with retry ---");

    let retry = settings
        .retry
        .builder::<ApiError>()?
        .on_retry(|failure, delay, attempt| {
            println!("[Retry] attempt {attempt}, wait {delay:?}, reason: {failure}");
        })
        .build()?;
    let api = ExternalApi {
        attempts: AtomicU32::new(0),
        failures_before_success: settings.failures_before_success,
    };

    match retry.execute(|| std::future::ready(api.call())).await {
        Ok(data) => println!("[API] Final result: {data}"),
        Err(failure) => println!("[API] Operation failed after all retries: {failure}"),
    }
    Ok(())
}
