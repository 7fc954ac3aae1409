//! Flaky database behind retry and a circuit breaker
//!
//! Retry wraps the breaker, so every attempt is counted by the breaker and an
//! open breaker ends the retry loop for that call.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use rampart_resilience::{Policy, PolicyExt, ResilienceError, ResilienceResult};

use crate::settings::DatabaseSettings;

#[derive(Debug, Clone, thiserror::Error)]
pub enum DbError {
    #[error("simulated database connection error")]
    Connection,
}

#[derive(Debug)]
struct Database {
    attempts: AtomicU32,
    failure_rate: f64,
    rng: Mutex<fastrand::Rng>,
}

impl Database {
    fn query(&self) -> ResilienceResult<String, DbError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        println!("[DB] Attempt {attempt}: execute query...");
        if self.rng.lock().f64() < self.failure_rate {
            return Err(ResilienceError::Operation(DbError::Connection));
        }
        Ok("Some data from database".to_string())
    }
}

pub async fn run(settings: &DatabaseSettings, seed: u64) -> anyhow::Result<()> {
    println!("--- Scenario: database access with retry and circuit breaker ---");

    let retry = settings
        .retry
        .builder::<DbError>()?
        .on_retry(|failure, delay, attempt| {
            println!("[Retry-DB] attempt {attempt}, wait {delay:?}, reason: {failure}");
        })
        .build()?;
    let breaker = settings
        .circuit_breaker
        .builder::<DbError>()?
        .on_break(|failure, duration| {
            println!("[CircuitBreaker] OPEN for {duration:?}. Reason: {failure}");
        })
        .on_reset(|| println!("[CircuitBreaker] RESET (closed again)."))
        .on_half_open(|| println!("[CircuitBreaker] HALF-OPEN (test call)."))
        .build()?;
    let pipeline = retry.wrap(breaker.clone());

    let database = Arc::new(Database {
        attempts: AtomicU32::new(0),
        failure_rate: settings.failure_rate,
        rng: Mutex::new(fastrand::Rng::with_seed(seed)),
    });
    let query = move || {
        let result = database.query();
        async move { result }
    };

    for call in 1..=settings.calls {
        println!("\n[DB] Logical call #{call}");
        match pipeline.execute(query.clone()).await {
            Ok(data) => println!("[DB] Success: {data}"),
            Err(failure) if failure.is_circuit_open() => {
                println!("[DB] Circuit is OPEN, skipping call to protect DB.");
            }
            Err(failure) => println!("[DB] Final failure: {failure}"),
        }
        if call < settings.calls {
            tokio::time::sleep(settings.call_interval).await;
        }
    }

    let stats = breaker.stats();
    println!(
        "\n[DB] Breaker {}: {} calls, {} rejected, opened {} times",
        stats.state, stats.total_calls, stats.rejected_calls, stats.times_opened
    );
    Ok(())
}
