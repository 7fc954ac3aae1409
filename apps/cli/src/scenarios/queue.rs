//! Queue send bounded by a timeout, falling back to local storage

use std::convert::Infallible;
use std::time::Duration;

use rampart_resilience::{
    FallbackPolicy, Policy, PolicyExt, ResilienceResult, TimeoutStrategy,
};

use crate::settings::QueueSettings;

const SENT: &str = "Message sent to queue.";
const SAVED_LOCALLY: &str = "Message saved locally instead of queue.";

async fn send_to_queue(delay: Duration) -> ResilienceResult<String, Infallible> {
    println!("[Queue] Sending message to remote queue...");
    println!("[Queue] Simulated delay: {delay:?}");
    tokio::time::sleep(delay).await;
    println!("[Queue] Message successfully sent to queue.");
    Ok(SENT.to_string())
}

pub async fn run(settings: &QueueSettings, seed: u64) -> anyhow::Result<()> {
    println!("--- Scenario: queue send with timeout and fallback ---");

    let timeout = settings
        .timeout
        .builder()?
        .on_timeout(|elapsed| println!("[Timeout] Operation timed out after {elapsed:?}."))
        .build()?;
    let fallback = FallbackPolicy::<String, Infallible>::builder()
        .handle_all()
        .value(SAVED_LOCALLY.to_string())
        .on_fallback(|_| println!("[Fallback] Queue send failed. Saving message locally."))
        .build()?;
    let pipeline = fallback.wrap(timeout.clone());

    let mut rng = fastrand::Rng::with_seed(seed);
    let spread = settings.max_send_delay - settings.min_send_delay;
    for message in 1..=settings.messages {
        println!("\n[Queue] Message #{message}");
        let delay = settings.min_send_delay + spread.mul_f64(rng.f64());
        let result = pipeline.execute(move || send_to_queue(delay)).await?;
        println!("[Queue] Final result: {result}");
    }

    if timeout.strategy() == TimeoutStrategy::Forced {
        let stats = timeout.abandoned_stats();
        println!(
            "\n[Queue] {} sends abandoned, {} finished in the background",
            stats.abandoned, stats.completed
        );
    }
    Ok(())
}
