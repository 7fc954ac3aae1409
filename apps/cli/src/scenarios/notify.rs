//! Payload read and push notification through the retry helper
//!
//! Only I/O and network failures are retried; anything else is surfaced on
//! the first attempt.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};

use rampart_resilience::RetryHelper;

use crate::settings::NotifySettings;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("simulated I/O error while reading file: {0}")]
    Io(#[from] io::Error),
    #[error("simulated network error while sending push notification to {0}")]
    Network(String),
    #[error("no device id configured")]
    MissingDevice,
}

impl NotifyError {
    const fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Network(_))
    }
}

#[derive(Debug)]
struct FileProcessor {
    attempts: AtomicU32,
    failures: u32,
}

impl FileProcessor {
    fn notification_payload(&self, path: &str) -> Result<String, NotifyError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        println!("[FileProcessor] Attempt #{attempt} to read payload from '{path}'");
        if attempt <= self.failures {
            return Err(io::Error::other(format!("cannot read '{path}'")).into());
        }
        Ok(format!(
            r#"{{ "path": "{path}", "message": "Hello from FileProcessor" }}"#
        ))
    }
}

#[derive(Debug)]
struct NetworkClient {
    attempts: AtomicU32,
    failures: u32,
}

impl NetworkClient {
    fn send_push_notification(&self, device_id: &str, payload: &str) -> Result<(), NotifyError> {
        if device_id.is_empty() {
            return Err(NotifyError::MissingDevice);
        }
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        println!("[NetworkClient] Attempt #{attempt} to send to '{device_id}'");
        if attempt <= self.failures {
            return Err(NotifyError::Network(device_id.to_string()));
        }
        println!("[NetworkClient] Push notification sent to '{device_id}'. Payload: {payload}");
        Ok(())
    }
}

pub async fn run(settings: &NotifySettings) -> anyhow::Result<()> {
    println!("--- Scenario: I/O and network errors with the retry helper ---");

    let helper = RetryHelper::new()
        .retry_count(settings.retry_count)
        .initial_delay(settings.initial_delay)
        .should_retry(NotifyError::is_transient);
    let files = FileProcessor {
        attempts: AtomicU32::new(0),
        failures: settings.file_failures,
    };
    let network = NetworkClient {
        attempts: AtomicU32::new(0),
        failures: settings.send_failures,
    };

    println!(">>> Getting payload with retry...\n");
    let payload = match helper
        .execute(|| std::future::ready(files.notification_payload(&settings.payload_path)))
        .await
    {
        Ok(payload) => payload,
        Err(error) => {
            println!("\n[Main] Operation failed: {error}");
            return Ok(());
        }
    };
    println!("\n[Main] Final payload: {payload}\n");

    println!(">>> Sending push notification with retry...\n");
    let sent = helper
        .execute(|| {
            std::future::ready(
                network
                    .send_push_notification(&settings.device_id, &payload)
                    .map(|()| true),
            )
        })
        .await;
    match sent {
        Ok(sent) => println!("\n[Main] Send result: {sent}"),
        Err(error) => println!("\n[Main] Operation failed: {error}"),
    }
    Ok(())
}
