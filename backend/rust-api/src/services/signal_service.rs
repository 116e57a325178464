use crate::metrics::SIGNALS_DISPATCHED_TOTAL;
use crate::models::event::OutboundSignal;
use crate::utils::retry::{retry_async_with_config, RetryConfig};

/// Delivers module-completed / course-certified signals to the external
/// notification collaborator. Dispatch is fire-and-forget: a failed
/// delivery is logged and counted but never fails the ingest path.
#[derive(Clone)]
pub struct SignalService {
    http: reqwest::Client,
    webhook_url: Option<String>,
}

impl SignalService {
    pub fn new(http: reqwest::Client, webhook_url: Option<String>) -> Self {
        Self { http, webhook_url }
    }

    pub fn dispatch(&self, signals: Vec<OutboundSignal>) {
        for signal in signals {
            tracing::info!(
                "Signal emitted: {} {}",
                signal.signal_name(),
                serde_json::to_string(&signal).unwrap_or_else(|_| "{}".to_string())
            );

            let Some(url) = self.webhook_url.clone() else {
                SIGNALS_DISPATCHED_TOTAL
                    .with_label_values(&[signal.signal_name(), "logged"])
                    .inc();
                continue;
            };

            let client = self.http.clone();
            // One id across all delivery retries so the receiver can
            // deduplicate.
            let dispatch_id = uuid::Uuid::new_v4().to_string();
            tokio::spawn(async move {
                let name = signal.signal_name();
                let res = retry_async_with_config(RetryConfig::default(), || async {
                    client
                        .post(&url)
                        .header("X-Dispatch-Id", &dispatch_id)
                        .json(&signal)
                        .send()
                        .await?
                        .error_for_status()
                        .map(|_| ())
                })
                .await;

                match res {
                    Ok(()) => {
                        SIGNALS_DISPATCHED_TOTAL
                            .with_label_values(&[name, "delivered"])
                            .inc();
                    }
                    Err(e) => {
                        SIGNALS_DISPATCHED_TOTAL
                            .with_label_values(&[name, "failed"])
                            .inc();
                        tracing::error!("Failed to deliver {} signal: {}", name, e);
                    }
                }
            });
        }
    }
}
