use std::sync::Arc;

use crate::metrics::SWEEPER_TICKS_TOTAL;
use crate::services::attempt_service::AttemptService;
use crate::services::signal_service::SignalService;
use crate::services::AppState;

/// Background sweep for past-deadline open attempts. Complements the
/// lazy enforcement on touch: an abandoned timed attempt is finalized
/// within one sweep interval even if the learner never returns.
pub fn spawn(state: Arc<AppState>) {
    let interval_secs = state.config.sweep_interval_seconds;
    if interval_secs == 0 {
        tracing::info!("Attempt sweeper disabled (sweep_interval_seconds=0)");
        return;
    }

    tokio::spawn(async move {
        let service = AttemptService::new(
            state.mongo.clone(),
            state.redis.clone(),
            state.config.abandoned_attempt_ttl_days,
            SignalService::new(state.http.clone(), state.config.signal_webhook_url.clone()),
        );
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!("Attempt sweeper started (interval={}s)", interval_secs);
        loop {
            ticker.tick().await;
            match service.sweep_expired(&state.locks).await {
                Ok(0) => {
                    SWEEPER_TICKS_TOTAL.with_label_values(&["idle"]).inc();
                }
                Ok(reclaimed) => {
                    SWEEPER_TICKS_TOTAL.with_label_values(&["reclaimed"]).inc();
                    tracing::info!("Sweeper finalized {} expired attempt(s)", reclaimed);
                }
                Err(e) => {
                    SWEEPER_TICKS_TOTAL.with_label_values(&["error"]).inc();
                    tracing::error!("Attempt sweep failed: {}", e);
                }
            }
        }
    });
}
