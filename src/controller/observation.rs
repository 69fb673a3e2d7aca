use tokio::time::{self, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::Shared;

const ENABLE_LOGS: bool = true;
const LOG_TARGET: &str = "formtrace::observation";

use crate::log_info;

/// Drives the two observation cadences until cancelled: freeze polls and the
/// more frequent enrichment passes.
pub(crate) async fn observation_loop(
    shared: Shared,
    poll_interval: Duration,
    enrich_interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut poll_ticker = time::interval(poll_interval);
    poll_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut enrich_ticker = time::interval(enrich_interval);
    enrich_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = poll_ticker.tick() => {
                shared.poll_once().await;
            }
            _ = enrich_ticker.tick() => {
                shared.enrich_once().await;
            }
            _ = cancel_token.cancelled() => {
                log_info!("observation loop shutting down");
                break;
            }
        }
    }
}
