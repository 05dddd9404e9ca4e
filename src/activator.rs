//! Resource activation sweeper.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::engine::Engine;
use crate::observability;

/// Default reconciliation period.
pub const DEFAULT_SWEEP_PERIOD: Duration = Duration::from_secs(300);

/// Background task reconciling scheduled inactivity windows against the
/// clock: `Active --(now ≥ start)--> Inactive --(now ≥ end)--> Active`,
/// clearing the window on reactivation. Manual toggles and explicit
/// schedule cancels act immediately and win any race — each transition is
/// re-validated under the resource's write lock.
pub async fn run_activator(engine: Arc<Engine>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        sweep_once(&engine).await;
    }
}

/// One reconciliation pass.
pub async fn sweep_once(engine: &Engine) {
    let now = engine.now_ms();
    let (to_deactivate, to_reactivate) = engine.collect_activation_due(now);

    for id in to_deactivate {
        match engine.sweep_deactivate(id).await {
            Ok(true) => {
                metrics::counter!(
                    observability::ACTIVATION_TRANSITIONS_TOTAL,
                    "direction" => "deactivate"
                )
                .increment(1);
                info!("deactivated resource {id}");
            }
            Ok(false) => debug!("deactivation no longer due for {id}"),
            // May have been deleted meanwhile — that's fine
            Err(e) => debug!("sweep skip {id}: {e}"),
        }
    }

    for id in to_reactivate {
        match engine.sweep_reactivate(id).await {
            Ok(true) => {
                metrics::counter!(
                    observability::ACTIVATION_TRANSITIONS_TOTAL,
                    "direction" => "reactivate"
                )
                .increment(1);
                info!("reactivated resource {id}");
            }
            Ok(false) => debug!("reactivation no longer due for {id}"),
            Err(e) => debug!("sweep skip {id}: {e}"),
        }
    }
}
