use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};

use super::SharedState;
use super::worker::Shutdown;

/// Trigger `shutdown` once no client has been connected for `idle_timeout`.
///
/// Checks every half timeout. An open connection at check time counts as
/// activity, as does any connection opening or closing in between.
pub(crate) async fn idle_monitor(state: SharedState, idle_timeout: Duration, shutdown: Arc<Shutdown>) {
    let mut ticker = time::interval((idle_timeout / 2).max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while shutdown.is_running() {
        tokio::select! {
            _ = shutdown.stopped() => break,
            _ = ticker.tick() => {}
        }

        let idle_for = {
            let mut state = state.lock().await;
            if state.connections > 0 {
                state.last_activity = Instant::now();
            }
            state.last_activity.elapsed()
        };

        if idle_for > idle_timeout {
            tracing::info!(idle_secs = idle_for.as_secs_f64(), "no clients connected; shutting down");
            shutdown.trigger();
        }
    }
}
