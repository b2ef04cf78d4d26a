use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};
use tracing::{debug, error, info, warn};

use crate::engine::queue::{DispatchJob, requeue_ride};
use crate::error::AppError;
use crate::state::AppState;

/// Back-off before a ride with no taker is tried again.
const REQUEUE_DELAY: Duration = Duration::from_millis(250);

pub async fn run_dispatch_worker(state: Arc<AppState>, mut job_rx: mpsc::Receiver<DispatchJob>) {
    info!("dispatch worker started");

    while let Some(job) = job_rx.recv().await {
        state.metrics.dispatch_queue_depth.dec();

        let start = Instant::now();
        let outcome = match process_job(state.clone(), job).await {
            Ok(()) => "success",
            Err(err) if err.is_routine() => {
                debug!(ride_id = %job.ride_id, error = %err, "ride no longer needs dispatch");
                "skipped"
            }
            Err(AppError::InvalidTransition(reason)) => {
                debug!(ride_id = %job.ride_id, reason = %reason, "ride left the requested state");
                "skipped"
            }
            Err(err) => {
                error!(ride_id = %job.ride_id, error = %err, "failed to dispatch ride");
                "error"
            }
        };

        state
            .metrics
            .dispatch_latency_seconds
            .with_label_values(&[outcome])
            .observe(start.elapsed().as_secs_f64());
    }

    warn!("dispatch worker stopped: queue channel closed");
}

async fn process_job(state: Arc<AppState>, job: DispatchJob) -> Result<(), AppError> {
    let dispatched = state
        .matching
        .dispatch(job.ride_id, state.config.dispatch_radius_m)
        .await?;

    if dispatched.is_some() {
        return Ok(());
    }

    if job.attempt >= state.config.dispatch_max_attempts {
        warn!(
            ride_id = %job.ride_id,
            attempts = job.attempt,
            "no driver found; giving up on background dispatch"
        );
        return Ok(());
    }

    debug!(ride_id = %job.ride_id, attempt = job.attempt, "no eligible drivers; re-queueing ride");
    let state = state.clone();
    tokio::spawn(async move {
        sleep(REQUEUE_DELAY).await;
        if let Err(err) = requeue_ride(&state, job.retry()).await {
            error!(ride_id = %job.ride_id, error = %err, "failed to re-queue ride");
        }
    });

    Ok(())
}
