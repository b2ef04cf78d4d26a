use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// One pending background dispatch of a requested ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchJob {
    pub ride_id: Uuid,
    pub attempt: u32,
}

impl DispatchJob {
    pub fn first(ride_id: Uuid) -> Self {
        Self { ride_id, attempt: 1 }
    }

    pub fn retry(self) -> Self {
        Self {
            ride_id: self.ride_id,
            attempt: self.attempt + 1,
        }
    }
}

/// Queues without waiting. A full queue is reported back to the caller
/// instead of holding up the request that created the ride.
pub fn enqueue_ride(state: &AppState, job: DispatchJob) -> Result<(), AppError> {
    state.metrics.dispatch_queue_depth.inc();
    match state.dispatch_tx.try_send(job) {
        Ok(()) => Ok(()),
        Err(err) => {
            state.metrics.dispatch_queue_depth.dec();
            Err(match err {
                TrySendError::Full(job) => {
                    AppError::Internal(format!("dispatch queue full, ride {}", job.ride_id))
                }
                TrySendError::Closed(job) => {
                    AppError::Internal(format!("dispatch queue closed, ride {}", job.ride_id))
                }
            })
        }
    }
}

/// Waits for room in the queue. Only for background tasks.
pub async fn requeue_ride(state: &AppState, job: DispatchJob) -> Result<(), AppError> {
    state.metrics.dispatch_queue_depth.inc();
    if let Err(err) = state.dispatch_tx.send(job).await {
        state.metrics.dispatch_queue_depth.dec();
        return Err(AppError::Internal(format!("dispatch queue send failed: {err}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::{DispatchJob, enqueue_ride};
    use crate::config::Config;
    use crate::error::AppError;
    use crate::integrations::payment::LoggingGateway;
    use crate::state::AppState;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn full_queue_is_refused_without_waiting() {
        let config = Config {
            dispatch_queue_size: 1,
            ..Config::default()
        };
        let (state, mut rx) = AppState::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(LoggingGateway::default()),
        );

        enqueue_ride(&state, DispatchJob::first(Uuid::new_v4())).unwrap();
        let second = enqueue_ride(&state, DispatchJob::first(Uuid::new_v4()));

        assert!(matches!(second, Err(AppError::Internal(_))));
        assert_eq!(state.metrics.dispatch_queue_depth.get(), 1);
        assert_eq!(rx.recv().await.unwrap().attempt, 1);
    }
}
