use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::engine::drivers::DriverRoster;
use crate::engine::fare::FareCalculator;
use crate::engine::ledger::WalletLedger;
use crate::engine::lifecycle::RideLifecycle;
use crate::engine::matching::MatchingCoordinator;
use crate::engine::queue::DispatchJob;
use crate::geo::index::GeoIndex;
use crate::integrations::events::BroadcastSink;
use crate::integrations::payment::PaymentGateway;
use crate::observability::metrics::Metrics;
use crate::store::{Repository, Store};

pub struct AppState {
    pub config: Config,
    pub geo: Arc<GeoIndex>,
    pub fares: FareCalculator,
    pub drivers: DriverRoster,
    pub lifecycle: RideLifecycle,
    pub ledger: WalletLedger,
    pub matching: MatchingCoordinator,
    pub events: BroadcastSink,
    pub dispatch_tx: mpsc::Sender<DispatchJob>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> (Self, mpsc::Receiver<DispatchJob>) {
        let (dispatch_tx, dispatch_rx) = mpsc::channel(config.dispatch_queue_size);
        let events = BroadcastSink::new(config.event_buffer_size);
        let metrics = Metrics::new();

        let repo = Repository::new(store, config.store_timeout);
        let geo = Arc::new(GeoIndex::new());
        let fares = FareCalculator::new(config.fare.clone());
        let sink = Arc::new(events.clone());

        let drivers = DriverRoster::new(
            repo.clone(),
            geo.clone(),
            metrics.clone(),
            config.commit_retries,
        );
        let lifecycle = RideLifecycle::new(
            repo.clone(),
            fares.clone(),
            geo.clone(),
            sink.clone(),
            gateway.clone(),
            metrics.clone(),
            config.commit_retries,
        );
        let ledger = WalletLedger::new(
            repo.clone(),
            gateway,
            sink,
            metrics.clone(),
            config.commit_retries,
        );
        let matching = MatchingCoordinator::new(repo, geo.clone(), lifecycle.clone(), metrics.clone());

        (
            Self {
                config,
                geo,
                fares,
                drivers,
                lifecycle,
                ledger,
                matching,
                events,
                dispatch_tx,
                metrics,
            },
            dispatch_rx,
        )
    }
}
