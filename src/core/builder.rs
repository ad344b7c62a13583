use std::sync::Arc;

use tokio::sync::broadcast::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{actor::SessionContext, config::Config, registry::SessionRegistry, tracker::Tracker};
use crate::{
    alerts::AlertEngine,
    broadcast::{BroadcastRouter, SubscriptionManager},
    error::CatalogError,
    events::Bus,
    geo::{Catalog, GeoValidator, GeofenceIndex},
    sinks::{Sink, SinkSet},
};

/// Builder for a [`Tracker`].
pub struct TrackerBuilder {
    cfg: Config,
    catalog: Catalog,
    sinks: Vec<Arc<dyn Sink>>,
}

impl TrackerBuilder {
    /// Creates a builder with the default catalog (Sri Lanka bounds, no geofences).
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            catalog: Catalog::default(),
            sinks: Vec::new(),
        }
    }

    /// Sets the read-only catalog: operating bounding box and geofences.
    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Sets internal event sinks.
    ///
    /// Sinks receive every bus event through dedicated workers with bounded queues.
    pub fn with_sinks(mut self, sinks: Vec<Arc<dyn Sink>>) -> Self {
        self.sinks = sinks;
        self
    }

    /// Builds the tracker.
    ///
    /// Initializes the bus, the sink workers, the subscription tables, the
    /// router and the session registry with its listener. Must run inside a
    /// tokio runtime. Fails if the catalog does not validate.
    pub fn build(self) -> Result<Tracker, CatalogError> {
        self.catalog.validate()?;
        let bounds = self.catalog.bounds;
        let geofences = Arc::new(GeofenceIndex::new(self.catalog.geofences)?);

        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let sinks = Arc::new(SinkSet::new(self.sinks, bus.clone()));
        let runtime_token = CancellationToken::new();
        spawn_sink_listener(&bus, &sinks, &runtime_token);

        let subs = Arc::new(SubscriptionManager::new(
            self.cfg.observer_queue_clamped(),
            bus.clone(),
        ));
        let ctx = Arc::new(SessionContext {
            validator: GeoValidator::new(
                bounds,
                self.cfg.speed_limit_kmh,
                self.cfg.max_reported_speed_kmh,
            ),
            engine: AlertEngine::new(geofences, self.cfg.alert_cooldown),
            router: BroadcastRouter::new(Arc::clone(&subs), bus.clone()),
            cfg: self.cfg.clone(),
        });

        let registry = SessionRegistry::new(Arc::clone(&ctx), bus.clone(), runtime_token.clone());
        registry.spawn_listener();

        Ok(Tracker::new_internal(
            self.cfg,
            ctx,
            registry,
            subs,
            bus,
            sinks,
            runtime_token,
        ))
    }
}

/// Forwards bus events to the sink set (fire-and-forget).
///
/// On cancellation, events already buffered are still forwarded.
fn spawn_sink_listener(bus: &Bus, sinks: &Arc<SinkSet>, token: &CancellationToken) {
    if sinks.is_empty() {
        return;
    }
    let mut rx = bus.subscribe();
    let set = Arc::clone(sinks);
    let token = token.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                msg = rx.recv() => match msg {
                    Ok(ev) => set.emit(&ev),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "sink listener lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                _ = token.cancelled() => {
                    loop {
                        match rx.try_recv() {
                            Ok(ev) => set.emit(&ev),
                            Err(TryRecvError::Lagged(_)) => continue,
                            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                        }
                    }
                    break;
                }
            }
        }
    });
}
