use citysim_core::config::LayeredConfig;
use citysim_engine::{AnalysisRegistry, Dispatcher, GeometryService, LocalJobGateway, Services};
use citysim_store::cache::Cache;
use citysim_store::ports::{GeometryStore, RunStore};
use std::sync::Arc;

use crate::simulators;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub engine_config: LayeredConfig,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, engine_config: LayeredConfig) -> Self {
        Self {
            dispatcher,
            engine_config,
        }
    }

    /// Wire the engine around the given stores and the in-process job gateway
    pub fn compose(
        run_store: Arc<dyn RunStore>,
        geometry_store: Arc<dyn GeometryStore>,
        cache: Arc<Cache>,
        engine_config: LayeredConfig,
    ) -> Self {
        let gateway = Arc::new(LocalJobGateway::new());
        simulators::register_urban_wind(&gateway);

        let services = Services {
            store: run_store,
            gateway,
            geometries: Arc::new(GeometryService::new(geometry_store, cache)),
        };
        let dispatcher = Dispatcher::new(
            AnalysisRegistry::with_defaults(),
            services,
            engine_config.max_concurrent_runs.value,
        );

        Self::new(dispatcher, engine_config)
    }

    pub fn run_store(&self) -> &Arc<dyn RunStore> {
        &self.dispatcher.services().store
    }
}
