use std::sync::Arc;

use diesel_async::{pg::AsyncPgConnection, pooled_connection::deadpool::Pool};
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::import_service::ImportService;
use crate::registry_client::congress::CongressClient;
use crate::registry_client::federal_register::FederalRegisterClient;
use crate::registry_client::legislators::LegislatorsClient;

pub struct AppState {
    pub pool: Pool<AsyncPgConnection>,
    pub shutdown_token: CancellationToken,
    pub registry: RwLock<Registry>,
    pub import_service: Arc<ImportService>,
    pub congress: CongressClient,
    pub federal_register: FederalRegisterClient,
    pub legislators: LegislatorsClient,
}

impl AppState {
    pub fn new(
        pool: Pool<AsyncPgConnection>,
        shutdown_token: CancellationToken,
        import_service: Arc<ImportService>,
        congress: CongressClient,
        federal_register: FederalRegisterClient,
        legislators: LegislatorsClient,
    ) -> Self {
        Self {
            pool,
            shutdown_token,
            registry: RwLock::new(<Registry>::default()),
            import_service,
            congress,
            federal_register,
            legislators,
        }
    }
}
