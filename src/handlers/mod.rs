pub mod common;
pub mod purchase_orders;

use crate::{
    db::DbPool,
    events::EventSender,
    services::{
        procurement::ProcurementService,
        reference::{DbReferenceData, DbRegistrationRegistry, ReferenceData, RegistrationRegistry},
    },
};
use std::sync::Arc;
use std::time::Duration;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub procurement: Arc<ProcurementService>,
}

impl AppServices {
    /// Wires the services against the database-backed reference data.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        transaction_timeout: Duration,
    ) -> Self {
        let reference: Arc<dyn ReferenceData> = Arc::new(DbReferenceData::new(db_pool.clone()));
        let registry: Arc<dyn RegistrationRegistry> =
            Arc::new(DbRegistrationRegistry::new(db_pool.clone()));
        Self::with_collaborators(db_pool, reference, registry, event_sender, transaction_timeout)
    }

    /// Wires the services against caller-supplied collaborators.
    pub fn with_collaborators(
        db_pool: Arc<DbPool>,
        reference: Arc<dyn ReferenceData>,
        registry: Arc<dyn RegistrationRegistry>,
        event_sender: Arc<EventSender>,
        transaction_timeout: Duration,
    ) -> Self {
        let procurement = Arc::new(ProcurementService::new(
            db_pool,
            reference,
            registry,
            event_sender,
            transaction_timeout,
        ));

        Self { procurement }
    }
}
