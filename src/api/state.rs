use std::sync::Arc;

use crate::config::AppConfig;
use crate::executions::ExecutionStore;
use crate::links::LinkCatalog;
use crate::reconcile::Reconciler;
use crate::runner::JobRunner;

/// Shared state handed to every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub store: ExecutionStore,
    pub links: LinkCatalog,
    pub runner: Arc<dyn JobRunner>,
    pub reconciler: Reconciler,
    pub config: Arc<AppConfig>,
}
