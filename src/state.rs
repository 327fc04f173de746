use std::sync::Arc;

use crate::services::job_scheduler_service::JobSchedulerService;
use crate::services::job_store::JobStore;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<JobSchedulerService>,
    /// Run journal for the admin API; `None` without a database
    pub store: Option<Arc<dyn JobStore>>,
}
