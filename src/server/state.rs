use axum::extract::FromRef;

use crate::background_jobs::SchedulerHandle;
use crate::catalog_store::CatalogStore;
use crate::content_store::ArchiveUrlTemplate;
use std::sync::Arc;

use super::ServerConfig;

pub type GuardedCatalogStore = Arc<dyn CatalogStore>;
pub type OptionalSchedulerHandle = Option<SchedulerHandle>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub catalog_store: GuardedCatalogStore,
    /// Where downstream mirrors are told to download archives from
    pub archive_urls: ArchiveUrlTemplate,
    pub scheduler_handle: OptionalSchedulerHandle,
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        catalog_store: GuardedCatalogStore,
        archive_urls: ArchiveUrlTemplate,
        scheduler_handle: OptionalSchedulerHandle,
    ) -> Self {
        Self {
            config,
            catalog_store,
            archive_urls,
            scheduler_handle,
        }
    }
}

impl FromRef<ServerState> for GuardedCatalogStore {
    fn from_ref(input: &ServerState) -> Self {
        input.catalog_store.clone()
    }
}

impl FromRef<ServerState> for ArchiveUrlTemplate {
    fn from_ref(input: &ServerState) -> Self {
        input.archive_urls.clone()
    }
}

impl FromRef<ServerState> for OptionalSchedulerHandle {
    fn from_ref(input: &ServerState) -> Self {
        input.scheduler_handle.clone()
    }
}
