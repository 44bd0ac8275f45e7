//! Release platform abstraction
//!
//! The remote service that records releases and issues registry tokens.
//! Implementations wrap a vendor SDK, so errors cross this boundary as
//! opaque [`anyhow::Error`] values.

use crate::model::{Release, ServiceImage};
use async_trait::async_trait;
use fleetship_compose::Composition;

/// Options identifying who deploys what
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseTarget {
    pub app_id: u64,
    pub user_id: u64,
}

/// Release platform trait
#[async_trait]
pub trait ReleasePlatform: Send + Sync {
    /// Create a release in the `running` state
    ///
    /// The returned release carries one service image per service of the
    /// composition, each with its registry image location.
    async fn create_release(
        &self,
        target: ReleaseTarget,
        composition: &Composition,
    ) -> anyhow::Result<Release>;

    /// Persist the final state of a release
    async fn update_release(&self, release: &Release) -> anyhow::Result<()>;

    /// Image locations of the latest successful release of the application
    async fn latest_release_image_locations(&self, app_id: u64) -> anyhow::Result<Vec<String>>;

    /// Obtain a bearer token for the given registry scopes
    async fn authorize_push(&self, registry: &str, scopes: &[String]) -> anyhow::Result<String>;

    /// Persist one service image after its push attempt
    async fn update_image(&self, image: &ServiceImage) -> anyhow::Result<()>;
}
