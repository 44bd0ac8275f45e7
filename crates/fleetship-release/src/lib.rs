//! fleetship release transaction
//!
//! Tags built images for the registry, pushes them, and records the outcome as
//! a release on the release platform. Tags are always removed afterwards and
//! the release is always finalized, whatever happened in between.

pub mod error;
pub mod model;
pub mod platform;
pub mod tagging;
pub mod transaction;

pub use error::{ReleaseError, Result};
pub use model::{Release, ReleaseStatus, ServiceImage, TaggedImage};
pub use platform::{ReleasePlatform, ReleaseTarget};
pub use tagging::{ImageLocation, parse_image_location, tag_service_images, untag_images};
pub use transaction::{DeployOptions, DeployRequest, deploy_project, push_scopes};
