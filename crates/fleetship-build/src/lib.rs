//! fleetship image build functionality
//!
//! This crate turns a composition and its project directory into built images:
//! build context packing, per-service task derivation and Dockerfile resolution,
//! optional emulated builds, progress rendering, and image inspection.

pub mod auth;
pub mod backend;
pub mod builder;
pub mod emulation;
pub mod engine;
pub mod error;
pub mod image;
pub mod options;
pub mod pipeline;
pub mod progress;
pub mod resolver;
pub mod stream;
pub mod tarball;
pub mod task;

pub use auth::{extract_registry, split_image_tag};
pub use backend::{BuildBackend, LocalImage, PreprocessHook, ResolutionParams};
pub use builder::DockerfileBackend;
pub use emulation::TransposeOptions;
pub use engine::{BuildOutput, ContainerEngine, DockerEngine, EngineBuildOptions};
pub use error::{BuildError, BuildResult};
pub use image::{BuiltImage, ImageProps, LOG_LENGTH_MAX, truncate_log};
pub use options::{BuildProjectOptions, DockerBuildOptions, IgnoreMode};
pub use pipeline::{BuildRequest, build_project};
pub use progress::{
    InlineRenderer, InteractiveRenderer, ProgressEvent, ProgressSink, Renderer, StatusSpinner,
    start_renderer,
};
pub use stream::{LogBuffer, PullProgress};
pub use task::{BuildTask, Resolution, TaskSource, TaskStage};
