//! fleetship のコンポジション解決
//!
//! プロジェクトディレクトリからマルチサービスのコンポジションを読み込み
//! （なければ合成し）、サービスごとのイメージ記述子とビルドコンテキストを
//! 導出します。

pub mod error;
pub mod metadata;
pub mod model;
pub mod parser;
pub mod paths;
pub mod project;
pub mod service_dirs;
pub mod validate;

pub use error::{ComposeError, Result};
pub use metadata::{BuildMetadata, load_build_metadata};
pub use model::{
    BuildConfig, BuildSpec, BuildSpecConfig, Composition, ImageDescriptor, ImageSource, Service,
    Services,
};
pub use parser::{default_composition, parse, parse_composition};
pub use project::{
    COMPOSITION_FILE_NAMES, ComposeProject, LoadProjectOptions, ResolvedComposition,
    create_project, load_project, resolve_project,
};
pub use service_dirs::get_service_dirs_from_composition;
pub use validate::{
    ValidateProjectOptions, ValidatedProject, validate_project_directory,
    validate_specified_dockerfile,
};
