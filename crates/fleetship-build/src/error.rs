use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Dockerfile not found: {0}")]
    DockerfileNotFound(String),

    #[error("Build context for service \"{service}\" not found: {context}")]
    ContextNotFound { service: String, context: String },

    #[error("Docker connection error: {0}")]
    DockerConnection(#[from] bollard::errors::Error),

    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("Push failed: {message}")]
    PushFailed { message: String },

    #[error("Invalid build configuration: {0}")]
    InvalidConfig(String),

    #[error(
        "Project type for service \"{service}\" could not be determined. Missing a Dockerfile?"
    )]
    UnresolvedProjectType { service: String },

    #[error(
        "The \"build secrets\" feature requires a container engine with build secrets support, \
         but a standard Docker daemon was detected. If the build secrets feature is not required, \
         comment out or delete the 'build-secrets' entry in the file: \"{}\"", .file.display()
    )]
    BuildSecretsUnsupported { file: PathBuf },

    #[error("Service \"{service}\" failed to build: {message}")]
    ServiceBuildFailed { service: String, message: String },

    #[error("Internal error: {0}")]
    InvariantViolation(String),

    #[error("Emulation binary for {arch} not found: {}", .path.display())]
    EmulationBinaryMissing { arch: String, path: PathBuf },

    #[error("Task \"{service}\" cannot move from {from} to {to}")]
    InvalidStageTransition {
        service: String,
        from: &'static str,
        to: &'static str,
    },

    #[error("Build interrupted")]
    Interrupted,

    #[error(transparent)]
    Compose(#[from] fleetship_compose::ComposeError),

    #[error(transparent)]
    Config(#[from] fleetship_config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            BuildError::UnresolvedProjectType { service } => {
                format!(
                    "{}\n\
                     \n\
                     解決方法:\n\
                     1. サービス \"{}\" のビルドコンテキストに Dockerfile を置いてください\n\
                     2. Dockerfile.<アーキテクチャ> または Dockerfile.template も使えます",
                    self, service
                )
            }
            BuildError::EmulationBinaryMissing { path, .. } => {
                format!(
                    "{}\n\
                     \n\
                     qemu の static バイナリを {} に配置するか、\n\
                     FLEETSHIP_EMULATION_DIR で配置先を指定してください。",
                    self,
                    path.display()
                )
            }
            BuildError::ServiceBuildFailed { .. } | BuildError::BuildFailed(_) => {
                format!(
                    "{}\n\
                     \n\
                     Dockerfileの内容を確認してください。",
                    self
                )
            }
            BuildError::Compose(e) => e.user_message(),
            BuildError::Config(e) => e.user_message(),
            _ => format!("{}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;
pub type BuildResult<T> = Result<T>;
