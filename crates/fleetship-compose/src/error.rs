use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("Composition parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Service \"{service}\" is invalid: {reason}")]
    InvalidService { service: String, reason: String },

    #[error("Composition has no services")]
    NoServices,

    #[error("Error reading composition file \"{}\":\n{source}", .path.display())]
    ReadComposition {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not access source folder: \"{}\"", .0.display())]
    SourceFolderInaccessible(PathBuf),

    #[error(
        "Error: the specified Dockerfile cannot be an absolute path. The path must be relative to, \
         and not a parent folder of, the project's source folder.\n\
         Specified dockerfile: \"{dockerfile}\"\n\
         Project's source folder: \"{}\"", .project.display()
    )]
    DockerfileAbsolute { dockerfile: String, project: PathBuf },

    #[error(
        "Error: the specified Dockerfile cannot be in a parent folder of the project's source folder. \
         Note that the path should be relative to the project's source folder, not the current folder.\n\
         Specified dockerfile: \"{dockerfile}\"\n\
         Project's source folder: \"{}\"", .project.display()
    )]
    DockerfileInParent { dockerfile: String, project: PathBuf },

    #[error(
        "Error: specified Dockerfile not found:\n\
         Specified dockerfile: \"{}\"\n\
         Project's source folder: \"{}\"\n\
         Note that the specified dockerfile path should be relative to the source folder.",
        .dockerfile.display(), .project.display()
    )]
    DockerfileNotFound { dockerfile: PathBuf, project: PathBuf },

    #[error(
        "Error: the specified Dockerfile must be in a subfolder of the source folder:\n\
         Specified dockerfile: \"{}\"\n\
         Project's source folder: \"{}\"",
        .dockerfile.display(), .project.display()
    )]
    DockerfileOutsideProject { dockerfile: PathBuf, project: PathBuf },

    #[error(
        "Error: no \"Dockerfile[.*]\", \"docker-compose.yml\" or \"package.json\" file found in source folder \"{}\"",
        .0.display()
    )]
    NoProjectFiles(PathBuf),

    #[error(
        "Error: \"docker-compose.y[a]ml\" file found in parent directory: please check that the correct \
         source folder was specified. (Suppress with the no-parent-check option.)"
    )]
    ParentComposition(PathBuf),

    #[error("Error parsing file \"{}\":\n {message}", .path.display())]
    MetadataParse { path: PathBuf, message: String },

    #[error(transparent)]
    Config(#[from] fleetship_config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ComposeError {
    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            ComposeError::ParentComposition(parent) => {
                format!(
                    "{}\n\
                     \n\
                     親ディレクトリ {} に docker-compose.yml がありますが、\n\
                     指定されたソースフォルダにはありません。\n\
                     親ディレクトリをソースフォルダとして指定してください。",
                    self,
                    parent.display()
                )
            }
            ComposeError::Config(e) => e.user_message(),
            _ => format!("{}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, ComposeError>;
