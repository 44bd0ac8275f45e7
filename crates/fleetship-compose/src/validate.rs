//! プロジェクトディレクトリの検証

use crate::error::{ComposeError, Result};
use crate::paths::{contains_posix, normalize_posix, path_to_posix, to_posix};
use crate::project::COMPOSITION_FILE_NAMES;
use fleetship_config::{RegistrySecrets, get_registry_secrets};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static PROJECT_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(Dockerfile|Dockerfile\.\S+|docker-compose\.ya?ml|package\.json)$")
        .expect("project file pattern is valid")
});

#[derive(Debug, Clone, Default)]
pub struct ValidateProjectOptions {
    pub project_path: PathBuf,
    pub dockerfile_path: Option<String>,
    pub no_parent_check: bool,
    pub registry_secrets_path: Option<PathBuf>,
}

/// 検証済みプロジェクトの情報
#[derive(Debug, Clone)]
pub struct ValidatedProject {
    /// プロジェクト相対の Dockerfile パス（`/` 区切り）
    pub dockerfile_path: String,
    pub registry_secrets: RegistrySecrets,
}

/// ソースフォルダを検証し、Dockerfile パスとレジストリシークレットを返す
#[tracing::instrument(skip(opts), fields(project = %opts.project_path.display()))]
pub fn validate_project_directory(opts: &ValidateProjectOptions) -> Result<ValidatedProject> {
    if !opts.project_path.is_dir() {
        return Err(ComposeError::SourceFolderInaccessible(
            opts.project_path.clone(),
        ));
    }

    let dockerfile_path = match &opts.dockerfile_path {
        Some(dockerfile) => validate_specified_dockerfile(&opts.project_path, dockerfile)?,
        None => {
            check_project_files(&opts.project_path)?;
            if !opts.no_parent_check {
                check_parent_composition(&opts.project_path)?;
            }
            "Dockerfile".to_string()
        }
    };

    let registry_secrets = get_registry_secrets(opts.registry_secrets_path.as_deref())?;

    Ok(ValidatedProject {
        dockerfile_path,
        registry_secrets,
    })
}

fn check_project_files(project_path: &Path) -> Result<()> {
    for entry in std::fs::read_dir(project_path)? {
        let entry = entry?;
        if PROJECT_FILE.is_match(&entry.file_name().to_string_lossy()) {
            return Ok(());
        }
    }
    Err(ComposeError::NoProjectFiles(project_path.to_path_buf()))
}

fn has_composition(folder: &Path) -> bool {
    COMPOSITION_FILE_NAMES
        .iter()
        .any(|name| folder.join(name).exists())
}

fn check_parent_composition(project_path: &Path) -> Result<()> {
    let parent = project_path.join("..");
    if !has_composition(project_path) && has_composition(&parent) {
        tracing::warn!(
            "The source folder \"{}\" has no docker-compose.yml file, but its parent folder does. \
             If the parent folder is the intended source folder, specify it instead.",
            project_path.display()
        );
        return Err(ComposeError::ParentComposition(parent));
    }
    Ok(())
}

/// 代替 Dockerfile のパスを検証
///
/// プロジェクト相対であること、親ディレクトリを指さないこと、存在すること、
/// プロジェクト配下にあることを確認し、`/` 区切りの正規化済みパスを返す。
pub fn validate_specified_dockerfile(project_path: &Path, dockerfile: &str) -> Result<String> {
    let project = normalize_posix(&path_to_posix(project_path));
    let dockerfile_posix = normalize_posix(&to_posix(dockerfile));

    if dockerfile_posix.starts_with('/') || Path::new(dockerfile).is_absolute() {
        return Err(ComposeError::DockerfileAbsolute {
            dockerfile: dockerfile_posix,
            project: project_path.to_path_buf(),
        });
    }

    // normalize_posix("a/../../b") は "../b"
    if dockerfile_posix.starts_with("..") {
        return Err(ComposeError::DockerfileInParent {
            dockerfile: dockerfile_posix,
            project: project_path.to_path_buf(),
        });
    }

    let full_path = project_path.join(&dockerfile_posix);
    if !full_path.exists() {
        return Err(ComposeError::DockerfileNotFound {
            dockerfile: full_path,
            project: project_path.to_path_buf(),
        });
    }

    let full_posix = normalize_posix(&format!("{}/{}", project, dockerfile_posix));
    if !contains_posix(&absolute_posix(&project), &absolute_posix(&full_posix)) {
        return Err(ComposeError::DockerfileOutsideProject {
            dockerfile: full_path,
            project: project_path.to_path_buf(),
        });
    }

    Ok(dockerfile_posix)
}

fn absolute_posix(path: &str) -> String {
    if path.starts_with('/') {
        return path.to_string();
    }
    let cwd = std::env::current_dir()
        .map(|d| path_to_posix(&d))
        .unwrap_or_default();
    normalize_posix(&format!("{}/{}", cwd, path))
}
