//! プロジェクトの読み込み
//!
//! プロジェクトディレクトリからコンポジションファイルを探し、
//! 見つからなければ単一サービスのコンポジションを合成します。

use crate::error::{ComposeError, Result};
use crate::model::{Composition, ImageDescriptor};
use crate::parser::{default_composition, parse, parse_composition};
use std::path::{Path, PathBuf};

/// 探索するコンポジションファイル名（先に見つかったものを使う）
pub const COMPOSITION_FILE_NAMES: &[&str] = &["docker-compose.yml", "docker-compose.yaml"];

/// 読み込み済みのプロジェクト
#[derive(Debug, Clone)]
pub struct ComposeProject {
    pub path: PathBuf,
    pub name: String,
    pub composition: Composition,
    pub descriptors: Vec<ImageDescriptor>,
}

/// プロジェクト読み込みのオプション
#[derive(Debug, Clone, Default)]
pub struct LoadProjectOptions {
    pub project_path: PathBuf,
    pub project_name: Option<String>,
    /// コンポジションがない場合に使う代替 Dockerfile（プロジェクト相対）
    pub dockerfile_path: Option<String>,
}

/// `resolve_project` の結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedComposition {
    /// 見つかったファイル名。見つからなければ空
    pub file_name: String,
    /// ファイルの内容。見つからなければ空
    pub contents: String,
}

impl ResolvedComposition {
    pub fn is_found(&self) -> bool {
        !self.file_name.is_empty()
    }
}

/// コンポジション文字列からプロジェクトを作成
///
/// プロジェクト名が指定されなければディレクトリ名を使う。
pub fn create_project(
    path: &Path,
    compose_str: &str,
    project_name: Option<&str>,
) -> Result<ComposeProject> {
    let composition = parse_composition(compose_str)?;
    let descriptors = parse(&composition)?;

    let name = match project_name {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => default_project_name(path),
    };

    Ok(ComposeProject {
        path: path.to_path_buf(),
        name,
        composition,
        descriptors,
    })
}

fn default_project_name(path: &Path) -> String {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    absolute
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "fleetship".to_string())
}

/// プロジェクトを読み込む
///
/// `image` が指定された場合はファイルシステムを見ずに、
/// そのイメージだけを持つコンポジションを合成する。
#[tracing::instrument(skip(opts), fields(project = %opts.project_path.display()))]
pub fn load_project(opts: &LoadProjectOptions, image: Option<&str>) -> Result<ComposeProject> {
    tracing::debug!("Loading project...");

    let compose_str = match image {
        Some(image) => default_composition(Some(image), None),
        None => {
            let resolved = resolve_project(&opts.project_path, false)?;
            if resolved.is_found() {
                if let Some(dockerfile) = &opts.dockerfile_path {
                    tracing::warn!(
                        "Ignoring alternative dockerfile \"{}\" because composition file \"{}\" exists",
                        dockerfile,
                        resolved.file_name
                    );
                }
                resolved.contents
            } else {
                tracing::info!(
                    "Creating default composition with source: \"{}\"",
                    opts.project_path.display()
                );
                default_composition(None, opts.dockerfile_path.as_deref())
            }
        }
    };

    create_project(
        &opts.project_path,
        &compose_str,
        opts.project_name.as_deref(),
    )
}

/// プロジェクトディレクトリからコンポジションファイルを探す
///
/// 見つからなければ空の結果を返す（`quiet` でなければ info を出す）。
/// 見つかったファイルが読めない場合はエラー。
pub fn resolve_project(project_root: &Path, quiet: bool) -> Result<ResolvedComposition> {
    for file_name in COMPOSITION_FILE_NAMES {
        let path = project_root.join(file_name);
        if !path.exists() {
            continue;
        }

        tracing::debug!("{} file found at \"{}\"", file_name, project_root.display());
        let contents = std::fs::read_to_string(&path).map_err(|source| {
            tracing::error!("Error reading composition file \"{}\"", path.display());
            ComposeError::ReadComposition {
                path: path.clone(),
                source,
            }
        })?;

        return Ok(ResolvedComposition {
            file_name: file_name.to_string(),
            contents,
        });
    }

    if !quiet {
        tracing::info!(
            "No \"docker-compose.yml\" file found at \"{}\"",
            project_root.display()
        );
    }
    Ok(ResolvedComposition::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ImageSource;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_resolve_project_prefers_yml() {
        let temp_dir = tempdir().unwrap();
        fs::write(
            temp_dir.path().join("docker-compose.yml"),
            "services:\n  a:\n    image: one\n",
        )
        .unwrap();
        fs::write(
            temp_dir.path().join("docker-compose.yaml"),
            "services:\n  b:\n    image: two\n",
        )
        .unwrap();

        let resolved = resolve_project(temp_dir.path(), true).unwrap();
        assert_eq!(resolved.file_name, "docker-compose.yml");
        assert!(resolved.contents.contains("one"));
    }

    #[test]
    fn test_resolve_project_absent() {
        let temp_dir = tempdir().unwrap();
        let resolved = resolve_project(temp_dir.path(), false).unwrap();
        assert!(!resolved.is_found());
        assert_eq!(resolved, ResolvedComposition::default());
    }

    #[test]
    fn test_empty_composition_file_is_found() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join("docker-compose.yml"), "").unwrap();
        fs::write(temp_dir.path().join("Dockerfile"), "FROM alpine\n").unwrap();

        let resolved = resolve_project(temp_dir.path(), true).unwrap();
        assert_eq!(resolved.file_name, "docker-compose.yml");
        assert!(resolved.is_found());

        // 合成にフォールバックせず、空のファイルとして読み込みに失敗する
        let opts = LoadProjectOptions {
            project_path: temp_dir.path().to_path_buf(),
            project_name: Some("demo".to_string()),
            dockerfile_path: Some("Dockerfile".to_string()),
        };
        assert!(load_project(&opts, None).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_project_unreadable_is_fatal() {
        let temp_dir = tempdir().unwrap();
        // ディレクトリは read_to_string できない
        fs::create_dir(temp_dir.path().join("docker-compose.yml")).unwrap();

        assert!(matches!(
            resolve_project(temp_dir.path(), true),
            Err(ComposeError::ReadComposition { .. })
        ));
    }

    #[test]
    fn test_load_project_with_image_skips_filesystem() {
        let opts = LoadProjectOptions {
            project_path: PathBuf::from("/definitely/not/here"),
            project_name: Some("demo".to_string()),
            dockerfile_path: None,
        };
        let project = load_project(&opts, Some("nginx:alpine")).unwrap();
        assert_eq!(project.name, "demo");
        assert_eq!(project.descriptors.len(), 1);
        assert_eq!(
            project.descriptors[0].image,
            ImageSource::Image("nginx:alpine".to_string())
        );
    }

    #[test]
    fn test_load_project_synthesizes_from_dockerfile() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join("Dockerfile"), "FROM alpine\n").unwrap();

        let opts = LoadProjectOptions {
            project_path: temp_dir.path().to_path_buf(),
            ..Default::default()
        };
        let project = load_project(&opts, None).unwrap();

        assert_eq!(project.descriptors.len(), 1);
        assert_eq!(project.descriptors[0].service_name, "main");
        assert!(!project.descriptors[0].is_external());
        let expected_name = temp_dir.path().file_name().unwrap().to_string_lossy();
        assert_eq!(project.name, expected_name);
    }

    #[test]
    fn test_load_project_synthesizes_with_alternate_dockerfile() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join("Dockerfile.custom"), "FROM alpine\n").unwrap();

        let opts = LoadProjectOptions {
            project_path: temp_dir.path().to_path_buf(),
            project_name: Some("demo".to_string()),
            dockerfile_path: Some("Dockerfile.custom".to_string()),
        };
        let project = load_project(&opts, None).unwrap();

        assert_eq!(project.descriptors.len(), 1);
        let ImageSource::Build(build) = &project.descriptors[0].image else {
            panic!("expected build");
        };
        assert_eq!(build.dockerfile.as_deref(), Some("Dockerfile.custom"));
    }

    #[test]
    fn test_load_project_composition_wins_over_dockerfile() {
        let temp_dir = tempdir().unwrap();
        fs::write(
            temp_dir.path().join("docker-compose.yml"),
            "services:\n  web:\n    build: ./web\n  db:\n    image: postgres\n",
        )
        .unwrap();

        let opts = LoadProjectOptions {
            project_path: temp_dir.path().to_path_buf(),
            project_name: None,
            dockerfile_path: Some("Dockerfile.custom".to_string()),
        };
        let project = load_project(&opts, None).unwrap();

        let names: Vec<_> = project
            .descriptors
            .iter()
            .map(|d| d.service_name.as_str())
            .collect();
        assert_eq!(names, vec!["web", "db"]);
        let ImageSource::Build(build) = &project.descriptors[0].image else {
            panic!("expected build");
        };
        assert_eq!(build.dockerfile, None);
    }
}
