//! プロジェクトタイプの解決
//!
//! ビルドコンテキストの tar から使う Dockerfile を選び、テンプレートを展開して
//! ストリームに書き戻します。
//!
//! 検索順序:
//! 1. 明示的な指定（代替 Dockerfile）
//! 2. `Dockerfile`
//! 3. `Dockerfile.<device_type>`, `Dockerfile.<arch>`
//! 4. `Dockerfile.template`

use crate::error::{BuildError, Result};
use crate::tarball::{TarEntry, read_entries, write_entries};
use crate::task::Resolution;
use bytes::Bytes;
use fleetship_compose::paths;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const STANDARD_DOCKERFILE: &str = "Standard Dockerfile";
pub const ARCH_DOCKERFILE: &str = "Architecture-specific Dockerfile";
pub const DOCKERFILE_TEMPLATE: &str = "Dockerfile.template";

const DOCKERFILE: &str = "Dockerfile";
const TEMPLATE_SUFFIX: &str = ".template";

/// 解決済み Dockerfile を書き換えるフック
pub type PreprocessHook = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// 解決に使うパラメータ
#[derive(Clone, Default)]
pub struct ResolutionParams {
    pub arch: String,
    pub device_type: String,
    /// `%%KEY%%` として展開する変数
    pub env: BTreeMap<String, String>,
    pub preprocess_hook: Option<PreprocessHook>,
}

impl std::fmt::Debug for ResolutionParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionParams")
            .field("arch", &self.arch)
            .field("device_type", &self.device_type)
            .field("env", &self.env)
            .field("preprocess_hook", &self.preprocess_hook.is_some())
            .finish()
    }
}

/// `%%FLEETSHIP_MACHINE_NAME%%` などのテンプレート変数を展開
pub fn expand_template(template: &str, params: &ResolutionParams) -> String {
    let mut result = template
        .replace("%%FLEETSHIP_MACHINE_NAME%%", &params.device_type)
        .replace("%%FLEETSHIP_ARCH%%", &params.arch);

    for (key, value) in &params.env {
        let placeholder = format!("%%{}%%", key);
        result = result.replace(&placeholder, value);
    }

    result
}

/// ビルドストリームからプロジェクトタイプを解決する
///
/// Dockerfile が見つからなければ `None`。解決された Dockerfile は
/// ストリームに書き戻される。
pub fn resolve_stream(
    stream: &Bytes,
    params: &ResolutionParams,
    dockerfile_path: Option<&str>,
) -> Result<Option<(Resolution, Bytes)>> {
    let mut entries = read_entries(stream)?;
    let index: BTreeMap<String, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (paths::normalize_posix(&e.path), i))
        .collect();

    let Some((project_type, source_path)) = select_dockerfile(&index, params, dockerfile_path)?
    else {
        return Ok(None);
    };
    tracing::debug!("Resolved {} as {}", source_path, project_type);

    let source = &entries[index[&source_path]];
    let raw = String::from_utf8_lossy(&source.data).into_owned();
    let mut dockerfile = if project_type == DOCKERFILE_TEMPLATE {
        expand_template(&raw, params)
    } else {
        raw
    };
    if let Some(hook) = &params.preprocess_hook {
        dockerfile = hook(&dockerfile);
    }

    // テンプレートは拡張子を外した隣のパス、アーキテクチャ別は `Dockerfile` に書き出す
    let output_path = match project_type {
        STANDARD_DOCKERFILE => source_path,
        DOCKERFILE_TEMPLATE => source_path
            .strip_suffix(TEMPLATE_SUFFIX)
            .unwrap_or(DOCKERFILE)
            .to_string(),
        _ => DOCKERFILE.to_string(),
    };

    match index.get(&output_path) {
        Some(&i) => entries[i].data = dockerfile.clone().into_bytes(),
        None => entries.push(TarEntry::file(
            output_path.clone(),
            dockerfile.clone().into_bytes(),
        )),
    }

    let resolution = Resolution {
        project_type: project_type.to_string(),
        dockerfile,
        dockerfile_path: output_path,
    };
    Ok(Some((resolution, write_entries(entries)?)))
}

fn select_dockerfile(
    index: &BTreeMap<String, usize>,
    params: &ResolutionParams,
    dockerfile_path: Option<&str>,
) -> Result<Option<(&'static str, String)>> {
    if let Some(path) = dockerfile_path {
        let path = paths::normalize_posix(&paths::to_posix(path));
        if !index.contains_key(&path) {
            return Err(BuildError::DockerfileNotFound(path));
        }
        let project_type = if path.ends_with(TEMPLATE_SUFFIX) {
            DOCKERFILE_TEMPLATE
        } else {
            STANDARD_DOCKERFILE
        };
        return Ok(Some((project_type, path)));
    }

    if index.contains_key(DOCKERFILE) {
        return Ok(Some((STANDARD_DOCKERFILE, DOCKERFILE.to_string())));
    }

    for suffix in [&params.device_type, &params.arch] {
        if suffix.is_empty() {
            continue;
        }
        let candidate = format!("{}.{}", DOCKERFILE, suffix);
        if index.contains_key(&candidate) {
            return Ok(Some((ARCH_DOCKERFILE, candidate)));
        }
    }

    if index.contains_key(DOCKERFILE_TEMPLATE) {
        return Ok(Some((DOCKERFILE_TEMPLATE, DOCKERFILE_TEMPLATE.to_string())));
    }

    Ok(None)
}
