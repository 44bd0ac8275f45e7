//! サービスごとのビルドコンテキストディレクトリ

use crate::error::Result;
use crate::model::Composition;
use crate::parser::parse_composition;
use crate::paths::{normalize_posix, path_to_posix, relative_posix, to_posix};
use crate::project::resolve_project;
use std::collections::BTreeMap;
use std::path::Path;

/// サービス名 -> プロジェクトルートからの相対ディレクトリ（`/` 区切り）
///
/// コンポジションが渡されなければ `source_dir` から静かに探す。
/// ビルド指定のないサービスは `.` になる。
pub fn get_service_dirs_from_composition(
    source_dir: &Path,
    composition: Option<&Composition>,
) -> Result<BTreeMap<String, String>> {
    let loaded;
    let composition = match composition {
        Some(c) => Some(c),
        None => {
            let resolved = resolve_project(source_dir, true)?;
            if resolved.is_found() {
                loaded = parse_composition(&resolved.contents)?;
                Some(&loaded)
            } else {
                None
            }
        }
    };

    let mut dirs = BTreeMap::new();
    let Some(composition) = composition else {
        return Ok(dirs);
    };

    let root = normalize_posix(&path_to_posix(&absolute(source_dir)));
    for (name, service) in composition.services.iter() {
        let raw = service.build_context().filter(|c| !c.is_empty()).unwrap_or(".");
        dirs.insert(name.to_string(), service_dir(&root, raw));
    }
    Ok(dirs)
}

fn service_dir(root: &str, raw: &str) -> String {
    let mut dir = normalize_posix(&to_posix(raw));
    if dir.starts_with('/') {
        dir = relative_posix(root, &dir);
    }
    if let Some(stripped) = dir.strip_suffix('/') {
        dir = stripped.to_string();
    }
    if let Some(stripped) = dir.strip_prefix("./") {
        dir = stripped.to_string();
    }
    if dir.is_empty() { ".".to_string() } else { dir }
}

fn absolute(path: &Path) -> std::path::PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
