//! ビルドメタデータ（`.fleetship/fleetship.{yml,yaml,json}`）

use crate::error::{ComposeError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

const METADATA_DIR: &str = ".fleetship";
const METADATA_EXTENSIONS: &[&str] = &["yml", "yaml", "json"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildMetadata {
    #[serde(rename = "build-secrets", default)]
    pub build_secrets: Option<Value>,
}

impl BuildMetadata {
    /// 空でない `build-secrets` が宣言されているか
    pub fn declares_build_secrets(&self) -> bool {
        match &self.build_secrets {
            None | Some(Value::Null) => false,
            Some(Value::Object(map)) => !map.is_empty(),
            Some(Value::Array(list)) => !list.is_empty(),
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }
}

/// ビルドメタデータを読み込む
///
/// ファイルがなければ `(BuildMetadata::default(), None)` を返す。
pub fn load_build_metadata(source_dir: &Path) -> Result<(BuildMetadata, Option<PathBuf>)> {
    for ext in METADATA_EXTENSIONS {
        let path = source_dir
            .join(METADATA_DIR)
            .join(format!("fleetship.{}", ext));

        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok((BuildMetadata::default(), Some(path)));
        }

        let parsed: std::result::Result<BuildMetadata, String> = if *ext == "json" {
            serde_json::from_str(&raw).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str(&raw).map_err(|e| e.to_string())
        };
        let metadata = parsed.map_err(|message| ComposeError::MetadataParse {
            path: path.clone(),
            message,
        })?;

        tracing::debug!(path = %path.display(), "Loaded build metadata");
        return Ok((metadata, Some(path)));
    }

    Ok((BuildMetadata::default(), None))
}
