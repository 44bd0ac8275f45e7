//! レジストリシークレット
//!
//! プライベートレジストリの認証情報を YAML / JSON ファイルから読み込みます。
//!
//! ```yaml
//! registry.example.com:
//!   username: user
//!   password: secret
//! ```

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Docker Hub の正規レジストリ名
pub const DOCKER_HUB_CANONICAL: &str = "https://index.docker.io/v1/";

const DOCKER_HUB_ALIASES: &[&str] = &[
    "docker.io",
    "index.docker.io",
    "registry-1.docker.io",
    "registry.hub.docker.com",
    "hub.docker.com",
];

const SECRETS_FILE_NAMES: &[&str] = &["secrets.yml", "secrets.yaml", "secrets.json"];

/// 1レジストリ分の認証情報
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

/// レジストリ名 -> 認証情報
pub type RegistrySecrets = BTreeMap<String, RegistryCredentials>;

/// レジストリシークレットを取得
///
/// 明示的なパスがあればそれを読む。なければ設定ディレクトリの
/// `secrets.yml`, `secrets.yaml`, `secrets.json` の順に探し、
/// どれもなければ空のシークレットを返す。
pub fn get_registry_secrets(explicit_path: Option<&Path>) -> Result<RegistrySecrets> {
    if let Some(path) = explicit_path {
        return parse_registry_secrets(path);
    }

    let config_dir = crate::get_config_dir()?;
    match find_secrets_file(&config_dir) {
        Some(path) => parse_registry_secrets(&path),
        None => {
            tracing::debug!("No registry secrets file in {}", config_dir.display());
            Ok(RegistrySecrets::new())
        }
    }
}

fn find_secrets_file(dir: &Path) -> Option<PathBuf> {
    SECRETS_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

/// シークレットファイルを読み込んで検証
pub fn parse_registry_secrets(path: &Path) -> Result<RegistrySecrets> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    let is_yaml = match extension.as_deref() {
        Some("yml") | Some("yaml") => true,
        Some("json") => false,
        _ => return Err(ConfigError::UnsupportedSecretsFormat(path.to_path_buf())),
    };

    let invalid = |message: String| ConfigError::InvalidRegistrySecrets {
        path: path.to_path_buf(),
        message,
    };

    let raw = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
    let value: Value = if is_yaml {
        serde_yaml::from_str(&raw).map_err(|e| invalid(e.to_string()))?
    } else {
        serde_json::from_str(&raw).map_err(|e| invalid(e.to_string()))?
    };

    let mut secrets = validate_registry_secrets(value).map_err(invalid)?;
    add_canonical_docker_hub_entry(&mut secrets);

    tracing::debug!(
        path = %path.display(),
        registries = secrets.len(),
        "Loaded registry secrets"
    );
    Ok(secrets)
}

fn validate_registry_secrets(value: Value) -> std::result::Result<RegistrySecrets, String> {
    let Value::Object(entries) = value else {
        return Err("Expected a mapping of registry names to credentials".to_string());
    };

    let mut secrets = RegistrySecrets::new();
    for (registry, entry) in entries {
        let Value::Object(fields) = entry else {
            return Err(format!("Entry for \"{}\" must be a mapping", registry));
        };
        let field = |name: &str| -> std::result::Result<String, String> {
            match fields.get(name) {
                Some(Value::String(s)) => Ok(s.clone()),
                Some(_) => Err(format!("\"{}\" of \"{}\" must be a string", name, registry)),
                None => Err(format!("Entry for \"{}\" is missing \"{}\"", registry, name)),
            }
        };
        let credentials = RegistryCredentials {
            username: field("username")?,
            password: field("password")?,
        };
        secrets.insert(registry, credentials);
    }
    Ok(secrets)
}

/// Docker Hub のエントリがあれば正規名 `https://index.docker.io/v1/` でも引けるようにする
pub fn add_canonical_docker_hub_entry(secrets: &mut RegistrySecrets) {
    if secrets.contains_key(DOCKER_HUB_CANONICAL) {
        return;
    }

    let hub_entry = secrets
        .iter()
        .find(|(registry, _)| is_docker_hub(registry))
        .map(|(_, credentials)| credentials.clone());

    if let Some(credentials) = hub_entry {
        secrets.insert(DOCKER_HUB_CANONICAL.to_string(), credentials);
    }
}

fn is_docker_hub(registry: &str) -> bool {
    let host = registry
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = host.split('/').next().unwrap_or(host).to_ascii_lowercase();
    host.is_empty() || DOCKER_HUB_ALIASES.contains(&host.as_str())
}
