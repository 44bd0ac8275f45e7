//! fleetship の設定
//!
//! 設定ディレクトリ、エンジンの一時ディレクトリ、エミュレーションバイナリの
//! 置き場所、レジストリシークレットを解決します。

pub mod error;
pub mod registry_secrets;

pub use error::*;
pub use registry_secrets::{
    DOCKER_HUB_CANONICAL, RegistryCredentials, RegistrySecrets, add_canonical_docker_hub_entry,
    get_registry_secrets, parse_registry_secrets,
};

use std::path::PathBuf;

/// 設定ディレクトリを上書きする環境変数
pub const CONFIG_DIR_ENV: &str = "FLEETSHIP_CONFIG_DIR";
/// エンジン側の一時ディレクトリを上書きする環境変数
pub const ENGINE_TMP_PATH_ENV: &str = "FLEETSHIP_ENGINE_TMP_PATH";
/// エミュレーションバイナリのディレクトリを上書きする環境変数
pub const EMULATION_DIR_ENV: &str = "FLEETSHIP_EMULATION_DIR";

const DEFAULT_ENGINE_TMP_PATH: &str = "/var/lib/docker/tmp";

/// fleetship の設定ディレクトリを取得
///
/// `FLEETSHIP_CONFIG_DIR` が設定されていればそれを、
/// なければ `~/.config/fleetship` を使う。存在しなければ作成する。
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = match std::env::var_os(CONFIG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::config_dir()
            .ok_or(ConfigError::ConfigDirNotFound)?
            .join("fleetship"),
    };

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// ビルドエンジンが使う一時ディレクトリ
pub fn engine_tmp_path() -> PathBuf {
    std::env::var_os(ENGINE_TMP_PATH_ENV)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENGINE_TMP_PATH))
}

/// `qemu-<arch>-static` を探すディレクトリ
pub fn emulation_bin_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(EMULATION_DIR_ENV).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    Ok(get_config_dir()?.join("bin"))
}
