//! ビルドのオプション

use fleetship_config::RegistrySecrets;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// `.dockerignore` の扱い
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IgnoreMode {
    /// プロジェクトルートの `.dockerignore` のみ
    #[default]
    Single,
    /// ルートに加えて各サービスディレクトリの `.dockerignore`
    Multi,
    /// `.gitignore` も考慮する（非推奨）
    Legacy,
}

/// エンジンに渡すビルドオプション
///
/// `None` のフィールドはマージ時に上書きしない。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DockerBuildOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub buildargs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nocache: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub squash: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cachefrom: Option<Vec<String>>,
    /// プライベートレジストリの認証情報
    #[serde(skip)]
    pub registry_config: RegistrySecrets,
}

impl DockerBuildOptions {
    /// `other` の値で上書きマージ（buildargs はキー単位）
    pub fn merge(&mut self, other: &DockerBuildOptions) {
        if other.t.is_some() {
            self.t = other.t.clone();
        }
        self.buildargs.extend(
            other
                .buildargs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        if other.nocache.is_some() {
            self.nocache = other.nocache;
        }
        if other.pull.is_some() {
            self.pull = other.pull;
        }
        if other.squash.is_some() {
            self.squash = other.squash;
        }
        if other.cachefrom.is_some() {
            self.cachefrom = other.cachefrom.clone();
        }
        self.registry_config.extend(
            other
                .registry_config
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
    }
}

/// `build_project` のオプション
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildProjectOptions {
    pub project_path: PathBuf,
    pub project_name: String,
    pub arch: String,
    pub device_type: String,
    #[serde(default)]
    pub emulated: bool,
    #[serde(default)]
    pub inline_logs: bool,
    #[serde(default)]
    pub convert_eol: bool,
    #[serde(default)]
    pub ignore_mode: IgnoreMode,
    /// 代替 Dockerfile（プロジェクト相対、`/` 区切り）
    #[serde(default)]
    pub dockerfile_path: Option<String>,
    /// 全サービス共通のビルドオプション
    #[serde(default)]
    pub build_opts: DockerBuildOptions,
    /// コンポジションの args より優先されるビルド引数
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
    #[serde(skip)]
    pub registry_secrets: RegistrySecrets,
    /// テンプレート展開に使うリリースハッシュ
    #[serde(default)]
    pub release_hash: Option<String>,
    /// 未指定なら設定から解決する
    #[serde(default)]
    pub emulation_bin_dir: Option<PathBuf>,
    /// 未指定なら設定から解決する
    #[serde(default)]
    pub engine_tmp_path: Option<PathBuf>,
}

impl BuildProjectOptions {
    pub fn new(
        project_path: impl Into<PathBuf>,
        project_name: impl Into<String>,
        arch: impl Into<String>,
        device_type: impl Into<String>,
    ) -> Self {
        Self {
            project_path: project_path.into(),
            project_name: project_name.into(),
            arch: arch.into(),
            device_type: device_type.into(),
            emulated: false,
            inline_logs: false,
            convert_eol: false,
            ignore_mode: IgnoreMode::default(),
            dockerfile_path: None,
            build_opts: DockerBuildOptions::default(),
            build_args: BTreeMap::new(),
            registry_secrets: RegistrySecrets::new(),
            release_hash: None,
            emulation_bin_dir: None,
            engine_tmp_path: None,
        }
    }
}
