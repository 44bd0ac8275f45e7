//! リリースのデータモデル

use chrono::{DateTime, Utc};
use fleetship_build::ImageProps;
use fleetship_compose::Composition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// リリースおよびサービスイメージの状態
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseStatus {
    #[default]
    Running,
    Success,
    Failed,
}

/// プラットフォーム上のリリース
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    /// 永続化前は None
    pub id: Option<u64>,
    pub status: ReleaseStatus,
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub composition: Composition,
    /// サービス名 → サービスイメージ
    pub service_images: BTreeMap<String, ServiceImage>,
}

impl Release {
    pub fn new(composition: Composition) -> Self {
        Self {
            id: None,
            status: ReleaseStatus::Running,
            start_timestamp: Utc::now(),
            end_timestamp: None,
            composition,
            service_images: BTreeMap::new(),
        }
    }
}

/// サービスごとのイメージ記録
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceImage {
    pub id: Option<u64>,
    pub service_name: String,
    /// `registry/repo[:tag]`
    pub image_location: String,
    pub image_size: Option<u64>,
    /// push で得られたダイジェスト
    pub content_hash: Option<String>,
    pub build_log: Option<String>,
    pub dockerfile: Option<String>,
    pub project_type: Option<String>,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub push_timestamp: Option<DateTime<Utc>>,
    pub status: ReleaseStatus,
    pub error_message: Option<String>,
}

impl ServiceImage {
    pub fn new(service_name: impl Into<String>, image_location: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            image_location: image_location.into(),
            ..Default::default()
        }
    }

    pub(crate) fn record_push(&mut self, digest: String, logs: &str, props: &ImageProps) {
        self.image_size = Some(props.size);
        self.content_hash = Some(digest);
        self.build_log = Some(logs.to_string());
        self.dockerfile = props.dockerfile.clone();
        self.project_type = props.project_type.clone();
        self.start_timestamp = props.start_time;
        self.end_timestamp = props.end_time;
        self.push_timestamp = Some(Utc::now());
        self.status = ReleaseStatus::Success;
        self.error_message = None;
    }

    pub(crate) fn record_failure(&mut self, message: String) {
        self.status = ReleaseStatus::Failed;
        self.error_message = Some(message);
    }
}

/// レジストリ向けにタグ付けされたイメージ
///
/// `local_ref` はクリーンアップ時に削除するローカル参照です。
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedImage {
    pub service_name: String,
    pub registry: String,
    pub repo: String,
    pub tag: String,
    pub logs: String,
    pub props: ImageProps,
}

impl TaggedImage {
    /// `registry/repo`
    pub fn repository(&self) -> String {
        format!("{}/{}", self.registry, self.repo)
    }

    /// `registry/repo:tag`
    pub fn local_ref(&self) -> String {
        format!("{}:{}", self.repository(), self.tag)
    }
}
