//! ビルドバックエンドの抽象化

use crate::engine::ContainerEngine;
use crate::error::Result;
use crate::task::BuildTask;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use fleetship_compose::Composition;
use futures_util::stream::BoxStream;
use std::path::Path;

pub use crate::resolver::{PreprocessHook, ResolutionParams};

/// バックエンドが返すサービス1つ分の結果
#[derive(Debug, Clone, PartialEq)]
pub struct LocalImage {
    pub service_name: String,
    /// ローカルのイメージ名（ビルドならタグ、外部ならイメージ参照）
    pub name: String,
    pub successful: bool,
    pub error: Option<String>,
    pub dockerfile: Option<String>,
    pub project_type: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// タスクの切り出し、解決、実行を担うバックエンド
#[async_trait]
pub trait BuildBackend: Send + Sync {
    /// プロジェクト全体の tar をサービスごとのタスクに分ける（記述順）
    fn split_build_stream(&self, composition: &Composition, stream: Bytes)
    -> Result<Vec<BuildTask>>;

    /// タスクを1つずつ解決する遅延ストリーム
    fn perform_resolution<'a>(
        &'a self,
        tasks: Vec<BuildTask>,
        params: &'a ResolutionParams,
    ) -> BoxStream<'a, Result<BuildTask>>;

    /// 全タスクをまとめて実行する
    async fn perform_builds(
        &self,
        tasks: Vec<BuildTask>,
        engine: &dyn ContainerEngine,
        tmp_path: &Path,
    ) -> Result<Vec<LocalImage>>;
}
