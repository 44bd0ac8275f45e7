//! コンテナエンジンの抽象化
//!
//! ビルドとリリースが必要とするエンジン操作をトレイトにまとめ、
//! Docker デーモン向けの実装を bollard で提供します。

use crate::auth::{build_credentials, credentials_for_image};
use crate::error::{BuildError, Result};
use crate::stream::PullProgress;
use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::models::PushImageInfo;
use bollard::query_parameters::{
    BuildImageOptionsBuilder, CreateImageOptionsBuilder, PushImageOptionsBuilder,
    RemoveImageOptionsBuilder, TagImageOptionsBuilder,
};
use bytes::Bytes;
use fleetship_config::RegistrySecrets;
use futures_util::stream::{BoxStream, StreamExt};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

static PUSH_DIGEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"digest: (sha256:[0-9a-f]+)").expect("digest pattern is valid")
});

/// エンジンに渡すビルドのパラメータ
#[derive(Debug, Clone, Default)]
pub struct EngineBuildOptions {
    /// ストリーム内の Dockerfile のパス
    pub dockerfile: String,
    pub tag: String,
    pub buildargs: BTreeMap<String, String>,
    pub nocache: bool,
    pub pull: bool,
    pub squash: bool,
    pub cachefrom: Vec<String>,
    pub registry_config: RegistrySecrets,
}

/// ビルド出力の1メッセージ
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOutput {
    pub stream: Option<String>,
    pub error: Option<String>,
}

/// コンテナエンジン
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// ホストのアーキテクチャ
    async fn architecture(&self) -> Result<String>;

    /// ビルドシークレットに対応しているか
    async fn supports_build_secrets(&self) -> Result<bool>;

    /// イメージのサイズ（バイト）
    async fn image_size(&self, image: &str) -> Result<u64>;

    async fn tag_image(&self, source: &str, repo: &str, tag: &str) -> Result<()>;

    async fn remove_image(&self, image: &str) -> Result<()>;

    /// トークンで認証してプッシュし、ダイジェストを返す
    async fn push_image(&self, repo: &str, tag: &str, token: &str) -> Result<String>;

    fn build_image(
        &self,
        context: Bytes,
        opts: EngineBuildOptions,
    ) -> BoxStream<'_, Result<BuildOutput>>;

    fn pull_image(&self, image: &str, secrets: &RegistrySecrets)
    -> BoxStream<'_, Result<PullProgress>>;
}

/// Docker デーモン
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// ローカルの Docker デーモンに接続
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self::new(docker))
    }

    pub fn docker(&self) -> &Docker {
        &self.docker
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn architecture(&self) -> Result<String> {
        let info = self.docker.info().await?;
        Ok(info.architecture.unwrap_or_default())
    }

    async fn supports_build_secrets(&self) -> Result<bool> {
        let version = self.docker.version().await?;
        let platform = version
            .platform
            .map(|p| p.name.to_lowercase())
            .unwrap_or_default();
        let components = version.components.unwrap_or_default();
        Ok(platform.contains("balena")
            || components
                .iter()
                .any(|c| c.name.to_lowercase().contains("balena")))
    }

    async fn image_size(&self, image: &str) -> Result<u64> {
        let inspect = self.docker.inspect_image(image).await?;
        Ok(inspect.size.unwrap_or(0).max(0) as u64)
    }

    async fn tag_image(&self, source: &str, repo: &str, tag: &str) -> Result<()> {
        let options = TagImageOptionsBuilder::new().repo(repo).tag(tag).build();
        self.docker.tag_image(source, Some(options)).await?;
        Ok(())
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        let options = RemoveImageOptionsBuilder::new().noprune(true).build();
        self.docker.remove_image(image, Some(options), None).await?;
        Ok(())
    }

    async fn push_image(&self, repo: &str, tag: &str, token: &str) -> Result<String> {
        let options = PushImageOptionsBuilder::new().tag(tag).build();
        let credentials = DockerCredentials {
            registrytoken: Some(token.to_string()),
            ..Default::default()
        };

        let mut stream = self.docker.push_image(repo, Some(options), Some(credentials));
        let mut digest = None;
        let mut last_status = String::new();

        while let Some(result) = stream.next().await {
            let info = result.map_err(|e| BuildError::PushFailed {
                message: e.to_string(),
            })?;
            if let Some(err) = info
                .error_detail
                .clone()
                .and_then(|d| d.message)
                .or_else(|| info.error.clone())
            {
                return Err(BuildError::PushFailed { message: err });
            }
            if let Some(found) = info.status.as_deref().and_then(parse_push_digest) {
                digest = Some(found);
            }
            handle_push_progress(repo, &info, &mut last_status);
        }

        digest.ok_or_else(|| BuildError::PushFailed {
            message: format!("No digest reported for {}:{}", repo, tag),
        })
    }

    fn build_image(
        &self,
        context: Bytes,
        opts: EngineBuildOptions,
    ) -> BoxStream<'_, Result<BuildOutput>> {
        let buildargs: HashMap<String, String> = opts.buildargs.into_iter().collect();
        let mut builder = BuildImageOptionsBuilder::new()
            .dockerfile(&opts.dockerfile)
            .t(&opts.tag)
            .nocache(opts.nocache)
            .pull(if opts.pull { "1" } else { "" })
            .squash(opts.squash)
            .rm(true)
            .forcerm(true)
            .buildargs(&buildargs);
        if !opts.cachefrom.is_empty() {
            builder = builder.cachefrom(&opts.cachefrom);
        }
        let credentials = build_credentials(&opts.registry_config);
        let credentials = (!credentials.is_empty()).then_some(credentials);

        tracing::debug!("Building image: {}", opts.tag);
        self.docker
            .build_image(builder.build(), credentials, Some(bollard::body_full(context)))
            .map(|msg| -> Result<BuildOutput> {
                let info = msg?;
                let error = info
                    .error_detail
                    .and_then(|d| d.message)
                    .or(info.error);
                Ok(BuildOutput {
                    stream: info.stream.or(info.status),
                    error,
                })
            })
            .boxed()
    }

    fn pull_image(
        &self,
        image: &str,
        secrets: &RegistrySecrets,
    ) -> BoxStream<'_, Result<PullProgress>> {
        let credentials = credentials_for_image(image, secrets);
        // ダイジェスト指定はタグに分けない
        let options = if image.contains('@') {
            CreateImageOptionsBuilder::new().from_image(image).build()
        } else {
            let (name, tag) = crate::auth::split_image_tag(image);
            CreateImageOptionsBuilder::new()
                .from_image(&name)
                .tag(&tag)
                .build()
        };

        self.docker
            .create_image(Some(options), None, credentials)
            .map(|msg| -> Result<PullProgress> {
                let info = msg?;
                let percentage = info.progress_detail.and_then(|d| match (d.current, d.total) {
                    (Some(current), Some(total)) if total > 0 => {
                        Some((current.max(0) * 100 / total).min(100) as u8)
                    }
                    _ => None,
                });
                Ok(PullProgress {
                    id: info.id,
                    status: info.status,
                    percentage,
                    error: info.error,
                    error_detail: info.error_detail.and_then(|d| d.message),
                })
            })
            .boxed()
    }
}

/// プッシュ進捗をログに流す
fn handle_push_progress(repo: &str, info: &PushImageInfo, last_status: &mut String) {
    let Some(status) = &info.status else {
        return;
    };
    match status.as_str() {
        "Preparing" | "Waiting" | "Pushing" => {}
        "Pushed" | "Layer already exists" => {
            tracing::debug!("{}: {}", repo, status);
        }
        _ => {
            if status != last_status {
                tracing::debug!("{}: {}", repo, status);
                *last_status = status.clone();
            }
        }
    }
}

/// プッシュのステータス行からダイジェストを取り出す
pub fn parse_push_digest(status: &str) -> Option<String> {
    PUSH_DIGEST.captures(status).map(|caps| caps[1].to_string())
}
