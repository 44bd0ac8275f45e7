use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use fleetship_build::engine::{BuildOutput, ContainerEngine, EngineBuildOptions};
use fleetship_build::error::{BuildError, Result};
use fleetship_build::{BuiltImage, ImageProps, PullProgress};
use fleetship_compose::Composition;
use fleetship_config::RegistrySecrets;
use fleetship_release::{Release, ReleasePlatform, ReleaseTarget, ServiceImage};
use futures_util::stream::{self, BoxStream, StreamExt};
use std::collections::BTreeSet;
use std::sync::Mutex;

pub const REGISTRY: &str = "registry.example.com";

/// タグ付け・push・削除を記録するエンジン
#[derive(Default)]
pub struct FakeEngine {
    /// このリポジトリへの push は失敗する
    pub failing_repos: BTreeSet<String>,
    pub tags: Mutex<Vec<String>>,
    pub pushes: Mutex<Vec<(String, String)>>,
    pub removed: Mutex<Vec<String>>,
}

impl FakeEngine {
    #[allow(dead_code)]
    pub fn failing(mut self, repo: &str) -> Self {
        self.failing_repos.insert(repo.to_string());
        self
    }

    pub fn tags(&self) -> Vec<String> {
        self.tags.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn pushes(&self) -> Vec<(String, String)> {
        self.pushes.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        let mut removed = self.removed.lock().unwrap().clone();
        removed.sort();
        removed
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn architecture(&self) -> Result<String> {
        Ok("x86_64".to_string())
    }

    async fn supports_build_secrets(&self) -> Result<bool> {
        Ok(false)
    }

    async fn image_size(&self, _image: &str) -> Result<u64> {
        Ok(0)
    }

    async fn tag_image(&self, _source: &str, repo: &str, tag: &str) -> Result<()> {
        self.tags.lock().unwrap().push(format!("{}:{}", repo, tag));
        Ok(())
    }

    async fn remove_image(&self, image: &str) -> Result<()> {
        self.removed.lock().unwrap().push(image.to_string());
        Ok(())
    }

    async fn push_image(&self, repo: &str, tag: &str, token: &str) -> Result<String> {
        self.pushes
            .lock()
            .unwrap()
            .push((format!("{}:{}", repo, tag), token.to_string()));
        if self.failing_repos.contains(repo) {
            return Err(BuildError::PushFailed {
                message: "blob upload unknown".to_string(),
            });
        }
        Ok(format!("sha256:{:0>8}", repo.len()))
    }

    fn build_image(
        &self,
        _context: Bytes,
        _opts: EngineBuildOptions,
    ) -> BoxStream<'_, Result<BuildOutput>> {
        stream::empty().boxed()
    }

    fn pull_image(
        &self,
        _image: &str,
        _secrets: &RegistrySecrets,
    ) -> BoxStream<'_, Result<PullProgress>> {
        stream::empty().boxed()
    }
}

/// 呼び出しを記録するプラットフォーム
#[derive(Default)]
pub struct FakePlatform {
    pub previous_locations: Option<Vec<String>>,
    pub fail_update_release: bool,
    /// 作成したリリースに id を付けない
    pub without_id: bool,
    pub fail_authorize: bool,
    pub scopes: Mutex<Vec<String>>,
    pub updated_images: Mutex<Vec<ServiceImage>>,
    pub updated_releases: Mutex<Vec<Release>>,
}

impl FakePlatform {
    pub fn updated_images(&self) -> Vec<ServiceImage> {
        self.updated_images.lock().unwrap().clone()
    }

    pub fn updated_releases(&self) -> Vec<Release> {
        self.updated_releases.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn scopes(&self) -> Vec<String> {
        self.scopes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReleasePlatform for FakePlatform {
    async fn create_release(
        &self,
        _target: ReleaseTarget,
        composition: &Composition,
    ) -> anyhow::Result<Release> {
        let mut release = Release::new(composition.clone());
        if !self.without_id {
            release.id = Some(42);
        }
        for (name, _) in composition.services.iter() {
            release.service_images.insert(
                name.to_string(),
                ServiceImage::new(name, format!("{}/v2/{}", REGISTRY, name)),
            );
        }
        Ok(release)
    }

    async fn update_release(&self, release: &Release) -> anyhow::Result<()> {
        self.updated_releases.lock().unwrap().push(release.clone());
        if self.fail_update_release {
            return Err(anyhow!("connection reset"));
        }
        Ok(())
    }

    async fn latest_release_image_locations(&self, _app_id: u64) -> anyhow::Result<Vec<String>> {
        self.previous_locations
            .clone()
            .ok_or_else(|| anyhow!("no previous release"))
    }

    async fn authorize_push(&self, _registry: &str, scopes: &[String]) -> anyhow::Result<String> {
        self.scopes.lock().unwrap().extend(scopes.iter().cloned());
        if self.fail_authorize {
            return Err(anyhow!("401 Unauthorized"));
        }
        Ok("bearer-token".to_string())
    }

    async fn update_image(&self, image: &ServiceImage) -> anyhow::Result<()> {
        self.updated_images.lock().unwrap().push(image.clone());
        Ok(())
    }
}

pub fn composition(services: &[&str]) -> Composition {
    let yaml: String = services
        .iter()
        .map(|s| format!("  {}:\n    build: ./{}\n", s, s))
        .collect();
    fleetship_compose::parse_composition(&format!("version: '2'\nservices:\n{}", yaml)).unwrap()
}

pub fn built(service: &str) -> BuiltImage {
    BuiltImage {
        service_name: service.to_string(),
        name: format!("myapp_{}", service),
        logs: format!("Step 1/1 : FROM alpine\nbuilt {}", service),
        props: ImageProps {
            dockerfile: Some("FROM alpine\n".to_string()),
            project_type: Some("Standard Dockerfile".to_string()),
            size: 2048,
            ..Default::default()
        },
    }
}
