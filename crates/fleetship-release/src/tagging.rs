//! レジストリ向けのタグ付けと後片付け

use crate::error::{ReleaseError, Result};
use crate::model::{ServiceImage, TaggedImage};
use fleetship_build::{BuiltImage, ContainerEngine};
use futures_util::future::join_all;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

const DEFAULT_TAG: &str = "latest";

static IMAGE_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*?)/(.*?)(?::([^/]*))?$").expect("image location pattern is valid")
});

/// イメージの格納場所
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLocation {
    pub registry: String,
    pub repo: String,
    pub tag: String,
}

/// `registry/repo[:tag]` を分解する（タグ省略時は `latest`）
///
/// リポジトリ部分に付いた `@sha256:...` は取り除く。
pub fn parse_image_location(location: &str) -> Result<ImageLocation> {
    let caps = IMAGE_LOCATION
        .captures(location)
        .ok_or_else(|| ReleaseError::InvalidImageLocation(location.to_string()))?;

    let registry = &caps[1];
    let repo = caps[2].split('@').next().unwrap_or_default();
    if registry.is_empty() || repo.is_empty() {
        return Err(ReleaseError::InvalidImageLocation(location.to_string()));
    }

    Ok(ImageLocation {
        registry: registry.to_string(),
        repo: repo.to_string(),
        tag: caps
            .get(3)
            .map(|m| m.as_str())
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TAG)
            .to_string(),
    })
}

/// ビルド済みイメージをサービスイメージの格納場所でタグ付けする
///
/// 一部でも失敗した場合は、それまでに付けたタグを外してからエラーを返す。
pub async fn tag_service_images(
    engine: &dyn ContainerEngine,
    images: &[BuiltImage],
    service_images: &BTreeMap<String, ServiceImage>,
) -> Result<Vec<TaggedImage>> {
    let attempts = images.iter().map(|image| async move {
        let service_image = service_images
            .get(&image.service_name)
            .ok_or_else(|| ReleaseError::MissingServiceImage(image.service_name.clone()))?;
        let location = parse_image_location(&service_image.image_location)?;

        let tagged = TaggedImage {
            service_name: image.service_name.clone(),
            registry: location.registry,
            repo: location.repo,
            tag: location.tag,
            logs: image.logs.clone(),
            props: image.props.clone(),
        };
        engine
            .tag_image(&image.name, &tagged.repository(), &tagged.tag)
            .await
            .map_err(|source| ReleaseError::Tag {
                service: image.service_name.clone(),
                source,
            })?;
        tracing::debug!("Tagged {} as {}", image.name, tagged.local_ref());
        Ok::<_, ReleaseError>(tagged)
    });

    let mut tagged = Vec::with_capacity(images.len());
    let mut first_error = None;
    for result in join_all(attempts).await {
        match result {
            Ok(image) => tagged.push(image),
            Err(e) => {
                if first_error.is_some() {
                    tracing::warn!("{}", e);
                } else {
                    first_error = Some(e);
                }
            }
        }
    }

    match first_error {
        Some(e) => {
            untag_images(engine, &tagged).await;
            Err(e)
        }
        None => Ok(tagged),
    }
}

/// タグ付けしたローカル参照を削除する（失敗はログのみ）
pub async fn untag_images(engine: &dyn ContainerEngine, tagged: &[TaggedImage]) {
    let removals = tagged.iter().map(|image| async move {
        let local_ref = image.local_ref();
        if let Err(e) = engine.remove_image(&local_ref).await {
            tracing::warn!("Failed to untag {}: {}", local_ref, e);
        }
    });
    join_all(removals).await;
}
