//! リリーストランザクション
//!
//! リリース作成 → タグ付け → push 認可 → push → タグ解除 → 確定 の順に進めます。
//! タグ解除と確定は途中で失敗しても必ず実行し、最初のエラーを返します。

use crate::error::{ReleaseError, Result};
use crate::model::{Release, ReleaseStatus, TaggedImage};
use crate::platform::{ReleasePlatform, ReleaseTarget};
use crate::tagging::{parse_image_location, tag_service_images, untag_images};
use chrono::Utc;
use fleetship_build::{BuiltImage, ContainerEngine, StatusSpinner};
use fleetship_compose::Composition;
use std::collections::BTreeSet;

/// デプロイオプション
#[derive(Debug, Clone, Copy, Default)]
pub struct DeployOptions {
    pub app_id: u64,
    pub user_id: u64,
    /// ビルドログをアップロードしない
    pub skip_log_upload: bool,
}

pub struct DeployRequest<'a> {
    pub composition: &'a Composition,
    pub images: &'a [BuiltImage],
    pub options: &'a DeployOptions,
    pub engine: &'a dyn ContainerEngine,
    pub platform: &'a dyn ReleasePlatform,
}

/// ビルド済みイメージをリリースとしてデプロイする
#[tracing::instrument(skip_all, fields(app_id = req.options.app_id))]
pub async fn deploy_project(req: DeployRequest<'_>) -> Result<Release> {
    let spinner = StatusSpinner::new("Creating release...");
    let target = ReleaseTarget {
        app_id: req.options.app_id,
        user_id: req.options.user_id,
    };
    let mut release = match req.platform.create_release(target, req.composition).await {
        Ok(release) => {
            spinner.finish_success();
            release
        }
        Err(e) => {
            spinner.finish_error("Failed to create release");
            return Err(ReleaseError::platform("create release", e));
        }
    };
    tracing::info!("Created release {:?}", release.id);

    let outcome = run(&req, &mut release).await;
    if outcome.is_err() {
        release.status = ReleaseStatus::Failed;
    }

    let finalized = finalize(req.platform, &mut release).await;
    match (outcome, finalized) {
        (Ok(()), Ok(())) => Ok(release),
        (Ok(()), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(finalize_error)) => {
            tracing::error!("{}", finalize_error);
            Err(e)
        }
    }
}

async fn run(req: &DeployRequest<'_>, release: &mut Release) -> Result<()> {
    tracing::debug!("Tagging images...");
    let tagged = tag_service_images(req.engine, req.images, &release.service_images).await?;

    let pushed = push(req, release, &tagged).await;
    release.status = if pushed.is_ok() {
        ReleaseStatus::Success
    } else {
        ReleaseStatus::Failed
    };

    tracing::debug!("Untagging images...");
    untag_images(req.engine, &tagged).await;
    pushed
}

async fn push(req: &DeployRequest<'_>, release: &mut Release, tagged: &[TaggedImage]) -> Result<()> {
    let Some(first) = tagged.first() else {
        return Ok(());
    };

    let previous_repos = previous_repos(req.platform, req.options.app_id).await;
    let scopes = push_scopes(tagged, &previous_repos);
    tracing::debug!("Authorizing push for {}", first.registry);
    let token = req
        .platform
        .authorize_push(&first.registry, &scopes)
        .await
        .map_err(|e| ReleaseError::platform("authorize push", e))?;

    tracing::info!("Pushing images to registry...");
    let mut first_error = None;
    for image in tagged {
        let Some(service_image) = release.service_images.get_mut(&image.service_name) else {
            return Err(ReleaseError::MissingServiceImage(image.service_name.clone()));
        };

        match req
            .engine
            .push_image(&image.repository(), &image.tag, &token)
            .await
        {
            Ok(digest) => {
                tracing::debug!("Pushed {} ({})", image.local_ref(), digest);
                service_image.record_push(digest, &image.logs, &image.props);
            }
            Err(source) => {
                service_image.record_failure(source.to_string());
                let e = ReleaseError::Push {
                    service: image.service_name.clone(),
                    source,
                };
                if first_error.is_some() {
                    tracing::warn!("{}", e);
                } else {
                    first_error = Some(e);
                }
            }
        }

        let mut update = service_image.clone();
        if req.options.skip_log_upload {
            update.build_log = None;
        }
        tracing::debug!("Saving image {}", update.image_location);
        req.platform
            .update_image(&update)
            .await
            .map_err(|e| ReleaseError::platform("update image", e))?;
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// 直前の成功リリースのリポジトリ（取得できなければ空）
async fn previous_repos(platform: &dyn ReleasePlatform, app_id: u64) -> Vec<String> {
    match platform.latest_release_image_locations(app_id).await {
        Ok(locations) => locations
            .iter()
            .filter_map(|location| match parse_image_location(location) {
                Ok(loc) => Some(loc.repo),
                Err(e) => {
                    tracing::debug!("{}", e);
                    None
                }
            })
            .collect(),
        Err(e) => {
            tracing::debug!("Failed to get previous release images: {:#}", e);
            Vec::new()
        }
    }
}

/// push 対象は `pull,push`、直前のリリースは `pull` のスコープ
pub fn push_scopes(tagged: &[TaggedImage], previous_repos: &[String]) -> Vec<String> {
    let pushed: BTreeSet<&str> = tagged.iter().map(|t| t.repo.as_str()).collect();
    let mut scopes: Vec<String> = pushed
        .iter()
        .map(|repo| format!("repository:{}:pull,push", repo))
        .collect();
    let previous: BTreeSet<&str> = previous_repos
        .iter()
        .map(String::as_str)
        .filter(|repo| !pushed.contains(repo))
        .collect();
    scopes.extend(
        previous
            .into_iter()
            .map(|repo| format!("repository:{}:pull", repo)),
    );
    scopes
}

async fn finalize(platform: &dyn ReleasePlatform, release: &mut Release) -> Result<()> {
    let spinner = StatusSpinner::new("Saving release...");
    release.end_timestamp = Some(Utc::now());
    if release.id.is_none() {
        spinner.finish_success();
        return Ok(());
    }

    match platform.update_release(release).await {
        Ok(()) => {
            spinner.finish_success();
            Ok(())
        }
        Err(e) => {
            spinner.finish_error("Failed to save release");
            Err(ReleaseError::platform("save release", e))
        }
    }
}
