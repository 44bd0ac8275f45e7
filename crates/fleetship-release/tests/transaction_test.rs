mod common;

use common::{FakeEngine, FakePlatform, REGISTRY, built, composition};
use fleetship_release::{
    DeployOptions, DeployRequest, ReleaseError, ReleaseStatus, deploy_project,
};

fn options() -> DeployOptions {
    DeployOptions {
        app_id: 7,
        user_id: 3,
        skip_log_upload: false,
    }
}

#[tokio::test]
async fn test_successful_release() {
    let compose = composition(&["api", "web"]);
    let images = vec![built("api"), built("web")];
    let engine = FakeEngine::default();
    let platform = FakePlatform {
        previous_locations: Some(vec![format!("{}/v2/old@sha256:00ff", REGISTRY)]),
        ..Default::default()
    };
    let opts = options();

    let release = deploy_project(DeployRequest {
        composition: &compose,
        images: &images,
        options: &opts,
        engine: &engine,
        platform: &platform,
    })
    .await
    .unwrap();

    assert_eq!(release.status, ReleaseStatus::Success);
    assert!(release.end_timestamp.is_some());

    let api = &release.service_images["api"];
    assert_eq!(api.status, ReleaseStatus::Success);
    assert_eq!(api.image_size, Some(2048));
    assert!(api.content_hash.as_deref().unwrap().starts_with("sha256:"));
    assert_eq!(api.project_type.as_deref(), Some("Standard Dockerfile"));
    assert!(api.push_timestamp.is_some());

    assert_eq!(
        platform.scopes(),
        vec![
            "repository:v2/api:pull,push",
            "repository:v2/web:pull,push",
            "repository:v2/old:pull",
        ]
    );
    assert!(engine.pushes().iter().all(|(_, token)| token == "bearer-token"));
    assert_eq!(
        engine.removed(),
        vec![
            format!("{}/v2/api:latest", REGISTRY),
            format!("{}/v2/web:latest", REGISTRY),
        ]
    );

    let saved = platform.updated_releases();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].status, ReleaseStatus::Success);
}

#[tokio::test]
async fn test_failed_push_marks_release_failed_and_untags_all() {
    let compose = composition(&["a", "b"]);
    let images = vec![built("a"), built("b")];
    let engine = FakeEngine::default().failing(&format!("{}/v2/b", REGISTRY));
    let platform = FakePlatform::default();
    let opts = options();

    let err = deploy_project(DeployRequest {
        composition: &compose,
        images: &images,
        options: &opts,
        engine: &engine,
        platform: &platform,
    })
    .await
    .unwrap_err();

    match &err {
        ReleaseError::Push { service, .. } => assert_eq!(service, "b"),
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(engine.tags().len(), 2);
    assert_eq!(engine.removed().len(), 2);

    let images = platform.updated_images();
    assert_eq!(images.len(), 2);
    assert_eq!(images[0].status, ReleaseStatus::Success);
    assert_eq!(images[1].status, ReleaseStatus::Failed);
    assert_eq!(
        images[1].error_message.as_deref(),
        Some("Push failed: blob upload unknown")
    );

    let saved = platform.updated_releases();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].status, ReleaseStatus::Failed);
    assert!(saved[0].end_timestamp.is_some());
}

#[tokio::test]
async fn test_skip_log_upload_omits_build_log() {
    let compose = composition(&["api"]);
    let images = vec![built("api")];
    let engine = FakeEngine::default();
    let platform = FakePlatform::default();
    let opts = DeployOptions {
        skip_log_upload: true,
        ..options()
    };

    let release = deploy_project(DeployRequest {
        composition: &compose,
        images: &images,
        options: &opts,
        engine: &engine,
        platform: &platform,
    })
    .await
    .unwrap();

    assert_eq!(platform.updated_images()[0].build_log, None);
    // ローカルの記録にはログが残る
    assert!(release.service_images["api"].build_log.is_some());
    // 直前のリリースが取得できなくても push のスコープだけで認可する
    assert_eq!(platform.scopes(), vec!["repository:v2/api:pull,push"]);
}

#[tokio::test]
async fn test_save_failure_does_not_mask_push_error() {
    let compose = composition(&["api"]);
    let images = vec![built("api")];
    let engine = FakeEngine::default().failing(&format!("{}/v2/api", REGISTRY));
    let platform = FakePlatform {
        fail_update_release: true,
        ..Default::default()
    };
    let opts = options();

    let err = deploy_project(DeployRequest {
        composition: &compose,
        images: &images,
        options: &opts,
        engine: &engine,
        platform: &platform,
    })
    .await
    .unwrap_err();

    assert!(matches!(err, ReleaseError::Push { .. }));
    assert_eq!(engine.removed().len(), 1);
}

#[tokio::test]
async fn test_save_failure_is_returned_after_success() {
    let compose = composition(&["api"]);
    let images = vec![built("api")];
    let engine = FakeEngine::default();
    let platform = FakePlatform {
        fail_update_release: true,
        ..Default::default()
    };
    let opts = options();

    let err = deploy_project(DeployRequest {
        composition: &compose,
        images: &images,
        options: &opts,
        engine: &engine,
        platform: &platform,
    })
    .await
    .unwrap_err();

    assert_eq!(
        err.to_string(),
        "Failed to save release: connection reset"
    );
}

#[tokio::test]
async fn test_missing_service_image_untags_partial_tags() {
    let compose = composition(&["api"]);
    let images = vec![built("api"), built("ghost")];
    let engine = FakeEngine::default();
    let platform = FakePlatform::default();
    let opts = options();

    let err = deploy_project(DeployRequest {
        composition: &compose,
        images: &images,
        options: &opts,
        engine: &engine,
        platform: &platform,
    })
    .await
    .unwrap_err();

    assert!(matches!(err, ReleaseError::MissingServiceImage(ref s) if s == "ghost"));
    // api は付けたタグを外してから失敗する
    assert_eq!(engine.tags().len(), 1);
    assert_eq!(engine.removed().len(), 1);
    assert!(platform.updated_images().is_empty());
    assert_eq!(platform.updated_releases()[0].status, ReleaseStatus::Failed);
}

#[tokio::test]
async fn test_release_without_id_is_not_saved() {
    let compose = composition(&["api"]);
    let images = vec![built("api")];
    let engine = FakeEngine::default();
    let platform = FakePlatform {
        without_id: true,
        ..Default::default()
    };
    let opts = options();

    let release = deploy_project(DeployRequest {
        composition: &compose,
        images: &images,
        options: &opts,
        engine: &engine,
        platform: &platform,
    })
    .await
    .unwrap();

    assert_eq!(release.id, None);
    assert_eq!(release.status, ReleaseStatus::Success);
    assert!(release.end_timestamp.is_some());
    assert!(platform.updated_releases().is_empty());
}

#[tokio::test]
async fn test_authorize_failure_untags_and_fails_release() {
    let compose = composition(&["a", "b"]);
    let images = vec![built("a"), built("b")];
    let engine = FakeEngine::default();
    let platform = FakePlatform {
        fail_authorize: true,
        ..Default::default()
    };
    let opts = options();

    let err = deploy_project(DeployRequest {
        composition: &compose,
        images: &images,
        options: &opts,
        engine: &engine,
        platform: &platform,
    })
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        ReleaseError::Platform {
            action: "authorize push",
            ..
        }
    ));
    assert!(engine.pushes().is_empty());
    assert_eq!(engine.tags().len(), 2);
    assert_eq!(engine.removed().len(), 2);
    assert!(platform.updated_images().is_empty());

    let saved = platform.updated_releases();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].status, ReleaseStatus::Failed);
    assert!(saved[0].end_timestamp.is_some());
}
