mod common;

use common::{FakeEngine, TestProject, inline_renderer, mode_of};
use fleetship_build::{
    BuildError, BuildProjectOptions, BuildRequest, DockerfileBackend, PreprocessHook,
    build_project,
};
use fleetship_compose::{LoadProjectOptions, load_project};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn options(project: &TestProject) -> BuildProjectOptions {
    BuildProjectOptions::new(project.path(), "MyApp", "amd64", "intel-nuc")
}

fn load(project: &TestProject) -> fleetship_compose::ComposeProject {
    load_project(
        &LoadProjectOptions {
            project_path: project.path(),
            project_name: Some("MyApp".to_string()),
            dockerfile_path: None,
        },
        None,
    )
    .unwrap()
}

#[tokio::test]
async fn test_dockerfile_only_project_builds_one_image() {
    let project = TestProject::new();
    project.write("Dockerfile", "FROM alpine\nRUN echo hello\n");
    project.write("main.sh", "echo hi\n");

    let compose = load(&project);
    let engine = FakeEngine::new("x86_64");
    let (renderer, captured) = inline_renderer(&["main"]);
    let opts = options(&project);

    let images = build_project(BuildRequest {
        composition: &compose.composition,
        options: &opts,
        engine: &engine,
        backend: &DockerfileBackend::new(),
        renderer: Some(renderer),
        preprocess_hook: None,
    })
    .await
    .unwrap();

    assert_eq!(images.len(), 1);
    let image = &images[0];
    assert_eq!(image.service_name, "main");
    assert_eq!(image.name, "myapp_main");
    assert_eq!(image.props.project_type.as_deref(), Some("Standard Dockerfile"));
    assert!(image.props.size > 0);
    assert!(image.logs.contains("Step 1/2 : FROM alpine"));
    assert!(!image.logs.contains('\u{1b}'));
    assert!(!image.logs.contains("\n\n"));

    let builds = engine.builds();
    assert_eq!(builds.len(), 1);
    assert!(builds[0].entries.contains(&"main.sh".to_string()));

    let output = captured.text();
    assert!(output.contains("[main]"));
    assert!(output.contains("Image size:"));
    assert!(output.contains("Built 1 service(s) in"));
}

#[tokio::test]
async fn test_external_service_is_pulled_not_resolved() {
    let project = TestProject::new();
    project.write(
        "docker-compose.yml",
        "version: '2'\nservices:\n  api:\n    build: ./api\n  db:\n    image: redis\n",
    );
    project.write("api/Dockerfile", "FROM node\nRUN npm ci\n");

    let compose = load(&project);
    let engine = FakeEngine::new("x86_64");
    let (renderer, _captured) = inline_renderer(&["api", "db"]);
    let opts = options(&project);

    let resolutions = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&resolutions);
    let hook: PreprocessHook = Arc::new(move |dockerfile: &str| {
        counter.fetch_add(1, Ordering::SeqCst);
        dockerfile.to_string()
    });

    let images = build_project(BuildRequest {
        composition: &compose.composition,
        options: &opts,
        engine: &engine,
        backend: &DockerfileBackend::new(),
        renderer: Some(renderer),
        preprocess_hook: Some(hook),
    })
    .await
    .unwrap();

    assert_eq!(resolutions.load(Ordering::SeqCst), 1);
    assert_eq!(engine.pulls(), vec!["redis".to_string()]);
    assert_eq!(engine.builds().len(), 1);

    let names: Vec<_> = images.iter().map(|i| i.service_name.as_str()).collect();
    assert_eq!(names, vec!["api", "db"]);

    let db = &images[1];
    assert_eq!(db.name, "redis");
    assert_eq!(db.props.project_type, None);
    assert!(db.logs.contains("Downloaded newer image for redis"));
    assert!(db.logs.contains("50% a1b2: Downloading"));
    assert!(!db.logs.contains("Step"));
}

#[tokio::test]
async fn test_broken_pull_stream_reaches_renderer() {
    let project = TestProject::new();
    project.write(
        "docker-compose.yml",
        "version: '2'\nservices:\n  db:\n    image: redis\n",
    );

    let compose = load(&project);
    let engine = FakeEngine::new("x86_64").broken_pull("redis");
    let (renderer, captured) = inline_renderer(&["db"]);
    let opts = options(&project);

    let err = build_project(BuildRequest {
        composition: &compose.composition,
        options: &opts,
        engine: &engine,
        backend: &DockerfileBackend::new(),
        renderer: Some(renderer),
        preprocess_hook: None,
    })
    .await
    .unwrap_err();

    match err {
        BuildError::ServiceBuildFailed { service, message } => {
            assert_eq!(service, "db");
            assert!(message.contains("connection reset while pulling redis"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(captured.text().contains("[db]"));
    assert!(captured.text().contains("connection reset while pulling redis"));
}

#[tokio::test]
async fn test_build_args_and_tag_reach_engine() {
    let project = TestProject::new();
    project.write(
        "docker-compose.yml",
        "version: '2'\nservices:\n  web:\n    build:\n      context: .\n      args:\n        MODE: compose\n        LEVEL: '1'\n",
    );
    project.write("Dockerfile", "FROM alpine\n");

    let compose = load(&project);
    let engine = FakeEngine::new("x86_64");
    let (renderer, _captured) = inline_renderer(&["web"]);
    let mut opts = options(&project);
    opts.build_args.insert("MODE".to_string(), "cli".to_string());

    build_project(BuildRequest {
        composition: &compose.composition,
        options: &opts,
        engine: &engine,
        backend: &DockerfileBackend::new(),
        renderer: Some(renderer),
        preprocess_hook: None,
    })
    .await
    .unwrap();

    let build = &engine.builds()[0];
    assert_eq!(build.tag, "myapp_web");
    assert_eq!(build.buildargs["MODE"], "cli");
    assert_eq!(build.buildargs["LEVEL"], "1");
}

#[tokio::test]
async fn test_unresolved_project_type_is_an_error() {
    let project = TestProject::new();
    project.write(
        "docker-compose.yml",
        "version: '2'\nservices:\n  worker:\n    build: ./worker\n",
    );
    project.write("worker/main.py", "print('hi')\n");

    let compose = load(&project);
    let engine = FakeEngine::new("x86_64");
    let (renderer, captured) = inline_renderer(&["worker"]);
    let opts = options(&project);

    let err = build_project(BuildRequest {
        composition: &compose.composition,
        options: &opts,
        engine: &engine,
        backend: &DockerfileBackend::new(),
        renderer: Some(renderer),
        preprocess_hook: None,
    })
    .await
    .unwrap_err();

    assert_eq!(
        err.to_string(),
        "Project type for service \"worker\" could not be determined. Missing a Dockerfile?"
    );
    assert!(engine.builds().is_empty());
    // 失敗しても Renderer は終了される
    assert!(captured.text().contains("Built 1 service(s) in"));
}

#[tokio::test]
async fn test_failed_build_surfaces_service_error() {
    let project = TestProject::new();
    project.write("Dockerfile", "FROM alpine\nRUN false\n");

    let compose = load(&project);
    let engine = FakeEngine::new("x86_64").failing("myapp_main");
    let (renderer, captured) = inline_renderer(&["main"]);
    let opts = options(&project);

    let err = build_project(BuildRequest {
        composition: &compose.composition,
        options: &opts,
        engine: &engine,
        backend: &DockerfileBackend::new(),
        renderer: Some(renderer),
        preprocess_hook: None,
    })
    .await
    .unwrap_err();

    match err {
        BuildError::ServiceBuildFailed { service, message } => {
            assert_eq!(service, "main");
            assert!(message.contains("non-zero code"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(captured.text().contains("non-zero code"));
}

#[tokio::test]
async fn test_build_secrets_require_engine_support() {
    let project = TestProject::new();
    project.write("Dockerfile", "FROM alpine\n");
    project.write(
        ".fleetship/fleetship.yml",
        "build-secrets:\n  global:\n    - source: token\n      dest: token\n",
    );

    let compose = load(&project);
    let engine = FakeEngine::new("x86_64");
    let opts = options(&project);

    let err = build_project(BuildRequest {
        composition: &compose.composition,
        options: &opts,
        engine: &engine,
        backend: &DockerfileBackend::new(),
        renderer: None,
        preprocess_hook: None,
    })
    .await
    .unwrap_err();

    assert!(matches!(err, BuildError::BuildSecretsUnsupported { .. }));
    assert!(err.to_string().contains("fleetship.yml"));
    assert!(engine.builds().is_empty());
}

#[tokio::test]
async fn test_emulated_build_is_transposed() {
    let project = TestProject::new();
    project.write("Dockerfile", "FROM balenalib/rpi-alpine\nRUN echo hi\n");
    let bin_dir = tempfile::tempdir().unwrap();
    std::fs::write(bin_dir.path().join("qemu-arm-static"), b"\x7fELF").unwrap();

    let compose = load(&project);
    let engine = FakeEngine::new("x86_64");
    let (renderer, _captured) = inline_renderer(&["main"]);
    let mut opts = BuildProjectOptions::new(project.path(), "MyApp", "armv7hf", "raspberrypi3");
    opts.emulated = true;
    opts.emulation_bin_dir = Some(bin_dir.path().to_path_buf());

    let images = build_project(BuildRequest {
        composition: &compose.composition,
        options: &opts,
        engine: &engine,
        backend: &DockerfileBackend::new(),
        renderer: Some(renderer),
        preprocess_hook: None,
    })
    .await
    .unwrap();

    let copied = project.path().join(".fleetship/qemu-execve");
    assert!(copied.is_file());
    assert_eq!(mode_of(&copied), 0o555);

    let build = &engine.builds()[0];
    assert!(build.entries.contains(&".fleetship/qemu-execve".to_string()));
    assert!(
        build
            .dockerfile
            .contains(r#"COPY [".fleetship/qemu-execve","/tmp/qemu-execve"]"#)
    );
    assert!(build.dockerfile.contains(r#"RUN ["/tmp/qemu-execve","-execve","/bin/sh","-c","echo hi"]"#));

    // ログには元の RUN が出る
    assert!(images[0].logs.contains("Step 3/3 : RUN echo hi"));
}

#[tokio::test]
async fn test_emulation_not_needed_on_same_arch() {
    let project = TestProject::new();
    project.write("Dockerfile", "FROM alpine\nRUN echo hi\n");

    let compose = load(&project);
    let engine = FakeEngine::new("aarch64");
    let (renderer, _captured) = inline_renderer(&["main"]);
    let mut opts = BuildProjectOptions::new(project.path(), "MyApp", "aarch64", "jetson-nano");
    opts.emulated = true;
    opts.emulation_bin_dir = Some(project.path().join("no-such-dir"));

    build_project(BuildRequest {
        composition: &compose.composition,
        options: &opts,
        engine: &engine,
        backend: &DockerfileBackend::new(),
        renderer: Some(renderer),
        preprocess_hook: None,
    })
    .await
    .unwrap();

    assert!(!project.path().join(".fleetship/qemu-execve").exists());
    assert!(!engine.builds()[0].dockerfile.contains("qemu"));
}
