//! Dockerfile ベースのビルドバックエンド
//!
//! プロジェクトの tar をビルドコンテキストごとに切り出し、Dockerfile を解決して
//! エンジンでビルド（外部イメージは pull）します。

use crate::backend::{BuildBackend, LocalImage, ResolutionParams};
use crate::engine::{BuildOutput, ContainerEngine, EngineBuildOptions};
use crate::error::{BuildError, Result};
use crate::resolver::resolve_stream;
use crate::stream::TaskHook;
use crate::tarball::extract_context;
use crate::task::{BuildTask, TaskSource};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use fleetship_compose::{Composition, ImageSource};
use fleetship_config::RegistrySecrets;
use futures_util::future::join_all;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::path::Path;

#[derive(Debug, Clone, Copy, Default)]
pub struct DockerfileBackend;

impl DockerfileBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BuildBackend for DockerfileBackend {
    fn split_build_stream(
        &self,
        composition: &Composition,
        stream: Bytes,
    ) -> Result<Vec<BuildTask>> {
        let descriptors = fleetship_compose::parse(composition)?;
        let mut tasks = Vec::with_capacity(descriptors.len());

        for descriptor in descriptors {
            let task = match descriptor.image {
                ImageSource::Image(image) => BuildTask::external(descriptor.service_name, image),
                ImageSource::Build(build) => {
                    let context = if build.context.is_empty() {
                        ".".to_string()
                    } else {
                        build.context
                    };
                    let Some(context_stream) = extract_context(&stream, &context)? else {
                        return Err(BuildError::ContextNotFound {
                            service: descriptor.service_name,
                            context,
                        });
                    };
                    let mut task = BuildTask::build(
                        descriptor.service_name,
                        context,
                        build.dockerfile,
                        context_stream,
                    );
                    task.tag = build.tag;
                    task.args = build.args;
                    task
                }
            };
            tasks.push(task);
        }

        Ok(tasks)
    }

    fn perform_resolution<'a>(
        &'a self,
        tasks: Vec<BuildTask>,
        params: &'a ResolutionParams,
    ) -> BoxStream<'a, Result<BuildTask>> {
        stream::iter(tasks)
            .then(move |mut task| async move {
                let resolved = match &task.source {
                    TaskSource::External { .. } => None,
                    TaskSource::Build {
                        stream: Some(stream),
                        dockerfile_path,
                        ..
                    } => resolve_stream(stream, params, dockerfile_path.as_deref())?,
                    TaskSource::Build { stream: None, .. } => None,
                };
                if let Some((resolution, stream)) = resolved {
                    task.mark_resolved(resolution, stream)?;
                }
                Ok::<_, BuildError>(task)
            })
            .boxed()
    }

    async fn perform_builds(
        &self,
        tasks: Vec<BuildTask>,
        engine: &dyn ContainerEngine,
        tmp_path: &Path,
    ) -> Result<Vec<LocalImage>> {
        tracing::debug!(
            "Running {} task(s) with engine tmp path {}",
            tasks.len(),
            tmp_path.display()
        );
        let results = join_all(tasks.into_iter().map(|task| run_task(task, engine))).await;
        results.into_iter().collect()
    }
}

async fn run_task(mut task: BuildTask, engine: &dyn ContainerEngine) -> Result<LocalImage> {
    let hook = task.take_hook();
    let start_time = Utc::now();

    let (name, error) = match &task.source {
        TaskSource::External { image_name } => {
            let secrets = task.docker_opts.registry_config.clone();
            let error = pull(engine, image_name.clone(), secrets, hook).await;
            (image_name.clone(), error)
        }
        TaskSource::Build {
            stream: Some(stream),
            resolution: Some(resolution),
            ..
        } => {
            let tag = task
                .docker_opts
                .t
                .clone()
                .or_else(|| task.tag.clone())
                .unwrap_or_else(|| task.service_name.clone());
            let opts = EngineBuildOptions {
                dockerfile: resolution.dockerfile_path.clone(),
                tag: tag.clone(),
                buildargs: task.docker_opts.buildargs.clone(),
                nocache: task.docker_opts.nocache.unwrap_or(false),
                pull: task.docker_opts.pull.unwrap_or(false),
                squash: task.docker_opts.squash.unwrap_or(false),
                cachefrom: task.docker_opts.cachefrom.clone().unwrap_or_default(),
                registry_config: task.docker_opts.registry_config.clone(),
            };
            let error = build(engine, stream.clone(), opts, hook).await;
            (tag, error)
        }
        TaskSource::Build { .. } => {
            return Err(BuildError::UnresolvedProjectType {
                service: task.service_name.clone(),
            });
        }
    };

    let resolution = task.resolution();
    Ok(LocalImage {
        service_name: task.service_name.clone(),
        name,
        successful: error.is_none(),
        error,
        dockerfile: resolution.map(|r| r.dockerfile.clone()),
        project_type: resolution.map(|r| r.project_type.clone()),
        start_time: Some(start_time),
        end_time: Some(Utc::now()),
    })
}

/// pull を実行し、失敗したらエラーメッセージを返す
async fn pull(
    engine: &dyn ContainerEngine,
    image: String,
    secrets: RegistrySecrets,
    hook: Option<TaskHook>,
) -> Option<String> {
    let mut hook = match hook {
        Some(TaskHook::Pull(hook)) => Some(hook),
        _ => None,
    };
    let mut progress = engine.pull_image(&image, &secrets);
    let mut error = None;

    while let Some(item) = progress.next().await {
        match item {
            Ok(p) => {
                if let Some(message) = p.error_detail.clone().or_else(|| p.error.clone()) {
                    error = Some(message);
                }
                if let Some(hook) = hook.as_mut() {
                    hook.on_progress(p);
                }
            }
            Err(e) => {
                let message = e.to_string();
                if let Some(hook) = hook.as_mut() {
                    hook.fail(&message);
                }
                error = Some(message);
                break;
            }
        }
    }

    if let Some(message) = &error {
        tracing::debug!("Pull of {} failed: {}", image, message);
    }
    error
}

/// ビルドを実行し、失敗したらエラーメッセージを返す
async fn build(
    engine: &dyn ContainerEngine,
    context: Bytes,
    opts: EngineBuildOptions,
    hook: Option<TaskHook>,
) -> Option<String> {
    let mut hook = match hook {
        Some(TaskHook::Build(hook)) => Some(hook),
        _ => None,
    };
    let tag = opts.tag.clone();
    let mut output = engine.build_image(context, opts);
    let mut error = None;

    while let Some(item) = output.next().await {
        match item {
            Ok(BuildOutput { stream, error: None }) => {
                if let (Some(chunk), Some(hook)) = (stream, hook.as_mut()) {
                    hook.feed(&chunk);
                }
            }
            Ok(BuildOutput {
                error: Some(message),
                ..
            }) => {
                error = Some(message);
                break;
            }
            Err(e) => {
                error = Some(e.to_string());
                break;
            }
        }
    }

    if let Some(hook) = hook.as_mut() {
        match &error {
            Some(message) => hook.fail(message),
            None => hook.finish(),
        }
    }

    match &error {
        Some(message) => tracing::debug!("Build of {} failed: {}", tag, message),
        None => tracing::debug!("Successfully built: {}", tag),
    }
    error
}
