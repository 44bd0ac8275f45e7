//! プロジェクトのビルド
//!
//! タスクの切り出し → 解決 → 属性の設定 → エミュレーション → フック →
//! 実行 → 検査 の順にプロジェクト全体をビルドします。

use crate::backend::{BuildBackend, LocalImage, PreprocessHook, ResolutionParams};
use crate::emulation::{TransposeOptions, install_emulation_if_needed, transpose_tar_stream};
use crate::engine::ContainerEngine;
use crate::error::{BuildError, Result};
use crate::image::{BuiltImage, ImageProps, LOG_LENGTH_MAX, truncate_log};
use crate::options::BuildProjectOptions;
use crate::progress::{Renderer, start_renderer};
use crate::stream::{BuildHook, LogBuffer, PullHook, TaskHook};
use crate::tarball::{TarDirectoryOptions, clone_tar_stream, tar_directory};
use crate::task::{BuildTask, TaskSource, TaskStage};
use bytes::Bytes;
use fleetship_compose::{
    Composition, ImageDescriptor, ImageSource, get_service_dirs_from_composition,
    load_build_metadata,
};
use futures_util::future::join_all;
use futures_util::stream::StreamExt;
use indicatif::HumanBytes;
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const RELEASE_HASH_ENV: &str = "FLEETSHIP_RELEASE_HASH";
pub const APP_NAME_ENV: &str = "FLEETSHIP_APP_NAME";
const RELEASE_HASH_UNAVAILABLE: &str = "unavailable";

/// `build_project` の入力
pub struct BuildRequest<'a> {
    pub composition: &'a Composition,
    pub options: &'a BuildProjectOptions,
    pub engine: &'a dyn ContainerEngine,
    pub backend: &'a dyn BuildBackend,
    /// 未指定なら `inline_logs` に応じて作る
    pub renderer: Option<Box<dyn Renderer>>,
    pub preprocess_hook: Option<PreprocessHook>,
}

/// サービス名 -> `Image size: ...`
type Summary = BTreeMap<String, String>;

/// プロジェクトの全サービスをビルドする
///
/// 戻り値はコンポジションの記述順。Renderer は成否にかかわらず終了される。
#[tracing::instrument(skip_all, fields(project = %req.options.project_name))]
pub async fn build_project(req: BuildRequest<'_>) -> Result<Vec<BuiltImage>> {
    let opts = req.options;

    let (metadata, metadata_path) = load_build_metadata(&opts.project_path)?;
    if metadata.declares_build_secrets() && !req.engine.supports_build_secrets().await? {
        return Err(BuildError::BuildSecretsUnsupported {
            file: metadata_path.unwrap_or_else(|| opts.project_path.join(".fleetship")),
        });
    }

    let descriptors = fleetship_compose::parse(req.composition)?;
    let service_names: Vec<String> = descriptors
        .iter()
        .map(|d| d.service_name.clone())
        .collect();

    let renderer = match req.renderer {
        Some(renderer) => {
            renderer.start();
            renderer
        }
        None => start_renderer(&service_names, opts.inline_logs),
    };

    let pipeline = Pipeline {
        composition: req.composition,
        opts,
        engine: req.engine,
        backend: req.backend,
        renderer: renderer.as_ref(),
        preprocess_hook: req.preprocess_hook,
    };

    let result = tokio::select! {
        result = pipeline.run(descriptors) => result,
        Ok(()) = tokio::signal::ctrl_c() => Err(BuildError::Interrupted),
    };

    match result {
        Ok((images, summary)) => {
            renderer.end(Some(&summary));
            Ok(images)
        }
        Err(e) => {
            renderer.end(None);
            Err(e)
        }
    }
}

struct Pipeline<'a> {
    composition: &'a Composition,
    opts: &'a BuildProjectOptions,
    engine: &'a dyn ContainerEngine,
    backend: &'a dyn BuildBackend,
    renderer: &'a dyn Renderer,
    preprocess_hook: Option<PreprocessHook>,
}

impl Pipeline<'_> {
    async fn run(&self, mut descriptors: Vec<ImageDescriptor>) -> Result<(Vec<BuiltImage>, Summary)> {
        let opts = self.opts;
        tracing::info!("Building for {}/{}", opts.arch, opts.device_type);

        let bin_dir = match &opts.emulation_bin_dir {
            Some(dir) => dir.clone(),
            None if opts.emulated => fleetship_config::emulation_bin_dir()?,
            None => PathBuf::new(),
        };
        let transpose = install_emulation_if_needed(
            self.engine,
            opts.emulated,
            &opts.arch,
            &descriptors,
            &opts.project_path,
            &bin_dir,
        )
        .await?;

        let service_dirs =
            get_service_dirs_from_composition(&opts.project_path, Some(self.composition))?;
        let stream = tar_directory(
            &opts.project_path,
            &TarDirectoryOptions {
                ignore_mode: opts.ignore_mode,
                convert_eol: opts.convert_eol,
                service_dirs,
            },
        )?;

        let mut tasks = self.make_build_tasks(stream).await?;
        set_task_attributes(&mut tasks, &mut descriptors, opts);
        if let Some(transpose) = &transpose {
            transpose_tasks(&mut tasks, transpose)?;
        }
        self.attach_hooks(&mut tasks, transpose.as_ref())?;

        let log_buffers: BTreeMap<String, LogBuffer> = tasks
            .iter()
            .map(|t| (t.service_name.clone(), t.log_buffer.clone()))
            .collect();

        let tmp_path = opts
            .engine_tmp_path
            .clone()
            .unwrap_or_else(fleetship_config::engine_tmp_path);
        let local_images = self
            .backend
            .perform_builds(tasks, self.engine, &tmp_path)
            .await?;

        inspect_built_images(local_images, &log_buffers, &descriptors, self.engine).await
    }

    async fn make_build_tasks(&self, stream: Bytes) -> Result<Vec<BuildTask>> {
        let opts = self.opts;
        let tasks = self.backend.split_build_stream(self.composition, stream)?;
        for task in &tasks {
            match &task.source {
                TaskSource::External { image_name } => {
                    tracing::debug!("{}: image pull [{}]", task.service_name, image_name)
                }
                TaskSource::Build { context, .. } => {
                    tracing::debug!("{}: build [{}]", task.service_name, context)
                }
            }
        }

        let params = ResolutionParams {
            arch: opts.arch.clone(),
            device_type: opts.device_type.clone(),
            env: BTreeMap::from([
                (
                    RELEASE_HASH_ENV.to_string(),
                    opts.release_hash
                        .clone()
                        .unwrap_or_else(|| RELEASE_HASH_UNAVAILABLE.to_string()),
                ),
                (APP_NAME_ENV.to_string(), opts.project_name.clone()),
            ]),
            preprocess_hook: self.preprocess_hook.clone(),
        };

        let mut resolved = Vec::with_capacity(tasks.len());
        let mut resolution = self.backend.perform_resolution(tasks, &params);
        while let Some(task) = resolution.next().await {
            let mut task = task?;
            if task.is_external() {
                task.advance(TaskStage::External)?;
            } else {
                let Some(project_type) = task.project_type().map(str::to_string) else {
                    return Err(BuildError::UnresolvedProjectType {
                        service: task.service_name.clone(),
                    });
                };
                if let Some(stream) = task.stream() {
                    let cloned = clone_tar_stream(stream)?;
                    task.set_stream(cloned);
                }
                tracing::debug!("{}: resolved as {}", task.service_name, project_type);
            }
            resolved.push(task);
        }

        Ok(resolved)
    }

    fn attach_hooks(
        &self,
        tasks: &mut [BuildTask],
        transpose: Option<&TransposeOptions>,
    ) -> Result<()> {
        let inline = self.renderer.is_inline();
        for task in tasks {
            let sink = self.renderer.sink(&task.service_name);
            let hook = if task.is_external() {
                TaskHook::Pull(PullHook::new(sink, task.log_buffer.clone()))
            } else {
                TaskHook::Build(BuildHook::new(
                    sink,
                    task.log_buffer.clone(),
                    inline,
                    transpose.cloned(),
                ))
            };
            task.attach_hook(hook)?;
        }
        Ok(())
    }
}

/// タグ、ビルド引数、ビルドオプションを設定する
fn set_task_attributes(
    tasks: &mut [BuildTask],
    descriptors: &mut [ImageDescriptor],
    opts: &BuildProjectOptions,
) {
    for task in tasks {
        task.docker_opts
            .registry_config
            .extend(opts.registry_secrets.clone());
        if task.is_external() {
            continue;
        }

        let tag = task.tag.clone().unwrap_or_else(|| {
            format!("{}_{}", opts.project_name, task.service_name).to_lowercase()
        });
        task.tag = Some(tag.clone());
        if let Some(ImageDescriptor {
            image: ImageSource::Build(build),
            ..
        }) = descriptors
            .iter_mut()
            .find(|d| d.service_name == task.service_name)
        {
            build.tag = Some(tag.clone());
        }

        task.args
            .extend(opts.build_args.iter().map(|(k, v)| (k.clone(), v.clone())));
        task.docker_opts
            .buildargs
            .extend(task.args.iter().map(|(k, v)| (k.clone(), v.clone())));
        task.docker_opts.merge(&opts.build_opts);
        task.docker_opts.t = Some(tag);
    }
}

fn transpose_tasks(tasks: &mut [BuildTask], transpose: &TransposeOptions) -> Result<()> {
    for task in tasks.iter_mut().filter(|t| !t.is_external()) {
        let (Some(stream), Some(resolution)) = (task.stream(), task.resolution()) else {
            continue;
        };
        let transposed = transpose_tar_stream(stream, transpose, &resolution.dockerfile_path)?;
        task.set_stream(transposed);
        task.advance(TaskStage::Transposed)?;
        tracing::debug!("{}: transposed for emulation", task.service_name);
    }
    Ok(())
}

/// 結果をタスクと突き合わせ、サイズとログを付ける
async fn inspect_built_images(
    local_images: Vec<LocalImage>,
    log_buffers: &BTreeMap<String, LogBuffer>,
    descriptors: &[ImageDescriptor],
    engine: &dyn ContainerEngine,
) -> Result<(Vec<BuiltImage>, Summary)> {
    for image in &local_images {
        let has_task = log_buffers.contains_key(&image.service_name);
        let has_descriptor = descriptors
            .iter()
            .any(|d| d.service_name == image.service_name);
        if !has_task || !has_descriptor {
            let message = format!(
                "built image for unknown service \"{}\" (task: {}, descriptor: {})",
                image.service_name, has_task, has_descriptor
            );
            tracing::error!("{}", message);
            return Err(BuildError::InvariantViolation(message));
        }
    }

    let mut failures = local_images.iter().filter(|i| !i.successful);
    if let Some(first) = failures.next() {
        for other in failures {
            tracing::error!(
                "Service \"{}\" failed to build: {}",
                other.service_name,
                other.error.as_deref().unwrap_or("unknown error")
            );
        }
        return Err(BuildError::ServiceBuildFailed {
            service: first.service_name.clone(),
            message: first
                .error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string()),
        });
    }

    let sizes = join_all(local_images.iter().map(|i| engine.image_size(&i.name))).await;

    let mut built = Vec::with_capacity(local_images.len());
    let mut summary = Summary::new();
    for (image, size) in local_images.into_iter().zip(sizes) {
        let size = size?;
        let logs = log_buffers
            .get(&image.service_name)
            .map(|b| truncate_log(&b.joined(), LOG_LENGTH_MAX))
            .unwrap_or_default();
        summary.insert(
            image.service_name.clone(),
            format!("Image size: {}", HumanBytes(size)),
        );
        built.push(BuiltImage {
            service_name: image.service_name,
            name: image.name,
            logs,
            props: ImageProps {
                dockerfile: image.dockerfile,
                project_type: image.project_type,
                size,
                start_time: image.start_time,
                end_time: image.end_time,
            },
        });
    }

    // コンポジションの記述順に並べる
    built.sort_by_key(|b| {
        descriptors
            .iter()
            .position(|d| d.service_name == b.service_name)
            .unwrap_or(usize::MAX)
    });
    Ok((built, summary))
}
