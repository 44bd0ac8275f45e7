//! ビルドタスク
//!
//! サービス1つ分のビルド（または pull）の状態を段階付きで保持します。
//! 段階の遷移は `advance` で検証されます。

use crate::error::{BuildError, Result};
use crate::options::DockerBuildOptions;
use crate::stream::{LogBuffer, TaskHook};
use bytes::Bytes;
use std::collections::BTreeMap;

/// タスクの段階
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStage {
    /// ビルドストリームから切り出した直後
    Derived,
    /// プロジェクトタイプと Dockerfile が決まった
    Resolved,
    /// 外部イメージ（pull のみ）
    External,
    /// エミュレーション向けに Dockerfile を書き換えた
    Transposed,
    /// 進捗フックを取り付けた
    Hooked,
}

impl TaskStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStage::Derived => "derived",
            TaskStage::Resolved => "resolved",
            TaskStage::External => "external",
            TaskStage::Transposed => "transposed",
            TaskStage::Hooked => "hooked",
        }
    }

    fn can_advance_to(self, to: TaskStage) -> bool {
        use TaskStage::*;
        matches!(
            (self, to),
            (Derived, Resolved)
                | (Derived, External)
                | (Resolved, Resolved)
                | (Resolved, Transposed)
                | (Resolved, Hooked)
                | (Transposed, Hooked)
                | (External, Hooked)
        )
    }
}

/// プロジェクトタイプの解決結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub project_type: String,
    /// 解決後の Dockerfile の内容
    pub dockerfile: String,
    /// ストリーム内の Dockerfile のパス
    pub dockerfile_path: String,
}

/// タスクの入力
#[derive(Debug, Clone)]
pub enum TaskSource {
    External {
        image_name: String,
    },
    Build {
        context: String,
        /// 代替 Dockerfile（コンテキスト相対）
        dockerfile_path: Option<String>,
        stream: Option<Bytes>,
        resolution: Option<Resolution>,
    },
}

/// サービス1つ分のビルドタスク
#[derive(Debug)]
pub struct BuildTask {
    pub service_name: String,
    pub source: TaskSource,
    pub tag: Option<String>,
    pub args: BTreeMap<String, String>,
    pub docker_opts: DockerBuildOptions,
    pub log_buffer: LogBuffer,
    hook: Option<TaskHook>,
    stage: TaskStage,
}

impl BuildTask {
    pub fn external(service_name: impl Into<String>, image_name: impl Into<String>) -> Self {
        Self::with_source(
            service_name.into(),
            TaskSource::External {
                image_name: image_name.into(),
            },
        )
    }

    pub fn build(
        service_name: impl Into<String>,
        context: impl Into<String>,
        dockerfile_path: Option<String>,
        stream: Bytes,
    ) -> Self {
        Self::with_source(
            service_name.into(),
            TaskSource::Build {
                context: context.into(),
                dockerfile_path,
                stream: Some(stream),
                resolution: None,
            },
        )
    }

    fn with_source(service_name: String, source: TaskSource) -> Self {
        Self {
            service_name,
            source,
            tag: None,
            args: BTreeMap::new(),
            docker_opts: DockerBuildOptions::default(),
            log_buffer: LogBuffer::new(),
            hook: None,
            stage: TaskStage::Derived,
        }
    }

    pub fn stage(&self) -> TaskStage {
        self.stage
    }

    pub fn is_external(&self) -> bool {
        matches!(self.source, TaskSource::External { .. })
    }

    pub fn resolution(&self) -> Option<&Resolution> {
        match &self.source {
            TaskSource::Build { resolution, .. } => resolution.as_ref(),
            TaskSource::External { .. } => None,
        }
    }

    /// 外部イメージには常に `None`
    pub fn project_type(&self) -> Option<&str> {
        self.resolution().map(|r| r.project_type.as_str())
    }

    pub fn stream(&self) -> Option<&Bytes> {
        match &self.source {
            TaskSource::Build { stream, .. } => stream.as_ref(),
            TaskSource::External { .. } => None,
        }
    }

    pub fn set_stream(&mut self, new_stream: Bytes) {
        if let TaskSource::Build { stream, .. } = &mut self.source {
            *stream = Some(new_stream);
        }
    }

    /// 段階を進める
    pub fn advance(&mut self, to: TaskStage) -> Result<()> {
        if !self.stage.can_advance_to(to) {
            return Err(BuildError::InvalidStageTransition {
                service: self.service_name.clone(),
                from: self.stage.as_str(),
                to: to.as_str(),
            });
        }
        self.stage = to;
        Ok(())
    }

    /// 解決結果を記録して Resolved に進める
    pub fn mark_resolved(&mut self, resolved: Resolution, stream: Bytes) -> Result<()> {
        match &mut self.source {
            TaskSource::Build {
                resolution,
                stream: task_stream,
                ..
            } => {
                *resolution = Some(resolved);
                *task_stream = Some(stream);
            }
            TaskSource::External { .. } => {
                return Err(BuildError::InvariantViolation(format!(
                    "external task \"{}\" cannot be resolved",
                    self.service_name
                )));
            }
        }
        self.advance(TaskStage::Resolved)
    }

    pub fn attach_hook(&mut self, hook: TaskHook) -> Result<()> {
        self.advance(TaskStage::Hooked)?;
        self.hook = Some(hook);
        Ok(())
    }

    pub fn take_hook(&mut self) -> Option<TaskHook> {
        self.hook.take()
    }
}
