use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReleaseError {
    /// プラットフォーム呼び出しの失敗（SDK のエラーはそのまま保持）
    #[error("Failed to {action}: {source:#}")]
    Platform {
        action: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("No service image was created for service \"{0}\"")]
    MissingServiceImage(String),

    #[error("Invalid image location: {0}")]
    InvalidImageLocation(String),

    #[error("Failed to tag image for service \"{service}\": {source}")]
    Tag {
        service: String,
        #[source]
        source: fleetship_build::BuildError,
    },

    #[error("Failed to push image for service \"{service}\": {source}")]
    Push {
        service: String,
        #[source]
        source: fleetship_build::BuildError,
    },
}

impl ReleaseError {
    pub(crate) fn platform(action: &'static str, source: anyhow::Error) -> Self {
        ReleaseError::Platform { action, source }
    }

    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            ReleaseError::Platform {
                action: "authorize push",
                ..
            } => {
                format!(
                    "{}\n\
                     \n\
                     解決方法:\n\
                     1. ログイン状態とアプリケーションへのアクセス権を確認してください\n\
                     2. 時間をおいて再度デプロイしてください",
                    self
                )
            }
            ReleaseError::Push { service, .. } => {
                format!(
                    "{}\n\
                     \n\
                     解決方法:\n\
                     1. ネットワーク接続を確認してください\n\
                     2. サービス \"{}\" のイメージサイズが大きすぎないか確認してください",
                    self, service
                )
            }
            _ => self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReleaseError>;
