use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("設定ディレクトリが見つかりません")]
    ConfigDirNotFound,

    #[error("Filename must end with .json, .yml or .yaml: {}", .0.display())]
    UnsupportedSecretsFormat(PathBuf),

    #[error("Error validating registry secrets file \"{}\":\n{message}", .path.display())]
    InvalidRegistrySecrets { path: PathBuf, message: String },

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            ConfigError::InvalidRegistrySecrets { path, message } => {
                format!(
                    "レジストリシークレットファイルが不正です: {}\n\
                     {}\n\
                     \n\
                     各エントリには username と password が必要です:\n\
                        registry.example.com:\n\
                          username: user\n\
                          password: secret",
                    path.display(),
                    message
                )
            }
            _ => format!("{}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
