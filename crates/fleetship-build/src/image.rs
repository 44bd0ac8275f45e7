//! ビルド済みイメージ

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// ログの最大長（バイト）
pub const LOG_LENGTH_MAX: usize = 512 * 1024;

/// ログを `max` バイト以内に収める
///
/// 行の途中では切らない。最初の改行より前で上限に達した場合は空になる。
pub fn truncate_log(log: &str, max: usize) -> String {
    if log.len() <= max {
        return log.to_string();
    }
    let mut end = max;
    while !log.is_char_boundary(end) {
        end -= 1;
    }
    let head = &log[..end];
    match head.rfind('\n') {
        Some(pos) => head[..pos].to_string(),
        None => String::new(),
    }
}

/// イメージの付帯情報
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageProps {
    pub dockerfile: Option<String>,
    pub project_type: Option<String>,
    /// バイト
    pub size: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// ビルド（または pull）が完了したサービスのイメージ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuiltImage {
    pub service_name: String,
    /// ローカルのイメージ名
    pub name: String,
    pub logs: String,
    pub props: ImageProps,
}
