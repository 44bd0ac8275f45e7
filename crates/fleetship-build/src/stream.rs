//! ビルド / pull 出力のアダプタ
//!
//! エンジンの生出力を行単位に整形し、ログバッファへ記録しつつ
//! 進捗イベントに変換します。

use crate::emulation::TransposeOptions;
use crate::progress::{ProgressEvent, ProgressSink};
use regex::Regex;
use std::sync::{Arc, LazyLock, Mutex};

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\u001b\u009b][\[\]()#;?]*(?:(?:[a-zA-Z\d]*(?:;[a-zA-Z\d]*)*)?\u0007|(?:\d{1,4}(?:;\d{0,4})*)?[\dA-PR-TZcf-ntqry=><~])")
        .expect("ANSI escape pattern is valid")
});

static BUILD_STEP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*Step\s+(\d+)/(\d+)\s*: (.+)$").expect("build step pattern is valid")
});

/// ANSI エスケープシーケンスを取り除く
pub fn strip_ansi(s: &str) -> String {
    ANSI_ESCAPE.replace_all(s, "").into_owned()
}

/// サービスごとのビルドログ
#[derive(Debug, Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<String>>>);

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: impl Into<String>) {
        if let Ok(mut lines) = self.0.lock() {
            lines.push(line.into());
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.0.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// 全行を `\n` で連結
    pub fn joined(&self) -> String {
        self.0.lock().map(|l| l.join("\n")).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().map(|l| l.is_empty()).unwrap_or(true)
    }
}

/// チャンク単位の出力を行に分割する
#[derive(Debug, Default)]
pub struct LineSplitter {
    remainder: String,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 完結した行を返し、末尾の未完の行は次回に持ち越す
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.remainder.push_str(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.remainder.find('\n') {
            let mut line: String = self.remainder.drain(..=pos).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    pub fn finish(&mut self) -> Option<String> {
        if self.remainder.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.remainder))
        }
    }
}

/// 空白だけの行か
pub fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// `Step N/M : ...` 行から進捗を求める
///
/// ステップ番号と総数は覚えておき、後続の行にも付与する。
#[derive(Debug, Default)]
pub struct BuildProgressParser {
    inline: bool,
    step: Option<(u32, u32)>,
    progress: Option<u8>,
}

impl BuildProgressParser {
    pub fn new(inline: bool) -> Self {
        Self {
            inline,
            ..Default::default()
        }
    }

    pub fn parse(&mut self, line: &str) -> ProgressEvent {
        if self.inline {
            return ProgressEvent::status(line);
        }

        let mut status = line.to_string();
        if !line.starts_with("Successfully tagged ") {
            let mut text = line;
            if let Some(caps) = BUILD_STEP.captures(line) {
                let step = caps[1].parse::<u32>().unwrap_or(0);
                let total = caps[2].parse::<u32>().unwrap_or(0);
                self.step = Some((step, total));
                text = caps.get(3).map(|m| m.as_str()).unwrap_or("");
            }
            if let Some((step, total)) = self.step {
                status = format!("Step {}/{}: {}", step, total, text);
                if total > 0 {
                    let pct = (u64::from(step) * 100 / u64::from(total)).min(100);
                    self.progress = Some(pct as u8);
                }
            }
        }

        ProgressEvent {
            status: Some(status),
            progress: self.progress,
            error: None,
        }
    }
}

/// エンジンの pull 進捗
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullProgress {
    pub id: Option<String>,
    pub status: Option<String>,
    pub percentage: Option<u8>,
    pub error: Option<String>,
    pub error_detail: Option<String>,
}

/// pull 進捗を進捗イベントに変換
pub fn adapt_pull_progress(p: PullProgress) -> ProgressEvent {
    let mut status = p
        .status
        .map(|s| s.strip_prefix("Status: ").map(str::to_string).unwrap_or(s));
    if let Some(id) = p.id {
        status = Some(format!("{}: {}", id, status.unwrap_or_default()));
    }
    let progress = p.percentage.filter(|&pct| pct != 100);

    ProgressEvent {
        status,
        progress,
        error: p.error_detail.or(p.error),
    }
}

/// pull イベントをログ行に変換
fn pull_log_line(event: &ProgressEvent) -> Option<String> {
    if let Some(error) = &event.error {
        return Some(error.clone());
    }
    match (event.progress, &event.status) {
        (Some(progress), Some(status)) if progress > 0 => Some(format!("{}% {}", progress, status)),
        (_, Some(status)) => Some(status.clone()),
        _ => None,
    }
}

/// 外部イメージの pull 進捗を受けるフック
pub struct PullHook {
    sink: Box<dyn ProgressSink>,
    log_buffer: LogBuffer,
}

impl PullHook {
    pub fn new(sink: Box<dyn ProgressSink>, log_buffer: LogBuffer) -> Self {
        Self { sink, log_buffer }
    }

    pub fn on_progress(&mut self, progress: PullProgress) {
        let event = adapt_pull_progress(progress);
        if let Some(line) = pull_log_line(&event) {
            self.log_buffer.push(line);
        }
        self.sink.send(event);
    }

    /// pull ストリーム自体のエラー
    pub fn fail(&mut self, error: &str) {
        self.log_buffer.push(error);
        self.sink.send(ProgressEvent::error(error));
    }
}

/// ビルド出力を受けるフック
///
/// ANSI 除去 → 行分割 → (エミュレーションの逆変換) → 空行除去 →
/// ログ記録 → 進捗変換 → Renderer の順に流す。
pub struct BuildHook {
    sink: Box<dyn ProgressSink>,
    log_buffer: LogBuffer,
    splitter: LineSplitter,
    parser: BuildProgressParser,
    untranspose: Option<TransposeOptions>,
}

impl BuildHook {
    pub fn new(
        sink: Box<dyn ProgressSink>,
        log_buffer: LogBuffer,
        inline: bool,
        untranspose: Option<TransposeOptions>,
    ) -> Self {
        Self {
            sink,
            log_buffer,
            splitter: LineSplitter::new(),
            parser: BuildProgressParser::new(inline),
            untranspose,
        }
    }

    pub fn feed(&mut self, chunk: &str) {
        let cleaned = strip_ansi(chunk);
        for line in self.splitter.push(&cleaned) {
            self.handle_line(line);
        }
    }

    /// エンジンが返したビルドエラー
    pub fn fail(&mut self, error: &str) {
        self.finish();
        self.log_buffer.push(error);
        self.sink.send(ProgressEvent::error(error));
    }

    pub fn finish(&mut self) {
        if let Some(line) = self.splitter.finish() {
            self.handle_line(line);
        }
    }

    fn handle_line(&mut self, line: String) {
        let line = match &self.untranspose {
            Some(opts) => opts.untranspose_line(&line),
            None => line,
        };
        if is_blank(&line) {
            return;
        }
        self.log_buffer.push(line.clone());
        let event = self.parser.parse(&line);
        self.sink.send(event);
    }
}

/// タスクに付ける進捗フック
pub enum TaskHook {
    Pull(PullHook),
    Build(BuildHook),
}

impl std::fmt::Debug for TaskHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskHook::Pull(_) => f.write_str("TaskHook::Pull"),
            TaskHook::Build(_) => f.write_str("TaskHook::Build"),
        }
    }
}
