//! ビルド進捗の表示
//!
//! サービスごとの進捗イベントを受け取り、対話的なマルチバー表示か
//! `[service] message` 形式のインライン出力で描画します。

use colored::Colorize;
use indicatif::{HumanDuration, MultiProgress, ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// 1サービス分の進捗イベント
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressEvent {
    pub status: Option<String>,
    /// 0-100
    pub progress: Option<u8>,
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Default::default()
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// サービス1つ分の進捗の送り先
pub trait ProgressSink: Send {
    fn send(&mut self, event: ProgressEvent);
}

/// 進捗表示
pub trait Renderer: Send + Sync {
    fn start(&self);

    /// サービスの進捗の送り先を作る
    fn sink(&self, service_name: &str) -> Box<dyn ProgressSink>;

    /// 表示を終える。サマリーはサービス名 -> メッセージ
    fn end(&self, summary: Option<&BTreeMap<String, String>>);

    fn is_inline(&self) -> bool;
}

/// 設定に応じた Renderer を作って開始する
pub fn start_renderer(service_names: &[String], inline_logs: bool) -> Box<dyn Renderer> {
    let renderer: Box<dyn Renderer> = if inline_logs {
        Box::new(InlineRenderer::stdout(service_names))
    } else {
        Box::new(InteractiveRenderer::new(service_names))
    };
    renderer.start();
    renderer
}

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// `[service] message` 形式で1行ずつ出力する
pub struct InlineRenderer {
    out: SharedWriter,
    services: Vec<String>,
    prefix_width: usize,
    started: Mutex<Option<Instant>>,
    ended: Mutex<bool>,
}

impl InlineRenderer {
    pub fn new(out: Box<dyn Write + Send>, service_names: &[String]) -> Self {
        let prefix_width = service_names
            .iter()
            .map(|s| s.len() + 3)
            .max()
            .unwrap_or(0);
        Self {
            out: Arc::new(Mutex::new(out)),
            services: service_names.to_vec(),
            prefix_width,
            started: Mutex::new(None),
            ended: Mutex::new(false),
        }
    }

    pub fn stdout(service_names: &[String]) -> Self {
        Self::new(Box::new(std::io::stdout()), service_names)
    }

    fn write_line(&self, service_name: &str, message: &str) {
        write_prefixed(&self.out, self.prefix_width, service_name, message, false);
    }
}

fn write_prefixed(out: &SharedWriter, width: usize, service: &str, message: &str, is_error: bool) {
    let prefix = format!("{:<width$}", format!("[{}]", service), width = width);
    let line = if is_error {
        format!("{}{}", prefix.blue(), message.red())
    } else {
        format!("{}{}", prefix.blue(), message)
    };
    if let Ok(mut out) = out.lock() {
        let _ = writeln!(out, "{}", line);
    }
}

struct InlineSink {
    out: SharedWriter,
    service_name: String,
    prefix_width: usize,
}

impl ProgressSink for InlineSink {
    fn send(&mut self, event: ProgressEvent) {
        if let Some(error) = &event.error {
            write_prefixed(&self.out, self.prefix_width, &self.service_name, error, true);
        } else if let Some(status) = &event.status {
            write_prefixed(&self.out, self.prefix_width, &self.service_name, status, false);
        }
    }
}

impl Renderer for InlineRenderer {
    fn start(&self) {
        if let Ok(mut started) = self.started.lock() {
            *started = Some(Instant::now());
        }
    }

    fn sink(&self, service_name: &str) -> Box<dyn ProgressSink> {
        Box::new(InlineSink {
            out: Arc::clone(&self.out),
            service_name: service_name.to_string(),
            prefix_width: self.prefix_width,
        })
    }

    fn end(&self, summary: Option<&BTreeMap<String, String>>) {
        {
            let Ok(mut ended) = self.ended.lock() else {
                return;
            };
            if *ended {
                return;
            }
            *ended = true;
        }

        if let Some(summary) = summary {
            for service in &self.services {
                if let Some(message) = summary.get(service) {
                    self.write_line(service, message);
                }
            }
        }

        let elapsed = self
            .started
            .lock()
            .ok()
            .and_then(|s| *s)
            .map(|s| s.elapsed());
        if let Some(elapsed) = elapsed
            && let Ok(mut out) = self.out.lock()
        {
            let _ = writeln!(
                out,
                "{} {} service(s) in {}",
                "Built".green().bold(),
                self.services.len(),
                HumanDuration(elapsed)
            );
        }
    }

    fn is_inline(&self) -> bool {
        true
    }
}

/// サービスごとに1本のプログレスバーを表示する
pub struct InteractiveRenderer {
    multi: MultiProgress,
    bars: BTreeMap<String, ProgressBar>,
    ended: Mutex<bool>,
}

impl InteractiveRenderer {
    pub fn new(service_names: &[String]) -> Self {
        let multi = MultiProgress::new();
        let width = service_names.iter().map(|s| s.len()).max().unwrap_or(0);
        let style = ProgressStyle::with_template(&format!(
            "{{prefix:<{width}.bold}} [{{bar:20.cyan/blue}}] {{pos:>3}}% {{wide_msg}}"
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");

        let bars = service_names
            .iter()
            .map(|name| {
                let pb = multi.add(ProgressBar::new(100));
                pb.set_style(style.clone());
                pb.set_prefix(name.clone());
                pb.set_message("Waiting...");
                (name.clone(), pb)
            })
            .collect();

        Self {
            multi,
            bars,
            ended: Mutex::new(false),
        }
    }
}

struct BarSink {
    bar: ProgressBar,
}

impl ProgressSink for BarSink {
    fn send(&mut self, event: ProgressEvent) {
        if let Some(progress) = event.progress {
            self.bar.set_position(u64::from(progress.min(100)));
        }
        if let Some(error) = event.error {
            self.bar.set_message(error.red().to_string());
        } else if let Some(status) = event.status {
            self.bar.set_message(status);
        }
    }
}

impl Renderer for InteractiveRenderer {
    fn start(&self) {
        for bar in self.bars.values() {
            bar.enable_steady_tick(Duration::from_millis(200));
        }
    }

    fn sink(&self, service_name: &str) -> Box<dyn ProgressSink> {
        let bar = match self.bars.get(service_name) {
            Some(bar) => bar.clone(),
            None => {
                let bar = self.multi.add(ProgressBar::new(100));
                bar.set_prefix(service_name.to_string());
                bar
            }
        };
        Box::new(BarSink { bar })
    }

    fn end(&self, summary: Option<&BTreeMap<String, String>>) {
        if let Ok(mut ended) = self.ended.lock() {
            if *ended {
                return;
            }
            *ended = true;
        }

        for (name, bar) in &self.bars {
            match summary.and_then(|s| s.get(name)) {
                Some(message) => {
                    bar.set_position(100);
                    bar.finish_with_message(format!("{} {}", "✓".green(), message));
                }
                None => bar.abandon(),
            }
        }
    }

    fn is_inline(&self) -> bool {
        false
    }
}

/// 単一処理用のスピナー
pub struct StatusSpinner {
    progress_bar: ProgressBar,
}

impl StatusSpinner {
    pub fn new(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));

        Self { progress_bar: pb }
    }

    pub fn set_message(&self, msg: &str) {
        self.progress_bar.set_message(msg.to_string());
    }

    pub fn finish_success(&self) {
        self.progress_bar.finish_and_clear();
    }

    pub fn finish_error(&self, error: &str) {
        self.progress_bar
            .abandon_with_message(format!("{} {}", "✗".red(), error));
    }
}
