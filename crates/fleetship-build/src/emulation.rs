//! 異アーキテクチャ向けビルドのエミュレーション
//!
//! ターゲットとホストのアーキテクチャが異なる場合、qemu の static バイナリを
//! ビルドコンテキストに置き、Dockerfile の `RUN` をそれ経由で実行するよう
//! 書き換えます。

use crate::engine::ContainerEngine;
use crate::error::{BuildError, Result};
use crate::tarball::{read_entries, write_entries};
use bytes::Bytes;
use fleetship_compose::{ImageDescriptor, ImageSource, paths};
use futures_util::future::try_join_all;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// コンテキスト内に置くバイナリの名前
pub const QEMU_BIN_NAME: &str = "qemu-execve";
/// コンテキスト内のバイナリの置き場所（コンテキスト相対）
pub const QEMU_HOST_PATH: &str = ".fleetship/qemu-execve";
/// コンテナ内でのバイナリのパス
pub const QEMU_CONTAINER_PATH: &str = "/tmp/qemu-execve";
pub const QEMU_FILE_MODE: u32 = 0o555;

/// ターゲットアーキテクチャに対応する qemu のアーキテクチャ名
pub fn qemu_arch(arch: &str) -> Option<&'static str> {
    match arch {
        "armv7hf" | "armhf" | "rpi" | "armv6" | "armv6hf" | "armel" => Some("arm"),
        "aarch64" | "arm64" => Some("aarch64"),
        _ => None,
    }
}

/// エンジンやデバイスのアーキテクチャ名を系統名にそろえる
pub fn arch_family(arch: &str) -> &str {
    match arch {
        "x86_64" | "amd64" => "amd64",
        "i386" | "i686" | "386" => "i386",
        "aarch64" | "arm64" | "armv8" => "aarch64",
        "arm" | "armv7l" | "armv7hf" | "armhf" | "armv6l" | "armv6" | "armv6hf" | "armel"
        | "rpi" => "arm",
        other => other,
    }
}

/// エミュレーションが必要か
pub fn needs_emulation(
    emulated: bool,
    target_arch: &str,
    host_arch: &str,
    has_build_services: bool,
) -> bool {
    emulated
        && qemu_arch(target_arch).is_some()
        && arch_family(host_arch) != arch_family(target_arch)
        && has_build_services
}

/// バイナリをコピーするビルドコンテキスト（重複なし、記述順）
pub fn emulation_contexts(descriptors: &[ImageDescriptor]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    descriptors
        .iter()
        .filter_map(|d| match &d.image {
            ImageSource::Build(build) => Some(paths::normalize_posix(&paths::to_posix(
                if build.context.is_empty() {
                    "."
                } else {
                    build.context.as_str()
                },
            ))),
            ImageSource::Image(_) => None,
        })
        .map(|ctx| ctx.trim_end_matches('/').to_string())
        .map(|ctx| if ctx.is_empty() { ".".to_string() } else { ctx })
        .filter(|ctx| seen.insert(ctx.clone()))
        .collect()
}

/// `qemu-<arch>-static` のパス
pub fn qemu_binary_path(bin_dir: &Path, qemu_arch: &str) -> PathBuf {
    bin_dir.join(format!("qemu-{}-static", qemu_arch))
}

/// 必要ならエミュレーションを準備する
///
/// 必要な場合は qemu バイナリを各ビルドコンテキストへコピーし、
/// ビルドストリームの書き換えに使うオプションを返す。
#[tracing::instrument(skip(engine, descriptors, project_path, bin_dir))]
pub async fn install_emulation_if_needed(
    engine: &dyn ContainerEngine,
    emulated: bool,
    arch: &str,
    descriptors: &[ImageDescriptor],
    project_path: &Path,
    bin_dir: &Path,
) -> Result<Option<TransposeOptions>> {
    let host_arch = engine.architecture().await?;
    tracing::debug!(host_arch = %host_arch, target_arch = %arch, "Checking emulation requirement");

    let has_build_services = descriptors.iter().any(|d| !d.is_external());
    if !needs_emulation(emulated, arch, &host_arch, has_build_services) {
        return Ok(None);
    }
    let Some(qemu_arch) = qemu_arch(arch) else {
        return Ok(None);
    };

    let binary = qemu_binary_path(bin_dir, qemu_arch);
    let usable = tokio::fs::metadata(&binary)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false);
    if !usable {
        return Err(BuildError::EmulationBinaryMissing {
            arch: qemu_arch.to_string(),
            path: binary,
        });
    }

    tracing::info!("Emulation is enabled");
    let contexts = emulation_contexts(descriptors);
    try_join_all(
        contexts
            .iter()
            .map(|ctx| copy_qemu(&binary, project_path.join(ctx))),
    )
    .await?;

    Ok(Some(TransposeOptions::default()))
}

async fn copy_qemu(binary: &Path, context: PathBuf) -> Result<()> {
    let dest = context.join(QEMU_HOST_PATH);
    if let Some(dir) = dest.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    // 読み取り専用の既存ファイルには上書きできない
    let _ = tokio::fs::remove_file(&dest).await;
    tokio::fs::copy(binary, &dest).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&dest, std::fs::Permissions::from_mode(QEMU_FILE_MODE))
            .await?;
    }

    tracing::debug!("Copied {} into {}", QEMU_BIN_NAME, context.display());
    Ok(())
}

/// Dockerfile 書き換えのオプション
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransposeOptions {
    /// コンテキスト相対、`/` 区切り
    pub host_qemu_path: String,
    pub container_qemu_path: String,
    pub qemu_file_mode: u32,
}

impl Default for TransposeOptions {
    fn default() -> Self {
        Self {
            host_qemu_path: QEMU_HOST_PATH.to_string(),
            container_qemu_path: QEMU_CONTAINER_PATH.to_string(),
            qemu_file_mode: QEMU_FILE_MODE,
        }
    }
}

impl TransposeOptions {
    fn copy_instruction(&self) -> String {
        format!(
            "COPY {}",
            json_array(&[self.host_qemu_path.as_str(), self.container_qemu_path.as_str()])
        )
    }

    fn exec_prefix(&self) -> [&str; 2] {
        [self.container_qemu_path.as_str(), "-execve"]
    }

    /// Dockerfile を書き換える
    ///
    /// すべての `FROM` の後に qemu バイナリの `COPY` を挿入し、
    /// すべての `RUN` を qemu 経由の exec 形式に変える。
    pub fn transpose_dockerfile(&self, content: &str) -> String {
        let mut out = String::with_capacity(content.len() + 256);
        for logical in logical_lines(content) {
            let (keyword, rest) = split_instruction(&logical.joined);
            match keyword.to_ascii_uppercase().as_str() {
                "FROM" => {
                    out.push_str(&logical.raw);
                    out.push_str(&self.copy_instruction());
                    out.push('\n');
                }
                "RUN" => {
                    out.push_str(&format!("RUN {}\n", self.transpose_run(rest)));
                }
                _ => out.push_str(&logical.raw),
            }
        }
        out
    }

    fn transpose_run(&self, rest: &str) -> String {
        let (flags, command) = split_run_flags(rest);
        let mut args: Vec<String> = self.exec_prefix().iter().map(|s| s.to_string()).collect();

        match parse_exec_form(command) {
            Some(exec) => args.extend(exec),
            None => {
                args.extend(["/bin/sh".to_string(), "-c".to_string()]);
                args.push(command.trim().to_string());
            }
        }

        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        if flags.is_empty() {
            json_array(&refs)
        } else {
            format!("{} {}", flags, json_array(&refs))
        }
    }

    /// ビルド出力に現れる書き換え後の `RUN` を元に戻す
    pub fn untranspose_line(&self, line: &str) -> String {
        let Some(run_pos) = line.find("RUN ") else {
            return line.to_string();
        };
        let after_run = &line[run_pos + 4..];
        let Some(bracket) = after_run.find('[') else {
            return line.to_string();
        };
        let flags = after_run[..bracket].trim();
        if !flags.is_empty() && !flags.split_whitespace().all(|f| f.starts_with("--")) {
            return line.to_string();
        }
        let Ok(args) = serde_json::from_str::<Vec<String>>(after_run[bracket..].trim_end()) else {
            return line.to_string();
        };
        if args.len() < 2 || args[0] != self.container_qemu_path || args[1] != "-execve" {
            return line.to_string();
        }

        let original = match &args[2..] {
            [sh, c, cmd] if sh == "/bin/sh" && c == "-c" => cmd.clone(),
            rest => {
                let refs: Vec<&str> = rest.iter().map(String::as_str).collect();
                json_array(&refs)
            }
        };
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!("{} ", flags)
        };
        format!("{}RUN {}{}", &line[..run_pos], flags, original)
    }
}

fn json_array(items: &[&str]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

fn parse_exec_form(command: &str) -> Option<Vec<String>> {
    let trimmed = command.trim();
    if !trimmed.starts_with('[') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

/// `--mount=...` などの BuildKit フラグとコマンド本体に分ける
fn split_run_flags(rest: &str) -> (String, &str) {
    let mut flags = Vec::new();
    let mut remaining = rest.trim_start();
    while remaining.starts_with("--") {
        let end = remaining.find(char::is_whitespace).unwrap_or(remaining.len());
        flags.push(&remaining[..end]);
        remaining = remaining[end..].trim_start();
    }
    (flags.join(" "), remaining)
}

fn split_instruction(line: &str) -> (&str, &str) {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return ("", trimmed);
    }
    match trimmed.find(char::is_whitespace) {
        Some(pos) => (&trimmed[..pos], trimmed[pos..].trim_start()),
        None => (trimmed, ""),
    }
}

struct LogicalLine {
    /// 元のテキスト（改行込み）
    raw: String,
    /// 行継続を連結したもの
    joined: String,
}

fn logical_lines(content: &str) -> Vec<LogicalLine> {
    let mut lines = Vec::new();
    let mut raw = String::new();
    let mut joined = String::new();

    for physical in content.split_inclusive('\n') {
        raw.push_str(physical);
        let text = physical.trim_end_matches(['\n', '\r']);
        let is_comment = text.trim_start().starts_with('#');

        if !joined.is_empty() && is_comment {
            // 継続行の途中のコメントは無視される
            continue;
        }
        match text.trim_end().strip_suffix('\\') {
            Some(head) if !is_comment => {
                joined.push_str(head);
            }
            _ => {
                joined.push_str(text);
                if !raw.ends_with('\n') {
                    raw.push('\n');
                }
                lines.push(LogicalLine {
                    raw: std::mem::take(&mut raw),
                    joined: std::mem::take(&mut joined),
                });
            }
        }
    }
    if !raw.is_empty() {
        raw.push('\n');
        lines.push(LogicalLine { raw, joined });
    }
    lines
}

/// タスクのビルドストリーム内の Dockerfile を書き換え、qemu バイナリの
/// モードを設定する
pub fn transpose_tar_stream(
    stream: &Bytes,
    opts: &TransposeOptions,
    dockerfile_path: &str,
) -> Result<Bytes> {
    let dockerfile_path = paths::normalize_posix(dockerfile_path);
    let mut entries = read_entries(stream)?;
    let mut found = false;

    for entry in &mut entries {
        let name = paths::normalize_posix(&entry.path);
        if name == dockerfile_path {
            let content = String::from_utf8_lossy(&entry.data).into_owned();
            entry.data = opts.transpose_dockerfile(&content).into_bytes();
            found = true;
        } else if name == opts.host_qemu_path {
            entry.header.set_mode(opts.qemu_file_mode);
        }
    }

    if !found {
        return Err(BuildError::DockerfileNotFound(dockerfile_path));
    }
    write_entries(entries)
}
