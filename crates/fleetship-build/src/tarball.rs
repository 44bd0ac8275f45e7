//! ビルドコンテキストの tar アーカイブ
//!
//! プロジェクトディレクトリを `.dockerignore` でフィルタしながら tar に固め、
//! サービスごとのコンテキストへの分割や再パックを行います。

use crate::error::{BuildError, Result};
use crate::options::IgnoreMode;
use bytes::Bytes;
use fleetship_compose::paths;
use ignore::WalkBuilder;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

const DOCKERIGNORE: &str = ".dockerignore";
const GITIGNORE: &str = ".gitignore";
/// `.dockerignore` に関係なく常に含めるディレクトリ
const ALWAYS_INCLUDED_DIR: &str = ".fleetship";
const BINARY_SNIFF_LEN: usize = 8000;

/// tar の1エントリ
#[derive(Debug, Clone)]
pub struct TarEntry {
    /// `/` 区切りの相対パス
    pub path: String,
    pub header: tar::Header,
    pub data: Vec<u8>,
}

impl TarEntry {
    /// 通常ファイルのエントリ（mode 0o644）
    pub fn file(path: impl Into<String>, data: Vec<u8>) -> Self {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(data.len() as u64);
        Self {
            path: path.into(),
            header,
            data,
        }
    }
}

/// tar を全エントリ読み込む
pub fn read_entries(stream: &[u8]) -> Result<Vec<TarEntry>> {
    let mut archive = tar::Archive::new(Cursor::new(stream));
    let mut entries = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = paths::path_to_posix(&entry.path()?);
        let header = entry.header().clone();
        let mut data = Vec::with_capacity(header.size().unwrap_or(0) as usize);
        entry.read_to_end(&mut data)?;
        entries.push(TarEntry { path, header, data });
    }
    Ok(entries)
}

/// エントリから tar を組み立てる
pub fn write_entries(entries: Vec<TarEntry>) -> Result<Bytes> {
    let mut builder = tar::Builder::new(Vec::new());
    for mut entry in entries {
        entry.header.set_size(entry.data.len() as u64);
        builder.append_data(&mut entry.header, &entry.path, entry.data.as_slice())?;
    }
    Ok(Bytes::from(builder.into_inner()?))
}

/// tar を読み直して新しいストリームとして組み立て直す
pub fn clone_tar_stream(stream: &Bytes) -> Result<Bytes> {
    write_entries(read_entries(stream)?)
}

/// tar から `context` 配下のエントリだけを取り出し、パスをコンテキスト相対にする
pub fn extract_context(stream: &Bytes, context: &str) -> Result<Option<Bytes>> {
    let context = paths::normalize_posix(&paths::to_posix(context));
    let context = context.trim_end_matches('/');
    let prefix = if context == "." || context.is_empty() {
        String::new()
    } else {
        format!("{}/", context)
    };

    let entries: Vec<TarEntry> = read_entries(stream)?
        .into_iter()
        .filter_map(|mut entry| {
            let name = paths::normalize_posix(&entry.path);
            let relative = name.strip_prefix(&prefix)?.trim_end_matches('/').to_string();
            if relative.is_empty() || relative == "." {
                return None;
            }
            entry.path = relative;
            Some(entry)
        })
        .collect();

    if entries.is_empty() {
        return Ok(None);
    }
    write_entries(entries).map(Some)
}

/// `tar_directory` のオプション
#[derive(Debug, Clone, Default)]
pub struct TarDirectoryOptions {
    pub ignore_mode: IgnoreMode,
    pub convert_eol: bool,
    /// サービス名 -> プロジェクト相対のサービスディレクトリ
    pub service_dirs: BTreeMap<String, String>,
}

struct IgnoreFile {
    /// プロジェクト相対の `/` 区切りパス
    rel_path: String,
    path: PathBuf,
}

/// プロジェクトディレクトリを tar に固める
#[tracing::instrument(skip(opts), fields(dir = %dir.display()))]
pub fn tar_directory(dir: &Path, opts: &TarDirectoryOptions) -> Result<Bytes> {
    let root = std::path::absolute(dir)?;
    let legacy = opts.ignore_mode == IgnoreMode::Legacy;

    let mut walk = WalkBuilder::new(&root);
    walk.standard_filters(false)
        .hidden(false)
        .git_ignore(legacy)
        .require_git(false)
        .parents(false)
        .sort_by_file_name(|a, b| a.cmp(b));

    let mut files = Vec::new();
    let mut dockerignore_files = Vec::new();
    let mut gitignore_files = Vec::new();
    for result in walk.build() {
        let entry = result.map_err(|e| BuildError::InvalidConfig(e.to_string()))?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.into_path();
        let rel_path = relative_posix(&root, &path);
        match path.file_name().and_then(|n| n.to_str()) {
            Some(DOCKERIGNORE) => dockerignore_files.push(IgnoreFile {
                rel_path: rel_path.clone(),
                path: path.clone(),
            }),
            Some(GITIGNORE) if legacy => gitignore_files.push(IgnoreFile {
                rel_path: rel_path.clone(),
                path: path.clone(),
            }),
            _ => {}
        }
        files.push((rel_path, path));
    }

    let filter = IgnoreFilter::new(&root, opts, &dockerignore_files)?;
    if legacy {
        print_gitignore_warn(filter.root_dockerignore(), &gitignore_files);
    } else {
        print_dockerignore_warn(&dockerignore_files, &opts.service_dirs, opts.ignore_mode);
    }

    let mut builder = tar::Builder::new(Vec::new());
    let mut count = 0usize;
    for (rel_path, path) in files {
        if filter.is_ignored(&rel_path, &path) {
            continue;
        }
        let metadata = std::fs::metadata(&path)?;
        let mut data = std::fs::read(&path)?;
        if opts.convert_eol {
            data = convert_eol(data);
        }

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(file_mode(&metadata));
        header.set_size(data.len() as u64);
        header.set_mtime(mtime(&metadata));
        builder.append_data(&mut header, &rel_path, data.as_slice())?;
        count += 1;
    }

    let archive = builder.into_inner()?;
    tracing::debug!("Packed {} files ({} bytes)", count, archive.len());
    Ok(Bytes::from(archive))
}

fn relative_posix(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    paths::path_to_posix(rel)
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &std::fs::Metadata) -> u32 {
    0o644
}

fn mtime(metadata: &std::fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// CRLF を LF に変換する（バイナリファイルは変換しない）
pub fn convert_eol(data: Vec<u8>) -> Vec<u8> {
    let sniff = &data[..data.len().min(BINARY_SNIFF_LEN)];
    if sniff.contains(&0) || !data.windows(2).any(|w| w == b"\r\n") {
        return data;
    }
    let mut out = Vec::with_capacity(data.len());
    let mut iter = data.iter().peekable();
    while let Some(&b) = iter.next() {
        if b == b'\r' && iter.peek() == Some(&&b'\n') {
            continue;
        }
        out.push(b);
    }
    out
}

/// モードに応じた `.dockerignore` の照合
struct IgnoreFilter {
    root: Option<Gitignore>,
    root_file: Option<String>,
    /// サービスディレクトリ（深い順）とその `.dockerignore`
    services: Vec<(String, Gitignore)>,
}

impl IgnoreFilter {
    fn new(root: &Path, opts: &TarDirectoryOptions, files: &[IgnoreFile]) -> Result<Self> {
        let root_file = files.iter().find(|f| f.rel_path == DOCKERIGNORE);
        let root_matcher = root_file
            .map(|f| build_matcher(root, &f.path))
            .transpose()?;

        let mut services = Vec::new();
        if opts.ignore_mode == IgnoreMode::Multi {
            for dir in opts.service_dirs.values() {
                if dir == "." || services.iter().any(|(d, _)| d == dir) {
                    continue;
                }
                let rel = format!("{}/{}", dir, DOCKERIGNORE);
                if let Some(file) = files.iter().find(|f| f.rel_path == rel) {
                    services.push((dir.clone(), build_matcher(&root.join(dir), &file.path)?));
                }
            }
            services.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()));
        }

        Ok(Self {
            root: root_matcher,
            root_file: root_file.map(|f| f.rel_path.clone()),
            services,
        })
    }

    fn root_dockerignore(&self) -> Option<&str> {
        self.root_file.as_deref()
    }

    fn is_ignored(&self, rel_path: &str, path: &Path) -> bool {
        if rel_path == ALWAYS_INCLUDED_DIR
            || rel_path.starts_with(&format!("{}/", ALWAYS_INCLUDED_DIR))
        {
            return false;
        }

        let service = self.services.iter().find(|(dir, _)| {
            rel_path.starts_with(&format!("{}/", dir))
        });
        let matcher = match service {
            Some((_, matcher)) => Some(matcher),
            None => self.root.as_ref(),
        };
        matcher.is_some_and(|m| m.matched_path_or_any_parents(path, false).is_ignore())
    }
}

fn build_matcher(root: &Path, file: &Path) -> Result<Gitignore> {
    let mut builder = GitignoreBuilder::new(root);
    if let Some(err) = builder.add(file) {
        tracing::warn!("Error reading {}: {}", file.display(), err);
    }
    builder
        .build()
        .map_err(|e| BuildError::InvalidConfig(format!("{}: {}", file.display(), e)))
}

fn print_dockerignore_warn(
    files: &[IgnoreFile],
    service_dirs: &BTreeMap<String, String>,
    mode: IgnoreMode,
) {
    let multi = mode == IgnoreMode::Multi;
    let unused: Vec<&IgnoreFile> = files
        .iter()
        .filter(|f| {
            let dir = f
                .rel_path
                .strip_suffix(DOCKERIGNORE)
                .unwrap_or("")
                .trim_end_matches('/');
            if dir.is_empty() || dir == "." {
                return false;
            }
            !(multi && service_dirs.values().any(|d| d == dir))
        })
        .collect();

    if unused.is_empty() {
        return;
    }

    let mut msg = vec!["The following .dockerignore file(s) will not be used:".to_string()];
    msg.extend(unused.iter().map(|f| format!("* {}", f.path.display())));
    if multi {
        msg.push(
            "In multi mode, only .dockerignore files at the root of each service's build \
             context, plus a .dockerignore file at the overall project root, are used."
                .to_string(),
        );
    } else {
        msg.push(
            "By default, only one .dockerignore file at the source folder (project root) is \
             used. Multi-service projects may use a separate .dockerignore file for each \
             service with the multi ignore mode."
                .to_string(),
        );
    }
    tracing::warn!("\n{}", msg.join("\n"));
}

fn print_gitignore_warn(dockerignore: Option<&str>, gitignore_files: &[IgnoreFile]) {
    if gitignore_files.is_empty() {
        return;
    }
    let mut msg = vec!["Using file ignore patterns from:".to_string()];
    msg.extend(dockerignore.map(str::to_string));
    msg.extend(gitignore_files.iter().map(|f| f.rel_path.clone()));
    msg.push(
        ".gitignore files are being considered because the legacy ignore mode was used. \
         This mode is deprecated and will be removed in a future release."
            .to_string(),
    );
    tracing::warn!("\n{}", msg.join("\n"));
}
