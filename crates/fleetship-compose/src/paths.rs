//! POSIX 形式のパス操作
//!
//! tar エントリ名やコンポジション内のパスはホスト OS に関係なく `/` 区切りで扱う。

use std::path::Path;

/// `\` を `/` に変換
pub fn to_posix(path: &str) -> String {
    path.replace('\\', "/")
}

/// ホストのパスを `/` 区切りの文字列に変換
pub fn path_to_posix(path: &Path) -> String {
    to_posix(&path.to_string_lossy())
}

/// `.` と `..` を畳み込み、連続する `/` をまとめる
///
/// 相対パスの先頭の `..` は残す。末尾の `/` は保持する。
/// 空文字列は `.` になる。
pub fn normalize_posix(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }

    let absolute = path.starts_with('/');
    let trailing = path.len() > 1 && path.ends_with('/');

    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if absolute => {}
                _ => parts.push(".."),
            },
            s => parts.push(s),
        }
    }

    let mut out = parts.join("/");
    if absolute {
        out.insert(0, '/');
    }
    if out.is_empty() {
        out.push('.');
    }
    if trailing && !out.ends_with('/') {
        out.push('/');
    }
    out
}

/// `from` から `to` への相対パス（どちらも正規化済みの絶対パス）
pub fn relative_posix(from: &str, to: &str) -> String {
    let from: Vec<&str> = from.split('/').filter(|s| !s.is_empty()).collect();
    let to: Vec<&str> = to.split('/').filter(|s| !s.is_empty()).collect();

    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();

    let mut parts: Vec<&str> = std::iter::repeat_n("..", from.len() - common).collect();
    parts.extend(&to[common..]);
    parts.join("/")
}

/// `child` が `parent` 自身またはその配下にあるか（どちらも正規化済み）
pub fn contains_posix(parent: &str, child: &str) -> bool {
    let rel = relative_posix(parent, child);
    rel != ".." && !rel.starts_with("../")
}
