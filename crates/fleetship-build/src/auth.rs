//! レジストリ認証処理
//!
//! レジストリシークレットからイメージに対応する認証情報を選び、
//! Bollard の DockerCredentials に変換します。

use bollard::auth::DockerCredentials;
use fleetship_config::{DOCKER_HUB_CANONICAL, RegistryCredentials, RegistrySecrets};
use std::collections::HashMap;

const DOCKER_HUB: &str = "docker.io";

/// イメージ名からレジストリを抽出
///
/// # Examples
/// - `ghcr.io/org/app:tag` -> `ghcr.io`
/// - `myuser/app:tag` -> `docker.io`
/// - `localhost:5000/app` -> `localhost:5000`
pub fn extract_registry(image: &str) -> String {
    let parts: Vec<&str> = image.split('/').collect();

    if parts.len() >= 2 {
        let first = parts[0];
        // `.` か `:` を含む先頭要素はレジストリ（ghcr.io, localhost:5000）
        if first.contains('.') || first.contains(':') {
            return first.to_string();
        }
    }

    DOCKER_HUB.to_string()
}

/// イメージ名とタグを分離
///
/// # Examples
/// - `ghcr.io/org/app:v1.0` -> `("ghcr.io/org/app", "v1.0")`
/// - `ghcr.io/org/app` -> `("ghcr.io/org/app", "latest")`
/// - `localhost:5000/app:dev` -> `("localhost:5000/app", "dev")`
pub fn split_image_tag(image: &str) -> (String, String) {
    if let Some(pos) = image.rfind(':') {
        let potential_tag = &image[pos + 1..];
        let potential_image = &image[..pos];

        // ポート番号は / を含むか純粋な数字
        if !potential_tag.contains('/') && !potential_tag.chars().all(|c| c.is_ascii_digit()) {
            return (potential_image.to_string(), potential_tag.to_string());
        }
    }

    (image.to_string(), "latest".to_string())
}

fn to_docker_credentials(server: &str, creds: &RegistryCredentials) -> DockerCredentials {
    DockerCredentials {
        username: Some(creds.username.clone()),
        password: Some(creds.password.clone()),
        serveraddress: Some(server.to_string()),
        ..Default::default()
    }
}

/// イメージの pull に使う認証情報
pub fn credentials_for_image(image: &str, secrets: &RegistrySecrets) -> Option<DockerCredentials> {
    let registry = extract_registry(image);
    if let Some(creds) = secrets.get(&registry) {
        return Some(to_docker_credentials(&registry, creds));
    }
    if registry == DOCKER_HUB
        && let Some(creds) = secrets.get(DOCKER_HUB_CANONICAL)
    {
        return Some(to_docker_credentials(DOCKER_HUB_CANONICAL, creds));
    }

    tracing::debug!("No credentials found for {}", registry);
    None
}

/// ビルド時の `X-Registry-Config` に渡す認証情報一式
pub fn build_credentials(secrets: &RegistrySecrets) -> HashMap<String, DockerCredentials> {
    secrets
        .iter()
        .map(|(server, creds)| (server.clone(), to_docker_credentials(server, creds)))
        .collect()
}
