//! コンポジションのパース

use crate::error::{ComposeError, Result};
use crate::model::{BuildConfig, BuildSpec, Composition, ImageDescriptor, ImageSource, Services};
use serde_yaml::Value;

/// YAML 文字列をコンポジションとしてパース
///
/// `services` キーを持たない（version 1 形式の）ドキュメントは
/// トップレベル全体をサービス一覧として扱う。
pub fn parse_composition(contents: &str) -> Result<Composition> {
    let value: Value = serde_yaml::from_str(contents)?;

    let composition = match &value {
        Value::Mapping(map)
            if !map.contains_key("services") && !map.contains_key("version") =>
        {
            tracing::debug!("Treating composition as version 1 format");
            Composition {
                version: None,
                services: serde_yaml::from_value::<Services>(value)?,
                extra: Default::default(),
            }
        }
        _ => serde_yaml::from_value(value)?,
    };

    if composition.services.is_empty() {
        return Err(ComposeError::NoServices);
    }
    Ok(composition)
}

/// サービスごとのイメージ記述子を導出（コンポジションの記述順）
pub fn parse(composition: &Composition) -> Result<Vec<ImageDescriptor>> {
    composition
        .services
        .iter()
        .map(|(name, service)| {
            let image = match (&service.build, &service.image) {
                (Some(build), image) => ImageSource::Build(normalize_build(build, image.clone())),
                (None, Some(image)) => ImageSource::Image(image.clone()),
                (None, None) => {
                    return Err(ComposeError::InvalidService {
                        service: name.to_string(),
                        reason: "either \"image\" or \"build\" must be specified".to_string(),
                    });
                }
            };
            Ok(ImageDescriptor {
                service_name: name.to_string(),
                image,
            })
        })
        .collect()
}

fn normalize_build(build: &BuildSpec, tag: Option<String>) -> BuildConfig {
    match build {
        BuildSpec::Context(context) => BuildConfig {
            context: context.clone(),
            tag,
            ..Default::default()
        },
        BuildSpec::Config(cfg) => BuildConfig {
            context: cfg.context.clone().unwrap_or_else(|| ".".to_string()),
            dockerfile: cfg.dockerfile.clone(),
            args: cfg.args.0.clone(),
            tag,
        },
    }
}

/// 単一サービス `main` のデフォルトコンポジションを生成
///
/// イメージ指定があればそれを、なければカレントディレクトリのビルドを使う。
pub fn default_composition(image: Option<&str>, dockerfile: Option<&str>) -> String {
    let source = match image {
        Some(image) => format!("    image: {}\n", quote(image)),
        None => {
            let mut build = String::from("    build:\n      context: \".\"\n");
            if let Some(dockerfile) = dockerfile {
                build.push_str(&format!("      dockerfile: {}\n", quote(dockerfile)));
            }
            build
        }
    };

    format!(
        "version: '2.1'\n\
         networks: {{}}\n\
         volumes:\n  \
           fleetship-data: {{}}\n\
         services:\n  \
           main:\n\
         {source}    \
             privileged: true\n    \
             tty: true\n    \
             restart: always\n    \
             network_mode: host\n    \
             volumes:\n      \
               - fleetship-data:/data\n"
    )
}

// JSON 文字列は YAML のダブルクォート文字列としても有効
fn quote(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}
