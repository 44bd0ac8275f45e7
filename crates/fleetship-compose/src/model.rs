//! コンポジションのデータモデル
//!
//! サービスの並び順は YAML ドキュメントの記述順を保持します。

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fmt;

/// マルチサービスのコンポジション
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Composition {
    /// `"2.1"` と `2` のどちらも受け付けるため Value のまま保持
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Value>,

    #[serde(default)]
    pub services: Services,

    /// networks, volumes など、ビルドには関与しないトップレベル要素
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Composition {
    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.get(name)
    }
}

/// 記述順を保持するサービス一覧
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Services(Vec<(String, Service)>);

impl Services {
    pub fn new(entries: Vec<(String, Service)>) -> Self {
        Self(entries)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Service)> {
        self.0.iter().map(|(name, svc)| (name.as_str(), svc))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(name, _)| name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&Service> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, svc)| svc)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Services {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, service) in &self.0 {
            map.serialize_entry(name, service)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Services {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ServicesVisitor;

        impl<'de> Visitor<'de> for ServicesVisitor {
            type Value = Services;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping of service names to service definitions")
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Services, E> {
                Ok(Services::default())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Services, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, service)) = access.next_entry::<String, Option<Service>>()? {
                    if entries.iter().any(|(n, _): &(String, Service)| *n == name) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate service \"{}\"",
                            name
                        )));
                    }
                    entries.push((name, service.unwrap_or_default()));
                }
                Ok(Services(entries))
            }
        }

        deserializer.deserialize_any(ServicesVisitor)
    }
}

/// サービス定義
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSpec>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Service {
    /// ビルドコンテキスト（未指定なら None）
    pub fn build_context(&self) -> Option<&str> {
        match &self.build {
            Some(BuildSpec::Context(ctx)) => Some(ctx.as_str()),
            Some(BuildSpec::Config(cfg)) => cfg.context.as_deref(),
            None => None,
        }
    }
}

/// `build: ./dir` または `build: { context, dockerfile, args }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BuildSpec {
    Context(String),
    Config(BuildSpecConfig),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildSpecConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,

    #[serde(default, skip_serializing_if = "BuildArgs::is_empty")]
    pub args: BuildArgs,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// ビルド引数。マッピングと `KEY=VALUE` のリストの両方を受け付ける
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct BuildArgs(pub BTreeMap<String, String>);

impl BuildArgs {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for BuildArgs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawArgs {
            Map(BTreeMap<String, Value>),
            List(Vec<String>),
        }

        let args = match RawArgs::deserialize(deserializer)? {
            RawArgs::Map(map) => map
                .into_iter()
                .map(|(k, v)| (k, scalar_to_string(v)))
                .collect(),
            RawArgs::List(list) => list
                .into_iter()
                .map(|item| match item.split_once('=') {
                    Some((k, v)) => (k.to_string(), v.to_string()),
                    None => (item, String::new()),
                })
                .collect(),
        };
        Ok(BuildArgs(args))
    }
}

fn scalar_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// サービスごとのイメージの出どころ
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDescriptor {
    pub service_name: String,
    pub image: ImageSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    /// 外部イメージ（pull するだけ）
    Image(String),
    /// ソースからビルド
    Build(BuildConfig),
}

impl ImageDescriptor {
    pub fn is_external(&self) -> bool {
        matches!(self.image, ImageSource::Image(_))
    }
}

/// 正規化済みのビルド設定
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildConfig {
    pub context: String,
    pub dockerfile: Option<String>,
    pub args: BTreeMap<String, String>,
    pub tag: Option<String>,
}
