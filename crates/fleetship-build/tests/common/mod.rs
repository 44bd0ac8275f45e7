use async_trait::async_trait;
use bytes::Bytes;
use fleetship_build::engine::{BuildOutput, ContainerEngine, EngineBuildOptions};
use fleetship_build::error::{BuildError, Result};
use fleetship_build::tarball::read_entries;
use fleetship_build::{InlineRenderer, PullProgress, Renderer};
use fleetship_config::RegistrySecrets;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    pub fn write(&self, rel: &str, content: &str) {
        let path = self.root.path().join(rel);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }
}

/// 受け取ったビルド
#[derive(Debug, Clone)]
pub struct ReceivedBuild {
    pub tag: String,
    pub dockerfile: String,
    pub entries: Vec<String>,
    pub buildargs: BTreeMap<String, String>,
}

/// Dockerfile の各行を `Step N/M : ...` として返すエンジン
#[derive(Default)]
pub struct FakeEngine {
    pub architecture: String,
    pub build_secrets: bool,
    /// このタグのビルドは失敗する
    pub failing_tags: BTreeSet<String>,
    /// このイメージの pull はストリームの途中でエラーになる
    pub broken_pulls: BTreeSet<String>,
    pub builds: Mutex<Vec<ReceivedBuild>>,
    pub pulls: Mutex<Vec<String>>,
}

impl FakeEngine {
    pub fn new(architecture: &str) -> Self {
        Self {
            architecture: architecture.to_string(),
            ..Default::default()
        }
    }

    #[allow(dead_code)]
    pub fn failing(mut self, tag: &str) -> Self {
        self.failing_tags.insert(tag.to_string());
        self
    }

    #[allow(dead_code)]
    pub fn broken_pull(mut self, image: &str) -> Self {
        self.broken_pulls.insert(image.to_string());
        self
    }

    pub fn builds(&self) -> Vec<ReceivedBuild> {
        self.builds.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn pulls(&self) -> Vec<String> {
        self.pulls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn architecture(&self) -> Result<String> {
        Ok(self.architecture.clone())
    }

    async fn supports_build_secrets(&self) -> Result<bool> {
        Ok(self.build_secrets)
    }

    async fn image_size(&self, image: &str) -> Result<u64> {
        Ok(1024 * 1024 + image.len() as u64)
    }

    async fn tag_image(&self, _source: &str, _repo: &str, _tag: &str) -> Result<()> {
        Ok(())
    }

    async fn remove_image(&self, _image: &str) -> Result<()> {
        Ok(())
    }

    async fn push_image(&self, _repo: &str, _tag: &str, _token: &str) -> Result<String> {
        Err(BuildError::PushFailed {
            message: "not supported".to_string(),
        })
    }

    fn build_image(
        &self,
        context: Bytes,
        opts: EngineBuildOptions,
    ) -> BoxStream<'_, Result<BuildOutput>> {
        let entries = read_entries(&context).unwrap();
        let dockerfile = entries
            .iter()
            .find(|e| e.path == opts.dockerfile)
            .map(|e| String::from_utf8(e.data.clone()).unwrap())
            .unwrap_or_default();
        self.builds.lock().unwrap().push(ReceivedBuild {
            tag: opts.tag.clone(),
            dockerfile: dockerfile.clone(),
            entries: entries.iter().map(|e| e.path.clone()).collect(),
            buildargs: opts.buildargs.clone(),
        });

        let steps: Vec<&str> = dockerfile
            .lines()
            .filter(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'))
            .collect();
        let mut outputs: Vec<Result<BuildOutput>> = steps
            .iter()
            .enumerate()
            .map(|(i, line)| {
                Ok(BuildOutput {
                    stream: Some(format!(
                        "\u{1b}[1mStep {}/{} : {}\u{1b}[0m\n ---> Running in 0a1b2c\n",
                        i + 1,
                        steps.len(),
                        line
                    )),
                    error: None,
                })
            })
            .collect();

        if self.failing_tags.contains(&opts.tag) {
            outputs.push(Ok(BuildOutput {
                stream: None,
                error: Some("The command '/bin/sh -c false' returned a non-zero code: 1".to_string()),
            }));
        } else {
            outputs.push(Ok(BuildOutput {
                stream: Some(format!("Successfully built 0123abcd\nSuccessfully tagged {}", opts.tag)),
                error: None,
            }));
        }
        stream::iter(outputs).boxed()
    }

    fn pull_image(
        &self,
        image: &str,
        _secrets: &RegistrySecrets,
    ) -> BoxStream<'_, Result<PullProgress>> {
        self.pulls.lock().unwrap().push(image.to_string());
        let first = Ok(PullProgress {
            id: Some("7".to_string()),
            status: Some(format!("Pulling from library/{}", image)),
            ..Default::default()
        });
        if self.broken_pulls.contains(image) {
            let events = vec![
                first,
                Err(BuildError::BuildFailed(format!(
                    "connection reset while pulling {}",
                    image
                ))),
            ];
            return stream::iter(events).boxed();
        }
        let events = vec![
            first,
            Ok(PullProgress {
                id: Some("a1b2".to_string()),
                status: Some("Downloading".to_string()),
                percentage: Some(50),
                ..Default::default()
            }),
            Ok(PullProgress {
                status: Some(format!("Status: Downloaded newer image for {}", image)),
                ..Default::default()
            }),
        ];
        stream::iter(events).boxed()
    }
}

/// 書き込みを記録する Writer
#[derive(Clone, Default)]
pub struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Captured {
    pub fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

pub fn inline_renderer(services: &[&str]) -> (Box<dyn Renderer>, Captured) {
    colored::control::set_override(false);
    let captured = Captured::default();
    let names: Vec<String> = services.iter().map(|s| s.to_string()).collect();
    let renderer = InlineRenderer::new(Box::new(captured.clone()), &names);
    (Box::new(renderer), captured)
}

#[allow(dead_code)]
pub fn mode_of(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).unwrap().permissions().mode() & 0o777
}
