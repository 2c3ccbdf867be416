use crate::adapters::http::{is_remote, HttpFetcher};
use crate::core::deployment::Deployment;
use crate::core::parser::load_checkmatefile;
use crate::core::resolver;
use crate::core::topology::Topology;
use crate::core::{ConfigProvider, Storage};
use crate::domain::model::{DockerArtifacts, PlannedResource};
use crate::domain::ports::CommandRunner;
use crate::providers::base::DEFAULT_DOMAIN;
use crate::providers::docker::DockerLauncher;
use crate::utils::error::{ChessboardError, Result};
use serde_json::{json, Value};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;
use zip::write::{FileOptions, ZipWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum PlanFormat {
    #[default]
    Yaml,
    Json,
    Csv,
}

impl FromStr for PlanFormat {
    type Err = ChessboardError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(ChessboardError::InvalidParameter(format!(
                "Unsupported plan format: {}",
                other
            ))),
        }
    }
}

/// Loads Checkmatefiles and runs them through validation, planning and the
/// docker provider.
pub struct Engine<S: Storage, C: ConfigProvider> {
    storage: S,
    config: C,
    fetcher: HttpFetcher,
}

impl<S: Storage, C: ConfigProvider> Engine<S, C> {
    pub fn new(storage: S, config: C) -> Self {
        Self {
            storage,
            config,
            fetcher: HttpFetcher::new(),
        }
    }

    pub fn config(&self) -> &C {
        &self.config
    }

    /// Raw Checkmatefile text from a path or an http(s) URL.
    pub async fn read(&self, location: &str) -> Result<String> {
        if is_remote(location) {
            return self.fetcher.fetch(location).await;
        }
        let data = self.storage.read_file(location).await?;
        String::from_utf8(data).map_err(|e| {
            ChessboardError::InvalidParameter(format!("'{}' is not UTF-8 text: {}", location, e))
        })
    }

    /// Parses and validates a Checkmatefile.
    pub async fn validate(&self, location: &str) -> Result<Value> {
        tracing::info!("Validating {}", location);
        let contents = load_checkmatefile(&self.read(location).await?)?;
        tracing::info!("✅ {} is valid", location);
        Ok(contents)
    }

    pub async fn topology(&self, location: &str) -> Result<Topology> {
        Topology::from_deployment(&self.validate(location).await?)
    }

    /// Plans a deploy of the Checkmatefile at `location`.
    pub async fn plan(&self, location: &str) -> Result<Deployment> {
        let start = Instant::now();
        let mut contents = self.validate(location).await?;
        self.apply_domain(&mut contents);

        let deployment = Deployment::from_checkmate_file(&contents);
        let parse_only = self.config.parse_only();
        tracing::info!(
            "Planning deployment '{}' (parse_only={})",
            deployment.id(),
            parse_only
        );
        let deployment = resolver::resolve(deployment, "deploy", parse_only)?;
        let count = deployment
            .resources()
            .as_object()
            .map(|resources| resources.len())
            .unwrap_or(0);
        tracing::info!(
            "Planned {} resource(s) in {:.2?}",
            count,
            start.elapsed()
        );
        Ok(deployment)
    }

    /// A configured domain other than the default becomes the `domain`
    /// input unless the Checkmatefile supplies one.
    fn apply_domain(&self, contents: &mut Value) {
        let domain = self.config.domain();
        if domain == DEFAULT_DOMAIN || !contents.is_object() {
            return;
        }
        let inputs = contents
            .as_object_mut()
            .map(|map| map.entry("inputs").or_insert_with(|| json!({})));
        if let Some(Value::Object(inputs)) = inputs {
            inputs
                .entry("domain")
                .or_insert_with(|| Value::String(domain.to_string()));
        }
    }

    /// Plans and writes the result to `output` through storage.
    pub async fn write_plan(&self, location: &str, format: PlanFormat, output: &str) -> Result<String> {
        let deployment = self.plan(location).await?;
        let rendered = render_plan(&deployment, format)?;
        self.storage.write_file(output, rendered.as_bytes()).await?;
        tracing::info!("📁 Plan saved to: {}", output);
        Ok(output.to_string())
    }

    /// Renders the docker artifacts of a local Checkmatefile into the
    /// configured workdir, zips them when `bundle` is set and launches them
    /// when `launch` is set.
    pub async fn docker<R: CommandRunner>(
        &self,
        location: &str,
        runner: R,
        bundle: Option<&Path>,
        launch: bool,
    ) -> Result<DockerArtifacts> {
        if is_remote(location) {
            return Err(ChessboardError::InvalidParameter(
                "Docker builds need a local Checkmatefile next to the application sources".into(),
            ));
        }
        let checkmatefile = self.read(location).await?;
        let working_dir = Path::new(location)
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let workdir = self.config.workdir();
        std::fs::create_dir_all(workdir)?;

        let launcher = DockerLauncher::new(working_dir, self.config.components_dir(), runner)
            .with_base_image(self.config.base_image());
        let mut artifacts = if launch {
            launcher.launch(&checkmatefile, workdir).await?
        } else {
            launcher.render(&checkmatefile, workdir)?
        };
        if let Some(bundle) = bundle {
            bundle_artifacts(&artifacts, bundle)?;
            artifacts.bundle = Some(bundle.to_path_buf());
            tracing::info!("📦 Bundle saved to: {}", bundle.display());
        }
        Ok(artifacts)
    }
}

/// Serializes the planned deployment. CSV lists one row per resource.
pub fn render_plan(deployment: &Deployment, format: PlanFormat) -> Result<String> {
    match format {
        PlanFormat::Yaml => Ok(serde_yaml::to_string(deployment.data())?),
        PlanFormat::Json => Ok(serde_json::to_string_pretty(deployment.data())?),
        PlanFormat::Csv => {
            let mut writer = csv::Writer::from_writer(Vec::new());
            if let Some(resources) = deployment.resources().as_object() {
                for (index, resource) in resources {
                    writer.serialize(PlannedResource::from_resource(index, resource))?;
                }
            }
            let data = writer
                .into_inner()
                .map_err(|e| ChessboardError::general(format!("CSV flush failed: {}", e)))?;
            String::from_utf8(data)
                .map_err(|e| ChessboardError::general(format!("CSV output is not UTF-8: {}", e)))
        }
    }
}

fn add_to_zip(zip: &mut ZipWriter<File>, root: &Path, path: &Path) -> Result<()> {
    if path.is_dir() {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(path)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        entries.sort();
        for entry in entries {
            add_to_zip(zip, root, &entry)?;
        }
        return Ok(());
    }
    let name = path
        .strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/");
    zip.start_file::<_, ()>(name, FileOptions::default())?;
    zip.write_all(&std::fs::read(path)?)?;
    Ok(())
}

/// Zips `docker-compose.yml` and the `docker/` tree.
pub fn bundle_artifacts(artifacts: &DockerArtifacts, bundle: &Path) -> Result<()> {
    if let Some(parent) = bundle.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut zip = ZipWriter::new(File::create(bundle)?);
    add_to_zip(&mut zip, &artifacts.workdir, &artifacts.compose_file)?;
    add_to_zip(&mut zip, &artifacts.workdir, &artifacts.workdir.join("docker"))?;
    zip.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::cli::LocalStorage;
    use crate::config::ChessboardConfig;
    use tempfile::TempDir;

    const CHECKMATEFILE: &str = r#"
blueprint:
  services:
    db:
      component:
        resource_type: database
      constraints:
      - setting: count
        value: 2
environment:
  providers:
    docker: {}
"#;

    fn engine(dir: &TempDir, config: ChessboardConfig) -> Engine<LocalStorage, ChessboardConfig> {
        std::fs::write(dir.path().join("Checkmatefile"), CHECKMATEFILE).unwrap();
        Engine::new(LocalStorage::new(dir.path()), config)
    }

    #[test]
    fn test_plan_format_from_str() {
        assert_eq!("YAML".parse::<PlanFormat>().unwrap(), PlanFormat::Yaml);
        assert_eq!("csv".parse::<PlanFormat>().unwrap(), PlanFormat::Csv);
        assert!("xml".parse::<PlanFormat>().is_err());
    }

    #[tokio::test]
    async fn test_plan_uses_configured_domain() {
        let dir = TempDir::new().unwrap();
        let mut config = ChessboardConfig::default();
        config.planner.domain = "example.test".into();
        config.planner.parse_only = true;
        let engine = engine(&dir, config);

        let deployment = engine.plan("Checkmatefile").await.unwrap();
        assert_eq!(deployment.resources()["0"]["dns-name"], "db01.example.test");
        assert_eq!(deployment.resources()["1"]["dns-name"], "db02.example.test");
    }

    #[tokio::test]
    async fn test_render_csv() {
        let dir = TempDir::new().unwrap();
        let mut config = ChessboardConfig::default();
        config.planner.parse_only = true;
        let engine = engine(&dir, config);

        let deployment = engine.plan("Checkmatefile").await.unwrap();
        let csv = render_plan(&deployment, PlanFormat::Csv).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines[0],
            "index,service,type,provider,component,dns_name,status,hosted_on"
        );
        assert_eq!(
            lines[1],
            "0,db,database,docker,docker_mysql,db01.checkmate.local,PLANNED,"
        );
        assert_eq!(lines.len(), 3);
    }

    #[tokio::test]
    async fn test_write_plan() {
        let dir = TempDir::new().unwrap();
        let mut config = ChessboardConfig::default();
        config.planner.parse_only = true;
        let engine = engine(&dir, config);

        engine
            .write_plan("Checkmatefile", PlanFormat::Json, "out/plan.json")
            .await
            .unwrap();
        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("out/plan.json")).unwrap())
                .unwrap();
        assert_eq!(written["status"], "NEW");
        assert_eq!(written["resources"]["1"]["service"], "db");
    }

    #[tokio::test]
    async fn test_validate_reports_schema_errors() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bad"), "blueprint:\n  services: 3\n").unwrap();
        let engine = Engine::new(LocalStorage::new(dir.path()), ChessboardConfig::default());
        let err = engine.validate("bad").await.unwrap_err();
        assert!(matches!(err, ChessboardError::MultiValidation(_)));
    }
}
