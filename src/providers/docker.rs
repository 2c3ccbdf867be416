//! Docker provider: renders Dockerfiles and a docker-compose file from a
//! Checkmatefile and launches them with `docker-compose`.

use crate::core::catalog::{get_default_catalog, CatalogComponent};
use crate::core::parser::load_checkmatefile;
use crate::core::topology::Topology;
use crate::domain::model::{DockerArtifacts, Relation};
use crate::domain::ports::CommandRunner;
use crate::providers::base::{Provider, ProviderBase};
use crate::utils::error::{ChessboardError, Result};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_BASE_IMAGE: &str = "ubuntu:14.04";
pub const SRC_DIR: &str = "src";

const DEFAULT_CATALOG: &str = r#"
docker_generic:
  resource_type: application
docker_mysql:
  resource_type: database
  provides:
  - database: mysql
"#;

/// Provides Docker containers.
#[derive(Debug, Clone)]
pub struct DockerProvider {
    base: ProviderBase,
}

impl DockerProvider {
    pub fn new(key: &str, definition: &Value) -> Result<Self> {
        Ok(Self {
            base: ProviderBase::new(key, definition, DEFAULT_CATALOG)?,
        })
    }
}

impl Provider for DockerProvider {
    fn base(&self) -> &ProviderBase {
        &self.base
    }
}

/// Joins shell lines ending in `\` with the line after them.
fn join_continuations(script: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut pending: Option<String> = None;
    for raw in script.lines() {
        let line = match pending.take() {
            Some(head) => format!("{} {}", head, raw.trim_start()),
            None => raw.to_string(),
        };
        match line.trim_end().strip_suffix('\\') {
            Some(head) => pending = Some(head.trim_end().to_string()),
            None => lines.push(line),
        }
    }
    lines.extend(pending);
    lines
        .into_iter()
        .map(|line| line.trim_end().to_string())
        .filter(|line| !line.trim().is_empty())
        .collect()
}

/// Renders the Dockerfile of a component. Relative file sources are placed
/// under `src_dir_prefix` in the build context.
pub fn component_to_dockerfile(
    component: &CatalogComponent,
    src_dir_prefix: Option<&str>,
    base_image: &str,
) -> String {
    let add_lines: Vec<String> = component
        .files
        .iter()
        .map(|file| {
            let source = match src_dir_prefix {
                Some(prefix) if !Path::new(&file.source).is_absolute() => {
                    format!("{}/{}", prefix, file.source)
                }
                _ => file.source.clone(),
            };
            format!("ADD [\"{}\", \"{}\"]", source, file.dest)
        })
        .collect();

    let run_lines: Vec<String> = component
        .command("install")
        .map(join_continuations)
        .unwrap_or_default()
        .into_iter()
        .map(|line| format!("RUN {}", line))
        .collect();

    let mut dockerfile = format!(
        "FROM {}\n\n{}\n\n{}\n\n",
        base_image,
        add_lines.join("\n"),
        run_lines.join("\n")
    );
    if let Some(port) = component.port() {
        let port = match port {
            Value::String(port) => port,
            other => other.to_string(),
        };
        dockerfile.push_str(&format!("EXPOSE {}\n\n", port));
    }
    if let Some(start) = component.command("start") {
        dockerfile.push_str(&format!("CMD {}\n", start));
    }
    dockerfile
}

/// Relations of every service in a parsed Checkmatefile. Relations to
/// services the blueprint does not define are `Topology` errors.
pub fn get_relations(contents: &Value) -> Result<IndexMap<String, Vec<Relation>>> {
    let topology = Topology::from_deployment(contents)?;
    Ok(topology
        .relations
        .iter()
        .map(|(service, targets)| {
            let relations = targets
                .iter()
                .map(|(remote, interface)| Relation {
                    service: remote.clone(),
                    interface: interface.clone(),
                })
                .collect();
            (service.clone(), relations)
        })
        .collect())
}

#[derive(Debug, Serialize)]
struct ComposeService {
    build: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    links: Vec<String>,
    ports: Vec<String>,
}

/// Renders docker-compose YAML. Services are sorted by name.
pub fn docker_compose(
    build_dirs: &IndexMap<String, PathBuf>,
    relations: &IndexMap<String, Vec<Relation>>,
    ports: &IndexMap<String, Vec<String>>,
) -> Result<String> {
    let services: BTreeMap<&str, ComposeService> = build_dirs
        .iter()
        .map(|(service, dir)| {
            let links = relations
                .get(service)
                .map(|list| list.iter().map(|relation| relation.service.clone()).collect())
                .unwrap_or_default();
            let compose = ComposeService {
                build: dir.display().to_string(),
                links,
                ports: ports.get(service).cloned().unwrap_or_default(),
            };
            (service.as_str(), compose)
        })
        .collect();
    Ok(serde_yaml::to_string(&services)?)
}

/// Drops `.` components so `src/.` names the `src` directory itself.
fn without_cur_dir(path: &Path) -> PathBuf {
    path.components()
        .filter(|component| !matches!(component, Component::CurDir))
        .collect()
}

/// Copies `source` to `dest`. `skip` (canonical) is left out so a workdir
/// inside the sources is not copied into itself.
fn copy_tree(source: &Path, dest: &Path, skip: Option<&Path>) -> Result<()> {
    if source.is_file() {
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::copy(source, dest)?;
        return Ok(());
    }
    if skip.is_some() && fs::canonicalize(source).ok().as_deref() == skip {
        return Ok(());
    }
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        copy_tree(&entry.path(), &dest.join(entry.file_name()), skip)?;
    }
    Ok(())
}

/// Builds and runs a Checkmatefile's services as local containers.
pub struct DockerLauncher<R: CommandRunner> {
    working_dir: PathBuf,
    components_dir: PathBuf,
    base_image: String,
    runner: R,
}

impl<R: CommandRunner> DockerLauncher<R> {
    /// `working_dir` holds the Checkmatefile and the application sources.
    pub fn new(working_dir: impl Into<PathBuf>, components_dir: impl Into<PathBuf>, runner: R) -> Self {
        Self {
            working_dir: working_dir.into(),
            components_dir: components_dir.into(),
            base_image: DEFAULT_BASE_IMAGE.to_string(),
            runner,
        }
    }

    pub fn with_base_image(mut self, base_image: impl Into<String>) -> Self {
        self.base_image = base_image.into();
        self
    }

    /// Shipped catalog overlaid with the Checkmatefile's own components.
    fn components(&self, contents: &Value) -> Result<IndexMap<String, CatalogComponent>> {
        let mut components = if self.components_dir.is_dir() {
            get_default_catalog(&self.components_dir)?
        } else {
            IndexMap::new()
        };
        if let Some(local) = contents.get("components").and_then(Value::as_array) {
            for entry in local {
                let component = CatalogComponent::from_value(entry)?;
                components.insert(component.name.clone(), component);
            }
        }
        Ok(components)
    }

    /// Writes `docker/<service>/Dockerfile`, the service sources and
    /// `docker-compose.yml` under `workdir`.
    pub fn render(&self, checkmatefile: &str, workdir: &Path) -> Result<DockerArtifacts> {
        let contents = load_checkmatefile(checkmatefile)?;
        let relations = get_relations(&contents)?;
        let components = self.components(&contents)?;
        let services = contents
            .get("blueprint")
            .and_then(|blueprint| blueprint.get("services"))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let mut artifacts = DockerArtifacts {
            workdir: workdir.to_path_buf(),
            compose_file: workdir.join("docker-compose.yml"),
            ..Default::default()
        };
        fs::create_dir_all(workdir)?;
        let skip = fs::canonicalize(workdir).ok();
        let mut build_dirs = IndexMap::new();
        let mut ports = IndexMap::new();
        for (service_name, service) in &services {
            let component_name = service
                .get("component")
                .and_then(|component| component.get("name").or_else(|| component.get("id")))
                .and_then(Value::as_str)
                .unwrap_or(service_name.as_str());
            let component = components.get(component_name).ok_or_else(|| {
                ChessboardError::DoesNotExist(format!(
                    "Component '{}' for service '{}' was not found",
                    component_name, service_name
                ))
            })?;

            let service_dir = workdir.join("docker").join(service_name);
            fs::create_dir_all(&service_dir)?;
            let dockerfile_path = service_dir.join("Dockerfile");
            fs::write(
                &dockerfile_path,
                component_to_dockerfile(component, Some(SRC_DIR), &self.base_image),
            )?;
            debug!("Wrote {}", dockerfile_path.display());

            for file in &component.files {
                if Path::new(&file.source).is_absolute() {
                    continue;
                }
                copy_tree(
                    &self.working_dir.join(&file.source),
                    &without_cur_dir(&service_dir.join(SRC_DIR).join(&file.source)),
                    skip.as_deref(),
                )?;
            }

            let port = component.port().map(|port| match port {
                Value::String(port) => port,
                other => other.to_string(),
            });
            ports.insert(service_name.clone(), port.into_iter().collect::<Vec<_>>());
            build_dirs.insert(service_name.clone(), service_dir);
            artifacts.dockerfiles.insert(service_name.clone(), dockerfile_path);
        }

        fs::write(
            &artifacts.compose_file,
            docker_compose(&build_dirs, &relations, &ports)?,
        )?;
        info!(
            "Rendered {} service(s) to {}",
            artifacts.dockerfiles.len(),
            workdir.display()
        );
        Ok(artifacts)
    }

    /// Renders the artifacts, then builds and starts the containers.
    pub async fn launch(&self, checkmatefile: &str, workdir: &Path) -> Result<DockerArtifacts> {
        let mut artifacts = self.render(checkmatefile, workdir)?;
        self.runner
            .run("docker-compose", &["build", "--no-cache"], workdir)
            .await?;
        self.runner.run("docker-compose", &["up", "-d"], workdir).await?;
        artifacts.launched = true;
        info!("Containers started from {}", artifacts.compose_file.display());
        Ok(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::load_component;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const REDIS: &str = r#"
name: redis
commands:
  install: "apt-get update && apt-get install redis-server -y"
  start: "redis-server"
provides:
  - resource_type: database
    interface: redis
    port:
      default: 6379
requires:
  - resource_type: compute
    relation: host
    interface: linux
    constraints:
      - setting: os
        value: 'ubuntu 14.04'
"#;

    fn testapp(source: &str) -> String {
        format!(
            r#"
name: testapp
files:
  - source: {source}
    dest: /opt/myapp
commands:
  install: |
    apt-get update
    apt-get install \
    python-pip
    pip install \
        redis \
        flask
  start: "python server.py"
provides:
  - resource_type: application
    interface: http
    port:
      default: 80
"#
        )
    }

    fn component(contents: &str) -> CatalogComponent {
        CatalogComponent::from_value(&load_component(contents).unwrap()).unwrap()
    }

    #[test]
    fn test_redis_dockerfile() {
        let expected = "FROM ubuntu:14.04\n\n\n\nRUN apt-get update && apt-get install redis-server -y\n\nEXPOSE 6379\n\nCMD redis-server\n";
        assert_eq!(
            component_to_dockerfile(&component(REDIS), Some(SRC_DIR), DEFAULT_BASE_IMAGE),
            expected
        );
    }

    #[test]
    fn test_example_app_dockerfile() {
        let mut app = component(&testapp("."));
        app.files.push(crate::core::catalog::ComponentFile {
            source: "./static".into(),
            dest: "/var/www/myapp".into(),
        });
        let expected = "\
FROM ubuntu:14.04

ADD [\".\", \"/opt/myapp\"]
ADD [\"./static\", \"/var/www/myapp\"]

RUN apt-get update
RUN apt-get install python-pip
RUN pip install redis flask

EXPOSE 80

CMD python server.py
";
        assert_eq!(component_to_dockerfile(&app, None, DEFAULT_BASE_IMAGE), expected);
    }

    #[test]
    fn test_absolute_source_is_not_prefixed() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().display().to_string();
        let dockerfile =
            component_to_dockerfile(&component(&testapp(&source)), Some(SRC_DIR), DEFAULT_BASE_IMAGE);
        assert!(dockerfile.contains(&format!("ADD [\"{}\", \"/opt/myapp\"]", source)));
    }

    #[test]
    fn test_join_continuations() {
        assert_eq!(
            join_continuations("a \\\n   b \\\n c\n\nd"),
            vec!["a b c".to_string(), "d".to_string()]
        );
        assert_eq!(join_continuations("dangling \\"), vec!["dangling".to_string()]);
    }

    const CHECKMATEFILE: &str = r#"
components:
  - name: testapp
    files:
      - source: .
        dest: /opt/testapp
    commands:
      install: |
        apt-get update
        apt-get install python-pip -y
        cd /opt/testapp && pip install -r requirements.txt
      start: "cd /opt/testapp && python server.py"
    provides:
      - resource_type: application
        interface: http
        port:
          default: 80
    requires:
      - resource_type: compute
        relation: host
        interface: linux
        constraints:
          - setting: os
            value: ubuntu 14.04
blueprint:
  services:
    testapp:
      component:
        name: testapp
      relations:
        - service: redis
          interface: redis
    redis:
      component:
        name: redis
"#;

    #[test]
    fn test_typical_relations() {
        let contents = load_checkmatefile(CHECKMATEFILE).unwrap();
        let relations = get_relations(&contents).unwrap();
        assert_eq!(relations.len(), 1);
        assert_eq!(
            relations["testapp"],
            vec![Relation {
                service: "redis".into(),
                interface: "redis".into()
            }]
        );
    }

    #[test]
    fn test_unknown_remote_service() {
        let contents = load_checkmatefile(&CHECKMATEFILE.replace("service: redis", "service: reddis")).unwrap();
        let err = get_relations(&contents).unwrap_err();
        assert!(matches!(err, ChessboardError::Topology(_)));
        assert_eq!(
            err.to_string(),
            "Service 'testapp' defines a relation to an unknown remote service 'reddis'."
        );
    }

    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<(String, PathBuf)>>,
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, program: &str, args: &[&str], cwd: &Path) -> Result<String> {
            let mut call = vec![program];
            call.extend_from_slice(args);
            self.calls
                .lock()
                .unwrap()
                .push((call.join(" "), cwd.to_path_buf()));
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn test_launch() {
        let working = TempDir::new().unwrap();
        fs::write(working.path().join("Checkmatefile"), CHECKMATEFILE).unwrap();
        fs::write(working.path().join("server.py"), "print('hello')\n").unwrap();
        fs::write(working.path().join("requirements.txt"), "flask\nredis\n").unwrap();
        let out = TempDir::new().unwrap();

        let launcher = DockerLauncher::new(
            working.path(),
            crate::core::catalog::default_components_dir(),
            RecordingRunner::default(),
        );
        let artifacts = launcher.launch(CHECKMATEFILE, out.path()).await.unwrap();
        assert!(artifacts.launched);

        let calls = launcher.runner.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                ("docker-compose build --no-cache".to_string(), out.path().to_path_buf()),
                ("docker-compose up -d".to_string(), out.path().to_path_buf()),
            ]
        );

        let redis_path = out.path().join("docker").join("redis");
        let testapp_path = out.path().join("docker").join("testapp");
        let expected_compose = format!(
            "redis:\n  build: {}\n  ports:\n  - '6379'\ntestapp:\n  build: {}\n  links:\n  - redis\n  ports:\n  - '80'\n",
            redis_path.display(),
            testapp_path.display()
        );
        assert_eq!(
            fs::read_to_string(out.path().join("docker-compose.yml")).unwrap(),
            expected_compose
        );

        assert_eq!(
            fs::read_to_string(redis_path.join("Dockerfile")).unwrap(),
            "FROM ubuntu:14.04\n\n\n\nRUN apt-get update && apt-get install redis-server -y\n\nEXPOSE 6379\n\nCMD redis-server\n"
        );
        assert_eq!(
            fs::read_to_string(testapp_path.join("Dockerfile")).unwrap(),
            "FROM ubuntu:14.04\n\nADD [\"src/.\", \"/opt/testapp\"]\n\nRUN apt-get update\nRUN apt-get install python-pip -y\nRUN cd /opt/testapp && pip install -r requirements.txt\n\nEXPOSE 80\n\nCMD cd /opt/testapp && python server.py\n"
        );
        assert!(testapp_path.join("src").join("server.py").is_file());
        assert!(testapp_path.join("src").join("requirements.txt").is_file());
    }

    #[test]
    fn test_missing_component() {
        let working = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let launcher = DockerLauncher::new(
            working.path(),
            working.path().join("no-catalog"),
            RecordingRunner::default(),
        );
        let err = launcher.render(CHECKMATEFILE, out.path()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Component 'redis' for service 'redis' was not found"
        );
    }

    #[test]
    fn test_current_dir_source_with_workdir_inside_sources() {
        let working = TempDir::new().unwrap();
        fs::write(working.path().join("server.py"), "print('hello')\n").unwrap();
        fs::create_dir_all(working.path().join("static")).unwrap();
        fs::write(working.path().join("static").join("app.css"), "body {}\n").unwrap();
        let workdir = working.path().join("docker-build");

        let launcher = DockerLauncher::new(
            working.path(),
            crate::core::catalog::default_components_dir(),
            RecordingRunner::default(),
        );
        let artifacts = launcher.render(CHECKMATEFILE, &workdir).unwrap();

        let src = workdir.join("docker").join("testapp").join("src");
        assert!(src.join("server.py").is_file());
        assert!(src.join("static").join("app.css").is_file());
        assert!(!src.join("docker-build").exists());
        assert_eq!(artifacts.dockerfiles.len(), 2);
        assert!(fs::read_to_string(&artifacts.dockerfiles["testapp"])
            .unwrap()
            .contains("ADD [\"src/.\", \"/opt/testapp\"]"));
    }

    #[test]
    fn test_without_cur_dir() {
        assert_eq!(
            without_cur_dir(Path::new("/tmp/build/docker/app/src/.")),
            PathBuf::from("/tmp/build/docker/app/src")
        );
        assert_eq!(
            without_cur_dir(Path::new("build/./docker/app/src/./lib")),
            PathBuf::from("build/docker/app/src/lib")
        );
    }

    #[test]
    fn test_provider_catalog() {
        let provider = DockerProvider::new("docker", &serde_json::json!({})).unwrap();
        let ids: Vec<String> = provider
            .iter_components()
            .iter()
            .filter_map(|c| c.id().map(str::to_string))
            .collect();
        assert_eq!(ids, vec!["docker_generic", "docker_mysql"]);
    }
}
