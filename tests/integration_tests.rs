use async_trait::async_trait;
use chessboard::core::CommandRunner;
use chessboard::{ChessboardConfig, ChessboardError, Engine, LocalStorage, PlanFormat, Result};
use httpmock::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const CHECKMATEFILE: &str = r#"
blueprint:
  services:
    web:
      component:
        resource_type: application
        interface: http
      relations:
      - db: mysql
    db:
      component:
        resource_type: database
        interface: mysql
environment:
  providers:
    docker:
      catalog:
        webapp:
          resource_type: application
          provides:
          - application: http
          requires:
          - database: mysql
        mysql:
          resource_type: database
          provides:
          - database: mysql
"#;

const DOCKER_CHECKMATEFILE: &str = r#"
components:
  - name: testapp
    files:
      - source: .
        dest: /opt/testapp
    commands:
      install: "pip install -r /opt/testapp/requirements.txt"
      start: "python /opt/testapp/server.py"
    provides:
      - resource_type: application
        interface: http
        port:
          default: 8080
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

fn parse_only_config() -> ChessboardConfig {
    let mut config = ChessboardConfig::default();
    config.planner.parse_only = true;
    config
}

#[derive(Clone, Default)]
struct SharedRunner {
    calls: Arc<Mutex<Vec<(String, PathBuf)>>>,
}

#[async_trait]
impl CommandRunner for SharedRunner {
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
async fn test_end_to_end_plan_from_local_file() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("Checkmatefile"), CHECKMATEFILE).unwrap();
    let engine = Engine::new(LocalStorage::new(dir.path()), parse_only_config());

    let topology = engine.topology("Checkmatefile").await.unwrap();
    assert_eq!(topology.deployment_order().unwrap(), vec!["db", "web"]);

    let deployment = engine.plan("Checkmatefile").await.unwrap();
    let resources = deployment.resources().as_object().unwrap();
    assert_eq!(resources.len(), 2);
    let web = &resources["0"];
    assert_eq!(web["service"], "web");
    assert_eq!(web["component"], "webapp");
    assert_eq!(web["status"], "PLANNED");
    assert_eq!(web["dns-name"], "web01.checkmate.local");
    assert_eq!(web["relations"]["web-db-mysql-1"]["target"], "1");
    assert_eq!(resources["1"]["component"], "mysql");

    let output = engine
        .write_plan("Checkmatefile", PlanFormat::Yaml, "plans/deployment.yaml")
        .await
        .unwrap();
    assert_eq!(output, "plans/deployment.yaml");
    let written = std::fs::read_to_string(dir.path().join("plans/deployment.yaml")).unwrap();
    assert!(written.contains("resources:"));
    assert!(written.contains("status: NEW"));
}

#[tokio::test]
async fn test_plan_from_remote_checkmatefile() {
    let server = MockServer::start();
    let api_mock = server.mock(|when, then| {
        when.method(GET).path("/Checkmatefile");
        then.status(200)
            .header("Content-Type", "application/x-yaml")
            .body(CHECKMATEFILE);
    });

    let dir = TempDir::new().unwrap();
    let engine = Engine::new(LocalStorage::new(dir.path()), parse_only_config());
    let contents = engine.validate(&server.url("/Checkmatefile")).await.unwrap();

    api_mock.assert();
    assert!(contents["blueprint"]["services"]["web"].is_object());
}

#[tokio::test]
async fn test_remote_checkmatefile_not_found() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/missing");
        then.status(404);
    });

    let dir = TempDir::new().unwrap();
    let engine = Engine::new(LocalStorage::new(dir.path()), ChessboardConfig::default());
    let err = engine.read(&server.url("/missing")).await.unwrap_err();
    assert!(matches!(err, ChessboardError::DoesNotExist(_)));
}

#[tokio::test]
async fn test_missing_local_checkmatefile() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::new(LocalStorage::new(dir.path()), ChessboardConfig::default());
    let err = engine.plan("nope/Checkmatefile").await.unwrap_err();
    assert!(matches!(err, ChessboardError::IoError(_)));
}

#[tokio::test]
async fn test_docker_launch_and_bundle() {
    let working = TempDir::new().unwrap();
    let checkmatefile = working.path().join("Checkmatefile");
    std::fs::write(&checkmatefile, DOCKER_CHECKMATEFILE).unwrap();
    std::fs::write(working.path().join("server.py"), "print('hi')\n").unwrap();
    std::fs::write(working.path().join("requirements.txt"), "redis\n").unwrap();

    let out = TempDir::new().unwrap();
    let mut config = ChessboardConfig::default();
    config.docker.workdir = out.path().join("build");
    config.docker.base_image = "debian:12".into();
    let engine = Engine::new(LocalStorage::new(working.path()), config);

    let runner = SharedRunner::default();
    let bundle = out.path().join("dist").join("docker.zip");
    let artifacts = engine
        .docker(
            &checkmatefile.display().to_string(),
            runner.clone(),
            Some(&bundle),
            true,
        )
        .await
        .unwrap();

    assert!(artifacts.launched);
    assert_eq!(artifacts.bundle.as_deref(), Some(bundle.as_path()));
    let workdir = out.path().join("build");
    assert_eq!(
        runner.calls.lock().unwrap().clone(),
        vec![
            ("docker-compose build --no-cache".to_string(), workdir.clone()),
            ("docker-compose up -d".to_string(), workdir.clone()),
        ]
    );

    let dockerfile =
        std::fs::read_to_string(workdir.join("docker").join("testapp").join("Dockerfile")).unwrap();
    assert!(dockerfile.starts_with("FROM debian:12\n"));
    assert!(dockerfile.contains("EXPOSE 8080\n"));

    let archive = std::fs::File::open(&bundle).unwrap();
    let mut archive = zip::ZipArchive::new(archive).unwrap();
    let names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    assert!(names.contains(&"docker-compose.yml".to_string()));
    assert!(names.contains(&"docker/redis/Dockerfile".to_string()));
    assert!(names.contains(&"docker/testapp/Dockerfile".to_string()));
    assert!(names.contains(&"docker/testapp/src/server.py".to_string()));
}

#[tokio::test]
async fn test_docker_render_without_launch() {
    let working = TempDir::new().unwrap();
    let checkmatefile = working.path().join("Checkmatefile");
    std::fs::write(&checkmatefile, DOCKER_CHECKMATEFILE).unwrap();

    let out = TempDir::new().unwrap();
    let mut config = ChessboardConfig::default();
    config.docker.workdir = out.path().to_path_buf();
    let engine = Engine::new(LocalStorage::new(working.path()), config);

    let runner = SharedRunner::default();
    let artifacts = engine
        .docker(&checkmatefile.display().to_string(), runner.clone(), None, false)
        .await
        .unwrap();

    assert!(!artifacts.launched);
    assert!(artifacts.bundle.is_none());
    assert!(runner.calls.lock().unwrap().is_empty());
    let compose = std::fs::read_to_string(&artifacts.compose_file).unwrap();
    assert!(compose.contains("links:\n  - redis\n"));
    assert_eq!(
        artifacts.dockerfiles.keys().collect::<Vec<_>>(),
        vec!["testapp", "redis"]
    );
}

#[tokio::test]
async fn test_docker_rejects_remote_checkmatefile() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::new(LocalStorage::new(dir.path()), ChessboardConfig::default());
    let err = engine
        .docker(
            "https://example.test/Checkmatefile",
            SharedRunner::default(),
            None,
            false,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ChessboardError::InvalidParameter(_)));
}
