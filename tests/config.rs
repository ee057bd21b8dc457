//! Config directory loading, discovery and an end-to-end run of a
//! discovered job.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chartd::collector::Registry;
use chartd::config::{AppConfig, PLUGIN_CONFIG_FILE};
use chartd::discovery::{DefaultDiscovery, Discovery, FileDiscovery};
use chartd::job::{JobSpec, JobState};
use chartd::scheduler::Scheduler;
use chartd::sink::memory::MemorySink;
use tokio::net::TcpListener;

fn write(dir: &Path, file: &str, content: &str) {
    std::fs::write(dir.join(file), content).unwrap();
}

fn discover_all(dir: &Path, app: &AppConfig) -> Vec<JobSpec> {
    let registry = Registry::builtin();
    let modules = app.enabled_modules(&registry);
    let discoveries: [Box<dyn Discovery>; 2] = [
        Box::new(FileDiscovery::new(dir, registry.clone())),
        Box::new(DefaultDiscovery::new(dir, registry)),
    ];
    discoveries.iter().flat_map(|d| d.discover(&modules)).collect()
}

#[test]
fn test_config_dir_produces_job_specs() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        PLUGIN_CONFIG_FILE,
        "max_failures: 4\nmodules:\n  bind: false\n  slabinfo: true\n",
    );
    write(
        dir.path(),
        "portcheck.yaml",
        r#"
update_every: 10
jobs:
  - name: ssh
    host: 127.0.0.1
    ports: [22]
  - name: web
    host: 127.0.0.1
    ports: [80, 443]
    update_every: 30
"#,
    );
    write(dir.path(), "bind.yaml", "jobs:\n  - name: local\n");

    let app = AppConfig::load_from_dir(dir.path()).unwrap();
    assert_eq!(app.max_failures, 4);
    assert_eq!(app.scheduler_config().max_failures, 4);

    let specs = discover_all(dir.path(), &app);
    let names: Vec<String> = specs.iter().map(JobSpec::full_name).collect();
    assert_eq!(names, ["portcheck_ssh", "portcheck_web", "slabinfo"]);

    assert_eq!(specs[0].update_every, Duration::from_secs(10));
    assert_eq!(specs[1].update_every, Duration::from_secs(30));
    assert_eq!(specs[1].config["ports"][1], 443);
    assert_eq!(specs[2].source, "default");
    assert!(specs.iter().all(|s| s.validate().is_ok()));
}

#[test]
fn test_invalid_plugin_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), PLUGIN_CONFIG_FILE, "workers: [1, 2]\n");
    assert!(AppConfig::load_from_dir(dir.path()).is_err());

    write(dir.path(), PLUGIN_CONFIG_FILE, "sink_capacity: 0\n");
    let err = AppConfig::load_from_dir(dir.path()).unwrap_err();
    assert!(err.to_string().contains("sink_capacity"));
}

#[test]
fn test_invalid_module_file_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "portcheck.yaml", "jobs:\n  - name: a\n  - name: a\n");
    write(dir.path(), "httpcheck.yaml", "jobs:\n  - name: api\n    url: http://127.0.0.1/\n");

    let specs = discover_all(dir.path(), &AppConfig::default());
    let names: Vec<String> = specs.iter().map(JobSpec::full_name).collect();
    assert_eq!(names, ["httpcheck_api"]);
}

#[tokio::test]
async fn test_discovered_job_runs() {
    let listener = match TcpListener::bind("127.0.0.1:0").await {
        Ok(l) => l,
        Err(e) if e.kind() == ErrorKind::PermissionDenied => return,
        Err(e) => panic!("failed to bind test listener: {e}"),
    };
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((_stream, _)) = listener.accept().await {}
    });

    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), PLUGIN_CONFIG_FILE, "default_run: false\nmodules:\n  portcheck: true\n");
    write(
        dir.path(),
        "portcheck.yaml",
        &format!("jobs:\n  - name: local\n    host: 127.0.0.1\n    ports: [{port}]\n    update_every: 1\n"),
    );

    let app = AppConfig::load_from_dir(dir.path()).unwrap();
    let specs = discover_all(dir.path(), &app);
    assert_eq!(specs.len(), 1);

    let sink = MemorySink::new();
    let handle = Scheduler::new(app.scheduler_config(), Arc::new(sink.clone()))
        .with_registry(Registry::builtin())
        .start();
    for spec in specs {
        handle.submit(spec).await.unwrap();
    }
    handle.startup_complete();

    let chart = format!("port_{port}_status");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while sink.samples("portcheck_local", &chart).is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let samples = sink.samples("portcheck_local", &chart);
    assert!(!samples.is_empty());
    assert!(samples[0].contains(&(format!("port_{port}_success"), 1)));
    assert_eq!(
        handle.job("portcheck_local").await.unwrap().state,
        JobState::Running
    );

    handle.shutdown().await;
    assert!(sink.obsoleted("portcheck_local").contains(&chart));
}
