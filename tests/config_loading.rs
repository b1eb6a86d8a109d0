mod common;

use std::error::Error;
use std::path::{Path, PathBuf};

use common::builders::{CompilerConfigBuilder, ConfigFileBuilder};
use common::init_tracing;
use devloop::config::loader::absolutize;
use devloop::config::{ConfigFile, Profile, load_from_path, validate_config};
use devloop::errors::DevloopError;
use devloop::exec::CommandTemplate;

type TestResult = Result<(), Box<dyn Error>>;

fn demo(file: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos").join(file)
}

#[test]
fn json_demo_loads_and_validates() -> TestResult {
    init_tracing();
    let cfg = load_from_path(demo("devloop.config"))?;
    validate_config(&cfg)?;

    assert_eq!(cfg.compilers.len(), 2);
    let build = &cfg.compilers[0];
    assert_eq!(build.name, "build");
    assert_eq!(build.exclude, "*_test.go");
    assert!(build.runonstart);
    assert_eq!(build.replace.get("/home/build/").map(String::as_str), Some(""));

    let sass = &cfg.compilers[1];
    assert!(!sass.runonstart);
    assert_eq!(sass.workingdir, PathBuf::from("web"));

    assert_eq!(cfg.runners[0].name, "server");
    assert_eq!(cfg.httpproxies[0].listen, ":1984");
    assert_eq!(cfg.name_width(), "server".len());
    Ok(())
}

#[test]
fn toml_demo_matches_json_demo() -> TestResult {
    init_tracing();
    let json = load_from_path(demo("devloop.config"))?;
    let toml = load_from_path(demo("devloop.toml"))?;
    assert_eq!(json, toml);
    Ok(())
}

#[test]
fn missing_sections_default_to_empty() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("devloop.config");
    std::fs::write(&path, r#"{ "compilers": [ { "name": "only" } ] }"#)?;

    let cfg = load_from_path(&path)?;
    assert_eq!(cfg.watchroot, PathBuf::from("."));
    assert!(cfg.runners.is_empty());
    assert!(cfg.httpproxies.is_empty());
    assert_eq!(cfg.compilers[0].command, "");
    Ok(())
}

#[test]
fn malformed_json_is_reported() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("devloop.config");
    std::fs::write(&path, "{ not json")?;

    let err = load_from_path(&path).unwrap_err();
    assert!(matches!(err, DevloopError::JsonError(_)));
    Ok(())
}

#[test]
fn builtin_profiles_are_valid() -> TestResult {
    for profile in [Profile::Application, Profile::Library, Profile::Test] {
        let cfg = absolutize(ConfigFile::builtin(profile), Path::new("/proj"));
        validate_config(&cfg)?;
    }

    let app = ConfigFile::builtin(Profile::Application);
    assert_eq!(app.compilers.len(), 2);
    assert_eq!(app.runners.len(), 1);
    assert_eq!(app.httpproxies.len(), 1);

    let test = ConfigFile::builtin(Profile::Test);
    assert_eq!(test.compilers[0].command, "go test");
    assert!(test.runners.is_empty());
    Ok(())
}

#[test]
fn duplicate_compiler_names_are_rejected() {
    let cfg = ConfigFileBuilder::new()
        .with_compiler(CompilerConfigBuilder::new("build", "*.go").build())
        .with_compiler(CompilerConfigBuilder::new("build", "*.tmpl").build())
        .build();

    let err = validate_config(&cfg).unwrap_err();
    assert!(err.to_string().contains("more than once"), "{err}");
}

#[test]
fn invalid_glob_is_rejected() {
    let cfg = ConfigFileBuilder::new()
        .with_compiler(CompilerConfigBuilder::new("build", "*.{go").build())
        .build();

    assert!(matches!(
        validate_config(&cfg),
        Err(DevloopError::InvalidPattern { .. })
    ));
}

#[test]
fn proxy_targets_must_be_http_urls() {
    for target in ["not a url", "https://127.0.0.1:3000", "unix:/tmp/sock"] {
        let cfg = ConfigFileBuilder::new().with_proxy(":1984", target).build();
        assert!(
            matches!(validate_config(&cfg), Err(DevloopError::ConfigError(_))),
            "{target} should be rejected"
        );
    }

    let cfg = ConfigFileBuilder::new()
        .with_proxy(":1984", "http://localhost")
        .build();
    assert!(validate_config(&cfg).is_ok());
}

#[test]
fn unnamed_runner_is_rejected() {
    let cfg = ConfigFileBuilder::new().with_runner("  ", "server").build();
    assert!(matches!(
        validate_config(&cfg),
        Err(DevloopError::ConfigError(_))
    ));
}

#[test]
fn relative_file_renders_through_a_symlinked_working_directory() -> TestResult {
    let dir = tempfile::tempdir()?;
    let root = dir.path().canonicalize()?;
    std::fs::create_dir(root.join("site"))?;
    std::os::unix::fs::symlink(root.join("site"), root.join("www"))?;

    let cfg = ConfigFileBuilder::new()
        .with_compiler(
            CompilerConfigBuilder::new("pages", "*.html")
                .command("render $filerelative")
                .working_dir(Path::new("www"))
                .build(),
        )
        .build();
    let cfg = absolutize(cfg, &root);

    // The watcher reports canonical paths.
    let changed = root.join("site/index.html");
    let template = CommandTemplate::new(cfg.compilers[0].command.clone());
    assert_eq!(
        template.render(&changed, &cfg.compilers[0].workingdir)?,
        "render index.html"
    );
    Ok(())
}
