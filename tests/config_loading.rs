// tests/config_loading.rs

mod common;
use crate::common::builders::{file_prop, tree_prop, value_prop, ConfigFileBuilder, TaskConfigBuilder};
use crate::common::{init_tracing, with_timeout, Project};

use clap::Parser;
use serde_json::json;

use cachedag::cli::{CliArgs, LogLevel};
use cachedag::config::{load_and_validate, parse_and_validate, ConfigFile, PropertyConfig};
use cachedag::engine::{Engine, RunReport};
use cachedag::errors::CachedagError;
use cachedag::fingerprint::{PropertyKind, PropertySpec};
use cachedag::logging::{build_filter, resolve_level};
use cachedag::types::{EdgeKind, FailurePolicy, NodeState, TaskId};

const SAMPLE: &str = r#"
[engine]
workers = 3
failure_policy = "fail-fast"

[cache]
dir = "build-cache"

[cache.remote]
dir = "shared"
push = true

[task.compile]
cmd = "cc -c main.c -o main.o"
cacheable = true
inputs.sources = { tree = "src", include = ["**/*.c"], exclude = ["**/gen_*.c"] }
inputs.flags = { value = ["-O2", "-g"] }
outputs.object = { file = "main.o" }

[task.test]
cmd = "./test.sh"
after = ["compile"]
finalized_by = ["cleanup"]
env = { RUST_BACKTRACE = "1" }

[task.cleanup]
cmd = "rm -rf tmp"
parallel = false

[task.docs]
cmd = "make docs"
should_run_after = ["test"]
"#;

fn config_error(result: Result<impl std::fmt::Debug, CachedagError>) -> String {
    match result {
        Err(CachedagError::ConfigError(msg)) => msg,
        other => panic!("expected a config error, got {other:?}"),
    }
}

#[test]
fn parses_a_complete_build_file() {
    let cfg = parse_and_validate(SAMPLE).unwrap();

    assert_eq!(cfg.engine.workers, Some(3));
    assert_eq!(cfg.engine.failure_policy, FailurePolicy::FailFast);
    assert!(cfg.cache.enabled);
    assert_eq!(cfg.cache.remote.as_ref().map(|r| r.push), Some(true));
    assert_eq!(cfg.task.len(), 4);

    let compile = &cfg.task["compile"];
    assert!(compile.cacheable);
    assert!(compile.parallel);
    let sources = compile.inputs["sources"].to_spec("sources").unwrap();
    assert_eq!(
        sources,
        PropertySpec::filtered_tree("sources", "src", vec!["**/*.c".into()], vec!["**/gen_*.c".into()])
    );
    let flags = compile.inputs["flags"].to_spec("flags").unwrap();
    assert_eq!(flags.kind, PropertyKind::Value(json!(["-O2", "-g"])));

    assert!(!cfg.task["cleanup"].parallel);
    assert_eq!(cfg.task["test"].env.get("RUST_BACKTRACE").map(String::as_str), Some("1"));
}

#[test]
fn graph_from_config_carries_every_relationship() {
    let cfg = parse_and_validate(SAMPLE).unwrap();
    let graph = cfg.to_graph().unwrap().finalize().unwrap();

    // Task tables are keyed by name, so declaration order is alphabetical.
    let names: Vec<&str> = graph.nodes().iter().map(|n| n.id.as_str()).collect();
    assert_eq!(names, vec!["cleanup", "compile", "docs", "test"]);

    let test = graph.index_of(&TaskId::from("test")).unwrap();
    let compile = graph.index_of(&TaskId::from("compile")).unwrap();
    let cleanup = graph.index_of(&TaskId::from("cleanup")).unwrap();
    let docs = graph.index_of(&TaskId::from("docs")).unwrap();

    assert!(graph.predecessors(test).contains(&(compile, EdgeKind::HardDependency)));
    assert!(graph.predecessors(cleanup).contains(&(test, EdgeKind::FinalizedBy)));
    assert!(graph.predecessors(docs).contains(&(test, EdgeKind::ShouldRunAfter)));
    assert!(graph.is_finalizer(cleanup));
    assert!(!graph.node(cleanup).parallel);
    assert!(graph.node(compile).cacheable);
    assert_eq!(graph.node(compile).outputs, vec![PropertySpec::file("object", "main.o")]);

    let order: Vec<&str> = graph.planned_order().into_iter().map(TaskId::as_str).collect();
    assert_eq!(order, vec!["compile", "test", "cleanup", "docs"]);
}

#[test]
fn shell_action_identity_includes_command_and_env() {
    let cfg = parse_and_validate(SAMPLE).unwrap();
    let graph = cfg.to_graph().unwrap().finalize().unwrap();
    let test = graph.node(graph.index_of(&TaskId::from("test")).unwrap());
    let identity = test.action.identity();
    assert!(identity.contains("./test.sh"));
    assert!(identity.contains("RUST_BACKTRACE=1"));
}

#[test]
fn engine_options_resolve_against_the_project_root() {
    let cfg = parse_and_validate(SAMPLE).unwrap();
    let root = std::path::Path::new("/work/project");
    let options = cfg.engine_options(root);

    assert_eq!(options.root_dir, root);
    assert_eq!(options.workers, 3);
    assert_eq!(options.failure_policy, FailurePolicy::FailFast);
    assert!(options.cache.local.is_some());
    assert!(options.cache.remote.is_some());
    assert!(options.cache.push_local);
    assert!(options.cache.push_remote);

    let disabled = ConfigFileBuilder::new()
        .with_task("a", TaskConfigBuilder::new("true").build())
        .cache_enabled(false)
        .build()
        .engine_options(root);
    assert!(disabled.cache.local.is_none());
    assert!(disabled.cache.remote.is_none());
}

#[test]
fn unknown_fields_are_rejected() {
    let err = parse_and_validate("[task.a]\ncmd = \"true\"\ndepends = [\"b\"]\n").unwrap_err();
    assert!(matches!(err, CachedagError::TomlError(_)), "{err:?}");
}

#[test]
fn empty_build_file_is_rejected() {
    let msg = config_error(parse_and_validate(""));
    assert!(msg.contains("at least one"), "{msg}");
}

#[test]
fn zero_workers_is_rejected() {
    let msg = config_error(
        ConfigFileBuilder::new()
            .with_task("a", TaskConfigBuilder::new("true").build())
            .workers(0)
            .try_build(),
    );
    assert!(msg.contains("workers"), "{msg}");
}

#[test]
fn references_must_name_other_existing_tasks() {
    let msg = config_error(
        ConfigFileBuilder::new()
            .with_task("a", TaskConfigBuilder::new("true").after("ghost").build())
            .try_build(),
    );
    assert!(msg.contains("unknown task 'ghost'"), "{msg}");
    assert!(msg.contains("`after`"), "{msg}");

    let msg = config_error(
        ConfigFileBuilder::new()
            .with_task("a", TaskConfigBuilder::new("true").build())
            .with_task("b", TaskConfigBuilder::new("true").finalized_by("nope").build())
            .try_build(),
    );
    assert!(msg.contains("`finalized_by`"), "{msg}");

    let msg = config_error(
        ConfigFileBuilder::new()
            .with_task("a", TaskConfigBuilder::new("true").must_run_after("a").build())
            .try_build(),
    );
    assert!(msg.contains("itself"), "{msg}");
}

#[test]
fn empty_command_is_rejected() {
    let msg = config_error(
        ConfigFileBuilder::new()
            .with_task("a", TaskConfigBuilder::new("   ").build())
            .try_build(),
    );
    assert!(msg.contains("empty `cmd`"), "{msg}");
}

#[test]
fn property_shapes_are_checked() {
    let ambiguous = PropertyConfig {
        include: vec!["*.c".into()],
        ..file_prop("main.c")
    };
    let msg = config_error(
        ConfigFileBuilder::new()
            .with_task("a", TaskConfigBuilder::new("true").input("src", ambiguous).build())
            .try_build(),
    );
    assert!(msg.contains("inputs.src"), "{msg}");

    let nothing = PropertyConfig::default();
    assert!(nothing.to_spec("x").is_err());

    let two = PropertyConfig {
        value: Some(json!(1)),
        ..file_prop("a")
    };
    assert!(two.to_spec("x").is_err());

    let bad_glob = tree_prop("src", &["src/["]);
    let err = bad_glob.to_spec("x").unwrap_err();
    assert!(err.contains("invalid glob"), "{err}");
}

#[test]
fn outputs_must_be_locations() {
    let msg = config_error(
        ConfigFileBuilder::new()
            .with_task("a", TaskConfigBuilder::new("true").output("answer", value_prop(json!(42))).build())
            .try_build(),
    );
    assert!(msg.contains("outputs.answer"), "{msg}");
}

#[test]
fn cycles_between_config_tasks_are_reported_at_finalize() {
    let cfg = ConfigFileBuilder::new()
        .with_task("a", TaskConfigBuilder::new("true").after("b").build())
        .with_task("b", TaskConfigBuilder::new("true").after("a").build())
        .build();
    let err = cfg.to_graph().unwrap().finalize().unwrap_err();
    assert!(err.to_string().contains("a -> b -> a"), "{err}");
}

#[test]
fn load_and_validate_reads_from_disk() {
    let project = Project::new();
    project.write("Cachedag.toml", SAMPLE);
    let cfg = load_and_validate(project.path("Cachedag.toml")).unwrap();
    assert_eq!(cfg.task.len(), 4);

    let missing = load_and_validate(project.path("missing.toml")).unwrap_err();
    assert!(matches!(missing, CachedagError::IoError(_)));
}

#[test]
fn cli_flags_map_to_failure_policy() {
    let args = CliArgs::try_parse_from(["cachedag", "test", "-j", "2", "--fail-fast"]).unwrap();
    assert_eq!(args.tasks, vec!["test"]);
    assert_eq!(args.workers, Some(2));
    assert_eq!(args.failure_policy(), Some(FailurePolicy::FailFast));
    assert_eq!(args.config, "Cachedag.toml");

    let args = CliArgs::try_parse_from(["cachedag", "--continue"]).unwrap();
    assert_eq!(args.failure_policy(), Some(FailurePolicy::Continue));

    let args = CliArgs::try_parse_from(["cachedag"]).unwrap();
    assert_eq!(args.failure_policy(), None);
    assert!(!args.no_cache && !args.no_history);

    let args = CliArgs::try_parse_from(["cachedag", "--no-history", "--no-cache", "--dry-run"]).unwrap();
    assert!(args.no_history && args.no_cache && args.dry_run);
    assert_eq!(args.prune_cache, None);

    let args = CliArgs::try_parse_from(["cachedag", "--prune-cache", "14"]).unwrap();
    assert_eq!(args.prune_cache, Some(14));
    assert!(CliArgs::try_parse_from(["cachedag", "--prune-cache", "7", "--dry-run"]).is_err());

    assert!(CliArgs::try_parse_from(["cachedag", "--fail-fast", "--continue"]).is_err());
}

#[test]
fn log_level_prefers_flag_then_environment() {
    assert_eq!(resolve_level(Some(LogLevel::Debug), Some("error")), tracing::Level::DEBUG);
    assert_eq!(resolve_level(None, Some("warn")), tracing::Level::WARN);
    assert_eq!(resolve_level(None, Some("nonsense")), tracing::Level::INFO);
    assert_eq!(resolve_level(None, None), tracing::Level::INFO);
}

#[test]
fn log_filter_scopes_the_level_to_cachedag() {
    let filter = build_filter(Some(LogLevel::Debug), None).to_string();
    assert!(filter.contains("cachedag=debug"), "{filter}");

    let filter = build_filter(None, Some("warn,cachedag::cache=trace")).to_string();
    assert!(filter.contains("cachedag::cache=trace"), "{filter}");

    // The flag wins over a directive list.
    let filter = build_filter(Some(LogLevel::Error), Some("cachedag=trace")).to_string();
    assert!(filter.contains("cachedag=error"), "{filter}");
}

async fn run_config(config: &ConfigFile, project: &Project) -> RunReport {
    let graph = config.to_graph().unwrap().finalize().unwrap();
    let engine = Engine::new(config.engine_options(project.root()));
    with_timeout(engine.run(graph)).await.unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shell_tasks_from_config_run_and_become_up_to_date() {
    init_tracing();
    let project = Project::new();
    project.write("input.txt", "hello");

    let config = ConfigFileBuilder::new()
        .with_task(
            "copy",
            TaskConfigBuilder::new("cp input.txt output.txt")
                .cacheable(true)
                .input("source", file_prop("input.txt"))
                .output("copy", file_prop("output.txt"))
                .build(),
        )
        .with_task(
            "shout",
            TaskConfigBuilder::new("echo \"$GREETING\" > shout.txt")
                .env("GREETING", "hi")
                .after("copy")
                .output("shout", file_prop("shout.txt"))
                .build(),
        )
        .build();

    let report = run_config(&config, &project).await;
    assert!(report.is_success(), "{report}");
    assert_eq!(project.read("output.txt"), "hello");
    assert_eq!(project.read("shout.txt").trim(), "hi");
    assert!(project.state_dir().join("history").is_dir());
    assert!(project.state_dir().join("cache").is_dir());

    let report = run_config(&config, &project).await;
    assert_eq!(report.state_of("copy"), Some(NodeState::Skipped));
    assert_eq!(report.state_of("shout"), Some(NodeState::Skipped));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_shell_command_fails_the_task() {
    init_tracing();
    let project = Project::new();

    let config = ConfigFileBuilder::new()
        .with_task("broken", TaskConfigBuilder::new("exit 3").build())
        .build();
    let report = run_config(&config, &project).await;

    assert_eq!(report.state_of("broken"), Some(NodeState::Failed));
    let rendered = report.to_string();
    assert!(rendered.contains("exited with code 3"), "{rendered}");
}
