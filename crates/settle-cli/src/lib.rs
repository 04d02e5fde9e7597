//! Settle operator CLI
//!
//! Subcommands:
//! - `diff`: operations that move one record file to another
//! - `identity`: content identity of each record in a file
//! - `simulate`: run a plan against the in-memory token-gated remote
//!
//! Record files are YAML or JSON lists. With `--kind raw` each element is
//! a plain record; other kinds parse typed resources and apply their rules.

#![warn(missing_docs)]

use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use settle_engine::{EntityId, InMemoryRemote, Reconciler, ReconcilerConfig};
use settle_record::{diff, Desired, Record, RecordSet, ToRecord};
use settle_resources::{ExperimentAction, ExperimentTarget, SqlInjectionMatchTuple};
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Shape of the records in an input file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Kind {
    /// Untyped records; no rules, no case folding
    #[default]
    Raw,
    /// SQL injection match set tuples
    SqlInjection,
    /// Experiment template targets
    Target,
    /// Experiment template actions
    Action,
}

impl FromStr for Kind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "raw" => Self::Raw,
            "sql-injection" => Self::SqlInjection,
            "target" => Self::Target,
            "action" => Self::Action,
            other => bail!("unknown record kind {other:?}"),
        })
    }
}

const KINDS: [&str; 4] = ["raw", "sql-injection", "target", "action"];

/// Reconciliation scenario run by `simulate`
#[derive(Debug, Deserialize)]
struct Plan {
    entity: EntityId,
    #[serde(default)]
    kind: Kind,
    /// Records the caller last applied
    #[serde(default)]
    previous: Option<serde_yaml::Value>,
    /// Records the remote actually holds; defaults to `previous`
    #[serde(default)]
    remote: Option<serde_yaml::Value>,
    /// Missing means no change requested
    #[serde(default)]
    desired: Option<serde_yaml::Value>,
}

/// Build the command line definition
#[must_use]
pub fn build_cli() -> Command {
    let kind = Arg::new("kind")
        .long("kind")
        .default_value("raw")
        .value_parser(KINDS)
        .help("Shape of the records in the input files");

    Command::new("settle")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Change-token gated reconciliation of record collections")
        .arg_required_else_help(true)
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("diff")
                .about("Print the operations moving previous records to desired records")
                .arg(
                    Arg::new("previous")
                        .long("previous")
                        .required(true)
                        .help("Previously applied records"),
                )
                .arg(
                    Arg::new("desired")
                        .long("desired")
                        .required(true)
                        .help("Desired records"),
                )
                .arg(kind.clone()),
        )
        .subcommand(
            Command::new("identity")
                .about("Print the content identity of each record")
                .arg(
                    Arg::new("record")
                        .long("record")
                        .required(true)
                        .help("Record file"),
                )
                .arg(kind),
        )
        .subcommand(
            Command::new("simulate")
                .about("Reconcile a plan against an in-memory remote")
                .arg(
                    Arg::new("plan")
                        .long("plan")
                        .required(true)
                        .help("Plan file: entity, kind, previous, remote, desired"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .help("Reconciler configuration (YAML or JSON)"),
                )
                .arg(
                    Arg::new("conflicts")
                        .long("conflicts")
                        .default_value("0")
                        .value_parser(value_parser!(u32))
                        .help("Concurrent writes to inject before the first mutation"),
                ),
        )
}

/// Whether JSON log output was requested
#[must_use]
pub fn wants_json_logs(matches: &ArgMatches) -> bool {
    matches.get_flag("json")
}

/// Run the selected subcommand; `Ok(false)` means the reconciliation did
/// not converge
///
/// # Errors
/// Returns error on unreadable or invalid input
pub async fn run(matches: &ArgMatches, out: &mut impl Write) -> Result<bool> {
    match matches.subcommand() {
        Some(("diff", args)) => {
            let kind = kind_arg(args)?;
            let previous = load_records(Path::new(required(args, "previous")?), kind, false)?;
            let desired = load_records(Path::new(required(args, "desired")?), kind, true)?;
            let operations = diff(&previous, &desired).into_operations();
            tracing::debug!(count = operations.len(), "computed operations");
            writeln!(out, "{}", serde_json::to_string_pretty(&operations)?)?;
            Ok(true)
        }
        Some(("identity", args)) => {
            let kind = kind_arg(args)?;
            let records = load_records(Path::new(required(args, "record")?), kind, false)?;
            for (id, record) in records.iter() {
                writeln!(out, "{id}  {record}")?;
            }
            Ok(true)
        }
        Some(("simulate", args)) => {
            let config = match args.get_one::<String>("config") {
                Some(path) => load_config(Path::new(path))?,
                None => ReconcilerConfig::default(),
            };
            let conflicts = args.get_one::<u32>("conflicts").copied().unwrap_or(0);
            simulate(Path::new(required(args, "plan")?), config, conflicts, out).await
        }
        _ => bail!("no subcommand given"),
    }
}

async fn simulate(
    plan_path: &Path,
    config: ReconcilerConfig,
    conflicts: u32,
    out: &mut impl Write,
) -> Result<bool> {
    let plan: Plan = serde_yaml::from_str(&read(plan_path)?)
        .with_context(|| format!("parsing plan {}", plan_path.display()))?;

    let previous = match plan.previous {
        Some(v) => parse_records(v, plan.kind, false)?,
        None => RecordSet::new(),
    };
    let held = match plan.remote {
        Some(v) => parse_records(v, plan.kind, false)?,
        None => previous.clone(),
    };
    let desired = match plan.desired {
        Some(v) => Desired::Records(parse_records(v, plan.kind, true)?),
        None => Desired::Unchanged,
    };

    let remote = Arc::new(InMemoryRemote::with_entity(plan.entity.clone(), held));
    remote.inject_conflicts(conflicts);
    let reconciler = Reconciler::from_remote(config, remote.clone());

    let report = reconciler.reconcile(&plan.entity, &previous, &desired).await?;
    tracing::info!(
        fetches = remote.fetch_count(),
        mutations = remote.mutate_count(),
        "simulation finished"
    );
    writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
    Ok(report.is_converged())
}

fn required<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a str> {
    args.get_one::<String>(name)
        .map(String::as_str)
        .with_context(|| format!("--{name} is required"))
}

fn kind_arg(args: &ArgMatches) -> Result<Kind> {
    args.get_one::<String>("kind")
        .map_or(Ok(Kind::Raw), |s| s.parse())
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn load_config(path: &Path) -> Result<ReconcilerConfig> {
    let text = read(path)?;
    let config = if path.extension().is_some_and(|e| e == "json") {
        ReconcilerConfig::from_json_str(&text)
    } else {
        ReconcilerConfig::from_yaml_str(&text)
    };
    config.with_context(|| format!("loading config {}", path.display()))
}

fn load_records(path: &Path, kind: Kind, validate: bool) -> Result<RecordSet> {
    let value: serde_yaml::Value = serde_yaml::from_str(&read(path)?)
        .with_context(|| format!("parsing {}", path.display()))?;
    parse_records(value, kind, validate).with_context(|| format!("records in {}", path.display()))
}

fn parse_records(value: serde_yaml::Value, kind: Kind, validate: bool) -> Result<RecordSet> {
    match kind {
        Kind::Raw => typed::<Record>(value, validate),
        Kind::SqlInjection => typed::<SqlInjectionMatchTuple>(value, validate),
        Kind::Target => typed::<ExperimentTarget>(value, validate),
        Kind::Action => typed::<ExperimentAction>(value, validate),
    }
}

fn typed<T: DeserializeOwned + ToRecord>(value: serde_yaml::Value, validate: bool) -> Result<RecordSet> {
    let items: Vec<T> = serde_yaml::from_value(value)?;
    if validate {
        Ok(RecordSet::from_items(&items)?)
    } else {
        Ok(RecordSet::from_records(items.iter().map(ToRecord::to_record)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, body: &str) -> String {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        path.to_string_lossy().into_owned()
    }

    async fn run_args(args: &[&str]) -> (Result<bool>, String) {
        let matches = build_cli().try_get_matches_from(args.iter().copied()).unwrap();
        let mut out = Vec::new();
        let result = run(&matches, &mut out).await;
        (result, String::from_utf8(out).unwrap())
    }

    const PREVIOUS: &str = "
- field_to_match: {type: HEADER, data: User-Agent}
  text_transformation: NONE
- field_to_match: {type: URI}
  text_transformation: URL_DECODE
";

    const DESIRED: &str = "
- field_to_match: {type: HEADER, data: user-agent}
  text_transformation: NONE
- field_to_match: {type: QUERY_STRING}
  text_transformation: NONE
";

    #[tokio::test]
    async fn diff_typed_records() {
        let dir = TempDir::new().unwrap();
        let previous = write(&dir, "previous.yaml", PREVIOUS);
        let desired = write(&dir, "desired.yaml", DESIRED);

        let (result, out) = run_args(&[
            "settle", "diff", "--previous", &previous, "--desired", &desired, "--kind",
            "sql-injection",
        ])
        .await;

        assert!(result.unwrap());
        let ops: serde_json::Value = serde_json::from_str(&out).unwrap();
        let ops = ops.as_array().unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0]["action"], "remove");
        assert_eq!(ops[0]["record"]["field_to_match"]["type"], "URI");
        assert_eq!(ops[1]["action"], "add");
        assert_eq!(ops[1]["record"]["field_to_match"]["type"], "QUERY_STRING");
    }

    #[tokio::test]
    async fn diff_rejects_invalid_desired() {
        let dir = TempDir::new().unwrap();
        let previous = write(&dir, "previous.yaml", "[]");
        let desired = write(
            &dir,
            "desired.yaml",
            "- name: t\n  resource_type: aws:ec2:instance\n  selection_mode: ALL\n  resource_arns: ['arn:a']\n  resource_tag: {env: test}\n",
        );

        let (result, _) = run_args(&[
            "settle", "diff", "--previous", &previous, "--desired", &desired, "--kind", "target",
        ])
        .await;

        let err = format!("{:#}", result.unwrap_err());
        assert!(err.contains("only one of resource_arns, resource_tag"), "{err}");
    }

    #[tokio::test]
    async fn identity_folds_case() {
        let dir = TempDir::new().unwrap();
        let file = write(&dir, "records.yaml", DESIRED);

        let (result, out) =
            run_args(&["settle", "identity", "--record", &file, "--kind", "sql-injection"]).await;

        assert!(result.unwrap());
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let expected = SqlInjectionMatchTuple::new(
            settle_resources::FieldToMatch::named("HEADER", "USER-AGENT"),
            "NONE",
        )
        .to_record()
        .identity();
        assert!(lines[0].starts_with(&expected.to_string()));
    }

    #[tokio::test]
    async fn simulate_with_conflicts_converges() {
        let dir = TempDir::new().unwrap();
        let plan = write(
            &dir,
            "plan.yaml",
            &format!("entity: m-1\nkind: sql-injection\nprevious:{}desired:{}", indent(PREVIOUS), indent(DESIRED)),
        );
        let config = write(
            &dir,
            "config.json",
            r#"{"retry": {"max_attempts": 5, "base_delay_ms": 0, "max_delay_ms": 0}}"#,
        );

        let (result, out) = run_args(&[
            "settle", "simulate", "--plan", &plan, "--config", &config, "--conflicts", "2",
        ])
        .await;

        assert!(result.unwrap());
        let report: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(report["phase"], "converged");
        assert_eq!(report["verification"]["status"], "confirmed");
    }

    #[tokio::test]
    async fn simulate_reports_contention() {
        let dir = TempDir::new().unwrap();
        let plan = write(
            &dir,
            "plan.yaml",
            "entity: m-1\ndesired:\n  - {name: x}\n",
        );
        let config = write(
            &dir,
            "config.yaml",
            "retry:\n  max_attempts: 2\n  base_delay_ms: 0\n  max_delay_ms: 0\n",
        );

        let (result, out) = run_args(&[
            "settle", "simulate", "--plan", &plan, "--config", &config, "--conflicts", "5",
        ])
        .await;

        assert!(!result.unwrap());
        let report: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(report["phase"], "failed");
        assert!(report["error"].as_str().unwrap().contains("lost update"));
    }

    #[test]
    fn unknown_kind_is_rejected_by_parser() {
        assert!(build_cli()
            .try_get_matches_from(["settle", "identity", "--record", "x", "--kind", "nope"])
            .is_err());
    }

    fn indent(list: &str) -> String {
        list.lines()
            .map(|l| format!("  {l}\n"))
            .collect::<String>()
    }
}
