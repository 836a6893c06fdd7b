//! scriptbox - sandboxed script execution CLI
//!
//! ## Commands
//!
//! - `run`: Execute a script file (or stdin) and print the result envelope
//! - `process`: Feed a request body through the script processor
//! - `policy`: Show allow/deny decisions for host identifiers

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, Level};

use scriptbox_core::{
    error_envelope, evaluate_access, success_envelope, AccessPolicy, ExecutionSession,
    PortableValue, ProcessorRegistry, ProcessorRequest, RequestMeta, ScriptConfig,
    ScriptProcessor, ScriptRequest, METRICS,
};

#[derive(Parser)]
#[command(name = "scriptbox")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run untrusted scripts under a default-deny sandbox", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (TOML, `[script]` table)
    #[arg(short, long, global = true, env = "SCRIPTBOX_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a script and print the success or error envelope
    Run {
        /// Script file, or `-` for stdin
        script: PathBuf,

        /// Parameters as a JSON object, bound as top-level variables
        #[arg(short, long)]
        params: Option<String>,

        /// Wall-clock budget in milliseconds (overrides config)
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Memory budget in bytes (overrides config)
        #[arg(long)]
        max_memory: Option<u64>,
    },

    /// Run a request body through the processor registry
    Process {
        /// Content type of the body
        #[arg(long, default_value = "application/javascript")]
        content_type: String,

        /// Body file (`{"script": ..., "params": ...}`), or `-` for stdin
        body: PathBuf,
    },

    /// Print the access decision for each host identifier
    Policy {
        /// Identifiers such as `host.util.ArrayList`
        #[arg(required = true)]
        identifiers: Vec<String>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    scriptbox_core::init_tracing(cli.json, level);

    let config = ScriptConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    debug!(?config, "loaded configuration");

    let succeeded = match cli.command {
        Commands::Run {
            script,
            params,
            timeout_ms,
            max_memory,
        } => {
            cmd_run(
                config,
                &script,
                params.as_deref(),
                timeout_ms,
                max_memory,
            )
            .await?
        }
        Commands::Process { content_type, body } => {
            cmd_process(&config, &content_type, &body).await?
        }
        Commands::Policy {
            identifiers,
            format,
        } => cmd_policy(&identifiers, format)?,
    };

    METRICS.flush();
    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn cmd_run(
    mut config: ScriptConfig,
    script: &Path,
    params: Option<&str>,
    timeout_ms: Option<u64>,
    max_memory: Option<u64>,
) -> Result<bool> {
    if let Some(timeout_ms) = timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    if let Some(max_memory) = max_memory {
        config.max_memory_bytes = max_memory;
    }
    config.validate()?;

    let source = read_input(script)?;
    let mut request = ScriptRequest::new(source).with_meta(RequestMeta::new("CLI", "run"));
    if let Some(params) = params {
        request.parameters = parse_params(params)?;
    }

    let session = Arc::new(ExecutionSession::from_config(&config));
    let (envelope, succeeded) = match session.run_async(request).await {
        Ok(outcome) => (success_envelope(outcome.to_payload()), true),
        Err(failed) => {
            for line in &failed.console_lines {
                eprintln!("console: {line}");
            }
            (error_envelope(failed.kind(), &failed.to_string()), false)
        }
    };
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(succeeded)
}

async fn cmd_process(config: &ScriptConfig, content_type: &str, body: &Path) -> Result<bool> {
    let body = read_input(body)?;
    let mut registry = ProcessorRegistry::new();
    registry.register(Arc::new(ScriptProcessor::new(Arc::new(
        ExecutionSession::from_config(config),
    ))));

    let request =
        ProcessorRequest::new(content_type, body).with_meta(RequestMeta::new("POST", "process"));
    let response = tokio::task::spawn_blocking(move || registry.dispatch(&request))
        .await
        .context("processor task failed")?;
    let Some(response) = response else {
        bail!("No processor registered for content type '{content_type}'");
    };

    println!("HTTP {} ({})", response.status_code, response.content_type);
    println!("{}", response.body);
    Ok(response.status_code < 400)
}

#[derive(Debug, Serialize)]
struct PolicyLine {
    identifier: String,
    decision: String,
    rule: String,
}

fn policy_lines(policy: &AccessPolicy, identifiers: &[String]) -> Vec<PolicyLine> {
    identifiers
        .iter()
        .map(|identifier| {
            let verdict = evaluate_access(policy, identifier);
            PolicyLine {
                identifier: identifier.clone(),
                decision: verdict.decision.to_string(),
                rule: verdict.rule.to_string(),
            }
        })
        .collect()
}

fn cmd_policy(identifiers: &[String], format: OutputFormat) -> Result<bool> {
    let lines = policy_lines(&AccessPolicy::standard(), identifiers);
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&lines)?),
        OutputFormat::Text => {
            for line in &lines {
                println!("{:<5}  {}  ({})", line.decision, line.identifier, line.rule);
            }
        }
    }
    Ok(true)
}

/// Read `path`, or stdin when `path` is `-`.
fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))
}

fn parse_params(raw: &str) -> Result<std::collections::BTreeMap<String, PortableValue>> {
    let value: serde_json::Value = serde_json::from_str(raw).context("Invalid --params JSON")?;
    let serde_json::Value::Object(fields) = value else {
        bail!("--params must be a JSON object");
    };
    Ok(fields
        .into_iter()
        .map(|(name, value)| (name, PortableValue::from(value)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script_file(source: &str) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), source).unwrap();
        file
    }

    #[test]
    fn test_parse_params_requires_object() {
        let params = parse_params(r#"{"n": 3, "tags": ["a"]}"#).unwrap();
        assert_eq!(params["n"], PortableValue::Number(3.0));
        assert!(parse_params("[1]").is_err());
        assert!(parse_params("{oops").is_err());
    }

    #[test]
    fn test_policy_lines_report_rule() {
        let lines = policy_lines(
            &AccessPolicy::standard(),
            &["host.util.ArrayList".to_string(), "host.io.File".to_string()],
        );
        assert_eq!(lines[0].decision, "allow");
        assert_eq!(lines[1].decision, "deny");
    }

    #[tokio::test]
    async fn test_cmd_run_reports_success_and_failure() {
        let ok = script_file("n * 2");
        let succeeded = cmd_run(
            ScriptConfig::default(),
            ok.path(),
            Some(r#"{"n": 21}"#),
            None,
            None,
        )
        .await
        .unwrap();
        assert!(succeeded);

        let looping = script_file("while (true) {}");
        let succeeded = cmd_run(ScriptConfig::default(), looping.path(), None, Some(100), None)
            .await
            .unwrap();
        assert!(!succeeded);
    }

    #[tokio::test]
    async fn test_cmd_run_rejects_zero_budget() {
        let file = script_file("1");
        let err = cmd_run(ScriptConfig::default(), file.path(), None, Some(0), None).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_cmd_process_dispatches_by_content_type() {
        let body = script_file(r#"{"script": "1 + 1"}"#);
        let ok = cmd_process(&ScriptConfig::default(), "text/javascript", body.path())
            .await
            .unwrap();
        assert!(ok);

        let err = cmd_process(&ScriptConfig::default(), "application/xml", body.path()).await;
        assert!(err.is_err());
    }
}
