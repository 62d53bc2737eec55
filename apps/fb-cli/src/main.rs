use clap::{Parser, Subcommand};
use fb_deploy::ConfigValue;
use fb_results::{EvalOutcome, EvalStore, EvalTimings};
use fb_server::{
    EvalConfig, EvalProgressEvent, EvalRequest, ModelServer, ServiceError, ServiceResult,
    check_deployment,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "foambridge")]
#[command(about = "foambridge - serve CFD cases as remotely callable models", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the deployment over HTTP until Ctrl-C
    Serve {
        /// Path to the deployment file (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,
        /// Listen address, overriding `server.bind`
        #[arg(long)]
        bind: Option<String>,
    },
    /// Check the deployment file, templates and solver programs
    Validate {
        /// Path to the deployment file (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show the inputs and outputs of the deployed models
    Describe {
        /// Path to the deployment file (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,
        /// Only this model
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Run one evaluation locally and print the output vector
    Evaluate {
        /// Path to the deployment file (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,
        /// Model to evaluate
        #[arg(short, long)]
        model: String,
        /// Flat input vector
        #[arg(short, long, num_args = 1.., allow_hyphen_values = true, required = true)]
        input: Vec<f64>,
        /// Solver timeout in seconds (only shortens the configured one)
        #[arg(long)]
        timeout: Option<f64>,
        /// Set a config parameter, e.g. `--set end_time=500` (repeatable)
        #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_config_pair)]
        set: Vec<(String, ConfigValue)>,
    },
    /// List journaled evaluations of a model
    Runs {
        /// Path to the deployment file (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,
        /// Model to list evaluations for
        #[arg(short, long)]
        model: String,
    },
}

#[tokio::main]
async fn main() -> ServiceResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, bind } => cmd_serve(&config, bind).await,
        Commands::Validate { config } => cmd_validate(&config),
        Commands::Describe { config, model } => cmd_describe(&config, model.as_deref()),
        Commands::Evaluate {
            config,
            model,
            input,
            timeout,
            set,
        } => cmd_evaluate(&config, model, input, timeout, set).await,
        Commands::Runs { config, model } => cmd_runs(&config, &model),
    }
}

async fn cmd_serve(config: &Path, bind: Option<String>) -> ServiceResult<()> {
    let server = ModelServer::load(config)?;
    let bind = bind.unwrap_or_else(|| server.deployment().server.bind.clone());
    tracing::info!(config = %config.display(), %bind, "starting server");
    fb_server::serve(Arc::new(server), &bind).await
}

fn cmd_validate(config: &Path) -> ServiceResult<()> {
    println!("Validating deployment: {}", config.display());
    let deployment = fb_deploy::load(config)?;
    let templates = check_deployment(&deployment)?;
    std::fs::create_dir_all(&deployment.workspace.root).map_err(|e| {
        ServiceError::DeploymentCheck {
            subject: "workspace root".to_string(),
            reason: e.to_string(),
        }
    })?;
    println!("✓ Deployment is valid ({} models)", templates.len());
    for model in &deployment.models {
        println!(
            "  {} - {} inputs, {} outputs, {} steps",
            model.name,
            model.input_arity(),
            model.output_arity(),
            model.solver.steps.len()
        );
    }
    Ok(())
}

fn cmd_describe(config: &Path, model: Option<&str>) -> ServiceResult<()> {
    let deployment = fb_deploy::load(config)?;
    let models: Vec<_> = match model {
        Some(name) => vec![
            deployment
                .model(name)
                .ok_or_else(|| ServiceError::UnknownModel(name.to_string()))?,
        ],
        None => deployment.models.iter().collect(),
    };

    for model in models {
        println!("{} (template: {})", model.name, model.template.display());
        println!("  Inputs ({}):", model.input_arity());
        for input in &model.inputs {
            let bounds = match (input.min, input.max) {
                (None, None) => String::new(),
                (min, max) => format!(
                    "  [{}, {}]",
                    min.map_or("-inf".to_string(), |v| v.to_string()),
                    max.map_or("inf".to_string(), |v| v.to_string())
                ),
            };
            println!("    {} x{}{}", input.name, input.size, bounds);
        }
        println!("  Outputs ({}):", model.output_arity());
        for output in &model.outputs {
            println!("    {} x{} from {}", output.name, output.size(), output.source.file());
        }
        if !model.config.is_empty() {
            println!("  Config ({}):", model.config.len());
            for param in &model.config {
                let choices = if param.choices.is_empty() {
                    String::new()
                } else {
                    format!("  one of [{}]", param.choices.join(", "))
                };
                println!(
                    "    {} {:?} = {}{}",
                    param.name, param.kind, param.default, choices
                );
            }
        }
        let steps: Vec<_> = model.solver.steps.iter().map(|s| s.name.as_str()).collect();
        println!("  Steps: {}  (timeout {} s)", steps.join(" -> "), model.solver.timeout_s);
    }
    Ok(())
}

async fn cmd_evaluate(
    config: &Path,
    model: String,
    inputs: Vec<f64>,
    timeout: Option<f64>,
    set: Vec<(String, ConfigValue)>,
) -> ServiceResult<()> {
    let server = ModelServer::load(config)?;
    println!("Evaluating model: {}", model);

    let config = set
        .into_iter()
        .fold(EvalConfig::with_timeout(timeout), |config, (name, value)| {
            config.set(name, value)
        });
    let request = EvalRequest {
        model,
        inputs,
        config,
    };
    let result = server
        .evaluate_with_progress(
            request,
            Some(&mut |event: EvalProgressEvent| render_cli_progress(&event)),
        )
        .await;
    clear_progress_line();

    match result {
        Ok(response) => {
            if response.reused {
                println!("✓ Reused journaled result: {}", response.eval_id);
            } else {
                println!("✓ Evaluation completed: {}", response.eval_id);
            }
            if response.partial {
                println!("  (partial: the solver exited nonzero)");
            }
            let values: Vec<String> = response.outputs.iter().map(|v| v.to_string()).collect();
            println!("  Output: [{}]", values.join(", "));
            print_timing_summary(&response.timing);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ {}: {}", e.kind(), e);
            if e.kind().is_solver_failure()
                && let Some(log) = e.log()
            {
                eprintln!("--- solver log (tail) ---");
                eprintln!("{}", log.trim_end());
            }
            Err(e)
        }
    }
}

fn cmd_runs(config: &Path, model: &str) -> ServiceResult<()> {
    let deployment = fb_deploy::load(config)?;
    deployment
        .model(model)
        .ok_or_else(|| ServiceError::UnknownModel(model.to_string()))?;
    let Some(journal) = &deployment.journal else {
        println!("No journal configured");
        return Ok(());
    };

    let store = EvalStore::new(journal.dir.clone())?;
    let records = store.list(model)?;
    if records.is_empty() {
        println!("No journaled evaluations for model: {}", model);
        return Ok(());
    }

    println!("Evaluations of {}:", model);
    for record in records {
        let outcome = match &record.outcome {
            EvalOutcome::Succeeded { outputs, partial } => {
                let tag = if *partial { " (partial)" } else { "" };
                format!("ok {}{}", serde_json::to_string(outputs).unwrap_or_default(), tag)
            }
            EvalOutcome::Failed { kind, .. } => format!("failed: {}", kind),
        };
        println!(
            "  {}  {}  inputs={}  {}  ({:.2}s)",
            record.timestamp,
            &record.key[..record.key.len().min(12)],
            serde_json::to_string(&record.inputs).unwrap_or_default(),
            outcome,
            record.timings.total_s
        );
    }
    Ok(())
}

/// `name=value`, where the value is read as JSON (`true`, `64`, `1e-8`)
/// and anything else is taken as a word.
fn parse_config_pair(arg: &str) -> Result<(String, ConfigValue), String> {
    let (name, raw) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{arg}'"))?;
    if name.is_empty() {
        return Err(format!("missing config name in '{arg}'"));
    }
    let value = serde_json::from_str::<ConfigValue>(raw)
        .ok()
        .filter(|v| !matches!(v, ConfigValue::Word(_)))
        .unwrap_or_else(|| ConfigValue::Word(raw.to_string()));
    Ok((name.to_string(), value))
}

fn clear_progress_line() {
    print!("\r{}\r", " ".repeat(100));
    let _ = io::stdout().flush();
}

fn render_cli_progress(event: &EvalProgressEvent) {
    let spinner = ['|', '/', '-', '\\'];
    let spin_idx = ((event.elapsed_wall_s * 10.0) as usize) % spinner.len();
    let mut line = format!(
        "\r{} {}  elapsed={:.2}s",
        spinner[spin_idx],
        event.stage.label(),
        event.elapsed_wall_s
    );
    if let Some(msg) = &event.message {
        line.push_str(&format!("  {}", msg));
    }
    print!("{}", line);
    let _ = io::stdout().flush();
}

fn print_timing_summary(timing: &EvalTimings) {
    println!("  Timing:");
    println!("    queue       {:>8.3} s", timing.queue_s);
    println!("    instantiate {:>8.3} s", timing.instantiate_s);
    println!("    solve       {:>8.3} s", timing.solve_s);
    println!("    extract     {:>8.3} s", timing.extract_s);
    println!("    total       {:>8.3} s", timing.total_s);
}
