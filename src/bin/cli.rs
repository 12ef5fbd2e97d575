use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use pipeline_results::config::DEFAULT_SETTINGS_FILE;
use pipeline_results::prelude::*;
use pipeline_results::report;
use pipeline_results::task::run_to_result;
use pipeline_results::Settings;
use tracing_subscriber::EnvFilter;
#[cfg(feature = "otel")]
use tracing_subscriber::layer::SubscriberExt;
#[cfg(feature = "otel")]
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "pipeline-results")]
#[command(about = "Record CI task results and merge them into a shared workflow result", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (default: ./results.yaml, if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory backing the object store (overrides config)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Namespace of the run inside the object store (overrides config)
    #[arg(long, global = true)]
    prefix: Option<String>,

    /// Directory for local result documents (overrides config)
    #[arg(long, global = true)]
    temp_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run shell commands as a task and record its result
    Run {
        /// Task name
        #[arg(value_name = "NAME")]
        name: String,

        /// Commands, each run through `sh -c`
        #[arg(value_name = "COMMAND", required = true, last = true)]
        commands: Vec<String>,

        /// Stop at the first failing command
        #[arg(short, long)]
        fail_fast: bool,

        /// Copy command output into the result info
        #[arg(long)]
        with_info: bool,

        /// Working directory for the commands
        #[arg(short, long)]
        workdir: Option<PathBuf>,
    },

    /// Translate a gtest JSON report into a task result
    Translate {
        /// Path to the report
        #[arg(value_name = "REPORT")]
        report: PathBuf,

        /// Task name
        #[arg(short, long)]
        name: String,
    },

    /// Print a local task result, or the shared workflow result
    Show {
        /// Task name
        #[arg(value_name = "NAME", required_unless_present = "workflow")]
        name: Option<String>,

        /// Read the shared document of this workflow instead
        #[arg(short, long, conflicts_with = "name")]
        workflow: Option<String>,
    },

    /// Upload the files attached to a task result
    Publish {
        /// Task name
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// Merge a task result into the shared workflow result
    Update {
        /// Task name
        #[arg(value_name = "NAME")]
        name: String,

        /// Workflow name
        #[arg(short, long)]
        workflow: String,

        /// Keep the task's sub-results in the workflow document
        #[arg(long)]
        nested: bool,

        /// Also append this text to the workflow info
        #[arg(short, long)]
        info: Option<String>,
    },

    /// Start a new shared workflow result with pending jobs
    Reset {
        /// Workflow name
        #[arg(short, long)]
        workflow: String,

        /// Job to register as pending (repeatable)
        #[arg(short, long = "job")]
        jobs: Vec<String>,
    },

    /// Copy the unnamed current result to its named location
    Finalize {
        /// Task name
        #[arg(value_name = "NAME")]
        name: String,
    },
}

#[cfg(feature = "otel")]
fn init_otel_tracing(verbose: bool) {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::runtime::Tokio;
    use opentelemetry_sdk::trace::TracerProvider;

    let filter = if verbose {
        "pipeline_results=debug"
    } else {
        "pipeline_results=info"
    };

    let otlp_endpoint =
        std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or_else(|_| "http://localhost:4317".to_string());

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&otlp_endpoint)
        .build()
        .expect("Failed to create OTLP exporter");

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .build();

    let tracer = provider.tracer("pipeline-results");
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(otel_layer)
        .init();

    opentelemetry::global::set_tracer_provider(provider);
}

#[cfg(not(feature = "otel"))]
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        "pipeline_results=debug"
    } else {
        "pipeline_results=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    #[cfg(feature = "otel")]
    init_otel_tracing(cli.verbose);

    #[cfg(not(feature = "otel"))]
    init_tracing(cli.verbose);

    let result = run(cli).await;

    #[cfg(feature = "otel")]
    opentelemetry::global::shutdown_tracer_provider();

    match result {
        Ok(success) => {
            if success {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::load_or_default(DEFAULT_SETTINGS_FILE)?,
    };

    if let Some(store) = &cli.store {
        settings.store_root = store.clone();
    }
    if let Some(prefix) = &cli.prefix {
        settings.store_prefix = prefix.clone();
    }
    if let Some(temp_dir) = &cli.temp_dir {
        settings.temp_dir = temp_dir.clone();
    }
    Ok(settings)
}

fn object_store(settings: &Settings) -> Arc<dyn ObjectStore> {
    Arc::new(FsObjectStore::new(&settings.store_root))
}

fn workflow_sync(settings: &Settings, workflow: String) -> WorkflowSync {
    WorkflowSync::new(object_store(settings), settings.store_prefix.clone(), workflow)
        .with_config(settings.sync_config())
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let settings = load_settings(&cli)?;

    match cli.command {
        Commands::Run {
            name,
            commands,
            fail_fast,
            with_info,
            workdir,
        } => run_task(&settings, name, commands, fail_fast, with_info, workdir).await,
        Commands::Translate { report, name } => translate(&settings, report, name),
        Commands::Show { name, workflow } => show(&settings, name, workflow).await,
        Commands::Publish { name } => publish(&settings, name).await,
        Commands::Update {
            name,
            workflow,
            nested,
            info,
        } => update(&settings, name, workflow, nested, info).await,
        Commands::Reset { workflow, jobs } => reset(&settings, workflow, jobs).await,
        Commands::Finalize { name } => finalize(&settings, name),
    }
}

#[tracing::instrument(skip(settings, commands, workdir))]
async fn run_task(
    settings: &Settings,
    name: String,
    commands: Vec<String>,
    fail_fast: bool,
    with_info: bool,
    workdir: Option<PathBuf>,
) -> anyhow::Result<bool> {
    let store = settings.result_store();
    let log_file = settings
        .temp_dir
        .join(format!("{}.log", pipeline_results::naming::normalize(&name)));

    let mut task = CommandTask::new(name, commands)
        .fail_fast(fail_fast)
        .with_info(with_info)
        .log_file(log_file);
    if let Some(dir) = workdir {
        task = task.workdir(dir);
    }

    let result = run_to_result(&task).await;
    let path = store.dump(&result)?;

    print_result(&result);
    println!("\nResult written to: {}", path.display());
    Ok(result.is_ok())
}

fn translate(settings: &Settings, report: PathBuf, name: String) -> anyhow::Result<bool> {
    let store = settings.result_store();
    let result = report::translate_file(&report).into_result(name);
    let path = store.dump(&result)?;

    print_result(&result);
    println!("\nResult written to: {}", path.display());
    Ok(result.is_ok())
}

async fn show(settings: &Settings, name: Option<String>, workflow: Option<String>) -> anyhow::Result<bool> {
    let result = match (name, workflow) {
        (_, Some(workflow)) => {
            let sync = workflow_sync(settings, workflow);
            let (version, document) = sync.fetch().await?;
            println!("Version: {version}\n");
            document
        }
        (Some(name), None) => settings.result_store().load(&name)?,
        (None, None) => anyhow::bail!("Either a task name or --workflow is required"),
    };

    print_result(&result);
    let failures = result.failure_report();
    if !failures.is_empty() {
        println!("\n{failures}");
    }
    Ok(true)
}

async fn publish(settings: &Settings, name: String) -> anyhow::Result<bool> {
    let store = settings.result_store();
    let mut result = store.load(&name)?;

    let publisher = ArtifactPublisher::new(object_store(settings), settings.store_prefix.clone());
    let usage = publisher.publish(&mut result).await?;
    usage.merge_into(&mut result);
    store.dump(&result)?;

    println!(
        "Published {} file(s), {} bytes",
        usage.uploaded_files, usage.uploaded_bytes
    );
    Ok(true)
}

async fn update(
    settings: &Settings,
    name: String,
    workflow: String,
    nested: bool,
    info: Option<String>,
) -> anyhow::Result<bool> {
    let result = settings.result_store().load(&name)?;
    let usage = pipeline_results::StorageUsage::from_result(&result);

    let mut update = if nested {
        WorkflowUpdate::new().sub_result_with_nested(result)
    } else {
        WorkflowUpdate::new().sub_result(result)
    };
    if let Some(info) = info {
        update = update.info(info);
    }
    if !usage.is_empty() {
        update = update.storage_usage(usage);
    }

    let sync = workflow_sync(settings, workflow);
    match sync.update(update).await? {
        Some(status) => println!("Workflow [{}] is now {}", sync.workflow(), status),
        None => println!("Workflow [{}] updated", sync.workflow()),
    }
    Ok(true)
}

async fn reset(settings: &Settings, workflow: String, jobs: Vec<String>) -> anyhow::Result<bool> {
    let mut document = ResultNode::pending(workflow.clone());
    document.start();
    document.results = jobs.into_iter().map(ResultNode::pending).collect();
    document.refresh_status();

    workflow_sync(settings, workflow).reset(&document).await?;
    print_result(&document);
    Ok(true)
}

fn finalize(settings: &Settings, name: String) -> anyhow::Result<bool> {
    let result = settings.result_store().finalize_current(&name)?;
    print_result(&result);
    Ok(result.is_ok())
}

fn print_result(result: &ResultNode) {
    print_node(result, 0);
}

fn print_node(result: &ResultNode, depth: usize) {
    let indent = "  ".repeat(depth);
    let mark = match result.status {
        Status::Success | Status::Skipped => "✓",
        Status::Failure | Status::Error => "✗",
        Status::Pending | Status::Running => "…",
    };
    let duration = result
        .duration
        .map(|d| format!(" ({d:.2}s)"))
        .unwrap_or_default();
    println!("{indent}{mark} {} [{}]{duration}", result.name, result.status);

    for link in &result.links {
        println!("{indent}    {link}");
    }
    for result in &result.results {
        print_node(result, depth + 1);
    }
}
