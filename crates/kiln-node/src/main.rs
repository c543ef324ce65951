mod args;
mod artifacts;
mod compose;
mod config;
mod error;
mod exec;
mod gpu;
mod keys;
mod operator;
mod parse;
mod phase;
mod phases;
mod poll;
mod readiness;
mod recommend;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use kiln_common::telemetry::{init_tracing, OtlpTarget};
use kiln_common::{GpuArch, SetupState};
use kiln_state::{FileStateStore, StateStore};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::args::{Args, Command, RunArgs};
use crate::artifacts::EnvFileWriter;
use crate::config::SetupConfig;
use crate::error::SetupError;
use crate::exec::{CommandExecutor, Elevation};
use crate::keys::{recover_password, ImageKeyManager};
use crate::operator::{Operator, Overrides, ScriptedOperator, TerminalOperator};
use crate::phase::{PhaseContext, PhaseRunner};
use crate::readiness::ReadinessClient;
use crate::recommend::{arch_from_name, recommend};

/// Per-request bound for readiness endpoints; the poll timeout bounds the wait.
const READINESS_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let otlp = args.otlp_endpoint.clone().map(|endpoint| OtlpTarget {
        endpoint,
        token: args.otlp_token.clone(),
    });
    let provider = init_tracing("kiln-node", args.verbose, otlp.as_ref());

    let result = match args.command {
        Command::Run(ref run) => {
            let run_id = uuid::Uuid::new_v4();
            let span = tracing::info_span!("setup", %run_id, output_dir=%args.output_dir.display());
            run_setup(&args.output_dir, run).instrument(span).await
        }
        Command::Status => show_status(&args.output_dir).await,
        Command::Recommend {
            gpus,
            memory_mb,
            ref name,
            nvlink,
        } => {
            show_recommendation(gpus, memory_mb, name, nvlink);
            Ok(())
        }
    };

    if let Some(provider) = provider {
        if let Err(e) = provider.shutdown() {
            eprintln!("failed to flush traces: {e}");
        }
    }
    result
}

async fn run_setup(output_dir: &Path, run: &RunArgs) -> anyhow::Result<()> {
    let config = run.to_config(output_dir.to_path_buf());
    let overrides = run.overrides()?;

    let store = Arc::new(FileStateStore::new(output_dir));
    let mut state = store.load().await?;
    if run.reset {
        tracing::warn!("discarding recorded progress");
        state.reset();
        state.completed_phases.clear();
        state.current_phase = None;
    }
    if let Some(phase) = state.current_phase.as_deref() {
        tracing::info!(phase, "previous run stopped during this phase");
    }

    state.keys.keyring_password = match run.keyring_password.clone() {
        Some(p) => Some(p),
        None => recover_password(output_dir).await?,
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, stopping after the current step");
            on_signal.cancel();
        }
    });

    let ctx = build_context(config, overrides, cancel)?;

    let runner = PhaseRunner::new(phases::all(), store).force(run.force_phases.clone());
    let known = runner.phase_names();
    if let Some(bad) = run.force_phases.iter().find(|f| !known.contains(&f.as_str())) {
        anyhow::bail!("unknown phase `{bad}`, expected one of {}", known.join(", "));
    }

    match runner.run(&ctx, &mut state).await {
        Ok(summary) => {
            let ran: Vec<&str> = summary.completed().collect();
            tracing::info!(ran = ?ran, skipped = summary.skipped(), "setup complete");
            println!("✓ Setup complete ({} phases run, {} already done)", ran.len(), summary.skipped());
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            eprintln!("✗ Setup interrupted; re-run to resume");
            Err(e).context("setup cancelled")
        }
        Err(e) => {
            eprintln!("✗ {e}");
            eprintln!("  progress is saved; fix the cause and re-run to resume");
            Err(e.into())
        }
    }
}

fn build_context(
    config: SetupConfig,
    overrides: Overrides,
    cancel: CancellationToken,
) -> Result<PhaseContext, SetupError> {
    let mut exec = CommandExecutor::system(config.command_timeout);
    if config.sudo {
        exec = exec.with_elevation(Elevation::Sudo);
    }
    let exec = Arc::new(exec);
    let operator: Arc<dyn Operator> = if overrides.non_interactive {
        Arc::new(ScriptedOperator::new(overrides.clone()))
    } else {
        Arc::new(TerminalOperator::new(overrides.clone()))
    };
    Ok(PhaseContext {
        keys: Arc::new(ImageKeyManager::new(
            exec.clone(),
            config.node_image.clone(),
            config.chain_cli.clone(),
            config.keyring_dir(),
        )),
        artifacts: Arc::new(EnvFileWriter::new(config.env_file())),
        readiness: ReadinessClient::new(READINESS_REQUEST_TIMEOUT)?,
        config,
        overrides,
        cancel,
        exec,
        operator,
    })
}

async fn show_status(output_dir: &Path) -> anyhow::Result<()> {
    let store = FileStateStore::new(output_dir);
    let state = store.load().await?;
    print_status(&state);
    Ok(())
}

fn print_status(state: &SetupState) {
    println!("Output dir: {}", state.output_dir.display());
    if let Some(at) = state.updated_at {
        println!("Updated:    {}", at.to_rfc3339());
    }
    println!("Network:    {} ({})", state.network.name, state.network.chain_id);
    for name in phases::all().iter().map(|p| p.name()) {
        let mark = if state.is_phase_complete(name) {
            "✓"
        } else if state.current_phase.as_deref() == Some(name) {
            "✗"
        } else {
            " "
        };
        println!("  [{mark}] {name}");
    }
    if !state.gpus.is_empty() {
        println!("GPUs:");
        for g in &state.gpus {
            println!("  {} {} {} MB ({})", g.index, g.name, g.memory_mb, g.arch);
        }
    }
    let inf = &state.inference;
    if let Some(model) = inf.model.as_deref() {
        println!(
            "Model:      {model} tp={} pp={} mem={:.2} max_len={} kv={}",
            inf.tensor_parallel_size,
            inf.pipeline_parallel_size,
            inf.gpu_memory_utilization,
            inf.max_model_len,
            inf.kv_cache_dtype
        );
    }
    if let Some(addr) = state.keys.account_address.as_deref() {
        println!("Account:    {addr}");
    }
}

fn show_recommendation(gpus: u32, memory_mb: u64, name: &str, nvlink: bool) {
    let arch = if name.is_empty() {
        GpuArch::Unknown
    } else {
        arch_from_name(name)
    };
    let rec = recommend(gpus, memory_mb, arch, nvlink);
    println!("Model:             {}", rec.model);
    println!("Tensor parallel:   {}", rec.tensor_parallel_size);
    println!("Pipeline parallel: {}", rec.pipeline_parallel_size);
    println!("GPU memory util:   {:.2}", rec.gpu_memory_utilization);
    println!("Max model len:     {}", rec.max_model_len);
    println!("KV cache dtype:    {}", rec.kv_cache_dtype);
    println!("Image variant:     {} ({arch})", rec.image_variant);
    println!("Attention:         {}", rec.attention_backend);
    if let Some(w) = rec.warning {
        println!("⚠ {w}");
    }
}
