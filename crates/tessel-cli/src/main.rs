use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tessel_core::Device;
use tessel_module::format::{load_metadata, meta_file_path};
use tessel_module::{CompiledModule, CudaDriver, Driver, ModuleFormat};
use tessel_shmem::{registry, JoinConfig, NvshmemBackend};

#[derive(Parser)]
#[command(
    name = "tessel",
    about = "Tessel GPU module and NVSHMEM bootstrap tools",
    version,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show CUDA devices and NVSHMEM availability
    Info,
    /// Print the function table of a module artifact
    Inspect {
        /// Module file (.cubin, .ptx, .fatbin or .cu) with its metadata sidecar
        file: PathBuf,
        /// Format override; defaults to the file extension
        #[arg(long, default_value = "")]
        format: String,
        /// Load the module on this device (`cuda:N`) and look up every function
        #[arg(long)]
        device: Option<Device>,
    },
    /// Generate a join token and print it as a join config
    Uid {
        /// Total number of participants
        #[arg(long, default_value = "1")]
        npes: u32,
        /// Participant ordinal of the first worker in the receiving process
        #[arg(long, default_value = "0")]
        pe_start: u32,
    },
    /// Join the symmetric address space from a join config file
    Join {
        /// Path to the JSON config written by `tessel uid`
        #[arg(long)]
        config: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Info => cmd_info(),
        Commands::Inspect { file, format, device } => cmd_inspect(&file, &format, device),
        Commands::Uid { npes, pe_start } => cmd_uid(npes, pe_start),
        Commands::Join { config } => cmd_join(&config),
    }
}

fn cmd_info() -> anyhow::Result<()> {
    println!("tessel v{}\n", env!("CARGO_PKG_VERSION"));

    println!("CUDA");
    match CudaDriver::new() {
        Ok(driver) => {
            let count = driver.device_count()?;
            println!("  driver:  [x]");
            println!("  devices: {}", count);
        }
        Err(e) => println!("  driver:  [ ]  ({})", e),
    }

    println!("\nNVSHMEM");
    match NvshmemBackend::load() {
        Ok(_) => println!("  host library: [x]"),
        Err(e) => println!("  host library: [ ]  ({})", e),
    }
    Ok(())
}

fn cmd_inspect(file: &Path, format: &str, device: Option<Device>) -> anyhow::Result<()> {
    let fmt = ModuleFormat::for_file(file, format)?;
    let meta = meta_file_path(file);
    let functions = load_metadata(&meta).with_context(|| format!("reading {}", meta.display()))?;

    println!("{} ({})", file.display(), fmt);
    if functions.is_empty() {
        println!("  no functions");
    }
    for (name, info) in &functions {
        println!("  {:<32} args=[{}] launch=[{}]", name, info.arg_types.join(", "), info.launch_param_tags.join(", "));
    }

    let Some(device) = device else {
        return Ok(());
    };
    let Some(ordinal) = device.cuda_index() else {
        bail!("--device must name a CUDA device, got {device}");
    };
    if fmt == ModuleFormat::Cu {
        bail!("cannot load CUDA source; compile it to cubin, ptx or fatbin first");
    }
    let driver: Arc<dyn Driver> = Arc::new(CudaDriver::new()?);
    let module = CompiledModule::load_from_file(driver, file, format)?;
    let handle = module.realize(ordinal)?;
    println!("\nloaded on {} as {:#x}", device, handle.as_raw());
    let missing = module.missing_exports(ordinal)?;
    for name in functions.keys() {
        let status = if missing.contains(name) { "not found in binary" } else { "ok" };
        println!("  {:<32} {}", name, status);
    }
    if !missing.is_empty() {
        bail!("{} of {} functions not found in the binary", missing.len(), functions.len());
    }
    Ok(())
}

fn cmd_uid(npes: u32, pe_start: u32) -> anyhow::Result<()> {
    if npes == 0 {
        bail!("--npes must be at least 1");
    }
    registry::install_default()?;
    let uid = registry::init_join_token()?;
    let config = JoinConfig { uid, npes, pe_start };
    println!("{}", config.to_json()?);
    Ok(())
}

fn cmd_join(config: &Path) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(config).with_context(|| format!("reading {}", config.display()))?;
    registry::install_default()?;
    let outcome = registry::init_from_json(&text)?;
    println!("joined: pe={} npes={} node_pe={}", outcome.pe, outcome.npes, outcome.node_pe);
    registry::uninstall();
    Ok(())
}
