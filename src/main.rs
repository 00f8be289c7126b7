use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use hetsched::accel::device::{CharDeviceProvider, HostDmaAllocator};
use hetsched::accel::layout::BufferLayout;
use hetsched::accel::sim::SimulatedProvider;
use hetsched::accel::{AccelError, AccelKind, AcceleratorManager, DeviceProvider};
use hetsched::config::SchedulerConfig;
use hetsched::cpu::{CpuFallback, ReferenceCpu};
use hetsched::fatal;
use hetsched::scheduler::Scheduler;
use hetsched::workload::{self, RunReport, WorkloadOptions};

#[derive(Parser)]
#[command(
    name = "hetsched",
    about = "Heterogeneous FFT / Viterbi task scheduler for CPU + accelerator SoCs",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (default: $HETSCHED_CONFIG, then /etc/hetsched/hetsched.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use in-process simulated accelerators instead of device nodes
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive a synthetic FFT / Viterbi workload through the scheduler
    Run {
        /// Total number of tasks
        #[arg(long, default_value = "64")]
        tasks: usize,

        /// Number of concurrent producers
        #[arg(long, default_value = "4")]
        producers: usize,

        /// Percentage of tasks that are Viterbi decodes
        #[arg(long, default_value = "50", value_parser = clap::value_parser!(u32).range(0..=100))]
        viterbi_percent: u32,

        /// Decoded bits per Viterbi task
        #[arg(long, default_value = "288")]
        viterbi_bits: u32,

        /// Seed for payload generation
        #[arg(long)]
        seed: Option<u64>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Print the DMA buffer layout of each accelerator kind
    Layout {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Open every configured accelerator unit and report it
    Probe,

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = SchedulerConfig::resolve(cli.config.as_deref())?;
    init_tracing(&config);

    match cli.command {
        Commands::Run {
            tasks,
            producers,
            viterbi_percent,
            viterbi_bits,
            seed,
            json,
        } => {
            let scheduler = Arc::new(build_scheduler(&config, cli.simulate));
            let options = WorkloadOptions {
                tasks,
                producers,
                viterbi_percent,
                viterbi_bits,
                seed,
            };
            let report = match workload::run(Arc::clone(&scheduler), options).await {
                Ok(report) => report,
                Err(e) => match e.downcast_ref::<AccelError>() {
                    Some(accel_err) => fatal::terminate(accel_err),
                    None => return Err(e),
                },
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            if let Ok(scheduler) = Arc::try_unwrap(scheduler) {
                scheduler.shutdown();
            }
        }
        Commands::Layout { json } => {
            let layouts = [
                (AccelKind::Fft, BufferLayout::fft(config.fft.log_n)),
                (AccelKind::Viterbi, BufferLayout::viterbi()),
            ];
            if json {
                let map: serde_json::Map<String, serde_json::Value> = layouts
                    .iter()
                    .map(|(kind, layout)| Ok((kind.to_string(), serde_json::to_value(layout)?)))
                    .collect::<Result<_>>()?;
                println!("{}", serde_json::to_string_pretty(&map)?);
            } else {
                println!(
                    "{:<8} | {:>5} | {:>9} | {:>9} | {:>10} | {:>11}",
                    "Kind", "Token", "In bytes", "Out bytes", "Out offset", "Total bytes"
                );
                println!("{:-<8}-|-{:->5}-|-{:->9}-|-{:->9}-|-{:->10}-|-{:->11}", "", "", "", "", "", "");
                for (kind, layout) in &layouts {
                    println!(
                        "{:<8} | {:>5} | {:>9} | {:>9} | {:>10} | {:>11}",
                        kind.to_string(),
                        layout.element_bytes,
                        layout.in_bytes(),
                        layout.out_bytes(),
                        layout.out_offset_bytes(),
                        layout.total_bytes()
                    );
                }
            }
        }
        Commands::Probe => {
            let cpu: Arc<dyn CpuFallback> = Arc::new(ReferenceCpu);
            let provider = provider(&config, cli.simulate, &cpu);
            let manager =
                match AcceleratorManager::initialize(&config, provider.as_ref(), &HostDmaAllocator) {
                    Ok(m) => m,
                    Err(e) => fatal::terminate(&e),
                };
            println!("{:<8} | {:>4} | {:<20} | {:>18} | {:>8}", "Kind", "Unit", "Device", "Buffer", "Bytes");
            println!("{:-<8}-|-{:->4}-|-{:-<20}-|-{:->18}-|-{:->8}", "", "", "", "", "");
            for kind in [AccelKind::Fft, AccelKind::Viterbi] {
                let Ok(bank) = manager.bank(kind) else {
                    println!("{:<8} | {:>4} | {:<20} | {:>18} | {:>8}", kind.to_string(), "-", "disabled", "-", "-");
                    continue;
                };
                for index in 0..bank.len() {
                    let line = bank.with_unit(index, |unit| {
                        format!(
                            "{:<8} | {:>4} | {:<20} | {:>#18x} | {:>8}",
                            kind.to_string(),
                            unit.index(),
                            unit.device_path(),
                            unit.buffer_handle(),
                            unit.layout().total_bytes()
                        )
                    });
                    match line {
                        Ok(line) => println!("{line}"),
                        Err(e) => fatal::terminate(&e),
                    }
                }
            }
            manager.shutdown();
        }
        Commands::Config => {
            let text = toml::to_string_pretty(&config).context("failed to render config")?;
            print!("{text}");
        }
    }

    Ok(())
}

fn init_tracing(config: &SchedulerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn provider(
    config: &SchedulerConfig,
    simulate: bool,
    cpu: &Arc<dyn CpuFallback>,
) -> Box<dyn DeviceProvider> {
    if simulate {
        tracing::info!("using simulated accelerators");
        Box::new(SimulatedProvider::new(Arc::clone(cpu), config.fft.fx_int_bits))
    } else {
        Box::new(CharDeviceProvider::new(
            config.fft.device_paths.clone(),
            config.viterbi.device_paths.clone(),
        ))
    }
}

/// Device or buffer failures during initialization terminate the process.
fn build_scheduler(config: &SchedulerConfig, simulate: bool) -> Scheduler {
    let cpu: Arc<dyn CpuFallback> = Arc::new(ReferenceCpu);
    let provider = provider(config, simulate, &cpu);
    match Scheduler::from_config(config, provider.as_ref(), &HostDmaAllocator, cpu) {
        Ok(scheduler) => scheduler,
        Err(e) => fatal::terminate(&e),
    }
}

fn print_report(report: &RunReport) {
    println!("\nhetsched workload: {} tasks, {} producers", report.tasks, report.producers);
    println!(
        "{:<8} | {:>6} | {:>8} | {:>8} | {:>12}",
        "Kind", "CPU", "Hardware", "HW share", "HW time (us)"
    );
    println!("{:-<8}-|-{:->6}-|-{:->8}-|-{:->8}-|-{:->12}", "", "", "", "", "");
    for kind in [AccelKind::Fft, AccelKind::Viterbi] {
        let s = report.placements.kind(kind);
        println!(
            "{:<8} | {:>6} | {:>8} | {:>7.1}% | {:>12}",
            kind.to_string(),
            s.cpu,
            s.hardware,
            s.hardware_fraction() * 100.0,
            s.hardware_time_us
        );
    }
    println!();
    println!("Skipped:            {}", report.placements.skipped);
    println!("Verified (CPU):     {} FFT, {} Viterbi", report.fft_verified, report.viterbi_verified);
    println!("Mismatches:         {}", report.mismatches);
    println!("Pool backpressure:  {} waits", report.backpressure_waits);
    println!("Elapsed:            {} ms", report.elapsed_ms);
}
