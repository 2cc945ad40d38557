//! Stratus Sim CLI
//!
//! Runs a synthetic workload through the scheduler core and reports the
//! per-class SLA violation percentages and total cluster energy.

use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use std::fs;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stratus_core::{CpuFamily, SchedulerConfig, MICROS_PER_SEC};
use stratus_sim::{Engine, RunSummary, SimCluster, WorkloadGenerator, WorkloadSpec};

#[derive(Parser, Debug)]
#[command(name = "stratus-sim")]
#[command(about = "Simulate the Stratus scheduler over a synthetic fleet", long_about = None)]
struct Args {
    /// Simulation duration in hours
    #[arg(short, long, default_value_t = 4.0)]
    duration: f64,

    /// Number of tasks to simulate
    #[arg(short, long, default_value_t = 200)]
    tasks: usize,

    /// x86 machine count
    #[arg(long, default_value_t = 16)]
    x86: usize,

    /// ARM machine count
    #[arg(long, default_value_t = 8)]
    arm: usize,

    /// POWER machine count
    #[arg(long, default_value_t = 4)]
    power: usize,

    /// RISC-V machine count
    #[arg(long, default_value_t = 0)]
    riscv: usize,

    /// Periodic check interval in seconds
    #[arg(long, default_value_t = 30)]
    check_interval: u64,

    /// RNG seed for the fleet and task mix
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Run consolidation on every N-th task completion
    #[arg(long, default_value_t = 100)]
    consolidate_every: u64,

    /// Output JSON file path (optional)
    #[arg(short, long)]
    output: Option<String>,
}

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    generated_at: chrono::DateTime<Utc>,
    seed: u64,
    tasks_total: usize,
    tasks_completed: usize,
    events_processed: u64,
    report: &'a stratus_scheduler::FinalReport,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stratus_sim=info,stratus_scheduler=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let duration = (args.duration * 3600.0 * MICROS_PER_SEC as f64) as u64;

    info!("Stratus Sim starting");
    info!(
        "fleet: {} x86, {} arm, {} power, {} riscv; {} tasks over {:.1}h (seed {})",
        args.x86, args.arm, args.power, args.riscv, args.tasks, args.duration, args.seed
    );

    let machines = vec![
        (CpuFamily::X86, args.x86),
        (CpuFamily::Arm, args.arm),
        (CpuFamily::Power, args.power),
        (CpuFamily::Riscv, args.riscv),
    ]
    .into_iter()
    .filter(|&(_, n)| n > 0)
    .collect::<Vec<_>>();

    let spec = WorkloadSpec {
        tasks: args.tasks,
        duration,
        machines,
    };

    let mut cluster = SimCluster::new();
    let mut generator = WorkloadGenerator::new(args.seed);
    generator.populate(&mut cluster, &spec);

    let cfg = SchedulerConfig {
        consolidation_every_n_completions: args.consolidate_every.max(1),
        ..SchedulerConfig::default()
    };

    let mut engine = Engine::new(cluster, cfg, args.check_interval * MICROS_PER_SEC)?;
    // Allow in-flight work to finish well past the arrival window.
    let summary = engine.run(duration * 4)?;

    print_summary(&summary);

    if let Some(path) = args.output {
        let json = serde_json::to_string_pretty(&JsonReport {
            generated_at: Utc::now(),
            seed: args.seed,
            tasks_total: summary.tasks_total,
            tasks_completed: summary.tasks_completed,
            events_processed: summary.events_processed,
            report: &summary.report,
        })?;
        fs::write(&path, json)?;
        info!("results written to {path}");
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("Simulation results");
    println!("------------------");
    println!(
        "tasks completed:   {}/{}",
        summary.tasks_completed, summary.tasks_total
    );
    println!("events processed:  {}", summary.events_processed);
    println!("SLA0 violations:   {:.2}%", summary.report.sla0_violation_pct);
    println!("SLA1 violations:   {:.2}%", summary.report.sla1_violation_pct);
    println!("SLA2 violations:   {:.2}%", summary.report.sla2_violation_pct);
    println!("total energy:      {:.3} KW-hour", summary.report.total_energy_kwh);
    println!("simulated time:    {:.1} s", summary.report.wall_time_secs);
}
