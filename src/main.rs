use plastica::prelude::*;
use tracing::{error, info};

const DEFAULT_TICKS: u64 = 2000;
const REPORT_EVERY: u64 = 100;

struct Args {
    ticks: u64,
    seed: u64,
    json: bool,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() >= 2 && (args[1] == "--help" || args[1] == "-h" || args[1] == "help") {
        print_help();
        return;
    }

    let args = match parse_args(&args[1..]) {
        Ok(a) => a,
        Err(msg) => {
            eprintln!("{msg}");
            print_help();
            std::process::exit(2);
        }
    };

    let cfg = ReservoirConfig::default().with_seed(args.seed);
    let mut engine = match Engine::new(cfg) {
        Ok(e) => e,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let mut task = SineTask::default();
    engine.reset_for_task(&task);
    info!(ticks = args.ticks, seed = args.seed, task = task.name(), "starting run");

    let mut locked_ticks = 0u64;
    for _ in 0..args.ticks {
        let m = engine.step_task(&mut task);
        if m.status == Status::Locked {
            locked_ticks += 1;
        }

        if args.json {
            match serde_json::to_string(&m) {
                Ok(line) => println!("{line}"),
                Err(e) => {
                    error!(error = %e, "failed to encode metrics");
                    std::process::exit(1);
                }
            }
        }

        if m.step % REPORT_EVERY == 0 {
            info!(
                step = m.step,
                avg_loss = m.avg_loss,
                neurons = m.neuron_count,
                connections = m.active_connections,
                rho = m.spectral_radius,
                status = %m.status,
                strategy = m.controller.strategy.name(),
                "progress"
            );
        }
    }

    let snap = EngineAdapter::new(&engine).snapshot();
    info!(
        steps = snap.steps,
        size = snap.size,
        density = snap.density,
        locked_ticks,
        mode = snap.mode.name(),
        "run finished"
    );
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut out = Args {
        ticks: DEFAULT_TICKS,
        seed: 42,
        json: false,
    };
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--json" => out.json = true,
            "--seed" => {
                i += 1;
                let v = args.get(i).ok_or("--seed needs a value")?;
                out.seed = v.parse().map_err(|_| format!("bad seed: {v}"))?;
            }
            other => {
                out.ticks = other
                    .parse()
                    .map_err(|_| format!("Unknown argument: {other}"))?;
            }
        }
        i += 1;
    }
    Ok(out)
}

fn print_help() {
    println!("plastica (self-organizing reservoir demo)");
    println!("usage:");
    println!("  plastica [ticks] [--seed N] [--json]");
    println!("  plastica --help");
    println!();
    println!("Runs the sine forecasting task. With --json, prints one metrics record per line.");
}
