//! Design optimization CLI - Inspect archives and configuration files.

use std::fs;
use std::path::{Path, PathBuf};

use design_optim::{
    archive::DataHandler,
    schema::{EvaluationConfig, IsolationConfig, OptiRecord, OptimizerConfig},
};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("summary") if args.len() == 3 => summary(Path::new(&args[2])),
        Some("pareto") if args.len() == 3 => pareto(Path::new(&args[2])),
        Some("check-config") if args.len() == 3 => check_config(Path::new(&args[2])),
        Some("example-config") => print_example_config(),
        _ => {
            eprintln!("Usage: {} <command> [args]", args[0]);
            eprintln!();
            eprintln!("Inspect design optimization archives and configuration.");
            eprintln!();
            eprintln!("Commands:");
            eprintln!("  summary <archive>       Record count, objective ranges and fronts");
            eprintln!("  pareto <archive>        Pareto-optimal records as JSON lines");
            eprintln!("  check-config <file>     Parse and validate an optimizer config");
            eprintln!("  example-config          Print an example configuration");
            std::process::exit(1);
        }
    }
}

fn open_handler(path: &Path) -> DataHandler {
    if !path.exists() {
        eprintln!("Archive not found: {}", path.display());
        std::process::exit(1);
    }
    DataHandler::new(path, PathBuf::new())
}

fn summary(path: &Path) {
    let handler = open_handler(path);

    let (fitness, free_vars) = handler.get_archive_data().unwrap_or_else(|e| {
        eprintln!("Error reading archive: {}", e);
        std::process::exit(1);
    });
    let fronts = handler.non_dominated_fronts().unwrap_or_else(|e| {
        eprintln!("Error ranking archive: {}", e);
        std::process::exit(1);
    });

    println!("Design Optimization Archive");
    println!("===========================");
    println!("File: {}", path.display());
    println!("Records: {}", fitness.len());

    let (Some(first_objs), Some(first_x)) = (fitness.first(), free_vars.first()) else {
        return;
    };
    println!("Free variables: {}", first_x.len());
    println!("Objectives: {}", first_objs.len());
    println!();

    for k in 0..first_objs.len() {
        let (min, max) = fitness
            .iter()
            .filter_map(|f| f.get(k))
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        println!("  Objective {}: [{:.6}, {:.6}]", k, min, max);
    }
    println!();
    println!("Non-dominated fronts: {}", fronts.len());
    println!(
        "Pareto front: {} records",
        fronts.first().map_or(0, Vec::len)
    );
}

fn pareto(path: &Path) {
    let handler = open_handler(path);

    let records = handler
        .get_pareto_data::<serde_json::Value, serde_json::Value>()
        .unwrap_or_else(|e| {
            eprintln!("Error reading archive: {}", e);
            std::process::exit(1);
        });

    for record in records {
        let record: OptiRecord<serde_json::Value, serde_json::Value> =
            record.unwrap_or_else(|e| {
                eprintln!("Error reading archive: {}", e);
                std::process::exit(1);
            });
        match serde_json::to_string(&record) {
            Ok(line) => println!("{}", line),
            Err(e) => {
                eprintln!("Error encoding record: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn check_config(path: &Path) {
    let config_str = fs::read_to_string(path).unwrap_or_else(|e| {
        eprintln!("Error reading config file: {}", e);
        std::process::exit(1);
    });

    let config: OptimizerConfig = serde_json::from_str(&config_str).unwrap_or_else(|e| {
        eprintln!("Error parsing config: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = config.validate() {
        eprintln!("Invalid config: {}", e);
        std::process::exit(1);
    }

    println!("Configuration OK");
    println!(
        "Population: {} ({} generations, {} neighbours)",
        config.population.size, config.population.generations, config.population.neighbours
    );
    println!(
        "MOEA/D: CR={} F={} eta_m={} realb={} limit={}",
        config.moead.cr, config.moead.f, config.moead.eta_m, config.moead.realb, config.moead.limit
    );
    match &config.evaluation.isolation {
        Some(isolation) => match &isolation.command {
            Some(command) => println!("Evaluation: process {}", command.program.display()),
            None => println!("Evaluation: isolated thread"),
        },
        None => println!("Evaluation: in-process"),
    }
    println!("Archive: {}", config.paths.archive.display());
    println!("Checkpoint: {}", config.paths.candidates.display());
}

fn print_example_config() {
    let config = OptimizerConfig {
        evaluation: EvaluationConfig {
            isolation: Some(IsolationConfig {
                timeout_secs: Some(600.0),
                ..Default::default()
            }),
            invalid_design_objs: None,
        },
        random_seed: Some(42),
        ..Default::default()
    };
    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error encoding config: {}", e);
            std::process::exit(1);
        }
    }
}
