//! Shape Factory CLI - Run the factory engine from a JSON configuration.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use shape_factory::{
    compute::FactoryEngine,
    schema::{FactoryConfig, GRID_SIDE},
};

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <config.json> [generations] [--out result.json]", args[0]);
        eprintln!();
        eprintln!("Evolve {GRID_SIDE}x{GRID_SIDE} shape layouts with a pool of factory threads.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  config.json  Path to factory configuration file");
        eprintln!("  generations  Generations to run when the config sets none (default: 1000)");
        eprintln!("  --out PATH   Write the run result as JSON");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_config();
        return;
    }

    let config_path = PathBuf::from(&args[1]);
    let mut out_path: Option<PathBuf> = None;
    let mut generations: Option<u64> = None;
    let mut rest = args[2..].iter();
    while let Some(arg) = rest.next() {
        if arg == "--out" {
            out_path = rest.next().map(PathBuf::from);
        } else if let Ok(n) = arg.parse() {
            generations = Some(n);
        }
    }

    let mut config = FactoryConfig::load(&config_path).unwrap_or_else(|e| {
        eprintln!("Error loading config: {}", e);
        std::process::exit(1);
    });
    if config.max_generations.is_none() {
        config.max_generations = Some(generations.unwrap_or(1000));
    }
    let target = config.max_generations.unwrap_or(1000);

    println!("Shape Factory");
    println!("=============");
    println!("Factories: {}", config.population);
    println!("Shapes: {} in {} spaces", config.shapes, config.spaces);
    println!(
        "Mutation rate: {:.4}, crossover rate: {:.2}",
        config.mutation_rate, config.crossover_rate
    );
    println!("Generations: {}", target);
    println!();

    let engine = FactoryEngine::new(config).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    println!("Running factories...");
    let start = Instant::now();
    let running = engine.start().unwrap_or_else(|e| {
        eprintln!("Error starting engine: {}", e);
        std::process::exit(1);
    });

    // Print progress every 10%
    let every = (target / 10).max(1);
    for generation in running.feed().iter() {
        if generation.round() % every == 0 {
            let elapsed = start.elapsed().as_secs_f32();
            let best = running.best().get().map_or(0.0, |b| b.fitness);
            println!(
                "  Generation {}/{}: round best={:.5}, overall best={:.5}, {:.1} gen/s",
                generation.round(),
                target,
                generation.best().map_or(0.0, |b| b.fitness),
                best,
                generation.round() as f32 / elapsed
            );
        }
    }

    let result = running.join().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    println!();
    println!("Finished: {:?}", result.stats.stop_reason);
    println!("  Generations: {}", result.stats.generations);
    println!("  Crossovers: {}", result.stats.crossovers);
    println!("  Backlogged reports: {}", result.stats.backlogged);
    if result.stats.excluded_workers > 0 {
        println!("  Excluded factories: {}", result.stats.excluded_workers);
    }
    println!("  Time: {:.2}s", result.stats.elapsed_seconds);

    if let Some(best) = &result.best {
        println!();
        println!(
            "Best layout: fitness {:.5} from {} (round {})",
            best.fitness, best.worker, best.round
        );
        println!("{}", best.layout);
    }

    if let Some(path) = out_path {
        let json = serde_json::to_string_pretty(&result).unwrap_or_else(|e| {
            eprintln!("Error serializing result: {}", e);
            std::process::exit(1);
        });
        if let Err(e) = fs::write(&path, json) {
            eprintln!("Error writing {}: {}", path.display(), e);
            std::process::exit(1);
        }
        println!("Result written to {}", path.display());
    }
}

fn print_example_config() {
    let config = FactoryConfig::default();

    println!("Example configuration (config.json):");
    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing config: {}", e),
    }
}
