//! Flowline CLI Entry Point
//!
//! Provides the command-line interface for running a catalog.
//!
//! # Usage
//!
//! ```bash
//! # Run a catalog
//! flowline catalog.yaml
//!
//! # Resolve and print the catalog layout without running it
//! flowline catalog.yaml --check
//!
//! # Override engine settings for this run
//! flowline catalog.yaml --max-lines 4 --workers 8
//!
//! # Slow the scheduler down
//! flowline catalog.yaml --tick-ms 250
//! ```

use std::env;
use std::path::Path;
use std::process::ExitCode;

use log::error;

use flowline::builtins::stock_table;
use flowline::{
    load_catalog, resolve_catalog, EngineSettings, ModuleRegistry, Scheduler, APP_NAME, VERSION,
};

/// Default catalog file used when none is specified.
const DEFAULT_CATALOG: &str = "catalog.yaml";

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    catalog_path: String,
    check: bool,
    max_lines: Option<usize>,
    workers: Option<usize>,
    queue_depth: Option<usize>,
    tick_ms: Option<u64>,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog_path: DEFAULT_CATALOG.to_string(),
            check: false,
            max_lines: None,
            workers: None,
            queue_depth: None,
            tick_ms: None,
            verbose: false,
        }
    }
}

/// Configures logging. Info lines print bare; warnings and errors keep
/// their level tag so they stand out in a long engine run.
fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format(|buf, record| {
            use std::io::Write;

            if record.level() <= log::Level::Warn {
                writeln!(buf, "[{}] {}", record.level(), record.args())
            } else {
                writeln!(buf, "{}", record.args())
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Catalog-Driven Workflow Engine");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: flowline [OPTIONS] <CATALOG_FILE>");
    println!();
    println!("Arguments:");
    println!("  <CATALOG_FILE>    Path to catalog YAML file (default: {})", DEFAULT_CATALOG);
    println!();
    println!("Options:");
    println!("  --check           Resolve the catalog, print its layout, and exit");
    println!("  --max-lines N     Maximum concurrently active line instances");
    println!("  --workers N       Worker threads (default: number of CPUs)");
    println!("  --queue-depth N   Pending-job queue depth");
    println!("  --tick-ms N       Scheduler tick interval in milliseconds");
    println!("  --verbose         Enable debug logging");
    println!("  --help            Show this help message");
    println!("  --version         Show version information");
    println!();
    println!("Examples:");
    println!("  flowline catalog.yaml");
    println!("  flowline catalog.yaml --check");
    println!("  flowline catalog.yaml --max-lines 4 --workers 8");
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut positional_index = 0;
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--check" => {
                config.check = true;
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--max-lines" => {
                i += 1;
                config.max_lines = Some(numeric_value(args, i, "--max-lines")?);
            }
            "--workers" => {
                i += 1;
                config.workers = Some(numeric_value(args, i, "--workers")?);
            }
            "--queue-depth" => {
                i += 1;
                config.queue_depth = Some(numeric_value(args, i, "--queue-depth")?);
            }
            "--tick-ms" => {
                i += 1;
                config.tick_ms = Some(numeric_value(args, i, "--tick-ms")?);
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                // Positional argument
                match positional_index {
                    0 => config.catalog_path = arg.clone(),
                    _ => return Err(format!("Unexpected argument: {}", arg)),
                }
                positional_index += 1;
            }
        }
        i += 1;
    }

    Ok(config)
}

fn numeric_value<T: std::str::FromStr>(args: &[String], i: usize, flag: &str) -> Result<T, String> {
    if i >= args.len() {
        return Err(format!("{} requires a number argument", flag));
    }
    args[i]
        .parse()
        .map_err(|_| format!("Invalid {} value: {}", flag, args[i]))
}

/// Applies command-line overrides on top of the catalog's settings.
fn apply_overrides(mut settings: EngineSettings, config: &Config) -> EngineSettings {
    if let Some(max_lines) = config.max_lines {
        settings.max_lines = max_lines;
    }
    if let Some(workers) = config.workers {
        settings.workers = workers;
    }
    if let Some(queue_depth) = config.queue_depth {
        settings.queue_depth = queue_depth;
    }
    if let Some(tick_ms) = config.tick_ms {
        settings.tick_ms = tick_ms;
    }
    settings
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    // Setup logging
    setup_logging(config.verbose);

    // Print banner
    print_banner();

    // Load and resolve the catalog
    let doc = load_catalog(Path::new(&config.catalog_path)).map_err(|e| {
        error!("Failed to load catalog: {}", e);
        format!(
            "Could not load catalog from '{}': {}",
            config.catalog_path, e
        )
    })?;
    let registry = ModuleRegistry::load(&doc, &stock_table())?;
    let catalog = resolve_catalog(&doc, &registry)?;

    // Check mode: print the resolved layout and stop
    if config.check {
        println!("{}", serde_json::to_string_pretty(&catalog.summary())?);
        return Ok(());
    }

    // Run the engine
    let settings = apply_overrides(doc.settings.clone(), &config);
    let mut scheduler = Scheduler::new(catalog, settings);
    scheduler.run()?;

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
