use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use grblink::{
    connect, init_logging, Axis, AxisPosition, Config, GrblController, HomingMode,
    MetadataRecord,
};

/// Talk to a GRBL motion controller
#[derive(Parser)]
#[command(name = "grblink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML or JSON); defaults to the user config directory
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Serial port, or "mock" for the simulator. Overrides GRBL_PORT.
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// More log output (repeat for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query and print the controller status
    Status,

    /// Home the machine
    Home {
        /// Home even if the controller already reports Idle
        #[arg(short, long)]
        force: bool,
    },

    /// Move to a position, or by a delta with --relative
    Move {
        #[arg(short)]
        x: Option<f64>,
        #[arg(short)]
        y: Option<f64>,
        #[arg(short)]
        z: Option<f64>,

        /// Interpret the coordinates as a delta
        #[arg(short, long)]
        relative: bool,

        /// Feed rate in mm/min; defaults to motion.feed_rate
        #[arg(short, long)]
        feed: Option<u32>,
    },

    /// Clear an alarm lock
    Unlock,

    /// Read the identity metadata stored on the controller
    ReadMeta,

    /// Store identity metadata on the controller
    WriteMeta {
        /// Serial number, up to six ASCII characters
        #[arg(short, long)]
        serial: String,

        /// Model, up to six ASCII characters
        #[arg(short, long)]
        model: String,
    },

    /// Print the firmware settings ($$)
    Settings,

    /// Print build info ($I) and startup blocks ($N)
    Info,

    /// Print the effective configuration
    ShowConfig,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => Config::default_path()?,
    };
    let mut config = Config::load_or_default(&path)
        .with_context(|| format!("loading {}", path.display()))?;
    config.apply_process_env()?;
    if let Some(port) = &cli.port {
        config.connection.port = Some(port.clone());
    }
    config.logging.verbosity = config.logging.verbosity.max(cli.verbose);
    config.validate()?;
    Ok(config)
}

fn target(x: Option<f64>, y: Option<f64>, z: Option<f64>) -> Result<AxisPosition> {
    let pos: AxisPosition = [(Axis::X, x), (Axis::Y, y), (Axis::Z, z)]
        .into_iter()
        .filter_map(|(axis, v)| v.map(|v| (axis, v)))
        .collect();
    if pos.is_empty() {
        anyhow::bail!("give at least one of -x, -y, -z");
    }
    Ok(pos)
}

fn run(controller: &GrblController, config: &Config, command: Commands, json: bool) -> Result<()> {
    match command {
        Commands::Status => {
            let status = controller.qstatus()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("{}", status);
            }
        }
        Commands::Home { force } => {
            let mode = HomingMode {
                lazy: !force,
                force,
            };
            let outcome = controller.home(mode)?;
            println!("{:?}", outcome);
        }
        Commands::Move {
            x,
            y,
            z,
            relative,
            feed,
        } => {
            let pos = target(x, y, z)?;
            let feed = feed.unwrap_or(config.motion.feed_rate);
            if relative {
                controller.move_relative(&pos, feed, true)?;
            } else {
                controller.move_absolute(&pos, feed, true)?;
            }
            println!("{}", controller.mpos()?);
        }
        Commands::Unlock => {
            controller.unlock()?;
            println!("unlocked");
        }
        Commands::ReadMeta => match controller.read_metadata()? {
            Some(record) if json => println!("{}", serde_json::to_string_pretty(&record)?),
            Some(record) => println!("{}", record),
            None => println!("no metadata stored"),
        },
        Commands::WriteMeta { serial, model } => {
            let record = MetadataRecord::new(serial, model);
            controller.write_metadata(&record)?;
            let stored = controller.require_metadata()?;
            println!("{}", stored);
        }
        Commands::Settings => {
            let settings = controller.settings()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&settings)?);
            } else {
                for setting in settings.iter() {
                    match &setting.description {
                        Some(desc) => println!("${}={} ({})", setting.number, setting.value, desc),
                        None => println!("${}={}", setting.number, setting.value),
                    }
                }
            }
        }
        Commands::Info => {
            let info = controller.build_info()?;
            let startup = controller.startup_lines()?;
            if json {
                let report = serde_json::json!({ "build": info, "startup": startup });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("version: {}", info.version);
                for option in &info.options {
                    println!("  {} {}", option.code, option.name.as_deref().unwrap_or("?"));
                }
                for line in &startup {
                    println!("$N{}={}", line.index, line.block);
                }
            }
        }
        Commands::ShowConfig => print_config(config)?,
    }
    Ok(())
}

fn print_config(config: &Config) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(&cli)?;
    if cli.json {
        config.logging.json = true;
    }
    init_logging(&config.logging)?;
    tracing::debug!(version = grblink::VERSION, built = grblink::BUILD_DATE, "grblink starting");

    // No controller needed
    if let Commands::ShowConfig = cli.command {
        return print_config(&config);
    }

    let controller = connect(&config)?;
    let result = run(&controller, &config, cli.command, cli.json);
    controller.close()?;
    result
}
