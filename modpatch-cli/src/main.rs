use clap::Parser;
use std::path::PathBuf;

use modpatch_core::{run, PatcherSettings};

#[derive(Debug, Parser)]
#[command(name = "modpatch", version, about = "Applies a mod's change-set to a game installation")]
struct Args {
    /// Game installation root.
    #[arg(long, required_unless_present = "settings")]
    game: Option<PathBuf>,

    /// Mod folder holding the change-set and the files it ships.
    #[arg(long = "mod", required_unless_present = "settings")]
    mod_path: Option<PathBuf>,

    /// Change-set file name inside the mod folder.
    #[arg(long)]
    changes: Option<String>,

    /// Read all settings from a JSON file instead.
    #[arg(long, value_name = "FILE", conflicts_with_all = ["game", "mod_path"])]
    settings: Option<PathBuf>,

    /// Run every section without writing anything.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    #[arg(long, default_value_t = false)]
    no_install_log: bool,

    /// Log every applied operation.
    #[arg(long, short, default_value_t = false)]
    verbose: bool,

    /// Also append the log to this file.
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Print the run summary as JSON on stdout.
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn setup_logger(verbose: bool, log_file: Option<&PathBuf>) -> Result<(), fern::InitError> {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());
    if let Some(path) = log_file {
        dispatch = dispatch.chain(fern::log_file(path)?);
    }
    dispatch.apply()?;
    Ok(())
}

fn settings_from_args(args: &Args) -> modpatch_core::Result<PatcherSettings> {
    let mut settings = match (&args.settings, &args.game, &args.mod_path) {
        (Some(path), _, _) => PatcherSettings::from_json_file(path)?,
        (None, Some(game), Some(mod_path)) => PatcherSettings::new(game, mod_path),
        _ => {
            return Err(modpatch_core::PatchError::Config(
                "either --settings or both --game and --mod are required".to_string(),
            ))
        }
    };
    if let Some(changes) = &args.changes {
        settings.changes_file = changes.clone();
    }
    if args.dry_run {
        settings.dry_run = true;
    }
    if args.no_install_log {
        settings.write_install_log = false;
    }
    Ok(settings)
}

fn main() {
    let args = Args::parse();

    if let Err(e) = setup_logger(args.verbose, args.log_file.as_ref()) {
        eprintln!("Failed to set up logging: {e}");
        std::process::exit(1);
    }

    let settings = match settings_from_args(&args) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };

    let summary = match run(settings) {
        Ok(summary) => summary,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Failed to serialise summary: {e}"),
        }
    }

    if !summary.succeeded() {
        for failure in &summary.failures {
            eprintln!("Failed: {}", failure.error);
        }
        std::process::exit(2);
    }
}
