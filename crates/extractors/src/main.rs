// zone-extractors - zone compiler tools
// Consolidated entrypoint for:
// - azone: collision geometry compiler (`<zone>.map`)
// - awater: water/region classifier (`<zone>.wtr`)
// - pfs: archive maintenance (add/update/delete/extract/list)

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use zone_extractors::map;
use zone_extractors::pfs::{extract_path, Archive};
use zone_extractors::water;
use zone_shared::config::get_config;
use zone_shared::log::{initialize_logging, map_log_level};
use zone_shared::{basic_log, error_log};

const DEFAULT_CONFIG_FILE: &str = "zone-extractors.conf";
const CONFIG_ENV_PREFIX: &str = "ZoneExtractors_";
const LOG_FILE_NAME: &str = "zone-extractors.log";

#[derive(Parser, Debug)]
#[command(name = "zone-extractors")]
#[command(about = "Zone geometry and water map compiler")]
#[command(version)]
struct Cli {
    /// Console log level override (0=Error, 1=Warn, 2=Info, 3=Debug, 4=Trace)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<i32>,

    /// Configuration file
    #[arg(long = "config", value_name = "FILE")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile zone collision geometry into `<zone>.map`
    Azone(ZoneArgs),
    /// Classify zone water/lava/zone-line regions into `<zone>.wtr`
    Awater(ZoneArgs),
    /// Inspect or edit a PFS archive
    #[command(subcommand)]
    Pfs(PfsCommand),
}

#[derive(Args, Debug)]
struct ZoneArgs {
    /// Zone short names
    #[arg(required = true)]
    zones: Vec<String>,

    /// Directory holding the zone archives (config: InputDir)
    #[arg(short = 'i', long = "input")]
    input_dir: Option<PathBuf>,

    /// Output directory (config: OutputDir)
    #[arg(short = 'o', long = "output")]
    output_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum PfsCommand {
    /// Add or replace files, creating the archive when missing
    Add {
        archive: PathBuf,
        #[arg(required = true)]
        files: Vec<String>,
        /// Directory the files are read from
        #[arg(short = 'i', long = "input", default_value = ".")]
        input_dir: PathBuf,
    },
    /// Replace every entry that also exists in the input directory
    Update {
        archive: PathBuf,
        #[arg(short = 'i', long = "input", default_value = ".")]
        input_dir: PathBuf,
    },
    /// Remove entries
    Delete {
        archive: PathBuf,
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Write entries to disk; no names or `*` extracts everything
    Extract {
        archive: PathBuf,
        names: Vec<String>,
        #[arg(short = 'o', long = "output", default_value = ".")]
        output_dir: PathBuf,
    },
    /// List entries, optionally filtered by extension
    List {
        archive: PathBuf,
        ext: Option<String>,
    },
}

/// Load the config file and start logging. Returns false when an explicitly
/// requested config file could not be read.
fn init_config_and_logging(cli: &Cli) -> bool {
    let config_file = cli.config.as_deref().unwrap_or(DEFAULT_CONFIG_FILE);
    let mut config = get_config().lock();
    let loaded = config.set_source(config_file, CONFIG_ENV_PREFIX);

    let level = cli
        .log_level
        .unwrap_or_else(|| config.get_int_default("LogLevel", 2));
    let logs_dir = config.get_string("LogsDir");
    let logs_dir = (!logs_dir.is_empty()).then_some(logs_dir.as_str());
    initialize_logging(logs_dir, map_log_level(level), Some(LOG_FILE_NAME));

    loaded || cli.config.is_none()
}

fn config_dir(key: &str) -> PathBuf {
    PathBuf::from(get_config().lock().get_string_default(key, "."))
}

fn ensure_dir(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)
            .with_context(|| format!("cannot create {}", path.display()))?;
    }
    Ok(())
}

fn resolve_dirs(args: &ZoneArgs) -> anyhow::Result<(PathBuf, PathBuf)> {
    let input = args.input_dir.clone().unwrap_or_else(|| config_dir("InputDir"));
    let output = args.output_dir.clone().unwrap_or_else(|| config_dir("OutputDir"));
    ensure_dir(&output)?;
    Ok((input, output))
}

fn run_azone(args: ZoneArgs) -> anyhow::Result<()> {
    let (input, output) = resolve_dirs(&args)?;
    tracing::info!("azone: input='{}' output='{}'", input.display(), output.display());

    for zone in &args.zones {
        let path = output.join(format!("{zone}.map"));
        match map::build(&input, zone).and_then(|m| m.write(&path)) {
            Ok(()) => basic_log!("{}: wrote {}", zone, path.display()),
            Err(e) => error_log!("{}: map compile failed: {}", zone, e),
        }
    }
    Ok(())
}

fn run_awater(args: ZoneArgs) -> anyhow::Result<()> {
    let (input, output) = resolve_dirs(&args)?;
    tracing::info!("awater: input='{}' output='{}'", input.display(), output.display());

    for zone in &args.zones {
        let path = output.join(format!("{zone}.wtr"));
        match water::classify(&input, zone).and_then(|w| w.write(&path)) {
            Ok(()) => basic_log!("{}: wrote {}", zone, path.display()),
            Err(e) => error_log!("{}: water classification failed: {}", zone, e),
        }
    }
    Ok(())
}

fn open_archive(path: &Path) -> anyhow::Result<Archive> {
    Archive::open(path).with_context(|| format!("cannot open {}", path.display()))
}

fn run_pfs(command: PfsCommand) -> anyhow::Result<()> {
    match command {
        PfsCommand::Add {
            archive,
            files,
            input_dir,
        } => {
            let mut pfs = match Archive::open(&archive) {
                Ok(pfs) => pfs,
                Err(e) if e.is_not_found() => Archive::new(),
                Err(e) => return Err(e).context(format!("cannot open {}", archive.display())),
            };
            for file in &files {
                let source = input_dir.join(file);
                let data = std::fs::read(&source)
                    .with_context(|| format!("cannot read {}", source.display()))?;
                let name = Path::new(file)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| file.clone());
                pfs.set(&name, &data)?;
                tracing::info!("Added {} ({} bytes)", name, data.len());
            }
            pfs.save(&archive)?;
        }
        PfsCommand::Update { archive, input_dir } => {
            let mut pfs = open_archive(&archive)?;
            let mut updated = 0;
            for name in pfs.list_by_extension("*") {
                let source = input_dir.join(&name);
                if !source.is_file() {
                    continue;
                }
                let data = std::fs::read(&source)
                    .with_context(|| format!("cannot read {}", source.display()))?;
                pfs.set(&name, &data)?;
                updated += 1;
            }
            pfs.save(&archive)?;
            tracing::info!("Updated {} entries in {}", updated, archive.display());
        }
        PfsCommand::Delete { archive, names } => {
            let mut pfs = open_archive(&archive)?;
            for name in &names {
                if !pfs.delete(name) {
                    tracing::warn!("{} is not in {}", name, archive.display());
                }
            }
            pfs.save(&archive)?;
        }
        PfsCommand::Extract {
            archive,
            names,
            output_dir,
        } => {
            let pfs = open_archive(&archive)?;
            ensure_dir(&output_dir)?;
            let names = if names.is_empty() || names.iter().any(|n| n == "*") {
                pfs.list_by_extension("*")
            } else {
                names
            };
            for name in &names {
                let Some(target) = extract_path(&output_dir, name) else {
                    tracing::warn!("Skipping {}: name is not a plain file name", name);
                    continue;
                };
                match pfs.get(name) {
                    Ok(data) => {
                        std::fs::write(&target, data)
                            .with_context(|| format!("cannot write {}", target.display()))?;
                    }
                    Err(e) => tracing::error!("{}: {}", name, e),
                }
            }
        }
        PfsCommand::List { archive, ext } => {
            let pfs = open_archive(&archive)?;
            for name in pfs.list_by_extension(ext.as_deref().unwrap_or("*")) {
                println!("{name}");
            }
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if !init_config_and_logging(&cli) {
        tracing::warn!(
            "Could not read configuration file {}",
            cli.config.as_deref().unwrap_or(DEFAULT_CONFIG_FILE)
        );
    }

    match cli.command {
        Command::Azone(args) => run_azone(args),
        Command::Awater(args) => run_awater(args),
        Command::Pfs(command) => run_pfs(command),
    }
}
