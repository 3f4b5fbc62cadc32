//! daisybook - DAISY 3 talking book exporter

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use daisybook::export::{CopyAudio, OpfManifest, PassthroughAudio};
use daisybook::model::json::read_presentation;
use daisybook::smil::ClockValue;
use daisybook::{DaisyConfig, DaisyExporter, ExportEvent, ExportOutcome};

#[derive(Parser)]
#[command(name = "daisybook")]
#[command(version, about = "DAISY 3 talking book exporter", long_about = None)]
#[command(after_help = "EXAMPLES:
    daisybook book.json out/                    Export into out/
    daisybook book.json out/ --audio-dir audio  Copy narration from audio/
    daisybook book.json out/ --package --info   Zip the result, print a summary")]
struct Cli {
    /// Input presentation (JSON)
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output directory
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// Copy audio from this directory into the output
    #[arg(long, value_name = "DIR")]
    audio_dir: Option<PathBuf>,

    /// Keep notes and annotations in document order
    #[arg(long)]
    no_expand: bool,

    /// Zip the output directory when done
    #[arg(short, long)]
    package: bool,

    /// Print the export summary as JSON
    #[arg(short, long)]
    info: bool,

    /// Suppress output messages
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match export(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn export(cli: &Cli) -> daisybook::Result<()> {
    let mut book = read_presentation(&cli.input)?;
    let config = DaisyConfig {
        expand_references: !cli.no_expand,
        package: cli.package,
        ..DaisyConfig::default()
    };
    let exporter = DaisyExporter::new().with_config(config);
    let quiet = cli.quiet;
    let mut progress = |event: &ExportEvent| {
        if !quiet && let ExportEvent::PartitionWritten { file, .. } = event {
            println!("Wrote {file}");
        }
    };

    let mut manifest = OpfManifest::new(exporter.config().opf_file_name.as_str());
    let outcome = match &cli.audio_dir {
        Some(dir) => exporter.export_with(
            &mut book,
            &cli.output,
            &mut CopyAudio::new(dir),
            &mut manifest,
            &mut progress,
        )?,
        None => exporter.export_with(
            &mut book,
            &cli.output,
            &mut PassthroughAudio,
            &mut manifest,
            &mut progress,
        )?,
    };

    match outcome {
        ExportOutcome::Completed(summary) => {
            if cli.info {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else if !cli.quiet {
                report(&cli.output, summary.sync_files.len(), summary.total_duration);
            }
        }
        ExportOutcome::Cancelled => eprintln!("export cancelled"),
    }
    Ok(())
}

fn report(output: &Path, sync_files: usize, total_duration: u64) {
    println!(
        "Exported {} sync files ({}) to {}",
        sync_files,
        ClockValue(total_duration),
        output.display()
    );
}
