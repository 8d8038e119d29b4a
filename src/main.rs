//! volume-sequence CLI
//!
//! Usage:
//!   volume-sequence stats --intensity <DIR> --label <DIR>   Label statistics per frame
//!   volume-sequence info <DIR>                              Show sequence information

use std::{error::Error, path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use volume_sequence::{
    CancellationToken, FrameLoader, IndexSource, LabelStatisticsOperation, SequenceInput,
    SequenceProcessor, SortBy, StatisticsTable, config::FileConfig, logging::init_logging,
};

#[derive(Parser)]
#[command(
    name = "volume-sequence",
    about = "Per-frame processing of volume sequences",
    version,
    author
)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute label statistics for every frame of a sequence
    Stats {
        /// Directory holding one series directory per frame
        #[arg(long)]
        intensity: PathBuf,

        /// Directory holding the label series
        #[arg(long)]
        label: PathBuf,

        /// CSV file to write; printed to stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Where frame index values come from
        #[arg(long, value_enum, default_value = "ordinal")]
        index: IndexArg,

        /// Also print the chart series of one metric (e.g. "Mean")
        #[arg(long)]
        series: Option<String>,
    },

    /// Show the frames and index values of a sequence
    Info {
        /// Directory holding one series directory per frame
        path: PathBuf,

        /// Where frame index values come from
        #[arg(long, value_enum, default_value = "ordinal")]
        index: IndexArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum IndexArg {
    Ordinal,
    TriggerTime,
    TemporalPosition,
}

impl From<IndexArg> for IndexSource {
    fn from(value: IndexArg) -> Self {
        match value {
            IndexArg::Ordinal => IndexSource::Ordinal,
            IndexArg::TriggerTime => IndexSource::TriggerTime,
            IndexArg::TemporalPosition => IndexSource::TemporalPosition,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match FileConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::FAILURE;
            }
        },
        None => FileConfig::default(),
    };
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    init_logging(&config.logging);

    match run(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands, config: &FileConfig) -> Result<(), Box<dyn Error>> {
    match command {
        Commands::Stats {
            intensity,
            label,
            output,
            index,
            series,
        } => {
            let sequence = FrameLoader::load_sequence_from_directories(
                &intensity,
                SortBy::ImagePositionPatient,
                index.into(),
            )?;
            let label = FrameLoader::load_from_directory(&label, SortBy::ImagePositionPatient)?;

            let token = CancellationToken::new();
            let handler_token = token.clone();
            if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
                warn!("could not install Ctrl-C handler: {e}");
            }

            let mut operation = LabelStatisticsOperation::new(SequenceInput::SingleFrame(&label))
                .with_config(&config.statistics);
            let mut table = StatisticsTable::label_statistics();
            let report = SequenceProcessor::new()
                .with_cancellation(token)
                .run(&sequence, &mut operation, &mut table)?;

            for diagnostic in &report.diagnostics {
                warn!("{diagnostic}");
            }
            info!(selected_label = ?operation.selected_label(), "{report}");

            match output {
                Some(path) => {
                    table.save(&path)?;
                    info!(path = %path.display(), rows = table.len(), "statistics written");
                }
                None => print!("{}", table.to_csv()),
            }

            if let Some(key) = series {
                for (x, y) in config.statistics.series(&table, &key)? {
                    println!("{x}\t{y}");
                }
            }
        }
        Commands::Info { path, index } => {
            let sequence = FrameLoader::load_sequence_from_directories(
                &path,
                SortBy::ImagePositionPatient,
                index.into(),
            )?;
            let metadata = sequence.index();
            println!(
                "{} frames, index \"{}\" [{}]",
                sequence.len(),
                metadata.name,
                metadata.unit
            );
            for (index_value, frame) in sequence.iter() {
                let (min, max) = frame.scalar_range().unwrap_or((0.0, 0.0));
                println!(
                    "{index_value}: extent {:?}, spacing {:?}, range [{min}, {max}]",
                    frame.extent(),
                    frame.spacing()
                );
            }
        }
    }
    Ok(())
}
