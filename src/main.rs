//! AlexNet fine-tuning CLI
//!
//! Entry point for preparing a Tiny-ImageNet style dataset, fine-tuning the
//! classifier head of a pretrained AlexNet and inspecting saved checkpoints.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use alexnet_finetune::backend::{backend_name, default_device, TrainingBackend};
use alexnet_finetune::dataset::prepare_validation_split;
use alexnet_finetune::training::{run_finetune, CheckpointManager, FinetuneOptions, TrainingConfig};
use alexnet_finetune::utils::logging::{init_logging, LogConfig};

/// Fine-tune a pretrained AlexNet on Tiny-ImageNet with Burn
///
/// Without a subcommand the top-level flags run `train`.
#[derive(Parser, Debug)]
#[command(name = "alexnet_finetune")]
#[command(version)]
#[command(about = "Fine-tune the classifier head of a pretrained AlexNet", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    train: TrainArgs,
}

#[derive(Args, Debug, Clone)]
struct TrainArgs {
    /// Dataset root (train/, val/, words.txt)
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Directory for checkpoint.pth.tar and alexnet_model.pth.tar
    #[arg(short, long)]
    save: Option<PathBuf>,

    /// Pretrained AlexNet weights (.pth state dict or burn record)
    #[arg(short, long)]
    pretrained: Option<PathBuf>,

    /// JSON training configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Total number of epochs (overrides the config file)
    #[arg(short, long)]
    epochs: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Prepare the data and train, resuming from the latest checkpoint
    Train(TrainArgs),

    /// File validation images into per-class folders
    Prepare {
        /// Dataset root
        #[arg(short, long)]
        data: PathBuf,
    },

    /// Print the metadata of a saved checkpoint
    Inspect {
        /// Directory holding the checkpoint files
        #[arg(short, long)]
        save: PathBuf,

        /// Read the best model file instead of the latest checkpoint
        #[arg(long, default_value = "false")]
        best: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Train(cli.train));

    let verbose = matches!(&command, Commands::Train(args) if args.verbose);
    let log_config = if verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    init_logging(&log_config).map_err(anyhow::Error::msg)?;

    match command {
        Commands::Train(args) => cmd_train(args),
        Commands::Prepare { data } => cmd_prepare(&data),
        Commands::Inspect { save, best } => cmd_inspect(&save, best),
    }
}

fn cmd_train(args: TrainArgs) -> Result<()> {
    let data_dir = args.data.context("--data is required for training")?;
    let save_dir = args.save.context("--save is required for training")?;

    let mut config = match args.config.as_deref() {
        Some(path) => TrainingConfig::from_file(path)
            .with_context(|| format!("failed to read config {:?}", path))?,
        None => TrainingConfig::default(),
    };
    if let Some(epochs) = args.epochs {
        config = config.with_epochs(epochs);
    }
    config.validate()?;

    println!("{}", "AlexNet Fine-Tuning".green().bold());
    println!("  Backend:       {}", backend_name());
    println!("  Data:          {:?}", data_dir);
    println!("  Save:          {:?}", save_dir);
    println!("  Epochs:        {}", config.epochs);
    println!("  Batch size:    {} / {}", config.train_batch_size, config.val_batch_size);
    println!("  Learning rate: {}", config.learning_rate);
    println!();

    let options = FinetuneOptions {
        data_dir,
        save_dir,
        pretrained: args.pretrained,
        config,
    };
    let outcome = run_finetune::<TrainingBackend>(&options, default_device())?;

    info!(
        "Run finished: {} epochs, best accuracy {:.2}, improved at {:?}",
        outcome.epochs_run, outcome.best_accuracy, outcome.improved_epochs
    );
    Ok(())
}

fn cmd_prepare(data_dir: &Path) -> Result<()> {
    let report = prepare_validation_split(data_dir)
        .with_context(|| format!("failed to prepare {:?}", data_dir))?;

    println!("{}", "Validation split prepared".green().bold());
    println!("  Moved:            {}", report.moved);
    println!("  Already in place: {}", report.skipped);
    println!("  Classes:          {}", report.classes);
    Ok(())
}

fn cmd_inspect(save_dir: &Path, best: bool) -> Result<()> {
    let manager = CheckpointManager::new(save_dir);
    let meta = manager
        .load_meta(best)
        .with_context(|| format!("no checkpoint found under {:?}", save_dir))?;

    let title = if best { "Best model" } else { "Latest checkpoint" };
    println!("{}", title.cyan().bold());
    println!("  Epoch:          {}", meta.epoch);
    println!("  Best accuracy:  {:.2}", meta.best_accuracy);
    println!("  Written:        {}", meta.timestamp);
    println!("  Classes:        {}", meta.class_names.len());
    for (index, class) in meta.class_names.iter().enumerate() {
        let label = meta.class_labels.get(class).map(String::as_str).unwrap_or("-");
        println!("    {:>3}  {}  {}", index, class, label);
    }
    Ok(())
}
