use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tcts_forecast::{CsvDataset, DatasetH, Predictions, SyntheticDataset, Tcts, TctsConfig};

#[derive(Parser, Debug)]
#[command(name = "train")]
#[command(about = "Co-train the TCTS forecaster and horizon-weighting network")]
struct Cli {
    /// JSON config; unspecified keys keep their defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding train.csv, valid.csv and test.csv
    #[arg(long, conflicts_with = "synthetic")]
    data_dir: Option<PathBuf>,

    /// Train on generated sine-wave windows with this many training rows
    #[arg(long)]
    synthetic: Option<usize>,

    /// Checkpoint base path (defaults to a fresh temp path)
    #[arg(long)]
    save_path: Option<PathBuf>,

    /// Where to write test-split predictions as CSV
    #[arg(short, long, default_value = "predictions.csv")]
    out: PathBuf,

    /// Use GPU if available
    #[arg(long)]
    use_gpu: bool,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => TctsConfig::from_json_file(path)
            .with_context(|| format!("failed to read config {}", path.display()))?,
        None => TctsConfig::default(),
    };
    if !cli.use_gpu {
        config.gpu = None;
    }
    if let Some(seed) = cli.seed {
        config.seed = Some(seed);
    }
    if let Some(epochs) = cli.epochs {
        config.n_epochs = epochs;
    }
    if let Some(batch_size) = cli.batch_size {
        config.batch_size = batch_size;
    }

    let dataset: Box<dyn DatasetH> = match (&cli.data_dir, cli.synthetic) {
        (Some(dir), _) => Box::new(CsvDataset::new(dir)),
        (None, Some(rows)) => Box::new(
            SyntheticDataset::new(
                config.d_feat as usize,
                config.step_len as usize,
                config.output_dim as usize,
            )
            .with_rows(rows, rows / 2, rows / 2),
        ),
        (None, None) => anyhow::bail!("either --data-dir or --synthetic is required"),
    };

    let mut model = Tcts::new(config)?;
    println!("Training on {:?}...", model.device());
    let report = model.fit(dataset.as_ref(), cli.save_path.as_deref())?;

    println!("\n=== Training Summary ===");
    println!("Epochs run: {}{}", report.epochs_run, if report.stopped_early { " (early stop)" } else { "" });
    println!("Best validation loss: {:.6} @ epoch {}", report.best_loss, report.best_epoch);
    println!("Forecast model: {}", report.checkpoint.fore_model.display());
    println!("Weight model: {}", report.checkpoint.weight_model.display());

    let preds = model.predict(dataset.as_ref())?;
    write_predictions(&cli.out, &preds)?;
    println!("✓ Wrote {} predictions to {}", preds.len(), cli.out.display());

    Ok(())
}

fn write_predictions(path: &Path, preds: &Predictions) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["index", "score"])?;
    for (key, score) in preds.iter() {
        wtr.write_record([key, score.to_string().as_str()])?;
    }
    wtr.flush()?;
    Ok(())
}
