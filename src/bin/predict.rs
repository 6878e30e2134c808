use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tcts_forecast::{CsvDataset, Tcts, TctsConfig};

#[derive(Parser, Debug)]
#[command(name = "predict")]
#[command(about = "Score the test split with a trained TCTS forecaster")]
struct Cli {
    /// Checkpoint base path used during training (without the _fore_model.bin suffix)
    #[arg(short, long)]
    model_path: PathBuf,

    /// JSON config the model was trained with
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding test.csv
    #[arg(long)]
    data_dir: PathBuf,

    #[arg(short, long, default_value = "predictions.csv")]
    out: PathBuf,

    /// Use GPU if available
    #[arg(long)]
    use_gpu: bool,
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

    println!("Loading model from {}...", cli.model_path.display());
    let model = Tcts::from_checkpoint(config, &cli.model_path)?;
    println!("✓ Model loaded on {:?}", model.device());

    let preds = model.predict(&CsvDataset::new(&cli.data_dir))?;

    let mut wtr = csv::Writer::from_path(&cli.out)?;
    wtr.write_record(["index", "score"])?;
    for (key, score) in preds.iter() {
        wtr.write_record([key, score.to_string().as_str()])?;
    }
    wtr.flush()?;
    println!("✓ Wrote {} predictions to {}", preds.len(), cli.out.display());

    Ok(())
}
