//! Character-Level LSTM Training
//!
//! Trains the LSTM on any plain-text corpus, printing progress and samples
//! and writing a CSV log, prediction snapshots and checkpoints into a
//! timestamped run directory.
//!
//! ## Usage
//!
//! ```bash
//! # Default hyperparameters (seq 128, batch 8, hidden 128, 5000 updates)
//! cargo run --release --example train -- --data shakespeare.txt
//!
//! # Quick smoke run
//! cargo run --release --example train -- --data shakespeare.txt --preset tiny
//!
//! # Override anything
//! cargo run --release --example train -- --hidden 256 --seq 64 --updates 20000
//!
//! # Resume a run
//! cargo run --release --example train -- --resume data/lstm_*/checkpoint_final.ckpt --updates 10000
//! ```

use char_lstm::{
    CharLstm, CharStream, CharVocab, Checkpoint, Config, Trainer, TrainingConfig, TrainingLogger,
};
use clap::{Parser, ValueEnum};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Preset {
    /// Reference hyperparameters
    Default,
    /// Small model, short run
    Tiny,
}

#[derive(Parser)]
#[command(name = "train", about = "Train a character-level LSTM")]
struct Args {
    /// Path to training text file
    #[arg(long, default_value = "input.txt")]
    data: PathBuf,

    #[arg(long, value_enum, default_value = "default")]
    preset: Preset,

    /// Embedding width
    #[arg(long)]
    emb: Option<usize>,

    /// Hidden and cell state width
    #[arg(long)]
    hidden: Option<usize>,

    /// Truncated BPTT window length
    #[arg(long)]
    seq: Option<usize>,

    #[arg(long)]
    batch: Option<usize>,

    /// Adagrad learning rate
    #[arg(long)]
    lr: Option<f64>,

    /// Total number of updates
    #[arg(long)]
    updates: Option<usize>,

    /// Std of the Gaussian weight initialization
    #[arg(long, default_value = "0.1")]
    init_std: f64,

    /// Disable element-wise gradient clipping
    #[arg(long)]
    no_clip: bool,

    /// Seed for initialization and sampling
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Resume from a checkpoint (model, optimizer, cursor, vocabulary)
    #[arg(long)]
    resume: Option<PathBuf>,

    /// Parent directory for run outputs
    #[arg(long, default_value = "data")]
    out: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let (model_template, mut train_config) = match args.preset {
        Preset::Default => (Config::new(0), TrainingConfig::default()),
        Preset::Tiny => (Config::tiny(0), TrainingConfig::tiny()),
    };
    train_config.seq_length = args.seq.unwrap_or(train_config.seq_length);
    train_config.batch_size = args.batch.unwrap_or(train_config.batch_size);
    train_config.learning_rate = args.lr.unwrap_or(train_config.learning_rate);
    train_config.max_updates = args.updates.unwrap_or(train_config.max_updates);
    train_config.clip_gradients = !args.no_clip;
    train_config.validate()?;

    println!("\n{}", "=".repeat(70));
    println!("  Character-level LSTM training");
    println!("{}", "=".repeat(70));

    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    let run_dir = args.out.join(format!("lstm_{}", timestamp));
    fs::create_dir_all(&run_dir)?;
    println!("Output directory: {}/\n", run_dir.display());

    // ========================================================================
    // 1. Data
    // ========================================================================
    let text = fs::read_to_string(&args.data)
        .map_err(|e| format!("cannot read {}: {}", args.data.display(), e))?;

    let checkpoint = args.resume.as_ref().map(Checkpoint::load).transpose()?;
    let vocab = match checkpoint.as_ref().and_then(|c| c.vocab.clone()) {
        Some(vocab) => vocab,
        None => CharVocab::from_text(&text)?,
    };
    let ids = vocab.encode(&text)?;
    println!(
        "data has {} characters, {} unique.",
        ids.len(),
        vocab.vocab_size()
    );
    vocab.save(run_dir.join("vocab.json"))?;

    let stream = CharStream::new(&ids, train_config.batch_size, train_config.seq_length)?;
    println!(
        "stream: {} × {} (batch × columns)",
        stream.batch_size(),
        stream.columns()
    );

    // ========================================================================
    // 2. Model
    // ========================================================================
    let mut trainer = match checkpoint {
        Some(checkpoint) => {
            println!("Resuming from iteration {}", checkpoint.iteration);
            Trainer::from_checkpoint(checkpoint, stream, train_config.clone())?
        }
        None => {
            let config = Config {
                vocab_size: vocab.vocab_size(),
                emb_size: args.emb.unwrap_or(model_template.emb_size),
                hidden_size: args.hidden.unwrap_or(model_template.hidden_size),
                init_std: args.init_std,
            };
            let model = CharLstm::with_seed(&config, args.seed)?;
            Trainer::new(model, stream, train_config.clone())?
        }
    };

    let config = trainer.model().config().clone();
    println!("  Vocabulary: {}", config.vocab_size);
    println!("  Embedding:  {}", config.emb_size);
    println!("  Hidden:     {}", config.hidden_size);
    println!("  Parameters: {}", trainer.model().num_parameters());
    println!("  Seq length: {}", train_config.seq_length);
    println!("  Batch size: {}", train_config.batch_size);
    println!("  LR:         {}", train_config.learning_rate);
    println!("  Updates:    {}", train_config.max_updates);
    println!();

    // ========================================================================
    // 3. Train
    // ========================================================================
    let mut logger = TrainingLogger::new(run_dir.join("training_log.csv"))?;
    let mut rng = StdRng::seed_from_u64(args.seed);
    trainer.run(&vocab, &mut logger, &mut rng, &run_dir)?;

    println!("\nTraining complete. Output: {}/", run_dir.display());
    Ok(())
}
