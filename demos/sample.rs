//! Sample From a Trained Model
//!
//! Loads a checkpoint that carries its vocabulary and prints generated text.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --example sample -- --checkpoint data/lstm_*/checkpoint_final.ckpt
//! cargo run --release --example sample -- --checkpoint model.ckpt --prime "ROMEO:" --length 500
//! ```

use char_lstm::{Checkpoint, LstmState};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sample", about = "Generate text from an LSTM checkpoint")]
struct Args {
    #[arg(long)]
    checkpoint: PathBuf,

    /// Text fed through the model before sampling; its last character seeds generation
    #[arg(long, default_value = "\n")]
    prime: String,

    /// Number of characters to generate
    #[arg(long, default_value = "1000")]
    length: usize,

    /// Random seed (omit for a fresh sample each run)
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let checkpoint = Checkpoint::load(&args.checkpoint)?;
    let vocab = checkpoint
        .vocab
        .ok_or("checkpoint does not contain a vocabulary")?;
    let model = checkpoint.model;
    let hidden = model.config().hidden_size;

    let prime = vocab.encode(&args.prime)?;
    let (&seed, context) = prime.split_last().ok_or("--prime must not be empty")?;

    // Warm the state on every primed character but the last
    let state = if context.is_empty() {
        LstmState::zeros(hidden, 1)
    } else {
        let inputs: Vec<Vec<usize>> = context.iter().map(|&id| vec![id]).collect();
        let targets: Vec<Vec<usize>> = prime[1..].iter().map(|&id| vec![id]).collect();
        let (_, _, state) = model.forward(&inputs, &targets, LstmState::zeros(hidden, 1));
        state
    };

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let ids = model.sample(&state, seed, args.length, &mut rng);

    print!("{}", args.prime);
    println!("{}", vocab.decode(&ids));
    Ok(())
}
