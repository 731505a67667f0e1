//! Gradient Check
//!
//! Compares the analytic gradients from backpropagation through time with
//! central finite differences on a small model, parameter by parameter.
//!
//! ## Usage
//!
//! ```bash
//! # Synthetic data, vocab 5, hidden 4, emb 4, seq 3, batch 2
//! cargo run --release --example gradcheck
//!
//! # First window of a real corpus
//! cargo run --release --example gradcheck -- --data shakespeare.txt --hidden 8 --seq 5
//! ```

use char_lstm::gradcheck::{grad_check_all, DEFAULT_DELTA};
use char_lstm::{CharLstm, CharStream, CharVocab, Config, LstmState};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gradcheck", about = "Verify LSTM gradients numerically")]
struct Args {
    /// Text file to draw the window from (synthetic ids if omitted)
    #[arg(long)]
    data: Option<PathBuf>,

    /// Vocabulary size for synthetic data
    #[arg(long, default_value = "5")]
    vocab: usize,

    #[arg(long, default_value = "4")]
    emb: usize,

    #[arg(long, default_value = "4")]
    hidden: usize,

    #[arg(long, default_value = "3")]
    seq: usize,

    #[arg(long, default_value = "2")]
    batch: usize,

    /// Finite-difference step
    #[arg(long, default_value_t = DEFAULT_DELTA)]
    delta: f64,

    #[arg(long, default_value = "0.1")]
    init_std: f64,

    #[arg(long, default_value = "42")]
    seed: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let (vocab_size, ids) = match &args.data {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            let vocab = CharVocab::from_text(&text)?;
            (vocab.vocab_size(), vocab.encode(&text)?)
        }
        None => {
            let len = (args.seq + 2) * args.batch * 4;
            let ids = (0..len).map(|i| (i * 7 + i / 3) % args.vocab).collect();
            (args.vocab, ids)
        }
    };

    let mut stream = CharStream::new(&ids, args.batch, args.seq)?;
    let window = stream.next_window();

    let config = Config {
        vocab_size,
        emb_size: args.emb,
        hidden_size: args.hidden,
        init_std: args.init_std,
    };
    let mut model = CharLstm::with_seed(&config, args.seed)?;
    println!(
        "Checking {} parameters (vocab {}, emb {}, hidden {}, seq {}, batch {})\n",
        model.num_parameters(),
        vocab_size,
        args.emb,
        args.hidden,
        args.seq,
        args.batch
    );

    let state = LstmState::zeros(args.hidden, args.batch);
    let reports = grad_check_all(&mut model, &window.inputs, &window.targets, &state, args.delta);

    let mut total = 0;
    let mut flagged = 0;
    for report in &reports {
        report.print();
        println!();
        total += report.num_elements;
        flagged += report.flagged.len();
    }

    let pass = 1.0 - flagged as f64 / total as f64;
    println!(
        "{} of {} elements within tolerance ({:.2}%)",
        total - flagged,
        total,
        pass * 100.0
    );
    if pass < 0.99 {
        return Err(format!("gradient check failed: {} elements flagged", flagged).into());
    }
    Ok(())
}
