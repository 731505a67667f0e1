//! Training Logger
//!
//! Tracks training progress in three places:
//!
//! - **CSV file**: one row per logged iteration, flushed immediately so a
//!   crashed run keeps its history
//! - **Console**: a progress line per logged iteration and a banner around
//!   every generated sample
//! - **Prediction files**: `prediction_iter{N}.txt` snapshots holding the
//!   iteration, smoothed loss and most recent sample text
//!
//! ## Example
//!
//! ```rust,no_run
//! use char_lstm::TrainingLogger;
//!
//! let mut logger = TrainingLogger::new("training_log.csv")?;
//! logger.log(100, 412.7, 51.3, 3.8)?;
//! logger.log_sample("First Citizen:\nBefore we proceed");
//! # Ok::<(), char_lstm::LstmError>(())
//! ```
//!
//! ## CSV Format
//!
//! - `iteration`: Update counter
//! - `elapsed_seconds`: Time since the logger was created
//! - `loss`: Window loss summed over time steps and batch
//! - `smooth_loss`: Exponential moving average of the per-sequence loss
//! - `grad_norm`: L2 norm of the gradients before the update

use crate::error::LstmResult;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

pub struct TrainingLogger {
    log_file: File,
    start_time: Instant,
    last_log_time: Instant,
}

impl TrainingLogger {
    /// Create the CSV file and write its header
    pub fn new<P: AsRef<Path>>(log_path: P) -> LstmResult<Self> {
        let mut log_file = File::create(log_path)?;
        writeln!(log_file, "iteration,elapsed_seconds,loss,smooth_loss,grad_norm")?;

        let now = Instant::now();
        Ok(Self {
            log_file,
            start_time: now,
            last_log_time: now,
        })
    }

    /// Append a CSV row and print a progress line
    ///
    /// The console line reports the smoothed loss, which is far less noisy
    /// than a single window's loss.
    pub fn log(
        &mut self,
        iteration: usize,
        loss: f64,
        smooth_loss: f64,
        grad_norm: f64,
    ) -> LstmResult<()> {
        let elapsed = self.start_time.elapsed().as_secs_f64();

        writeln!(
            self.log_file,
            "{},{:.3},{:.6},{:.6},{:.6}",
            iteration, elapsed, loss, smooth_loss, grad_norm
        )?;
        self.log_file.flush()?;

        let step_time = self.last_log_time.elapsed().as_secs_f64();
        println!(
            "iter {}, loss: {:.6} | grad norm: {:.4} | {:.1}s (+{:.2}s)",
            iteration, smooth_loss, grad_norm, elapsed, step_time
        );

        self.last_log_time = Instant::now();
        Ok(())
    }

    /// Print a generated sample between separator lines
    pub fn log_sample(&self, text: &str) {
        println!("----\n {} \n----", text);
    }

    /// Write `prediction_iter{iteration}.txt` into `dir`
    ///
    /// Creates `dir` if needed and returns the written path.
    pub fn write_prediction<P: AsRef<Path>>(
        &self,
        dir: P,
        iteration: usize,
        smooth_loss: f64,
        sample: &str,
    ) -> LstmResult<PathBuf> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let path = dir.join(format!("prediction_iter{}.txt", iteration));
        let mut file = File::create(&path)?;
        write!(
            file,
            "Prediction iter: {}\nLoss: {}\n\n{}",
            iteration, smooth_loss, sample
        )?;

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_csv_header_and_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");

        let mut logger = TrainingLogger::new(&path).unwrap();
        logger.log(0, 21.97, 21.97, 1.5).unwrap();
        logger.log(20, 18.25, 21.9, 0.75).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "iteration,elapsed_seconds,loss,smooth_loss,grad_norm");

        let row: Vec<&str> = lines[2].split(',').collect();
        assert_eq!(row.len(), 5);
        assert_eq!(row[0], "20");
        assert_eq!(row[2], "18.250000");
        assert_eq!(row[4], "0.750000");
    }

    #[test]
    fn test_write_prediction_creates_directory() {
        let dir = tempdir().unwrap();
        let logger = TrainingLogger::new(dir.path().join("log.csv")).unwrap();
        let predictions = dir.path().join("predictions");

        let path = logger
            .write_prediction(&predictions, 300, 12.5, "hello world")
            .unwrap();

        assert_eq!(path, predictions.join("prediction_iter300.txt"));
        let contents = fs::read_to_string(path).unwrap();
        assert!(contents.starts_with("Prediction iter: 300\nLoss: 12.5"));
        assert!(contents.ends_with("hello world"));
    }

    #[test]
    fn test_unwritable_path_is_an_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("no_such_dir").join("log.csv");
        assert!(TrainingLogger::new(missing).is_err());
    }
}
