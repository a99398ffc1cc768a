//! Counts the words of every file below a directory.
//!
//! ```text
//! cargo run --example word_count -- [config.json]
//! ```
//!
//! Without a config file the defaults apply: `resources/sherlock-holmes`, one
//! source, five splitters and three counters.

use tupleweave::config::WordCountConfig;
use tupleweave::{logging, word_count};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  let config = match std::env::args().nth(1) {
    Some(path) => WordCountConfig::from_file(path)?,
    None => WordCountConfig::default(),
  };
  logging::init(config.runtime.debug);

  let topology = word_count::topology(&config)?;
  let output = topology.run().await;

  for (word, count) in word_count::final_counts(&output.records) {
    println!("{word}: {count}");
  }

  for stage in &output.report.stages {
    eprintln!(
      "{} x{}: received {}, emitted {}, failed {}",
      stage.name, stage.parallelism, stage.received, stage.emitted, stage.failed
    );
  }
  for failure in &output.report.failures {
    eprintln!("failure: {failure}");
  }

  Ok(())
}
