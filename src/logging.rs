//! Subscriber setup for binaries and demos.

use tracing::Level;

/// Installs a global fmt subscriber.
///
/// With `debug` the max level is `TRACE`, which surfaces per-record emission
/// logs; otherwise `INFO`. Calling this twice is harmless.
pub fn init(debug: bool) {
  let level = if debug { Level::TRACE } else { Level::INFO };
  let _ = tracing_subscriber::fmt()
    .with_max_level(level)
    .with_target(false)
    .try_init();
}
