//! Text file source for reading lines from a set of files.
//!
//! This module provides [`TextSource`], a source that reads every file of a
//! set, line by line, and emits one `["line"]` record per line. Files are
//! drained in lexicographic path order and an exhausted file is never
//! reopened.
//!
//! # Key Concepts
//!
//! - **Pull-Driven**: each [`Source::next`] call yields at most one line
//! - **Async I/O**: files are read with Tokio's buffered async reader
//! - **Partitioned Input**: with parallelism `p`, instance `i` reads the files
//!   whose sorted position is `i` modulo `p`, so each file is read once
//! - **Error Isolation**: a file that cannot be opened or read is reported as
//!   [`StageError::SourceRead`], treated as exhausted, and the source moves on
//!
//! # Example
//!
//! ```rust
//! use tupleweave::stages::TextSource;
//! use tupleweave::topology::TopologyBuilder;
//!
//! let mut builder = TopologyBuilder::new("books");
//! builder.set_source("text", 2, |ctx| TextSource::for_instance("/data/books", ctx));
//! ```

use crate::error::StageError;
use crate::files::list_files;
use crate::record::{Schema, Value, ValueKind};
use crate::stage::{InstanceContext, Source, SourceEvent};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::debug;

/// Name of the single field emitted by line sources.
pub const LINE_FIELD: &str = "line";

/// A source that emits every line of a set of files.
pub struct TextSource {
  files: VecDeque<PathBuf>,
  pending_errors: VecDeque<StageError>,
  current: Option<(PathBuf, Lines<BufReader<File>>)>,
}

impl TextSource {
  /// Creates a source over explicit files, read in sorted order.
  pub fn new(files: impl IntoIterator<Item = PathBuf>) -> Self {
    let mut files: Vec<PathBuf> = files.into_iter().collect();
    files.sort();
    Self {
      files: files.into(),
      pending_errors: VecDeque::new(),
      current: None,
    }
  }

  /// Creates a source over every regular file below `root`.
  ///
  /// Listing failures are emitted as failures before the first line.
  pub fn from_root(root: impl AsRef<Path>) -> Self {
    let listing = list_files(root);
    let mut source = Self::new(listing.files);
    source.pending_errors = listing.errors.into();
    source
  }

  /// Creates the share of `root` read by one instance of a parallel source.
  ///
  /// Listing failures are reported by instance 0 only.
  pub fn for_instance(root: impl AsRef<Path>, ctx: &InstanceContext) -> Self {
    let listing = list_files(root);
    let parallelism = ctx.parallelism().max(1);
    let files = listing
      .files
      .into_iter()
      .enumerate()
      .filter(|(position, _)| position % parallelism == ctx.index())
      .map(|(_, path)| path);
    let mut source = Self::new(files);
    if ctx.index() == 0 {
      source.pending_errors = listing.errors.into();
    }
    source
  }

  /// Files not yet opened.
  pub fn remaining_files(&self) -> impl Iterator<Item = &Path> {
    self.files.iter().map(PathBuf::as_path)
  }
}

#[async_trait]
impl Source for TextSource {
  fn output_schema(&self) -> Schema {
    Schema::typed([(LINE_FIELD, ValueKind::Str)])
  }

  async fn next(&mut self) -> SourceEvent {
    if let Some(err) = self.pending_errors.pop_front() {
      return SourceEvent::Failed(err);
    }

    loop {
      if let Some((path, lines)) = self.current.as_mut() {
        match lines.next_line().await {
          Ok(Some(line)) => return SourceEvent::Emit(vec![Value::from(line)]),
          Ok(None) => {
            debug!(path = %path.display(), "file exhausted");
            self.current = None;
          }
          Err(source) => {
            let path = path.clone();
            self.current = None;
            return SourceEvent::Failed(StageError::SourceRead { path, source });
          }
        }
        continue;
      }

      // Popped only once opened, so a cancelled open is retried on the next call.
      let Some(path) = self.files.front().cloned() else {
        return SourceEvent::Done;
      };
      let opened = File::open(&path).await;
      self.files.pop_front();
      match opened {
        Ok(file) => {
          debug!(path = %path.display(), "reading file");
          self.current = Some((path, BufReader::new(file).lines()));
        }
        Err(source) => return SourceEvent::Failed(StageError::SourceRead { path, source }),
      }
    }
  }
}
