//! Built-in stages for line-oriented text processing.

mod counter;
mod lines_source;
mod splitter;
mod text_source;

pub use counter::{COUNT_FIELD, WordCounter};
pub use lines_source::LinesSource;
pub use splitter::{WORD_FIELD, WordSplitter};
pub use text_source::{LINE_FIELD, TextSource};
