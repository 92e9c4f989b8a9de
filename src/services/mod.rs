//! Services that sit beside the download pipeline

pub mod progress;

pub use progress::{
    create_cli_progress_reporter, ConsoleProgressReporter, NoOpProgressReporter,
    ProgressReporter, ProgressUpdate, RunProgress,
};

#[cfg(feature = "cli")]
pub use progress::BarProgressReporter;
