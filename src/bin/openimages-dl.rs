//! openimages-dl CLI Tool
//!
//! Command-line interface for bulk-downloading CSV image datasets.

#[cfg(feature = "cli")]
use openimages_dl::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Please rebuild with --features cli");
    std::process::exit(1);
}
