//! perftail CLI entry point.

use perftail_lib::cli::{self, Cli};
use perftail_lib::core::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli::execute(cli).await
}
