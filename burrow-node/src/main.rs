use burrow_node::cli;
use clap::Parser;

fn main() {
    let cli = cli::Cli::parse();

    let rt = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");
    rt.block_on(async {
        if let Err(e) = cli::run(cli).await {
            tracing::error!("Fatal error: {}", e);
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    });
}
