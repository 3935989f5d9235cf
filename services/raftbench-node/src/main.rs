use clap::Parser;
use raftbench_node::{logging::init_logging, Cli, Node};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("raftbench-node: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config.logging);
    info!(
        node = %config.connection_string(),
        data_dir = %config.node.data_dir.display(),
        "Starting raftbench node"
    );

    let node = match Node::prepare(config).await {
        Ok(node) => node,
        Err(e) => {
            error!(error = %e, "Node setup failed");
            std::process::exit(1);
        }
    };

    if let Err(e) = node.run().await {
        error!(error = %e, "Node terminated with error");
        std::process::exit(1);
    }
}
