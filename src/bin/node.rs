use clap::Parser;
use tracing_subscriber::EnvFilter;

use bitz_network::server::Node;
use bitz_network::wire::constants::DEFAULT_PORT;

#[derive(Parser)]
#[command(name = "bitz-node", about = "BitMessage network node")]
struct Cli {
    /// TCP port to listen on and advertise to peers.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    Node::new(cli.port).run()
}
