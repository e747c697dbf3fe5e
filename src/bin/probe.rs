use std::error::Error;

use clap::{Parser, Subcommand};

use bitz_network::peer::Identity;
use bitz_network::session::Session;
use bitz_network::wire::constants::DEFAULT_PORT;

#[derive(Parser)]
#[command(name = "bitz-probe", about = "Handshake with a BitMessage node")]
struct Cli {
    /// Remote node as host:port.
    #[arg(long)]
    node: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Exchange version/verack and stop.
    Handshake,
    /// Handshake, then print every command the peer sends.
    Watch,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    println!("Connecting to {}", cli.node);
    let identity = Identity::generate(DEFAULT_PORT);
    let mut session = Session::connect(&cli.node, identity)?;

    session.handshake()?;
    println!("Handshake complete");

    match cli.command {
        Commands::Handshake => Ok(()),
        Commands::Watch => watch(&mut session),
    }
}

fn watch(session: &mut Session) -> Result<(), Box<dyn Error>> {
    loop {
        match session.recv() {
            Ok(raw) => {
                println!("{}: {} payload bytes", raw.command, raw.payload.len());
            }
            Err(err) => {
                println!("connection ended: {err}");
                return Ok(());
            }
        }
    }
}
