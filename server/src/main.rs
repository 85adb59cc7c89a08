//! Dedicated server binary for the shared Jell-O crystal world.

use std::time::Duration;

use clap::Parser;
use log::info;
use server::network::Server;

#[derive(Parser, Debug)]
#[command(author, version, about = "Dedicated server for the shared Jell-O crystal")]
struct Args {
    /// Crystal grid dimensions
    #[arg(long = "num-atoms", num_args = 3, value_names = ["NX", "NY", "NZ"],
          default_values_t = [4usize, 4, 8])]
    num_atoms: Vec<usize>,

    /// Listen port; 0 or -1 picks any free port
    #[arg(short, long, default_value_t = -1)]
    port: i32,

    /// Broadcast interval in seconds
    #[arg(short, long, default_value_t = 0.02)]
    tick: f64,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let num_atoms = [args.num_atoms[0], args.num_atoms[1], args.num_atoms[2]];
    if num_atoms.contains(&0) {
        return Err("each crystal dimension must be at least 1".into());
    }
    if !(args.tick > 0.0) {
        return Err("tick interval must be positive".into());
    }
    if args.port > u16::MAX as i32 {
        return Err("port out of range".into());
    }
    let port = if args.port <= 0 { 0 } else { args.port as u16 };

    let server = Server::bind(
        &args.host,
        port,
        num_atoms,
        Duration::from_secs_f64(args.tick),
    )
    .await?;
    info!(
        "serving a {}x{}x{} crystal on port {}",
        num_atoms[0],
        num_atoms[1],
        num_atoms[2],
        server.local_port()
    );

    tokio::select! {
        _ = server.run() => {}
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}
