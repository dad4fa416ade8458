use clap::Parser;
use rtstream::{ServerConfig, StreamServer};
use std::io;

#[derive(Parser)]
#[command(
    name = "rtstream-server",
    about = "Relay server: accepts recording feeds and fans them out to viewers"
)]
struct Args {
    /// Bind address (host:port)
    #[arg(long, short, default_value = "0.0.0.0:9000")]
    bind: String,

    /// Frames a slow viewer may fall behind before the relay drops for it
    #[arg(long, default_value_t = 32)]
    lag_budget: usize,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let mut server = StreamServer::new(ServerConfig {
        bind_addr: args.bind.clone(),
        session_channel_capacity: args.lag_budget,
        ..ServerConfig::default()
    });

    if let Err(e) = server.start() {
        eprintln!("Failed to start server: {}", e);
        return;
    }

    println!("Stream relay on {} — press Enter to stop", args.bind);
    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();

    server.stop();
}
