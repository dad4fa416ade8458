use clap::{Parser, Subcommand};
use rtstream::media::{
    FramePull, FrameSink, FrameSource, PassthroughCompressor, StatsSink, StreamStats,
};
use rtstream::{ClientConfig, ClientSession};
use std::io;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "rtstream-client",
    about = "Stream endpoint: watch a relayed feed or push one"
)]
struct Args {
    /// Server address (host:port)
    #[arg(long, short, default_value = "127.0.0.1:9000")]
    server: String,

    /// Resource name placed in every request line
    #[arg(long, default_value = "stream")]
    resource: String,

    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand)]
enum Role {
    /// Watch the feed, logging every delivered frame
    View,
    /// Push a synthetic test pattern to the server
    Record {
        /// Frames to capture before the pattern runs out
        #[arg(long, default_value_t = 300)]
        frames: u32,

        /// Size of each synthetic frame in bytes
        #[arg(long, default_value_t = 90_000)]
        frame_len: usize,
    },
}

/// Logs every frame the display pump hands over.
struct ConsoleSink {
    shown: u64,
}

impl FrameSink for ConsoleSink {
    fn show_frame(&mut self, frame: &[u8]) {
        self.shown += 1;
        info!(frame = self.shown, len = frame.len(), "frame displayed");
    }
}

struct ConsoleStats;

impl StatsSink for ConsoleStats {
    fn update(&mut self, stats: StreamStats) {
        info!(
            total_bytes = stats.total_bytes,
            fraction_lost = stats.fraction_lost,
            data_rate = stats.data_rate,
            "delivery stats"
        );
    }
}

/// Synthetic capture source: fixed-size frames with a rolling fill byte.
struct TestPattern {
    remaining: u32,
    counter: u64,
    frame_len: usize,
}

impl FrameSource for TestPattern {
    fn next_frame(&mut self) -> FramePull {
        if self.remaining == 0 {
            return FramePull::Exhausted;
        }
        self.remaining -= 1;
        self.counter += 1;
        FramePull::Frame(vec![(self.counter % 251) as u8; self.frame_len])
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let config = ClientConfig {
        resource: args.resource.clone(),
        ..ClientConfig::default()
    };
    let session = match ClientSession::connect(
        args.server.as_str(),
        config,
        Box::new(ConsoleSink { shown: 0 }),
    ) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Failed to connect to {}: {}", args.server, e);
            return;
        }
    };
    let mut session = session.with_stats_sink(Box::new(ConsoleStats));

    if let Err(e) = session.setup() {
        eprintln!("Setup failed: {}", e);
        return;
    }

    match args.role {
        Role::View => {
            match session.describe() {
                Ok(body) if !body.is_empty() => println!("{body}"),
                Ok(_) => {}
                Err(e) => eprintln!("Describe failed: {}", e),
            }
            if let Err(e) = session.play() {
                eprintln!("Play failed: {}", e);
                return;
            }
            println!(
                "Viewing {} from {} — press Enter to stop",
                args.resource, args.server
            );
        }
        Role::Record { frames, frame_len } => {
            let source = TestPattern {
                remaining: frames,
                counter: 0,
                frame_len,
            };
            if let Err(e) = session.record(Box::new(source), Box::new(PassthroughCompressor)) {
                eprintln!("Record failed: {}", e);
                return;
            }
            println!(
                "Recording {} synthetic frames to {} — press Enter to stop",
                frames, args.server
            );
        }
    }

    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();

    if let Err(e) = session.teardown() {
        eprintln!("Teardown failed: {}", e);
    }
}
