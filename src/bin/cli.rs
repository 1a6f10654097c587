//! msgstore CLI
//!
//! Inspect and maintain a message store directory.

use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use msgstore::{Config, Direction, FetchRequest, FileMessageStore};
use tracing_subscriber::{fmt, EnvFilter};

/// msgstore CLI
#[derive(Parser, Debug)]
#[command(name = "msgstore-cli")]
#[command(about = "Inspect and maintain a partitioned message store")]
#[command(version)]
struct Args {
    /// Store root directory
    #[arg(short, long, default_value = "./msgstore_data")]
    data_dir: String,

    /// Shard capacity the store was written with
    #[arg(short, long, default_value = "10000")]
    messages_per_file: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List partitions found on disk
    Partitions,

    /// Print the highest stored id of a partition
    MaxId {
        /// Partition name
        partition: String,
    },

    /// Store a message
    Store {
        /// Partition name
        partition: String,

        /// Message id
        id: u64,

        /// Message payload
        payload: String,
    },

    /// Fetch messages
    Fetch {
        /// Partition name
        partition: String,

        /// Id to start from
        start: u64,

        /// Far bound of the scan (inclusive)
        #[arg(short, long)]
        end: Option<u64>,

        /// Scan direction
        #[arg(short, long, value_enum, default_value_t = DirectionArg::Exact)]
        direction: DirectionArg,

        /// Maximum number of messages
        #[arg(short, long, default_value = "10")]
        count: usize,

        /// Seconds to wait for the fetch to be planned
        #[arg(short, long, default_value = "10")]
        timeout: u64,
    },

    /// Verify the store directory is writable
    Check,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DirectionArg {
    Backward,
    Exact,
    Forward,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Backward => Direction::Backward,
            DirectionArg::Exact => Direction::ExactOrAfter,
            DirectionArg::Forward => Direction::Forward,
        }
    }
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,msgstore=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    tracing::debug!("msgstore-cli v{}", msgstore::VERSION);
    tracing::debug!("Data directory: {}", args.data_dir);

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .messages_per_file(args.messages_per_file)
        .build();

    let store = match FileMessageStore::open(config) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Failed to open store: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = run(&store, args.command);
    let stopped = store.stop();

    match result.and(stopped) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(store: &FileMessageStore, command: Commands) -> msgstore::Result<()> {
    match command {
        Commands::Partitions => {
            for name in store.partitions()? {
                println!("{}", name);
            }
        }
        Commands::MaxId { partition } => {
            println!("{}", store.max_message_id(&partition)?);
        }
        Commands::Store {
            partition,
            id,
            payload,
        } => {
            store.store(&partition, id, payload.as_bytes())?;
            println!("stored {}:{}", partition, id);
        }
        Commands::Fetch {
            partition,
            start,
            end,
            direction,
            count,
            timeout,
        } => {
            let mut request = FetchRequest::new(partition, start)
                .direction(direction.into())
                .count(count);
            if let Some(end) = end {
                request = request.end_id(end);
            }

            let stream = store.fetch(request)?.wait_timeout(Duration::from_secs(timeout))?;
            tracing::debug!("Fetching {} messages", stream.len());
            for message in stream {
                let message = message?;
                println!("{}\t{}", message.id, String::from_utf8_lossy(&message.payload));
            }
        }
        Commands::Check => {
            store.check()?;
            println!("ok");
        }
    }
    Ok(())
}
