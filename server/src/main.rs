use clap::Parser;
use server::config::ServerConfig;
use server::network::Server;
use server::store::Store;
use std::time::Duration;

/// Main-method of the application.
/// Parses command-line arguments, boots the store, then serves sessions
/// until the process is interrupted.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8000")]
        port: u16,
        /// Database URL
        #[clap(short, long, default_value = "sqlite:leviathan.db")]
        database: String,
        /// Maximum concurrent client connections
        #[clap(short, long, default_value = "64")]
        max_clients: usize,
        /// Seconds a session may sit idle before it is closed
        #[clap(long, default_value = "300")]
        read_timeout: u64,
    }

    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    // Parse command line arguments
    let args = Args::parse();

    let config = ServerConfig {
        bind_address: format!("{}:{}", args.host, args.port).parse()?,
        database_url: args.database,
        max_clients: args.max_clients,
        read_timeout: Duration::from_secs(args.read_timeout),
        ..ServerConfig::default()
    };

    let store = Store::connect(&config.database_url).await?;
    store.init_schema().await?;

    let server = Server::bind(config, store).await?;

    // Handle shutdown gracefully
    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            println!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
