use clap::Parser;
use client::GameClient;
use log::info;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8000")]
    server: String,

    /// Username to log in with
    #[arg(short, long)]
    username: String,

    /// Password to log in with
    #[arg(short, long)]
    password: String,

    /// Create the account before logging in
    #[arg(short, long)]
    register: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Connecting to: {}", args.server);
    let mut client = GameClient::connect(&args.server).await?;

    if args.register {
        if client.register(&args.username, &args.password).await? {
            info!("Registered account `{}`", args.username);
        } else {
            eprintln!("Registration rejected (username taken?)");
        }
    }

    if !client.login(&args.username, &args.password).await? {
        eprintln!("Login rejected");
        return Ok(());
    }
    println!("Logged in as {}", args.username);
    println!("Enter protocol commands (get_player_info, get_buildings, build, ...); `quit` exits");

    // Forward stdin lines as raw protocol commands, print what comes back.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" {
            break;
        }

        match client.raw(line).await {
            Ok(Some(reply)) => println!("{}", reply),
            Ok(None) => {}
            Err(e) => eprintln!("{}", e),
        }
    }

    Ok(())
}
