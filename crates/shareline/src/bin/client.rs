//! Shareline interactive client
//!
//! Run with: cargo run --bin shareline-client -- --host 127.0.0.1 --key alice.key

use anyhow::Context;
use clap::Parser;
use shareline::{Client, ClientConfig, Download, Error, LoggingConfig, logging};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Client configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server host
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Server port
    #[arg(short, long)]
    port: Option<u16>,

    /// 32-byte key file used to decrypt downloads
    #[arg(short, long)]
    key: Option<PathBuf>,

    /// User to select (index or name); prompts when omitted
    #[arg(short, long)]
    user: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn client_config(&self) -> anyhow::Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => ClientConfig::default(),
        };
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(key) = &self.key {
            config.key_file = Some(key.clone());
        }
        Ok(config)
    }
}

const HELP: &str = "\
Commands:
  list [subdir]        list the shared directory
  get <file> [output]  download a file
  info <file>          show file details
  key <path>           load a 32-byte decryption key
  switch               select another user
  help                 show this help
  exit                 disconnect
";

type Input = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let logging_config = LoggingConfig {
        level: if args.verbose { "debug" } else { "warn" }.to_string(),
        ..LoggingConfig::default()
    };
    let _log_guard = logging::init(&logging_config).context("Failed to initialize logging")?;

    let config = args.client_config()?;
    let mut client = Client::connect_with(config).await.context("Failed to connect")?;
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    print!("{}", client.greeting().await?);
    let selection = match &args.user {
        Some(user) => user.clone(),
        None => match read_input(&mut input, "").await? {
            Some(line) => line,
            None => return Ok(()),
        },
    };

    let username = client
        .select_user(selection.trim())
        .await
        .context("Authentication failed")?;
    println!("Authenticated as {}", username);
    if !client.has_key() {
        println!("No key loaded: encrypted downloads are saved with a .enc suffix");
    }
    print!("{}", HELP);

    while let Some(line) = read_input(&mut input, "shareline> ").await? {
        match run_command(&mut client, &mut input, line.trim()).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e @ Error::Connection(_)) => return Err(e.into()),
            Err(e) => eprintln!("Error: {}", e),
        }
    }

    Ok(())
}

/// Run one shell command; `Ok(false)` ends the session
async fn run_command(client: &mut Client, input: &mut Input, line: &str) -> shareline::Result<bool> {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return Ok(true);
    };

    match command.to_ascii_lowercase().as_str() {
        "list" | "ls" => {
            print!("{}", client.list(parts.next()).await?);
        }
        "get" => {
            let Some(file) = parts.next() else {
                eprintln!("Usage: get <file> [output]");
                return Ok(true);
            };
            let output = parts.next().map(PathBuf::from);
            let download = client.get(file, output.as_deref()).await?;
            report(&download);
        }
        "info" => {
            let Some(file) = parts.next() else {
                eprintln!("Usage: info <file>");
                return Ok(true);
            };
            print!("{}", client.info(file).await?);
        }
        "key" => {
            let Some(path) = parts.next() else {
                eprintln!("Usage: key <path>");
                return Ok(true);
            };
            client.load_key(Path::new(path)).await?;
            println!("Key loaded");
        }
        "switch" => {
            print!("{}", client.begin_switch().await?);
            let Some(selection) = read_input(input, "").await.map_err(Error::Io)? else {
                return Ok(false);
            };
            match client.finish_switch(selection.trim()).await {
                Ok(banner) => print!("{}", banner),
                Err(Error::Remote(message)) => {
                    eprintln!("{}", message);
                    eprintln!("No active session; use switch to select a user");
                }
                Err(e) => return Err(e),
            }
        }
        "help" | "?" => print!("{}", HELP),
        "exit" | "quit" => {
            print!("{}", client.exit().await?);
            return Ok(false);
        }
        other => eprintln!("Unknown command: {} (type help)", other),
    }

    Ok(true)
}

fn report(download: &Download) {
    match download {
        Download::Decrypted { path, bytes } => {
            println!("Saved {} ({} bytes, decrypted)", path.display(), bytes);
        }
        Download::Encrypted { path, bytes } => {
            println!("Saved {} ({} bytes, still encrypted; load a key to decrypt)", path.display(), bytes);
        }
        Download::Plain { path, bytes } => {
            println!("Saved {} ({} bytes)", path.display(), bytes);
        }
    }
}

async fn read_input(input: &mut Input, prompt: &str) -> std::io::Result<Option<String>> {
    if !prompt.is_empty() {
        print!("{}", prompt);
    }
    std::io::stdout().flush()?;
    input.next_line().await
}
