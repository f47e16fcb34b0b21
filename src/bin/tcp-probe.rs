use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use tcp_runtime::tls::pem::load_root_store;
use tcp_runtime::{ClientTls, Connection, TcpClient};

#[derive(Parser)]
#[command(name = "tcp-probe")]
#[command(about = "Connect to a tcp-runtime server and inspect the session", long_about = None)]
struct Cli {
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, default_value_t = 7000)]
    port: u16,

    /// Connect to a filesystem socket instead of host/port.
    #[arg(long)]
    unix: Option<PathBuf>,

    /// Use TLS (requires --ca or --insecure).
    #[arg(long)]
    tls: bool,

    /// Server name sent as SNI.
    #[arg(long)]
    server_name: Option<String>,

    /// PEM file with trusted CA certificates.
    #[arg(long)]
    ca: Option<PathBuf>,

    /// Accept any server certificate.
    #[arg(long)]
    insecure: bool,

    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the negotiated session
    Session,
    /// Send a message, half-close and print the reply
    Send { message: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut client = match &cli.unix {
        Some(path) => TcpClient::new().unix_path(path.clone()),
        None => TcpClient::new().host(cli.host.clone()).port(cli.port),
    };

    if cli.tls || cli.ca.is_some() || cli.insecure {
        let mut tls = match &cli.ca {
            Some(ca) => ClientTls::with_roots(load_root_store(ca)?)?,
            None if cli.insecure => ClientTls::insecure()?,
            None => return Err("--tls needs --ca or --insecure".into()),
        };
        if let Some(name) = &cli.server_name {
            tls = tls.server_name(name.clone());
        }
        client = client.secure(tls);
    }

    let timeout = Duration::from_millis(cli.timeout_ms);
    let mut connection = client.connect_now(timeout).await?;

    match cli.command {
        Commands::Session => print_session(&connection),
        Commands::Send { message } => {
            connection.write_all(message.as_bytes()).await?;
            connection.shutdown().await?;
            let mut reply = Vec::new();
            tokio::time::timeout(timeout, connection.read_to_end(&mut reply)).await??;
            println!("{}", String::from_utf8_lossy(&reply));
        }
    }

    Ok(())
}

fn print_session(connection: &Connection) {
    println!("local:    {}", connection.local_endpoint());
    println!("remote:   {}", connection.remote_endpoint());
    let Some(tls) = connection.tls() else {
        println!("tls:      none");
        return;
    };
    println!("sni:      {}", tls.hostname.as_deref().unwrap_or("-"));
    println!("protocol: {}", tls.protocol_version.as_deref().unwrap_or("-"));
    println!("cipher:   {}", tls.cipher_suite.as_deref().unwrap_or("-"));
    println!(
        "alpn:     {}",
        tls.alpn_protocol
            .as_deref()
            .map(String::from_utf8_lossy)
            .unwrap_or_else(|| "-".into())
    );
    println!("certs:    {}", tls.peer_certificates.len());
}
