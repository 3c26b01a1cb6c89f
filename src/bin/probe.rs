//! Connectivity probe
//!
//! Opens one socket the way the client would and reports:
//! - which transport the secret selected
//! - the event sequence and handshake latency
//! - the TCP state when the server never answers
//!
//! Optionally sends a hex payload once connected and dumps the reply.

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use mtproto_socket::{
    config::{generate_example_config, Config, EndpointConfig, LogFormat, LoggingConfig},
    create_socket,
    transport::TracingDiagnostics,
    ProxyData, SocketEvent,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Transport probe - check that a server (or proxy) is reachable
#[derive(Parser, Debug)]
#[command(name = "mtproto-probe")]
#[command(about = "Probe a server through plain or fake-TLS transport")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Write an example configuration to this path and exit
    #[arg(long)]
    generate_config: Option<String>,

    /// Server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Server port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Connection secret, hex or base64url (overrides config)
    #[arg(short, long)]
    secret: Option<String>,

    /// Proxy URL: socks5://host:port or http://host:port (overrides config)
    #[arg(long)]
    proxy: Option<String>,

    /// Seconds to wait for each event
    #[arg(short, long, default_value_t = 10)]
    timeout: u64,

    /// Use the large-buffer profile for file transfers
    #[arg(long)]
    files: bool,

    /// Hex payload to send once connected
    #[arg(long)]
    payload: Option<String>,

    /// Log level (trace, debug, info, warn, error), overrides config
    #[arg(short = 'v', long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(path) = &args.generate_config {
        init_logging(&LoggingConfig::default(), args.log_level.as_deref());
        generate_example_config()
            .save(path)
            .context("Failed to write example config")?;
        info!("Example configuration written to {}", path);
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => Config::load(path).context("Failed to load configuration")?,
        None => Config::default(),
    };
    init_logging(&config.logging, args.log_level.as_deref());
    apply_overrides(&mut config, &args)?;
    config.validate().context("Invalid configuration")?;

    let endpoint = config
        .endpoint
        .clone()
        .ok_or_else(|| anyhow!("No [endpoint] section in config and no --host given"))?;

    let transport = config.transport_profile(args.files);

    let payload = args
        .payload
        .as_deref()
        .map(hex::decode)
        .transpose()
        .context("Payload is not valid hex")?;

    let mut socket = create_socket(
        Handle::current(),
        &endpoint.secret(),
        &config.proxy(),
        &transport,
        Arc::new(TracingDiagnostics),
    )
    .context("Failed to create socket")?;

    info!(
        "Probing {}:{} over {:?} transport (proxy: {:?})",
        endpoint.host,
        endpoint.port,
        socket.kind(),
        config.proxy().kind
    );

    let started = Instant::now();
    socket.connect_to_host(&endpoint.host, endpoint.port);

    let wait = Duration::from_secs(args.timeout);
    let mut received = Vec::new();
    loop {
        let event = match tokio::time::timeout(wait, socket.next_event()).await {
            Ok(event) => event,
            Err(_) => {
                socket.timed_out();
                warn!(
                    "No event within {:?}, TCP state {}",
                    wait,
                    socket.debug_state()
                );
                bail!("Timed out after {:?}", started.elapsed());
            }
        };

        match event {
            Some(SocketEvent::Connected) => {
                info!("Connected in {:?}", started.elapsed());
                match &payload {
                    Some(payload) => socket.write(&[], payload),
                    None => return Ok(()),
                }
            }
            Some(SocketEvent::ReadyRead) => {
                let mut buf = [0u8; 4096];
                loop {
                    let n = socket.read(&mut buf);
                    if n == 0 {
                        break;
                    }
                    received.extend_from_slice(&buf[..n]);
                }
                info!(
                    "Received {} bytes after {:?}: {}",
                    received.len(),
                    started.elapsed(),
                    hex::encode(&received)
                );
                return Ok(());
            }
            Some(SocketEvent::SyncTimeRequest) => {
                warn!("Server may have rejected the hello, check the local clock");
            }
            Some(SocketEvent::Disconnected) => {
                bail!("Server closed the connection after {:?}", started.elapsed());
            }
            Some(SocketEvent::Error(e)) => {
                return Err(anyhow!(e)).context(format!(
                    "Connection failed after {:?}",
                    started.elapsed()
                ));
            }
            None => bail!("Socket finished without a result"),
        }
    }
}

fn init_logging(logging: &LoggingConfig, override_level: Option<&str>) {
    let filter = logging.filter(override_level);
    let builder = tracing_subscriber::fmt().with_env_filter(filter.as_str());
    match logging.format {
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Fold command line overrides into the loaded configuration
fn apply_overrides(config: &mut Config, args: &Args) -> Result<()> {
    if args.host.is_some() || args.port.is_some() || args.secret.is_some() {
        let endpoint = config.endpoint.get_or_insert_with(EndpointConfig::default);
        if let Some(host) = &args.host {
            endpoint.host = host.clone();
        }
        if let Some(port) = args.port {
            endpoint.port = port;
        }
        if let Some(secret) = &args.secret {
            endpoint.secret = secret.clone();
        }
    }

    if let Some(url) = &args.proxy {
        config.proxy = Some(parse_proxy_url(url)?);
    }
    debug!("Effective configuration: {:?}", config);
    Ok(())
}

fn parse_proxy_url(url: &str) -> Result<ProxyData> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| anyhow!("Proxy URL needs a scheme: {}", url))?;
    let (credentials, address) = match rest.rsplit_once('@') {
        Some((credentials, address)) => (Some(credentials), address),
        None => (None, rest),
    };
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("Proxy URL needs a port: {}", url))?;
    let port: u16 = port.parse().context("Invalid proxy port")?;

    let mut proxy = match scheme {
        "socks5" => ProxyData::socks5(host, port),
        "http" => ProxyData::http(host, port),
        other => bail!("Unsupported proxy scheme: {}", other),
    };
    if let Some(credentials) = credentials {
        let (user, password) = credentials.split_once(':').unwrap_or((credentials, ""));
        proxy = proxy.with_credentials(user, password);
    }
    Ok(proxy)
}
