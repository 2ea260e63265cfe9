use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use halstream::console::{parse_input, render, ConsoleInput};
use halstream::{
    connect, init_logging, list_ports, AppEvent, Config, ConnectionType, ControllerCommand,
    ControllerRegistry, EventBus, SerialTransport, TcpTransport, Transport,
};
use halstream_core::data::LineContext;
use halstream_core::event_bus::{ConnectionEvent, ControllerEvent, JobEvent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

/// Stream G-code to a GRBL-HAL controller
#[derive(Debug, Parser)]
#[command(name = "halstream", version, about)]
struct Args {
    /// Configuration file (defaults to the per-user config path)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port, e.g. /dev/ttyACM0 or COM3
    #[arg(short, long, conflicts_with = "tcp")]
    port: Option<String>,

    /// Networked controller as HOST:PORT
    #[arg(long)]
    tcp: Option<String>,

    /// Serial baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Program to run once the controller is ready
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// 1-based line to start the program from
    #[arg(long, requires = "file")]
    start_line: Option<usize>,

    /// Show raw serial traffic
    #[arg(short, long)]
    echo: bool,

    /// List likely controller ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let path = match &args.config {
        Some(path) => path.clone(),
        None => Config::default_path()?,
    };
    let mut config = Config::load_or_default(&path)
        .with_context(|| format!("loading {}", path.display()))?;

    if let Some(port) = &args.port {
        config.connection.connection_type = ConnectionType::Serial;
        config.connection.port = port.clone();
    }
    if let Some(address) = &args.tcp {
        let (host, port) = address
            .rsplit_once(':')
            .context("--tcp expects HOST:PORT")?;
        config.connection.connection_type = ConnectionType::Tcp;
        config.connection.port = host.to_string();
        config.connection.tcp_port = port.parse().context("invalid TCP port")?;
    }
    if let Some(baud) = args.baud {
        config.connection.baud_rate = baud;
    }
    config.validate()?;
    Ok(config)
}

fn transport(config: &Config) -> Box<dyn Transport> {
    let connection = &config.connection;
    match connection.connection_type {
        ConnectionType::Serial => Box::new(SerialTransport::new(
            connection.port.clone(),
            connection.baud_rate,
        )),
        ConnectionType::Tcp => Box::new(TcpTransport::new(
            connection.port.clone(),
            connection.tcp_port,
            std::time::Duration::from_millis(connection.timeout_ms),
        )),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_json)?;

    if args.list_ports {
        for port in list_ports()? {
            println!("{}\t{}", port.port_name, port.description);
        }
        return Ok(());
    }

    let config = load_config(&args)?;
    tracing::info!("halstream {} (built {})", halstream::VERSION, halstream::BUILD_DATE);

    let program = match &args.file {
        Some(path) => Some((
            path.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string()),
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?,
        )),
        None => None,
    };

    let bus = Arc::new(EventBus::new());
    let mut events = bus.receiver();
    let registry = Arc::new(ControllerRegistry::new());
    let handle = connect(transport(&config).as_ref(), config, bus.clone(), Some(registry))
        .await
        .context("opening connection")?;

    if let Some((name, gcode)) = &program {
        handle
            .command(ControllerCommand::GcodeLoad {
                name: name.clone(),
                gcode: gcode.clone(),
                context: LineContext::new(),
            })
            .await?;
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut started = false;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(text) = render(&event, args.echo) {
                        println!("{}", text);
                    }
                    match event {
                        AppEvent::Controller(ControllerEvent::Ready { .. })
                            if program.is_some() && !started =>
                        {
                            started = true;
                            let start_line = args.start_line.filter(|n| *n > 1).map(|n| n - 1);
                            handle.command(ControllerCommand::GcodeStart { start_line }).await?;
                        }
                        AppEvent::Job(JobEvent::Completed { .. }) if program.is_some() => break,
                        AppEvent::Connection(ConnectionEvent::Closed { .. }) => break,
                        _ => {}
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Console fell behind; {} events skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match parse_input(&line) {
                    Ok(Some(ConsoleInput::Quit)) => break,
                    Ok(Some(ConsoleInput::Status)) => {
                        let snapshot = handle.snapshot().await?;
                        println!("{}", serde_json::to_string_pretty(&snapshot)?);
                    }
                    Ok(Some(ConsoleInput::Command(command))) => {
                        if let Err(e) = handle.command(command).await {
                            println!("!! {}", e);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("!! {}", e),
                },
                Ok(None) | Err(_) => stdin_open = false,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted; stopping");
                handle.command(ControllerCommand::GcodeStop { force: true }).await.ok();
                tokio::time::sleep(std::time::Duration::from_millis(300)).await;
                break;
            }
        }
    }

    handle.close().await;
    Ok(())
}
