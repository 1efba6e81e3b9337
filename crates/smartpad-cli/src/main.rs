//! smartpad CLI: runs a gamepad host with simulated touch clients.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use smartpad_host::{setup, Config, Gamepad, GamepadEvent, GamepadService};
use smartpad_protocol::{LocalSignaling, RemoteClient};
use smartpad_types::{ConnectionCode, Pad, BUTTON_COUNT};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(
    name = "smartpad",
    about = "Use phone touchscreens as gamepads",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a host with simulated phones over the in-memory transport.
    Demo {
        /// Path to configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of simulated phones.
        #[arg(short = 'n', long, default_value_t = 2)]
        clients: usize,

        /// Connection code to try first.
        #[arg(long)]
        code: Option<String>,

        /// How long to let the phones play before printing the view.
        #[arg(long, default_value_t = 500)]
        duration_ms: u64,
    },

    /// Print the effective configuration.
    Config {
        /// Path to configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.command {
        Commands::Demo { config, .. } | Commands::Config { config } => config.clone(),
    };
    let config = setup::load_config(config_path.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log.level)),
        )
        .init();

    match cli.command {
        Commands::Demo {
            clients,
            code,
            duration_ms,
            ..
        } => {
            let desired = match code {
                Some(code) => Some(ConnectionCode::parse(&code)?),
                None => config.server.desired_code()?,
            };
            run_demo(&config, clients, desired, Duration::from_millis(duration_ms)).await?;
        }
        Commands::Config { .. } => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

async fn run_demo(
    config: &Config,
    clients: usize,
    desired: Option<ConnectionCode>,
    duration: Duration,
) -> anyhow::Result<()> {
    let signaling = LocalSignaling::new();
    let mut service = GamepadService::new(Arc::new(signaling.clone()), config.server_settings()?);
    let mut events = service.subscribe();

    let code = service.start(desired).await?;
    println!("Connection code: {code}");

    let client_config = config.client_config();
    let mut phones = Vec::with_capacity(clients);
    for _ in 0..clients {
        phones.push(RemoteClient::connect(&signaling, &code, &client_config).await?);
    }
    print_events(&mut events, clients).await;

    for (n, phone) in phones.iter().enumerate() {
        let button = u32::try_from(n % BUTTON_COUNT)?;
        let tilt = if n % 2 == 0 { 0.5 } else { -0.5 };
        phone.send_button_update(button, true)?;
        phone.send_axis_update(Pad::Left, tilt, -tilt)?;
        tracing::debug!(phone = n, button, tilt, "simulated input sent");
    }
    tokio::time::sleep(duration).await;

    print_view(&service.get_gamepads());
    for (n, phone) in phones.iter().enumerate() {
        let stats = phone.stats();
        println!(
            "phone {n}: last ping {:?}, average {:?} over {} samples",
            stats.last_ping, stats.average_ping, stats.samples
        );
    }

    service.stop().await;
    print_events(&mut events, clients).await;
    Ok(())
}

/// Print up to `count` gamepad events, giving up once they stop arriving.
async fn print_events(events: &mut mpsc::UnboundedReceiver<GamepadEvent>, count: usize) {
    for _ in 0..count {
        match tokio::time::timeout(Duration::from_secs(1), events.recv()).await {
            Ok(Some(event)) => {
                let pad = event.gamepad();
                println!("{} {} at slot {:?}", event.name(), pad.id, pad.index);
            }
            Ok(None) | Err(_) => break,
        }
    }
}

fn print_view(view: &[Option<Gamepad>]) {
    println!("Gamepads:");
    for (slot, entry) in view.iter().enumerate() {
        match entry {
            Some(pad) => {
                let pressed: Vec<usize> = pad
                    .buttons
                    .iter()
                    .enumerate()
                    .filter(|(_, button)| button.pressed)
                    .map(|(index, _)| index)
                    .collect();
                println!(
                    "  [{slot}] {} axes {:?} pressed {:?}",
                    pad.id, pad.axes, pressed
                );
            }
            None => println!("  [{slot}] empty"),
        }
    }
}
