use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use badgey::session::SessionState;
use badgey::{bmp, BadgeConfig, BadgeLink, BleTransport, Compositor, FontBook, Layout, LinkSettings, PackedBitmap};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "badgey", version, about = "Compose screens for a 128x296 e-ink badge and send them over BLE")]
struct Cli {
    /// Config file (TOML)
    #[arg(long, global = true, env = "BADGEY_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List advertising BLE devices
    Scan {
        /// Scan duration, defaults to link.scan_seconds
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Render a layout to a 1-bit BMP
    Render {
        #[arg(long)]
        layout: PathBuf,
        #[arg(long)]
        out: PathBuf,
        /// Also write a PNG preview
        #[arg(long)]
        preview: Option<PathBuf>,
    },
    /// Send a layout or a native BMP to a badge
    Send {
        /// Device address as printed by `scan`
        #[arg(long)]
        device: String,
        #[arg(long, conflicts_with = "bmp", required_unless_present = "bmp")]
        layout: Option<PathBuf>,
        #[arg(long)]
        bmp: Option<PathBuf>,
        /// Seconds to wait for each of connect and transfer
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter(self) -> tracing::level_filters::LevelFilter {
        match self {
            LogLevel::Error => tracing::level_filters::LevelFilter::ERROR,
            LogLevel::Warn => tracing::level_filters::LevelFilter::WARN,
            LogLevel::Info => tracing::level_filters::LevelFilter::INFO,
            LogLevel::Debug => tracing::level_filters::LevelFilter::DEBUG,
            LogLevel::Trace => tracing::level_filters::LevelFilter::TRACE,
        }
    }
}

fn init_logging(level: LogLevel) {
    let installed = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level.as_filter())
        .with_target(false)
        .try_init();
    if let Err(error) = installed {
        // someone else's subscriber is already in place; it gets this event
        tracing::debug!(%error, "log subscriber not installed");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level);
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let config = BadgeConfig::resolve(cli.config.as_deref())?;
    match cli.command {
        Command::Scan { seconds } => {
            let secs = seconds.unwrap_or(config.link.scan_seconds);
            println!("Scanning for BLE devices for {secs} seconds...");
            let devices = badgey::scan(Duration::from_secs(secs)).await?;
            if devices.is_empty() {
                println!("No devices found. Make sure Bluetooth is on and the badge is advertising.");
            }
            for (i, d) in devices.iter().enumerate() {
                println!("  {}) id={} name={:?} rssi={:?}", i + 1, d.id, d.name, d.rssi);
            }
            Ok(())
        }
        Command::Render {
            layout,
            out,
            preview,
        } => {
            let screen = render_layout(&config, &layout)?;
            bmp::write_native(&screen, BufWriter::new(File::create(&out)?))?;
            if let Some(path) = preview {
                screen.to_image().save(&path)?;
            }
            println!("Wrote {} ({} black pixels)", out.display(), screen.black_pixels());
            Ok(())
        }
        Command::Send {
            device,
            layout,
            bmp,
            timeout,
        } => {
            let screen = match (bmp, layout) {
                (Some(path), _) => load_native(&path)?,
                (None, Some(path)) => render_layout(&config, &path)?,
                (None, None) => return Err("either --layout or --bmp is required".into()),
            };
            send_screen(&config, &device, screen, Duration::from_secs(timeout)).await
        }
    }
}

fn render_layout(config: &BadgeConfig, path: &Path) -> CliResult<PackedBitmap> {
    let (layout, images) = Layout::load(path)?;
    let fonts = FontBook::from_config(&config.fonts)?;
    let compositor = Compositor::new(&fonts, &images).with_text_scale(config.render.text_scale);
    Ok(badgey::render(&layout.blocks, &compositor, config.render.gamma))
}

fn load_native(path: &Path) -> CliResult<PackedBitmap> {
    let bytes = std::fs::read(path)?;
    bmp::decode_native(&bytes).ok_or_else(|| {
        format!(
            "{} is not a 128x296 1-bit BMP with a white/black palette",
            path.display()
        )
        .into()
    })
}

async fn send_screen(config: &BadgeConfig, device: &str, screen: PackedBitmap, limit: Duration) -> CliResult<()> {
    let transport = BleTransport::new().await?;
    // the adapter only connects to peripherals it has seen advertising
    transport
        .scan_for(Duration::from_secs(config.link.scan_seconds))
        .await?;

    let link = BadgeLink::spawn(transport, LinkSettings::from(&config.link));
    link.connect(device);
    let status = tokio::time::timeout(
        limit,
        link.wait_for(|s| {
            matches!(
                s.state,
                SessionState::Ready | SessionState::NotFound(_) | SessionState::Disconnected
            )
        }),
    )
    .await
    .map_err(|_| "timed out connecting")?
    .ok_or("link stopped")?;
    println!("{}", status.message);
    if status.state != SessionState::Ready {
        link.shutdown().await;
        return Err(status.message.into());
    }

    link.send(screen).await?;
    let status = tokio::time::timeout(limit, link.wait_for(|s| s.state != SessionState::Sending))
        .await
        .map_err(|_| "timed out sending")?
        .ok_or("link stopped")?;
    println!("{}", status.message);

    link.disconnect();
    link.shutdown().await;
    if status.state == SessionState::Ready {
        Ok(())
    } else {
        Err(status.message.into())
    }
}
