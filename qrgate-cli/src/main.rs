//! qrgate — entry point.
//!
//! ```text
//! qrgate [scan]                      Scan the saved region and log in
//! qrgate scan --x 0 --y 0 --width 800 --height 800 --backend dxgi
//! qrgate login --mobile <m> --code <c>   Account login, stores the token
//! qrgate sms                         Request a verification SMS
//! qrgate probe                       List capture backends and latency
//! qrgate decode --file shot.png      Decode a screenshot
//! qrgate --gen-config                Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use qrgate_cli::app::{self, ScanOverrides};
use qrgate_cli::config::AppConfig;
use qrgate_cli::settings::UserSettings;
use qrgate_core::capture::CaptureMethod;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "qrgate", about = "Scan a screen region for a QR login code and confirm it")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "qrgate.toml")]
    config: PathBuf,

    /// Path to the persisted user settings.
    #[arg(short, long, default_value = "settings.toml")]
    settings: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan the capture region until a login succeeds (default).
    Scan(ScanArgs),
    /// Log in with a phone number and SMS code.
    Login {
        #[arg(long)]
        mobile: String,
        #[arg(long)]
        code: String,
    },
    /// Request a verification SMS for the logged-in account.
    Sms,
    /// Report available capture backends and service latency.
    Probe,
    /// Decode a QR code from an image file.
    Decode {
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Args, Debug, Default)]
struct ScanArgs {
    #[arg(long, allow_hyphen_values = true)]
    x: Option<i32>,
    #[arg(long, allow_hyphen_values = true)]
    y: Option<i32>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    /// Capture backend to try first: dxgi, bitblt or xcap.
    #[arg(long)]
    backend: Option<CaptureMethod>,
    /// Stop retrying after an expired code.
    #[arg(long)]
    no_auto_retry: bool,
}

impl From<ScanArgs> for ScanOverrides {
    fn from(args: ScanArgs) -> Self {
        Self {
            x: args.x,
            y: args.y,
            width: args.width,
            height: args.height,
            backend: args.backend,
            no_auto_retry: args.no_auto_retry,
        }
    }
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&AppConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config.
    let config = AppConfig::load(&cli.config);
    let mut settings = UserSettings::load(&cli.settings);

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("qrgate v{}", env!("CARGO_PKG_VERSION"));

    match cli.command.unwrap_or(Commands::Scan(ScanArgs::default())) {
        Commands::Scan(args) => {
            app::scan(&config, &mut settings, &cli.settings, args.into()).await?
        }
        Commands::Login { mobile, code } => {
            app::login(&config, &mut settings, &cli.settings, &mobile, &code).await?
        }
        Commands::Sms => app::sms(&config, &settings).await?,
        Commands::Probe => app::probe(&config, &settings).await?,
        Commands::Decode { file } => app::decode_file(&config, &settings, &file).await?,
    }

    Ok(())
}
