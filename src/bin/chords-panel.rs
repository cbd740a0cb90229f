use clap::Parser;
use log::info;
use msgbox::IconType;
use chords_panel::{init_logging, run};
use chords_panel::error::{error_msgbox, AppRunError, ConfigError};

#[derive(Parser)]
#[command(name = "chords-panel", version, about = "Control panel for Chords biosignal acquisition devices")]
struct Cli {
    /// Address of the acquisition backend service, overriding the config file
    #[arg(long)]
    backend: Option<String>,

    /// Log verbosity (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: log::LevelFilter,
}

fn main() -> Result<(), AppRunError> {
    let cli = Cli::parse();

    init_logging(cli.log_level);
    info!(concat!("Chords Panel ", env!("CARGO_PKG_VERSION")));

    match run(cli.backend) {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            msgbox::create(
                concat!("Chords Panel ", env!("CARGO_PKG_VERSION")),
                "This application has already been started",
                IconType::Error,
            ).expect("Could not create msgbox");
            Ok(())
        },
        Err(err) => {
            error_msgbox("Unexpected error", &err);
            Err(err)
        }
        Ok(_) => Ok(())
    }
}
