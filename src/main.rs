//! Thin binary entry point: load configuration, start the receiver, and
//! block until interrupted.

use std::path::PathBuf;

use aural_relay::config::Settings;
use aural_relay::Receiver;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        log::error!("{e}");
        std::process::exit(1);
    }
}

fn run() -> aural_relay::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("aural-relay.toml"));

    let raw = std::fs::read_to_string(&config_path)?;
    let settings = Settings::from_toml_str(&raw)?;
    settings.validate()?;

    log::info!("starting receiver with {} endpoint(s)", settings.endpoints.len());
    let _receiver = Receiver::start(&settings)?;

    // The receive/tick threads and the audio callback run in the
    // background; the main thread just waits to be killed.
    loop {
        std::thread::sleep(std::time::Duration::from_secs(3600));
    }
}
