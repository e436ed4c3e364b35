use piper_serve::{Bootstrap, BootstrapError, LauncherConfig};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run() {
        log::error!("{err}");
        std::process::exit(err.exit_code());
    }
}

fn run() -> Result<(), BootstrapError> {
    let config = LauncherConfig::discover()?;
    log::info!(
        "Serving voice {} from {}",
        config.model,
        config.work_dir.display()
    );

    Bootstrap::piper(&config).run(&config.model)
}
