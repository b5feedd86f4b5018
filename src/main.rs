use ariston_remote::client::AristonClient;
use ariston_remote::config::{self, Config};
use ariston_remote::coordinator::UpdateCoordinator;
use ariston_remote::device::{self, Device, DeviceFamily, DeviceOptions};
use ariston_remote::services::realtime;
use ariston_remote::transport::UreqBackend;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
    applied: usize,
}

fn run() -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env().map_err(|e| e.to_string())?;
    info!(
        "Config loaded (api={}, culture={}, poll_interval={}s, energy_interval={}s, extra_energy={}, timeout={}s, gateway={})",
        cfg.api_url,
        cfg.culture,
        cfg.poll_interval.as_secs(),
        cfg.energy_poll_interval.as_secs(),
        cfg.extra_energy_features,
        cfg.http_timeout.as_secs(),
        cfg.gateway.as_ref().map(|g| g.to_string()).unwrap_or_else(|| "-".to_string())
    );

    // 2) Log in
    let client = AristonClient::with_backend(
        UreqBackend::new(cfg.http_timeout),
        cfg.api_url.clone(),
        cfg.username.clone(),
        cfg.password.clone(),
    );
    client
        .login()
        .map_err(|e| format!("Ariston login failed (credentials invalid?): {}", e))?;
    info!("Authenticated to Ariston API as {}", cfg.username);
    let client = Arc::new(client);

    // 3) Discover devices
    let found = device::discover(&client).map_err(|e| format!("device discovery failed: {}", e))?;
    if found.is_empty() {
        return Err("No devices found; ensure the account has plants".into());
    }
    info!("Discovered {} device(s)", found.len());
    for d in &found {
        info!(
            "  {} {} ({})",
            d.gateway,
            d.name.as_deref().unwrap_or("-"),
            d.family
        );
    }
    let identity = device::select_device(found, cfg.gateway.as_ref()).ok_or_else(|| {
        format!(
            "gateway {} not found on this account",
            cfg.gateway.as_ref().map(|g| g.to_string()).unwrap_or_default()
        )
    })?;

    // 4) Build the device and read its features
    let options = DeviceOptions {
        culture: cfg.culture.clone(),
        extra_energy_features: cfg.extra_energy_features,
    };
    let mut device = Device::new(client, identity, options);
    device
        .refresh_features()
        .map_err(|e| format!("reading features of {} failed: {}", device.identity().gateway, e))?;
    info!(
        "Using {} ({}), metering={}",
        device.identity().gateway,
        device.identity().family,
        device.has_metering()
    );

    // 5) Realtime loop (steady cadence)
    let mut coordinator = UpdateCoordinator::new(device, cfg.energy_poll_interval);
    info!("Starting realtime loop: interval={}s", cfg.poll_interval.as_secs());
    realtime::run_loop(&mut coordinator, cfg.poll_interval)
}

fn configure_env_from_cli() -> Result<Option<LoadedEnvFile>, String> {
    let mut args = std::env::args_os();
    args.next(); // skip program name

    let mut env_file: Option<PathBuf> = None;
    while let Some(arg) = args.next() {
        let path = match arg.to_str() {
            Some("--env-file") => args
                .next()
                .map(PathBuf::from)
                .ok_or_else(|| "`--env-file` requires a path argument".to_string())?,
            Some(s) if s.starts_with("--env-file=") => match &s["--env-file=".len()..] {
                "" => return Err("`--env-file` requires a path argument".to_string()),
                p => PathBuf::from(p),
            },
            Some("--") => break,
            Some(other) => return Err(format!("unrecognised argument: {}", other)),
            None => return Err("argument contains invalid UTF-8".to_string()),
        };
        if env_file.replace(path).is_some() {
            return Err("`--env-file` provided more than once".to_string());
        }
    }

    let (path, explicit) = match env_file {
        Some(path) if !path.is_file() => return Err(format!("env file not found: {}", path.display())),
        Some(path) => (path, true),
        None => {
            let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
            let path = cwd.join(".env");
            if !path.is_file() {
                return Ok(None);
            }
            (path, false)
        }
    };
    let applied = config::load_env_file(&path).map_err(|e| e.to_string())?;
    Ok(Some(LoadedEnvFile {
        path,
        explicit,
        applied,
    }))
}

fn main() {
    let loaded_env = match configure_env_from_cli() {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!(
            "Environment loaded from {} .env file: {} ({} variable(s))",
            origin,
            info.path.display(),
            info.applied
        );
    }

    info!(
        "ariston-remote {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run() {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
