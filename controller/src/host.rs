use std::{
    io::ErrorKind,
    net::{IpAddr, Ipv4Addr},
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc},
};

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use freezer_common::{
    ControlState, ControllerConfig, ConnectivitySource, Responder, Sampler,
    ServerLifecycleManager, TemperatureProvider, TemperatureSensor, WebAssets,
};

use crate::{
    console::{apply_target, display_lines, ConsoleCommand, HELP},
    sim::{LoggingActuator, SimulatedSensor, SimulationProfile, ToggleConnectivity},
};

// Port 80 needs root on a desktop.
const HOST_HTTP_PORT: u16 = 8080;

#[derive(Clone)]
struct ConfigStore {
    config_path: PathBuf,
}

impl ConfigStore {
    fn new() -> Self {
        let data_dir = std::env::var("FREEZER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.freezer"));

        Self {
            config_path: data_dir.join("config.json"),
        }
    }

    async fn load(&self) -> anyhow::Result<ControllerConfig> {
        match tokio::fs::read(&self.config_path).await {
            Ok(raw) => serde_json::from_slice::<ControllerConfig>(&raw).with_context(|| {
                format!("invalid controller config in {}", self.config_path.display())
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(host_defaults()),
            Err(err) => Err(err.into()),
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("freezer controller starting up");

    let store = ConfigStore::new();
    let mut config = store.load().await.unwrap_or_else(|err| {
        warn!("failed to load controller config: {err:#}");
        host_defaults()
    });
    apply_env_overrides(&mut config);
    config.sanitize();

    let cooling = Arc::new(AtomicBool::new(false));
    let mut sensor = SimulatedSensor::new(simulation_profile(), cooling.clone());

    let state = Arc::new(ControlState::new(
        sensor.read(),
        config.control.fallback_temp_c,
        config.control.initial_target_c,
    ));
    info!(
        "temperature monitor initialized with temperature: {:.1}°C",
        state.current()
    );

    let network_up = std::env::var("FREEZER_NETWORK")
        .map(|value| !matches!(value.to_ascii_lowercase().as_str(), "off" | "0" | "false"))
        .unwrap_or(true);
    let connectivity = ToggleConnectivity::new(network_up, advertised_address(&config));

    let web_root = config
        .responder
        .web_root
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("{}/web", env!("CARGO_MANIFEST_DIR"))));
    let responder = Responder::new(
        config.responder.clone(),
        config.control.clone(),
        state.clone(),
        WebAssets::from_dir(&web_root),
    );
    let lifecycle = ServerLifecycleManager::new(connectivity.clone(), responder);

    let mut sampler = Sampler::new(
        sensor,
        LoggingActuator::new(cooling),
        lifecycle,
        state.clone(),
        config.sampler.clone(),
    );
    sampler
        .start()
        .context("failed to spawn temperature sampling thread")?;

    println!(
        "web port {} (set FREEZER_HTTP_PORT to change)\n{HELP}",
        config.responder.port
    );
    run_console(&state, &config, &connectivity).await;

    info!("stopping temperature monitoring");
    tokio::task::spawn_blocking(move || sampler.stop())
        .await
        .context("sampler shutdown task failed")?;

    info!("program terminated cleanly");
    Ok(())
}

async fn run_console(
    state: &Arc<ControlState>,
    config: &ControllerConfig,
    connectivity: &ToggleConnectivity,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!("failed to listen for ctrl-c: {err}");
                }
                info!("program interrupted; cleaning up");
                return;
            }
            line = lines.next_line(), if stdin_open => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        stdin_open = false;
                        continue;
                    }
                    Err(err) => {
                        warn!("console read failed: {err}");
                        stdin_open = false;
                        continue;
                    }
                };

                match ConsoleCommand::parse(&line) {
                    Ok(ConsoleCommand::Quit) => return,
                    Ok(command) => handle_command(command, state.as_ref(), config, connectivity),
                    Err(message) => println!("{message}\n{HELP}"),
                }
            }
        }
    }
}

fn handle_command(
    command: ConsoleCommand,
    state: &dyn TemperatureProvider,
    config: &ControllerConfig,
    connectivity: &ToggleConnectivity,
) {
    match command {
        ConsoleCommand::Status => {}
        ConsoleCommand::SetTarget(target) => {
            if let Err(message) = apply_target(state, &config.control, target) {
                println!("{message}");
            }
        }
        ConsoleCommand::Step(delta) => {
            if let Err(message) = apply_target(state, &config.control, state.target() + delta) {
                println!("{message}");
            }
        }
        ConsoleCommand::Network(connected) => {
            connectivity.set_connected(connected);
            println!(
                "wifi {}",
                if connected { "connected" } else { "disconnected" }
            );
        }
        ConsoleCommand::ShowIp => match connectivity.ip() {
            Some(ip) => println!("http://{ip}:{}", config.responder.port),
            None => println!("not connected"),
        },
        ConsoleCommand::Help => println!("{HELP}"),
        ConsoleCommand::Quit => return,
    }

    for line in display_lines(state) {
        println!("{line}");
    }
}

fn host_defaults() -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.responder.port = HOST_HTTP_PORT;
    config
}

fn apply_env_overrides(config: &mut ControllerConfig) {
    if let Some(port) = std::env::var("FREEZER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        config.responder.port = port;
    }
    if let Ok(root) = std::env::var("FREEZER_WEB_ROOT") {
        config.responder.web_root = Some(PathBuf::from(root));
    }
}

fn simulation_profile() -> SimulationProfile {
    SimulationProfile {
        drop_every: std::env::var("FREEZER_SIM_DROP_EVERY")
            .ok()
            .and_then(|value| value.parse::<u32>().ok()),
        ..SimulationProfile::default()
    }
}

fn advertised_address(config: &ControllerConfig) -> IpAddr {
    if config.responder.bind_addr.is_unspecified() {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        config.responder.bind_addr
    }
}
