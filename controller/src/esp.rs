use std::{
    net::IpAddr,
    sync::{Arc, Mutex, PoisonError},
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context};
use ds18b20::{Ds18b20, Resolution};
use embedded_svc::wifi::{AuthMethod, ClientConfiguration, Configuration};
use esp_idf_hal::{
    delay::Ets,
    gpio::{AnyIOPin, AnyOutputPin, IOPin, InputOutput, Output, OutputPin, PinDriver, Pull},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    log::EspLogger,
    nvs::EspDefaultNvsPartition,
    wifi::EspWifi,
};
use log::{info, warn};
use one_wire_bus::{Address, OneWire};

use freezer_common::{
    types::round_tenth, Actuator, ActuatorError, ActuatorState, ConnectivitySource, ControlState,
    ControllerConfig, Responder, Sampler, ServerLifecycleManager, TemperatureProvider,
    TemperatureSensor, WebAssets,
};

const DS18B20_PIN: i32 = 2;
const COOLING_PIN: i32 = 16;
const DISPLAY_REFRESH: Duration = Duration::from_secs(5);

const WIFI_SSID: Option<&str> = option_env!("FREEZER_WIFI_SSID");
const WIFI_PASS: Option<&str> = option_env!("FREEZER_WIFI_PASS");

struct Ds18b20Probe {
    one_wire: OneWire<PinDriver<'static, AnyIOPin, InputOutput>>,
    address: Option<Address>,
    delay: Ets,
}

impl Ds18b20Probe {
    fn new(pin: AnyIOPin) -> anyhow::Result<Self> {
        let mut one_wire_pin = PinDriver::input_output_od(pin)?;
        one_wire_pin.set_pull(Pull::Up)?;
        one_wire_pin.set_high()?;

        let one_wire = OneWire::new(one_wire_pin)
            .map_err(|err| anyhow!("failed to initialize one-wire bus: {err:?}"))?;

        let mut probe = Self {
            one_wire,
            address: None,
            delay: Ets,
        };
        probe.scan();
        Ok(probe)
    }

    fn scan(&mut self) {
        self.address = None;
        for addr in self.one_wire.devices(false, &mut self.delay) {
            match addr {
                Ok(address) if address.family_code() == ds18b20::FAMILY_CODE => {
                    self.address = Some(address);
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("one-wire device scan failed: {err:?}");
                    break;
                }
            }
        }

        match self.address {
            Some(address) => info!("DS18B20 ready on GPIO{DS18B20_PIN} ({address:?})"),
            None => warn!("no DS18B20 found on GPIO{DS18B20_PIN}"),
        }
    }
}

impl TemperatureSensor for Ds18b20Probe {
    fn read(&mut self) -> Option<f32> {
        if self.address.is_none() {
            self.scan();
        }

        let address = self.address?;
        let sensor = match Ds18b20::new::<core::convert::Infallible>(address) {
            Ok(sensor) => sensor,
            Err(err) => {
                warn!("invalid DS18B20 address {address:?}: {err:?}");
                self.address = None;
                return None;
            }
        };

        if let Err(err) =
            ds18b20::start_simultaneous_temp_measurement(&mut self.one_wire, &mut self.delay)
        {
            warn!("failed to start DS18B20 conversion: {err:?}");
            self.address = None;
            return None;
        }

        Resolution::Bits12.delay_for_measurement_time(&mut self.delay);

        match sensor.read_data(&mut self.one_wire, &mut self.delay) {
            Ok(data) => Some(round_tenth(data.temperature)),
            Err(err) => {
                warn!("failed to read DS18B20 data: {err:?}");
                self.address = None;
                None
            }
        }
    }
}

struct CoolingOutput {
    pin: PinDriver<'static, AnyOutputPin, Output>,
}

impl Actuator for CoolingOutput {
    fn drive(&mut self, state: ActuatorState) -> Result<(), ActuatorError> {
        let result = if state.is_cooling() {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        result.map_err(|err| ActuatorError::Output(format!("GPIO{COOLING_PIN}: {err}")))
    }
}

#[derive(Clone, Default)]
struct StationLink {
    address: Arc<Mutex<Option<IpAddr>>>,
}

impl StationLink {
    fn refresh(&self, wifi: &EspWifi<'static>) {
        let address = wifi
            .sta_netif()
            .get_ip_info()
            .ok()
            .map(|info| IpAddr::V4(info.ip))
            .filter(|ip| !ip.is_unspecified());
        *self.address.lock().unwrap_or_else(PoisonError::into_inner) = address;
    }
}

impl ConnectivitySource for StationLink {
    fn is_connected(&self) -> bool {
        let mut ap_info = esp_idf_svc::sys::wifi_ap_record_t::default();
        let rc = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut ap_info) };
        rc == esp_idf_svc::sys::ESP_OK
    }

    fn ip(&self) -> Option<IpAddr> {
        *self.address.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    info!("freezer controller starting up");

    let mut config = ControllerConfig::default();
    config.sanitize();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let Peripherals { modem, pins, .. } = Peripherals::take()?;

    let mut probe =
        Ds18b20Probe::new(pins.gpio2.downgrade()).context("failed to initialize DS18B20")?;
    let mut cooling_pin = PinDriver::output(pins.gpio16.downgrade_output())?;
    cooling_pin.set_low()?;

    let state = Arc::new(ControlState::new(
        probe.read(),
        config.control.fallback_temp_c,
        config.control.initial_target_c,
    ));
    info!(
        "temperature monitor initialized with temperature: {:.1}°C",
        state.current()
    );

    let wifi = start_wifi(modem, sys_loop, nvs_partition)?;
    let link = StationLink::default();
    link.refresh(&wifi);

    let responder = Responder::new(
        config.responder.clone(),
        config.control.clone(),
        state.clone(),
        WebAssets::builtin(),
    );
    let lifecycle = ServerLifecycleManager::new(link.clone(), responder);

    let mut sampler = Sampler::new(
        probe,
        CoolingOutput { pin: cooling_pin },
        lifecycle,
        state.clone(),
        config.sampler.clone(),
    );
    sampler
        .start()
        .context("failed to spawn temperature sampling thread")?;

    loop {
        link.refresh(&wifi);
        info!(
            "display: {:.1}C -> {:.1}C",
            state.current(),
            state.target()
        );
        thread::sleep(DISPLAY_REFRESH);
    }
}

fn start_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
) -> anyhow::Result<EspWifi<'static>> {
    let mut wifi = EspWifi::new(modem, sys_loop, Some(nvs_partition))?;

    let Some(ssid) = WIFI_SSID.filter(|ssid| !ssid.is_empty()) else {
        warn!("wifi credentials missing; running offline");
        return Ok(wifi);
    };
    let pass = WIFI_PASS.unwrap_or_default();

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: ssid.try_into().map_err(|_| anyhow!("wifi ssid too long"))?,
        password: pass
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method: if pass.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        },
        ..Default::default()
    }))?;

    wifi.start()?;
    if let Err(err) = wifi.connect() {
        warn!("wifi connect request failed: {err:?}");
    } else {
        info!("wifi started, connecting to `{ssid}`");
    }
    Ok(wifi)
}
