use std::sync::{Arc, Mutex};

use camarray_core::{
    Camera, CameraConfig, CameraSettings, IndicatorLed, PowerSequencer, WaitTimeout,
    WifiCredentials,
};
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::gpio::PinDriver;
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use log::{error, info};

mod camera;
mod http_server;
mod settings;
mod wifi;

use camera::{EspCameraDriver, EspPmLock, XclkGate};
use settings::CONFIG;

fn main() -> anyhow::Result<()> {
    // It is necessary to call this function once. Otherwise some patches to the runtime
    // implemented by esp-idf-sys might not link properly.
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    info!("Starting camarray node on ESP32-CAM");

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let credentials = WifiCredentials::new(CONFIG.wifi_ssid, CONFIG.wifi_psk)?;
    let timeout = WaitTimeout::from_secs(CONFIG.connect_timeout_secs);

    let _wifi = match wifi::connect_station(peripherals.modem, &sysloop, nvs, &credentials, timeout)
    {
        Ok((wifi, _ip)) => wifi,
        Err(e) => {
            error!("WiFi connection failed: {:#}", e);
            loop {
                FreeRtos::delay_ms(60_000);
            }
        }
    };

    let settings = CameraSettings::from_toml_str(include_str!("../camera.toml"))?;
    let config = CameraConfig::default().with_settings(&settings)?;

    let lock = Arc::new(EspPmLock::cpu_freq_max()?);
    let mut power = PowerSequencer::new(Some(PinDriver::output(peripherals.pins.gpio32)?), FreeRtos);
    let camera = Camera::start(
        config,
        &mut power,
        XclkGate::new(&config),
        lock,
        EspCameraDriver::init,
    )?;

    let mut led = IndicatorLed::new(PinDriver::output(peripherals.pins.gpio33)?)?;
    led.set(true)?;

    let _server = http_server::start(Arc::new(Mutex::new(camera)))?;

    info!("Ready");
    loop {
        FreeRtos::delay_ms(1000);
    }
}
