use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use camarray_core::{
    ConnectionSession, ConnectionStateMachine, NetEvent, Station, WaitTimeout, WifiCredentials,
};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::netif::IpEvent;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration, EspWifi, WifiEvent};
use esp_idf_sys::{esp, EspError};
use log::{error, info};

/// Association requests go straight to the driver; the outcome arrives as an
/// event.
struct EspStation;

impl Station for EspStation {
    type Error = EspError;

    fn connect(&mut self) -> Result<(), EspError> {
        esp!(unsafe { esp_idf_sys::esp_wifi_connect() })
    }
}

type SharedMachine = Arc<Mutex<ConnectionStateMachine<EspStation>>>;

fn dispatch(machine: &SharedMachine, event: NetEvent) {
    match machine.lock() {
        Ok(mut machine) => {
            machine.handle(event);
        }
        Err(_) => error!("Connection state machine poisoned, dropping {:?}", event),
    }
}

/// Bring up station mode and block until an address is assigned, retries run
/// out, or `timeout` passes. The returned driver must be kept alive.
pub fn connect_station(
    modem: Modem,
    sysloop: &EspSystemEventLoop,
    nvs: EspDefaultNvsPartition,
    credentials: &WifiCredentials,
    timeout: WaitTimeout,
) -> anyhow::Result<(EspWifi<'static>, Ipv4Addr)> {
    let mut wifi = EspWifi::new(modem, sysloop.clone(), Some(nvs))?;

    let auth_method = if credentials.is_open() {
        AuthMethod::None
    } else {
        AuthMethod::WPA2Personal
    };
    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: credentials.ssid.clone(),
        password: credentials.password.clone(),
        auth_method,
        ..Default::default()
    }))?;

    let session = ConnectionSession::new();
    let machine: SharedMachine = Arc::new(Mutex::new(session.state_machine(EspStation)));

    let wifi_machine = machine.clone();
    let wifi_subscription = sysloop.subscribe::<WifiEvent, _>(move |event| {
        let event = match event {
            WifiEvent::StaStarted => NetEvent::StaStarted,
            WifiEvent::StaDisconnected(_) => NetEvent::StaDisconnected,
            _ => return,
        };
        dispatch(&wifi_machine, event);
    })?;

    let ip_machine = machine.clone();
    let ip_subscription = sysloop.subscribe::<IpEvent, _>(move |event| {
        if let IpEvent::DhcpIpAssigned(assignment) = event {
            let ip = Ipv4Addr::from(assignment.ip().octets());
            dispatch(&ip_machine, NetEvent::GotIp(ip));
        }
    })?;

    info!("Connecting to {:?}", credentials.ssid);
    wifi.start()?;

    let result = session.wait(timeout);

    // Later disconnects are not retried.
    drop(wifi_subscription);
    drop(ip_subscription);

    let retries = machine
        .lock()
        .map(|machine| machine.retries())
        .map_err(|_| anyhow!("connection state machine poisoned"))?;

    match result {
        Ok(ip) => {
            info!("Connected with IP {} after {} retries", ip, retries);
            Ok((wifi, ip))
        }
        Err(e) => Err(e.into()),
    }
}
