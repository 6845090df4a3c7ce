use std::path::Path;

#[toml_cfg::toml_config]
pub struct Config {
    #[default("")]
    wifi_ssid: &'static str,
    #[default("")]
    wifi_psk: &'static str,
    #[default(0)]
    connect_timeout_secs: u64,
}

fn main() {
    // Necessary because of this issue: https://github.com/rust-lang/cargo/issues/9641
    embuild::espidf::sysenv::output();

    if !Path::new("cfg.toml").exists() {
        panic!(
            "cfg.toml not found!\n\
            Please copy cfg.toml.example to cfg.toml and set your WiFi credentials:\n\
            cp cfg.toml.example cfg.toml"
        );
    }

    // Validate credentials are not placeholders
    let app_config = CONFIG;
    if app_config.wifi_ssid == "YourNetworkName" || app_config.wifi_ssid.is_empty() {
        panic!(
            "Please set a valid WiFi SSID in cfg.toml\n\
            Current value: '{}'",
            app_config.wifi_ssid
        );
    }

    if app_config.wifi_psk == "YourPassword" {
        panic!("Please set your actual WiFi password in cfg.toml (leave it empty for an open network)");
    }

    println!("cargo:rerun-if-changed=cfg.toml");
    println!("cargo:rerun-if-changed=camera.toml");
}
