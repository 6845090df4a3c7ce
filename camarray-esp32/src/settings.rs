/// Build-time settings read from `cfg.toml`.
#[toml_cfg::toml_config]
pub struct Config {
    #[default("")]
    wifi_ssid: &'static str,
    #[default("")]
    wifi_psk: &'static str,
    /// Seconds to wait for an address. 0 waits forever.
    #[default(0)]
    connect_timeout_secs: u64,
}
