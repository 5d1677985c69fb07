//! WiFi station for the EMG node.
//!
//! Unlike a blocking connect, association here is driven by the lifecycle:
//! [`Network::begin`] configures and starts the station, then the boot loop
//! polls [`Network::is_associated`] and nudges with [`Network::reconnect`].

use anyhow::{anyhow, bail, Result};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, peripheral},
    nvs::EspDefaultNvsPartition,
    wifi::{AuthMethod, ClientConfiguration, Configuration, EspWifi},
};
use log::{debug, info, warn};

use emg_core::hal::format_mac;
use emg_core::Network;

use crate::config::WifiConfig;

/// ESP-IDF WiFi station.
pub struct EspNetwork {
    wifi: Box<EspWifi<'static>>,
    configuration: Configuration,
}

impl EspNetwork {
    /// Create the driver. Nothing is started until [`Network::begin`].
    pub fn new(
        modem: impl peripheral::Peripheral<P = Modem> + 'static,
        sysloop: EspSystemEventLoop,
        nvs: Option<EspDefaultNvsPartition>,
        config: &WifiConfig,
    ) -> Result<Self> {
        if config.ssid.is_empty() {
            bail!("WiFi SSID cannot be empty");
        }

        let auth_method = if config.is_open() {
            info!("WiFi password is empty, using open network");
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };

        let configuration = Configuration::Client(ClientConfiguration {
            ssid: config
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("SSID too long (max 32 chars)"))?,
            password: config
                .password
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("Password too long (max 64 chars)"))?,
            auth_method,
            ..Default::default()
        });

        let wifi = EspWifi::new(modem, sysloop, nvs)?;
        Ok(Self {
            wifi: Box::new(wifi),
            configuration,
        })
    }

    fn start(&mut self) -> Result<()> {
        if self.wifi.is_started()? {
            self.wifi.stop()?;
        }
        self.wifi.set_configuration(&self.configuration)?;
        self.wifi.start()?;
        self.wifi.connect()?;
        Ok(())
    }
}

impl Network for EspNetwork {
    fn begin(&mut self) {
        if let Configuration::Client(client) = &self.configuration {
            info!("Connecting to '{}'...", client.ssid);
        }
        if let Err(e) = self.start() {
            warn!("WiFi start failed: {:?}", e);
        }
    }

    fn reconnect(&mut self) {
        // Fails while a connect is still in flight; the next poll retries.
        if let Err(e) = self.wifi.connect() {
            debug!("WiFi reconnect: {:?}", e);
        }
    }

    fn is_associated(&mut self) -> bool {
        let connected = self.wifi.is_connected().unwrap_or(false);
        connected && self.wifi.sta_netif().is_up().unwrap_or(false)
    }

    fn local_ip(&self) -> Option<String> {
        let ip_info = self.wifi.sta_netif().get_ip_info().ok()?;
        info!("  IP address: {}", ip_info.ip);
        info!("  Gateway:    {}", ip_info.subnet.gateway);
        info!("  Netmask:    {}", ip_info.subnet.mask);
        Some(ip_info.ip.to_string())
    }

    fn mac_address(&self) -> Option<String> {
        self.wifi.sta_netif().get_mac().ok().map(format_mac)
    }
}
