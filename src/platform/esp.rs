// ESP-IDF backed capabilities for the OTA manager

use core::ffi::c_char;
use std::ffi::CString;
use std::net::Ipv4Addr;
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use base64::Engine as _;
use embedded_svc::http::client::Connection;
use embedded_svc::http::Method;
use embedded_svc::io::Read;
use esp_idf_hal::modem::Modem;
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::http::client::{Configuration as HttpConfig, EspHttpConnection};
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs};
use esp_idf_svc::ota::EspOta;
use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};

use ota_core::address;
use ota_core::certs::TrustAnchorId;
use ota_core::config::flags;
use ota_core::platform::{
    CompletionHandler, Connectivity, DownloadRequest, Downloader, Endpoint, MonotonicClock,
    Platform, Resolver, SettleInstaller, StoreError, TransferOutcome, TransportCode,
    TrustAnchorSource, TrustStore, VersionSource,
};
use ota_core::OtaConfig;

use crate::config::NvsBlobStore;

const BUF_MAX: usize = 4096;

pub struct Board {
    modem: Option<Modem>,
    sys_loop: EspSystemEventLoop,
    nvs: EspDefaultNvsPartition,
    // Dropping the driver disconnects the station
    #[allow(dead_code)]
    wifi: Option<BlockingWifi<EspWifi<'static>>>,
}

impl Board {
    pub fn take() -> Result<Self> {
        esp_idf_svc::sys::link_patches();
        let peripherals = Peripherals::take()?;
        Ok(Self {
            modem: Some(peripherals.modem),
            sys_loop: EspSystemEventLoop::take()?,
            nvs: EspDefaultNvsPartition::take()?,
            wifi: None,
        })
    }

    pub fn config_store(&self) -> Result<NvsBlobStore> {
        NvsBlobStore::new(self.nvs.clone())
    }

    /// Connect WiFi and assemble the capabilities
    pub fn start(&mut self, _config: &OtaConfig) -> Result<Platform> {
        let modem = self
            .modem
            .take()
            .ok_or_else(|| anyhow!("board already started"))?;
        self.wifi = Some(connect_wifi(modem, self.sys_loop.clone(), self.nvs.clone())?);

        Ok(Platform {
            connectivity: Arc::new(WifiLink),
            resolver: Arc::new(LwipResolver),
            version_source: Arc::new(HttpVersionSource),
            downloader: Arc::new(HttpOtaDownloader::default()),
            trust_store: Arc::new(GlobalCaStore),
            anchors: Arc::new(NvsAnchors::load(self.nvs.clone())?),
            installer: Arc::new(SettleInstaller),
            clock: Arc::new(MonotonicClock::new()),
        })
    }
}

pub fn restart() {
    log::warn!("Restarting to boot the new firmware...");
    thread::sleep(Duration::from_millis(1000));
    unsafe { esp_idf_sys::esp_restart() };
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs: EspDefaultNvsPartition,
) -> Result<BlockingWifi<EspWifi<'static>>> {
    // Credentials come from the build environment and must not be committed
    let ssid = option_env!("WIFI_SSID").unwrap_or_default();
    let password = option_env!("WIFI_PASSWORD").unwrap_or_default();
    if ssid.is_empty() {
        bail!("WiFi SSID cannot be empty, set WIFI_SSID when building");
    }

    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs))?;
    esp_wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: ssid
            .try_into()
            .map_err(|_| anyhow!("Invalid SSID format: {}", ssid))?,
        password: password
            .try_into()
            .map_err(|_| anyhow!("Invalid password format"))?,
        auth_method: if password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        },
        ..Default::default()
    }))?;

    let mut wifi = BlockingWifi::wrap(esp_wifi, sys_loop)?;
    log::info!("Connecting to {}...", ssid);
    wifi.start()?;
    wifi.connect()?;
    wifi.wait_netif_up()?;
    log::info!("WiFi connected!");
    Ok(wifi)
}

struct WifiLink;

impl Connectivity for WifiLink {
    fn is_connected(&self) -> bool {
        unsafe {
            let mut ap_info: esp_idf_sys::wifi_ap_record_t = core::mem::zeroed();
            esp_idf_sys::esp_wifi_sta_get_ap_info(&mut ap_info) == esp_idf_sys::ESP_OK
        }
    }
}

struct LwipResolver;

fn lwip_lookup(host: &CString) -> Result<Ipv4Addr> {
    let mut hints: esp_idf_sys::addrinfo = unsafe { core::mem::zeroed() };
    hints.ai_family = esp_idf_sys::AF_INET as _;
    hints.ai_socktype = esp_idf_sys::SOCK_STREAM as _;

    let mut result: *mut esp_idf_sys::addrinfo = core::ptr::null_mut();
    let rc = unsafe {
        esp_idf_sys::lwip_getaddrinfo(
            host.as_ptr(),
            core::ptr::null::<c_char>(),
            &hints,
            &mut result,
        )
    };
    if rc != 0 || result.is_null() {
        bail!("getaddrinfo returned {}", rc);
    }

    // lwIP keeps s_addr in network order in memory
    let addr = unsafe {
        let sockaddr = (*result).ai_addr as *const esp_idf_sys::sockaddr_in;
        let raw = (*sockaddr).sin_addr.s_addr;
        esp_idf_sys::lwip_freeaddrinfo(result);
        raw
    };
    Ok(address::from_stack_u32(addr))
}

impl Resolver for LwipResolver {
    fn resolve(&self, host: &str, timeout: Duration) -> Result<Ipv4Addr> {
        let host = CString::new(host)?;
        let (tx, rx) = mpsc::sync_channel(1);

        // getaddrinfo has no timeout of its own; a late answer is dropped
        thread::Builder::new()
            .name("ota_dns".into())
            .stack_size(4096)
            .spawn(move || {
                let _ = tx.send(lwip_lookup(&host));
            })?;

        rx.recv_timeout(timeout)
            .map_err(|_| anyhow!("DNS lookup timed out after {} ms", timeout.as_millis()))?
    }
}

// The transport connects by host name so TLS can verify the server name;
// the resolved address only confirms the host is reachable.
fn url(endpoint: &Endpoint<'_>) -> String {
    let scheme = if endpoint.flags & flags::HTTPS != 0 { "https" } else { "http" };
    format!("{}://{}:{}/{}", scheme, endpoint.host, endpoint.port, endpoint.resource)
}

fn http_connection() -> Result<EspHttpConnection> {
    Ok(EspHttpConnection::new(&HttpConfig {
        use_global_ca_store: true,
        buffer_size: Some(BUF_MAX),
        timeout: Some(Duration::from_secs(30)),
        ..Default::default()
    })?)
}

fn transport_error(e: esp_idf_sys::EspError, what: &'static str) -> anyhow::Error {
    anyhow::Error::new(TransportCode(e.code() as u32)).context(what)
}

struct HttpVersionSource;

impl VersionSource for HttpVersionSource {
    fn fetch(&self, endpoint: &Endpoint<'_>) -> Result<String> {
        let mut conn = http_connection()?;
        conn.initiate_request(Method::Get, &url(endpoint), &[])
            .map_err(|e| transport_error(e, "version request"))?;
        conn.initiate_response()
            .map_err(|e| transport_error(e, "version response"))?;

        let status = conn.status();
        if status != 200 {
            bail!("HTTP {} from version endpoint", status);
        }

        let mut body = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            let n = Read::read(&mut conn, &mut buf).context("reading version body")?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&buf[..n]);
            if body.len() > 1024 {
                bail!("version body too large");
            }
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

#[derive(Default)]
struct HttpOtaDownloader {
    handler: Mutex<Option<Arc<dyn Fn(TransferOutcome) + Send + Sync>>>,
}

fn stream_to_flash(mut conn: EspHttpConnection) -> Result<usize> {
    let mut ota = EspOta::new()?;
    let mut update = ota.initiate_update()?;

    let mut buf = [0u8; BUF_MAX];
    let mut written = 0usize;
    loop {
        let n = Read::read(&mut conn, &mut buf).context("reading firmware body")?;
        if n == 0 {
            break;
        }
        update.write(&buf[..n])?;
        written += n;
    }

    if written == 0 {
        update.abort()?;
        bail!("received 0 bytes");
    }
    update.complete()?;
    Ok(written)
}

impl Downloader for HttpOtaDownloader {
    fn set_completion_handler(&self, handler: CompletionHandler) -> Result<()> {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::from(handler));
        Ok(())
    }

    fn begin(&self, request: &DownloadRequest<'_>) -> Result<()> {
        let handler = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| anyhow!("no completion handler registered"))?;

        let mut headers: Vec<(String, String)> = Vec::new();
        if let Some(extra) = request.extended_header {
            for line in extra.lines() {
                if let Some((name, value)) = line.split_once(':') {
                    headers.push((name.trim().to_string(), value.trim().to_string()));
                }
            }
        }
        if let (Some(user), Some(pass)) = (request.username, request.password) {
            let token = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
            headers.push(("Authorization".to_string(), format!("Basic {token}")));
        }
        let header_refs: Vec<(&str, &str)> = headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();

        log::info!(
            "Firmware request via {} using credential slot {}",
            request.endpoint.address,
            request.trust_slot
        );

        let mut conn = http_connection()?;
        conn.initiate_request(Method::Get, &url(&request.endpoint), &header_refs)
            .map_err(|e| transport_error(e, "HTTP OTAF start failed"))?;
        conn.initiate_response()
            .map_err(|e| transport_error(e, "HTTP OTAF start failed"))?;
        let status = conn.status();
        if status != 200 {
            bail!("HTTP {} from firmware endpoint", status);
        }

        thread::Builder::new()
            .name("ota_xfer".into())
            .stack_size(8192)
            .spawn(move || {
                let outcome = match stream_to_flash(conn) {
                    Ok(written) => {
                        log::info!("Firmware image written ({} bytes)", written);
                        TransferOutcome::Success
                    }
                    Err(e) => TransferOutcome::Failed(format!("{e:#}")),
                };
                (*handler)(outcome);
            })?;
        Ok(())
    }
}

/// ESP-TLS global CA store. It has a single slot, so every slot index maps
/// onto it.
struct GlobalCaStore;

impl TrustStore for GlobalCaStore {
    fn delete(&self, _slot: u8) -> Result<(), StoreError> {
        unsafe { esp_idf_sys::esp_tls_free_global_ca_store() };
        Ok(())
    }

    fn set(&self, _slot: u8, material: &[u8]) -> Result<(), StoreError> {
        // PEM must be NUL terminated for mbedTLS
        let mut pem = material.to_vec();
        if pem.last() != Some(&0) {
            pem.push(0);
        }
        let rc = unsafe {
            esp_idf_sys::esp_tls_set_global_ca_store(pem.as_ptr(), pem.len() as u32)
        };
        match rc {
            esp_idf_sys::ESP_OK => Ok(()),
            esp_idf_sys::ESP_ERR_INVALID_ARG => Err(StoreError::InvalidParameter),
            esp_idf_sys::ESP_ERR_NO_MEM => Err(StoreError::Allocation),
            esp_idf_sys::ESP_FAIL => Err(StoreError::InvalidCredentials),
            other => Err(StoreError::Other(format!("esp-tls error {}", other))),
        }
    }
}

/// CA certificates provisioned into NVS at the factory
struct NvsAnchors {
    anchors: Vec<(TrustAnchorId, Vec<u8>)>,
}

impl NvsAnchors {
    const NAMESPACE: &'static str = "ota_ca";
    const MAX_PEM_LEN: usize = 4096;

    fn load(partition: EspDefaultNvsPartition) -> Result<Self> {
        let nvs = EspNvs::new(partition, Self::NAMESPACE, false)?;
        let mut anchors = Vec::new();
        for (id, key) in [
            (TrustAnchorId::StarfieldServicesRootCa, "starfield"),
            (TrustAnchorId::AmazonRootCa1, "amazon1"),
        ] {
            let mut buf = vec![0u8; Self::MAX_PEM_LEN];
            match nvs.get_blob(key, &mut buf)? {
                Some(pem) => anchors.push((id, pem.to_vec())),
                None => log::warn!("{} not provisioned", id.label()),
            }
        }
        Ok(Self { anchors })
    }
}

impl TrustAnchorSource for NvsAnchors {
    fn material(&self, id: TrustAnchorId) -> Option<&[u8]> {
        self.anchors
            .iter()
            .find(|(known, _)| *known == id)
            .map(|(_, pem)| pem.as_slice())
    }
}
