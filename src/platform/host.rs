// Host build: simulated transport with real name resolution

use std::env;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};

use ota_core::platform::{MonotonicClock, Platform, Resolver};
use ota_core::sim::{DownloadScript, SimPlatform};
use ota_core::OtaConfig;

use crate::config::FileBlobStore;

const DEFAULT_CONFIG_PATH: &str = "ota_config.json";

pub struct Board {
    sim: SimPlatform,
}

impl Board {
    pub fn take() -> Result<Self> {
        Ok(Self {
            sim: SimPlatform::new(),
        })
    }

    pub fn config_store(&self) -> Result<FileBlobStore> {
        let path = env::var("OTA_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Ok(FileBlobStore::new(path))
    }

    /// Serve the version from `OTA_SIM_VERSION` and finish downloads after
    /// `OTA_SIM_DOWNLOAD_MS`; resolve the configured host for real.
    pub fn start(&mut self, config: &OtaConfig) -> Result<Platform> {
        let published = env::var("OTA_SIM_VERSION").unwrap_or_else(|_| "1.1.0".to_string());
        self.sim.version_source.serve(&published);

        let after = env::var("OTA_SIM_DOWNLOAD_MS")
            .ok()
            .and_then(|ms| ms.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(3));
        self.sim.downloader.script(DownloadScript::Succeed { after });

        log::info!(
            "Simulated platform: {} publishes {}, downloads take {} ms",
            config.host,
            published,
            after.as_millis()
        );

        let mut platform = self.sim.platform();
        platform.resolver = Arc::new(StdResolver);
        platform.clock = Arc::new(MonotonicClock::new());
        Ok(platform)
    }
}

pub fn restart() {
    log::warn!("Restart requested; the host build keeps running");
}

/// System resolver bounded by the caller's timeout
struct StdResolver;

impl Resolver for StdResolver {
    fn resolve(&self, host: &str, timeout: Duration) -> Result<Ipv4Addr> {
        let (tx, rx) = mpsc::sync_channel(1);
        let name = host.to_string();

        // A lookup that outlives the timeout finishes in the background
        thread::Builder::new()
            .name("ota_dns".into())
            .spawn(move || {
                let result = (name.as_str(), 0)
                    .to_socket_addrs()
                    .map(|addrs| {
                        addrs
                            .filter_map(|addr| match addr.ip() {
                                IpAddr::V4(v4) => Some(v4),
                                IpAddr::V6(_) => None,
                            })
                            .next()
                    });
                let _ = tx.send(result);
            })?;

        match rx.recv_timeout(timeout) {
            Ok(Ok(Some(addr))) => Ok(addr),
            Ok(Ok(None)) => bail!("{} has no IPv4 address", host),
            Ok(Err(e)) => Err(anyhow!("lookup of {} failed: {}", host, e)),
            Err(_) => bail!("lookup of {} timed out after {} ms", host, timeout.as_millis()),
        }
    }
}
