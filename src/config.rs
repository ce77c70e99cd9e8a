use anyhow::Result;
use ota_core::OtaConfig;

pub const CONFIG_NAMESPACE: &str = "ota";
pub const CONFIG_KEY: &str = "config";

/// Max config size
const MAX_BLOB_LEN: usize = 2048;

/// Persistent storage for the JSON config blob
pub trait BlobStore {
    fn load(&self) -> Result<Option<Vec<u8>>>;
    fn save(&mut self, data: &[u8]) -> Result<()>;
}

fn parse(data: &[u8]) -> Result<OtaConfig> {
    let config: OtaConfig = serde_json::from_slice(data)?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("stored config rejected: {e}"))?;
    Ok(config)
}

pub fn save(store: &mut dyn BlobStore, config: &OtaConfig) -> Result<()> {
    let json = serde_json::to_vec(config)?;
    if json.len() > MAX_BLOB_LEN {
        anyhow::bail!("config is {} bytes, limit is {}", json.len(), MAX_BLOB_LEN);
    }
    store.save(&json)?;
    log::info!("OTA configuration saved");
    Ok(())
}

/// Load the stored config, falling back to (and persisting) the defaults.
/// The current version always comes from the build.
pub fn load_or_default(store: &mut dyn BlobStore) -> OtaConfig {
    let loaded = match store.load() {
        Ok(Some(data)) => parse(&data),
        Ok(None) => Err(anyhow::anyhow!("no stored config")),
        Err(e) => Err(e),
    };

    let mut config = match loaded {
        Ok(config) => {
            log::info!("Loaded OTA configuration");
            config
        }
        Err(e) => {
            log::warn!("Failed to load config: {:?}, using defaults", e);
            let config = OtaConfig::default();

            // Try to save default config for next time
            if let Err(save_err) = save(store, &config) {
                log::warn!("Failed to save default config: {:?}", save_err);
            }
            config
        }
    };

    config.current_version = crate::version::CURRENT_VERSION.to_string();
    config
}

#[cfg(target_os = "espidf")]
pub use nvs_store::NvsBlobStore;

#[cfg(target_os = "espidf")]
mod nvs_store {
    use super::{BlobStore, CONFIG_KEY, CONFIG_NAMESPACE, MAX_BLOB_LEN};
    use anyhow::Result;
    use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};

    pub struct NvsBlobStore {
        nvs: EspNvs<NvsDefault>,
    }

    impl NvsBlobStore {
        pub fn new(partition: EspDefaultNvsPartition) -> Result<Self> {
            Ok(Self {
                nvs: EspNvs::new(partition, CONFIG_NAMESPACE, true)?,
            })
        }
    }

    impl BlobStore for NvsBlobStore {
        fn load(&self) -> Result<Option<Vec<u8>>> {
            let mut buf = vec![0u8; MAX_BLOB_LEN];
            Ok(self.nvs.get_blob(CONFIG_KEY, &mut buf)?.map(<[u8]>::to_vec))
        }

        fn save(&mut self, data: &[u8]) -> Result<()> {
            self.nvs.set_blob(CONFIG_KEY, data)?;
            Ok(())
        }
    }
}

#[cfg(not(target_os = "espidf"))]
pub use file_store::FileBlobStore;

#[cfg(not(target_os = "espidf"))]
mod file_store {
    use super::BlobStore;
    use anyhow::Result;
    use std::fs;
    use std::io::ErrorKind;
    use std::path::PathBuf;

    /// JSON file standing in for NVS on the host
    pub struct FileBlobStore {
        path: PathBuf,
    }

    impl FileBlobStore {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self { path: path.into() }
        }
    }

    impl BlobStore for FileBlobStore {
        fn load(&self) -> Result<Option<Vec<u8>>> {
            match fs::read(&self.path) {
                Ok(data) => Ok(Some(data)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        }

        fn save(&mut self, data: &[u8]) -> Result<()> {
            fs::write(&self.path, data)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MemoryStore {
        data: Option<Vec<u8>>,
        saves: u32,
    }

    impl BlobStore for MemoryStore {
        fn load(&self) -> Result<Option<Vec<u8>>> {
            Ok(self.data.clone())
        }

        fn save(&mut self, data: &[u8]) -> Result<()> {
            self.data = Some(data.to_vec());
            self.saves += 1;
            Ok(())
        }
    }

    #[test]
    fn test_missing_config_persists_defaults() {
        let mut store = MemoryStore::default();
        let config = load_or_default(&mut store);

        assert_eq!(config.host, OtaConfig::default().host);
        assert_eq!(config.current_version, crate::version::CURRENT_VERSION);
        assert_eq!(store.saves, 1);
        assert!(store.data.is_some());
    }

    #[test]
    fn test_stored_config_is_used() {
        let mut store = MemoryStore {
            data: Some(br#"{"host":"updates.example.net","check_interval_secs":60}"#.to_vec()),
            saves: 0,
        };
        let config = load_or_default(&mut store);

        assert_eq!(config.host, "updates.example.net");
        assert_eq!(config.check_interval_secs, 60);
        assert_eq!(store.saves, 0);
    }

    #[test]
    fn test_invalid_stored_config_falls_back() {
        let mut store = MemoryStore {
            data: Some(br#"{"dns_attempts":0}"#.to_vec()),
            saves: 0,
        };
        let config = load_or_default(&mut store);

        assert_eq!(config.dns_attempts, OtaConfig::default().dns_attempts);
        assert_eq!(store.saves, 1);
    }

    #[test]
    fn test_corrupt_blob_falls_back() {
        let mut store = MemoryStore {
            data: Some(b"\xff\x00not json".to_vec()),
            saves: 0,
        };
        assert_eq!(load_or_default(&mut store).port, 443);
    }
}
