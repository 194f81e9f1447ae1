//! Configuration store on the SD card
//!
//! Every key lives in one JSON object in `CONFIG.JSN` at the root of the first
//! FAT volume, `{"wifi_ssid":"\"home\"", ...}`. The object is read once and
//! kept in memory; every change rewrites the whole file.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use embedded_hal::spi::SpiDevice;
use embedded_sdmmc::{Mode, SdCard, TimeSource, Timestamp, VolumeIdx, VolumeManager};
use wakeframe_core::config::ConfigStore;

/// 8.3 name, FAT has no long names here
const CONFIG_FILE: &str = "CONFIG.JSN";
const MAX_FILE_BYTES: usize = 8 * 1024;

/// SD cards need timestamps but nothing here reads them
pub struct FixedTimesource;

impl TimeSource for FixedTimesource {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 55,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

#[derive(Debug)]
pub enum StoreError {
    SdCard,
    Filesystem,
    Read,
    Write,
    /// The file exists but is not a JSON object of strings
    Corrupt,
    TooLarge,
}

type Entries = BTreeMap<String, String>;

pub struct SdConfigStore<SPI: SpiDevice, DELAY: embedded_hal::delay::DelayNs> {
    volume_mgr: VolumeManager<SdCard<SPI, DELAY>, FixedTimesource>,
    entries: Option<Entries>,
}

impl<SPI, DELAY> SdConfigStore<SPI, DELAY>
where
    SPI: SpiDevice,
    DELAY: embedded_hal::delay::DelayNs,
{
    pub fn new(spi: SPI, delay: DELAY) -> Result<Self, StoreError> {
        let sd_card = SdCard::new(spi, delay);
        match sd_card.num_bytes() {
            Ok(size) => log::info!("SD card size: {} MB", size / 1024 / 1024),
            Err(e) => {
                log::error!("SD card not readable: {:?}", e);
                return Err(StoreError::SdCard);
            }
        }
        Ok(Self {
            volume_mgr: VolumeManager::new(sd_card, FixedTimesource),
            entries: None,
        })
    }

    fn read_file(&mut self) -> Result<Option<Vec<u8>>, StoreError> {
        let mut volume = self
            .volume_mgr
            .open_volume(VolumeIdx(0))
            .map_err(|_| StoreError::Filesystem)?;
        let mut root_dir = volume.open_root_dir().map_err(|_| StoreError::Filesystem)?;
        let Ok(mut file) = root_dir.open_file_in_dir(CONFIG_FILE, Mode::ReadOnly) else {
            return Ok(None);
        };

        let mut contents = Vec::new();
        let mut chunk = [0u8; 512];
        loop {
            match file.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => contents.extend_from_slice(&chunk[..n]),
                Err(_) => return Err(StoreError::Read),
            }
            if contents.len() > MAX_FILE_BYTES {
                return Err(StoreError::TooLarge);
            }
        }
        Ok(Some(contents))
    }

    fn write_file(&mut self, contents: &[u8]) -> Result<(), StoreError> {
        let mut volume = self
            .volume_mgr
            .open_volume(VolumeIdx(0))
            .map_err(|_| StoreError::Filesystem)?;
        let mut root_dir = volume.open_root_dir().map_err(|_| StoreError::Filesystem)?;
        let mut file = root_dir
            .open_file_in_dir(CONFIG_FILE, Mode::ReadWriteCreateOrTruncate)
            .map_err(|_| StoreError::Write)?;
        file.write(contents).map_err(|_| StoreError::Write)?;
        file.flush().map_err(|_| StoreError::Write)?;
        log::debug!("wrote {} bytes to {}", contents.len(), CONFIG_FILE);
        Ok(())
    }

    fn entries(&mut self) -> Result<&mut Entries, StoreError> {
        if self.entries.is_none() {
            let entries = match self.read_file()? {
                Some(contents) => decode(&contents)?,
                None => Entries::new(),
            };
            log::info!("config store: {} keys", entries.len());
            self.entries = Some(entries);
        }
        self.entries.as_mut().ok_or(StoreError::Read)
    }

    fn persist(&mut self) -> Result<(), StoreError> {
        let contents = match &self.entries {
            Some(entries) => encode(entries)?,
            None => return Ok(()),
        };
        self.write_file(&contents)
    }
}

fn decode(contents: &[u8]) -> Result<Entries, StoreError> {
    serde_json::from_slice(contents).map_err(|e| {
        log::error!("{} unreadable: {}", CONFIG_FILE, e);
        StoreError::Corrupt
    })
}

fn encode(entries: &Entries) -> Result<Vec<u8>, StoreError> {
    let contents = serde_json::to_vec(entries).map_err(|_| StoreError::Corrupt)?;
    if contents.len() > MAX_FILE_BYTES {
        return Err(StoreError::TooLarge);
    }
    Ok(contents)
}

impl<SPI, DELAY> ConfigStore for SdConfigStore<SPI, DELAY>
where
    SPI: SpiDevice,
    DELAY: embedded_hal::delay::DelayNs,
{
    type Error = StoreError;

    fn get(&mut self, key: &str) -> Result<Option<String>, Self::Error> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), Self::Error> {
        let entries = self.entries()?;
        if entries.get(key).is_some_and(|v| v == value) {
            return Ok(());
        }
        entries.insert(String::from(key), String::from(value));
        self.persist()
    }

    fn erase_all(&mut self) -> Result<(), Self::Error> {
        self.entries = Some(Entries::new());
        self.persist()
    }
}
