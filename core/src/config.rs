//! Device configuration
//!
//! Persisted in a key/value [`ConfigStore`] where every value is the JSON text
//! of the field, read once at boot and changed only through the command
//! channel.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::battery::BatteryClamp;
use crate::calendar::{TimeZone, TrackingWindow};
use crate::schedule::{SleepPolicy, TimeOfDay, DEFAULT_REFRESH_HOURS};

/// Every recognized key, in storage order
pub const CONFIG_KEYS: [&str; 16] = [
    "wifi_ssid",
    "wifi_pass",
    "client_id",
    "client_secret",
    "refresh_token",
    "sport",
    "window",
    "latitude",
    "longitude",
    "tide_station",
    "buoy_station",
    "refresh_hours",
    "schedule",
    "timezone",
    "battery_clamp",
    "allow_unverified_tls",
];

pub const MAX_SCHEDULE_ENTRIES: usize = 24;
pub const DEFAULT_TIMEZONE: &str = "UTC0";

/// Which set of sources this build syncs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// One credentialed, paginated activity service
    Activity,
    /// Weather, tide and buoy services
    Environment,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Activity => "activity",
            Variant::Environment => "environment",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed json")]
    Json,
    #[error("expected a json object")]
    NotAnObject,
    #[error("unknown key `{0}`")]
    UnknownKey(String),
    #[error("invalid value for `{0}`")]
    InvalidValue(&'static str),
    #[error("configuration store failed")]
    Store,
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Json => "BAD_JSON",
            ConfigError::NotAnObject => "NOT_OBJECT",
            ConfigError::UnknownKey(_) => "UNKNOWN_KEY",
            ConfigError::InvalidValue(_) => "INVALID_VALUE",
            ConfigError::Store => "STORE",
        }
    }
}

/// Persistent key/value storage
pub trait ConfigStore {
    type Error: core::fmt::Debug;

    fn get(&mut self, key: &str) -> Result<Option<String>, Self::Error>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), Self::Error>;
    /// Remove every key
    fn erase_all(&mut self) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    /// Sport to track, matched case-insensitively; empty tracks all
    pub sport: String,
    pub window: TrackingWindow,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub tide_station: String,
    pub buoy_station: String,
    pub refresh_hours: u16,
    /// Local wake times; overrides `refresh_hours` when non-empty
    pub schedule: Vec<TimeOfDay>,
    /// POSIX `TZ` rule, e.g. `PST8PDT,M3.2.0,M11.1.0`
    pub timezone: String,
    /// Substitute implausibly low battery readings taken on external power
    pub battery_clamp: bool,
    /// Send activity credentials even when the transport cannot verify the
    /// server certificate
    pub allow_unverified_tls: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
            sport: String::new(),
            window: TrackingWindow::Week,
            latitude: None,
            longitude: None,
            tide_station: String::new(),
            buoy_station: String::new(),
            refresh_hours: DEFAULT_REFRESH_HOURS,
            schedule: Vec::new(),
            timezone: String::from(DEFAULT_TIMEZONE),
            battery_clamp: true,
            allow_unverified_tls: false,
        }
    }
}

/// What a merge changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfigChange {
    pub changed: bool,
    /// `client_id`, `client_secret` or `refresh_token` changed, so the cached
    /// bearer token no longer belongs to this configuration
    pub credentials_changed: bool,
}

fn take<T: DeserializeOwned>(key: &'static str, value: Value) -> Result<T, ConfigError> {
    serde_json::from_value(value).map_err(|_| ConfigError::InvalidValue(key))
}

fn canonical_key(key: &str) -> Result<&'static str, ConfigError> {
    CONFIG_KEYS
        .iter()
        .copied()
        .find(|k| *k == key)
        .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))
}

impl Configuration {
    pub fn location(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }

    /// Enough is set for `variant` to attempt a sync
    pub fn is_complete(&self, variant: Variant) -> bool {
        if self.wifi_ssid.is_empty() {
            return false;
        }
        match variant {
            Variant::Activity => {
                !self.client_id.is_empty()
                    && !self.client_secret.is_empty()
                    && !self.refresh_token.is_empty()
            }
            Variant::Environment => {
                self.location().is_some()
                    || !self.tide_station.is_empty()
                    || !self.buoy_station.is_empty()
            }
        }
    }

    pub fn sleep_policy(&self) -> SleepPolicy<'_> {
        if self.schedule.is_empty() {
            SleepPolicy::FixedInterval {
                hours: self.refresh_hours,
            }
        } else {
            SleepPolicy::FixedSchedule(&self.schedule)
        }
    }

    /// Validated on every merge and load, so UTC only covers a hand-built value
    pub fn time_zone(&self) -> TimeZone {
        TimeZone::parse(&self.timezone).unwrap_or_default()
    }

    pub fn battery_clamp(&self) -> Option<BatteryClamp> {
        self.battery_clamp.then_some(BatteryClamp::DEFAULT)
    }

    /// Assign one key from its JSON value
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), ConfigError> {
        let key = canonical_key(key)?;
        match key {
            "wifi_ssid" => self.wifi_ssid = take(key, value)?,
            "wifi_pass" => self.wifi_pass = take(key, value)?,
            "client_id" => self.client_id = take(key, value)?,
            "client_secret" => self.client_secret = take(key, value)?,
            "refresh_token" => self.refresh_token = take(key, value)?,
            "sport" => self.sport = take(key, value)?,
            "window" => self.window = take(key, value)?,
            "latitude" => self.latitude = take(key, value)?,
            "longitude" => self.longitude = take(key, value)?,
            "tide_station" => self.tide_station = take(key, value)?,
            "buoy_station" => self.buoy_station = take(key, value)?,
            "refresh_hours" => self.refresh_hours = take(key, value)?,
            "schedule" => {
                let mut schedule: Vec<TimeOfDay> = take(key, value)?;
                schedule.sort_unstable();
                schedule.dedup();
                self.schedule = schedule;
            }
            "timezone" => self.timezone = take(key, value)?,
            "battery_clamp" => self.battery_clamp = take(key, value)?,
            "allow_unverified_tls" => self.allow_unverified_tls = take(key, value)?,
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    /// Range checks that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let check = |ok: bool, key: &'static str| if ok { Ok(()) } else { Err(ConfigError::InvalidValue(key)) };
        check(self.wifi_ssid.len() <= 32, "wifi_ssid")?;
        check(self.wifi_pass.len() <= 64, "wifi_pass")?;
        check(self.client_secret.len() <= 128, "client_secret")?;
        check(self.refresh_token.len() <= 255, "refresh_token")?;
        check(
            self.latitude.is_none_or(|v| (-90.0..=90.0).contains(&v)),
            "latitude",
        )?;
        check(
            self.longitude.is_none_or(|v| (-180.0..=180.0).contains(&v)),
            "longitude",
        )?;
        check((1..=168).contains(&self.refresh_hours), "refresh_hours")?;
        check(self.schedule.len() <= MAX_SCHEDULE_ENTRIES, "schedule")?;
        check(
            self.timezone.len() <= 64 && TimeZone::parse(&self.timezone).is_some(),
            "timezone",
        )?;
        let station_ok = |s: &str| s.len() <= 16 && s.bytes().all(|b| b.is_ascii_alphanumeric());
        check(station_ok(self.tide_station.as_str()), "tide_station")?;
        check(station_ok(self.buoy_station.as_str()), "buoy_station")?;
        Ok(())
    }

    /// Merge a partial JSON object into a copy, validate it, then adopt it.
    ///
    /// On any error `self` is left untouched.
    pub fn merge_json(&mut self, json: &str) -> Result<ConfigChange, ConfigError> {
        let value: Value = serde_json::from_str(json).map_err(|_| ConfigError::Json)?;
        let Value::Object(map) = value else {
            return Err(ConfigError::NotAnObject);
        };
        let mut next = self.clone();
        for (key, value) in map {
            next.set(&key, value)?;
        }
        next.validate()?;

        let change = ConfigChange {
            changed: next != *self,
            credentials_changed: next.client_id != self.client_id
                || next.client_secret != self.client_secret
                || next.refresh_token != self.refresh_token,
        };
        *self = next;
        Ok(change)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Read every key from `store`. Missing keys keep their default; a stored
    /// value that no longer parses is logged and ignored.
    pub fn load<S: ConfigStore + ?Sized>(store: &mut S) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for key in CONFIG_KEYS {
            let Some(text) = store.get(key).map_err(|e| {
                log::error!("config store read {} failed: {:?}", key, e);
                ConfigError::Store
            })?
            else {
                continue;
            };
            let applied = serde_json::from_str::<Value>(&text)
                .map_err(|_| ConfigError::InvalidValue(key))
                .and_then(|value| config.set(key, value));
            if let Err(e) = applied {
                log::warn!("ignoring stored {}: {}", key, e);
            }
        }
        if let Err(e) = config.validate() {
            log::warn!("stored configuration out of range ({}), using defaults", e);
            return Ok(Self::default());
        }
        log::info!(
            "config: ssid {:?}, pass {} bytes, client {:?}, secret {} bytes, token {} bytes",
            config.wifi_ssid,
            config.wifi_pass.len(),
            config.client_id,
            config.client_secret.len(),
            config.refresh_token.len()
        );
        Ok(config)
    }

    /// Write every key to `store`
    pub fn save<S: ConfigStore + ?Sized>(&self, store: &mut S) -> Result<(), ConfigError> {
        let Ok(Value::Object(map)) = serde_json::to_value(self) else {
            return Err(ConfigError::Json);
        };
        for (key, value) in &map {
            store.set(key, &value.to_string()).map_err(|e| {
                log::error!("config store write {} failed: {:?}", key, e);
                ConfigError::Store
            })?;
        }
        Ok(())
    }
}
