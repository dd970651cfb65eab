use amplyze_lib::serialport::SerialSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "amplyze.yaml";

fn humantime_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub baud_rate: u32,
    #[serde(deserialize_with = "humantime_duration")]
    pub timeout: Duration,
    #[serde(deserialize_with = "humantime_duration")]
    pub settle_delay: Duration,
    pub command: String,
    pub logo: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let serial = SerialSettings::default();
        Self {
            baud_rate: serial.baud_rate,
            timeout: serial.timeout,
            settle_delay: serial.settle_delay,
            command: serial.command,
            logo: None,
            output_dir: None,
        }
    }
}

impl AppConfig {
    pub fn load(config_file_path: &Path) -> Result<Self> {
        log::debug!("Loading config file from {config_file_path:?}");
        let config_file = std::fs::File::open(config_file_path)
            .with_context(|| format!("Cannot open config file {config_file_path:?}"))?;
        let config: Self = serde_yaml::from_reader(&config_file)
            .with_context(|| format!("Cannot read config from file: {config_file_path:?}"))?;
        Ok(config)
    }

    /// Like [`AppConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(config_file_path: &Path) -> Result<Self> {
        if config_file_path.exists() {
            Self::load(config_file_path)
        } else {
            log::debug!("No config file at {config_file_path:?}, using defaults");
            Ok(Self::default())
        }
    }

    /// Serial settings with command line overrides applied.
    pub fn serial_settings(
        &self,
        baud_rate: Option<u32>,
        timeout: Option<Duration>,
        settle_delay: Option<Duration>,
    ) -> SerialSettings {
        SerialSettings {
            baud_rate: baud_rate.unwrap_or(self.baud_rate),
            timeout: timeout.unwrap_or(self.timeout),
            settle_delay: settle_delay.unwrap_or(self.settle_delay),
            command: self.command.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_default(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.command, "READ_ALL");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "baud_rate: 9600\ntimeout: 500ms\noutput_dir: /tmp/reports").unwrap();
        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.timeout, Duration::from_millis(500));
        assert_eq!(config.settle_delay, Duration::from_secs(1));
        assert_eq!(config.output_dir, Some(PathBuf::from("/tmp/reports")));
    }

    #[test]
    fn invalid_duration_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timeout: soon").unwrap();
        assert!(AppConfig::load(file.path()).is_err());
    }

    #[test]
    fn defaults_match_serial_settings() {
        let config = AppConfig::default();
        assert_eq!(config.serial_settings(None, None, None), SerialSettings::default());
    }

    #[test]
    fn command_line_overrides_file() {
        let config = AppConfig {
            baud_rate: 9600,
            ..Default::default()
        };
        let settings = config.serial_settings(None, Some(Duration::from_secs(5)), None);
        assert_eq!(settings.baud_rate, 9600);
        assert_eq!(settings.timeout, Duration::from_secs(5));
        assert_eq!(settings.settle_delay, Duration::from_secs(1));
    }
}
