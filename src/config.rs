// 設定ファイル
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::adapter::{self, AdapterModel};
use crate::connection_settings::ConnectionSettings;
use crate::skstack::authn;
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::io;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyS0";
pub const DEFAULT_MODEL: &str = "BP35A1";
pub const DEFAULT_RETRY_COUNT: u32 = 3;
/// 秒
pub const DEFAULT_UPDATE_INTERVAL: u64 = 10;
/// 秒
pub const DEFAULT_SESSION_LIFETIME: u64 = 900;

/// SKSREG S16 に設定できるPANAセッションライフタイム(秒)
pub const SESSION_LIFETIME_RANGE: RangeInclusive<u64> = 60..=0xFFFF_FFFF;

/// 診断情報で伏せる項目
pub const TO_REDACT: [&str; 3] = ["route_b_id", "route_b_pwd", "serial_port"];
pub const REDACTED: &str = "**REDACTED**";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(r#"設定ファイル "{path}" を読めない: {source}"#)]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(r#"toml "{0}""#)]
    Toml(#[from] toml::de::Error),
    #[error(r#"invalid id "{0}""#)]
    InvalidId(String),
    #[error(r#"invalid password "{0}""#)]
    InvalidPassword(String),
    #[error(transparent)]
    Adapter(#[from] adapter::Error),
    #[error(r#"cron "{0}""#)]
    Cron(#[from] cron::error::Error),
    #[error("{0} は 1 以上にしてください")]
    MustBePositive(&'static str),
    #[error("{key} は {min} 以上 {max} 以下にしてください")]
    OutOfRange {
        key: &'static str,
        min: u64,
        max: u64,
    },
}

/// 設定ファイルの場所と, 設定ファイルより優先する値
#[derive(Debug, Clone, clap::Args)]
pub struct SettingsArgs {
    /// 設定ファイル名
    #[arg(
        short = 'c',
        long = "config",
        env = "BROUTE_METER_CONFIG",
        default_value = "broute-meter.toml"
    )]
    pub config_file: PathBuf,

    /// シリアルデバイス名
    #[arg(short = 'D', long = "device", env = "SERIAL_DEVICE")]
    pub serial_port: Option<String>,

    /// Wi-SUNアダプタの機種(BP35A1 / BP35C2)
    #[arg(short = 'M', long, env = "BROUTE_MODEL")]
    pub model: Option<String>,

    /// ルートBID(32文字)
    #[arg(long = "id", env = "ROUTE_B_ID", hide_env_values = true)]
    pub route_b_id: Option<String>,

    /// ルートBパスワード(12文字)
    #[arg(long = "password", env = "ROUTE_B_PWD", hide_env_values = true)]
    pub route_b_pwd: Option<String>,
}

/// 設定
#[derive(Serialize, Deserialize, Clone, PartialEq)]
pub struct Settings {
    /// ルートBID(32文字)
    pub route_b_id: String,
    /// ルートBパスワード(12文字)
    pub route_b_pwd: String,
    #[serde(default = "default_serial_port")]
    pub serial_port: String,
    /// BP35A1 または BP35C2
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// 計測間隔(秒)
    #[serde(default = "default_update_interval")]
    pub update_interval: u64,
    /// cron式(秒 分 時 日 月 曜日) 指定すると計測間隔より優先する
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    /// PANA セッションライフタイム値(秒)
    #[serde(default = "default_session_lifetime")]
    pub session_lifetime: u64,
    /// ペアリング済みの接続情報
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionSettings>,
}

fn default_serial_port() -> String {
    DEFAULT_SERIAL_PORT.to_owned()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_owned()
}

fn default_retry_count() -> u32 {
    DEFAULT_RETRY_COUNT
}

fn default_update_interval() -> u64 {
    DEFAULT_UPDATE_INTERVAL
}

fn default_session_lifetime() -> u64 {
    DEFAULT_SESSION_LIFETIME
}

// 認証情報をログに出さない
impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Settings {}", self.redacted())
    }
}

impl Settings {
    pub fn new(route_b_id: impl Into<String>, route_b_pwd: impl Into<String>) -> Self {
        Self {
            route_b_id: route_b_id.into(),
            route_b_pwd: route_b_pwd.into(),
            serial_port: default_serial_port(),
            model: default_model(),
            retry_count: DEFAULT_RETRY_COUNT,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            schedule: None,
            session_lifetime: DEFAULT_SESSION_LIFETIME,
            connection: None,
        }
    }

    /// 設定ファイルを読み込む
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_str(&text)?;
        tracing::debug!("{:?}", settings);
        Ok(settings)
    }

    /// 設定ファイルを読み込んでコマンドライン引数と環境変数で上書きする
    /// 設定ファイルがなくても認証情報が与えられていれば既定値で補う
    pub fn resolve(args: &SettingsArgs) -> Result<Self, ConfigError> {
        let mut settings = match (&args.route_b_id, &args.route_b_pwd) {
            (Some(id), Some(pwd)) if !args.config_file.exists() => Self::new(id, pwd),
            _ => Self::load(&args.config_file)?,
        };
        if let Some(v) = &args.serial_port {
            settings.serial_port = v.clone();
        }
        if let Some(v) = &args.model {
            settings.model = v.clone();
        }
        if let Some(v) = &args.route_b_id {
            settings.route_b_id = v.clone();
        }
        if let Some(v) = &args.route_b_pwd {
            settings.route_b_pwd = v.clone();
        }
        settings.validate()?;
        Ok(settings)
    }

    /// 値を検査する
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.credentials()?;
        self.adapter_model()?;
        self.schedule()?;
        if self.retry_count == 0 {
            return Err(ConfigError::MustBePositive("retry_count"));
        }
        if self.update_interval == 0 {
            return Err(ConfigError::MustBePositive("update_interval"));
        }
        if !SESSION_LIFETIME_RANGE.contains(&self.session_lifetime) {
            return Err(ConfigError::OutOfRange {
                key: "session_lifetime",
                min: *SESSION_LIFETIME_RANGE.start(),
                max: *SESSION_LIFETIME_RANGE.end(),
            });
        }
        Ok(())
    }

    pub fn credentials(&self) -> Result<authn::Credentials, ConfigError> {
        Ok(authn::Credentials {
            id: authn::Id::from_str(self.route_b_id.trim()).map_err(ConfigError::InvalidId)?,
            password: authn::Password::from_str(self.route_b_pwd.trim())
                .map_err(ConfigError::InvalidPassword)?,
        })
    }

    pub fn adapter_model(&self) -> Result<AdapterModel, ConfigError> {
        Ok(AdapterModel::from_str(&self.model)?)
    }

    pub fn schedule(&self) -> Result<Option<Schedule>, ConfigError> {
        self.schedule
            .as_deref()
            .map(Schedule::from_str)
            .transpose()
            .map_err(ConfigError::from)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval)
    }

    pub fn session_lifetime(&self) -> Duration {
        Duration::from_secs(self.session_lifetime)
    }

    /// 認証情報とシリアルポートを伏せた設定
    pub fn redacted(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(map) = value.as_object_mut() {
            for key in TO_REDACT {
                if let Some(v) = map.get_mut(key) {
                    *v = serde_json::Value::from(REDACTED);
                }
            }
        }
        value
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "00112233445566778899AABBCCDDEEFF";
    const PWD: &str = "0123456789AB";

    #[test]
    fn test_defaults() {
        let text = format!(
            r#"
route_b_id = "{ID}"
route_b_pwd = "{PWD}"
"#
        );
        let settings = Settings::from_str(&text).unwrap();
        assert_eq!(settings, Settings::new(ID, PWD));
        assert_eq!(settings.serial_port, "/dev/ttyS0");
        assert_eq!(settings.adapter_model().unwrap(), AdapterModel::Bp35a1);
        assert_eq!(settings.retry_count, 3);
        assert_eq!(settings.update_interval(), Duration::from_secs(10));
        assert_eq!(settings.session_lifetime(), Duration::from_secs(900));
        assert!(settings.schedule().unwrap().is_none());
        assert!(settings.connection.is_none());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_full() {
        let text = format!(
            r#"
route_b_id = "{ID}"
route_b_pwd = "{PWD}"
serial_port = "/dev/ttyUSB0"
model = "bp35c2"
retry_count = 5
update_interval = 60
schedule = "0 */1 * * * *"
session_lifetime = 3600

[connection]
Channel = 33
MacAddress = "001D129012345678"
PanId = 34952
"#
        );
        let settings = Settings::from_str(&text).unwrap();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.adapter_model().unwrap(), AdapterModel::Bp35c2);
        assert_eq!(settings.retry_count, 5);
        assert!(settings.schedule().unwrap().is_some());
        assert_eq!(settings.connection.map(|c| c.PanId), Some(0x8888));
    }

    #[test]
    fn test_invalid() {
        let mut settings = Settings::new("short", PWD);
        assert!(matches!(settings.validate(), Err(ConfigError::InvalidId(_))));

        settings.route_b_id = ID.to_owned();
        settings.route_b_pwd = "0123".to_owned();
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidPassword(_))
        ));

        settings.route_b_pwd = PWD.to_owned();
        settings.model = "BP35B1".to_owned();
        assert!(matches!(settings.validate(), Err(ConfigError::Adapter(_))));

        settings.model = DEFAULT_MODEL.to_owned();
        settings.schedule = Some("every minute".to_owned());
        assert!(matches!(settings.validate(), Err(ConfigError::Cron(_))));

        settings.schedule = None;
        for lifetime in [0, 59, 1 << 40] {
            settings.session_lifetime = lifetime;
            assert!(matches!(
                settings.validate(),
                Err(ConfigError::OutOfRange {
                    key: "session_lifetime",
                    ..
                })
            ));
        }
        settings.session_lifetime = 0xFFFF_FFFF;
        assert!(settings.validate().is_ok());

        settings.session_lifetime = DEFAULT_SESSION_LIFETIME;
        settings.retry_count = 0;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::MustBePositive("retry_count"))
        ));

        // 必須項目がない
        assert!(matches!(
            Settings::from_str(r#"serial_port = "/dev/ttyS0""#),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_resolve() {
        let args = SettingsArgs {
            config_file: PathBuf::from("/nonexistent/broute-meter.toml"),
            serial_port: Some("/dev/ttyUSB0".to_owned()),
            model: Some("BP35C2".to_owned()),
            route_b_id: Some(ID.to_owned()),
            route_b_pwd: Some(PWD.to_owned()),
        };
        let settings = Settings::resolve(&args).unwrap();
        assert_eq!(settings.serial_port, "/dev/ttyUSB0");
        assert_eq!(settings.adapter_model().unwrap(), AdapterModel::Bp35c2);
        assert_eq!(settings.retry_count, DEFAULT_RETRY_COUNT);

        // 設定ファイルも認証情報もない
        let args = SettingsArgs {
            route_b_pwd: None,
            ..args
        };
        assert!(matches!(
            Settings::resolve(&args),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_redacted() {
        let settings = Settings::new(ID, PWD);
        let redacted = settings.redacted();
        assert_eq!(redacted["route_b_id"], REDACTED);
        assert_eq!(redacted["route_b_pwd"], REDACTED);
        assert_eq!(redacted["serial_port"], REDACTED);
        assert_eq!(redacted["model"], "BP35A1");
        assert_eq!(redacted["retry_count"], 3);

        let debug = format!("{:?}", settings);
        assert!(!debug.contains(ID));
        assert!(!debug.contains(PWD));
    }
}
