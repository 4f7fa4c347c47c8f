// Wi-SUNアダプタ
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
pub mod reading;
pub mod serial_link;
pub mod session;

pub use reading::*;
pub use serial_link::*;
pub use session::*;

use crate::skstack;
use std::io;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Skstack(#[from] skstack::Error),
    #[error("i/o {0}")]
    Io(#[from] io::Error),
    #[error(r#"serial port "{0}""#)]
    SerialPort(#[from] serialport::Error),
    #[error("スマートメーターと接続していない")]
    NotConnected,
    #[error("スマートメーターからの応答がない")]
    ResponseTimeout,
    #[error(r#"未対応のアダプタ "{0}""#)]
    UnsupportedModel(String),
    #[error(r#"MACアドレス "{0}" が正しくない"#)]
    InvalidMacAddress(String),
    #[error("PANAセッションライフタイム {0:?} は設定できない")]
    InvalidSessionLifetime(Duration),
}

impl Error {
    /// PANAセッションが失われたか
    pub fn is_session_lost(&self) -> bool {
        matches!(
            self,
            Error::Skstack(skstack::Error::PanaSessionDisconnected) | Error::NotConnected
        )
    }
}

/// Wi-SUNアダプタの機種
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdapterModel {
    #[default]
    Bp35a1,
    Bp35c2,
}

impl AdapterModel {
    /// SKSCAN, SKSENDTO にSIDEパラメータを付けるか
    pub fn uses_side_parameter(&self) -> bool {
        matches!(self, AdapterModel::Bp35c2)
    }
}

impl FromStr for AdapterModel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BP35A1" => Ok(AdapterModel::Bp35a1),
            "BP35C2" => Ok(AdapterModel::Bp35c2),
            _ => Err(Error::UnsupportedModel(s.to_owned())),
        }
    }
}

impl std::fmt::Display for AdapterModel {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            AdapterModel::Bp35a1 => write!(f, "BP35A1"),
            AdapterModel::Bp35c2 => write!(f, "BP35C2"),
        }
    }
}

/// Bルート通信アダプタ
pub trait Adapter: Send + 'static {
    /// スマートメーターと接続する
    fn connect(&mut self) -> Result<(), Error>;
    /// 計測値を読み出す
    fn get_data(&mut self) -> Result<MeterReading, Error>;
    /// アダプタとネットワークの状態を得る
    fn get_diagnostic_info(&mut self) -> Result<DiagnosticInfo, Error>;
    /// 接続を終了する
    fn close(&mut self);
    fn is_connected(&self) -> bool;
}

#[test]
fn test_adapter_model() {
    assert_eq!(AdapterModel::from_str("BP35A1").ok(), Some(AdapterModel::Bp35a1));
    assert_eq!(AdapterModel::from_str("bp35c2").ok(), Some(AdapterModel::Bp35c2));
    assert!(matches!(
        AdapterModel::from_str("BP35B1"),
        Err(Error::UnsupportedModel(s)) if s == "BP35B1"
    ));
    assert!(!AdapterModel::Bp35a1.uses_side_parameter());
    assert!(AdapterModel::Bp35c2.uses_side_parameter());
    assert_eq!(AdapterModel::Bp35c2.to_string(), "BP35C2");
}
