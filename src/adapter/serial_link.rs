// シリアルポート
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::adapter::Error;
use serialport::{DataBits, Parity, StopBits};
use std::io::{self, BufReader};
use std::time::Duration;

/// シリアルポート読み込みタイムアウト
pub const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// 開いたシリアルポートの読み書き
pub struct SerialDuplex {
    /// 読み込みはバッファリングする
    pub reader: BufReader<Box<dyn io::Read + Send>>,
    pub writer: Box<dyn io::Write + Send>,
}

/// アダプタとの通信路を開く
pub trait SerialLink: Send + 'static {
    fn open(&self) -> Result<SerialDuplex, Error>;
}

/// 実際のシリアルデバイス
#[derive(Debug, Clone)]
pub struct SerialDevice {
    pub port_name: String,
}

impl SerialDevice {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
        }
    }
}

impl SerialLink for SerialDevice {
    fn open(&self) -> Result<SerialDuplex, Error> {
        tracing::debug!("Opening serial port: {}", self.port_name);
        let port = serialport::new(&self.port_name, 115200)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(READ_TIMEOUT)
            .open()?;
        let cloned = port.try_clone()?;
        Ok(SerialDuplex {
            reader: BufReader::new(Box::new(cloned)),
            writer: Box::new(port),
        })
    }
}
