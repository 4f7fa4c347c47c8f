// SKSTACK/IP
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
pub mod active_scan;
pub mod authn;
pub mod info;
#[cfg(test)]
pub mod mock;
pub mod parser;
pub mod send_receive;
pub mod skrxd;

pub use active_scan::*;
pub use info::*;
pub use send_receive::*;
pub use skrxd::*;

use std::io;
use thiserror::Error;

/// UDPポート番号 0E1A = 3610 は Echonetliteメッセージ
pub const ECHONETLITE_PORT: u16 = 0x0e1a;
/// UDPポート番号 02CC = 716 は PANAメッセージ(RFC5191)
pub const PANA_PORT: u16 = 0x02cc;

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o {0}")]
    Io(#[from] io::Error),
    #[error(r#""{command}" コマンド実行に失敗しました。 ER(hex) {code:X}"#)]
    Fail { command: String, code: u8 },
    #[error(r#""{0}" コマンドの応答がない"#)]
    CommandTimeout(String),
    #[error("PANAセッションが切断された")]
    PanaSessionDisconnected,
    #[error("PANA認証がタイムアウトした")]
    PanaAuthTimeout,
    #[error("スマートメーターが見つからない")]
    MeterNotFound,
    #[error("接続期限を過ぎた")]
    DeadlineExceeded,
    #[error("binary encode {0}")]
    BinaryEncode(#[from] bincode::error::EncodeError),
}
