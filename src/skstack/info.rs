// Wi-SUNモジュールの状態を問い合わせる
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::skstack::{self, Einfo, Ehandle, Eneighbor, Eport, Error, SkRxD, authn};
use std::io;

/// SKINFO 自端末の基本情報
pub fn skinfo(
    reader: &mut io::BufReader<dyn io::Read>,
    writer: &mut dyn io::Write,
) -> Result<Option<Einfo>, Error> {
    let responses = skstack::query(reader, writer, "SKINFO\r\n", authn::COMMAND_MAX_TIMEOUTS)?;
    Ok(responses.into_iter().find_map(|rxd| match rxd {
        SkRxD::Einfo(v) => Some(v),
        _ => None,
    }))
}

/// SKVER SKSTACK IPのファームウェアバージョン
pub fn skver(
    reader: &mut io::BufReader<dyn io::Read>,
    writer: &mut dyn io::Write,
) -> Result<Option<String>, Error> {
    let responses = skstack::query(reader, writer, "SKVER\r\n", authn::COMMAND_MAX_TIMEOUTS)?;
    Ok(responses.into_iter().find_map(|rxd| match rxd {
        SkRxD::Ever(v) => Some(v),
        _ => None,
    }))
}

/// SKAPPVER アプリケーションのファームウェアバージョン
pub fn skappver(
    reader: &mut io::BufReader<dyn io::Read>,
    writer: &mut dyn io::Write,
) -> Result<Option<String>, Error> {
    let responses = skstack::query(reader, writer, "SKAPPVER\r\n", authn::COMMAND_MAX_TIMEOUTS)?;
    Ok(responses.into_iter().find_map(|rxd| match rxd {
        SkRxD::Eappver(v) => Some(v),
        _ => None,
    }))
}

/// SKRSSI 受信信号強度
/// このコマンドを持たないファームウェアもある
pub fn skrssi(
    reader: &mut io::BufReader<dyn io::Read>,
    writer: &mut dyn io::Write,
) -> Result<Option<i8>, Error> {
    let responses = skstack::query(reader, writer, "SKRSSI\r\n", authn::COMMAND_MAX_TIMEOUTS)?;
    Ok(responses.into_iter().find_map(|rxd| match rxd {
        SkRxD::Erssi(v) => Some(v),
        _ => None,
    }))
}

/// SKTABLE F TCPハンドル一覧
pub fn tcp_handles(
    reader: &mut io::BufReader<dyn io::Read>,
    writer: &mut dyn io::Write,
) -> Result<Vec<Ehandle>, Error> {
    let responses =
        skstack::query(reader, writer, "SKTABLE F\r\n", authn::COMMAND_MAX_TIMEOUTS)?;
    Ok(responses
        .into_iter()
        .filter_map(|rxd| match rxd {
            SkRxD::Ehandle(v) => Some(v),
            _ => None,
        })
        .collect())
}

/// SKTABLE E 待ち受けポート一覧
pub fn ports(
    reader: &mut io::BufReader<dyn io::Read>,
    writer: &mut dyn io::Write,
) -> Result<Option<Eport>, Error> {
    let responses =
        skstack::query(reader, writer, "SKTABLE E\r\n", authn::COMMAND_MAX_TIMEOUTS)?;
    Ok(responses.into_iter().find_map(|rxd| match rxd {
        SkRxD::Eport(v) => Some(v),
        _ => None,
    }))
}

/// SKTABLE 2 ネイバーキャッシュ
pub fn neighbors(
    reader: &mut io::BufReader<dyn io::Read>,
    writer: &mut dyn io::Write,
) -> Result<Vec<Eneighbor>, Error> {
    let responses =
        skstack::query(reader, writer, "SKTABLE 2\r\n", authn::COMMAND_MAX_TIMEOUTS)?;
    Ok(responses
        .into_iter()
        .filter_map(|rxd| match rxd {
            SkRxD::Eneighbor(v) => Some(v),
            _ => None,
        })
        .collect())
}
