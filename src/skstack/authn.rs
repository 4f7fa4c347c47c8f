// スマートメータールートB接続
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::skstack::{self, Error, SkRxD};
use std::io;
use std::net::Ipv6Addr;

/// コマンド応答を待つ間に許す連続タイムアウト回数
pub const COMMAND_MAX_TIMEOUTS: usize = 5;

/// PANA認証結果を待つ間に許す連続タイムアウト回数
pub const JOIN_MAX_TIMEOUTS: usize = 10;

#[derive(Clone, PartialEq, Eq)]
/// 認証情報
pub struct Credentials {
    pub id: Id,
    pub password: Password,
}

#[derive(Clone, PartialEq, Eq)]
/// ID
pub struct Id([char; 32]);
impl std::str::FromStr for Id {
    type Err = String;
    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.chars()
            .collect::<Vec<char>>()
            .try_into()
            .map(Self)
            .map_err(|_| "IDは32文字固定長です".to_string())
    }
}
impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0.iter().collect::<String>())
    }
}

#[derive(Clone, PartialEq, Eq)]
/// パスワード
pub struct Password([char; 12]);
impl std::str::FromStr for Password {
    type Err = String;
    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.chars()
            .collect::<Vec<char>>()
            .try_into()
            .map(Self)
            .map_err(|_| "PASSWORDは12文字固定長です".to_string())
    }
}
impl std::fmt::Display for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0.iter().collect::<String>())
    }
}

/// 認証情報を登録する
pub fn register_credentials(
    reader: &mut io::BufReader<dyn io::Read>,
    writer: &mut dyn io::Write,
    credentials: &Credentials,
) -> Result<(), Error> {
    let sequence = [
        "SKRESET\r\n".to_owned(),                           // リセット
        "SKSREG SFE 0\r\n".to_owned(),                      // コマンドのエコーバックを無効にする。
        format!("SKSETPWD C {}\r\n", credentials.password), // パスワードを登録する。
        format!("SKSETRBID {}\r\n", credentials.id),        // IDを登録する。
    ];
    for command in sequence.iter() {
        skstack::command(reader, writer, command, COMMAND_MAX_TIMEOUTS)?;
    }
    Ok(())
}

/// スマートメーターと接続する
pub fn connect(
    reader: &mut io::BufReader<dyn io::Read>,
    writer: &mut dyn io::Write,
    credentials: &Credentials,
    sender: &Ipv6Addr,
    channel: u8,
    pan_id: u16,
    session_lifetime_secs: u32,
) -> Result<(), Error> {
    register_credentials(reader, writer, credentials)?;

    let connect_sequence = [
        format!("SKSREG S2 {:02X}\r\n", channel), // 自端末の論理チャンネル番号を設定する
        format!("SKSREG S3 {:04X}\r\n", pan_id),  // 自端末のPAN IDを設定する
        format!("SKSREG S16 {:X}\r\n", session_lifetime_secs), // PANA セッションライフタイム値
        format!("SKJOIN {}\r\n", skstack::format_ipv6addr(sender)), // PANA認証開始
    ];

    // コマンド発行
    for command in connect_sequence.iter() {
        tracing::debug!("{}", command.trim_end());
        skstack::command(reader, writer, command, COMMAND_MAX_TIMEOUTS)?;
    }

    // PANA認証開始後のイベントを処理する
    let mut timeouts = 0;
    loop {
        match skstack::receive(reader) {
            // EVENT 0x24 = PANA接続失敗
            Ok(SkRxD::Event(event)) if event.code == 0x24 => {
                tracing::debug!("PANA authentication failed. (EVENT 24)");
                return Err(Error::PanaSessionDisconnected);
            }
            // EVENT 0x25 = PANA接続完了
            Ok(SkRxD::Event(event)) if event.code == 0x25 => {
                tracing::debug!("PANA authentication success. (EVENT 25)");
                return Ok(());
            }
            Ok(SkRxD::Event(event)) if event.code == 0x29 => {
                tracing::warn!("PANA session timeout (EVENT 29)");
            }
            // 何らかのイベント
            Ok(SkRxD::Event(event)) => tracing::debug!("{:?}", event),
            // FAIL ER
            Ok(SkRxD::Fail(code)) => {
                return Err(Error::Fail {
                    command: "SKJOIN".to_owned(),
                    code,
                });
            }
            Ok(rxd) => tracing::trace!("{:?}", rxd),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                timeouts += 1;
                tracing::debug!(
                    "Empty response during PANA auth (timeout {}/{})",
                    timeouts,
                    JOIN_MAX_TIMEOUTS
                );
                if timeouts >= JOIN_MAX_TIMEOUTS {
                    return Err(Error::PanaAuthTimeout);
                }
            }
            Err(e) => return Err(Error::Io(e)),
        }
    }
}

/// PANA再認証を要求する
pub fn rejoin(
    reader: &mut io::BufReader<dyn io::Read>,
    writer: &mut dyn io::Write,
) -> Result<(), Error> {
    skstack::command(reader, writer, "SKREJOIN\r\n", COMMAND_MAX_TIMEOUTS)
}

/// PANAセッションを終了する
pub fn terminate(
    reader: &mut io::BufReader<dyn io::Read>,
    writer: &mut dyn io::Write,
) -> Result<(), Error> {
    skstack::command(reader, writer, "SKTERM\r\n", COMMAND_MAX_TIMEOUTS)?;
    let mut timeouts = 0;
    loop {
        match skstack::receive(reader) {
            // EVENT 0x27 = PANA セッションの終了に成功した
            // EVENT 0x28 = PANA セッションの終了要求に対する応答がなくタイムアウトした
            Ok(SkRxD::Event(event)) if event.code == 0x27 || event.code == 0x28 => return Ok(()),
            Ok(rxd) => tracing::trace!("{:?}", rxd),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                timeouts += 1;
                if timeouts >= COMMAND_MAX_TIMEOUTS {
                    return Err(Error::CommandTimeout("SKTERM".to_owned()));
                }
            }
            Err(e) => return Err(Error::Io(e)),
        }
    }
}
