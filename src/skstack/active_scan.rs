// アクティブスキャンでスマートメーターを探す
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::adapter::{AdapterModel, READ_TIMEOUT};
use crate::skstack::{self, Error, SkRxD, authn};
use std::io;
use std::ops::RangeInclusive;
use std::time::{Duration, Instant};

/// アクティブスキャン時間の既定範囲
pub const DEFAULT_SCAN_DURATIONS: RangeInclusive<usize> = 5..=14;

/// スキャンするチャンネル数(33ch - 60ch)
const SCAN_CHANNELS: u32 = 28;

/// アクティブスキャンが終わるまでの見込み時間
/// 1チャンネルあたり 0.96ms * (2^スキャン時間 + 1)
pub fn scan_window(scan_time: usize) -> Duration {
    let slots = (1u32 << scan_time.min(14)) + 1;
    Duration::from_micros(960) * slots * SCAN_CHANNELS
}

/// アクティブスキャン終了(EVENT 22)を待つ間に許す連続タイムアウト回数
pub fn scan_max_timeouts(scan_time: usize) -> usize {
    let window = scan_window(scan_time).as_millis();
    window.div_ceil(READ_TIMEOUT.as_millis()) as usize + authn::COMMAND_MAX_TIMEOUTS
}

/// アクティブスキャンを実行する
/// deadline を過ぎたら打ち切る
pub fn active_scan(
    port_reader: &mut io::BufReader<dyn io::Read>,
    port_writer: &mut dyn io::Write,
    model: AdapterModel,
    scan_time: usize,
    deadline: Option<Instant>,
) -> Result<Vec<skstack::Epandesc>, Error> {
    let command = if model.uses_side_parameter() {
        format!("SKSCAN 2 FFFFFFFF {:X} 0\r\n", scan_time)
    } else {
        format!("SKSCAN 2 FFFFFFFF {:X}\r\n", scan_time)
    };
    skstack::command(
        port_reader,
        port_writer,
        &command,
        authn::COMMAND_MAX_TIMEOUTS,
    )?;

    let max_timeouts = scan_max_timeouts(scan_time);
    let mut timeouts = 0;
    let mut found = Vec::<skstack::Epandesc>::new();
    // アクティブスキャン結果待ち
    'exit: loop {
        if deadline.is_some_and(|t| Instant::now() >= t) {
            tracing::warn!("active scan aborted (duration = {})", scan_time);
            return Err(Error::DeadlineExceeded);
        }
        let received = skstack::receive(port_reader);
        if received.is_ok() {
            timeouts = 0;
        }
        match received {
            Ok(SkRxD::Fail(code)) => {
                return Err(Error::Fail {
                    command: command.trim_end().to_owned(),
                    code,
                });
            }
            Ok(SkRxD::Event(event)) => {
                tracing::debug!("{:?}", event);
                match event.code {
                    0x20 => continue,    // EVENT 20 = beaconを受信した
                    0x22 => break 'exit, // EVENT 22 = アクティブスキャン終了
                    _ => continue,       // 何らかのイベント
                }
            }
            Ok(SkRxD::Epandesc(event)) => {
                tracing::debug!("{:?}", event);
                found.push(event);
            }
            Ok(rxd) => tracing::trace!("{:?}", rxd),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                timeouts += 1;
                if timeouts >= max_timeouts {
                    return Err(Error::CommandTimeout(command.trim_end().to_owned()));
                }
            }
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(found)
}

/// 見つかるまでスキャン時間を延ばしながらアクティブスキャンを繰り返す
pub fn scan_until_found(
    port_reader: &mut io::BufReader<dyn io::Read>,
    port_writer: &mut dyn io::Write,
    model: AdapterModel,
    credentials: &authn::Credentials,
    durations: RangeInclusive<usize>,
    deadline: Option<Instant>,
) -> Result<skstack::Epandesc, Error> {
    authn::register_credentials(port_reader, port_writer, credentials)?;
    for scan_time in durations {
        tracing::debug!("scanning (duration = {})", scan_time);
        let found = active_scan(port_reader, port_writer, model, scan_time, deadline)?;
        // 最もリンク品質の良いものを選ぶ
        if let Some(epandesc) = found.into_iter().max_by_key(|v| v.lqi) {
            tracing::info!(
                "Channel scan complete: Channel={:02X}, Pan ID={:04X}, Addr={:016X}",
                epandesc.channel,
                epandesc.pan_id,
                epandesc.addr
            );
            return Ok(epandesc);
        }
    }
    Err(Error::MeterNotFound)
}
