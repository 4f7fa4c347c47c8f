// SKSTACK IP アダプタでBルートセッションを管理する
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::adapter::{
    Adapter, AdapterModel, DiagnosticInfo, Error, MeterReading, NeighborDevice, SerialDuplex,
    SerialLink, TcpConnection,
};
use crate::connection_settings::ConnectionSettings;
use crate::echonetlite::{
    self, EchonetliteFrame, ResponseKind, smart_electric_energy_meter as SM, superclass,
};
use crate::skstack::{self, SkRxD, authn};
use std::io;
use std::net::Ipv6Addr;
use std::ops::RangeInclusive;
use std::time::{Duration, Instant};

/// 計測値要求で読み出すプロパティ
pub const METER_EPCS: [u8; 7] = [
    SM::InstantiousPower::EPC,                               // 0xe7 瞬時電力計測値
    SM::InstantiousCurrent::EPC,                             // 0xe8 瞬時電流計測値
    SM::InstantiousVoltage::EPC,                             // 0xe9 瞬時電圧計測値
    SM::CumlativeAmountsOfPowerAtFixedTime::EPC_FORWARD,     // 0xea 定時積算電力量(正方向)
    SM::CumlativeAmountsOfPowerAtFixedTime::EPC_REVERSE,     // 0xeb 定時積算電力量(逆方向)
    superclass::OperationStatus::EPC,                        // 0x80 動作状態
    superclass::FaultStatus::EPC,                            // 0x88 異常発生状態
];

/// 接続時に一度だけ読み出すプロパティ
pub const PROFILE_EPCS: [u8; 3] = [
    SM::UnitForCumlativeAmountsPower::EPC, // 0xe1 積算電力量単位
    SM::Coefficient::EPC,                  // 0xd3 係数(存在しない場合は×1倍)
    superclass::GetPropertyMap::EPC,       // 0x9f Getプロパティマップ
];

/// 応答を待つ間に許す連続タイムアウト回数
pub const RESPONSE_MAX_TIMEOUTS: usize = 3;

/// 応答を待つ間に受け取る電文の上限
pub const RESPONSE_MAX_RECEIVES: usize = 10;

/// PANA セッションライフタイム値の既定値
pub const DEFAULT_SESSION_LIFETIME: Duration = Duration::from_secs(900);

/// ライフタイムのこの割合が経過したら再認証する
const REJOIN_RATIO: f32 = 0.7;

/// 接続中のセッション
#[derive(Debug)]
struct Session {
    peer: Ipv6Addr,
    mac_address: u64,
    channel: u8,
    pan_id: u16,
    /// アクティブスキャンで得たLQI
    lqi: Option<u8>,
    unit: SM::UnitForCumlativeAmountsPower,
    coefficient: SM::Coefficient,
    property_map: Option<superclass::GetPropertyMap>,
    rejoin_at: Instant,
}

/// SKSTACK IP ファームウェアのアダプタ(BP35A1 / BP35C2)
pub struct SkstackAdapter<L: SerialLink> {
    link: L,
    model: AdapterModel,
    credentials: authn::Credentials,
    cached: Option<ConnectionSettings>,
    session_lifetime: Duration,
    scan_durations: RangeInclusive<usize>,
    connect_deadline: Option<Duration>,
    port: Option<SerialDuplex>,
    session: Option<Session>,
    tid: u16,
}

impl<L: SerialLink> SkstackAdapter<L> {
    pub fn new(link: L, model: AdapterModel, credentials: authn::Credentials) -> Self {
        Self {
            link,
            model,
            credentials,
            cached: None,
            session_lifetime: DEFAULT_SESSION_LIFETIME,
            scan_durations: skstack::DEFAULT_SCAN_DURATIONS,
            connect_deadline: None,
            port: None,
            session: None,
            tid: 0,
        }
    }

    /// ペアリング済みの接続情報を使う(アクティブスキャンを省略する)
    pub fn with_connection_settings(mut self, settings: Option<ConnectionSettings>) -> Self {
        self.cached = settings;
        self
    }

    pub fn with_session_lifetime(mut self, lifetime: Duration) -> Self {
        self.session_lifetime = lifetime;
        self
    }

    pub fn with_scan_durations(mut self, durations: RangeInclusive<usize>) -> Self {
        self.scan_durations = durations;
        self
    }

    /// アクティブスキャンを接続開始からこの時間で打ち切る
    pub fn with_connect_deadline(mut self, deadline: Duration) -> Self {
        self.connect_deadline = Some(deadline);
        self
    }

    /// 接続中のスマートメーターの接続情報
    pub fn connection_settings(&self) -> Option<ConnectionSettings> {
        self.session.as_ref().map(|s| ConnectionSettings {
            Channel: s.channel,
            MacAddress: format!("{:016X}", s.mac_address),
            PanId: s.pan_id,
            Unit: s.unit.clone(),
            Coefficient: s.coefficient.clone(),
        })
    }

    fn next_tid(&mut self) -> u16 {
        self.tid = self.tid.wrapping_add(1);
        self.tid
    }

    fn rejoin_period(&self) -> Duration {
        self.session_lifetime.mul_f32(REJOIN_RATIO)
    }

    /// 接続を確立する
    fn establish(&mut self) -> Result<(), Error> {
        let lifetime_secs = u32::try_from(self.session_lifetime.as_secs())
            .map_err(|_| Error::InvalidSessionLifetime(self.session_lifetime))?;
        let deadline = self.connect_deadline.map(|d| Instant::now() + d);
        let mut port = self.link.open()?;
        let reader = &mut port.reader;
        let writer = &mut *port.writer;

        // 接続先
        let (channel, pan_id, mac_address, lqi) = match &self.cached {
            Some(settings) => {
                let mac = u64::from_str_radix(&settings.MacAddress, 16)
                    .map_err(|_| Error::InvalidMacAddress(settings.MacAddress.clone()))?;
                tracing::debug!(
                    "Using cached pairing: Channel={:02X}, Pan ID={:04X}, Addr={:016X}",
                    settings.Channel,
                    settings.PanId,
                    mac
                );
                (settings.Channel, settings.PanId, mac, None)
            }
            None => {
                let epandesc = skstack::scan_until_found(
                    reader,
                    writer,
                    self.model,
                    &self.credentials,
                    self.scan_durations.clone(),
                    deadline,
                )?;
                (
                    epandesc.channel,
                    epandesc.pan_id,
                    epandesc.addr,
                    Some(epandesc.lqi),
                )
            }
        };

        // MACアドレスからIPv6リンクローカルアドレスへ変換する
        let peer = skstack::link_local_address(mac_address);

        // PANA認証
        authn::connect(
            reader,
            writer,
            &self.credentials,
            &peer,
            channel,
            pan_id,
            lifetime_secs,
        )?;
        tracing::info!("B-route connection established successfully");

        let (unit, coefficient) = match &self.cached {
            Some(settings) => (settings.Unit.clone(), settings.Coefficient.clone()),
            None => Default::default(),
        };
        self.port = Some(port);
        self.session = Some(Session {
            peer,
            mac_address,
            channel,
            pan_id,
            lqi,
            unit,
            coefficient,
            property_map: None,
            rejoin_at: Instant::now() + self.rejoin_period(),
        });

        // スマートメーターの情報を得る
        self.fetch_profile()
    }

    /// 積算電力量単位, 係数, Getプロパティマップを得る
    fn fetch_profile(&mut self) -> Result<(), Error> {
        let payload = self.transact(&PROFILE_EPCS)?;
        let (frame, _len): (EchonetliteFrame, usize) =
            bincode::borrow_decode_from_slice(&payload, echonetlite::bincode_config())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let session = self.session.as_mut().ok_or(Error::NotConnected)?;
        for edata in frame.edata.iter() {
            if edata.edt.is_empty() {
                tracing::debug!("EPC:0x{:02X} is not readable", edata.epc);
                continue;
            }
            tracing::info!("{}", edata.show(None));
            match edata.epc {
                SM::UnitForCumlativeAmountsPower::EPC => {
                    match SM::UnitForCumlativeAmountsPower::try_from(edata) {
                        Ok(unit) => session.unit = unit,
                        Err(e) => tracing::warn!("{}", e),
                    }
                }
                SM::Coefficient::EPC => match SM::Coefficient::try_from(edata) {
                    Ok(coefficient) => session.coefficient = coefficient,
                    Err(e) => tracing::warn!("{}", e),
                },
                superclass::GetPropertyMap::EPC => {
                    match superclass::GetPropertyMap::try_from(edata) {
                        Ok(map) => session.property_map = Some(map),
                        Err(e) => tracing::warn!("{}", e),
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// 再認証の時刻になっていたら再認証を要求する
    fn rejoin_if_due(&mut self) -> Result<(), Error> {
        let now = Instant::now();
        let due = match &self.session {
            Some(session) => now >= session.rejoin_at,
            None => return Err(Error::NotConnected),
        };
        if !due {
            return Ok(());
        }
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;
        tracing::debug!("PANA re-authentication");
        match authn::rejoin(&mut port.reader, &mut *port.writer) {
            Ok(()) => {}
            Err(e @ skstack::Error::Io(_)) => return Err(e.into()),
            Err(e) => tracing::warn!("{}", e),
        }
        let next = now + self.rejoin_period();
        if let Some(session) = self.session.as_mut() {
            session.rejoin_at = next;
        }
        Ok(())
    }

    /// Get要求を送信して対応する応答電文を受け取る
    fn transact(&mut self, epcs: &[u8]) -> Result<Vec<u8>, Error> {
        let tid = self.next_tid();
        let peer = self
            .session
            .as_ref()
            .map(|s| s.peer)
            .ok_or(Error::NotConnected)?;
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;
        let reader = &mut port.reader;
        let writer = &mut *port.writer;

        let frame = EchonetliteFrame::get_request(tid, epcs);
        tracing::debug!("{} TID={}", frame, tid);
        skstack::send_echonetlite(writer, self.model, &peer, &frame)?;

        let mut timeouts = 0;
        for _ in 0..RESPONSE_MAX_RECEIVES {
            let rxd = match skstack::receive(reader) {
                Ok(rxd) => {
                    timeouts = 0;
                    rxd
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    timeouts += 1;
                    tracing::debug!(
                        "No response (timeout {}/{})",
                        timeouts,
                        RESPONSE_MAX_TIMEOUTS
                    );
                    if timeouts >= RESPONSE_MAX_TIMEOUTS {
                        return Err(Error::ResponseTimeout);
                    }
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            match rxd {
                SkRxD::Erxudp(erxudp) => match erxudp.destination_port {
                    skstack::ECHONETLITE_PORT => {
                        let decoded: Result<(EchonetliteFrame, usize), _> =
                            bincode::borrow_decode_from_slice(
                                &erxudp.data,
                                echonetlite::bincode_config(),
                            );
                        match decoded {
                            Ok((frame, _len)) if frame.is_response_to(tid) => {
                                tracing::debug!("{}", frame);
                                return Ok(erxudp.data.clone());
                            }
                            Ok((frame, _len)) if frame.kind() == ResponseKind::Notification => {
                                let mut s = vec![frame.show()];
                                s.extend(frame.edata.iter().map(|v| v.show(None)));
                                tracing::info!("{}", s.join(" "));
                            }
                            Ok((frame, _len)) => {
                                tracing::debug!("unrelated frame TID={} {}", frame.tid, frame)
                            }
                            Err(e) => tracing::warn!("Echonetlite message parse error: {}", e),
                        }
                    }
                    skstack::PANA_PORT => tracing::trace!("PANA message is IGNORED"),
                    rport => tracing::warn!("rport {} message is UNKNOWN and IGNORED.", rport),
                },
                SkRxD::Event(event) => match event.code {
                    0x21 if event.param == Some(1) => tracing::warn!("UDP の送信に失敗"),
                    0x24 | 0x27 | 0x28 | 0x29 => {
                        tracing::warn!("PANA session lost (EVENT {:02X})", event.code);
                        self.session = None;
                        self.port = None;
                        return Err(skstack::Error::PanaSessionDisconnected.into());
                    }
                    _ => tracing::trace!("{:?}", event),
                },
                SkRxD::Fail(code) => {
                    return Err(skstack::Error::Fail {
                        command: "SKSENDTO".to_owned(),
                        code,
                    }
                    .into());
                }
                rxd => tracing::trace!("{:?}", rxd),
            }
        }
        tracing::warn!(
            "No response to TID={} in {} messages",
            tid,
            RESPONSE_MAX_RECEIVES
        );
        Err(Error::ResponseTimeout)
    }

    /// 診断情報の1項目を問い合わせる
    /// コマンドの失敗は項目を空にするだけ
    fn diagnose<T>(
        &mut self,
        what: &str,
        query: fn(
            &mut io::BufReader<dyn io::Read>,
            &mut dyn io::Write,
        ) -> Result<T, skstack::Error>,
    ) -> Result<Option<T>, Error> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;
        match query(&mut port.reader, &mut *port.writer) {
            Ok(v) => Ok(Some(v)),
            Err(e @ skstack::Error::Io(_)) => Err(e.into()),
            Err(e) => {
                tracing::warn!("{}: {}", what, e);
                Ok(None)
            }
        }
    }
}

impl<L: SerialLink> Adapter for SkstackAdapter<L> {
    fn connect(&mut self) -> Result<(), Error> {
        if self.is_connected() {
            return Ok(());
        }
        match self.establish() {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!("Failed to connect B-route: {}", e);
                // PANA認証が済んでいればセッションを終了しておく
                self.close();
                Err(e)
            }
        }
    }

    fn get_data(&mut self) -> Result<MeterReading, Error> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        self.rejoin_if_due()?;

        let (epcs, unit, coefficient) = match &self.session {
            Some(session) => {
                let epcs = METER_EPCS
                    .iter()
                    .copied()
                    .filter(|epc| session.property_map.as_ref().is_none_or(|m| m.contains(*epc)))
                    .collect::<Vec<u8>>();
                (epcs, session.unit.clone(), session.coefficient.clone())
            }
            None => return Err(Error::NotConnected),
        };

        let mut reading = MeterReading {
            coefficient: Some(coefficient.0),
            unit: Some(unit.0),
            ..Default::default()
        };
        if epcs.is_empty() {
            tracing::warn!("smart meter has no readable property");
            return Ok(reading);
        }

        let payload = self.transact(&epcs)?;
        let (frame, _len): (EchonetliteFrame, usize) =
            bincode::borrow_decode_from_slice(&payload, echonetlite::bincode_config())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if frame.kind() == ResponseKind::GetSna {
            tracing::debug!("some properties are not readable");
        }
        for edata in frame.edata.iter() {
            tracing::debug!("{}", edata.show(Some(&unit)));
            reading.update(edata, &unit, &coefficient);
        }
        Ok(reading)
    }

    fn get_diagnostic_info(&mut self) -> Result<DiagnosticInfo, Error> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let mut info = DiagnosticInfo::default();

        if let Some(Some(einfo)) = self.diagnose("SKINFO", skstack::skinfo)? {
            info.mac_address = Some(format!("{:016X}", einfo.addr64));
            info.ipv6_address = Some(skstack::format_ipv6addr(&einfo.ipaddr));
            info.channel = Some(einfo.channel);
            info.pan_id = Some(format!("{:04X}", einfo.pan_id));
        }
        info.stack_version = self.diagnose("SKVER", skstack::skver)?.flatten();
        info.app_version = self.diagnose("SKAPPVER", skstack::skappver)?.flatten();

        // SKRSSIを持たないファームウェアはLQIから推定する
        info.rssi = match self.diagnose("SKRSSI", skstack::skrssi)?.flatten() {
            Some(rssi) => Some(rssi),
            None => self
                .session
                .as_ref()
                .and_then(|s| s.lqi)
                .map(skstack::rssi_from_lqi),
        };

        if let Some(handles) = self.diagnose("SKTABLE F", skstack::tcp_handles)? {
            info.active_tcp_connections = handles
                .into_iter()
                .map(|h| TcpConnection {
                    handle: h.handle,
                    remote_addr: skstack::format_ipv6addr(&h.ipaddr),
                    remote_port: h.remote_port,
                    local_port: h.local_port,
                })
                .collect();
        }
        if let Some(Some(eport)) = self.diagnose("SKTABLE E", skstack::ports)? {
            info.udp_ports = eport.udp;
            info.tcp_ports = eport.tcp;
        }
        if let Some(neighbors) = self.diagnose("SKTABLE 2", skstack::neighbors)? {
            info.neighbor_devices = neighbors
                .into_iter()
                .map(|n| NeighborDevice {
                    ipv6_addr: skstack::format_ipv6addr(&n.ipaddr),
                    mac_addr: format!("{:016X}", n.addr64),
                })
                .collect();
        }
        Ok(info)
    }

    fn close(&mut self) {
        if let (Some(mut port), Some(_)) = (self.port.take(), self.session.take()) {
            if let Err(e) = authn::terminate(&mut port.reader, &mut *port.writer) {
                tracing::debug!("SKTERM: {}", e);
            }
        }
        self.port = None;
        self.session = None;
        tracing::debug!("B-route connection closed");
    }

    fn is_connected(&self) -> bool {
        self.port.is_some() && self.session.is_some()
    }
}

/// アクティブスキャンで見つけたスマートメーターと接続して接続情報を得る
pub fn pairing<L: SerialLink>(
    link: L,
    model: AdapterModel,
    credentials: authn::Credentials,
    scan_durations: RangeInclusive<usize>,
) -> Result<ConnectionSettings, Error> {
    let mut adapter =
        SkstackAdapter::new(link, model, credentials).with_scan_durations(scan_durations);
    adapter.connect()?;
    let settings = adapter.connection_settings().ok_or(Error::NotConnected);
    adapter.close();
    settings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skstack::mock::{ScriptedReader, SharedWriter};
    use rust_decimal::dec;
    use std::collections::VecDeque;
    use std::io::BufReader;
    use std::str::FromStr;
    use std::sync::Mutex;

    const PEER: &str = "FE80:0000:0000:0000:021D:1290:1234:5678";
    const MYSELF: &str = "FE80:0000:0000:0000:021D:1291:0000:0001";

    /// 開くたびに台本を1つ取り出す通信路
    struct ScriptedLink {
        scripts: Mutex<VecDeque<ScriptedReader>>,
        writer: SharedWriter,
    }

    impl ScriptedLink {
        fn new(scripts: Vec<ScriptedReader>) -> (Self, SharedWriter) {
            let writer = SharedWriter::default();
            let link = Self {
                scripts: Mutex::new(scripts.into()),
                writer: writer.clone(),
            };
            (link, writer)
        }
    }

    impl SerialLink for ScriptedLink {
        fn open(&self) -> Result<SerialDuplex, Error> {
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(io::Error::from(io::ErrorKind::NotFound))?;
            Ok(SerialDuplex {
                reader: BufReader::new(Box::new(script)),
                writer: Box::new(self.writer.clone()),
            })
        }
    }

    fn credentials() -> authn::Credentials {
        authn::Credentials {
            id: authn::Id::from_str("00112233445566778899AABBCCDDEEFF").unwrap(),
            password: authn::Password::from_str("0123456789AB").unwrap(),
        }
    }

    fn cached() -> ConnectionSettings {
        ConnectionSettings {
            Channel: 0x21,
            MacAddress: "001D129012345678".to_owned(),
            PanId: 0x8888,
            Unit: SM::UnitForCumlativeAmountsPower::default(),
            Coefficient: SM::Coefficient::default(),
        }
    }

    fn hex(frame: &[u8]) -> String {
        frame.iter().map(|b| format!("{:02X}", b)).collect()
    }

    /// スマートメーターからの電文を受信する
    fn erxudp(frame: &[u8]) -> String {
        erxudp_to(skstack::ECHONETLITE_PORT, frame)
    }

    /// 宛先ポートを指定して受信する
    fn erxudp_to(port: u16, frame: &[u8]) -> String {
        format!(
            "ERXUDP {} {} {:04X} {:04X} 001D129012345678 1 {:04X} {}",
            PEER,
            MYSELF,
            port,
            port,
            frame.len(),
            hex(frame)
        )
    }

    /// BP35C2 は RSSI と SIDE が付く
    fn erxudp_c2(frame: &[u8]) -> String {
        format!(
            "ERXUDP {} {} 0E1A 0E1A 001D129012345678 FFB6 1 0 {:04X} {}",
            PEER,
            MYSELF,
            frame.len(),
            hex(frame)
        )
    }

    fn meter_frame(tid: u16, esv: u8, edata: &[(u8, &[u8])]) -> Vec<u8> {
        let mut v = vec![0x10, 0x81];
        v.extend_from_slice(&tid.to_be_bytes());
        v.extend_from_slice(&echonetlite::EOJ_SMART_METER);
        v.extend_from_slice(&echonetlite::EOJ_HOME_CONTROLLER);
        v.push(esv);
        v.push(edata.len() as u8);
        for (epc, edt) in edata {
            v.push(*epc);
            v.push(edt.len() as u8);
            v.extend_from_slice(edt);
        }
        v
    }

    /// PANA認証まで
    fn joined(script: ScriptedReader) -> ScriptedReader {
        script
            .lines(&["OK"; 8])
            .line(&format!("EVENT 25 {}", PEER))
    }

    /// 送信結果
    fn sent(script: ScriptedReader) -> ScriptedReader {
        script
            .line(&format!("EVENT 21 {} 00", PEER))
            .line("OK")
    }

    fn profile(script: ScriptedReader, tid: u16) -> ScriptedReader {
        sent(script).line(&erxudp(&profile_frame(tid)))
    }

    /// 積算電力量単位 0.1kWh, 係数なし, プロパティマップ 5個
    fn profile_frame(tid: u16) -> Vec<u8> {
        meter_frame(
            tid,
            0x52,
            &[
                (0xe1, &[0x01]),
                (0xd3, &[]),
                (0x9f, &[0x05, 0x80, 0x88, 0xe7, 0xe8, 0xea]),
            ],
        )
    }

    /// 自発的な通知
    fn notification() -> String {
        erxudp(&meter_frame(0, 0x73, &[(0xe7, &[0, 0, 0, 1])]))
    }

    fn connected(script: ScriptedReader) -> SkstackAdapter<ScriptedLink> {
        let (link, _writer) = ScriptedLink::new(vec![script]);
        let mut adapter = SkstackAdapter::new(link, AdapterModel::Bp35a1, credentials())
            .with_connection_settings(Some(cached()));
        adapter.connect().unwrap();
        adapter
    }

    fn measurement(tid: u16) -> Vec<u8> {
        meter_frame(
            tid,
            0x72,
            &[
                (0xe7, &[0x00, 0x00, 0x02, 0x0a]),
                (0xe8, &[0x00, 0x32, 0x00, 0x14]),
                (
                    0xea,
                    &[0x07, 0xe9, 0x03, 0x0f, 0x0c, 0x1e, 0x00, 0x00, 0x00, 0x30, 0x39],
                ),
                (0x80, &[0x30]),
                (0x88, &[0x42]),
            ],
        )
    }

    #[test]
    fn test_get_data() {
        let script = profile(joined(ScriptedReader::new()), 1);
        let script = sent(script)
            // 自発的な通知は読み飛ばす
            .line(&erxudp(&meter_frame(0, 0x73, &[(0xe7, &[0, 0, 0, 1])])))
            // 別の要求への応答
            .line(&erxudp(&meter_frame(7, 0x72, &[(0xe7, &[0, 0, 0, 2])])))
            .timeout()
            .line(&erxudp(&measurement(2)));
        let (link, writer) = ScriptedLink::new(vec![script]);
        let mut adapter = SkstackAdapter::new(link, AdapterModel::Bp35a1, credentials())
            .with_connection_settings(Some(cached()));

        adapter.connect().unwrap();
        assert!(adapter.is_connected());
        assert!(writer.text().contains(&format!("SKJOIN {}\r\n", PEER)));
        let settings = adapter.connection_settings().unwrap();
        assert_eq!(settings.Unit.0, dec!(0.1));
        assert_eq!(settings.Coefficient, SM::Coefficient(1));

        let reading = adapter.get_data().unwrap();
        assert_eq!(reading.power, Some(dec!(522)));
        assert_eq!(reading.current, Some(dec!(7.0)));
        assert_eq!(reading.voltage, None);
        assert_eq!(reading.forward, Some(dec!(1234.5)));
        assert_eq!(reading.reverse, None);
        assert_eq!(reading.operation_status, Some(true));
        assert_eq!(reading.fault_status, Some(false));
        assert_eq!(reading.unit, Some(dec!(0.1)));

        // プロパティマップにあるものだけを要求する
        let written = writer.0.lock().unwrap().clone();
        let contains = |needle: Vec<u8>| written.windows(needle.len()).any(|w| w == needle);
        assert!(contains(
            [
                format!("SKSENDTO 1 {} 0E1A 1 0012 ", PEER).as_bytes(),
                &[0x10, 0x81, 0x00, 0x01, 0x05, 0xff, 0x01, 0x02, 0x88, 0x01, 0x62, 0x03],
                &[0xe1, 0x00, 0xd3, 0x00, 0x9f, 0x00],
            ]
            .concat()
        ));
        assert!(contains(
            [
                format!("SKSENDTO 1 {} 0E1A 1 0016 ", PEER).as_bytes(),
                &[0x10, 0x81, 0x00, 0x02, 0x05, 0xff, 0x01, 0x02, 0x88, 0x01, 0x62, 0x05],
                &[0xe7, 0x00, 0xe8, 0x00, 0xea, 0x00, 0x80, 0x00, 0x88, 0x00],
            ]
            .concat()
        ));
    }

    #[test]
    fn test_not_connected() {
        let (link, _writer) = ScriptedLink::new(vec![]);
        let mut adapter = SkstackAdapter::new(link, AdapterModel::Bp35a1, credentials());
        assert!(matches!(adapter.get_data(), Err(Error::NotConnected)));
        assert!(matches!(
            adapter.get_diagnostic_info(),
            Err(Error::NotConnected)
        ));
        // 開けない
        assert!(adapter.connect().is_err());
        assert!(!adapter.is_connected());
    }

    #[test]
    fn test_connect_rejected() {
        let script = ScriptedReader::new()
            .lines(&["OK"; 8])
            .line(&format!("EVENT 24 {}", PEER));
        let (link, _writer) = ScriptedLink::new(vec![script]);
        let mut adapter = SkstackAdapter::new(link, AdapterModel::Bp35a1, credentials())
            .with_connection_settings(Some(cached()));
        assert!(matches!(
            adapter.connect(),
            Err(Error::Skstack(skstack::Error::PanaSessionDisconnected))
        ));
        assert!(!adapter.is_connected());
    }

    #[test]
    fn test_invalid_mac_address() {
        let (link, _writer) = ScriptedLink::new(vec![ScriptedReader::new()]);
        let mut adapter = SkstackAdapter::new(link, AdapterModel::Bp35a1, credentials())
            .with_connection_settings(Some(ConnectionSettings {
                MacAddress: "XYZ".to_owned(),
                ..cached()
            }));
        assert!(matches!(
            adapter.connect(),
            Err(Error::InvalidMacAddress(s)) if s == "XYZ"
        ));
    }

    #[test]
    fn test_response_timeout() {
        let script = profile(joined(ScriptedReader::new()), 1);
        let script = sent(script).timeouts(RESPONSE_MAX_TIMEOUTS);
        let (link, _writer) = ScriptedLink::new(vec![script]);
        let mut adapter = SkstackAdapter::new(link, AdapterModel::Bp35a1, credentials())
            .with_connection_settings(Some(cached()));
        adapter.connect().unwrap();
        assert!(matches!(adapter.get_data(), Err(Error::ResponseTimeout)));
        // タイムアウトでは切断しない
        assert!(adapter.is_connected());
    }

    #[test]
    fn test_session_lost() {
        let script = profile(joined(ScriptedReader::new()), 1);
        let script = sent(script).line(&format!("EVENT 29 {}", PEER));
        let (link, _writer) = ScriptedLink::new(vec![script]);
        let mut adapter = SkstackAdapter::new(link, AdapterModel::Bp35a1, credentials())
            .with_connection_settings(Some(cached()));
        adapter.connect().unwrap();
        let result = adapter.get_data();
        assert!(result.as_ref().is_err_and(|e| e.is_session_lost()));
        assert!(!adapter.is_connected());
    }

    #[test]
    fn test_lost_by_any_pana_event() {
        for code in ["24", "27", "28", "29"] {
            let script = profile(joined(ScriptedReader::new()), 1);
            let script = sent(script).line(&format!("EVENT {} {}", code, PEER));
            let mut adapter = connected(script);
            let result = adapter.get_data();
            assert!(result.as_ref().is_err_and(|e| e.is_session_lost()), "EVENT {}", code);
            assert!(!adapter.is_connected());
        }
    }

    #[test]
    fn test_ignore_other_ports() {
        let script = profile(joined(ScriptedReader::new()), 1);
        let other = meter_frame(2, 0x72, &[(0xe7, &[0, 0, 0, 1])]);
        let script = sent(script)
            // PANA
            .line(&erxudp_to(skstack::PANA_PORT, &other))
            // 知らないポート
            .line(&erxudp_to(0x1234, &other))
            .line(&erxudp(&measurement(2)));
        let mut adapter = connected(script);
        let reading = adapter.get_data().unwrap();
        assert_eq!(reading.power, Some(dec!(522)));
    }

    #[test]
    fn test_timeouts_between_notifications() {
        let script = profile(joined(ScriptedReader::new()), 1);
        // 連続していないタイムアウトは数えない
        let script = sent(script)
            .timeout()
            .line(&notification())
            .timeout()
            .line(&notification())
            .timeout()
            .line(&erxudp(&measurement(2)));
        let mut adapter = connected(script);
        let reading = adapter.get_data().unwrap();
        assert_eq!(reading.power, Some(dec!(522)));
    }

    #[test]
    fn test_too_many_unrelated_messages() {
        let script = profile(joined(ScriptedReader::new()), 1);
        let script = (0..RESPONSE_MAX_RECEIVES).fold(sent(script), |acc, _| {
            acc.line(&notification())
        });
        let script = script.line(&erxudp(&measurement(2)));
        let mut adapter = connected(script);
        assert!(matches!(adapter.get_data(), Err(Error::ResponseTimeout)));
        assert!(adapter.is_connected());
    }

    #[test]
    fn test_profile_failure_terminates_session() {
        let script = sent(joined(ScriptedReader::new()))
            .timeouts(RESPONSE_MAX_TIMEOUTS)
            // SKTERM
            .line("OK")
            .line(&format!("EVENT 27 {}", PEER));
        let (link, writer) = ScriptedLink::new(vec![script]);
        let mut adapter = SkstackAdapter::new(link, AdapterModel::Bp35a1, credentials())
            .with_connection_settings(Some(cached()));
        assert!(matches!(adapter.connect(), Err(Error::ResponseTimeout)));
        assert!(!adapter.is_connected());
        assert!(writer.text().ends_with("SKTERM\r\n"));
    }

    #[test]
    fn test_session_lifetime() {
        let script = profile(joined(ScriptedReader::new()), 1);
        let (link, writer) = ScriptedLink::new(vec![script]);
        let mut adapter = SkstackAdapter::new(link, AdapterModel::Bp35a1, credentials())
            .with_connection_settings(Some(cached()))
            .with_session_lifetime(Duration::from_secs(3600));
        adapter.connect().unwrap();
        assert!(writer.text().contains("SKSREG S16 E10\r\n"));

        // 32ビットを超える値は送らない
        let (link, writer) = ScriptedLink::new(vec![ScriptedReader::new()]);
        let mut adapter = SkstackAdapter::new(link, AdapterModel::Bp35a1, credentials())
            .with_connection_settings(Some(cached()))
            .with_session_lifetime(Duration::from_secs(1 << 40));
        assert!(matches!(
            adapter.connect(),
            Err(Error::InvalidSessionLifetime(_))
        ));
        assert!(writer.text().is_empty());
    }

    #[test]
    fn test_connect_deadline() {
        let script = ScriptedReader::new()
            .lines(&["OK"; 4])
            .line("OK")
            .timeouts(10);
        let (link, writer) = ScriptedLink::new(vec![script]);
        let mut adapter = SkstackAdapter::new(link, AdapterModel::Bp35a1, credentials())
            .with_connect_deadline(Duration::ZERO);
        assert!(matches!(
            adapter.connect(),
            Err(Error::Skstack(skstack::Error::DeadlineExceeded))
        ));
        assert!(!adapter.is_connected());
        assert!(!writer.text().contains("SKJOIN"));
    }

    #[test]
    fn test_rejoin_failure_is_warning() {
        let script = profile(joined(ScriptedReader::new()), 1);
        // SKREJOIN に失敗しても計測は続ける
        let script = sent(script.line("FAIL ER10")).line(&erxudp(&measurement(2)));
        let (link, writer) = ScriptedLink::new(vec![script]);
        let mut adapter = SkstackAdapter::new(link, AdapterModel::Bp35a1, credentials())
            .with_connection_settings(Some(cached()))
            .with_session_lifetime(Duration::ZERO);
        adapter.connect().unwrap();
        let reading = adapter.get_data().unwrap();
        assert_eq!(reading.power, Some(dec!(522)));
        assert!(writer.text().contains("SKREJOIN\r\n"));
        assert!(adapter.is_connected());
    }

    #[test]
    fn test_bp35c2() {
        let sent_c2 = |script: ScriptedReader| {
            script
                .line(&format!("EVENT 21 {} 0 00", PEER))
                .line("OK")
        };
        let script = ScriptedReader::new()
            .lines(&["OK"; 4])
            .line("OK")
            .lines(&[
                "EPANDESC",
                "  Channel:21",
                "  Channel Page:09",
                "  Pan ID:8888",
                "  Addr:001D129012345678",
                "  LQI:84",
                "  PairID:00ABCDEF",
            ])
            .line(&format!("EVENT 22 {}", MYSELF));
        let script = sent_c2(joined(script)).line(&erxudp_c2(&profile_frame(1)));
        let script = sent_c2(script).line(&erxudp_c2(&measurement(2)));
        let (link, writer) = ScriptedLink::new(vec![script]);
        let mut adapter = SkstackAdapter::new(link, AdapterModel::Bp35c2, credentials())
            .with_scan_durations(5..=5);

        adapter.connect().unwrap();
        let reading = adapter.get_data().unwrap();
        assert_eq!(reading.power, Some(dec!(522)));
        assert_eq!(reading.forward, Some(dec!(1234.5)));

        let text = writer.text();
        assert!(text.contains("SKSCAN 2 FFFFFFFF 5 0\r\n"));
        assert!(text.contains(&format!("SKSENDTO 1 {} 0E1A 1 0 0012 ", PEER)));
        assert!(text.contains(&format!("SKSENDTO 1 {} 0E1A 1 0 0016 ", PEER)));
    }

    #[test]
    fn test_rejoin() {
        let script = profile(joined(ScriptedReader::new()), 1);
        // SKREJOIN
        let script = sent(script.line("OK")).line(&erxudp(&measurement(2)));
        let (link, writer) = ScriptedLink::new(vec![script]);
        let mut adapter = SkstackAdapter::new(link, AdapterModel::Bp35a1, credentials())
            .with_connection_settings(Some(cached()))
            .with_session_lifetime(Duration::ZERO);
        adapter.connect().unwrap();
        assert!(adapter.get_data().is_ok());
        assert!(writer.text().contains("SKREJOIN\r\n"));
    }

    #[test]
    fn test_scan_and_diagnostic_info() {
        let script = ScriptedReader::new()
            // 認証情報の登録とアクティブスキャン
            .lines(&["OK"; 4])
            .line("OK")
            .lines(&[
                "EPANDESC",
                "  Channel:21",
                "  Channel Page:09",
                "  Pan ID:8888",
                "  Addr:001D129012345678",
                "  LQI:84",
                "  PairID:00ABCDEF",
            ])
            .line(&format!("EVENT 22 {}", MYSELF));
        let script = profile(joined(script), 1)
            .lines(&[
                &format!("EINFO {} 001D129100000001 21 8888 FFFE", MYSELF),
                "OK",
            ])
            .lines(&["EVER 1.2.10", "OK"])
            .lines(&["EAPPVER rev26e", "OK"])
            .line("FAIL ER04")
            .line("OK")
            .lines(&[
                "EPORT", "3610", "716", "0", "0", "0", "0", "", "0", "0", "0", "0", "OK",
            ])
            .lines(&[
                &format!("ENEIGHBOR {} 001D129012345678 FFFF", PEER),
                "OK",
            ])
            // SKTERM
            .line("OK")
            .line(&format!("EVENT 27 {}", PEER));
        let (link, writer) = ScriptedLink::new(vec![script]);
        let mut adapter = SkstackAdapter::new(link, AdapterModel::Bp35a1, credentials())
            .with_scan_durations(6..=6);

        adapter.connect().unwrap();
        let settings = adapter.connection_settings().unwrap();
        assert_eq!(settings.MacAddress, "001D129012345678");

        let info = adapter.get_diagnostic_info().unwrap();
        assert_eq!(info.mac_address.as_deref(), Some("001D129100000001"));
        assert_eq!(info.ipv6_address.as_deref(), Some(MYSELF));
        assert_eq!(info.channel, Some(0x21));
        assert_eq!(info.pan_id.as_deref(), Some("8888"));
        assert_eq!(info.stack_version.as_deref(), Some("1.2.10"));
        assert_eq!(info.app_version.as_deref(), Some("rev26e"));
        // LQI 0x84 から推定
        assert_eq!(info.rssi, Some(-68));
        assert!(info.active_tcp_connections.is_empty());
        assert_eq!(info.udp_ports, vec![3610, 716]);
        assert!(info.tcp_ports.is_empty());
        assert_eq!(info.neighbor_devices.len(), 1);
        assert_eq!(info.neighbor_devices[0].ipv6_addr, PEER);

        adapter.close();
        assert!(!adapter.is_connected());
        assert!(writer.text().ends_with("SKTERM\r\n"));
    }
}
