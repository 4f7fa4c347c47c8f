// SKSTACK/IPの応答
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use std::net::Ipv6Addr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub code: u8,
    pub sender: std::net::Ipv6Addr,
    pub param: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Epandesc {
    pub channel: u8,
    pub channel_page: u8,
    pub pan_id: u16,
    pub addr: u64,
    pub lqi: u8,
    pub pair_id: u32,
}

/// LQIからRSSI(dBm)を推定する
pub fn rssi_from_lqi(lqi: u8) -> i8 {
    (0.275 * lqi as f32 - 104.27).round() as i8
}

impl Epandesc {
    pub fn estimated_rssi(&self) -> i8 {
        rssi_from_lqi(self.lqi)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Erxudp {
    pub sender: Ipv6Addr,      // 送信元IPv6アドレス
    pub destination: Ipv6Addr, // 送信先IPv6アドレス
    pub sender_port: u16,      // 送信元UDPポート番号
    pub destination_port: u16, // 送信先UDPポート番号
    pub senderlla: u64,        // 送信元のMAC層アドレス
    pub rssi: Option<i8>,      // 受信信号強度(BP35C2のみ)
    pub secured: u8,           // 1:暗号化あり, 0:暗号化なし
    pub side: Option<u8>,      // 受信インターフェース(BP35C2のみ)
    pub datalen: u16,          // 受信データ長
    pub data: Vec<u8>,         // 受信データ
}

/// SKINFOの応答
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Einfo {
    pub ipaddr: Ipv6Addr,
    pub addr64: u64,
    pub channel: u8,
    pub pan_id: u16,
    pub addr16: u16,
}

/// SKTABLE F の応答(TCPハンドル)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ehandle {
    pub handle: u8,
    pub ipaddr: Ipv6Addr,
    pub remote_port: u16,
    pub local_port: u16,
}

/// SKTABLE 2 の応答(ネイバーキャッシュ)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eneighbor {
    pub ipaddr: Ipv6Addr,
    pub addr64: u64,
    pub addr16: u16,
}

/// SKTABLE E の応答(待ち受けポート)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eport {
    pub udp: Vec<u16>,
    pub tcp: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkRxD {
    Event(Event),         // イベント受信
    Epandesc(Epandesc),   // EPANDESC受信
    Erxudp(Erxudp),       // ERXUDP受信
    Einfo(Einfo),         // EINFO受信
    Ever(String),         // EVER受信
    Eappver(String),      // EAPPVER受信
    Erssi(i8),            // ERSSI受信
    Ehandle(Ehandle),     // EHANDLE受信
    Eneighbor(Eneighbor), // ENEIGHBOR受信
    Eport(Eport),         // EPORT受信
    Fail(u8),             // 失敗
    Ok,                   // 成功
    Void,                 // 空行
}

#[test]
fn test_estimated_rssi() {
    let epandesc = Epandesc {
        channel: 0x21,
        channel_page: 9,
        pan_id: 0x8888,
        addr: 0x001D_1290_1234_5678,
        lqi: 0x84,
        pair_id: 0,
    };
    assert_eq!(epandesc.estimated_rssi(), -68);
}
