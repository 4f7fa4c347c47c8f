// Echonetlite
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
pub mod edata;
pub mod frame;
pub mod smart_electric_energy_meter;
pub mod superclass;

pub use edata::*;
pub use frame::*;

/// ECHONET Lite 電文ヘッダ
pub const EHD: u16 = 0x1081;

/// コントローラ(送信元)
pub const EOJ_HOME_CONTROLLER: [u8; 3] = [0x05, 0xff, 0x01];

/// 低圧スマート電力量メータ
pub const EOJ_SMART_METER: [u8; 3] = [0x02, 0x88, 0x01];

/// ESV
pub mod esv {
    pub const SET_I_SNA: u8 = 0x50;
    pub const SET_C_SNA: u8 = 0x51;
    pub const GET_SNA: u8 = 0x52;
    pub const INF_SNA: u8 = 0x53;
    pub const GET: u8 = 0x62;
    pub const SET_RES: u8 = 0x71;
    pub const GET_RES: u8 = 0x72;
    pub const INF: u8 = 0x73;
    pub const INFC: u8 = 0x74;
}

/// 電文のエンコード設定(ビッグエンディアン固定長)
pub fn bincode_config() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}
