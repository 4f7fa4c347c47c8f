// Echonetlite 機器オブジェクトスーパークラス
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::echonetlite::EchonetliteEdata;
use std::fmt;

#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Properties {
    OperationStatus(OperationStatus),
    FaultStatus(FaultStatus),
    Manufacturer(Manufacturer),
    GetPropertyMap(GetPropertyMap),
    NotifyInstances(NotifyInstances),
}

impl Properties {
    pub fn show(&self) -> String {
        match self {
            Self::OperationStatus(a) => format!("{}", a),
            Self::FaultStatus(a) => format!("{}", a),
            Self::Manufacturer(a) => format!("{}", a),
            Self::GetPropertyMap(a) => format!("{}", a),
            Self::NotifyInstances(a) => format!("{}", a),
        }
    }
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for Properties {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata<'a>) -> Result<Self, Self::Error> {
        match edata.epc {
            OperationStatus::EPC => OperationStatus::try_from(edata).map(Self::OperationStatus),
            FaultStatus::EPC => FaultStatus::try_from(edata).map(Self::FaultStatus),
            Manufacturer::EPC => Manufacturer::try_from(edata).map(Self::Manufacturer),
            GetPropertyMap::EPC => GetPropertyMap::try_from(edata).map(Self::GetPropertyMap),
            NotifyInstances::EPC => NotifyInstances::try_from(edata).map(Self::NotifyInstances),
            _ => Err(format!("UNKNOWN EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
        }
    }
}

impl fmt::Display for Properties {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.show())
    }
}

/// 0x80 動作状態
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct OperationStatus(pub bool);

impl OperationStatus {
    pub const EPC: u8 = 0x80; // 0x80 動作状態
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for OperationStatus {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata<'a>) -> Result<Self, Self::Error> {
        match edata.edt {
            [0x30] if edata.epc == Self::EPC => Ok(Self(true)),
            [0x31] if edata.epc == Self::EPC => Ok(Self(false)),
            _ => Err(format!("BAD EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "動作状態={}", if self.0 { "ON" } else { "OFF" })
    }
}

/// 0x88 異常発生状態
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct FaultStatus(pub bool);

impl FaultStatus {
    pub const EPC: u8 = 0x88; // 0x88 異常発生状態
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for FaultStatus {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata<'a>) -> Result<Self, Self::Error> {
        match edata.edt {
            [0x41] if edata.epc == Self::EPC => Ok(Self(true)), // 異常発生あり
            [0x42] if edata.epc == Self::EPC => Ok(Self(false)), // 異常発生なし
            _ => Err(format!("BAD EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
        }
    }
}

impl fmt::Display for FaultStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "異常発生状態={}", if self.0 { "異常あり" } else { "異常なし" })
    }
}

/// 0x8a 製造者コード
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Manufacturer(pub String);

impl Manufacturer {
    pub const EPC: u8 = 0x8a; // 0x8a メーカーコード
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for Manufacturer {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata<'a>) -> Result<Self, Self::Error> {
        match edata.edt {
            triple @ [_0, _1, _2] if edata.epc == Self::EPC => {
                let manufacturer = triple
                    .iter()
                    .map(|n| format!("{:02X}", n))
                    .collect::<String>();
                Ok(Manufacturer(manufacturer))
            }
            _ => Err(format!("BAD EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
        }
    }
}

impl fmt::Display for Manufacturer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "製造者コード(hex)={}", self.0)
    }
}

/// 0x9f Getプロパティマップ
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct GetPropertyMap {
    pub properties: Vec<u8>,
}

impl GetPropertyMap {
    pub const EPC: u8 = 0x9f; // 0x9f Getプロパティマップ

    pub fn contains(&self, epc: u8) -> bool {
        self.properties.contains(&epc)
    }
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for GetPropertyMap {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata<'a>) -> Result<Self, Self::Error> {
        match edata.edt {
            // 16個未満はそのまま列挙されている
            [count, props @ ..] if edata.epc == Self::EPC && *count < 16 => {
                match props.get(..*count as usize) {
                    Some(list) => Ok(GetPropertyMap {
                        properties: list.to_vec(),
                    }),
                    None => Err(format!("SHORT EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
                }
            }
            // 16個以上はビットマップ
            // n バイト目の b ビット目が EPC = 0x80 + 0x10 * b + n をあらわす
            [_count, bitmap @ ..] if edata.epc == Self::EPC && bitmap.len() == 16 => {
                let mut properties = Vec::new();
                for (row, bits) in bitmap.iter().enumerate() {
                    for col in 0..8u8 {
                        if bits & (1 << col) != 0 {
                            properties.push(0x80 + (col << 4) + row as u8);
                        }
                    }
                }
                properties.sort();
                Ok(GetPropertyMap { properties })
            }
            _ => Err(format!("BAD EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
        }
    }
}

impl fmt::Display for GetPropertyMap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Getプロパティマップ [{}]",
            self.properties
                .iter()
                .map(|x| format!("0x{:02X}", x))
                .collect::<Vec<String>>()
                .join(",")
        )
    }
}

/// 0xd5 インスタンスリスト通知
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct NotifyInstances {
    pub count: u8,
    pub instances: Vec<[u8; 3]>,
}

impl NotifyInstances {
    pub const EPC: u8 = 0xd5; // 0xd5 インスタンスリスト通知
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for NotifyInstances {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata<'a>) -> Result<Self, Self::Error> {
        match edata.edt {
            [count, data @ ..] if edata.epc == Self::EPC && data.len() % 3 == 0 => {
                let instances = data
                    .chunks_exact(3) // 3バイトづつ
                    .map(|triple| [triple[0], triple[1], triple[2]])
                    .collect::<Vec<[u8; 3]>>();
                Ok(NotifyInstances {
                    count: *count,
                    instances,
                })
            }
            _ => Err(format!("BAD EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
        }
    }
}

impl fmt::Display for NotifyInstances {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let ss = self
            .instances
            .iter()
            .map(|[a, b, c]| format!("{:02X}{:02X}{:02X}", a, b, c))
            .collect::<Vec<String>>();
        write!(
            f,
            "インスタンスリスト={:2}個 [{}]",
            self.count,
            ss.join(",")
        )
    }
}
