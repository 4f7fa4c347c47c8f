// Echonetlite 低圧スマートメータークラス
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::echonetlite::EchonetliteEdata;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Asia::Tokyo;
use rust_decimal::Decimal;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// 積算値が無い場合の値
const NO_DATA: u32 = 0xfffffffe;

#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Properties {
    Coefficient(Coefficient),
    NumberOfEffectiveDigits(NumberOfEffectiveDigits),
    UnitForCumlativeAmountsPower(UnitForCumlativeAmountsPower),
    InstantiousPower(InstantiousPower),
    InstantiousCurrent(InstantiousCurrent),
    InstantiousVoltage(InstantiousVoltage),
    CumlativeAmountsOfPowerAtFixedTime(CumlativeAmountsOfPowerAtFixedTime),
}

impl Properties {
    pub fn show(&self, opt_unit: Option<&UnitForCumlativeAmountsPower>) -> String {
        match self {
            Self::Coefficient(a) => format!("{}", a),
            Self::NumberOfEffectiveDigits(a) => format!("{}", a),
            Self::UnitForCumlativeAmountsPower(a) => format!("{}", a),
            Self::InstantiousPower(a) => format!("{}", a),
            Self::InstantiousCurrent(a) => format!("{}", a),
            Self::InstantiousVoltage(a) => format!("{}", a),
            Self::CumlativeAmountsOfPowerAtFixedTime(a) => a.show(opt_unit),
        }
    }
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for Properties {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata<'a>) -> Result<Self, Self::Error> {
        match edata.epc {
            Coefficient::EPC => Coefficient::try_from(edata).map(Self::Coefficient),
            NumberOfEffectiveDigits::EPC => {
                NumberOfEffectiveDigits::try_from(edata).map(Self::NumberOfEffectiveDigits)
            }
            UnitForCumlativeAmountsPower::EPC => UnitForCumlativeAmountsPower::try_from(edata)
                .map(Self::UnitForCumlativeAmountsPower),
            InstantiousPower::EPC => InstantiousPower::try_from(edata).map(Self::InstantiousPower),
            InstantiousCurrent::EPC => {
                InstantiousCurrent::try_from(edata).map(Self::InstantiousCurrent)
            }
            InstantiousVoltage::EPC => {
                InstantiousVoltage::try_from(edata).map(Self::InstantiousVoltage)
            }
            CumlativeAmountsOfPowerAtFixedTime::EPC_FORWARD
            | CumlativeAmountsOfPowerAtFixedTime::EPC_REVERSE => {
                CumlativeAmountsOfPowerAtFixedTime::try_from(edata)
                    .map(Self::CumlativeAmountsOfPowerAtFixedTime)
            }
            _ => Err(format!("UNKNOWN EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
        }
    }
}

impl fmt::Display for Properties {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.show(None))
    }
}

/// 0xd3 係数
#[derive(Serialize, Deserialize, Clone, Eq, PartialEq, Debug)]
pub struct Coefficient(pub u32);

impl Coefficient {
    pub const EPC: u8 = 0xd3; // 0xd3 係数
    /// 係数の範囲
    pub const RANGE: std::ops::RangeInclusive<u32> = 1..=999999;
}

impl Default for Coefficient {
    fn default() -> Self {
        Self(1)
    }
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for Coefficient {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata<'a>) -> Result<Self, Self::Error> {
        if edata.epc == Self::EPC {
            let value = match edata.edt {
                &[a, b, c, d] => u32::from_be_bytes([a, b, c, d]),
                &[a] => a as u32,
                [] => return Ok(Self(1)), // 値なしは × 1.0
                _ => return Err(format!("BAD EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
            };
            if Self::RANGE.contains(&value) {
                Ok(Self(value))
            } else {
                Err(format!("BAD EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt))
            }
        } else {
            Err(format!("BAD EPC:0x{:X}", edata.epc))
        }
    }
}

impl fmt::Display for Coefficient {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "係数={}", self.0)
    }
}

/// 0xd7 積算電力量有効桁数
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct NumberOfEffectiveDigits(pub u8);

impl NumberOfEffectiveDigits {
    pub const EPC: u8 = 0xd7; // 0xd7 積算電力量有効桁数
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for NumberOfEffectiveDigits {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata<'a>) -> Result<Self, Self::Error> {
        match edata.edt {
            [a] if edata.epc == Self::EPC => Ok(Self(*a)),
            _ => Err(format!("BAD EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
        }
    }
}

impl fmt::Display for NumberOfEffectiveDigits {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "積算電力量有効桁数 {} 桁", self.0)
    }
}

/// 0xe1 積算電力量単位(正方向、逆方向計測値)
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct UnitForCumlativeAmountsPower(pub Decimal);

impl UnitForCumlativeAmountsPower {
    pub const EPC: u8 = 0xe1; // 0xe1 積算電力量単位(正方向、逆方向計測値)
}

impl Default for UnitForCumlativeAmountsPower {
    fn default() -> Self {
        Self(Decimal::new(1, 0))
    }
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for UnitForCumlativeAmountsPower {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata<'a>) -> Result<Self, Self::Error> {
        match edata.edt {
            [0x00] if edata.epc == Self::EPC => Ok(Self(Decimal::new(1, 0))), // 1.0 kwh
            [0x01] if edata.epc == Self::EPC => Ok(Self(Decimal::new(1, 1))), // 0.1 kwh
            [0x02] if edata.epc == Self::EPC => Ok(Self(Decimal::new(1, 2))), // 0.01 kwh
            [0x03] if edata.epc == Self::EPC => Ok(Self(Decimal::new(1, 3))), // 0.001 kwh
            [0x04] if edata.epc == Self::EPC => Ok(Self(Decimal::new(1, 4))), // 0.0001 kwh
            [0x0a] if edata.epc == Self::EPC => Ok(Self(Decimal::new(10, 0))), // 10 kwh
            [0x0b] if edata.epc == Self::EPC => Ok(Self(Decimal::new(100, 0))), // 100 kwh
            [0x0c] if edata.epc == Self::EPC => Ok(Self(Decimal::new(1000, 0))), // 1000 kwh
            [0x0d] if edata.epc == Self::EPC => Ok(Self(Decimal::new(10000, 0))), // 10000 kwh
            _ => Err(format!("BAD EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
        }
    }
}

impl fmt::Display for UnitForCumlativeAmountsPower {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "積算電力量単位(正方向、逆方向計測値)= {} kwh", self.0)
    }
}

impl Serialize for UnitForCumlativeAmountsPower {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{} kwh", self.0))
    }
}

struct UnitForCumlativeAmountsPowerVisitor;

impl<'de> Visitor<'de> for UnitForCumlativeAmountsPowerVisitor {
    type Value = UnitForCumlativeAmountsPower;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("\"10000 kwh\" or \"1000 kwh\" or \"100 kwh\" or \"10 kwh\" or \"1 kwh\" or \"0.1 kwh\" or \"0.01 kwh\" or \"0.001 kwh\" or \"0.0001 kwh\"")
    }

    fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        match s {
            "1 kwh" | "1.0 kwh" => Ok(UnitForCumlativeAmountsPower(Decimal::new(1, 0))),
            "0.1 kwh" => Ok(UnitForCumlativeAmountsPower(Decimal::new(1, 1))),
            "0.01 kwh" => Ok(UnitForCumlativeAmountsPower(Decimal::new(1, 2))),
            "0.001 kwh" => Ok(UnitForCumlativeAmountsPower(Decimal::new(1, 3))),
            "0.0001 kwh" => Ok(UnitForCumlativeAmountsPower(Decimal::new(1, 4))),
            "10 kwh" => Ok(UnitForCumlativeAmountsPower(Decimal::new(10, 0))),
            "100 kwh" => Ok(UnitForCumlativeAmountsPower(Decimal::new(100, 0))),
            "1000 kwh" => Ok(UnitForCumlativeAmountsPower(Decimal::new(1000, 0))),
            "10000 kwh" => Ok(UnitForCumlativeAmountsPower(Decimal::new(10000, 0))),
            _ => Err(de::Error::invalid_value(de::Unexpected::Str(s), &self)),
        }
    }
}

impl<'de> Deserialize<'de> for UnitForCumlativeAmountsPower {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(UnitForCumlativeAmountsPowerVisitor)
    }
}

/// 0xe7 瞬時電力計測値
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct InstantiousPower(pub Decimal);

impl InstantiousPower {
    pub const EPC: u8 = 0xe7; // 0xe7 瞬時電力計測値
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for InstantiousPower {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata<'a>) -> Result<Self, Self::Error> {
        match edata.edt {
            &[a, b, c, d] if edata.epc == Self::EPC => {
                Ok(Self(Decimal::new(
                    i32::from_be_bytes([a, b, c, d]) as i64,
                    0,
                ))) // マイナスの値もある
            }
            _ => Err(format!("BAD EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
        }
    }
}

impl fmt::Display for InstantiousPower {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "瞬時電力={:5} W", self.0)
    }
}

/// 0xe8 瞬時電流計測値
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct InstantiousCurrent {
    pub r: Decimal,
    pub t: Option<Decimal>,
}

impl InstantiousCurrent {
    pub const EPC: u8 = 0xe8; // 0xe8 瞬時電流計測値

    /// R相とT相の合計
    pub fn total(&self) -> Decimal {
        self.r + self.t.unwrap_or_default()
    }
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for InstantiousCurrent {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata<'a>) -> Result<Self, Self::Error> {
        match edata.edt {
            &[a, b, c, d] if edata.epc == Self::EPC => {
                let rt = match (i16::from_be_bytes([a, b]), i16::from_be_bytes([c, d])) {
                    (r, 0x7ffe) => (Decimal::new(r as i64, 1), None), // 単相2線式
                    (r, t) => (Decimal::new(r as i64, 1), Some(Decimal::new(t as i64, 1))),
                };
                Ok(Self { r: rt.0, t: rt.1 })
            }
            _ => Err(format!("BAD EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
        }
    }
}

impl fmt::Display for InstantiousCurrent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.r, self.t) {
            (r, None) => write!(f, "瞬時電流:(1φ2W) {:4} A", r),
            (r, Some(t)) => write!(f, "瞬時電流:(1φ3W) R={:4} A, T={:4} A", r, t),
        }
    }
}

/// 0xe9 瞬時電圧計測値
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct InstantiousVoltage {
    pub r: Decimal,
    pub t: Option<Decimal>,
}

impl InstantiousVoltage {
    pub const EPC: u8 = 0xe9; // 0xe9 瞬時電圧計測値

    /// 相の平均
    pub fn average(&self) -> Decimal {
        match self.t {
            Some(t) => (self.r + t) / Decimal::TWO,
            None => self.r,
        }
    }
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for InstantiousVoltage {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata<'a>) -> Result<Self, Self::Error> {
        match edata.edt {
            &[a, b, c, d] if edata.epc == Self::EPC => Ok(Self {
                r: Decimal::from(u16::from_be_bytes([a, b])),
                t: Some(Decimal::from(u16::from_be_bytes([c, d]))),
            }),
            &[a, b] if edata.epc == Self::EPC => Ok(Self {
                r: Decimal::from(u16::from_be_bytes([a, b])),
                t: None,
            }),
            _ => Err(format!("BAD EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
        }
    }
}

impl fmt::Display for InstantiousVoltage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.r, self.t) {
            (r, None) => write!(f, "瞬時電圧={:4} V", r),
            (r, Some(t)) => write!(f, "瞬時電圧:R={:4} V, T={:4} V", r, t),
        }
    }
}

/// 計測方向
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum Direction {
    /// 正方向(買電)
    Forward,
    /// 逆方向(売電)
    Reverse,
}

/// 0xea 定時積算電力量計測値(正方向計測値)
/// 0xeb 定時積算電力量計測値(逆方向計測値)
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct CumlativeAmountsOfPowerAtFixedTime {
    pub direction: Direction,
    /// メーターの時刻(日本時間)
    pub time_point: NaiveDateTime,
    /// None は計測値なし
    pub cumlative_amounts_power: Option<u32>,
}

impl CumlativeAmountsOfPowerAtFixedTime {
    pub const EPC_FORWARD: u8 = 0xea; // 0xea 定時積算電力量計測値(正方向計測値)
    pub const EPC_REVERSE: u8 = 0xeb; // 0xeb 定時積算電力量計測値(逆方向計測値)

    pub fn kwh(
        &self,
        unit: &UnitForCumlativeAmountsPower,
        coefficient: &Coefficient,
    ) -> Option<Decimal> {
        self.cumlative_amounts_power
            .map(|n| Decimal::from(n) * Decimal::from(coefficient.0) * unit.0)
    }

    /// 計測時刻をUTCにする
    pub fn time_point_utc(&self) -> Option<DateTime<Utc>> {
        Tokyo
            .from_local_datetime(&self.time_point)
            .single()
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn show(&self, opt_unit: Option<&UnitForCumlativeAmountsPower>) -> String {
        let label = match self.direction {
            Direction::Forward => "定時積算電力量計測値(正方向計測値)",
            Direction::Reverse => "定時積算電力量計測値(逆方向計測値)",
        };
        let time_point = self.time_point.format("%Y-%m-%d %H:%M:%S");
        match (self.cumlative_amounts_power, opt_unit) {
            (None, _) => format!("{}={} (NA)", label, time_point),
            (Some(n), Some(unit)) => {
                format!("{}={} ({:8} kwh)", label, time_point, Decimal::from(n) * unit.0)
            }
            (Some(n), None) => format!("{}={} ({:8})", label, time_point, n),
        }
    }
}

impl<'a> TryFrom<&EchonetliteEdata<'a>> for CumlativeAmountsOfPowerAtFixedTime {
    type Error = String;

    fn try_from(edata: &EchonetliteEdata<'a>) -> Result<Self, Self::Error> {
        let direction = match edata.epc {
            Self::EPC_FORWARD => Direction::Forward,
            Self::EPC_REVERSE => Direction::Reverse,
            _ => return Err(format!("BAD EPC:0x{:X}", edata.epc)),
        };
        match edata.edt {
            &[
                year0,                // 年 2bytes
                year1,                //
                month,                // 月 bytes
                day,                  // 日 bytes
                hour,                 // 時 bytes
                minute,               // 分 1bytes
                second,               // 秒 1bytes
                cumlative_watt_hour0, // 積算電力量 4bytes
                cumlative_watt_hour1, //
                cumlative_watt_hour2, //
                cumlative_watt_hour3, //
            ] => {
                let year = u16::from_be_bytes([year0, year1]);
                let datetime = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                    .and_then(|a| a.and_hms_opt(hour as u32, minute as u32, second as u32))
                    .ok_or_else(|| {
                        format!("BAD DATETIME EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)
                    })?;
                let value = u32::from_be_bytes([
                    cumlative_watt_hour0,
                    cumlative_watt_hour1,
                    cumlative_watt_hour2,
                    cumlative_watt_hour3,
                ]);
                Ok(Self {
                    direction,
                    time_point: datetime,
                    cumlative_amounts_power: (value != NO_DATA).then_some(value),
                })
            }
            _ => Err(format!("BAD EPC:0x{:X} EDT:{:?}", edata.epc, edata.edt)),
        }
    }
}

impl fmt::Display for CumlativeAmountsOfPowerAtFixedTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.show(None))
    }
}
