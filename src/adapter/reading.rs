// スマートメーターの計測値とアダプタの状態
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::echonetlite::{EchonetliteEdata, smart_electric_energy_meter as SM, superclass};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// 計測値
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MeterReading {
    /// 瞬時電力(W)
    pub power: Option<Decimal>,
    /// 瞬時電流(A) R相とT相の合計
    pub current: Option<Decimal>,
    pub r_phase_current: Option<Decimal>,
    pub t_phase_current: Option<Decimal>,
    /// 瞬時電圧(V) 相の平均
    pub voltage: Option<Decimal>,
    /// 定時積算電力量 正方向(kWh)
    pub forward: Option<Decimal>,
    /// 定時積算電力量 逆方向(kWh)
    pub reverse: Option<Decimal>,
    pub forward_timestamp: Option<DateTime<Utc>>,
    pub reverse_timestamp: Option<DateTime<Utc>>,
    /// 動作状態 true = ON
    pub operation_status: Option<bool>,
    /// 異常発生状態 true = 異常あり
    pub fault_status: Option<bool>,
    pub coefficient: Option<u32>,
    /// 積算電力量単位(kWh)
    pub unit: Option<Decimal>,
}

impl MeterReading {
    /// 主な計測値がひとつもない
    pub fn is_empty(&self) -> bool {
        self.power.is_none()
            && self.current.is_none()
            && self.voltage.is_none()
            && self.forward.is_none()
            && self.reverse.is_none()
    }

    /// 応答のプロパティ値を取り込む
    pub fn update(
        &mut self,
        edata: &EchonetliteEdata,
        unit: &SM::UnitForCumlativeAmountsPower,
        coefficient: &SM::Coefficient,
    ) {
        // Get_SNAで読み出せなかったプロパティ
        if edata.edt.is_empty() {
            tracing::debug!("EPC:0x{:02X} has no data", edata.epc);
            return;
        }
        if let Ok(p) = superclass::Properties::try_from(edata) {
            match p {
                superclass::Properties::OperationStatus(a) => self.operation_status = Some(a.0),
                superclass::Properties::FaultStatus(a) => self.fault_status = Some(a.0),
                other => tracing::debug!("{}", other),
            }
            return;
        }
        match SM::Properties::try_from(edata) {
            Ok(SM::Properties::InstantiousPower(a)) => self.power = Some(a.0),
            Ok(SM::Properties::InstantiousCurrent(a)) => {
                self.current = Some(a.total());
                self.r_phase_current = Some(a.r);
                self.t_phase_current = a.t;
            }
            Ok(SM::Properties::InstantiousVoltage(a)) => self.voltage = Some(a.average()),
            Ok(SM::Properties::CumlativeAmountsOfPowerAtFixedTime(a)) => {
                let kwh = a.kwh(unit, coefficient);
                let timestamp = a.time_point_utc();
                match a.direction {
                    SM::Direction::Forward => {
                        self.forward = kwh;
                        self.forward_timestamp = timestamp;
                    }
                    SM::Direction::Reverse => {
                        self.reverse = kwh;
                        self.reverse_timestamp = timestamp;
                    }
                }
            }
            Ok(other) => tracing::debug!("{}", other),
            Err(e) => tracing::warn!("{}", e),
        }
    }
}

/// TCPコネクション
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TcpConnection {
    pub handle: u8,
    pub remote_addr: String,
    pub remote_port: u16,
    pub local_port: u16,
}

/// ネイバーキャッシュの相手
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NeighborDevice {
    pub ipv6_addr: String,
    pub mac_addr: String,
}

/// アダプタとネットワークの状態
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticInfo {
    pub mac_address: Option<String>,
    pub ipv6_address: Option<String>,
    pub stack_version: Option<String>,
    pub app_version: Option<String>,
    pub channel: Option<u8>,
    pub pan_id: Option<String>,
    /// 受信信号強度(dBm)
    pub rssi: Option<i8>,
    pub active_tcp_connections: Vec<TcpConnection>,
    pub udp_ports: Vec<u16>,
    pub tcp_ports: Vec<u16>,
    pub neighbor_devices: Vec<NeighborDevice>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::dec;

    fn edata(epc: u8, edt: &[u8]) -> EchonetliteEdata<'_> {
        EchonetliteEdata {
            epc,
            pdc: edt.len() as u8,
            edt,
        }
    }

    #[test]
    fn test_update() {
        let unit = SM::UnitForCumlativeAmountsPower(dec!(0.1));
        let coefficient = SM::Coefficient(1);
        let mut reading = MeterReading::default();
        assert!(reading.is_empty());

        for e in [
            edata(0xe7, &[0x00, 0x00, 0x02, 0x0a]),
            edata(0xe8, &[0x00, 0x32, 0x00, 0x14]),
            edata(0xe9, &[0x00, 0x65, 0x00, 0x66]),
            edata(
                0xea,
                &[0x07, 0xe9, 0x03, 0x0f, 0x0c, 0x1e, 0x00, 0x00, 0x00, 0x30, 0x39],
            ),
            edata(
                0xeb,
                &[0x07, 0xe9, 0x03, 0x0f, 0x0c, 0x1e, 0x00, 0xff, 0xff, 0xff, 0xfe],
            ),
            edata(0x80, &[0x30]),
            edata(0x88, &[0x42]),
            // Get_SNA
            edata(0xd3, &[]),
        ] {
            reading.update(&e, &unit, &coefficient);
        }

        assert!(!reading.is_empty());
        assert_eq!(reading.power, Some(dec!(522)));
        assert_eq!(reading.current, Some(dec!(7.0)));
        assert_eq!(reading.r_phase_current, Some(dec!(5.0)));
        assert_eq!(reading.t_phase_current, Some(dec!(2.0)));
        assert_eq!(reading.voltage, Some(dec!(101.5)));
        assert_eq!(reading.forward, Some(dec!(1234.5)));
        assert_eq!(
            reading.forward_timestamp.map(|t| t.to_rfc3339()),
            Some("2025-03-15T03:30:00+00:00".to_string())
        );
        // 計測値なし
        assert_eq!(reading.reverse, None);
        assert!(reading.reverse_timestamp.is_some());
        assert_eq!(reading.operation_status, Some(true));
        assert_eq!(reading.fault_status, Some(false));
    }

    #[test]
    fn test_serialize() {
        let reading = MeterReading {
            power: Some(dec!(522)),
            ..Default::default()
        };
        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["power"], serde_json::json!(522.0));
        assert!(json["voltage"].is_null());
    }
}
