// スマートメータ接続情報
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::echonetlite::smart_electric_energy_meter as SM;
use serde::{Deserialize, Serialize};

/// スマートメータ接続情報
/// ペアリングで得てアクティブスキャンを省略するのに使う
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[allow(non_snake_case)]
pub struct ConnectionSettings {
    pub Channel: u8,
    pub MacAddress: String,
    pub PanId: u16,
    #[serde(default)]
    pub Unit: SM::UnitForCumlativeAmountsPower,
    #[serde(default)]
    pub Coefficient: SM::Coefficient,
}

#[test]
fn test_toml() {
    let text = r#"
Channel = 33
MacAddress = "001D129012345678"
PanId = 34952
Unit = "0.1 kwh"
"#;
    let settings: ConnectionSettings = toml::from_str(text).unwrap();
    assert_eq!(settings.Channel, 0x21);
    assert_eq!(settings.PanId, 0x8888);
    assert_eq!(settings.Unit.0, rust_decimal::Decimal::new(1, 1));
    // 係数がなければ × 1
    assert_eq!(settings.Coefficient, SM::Coefficient(1));

    let back: ConnectionSettings = toml::from_str(&toml::to_string(&settings).unwrap()).unwrap();
    assert_eq!(back, settings);
}
