// Echonetlite EDATA
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::echonetlite::{smart_electric_energy_meter as SM, superclass};
use bincode::de::{BorrowDecoder, read::BorrowReader};
use bincode::enc::{Encoder, write::Writer};
use bincode::error::{DecodeError, EncodeError};
use std::fmt;

/// EPC, PDC, EDT の組
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct EchonetliteEdata<'a> {
    pub epc: u8,
    pub pdc: u8,
    pub edt: &'a [u8],
}

/// EPCで解釈したプロパティ値
#[derive(Clone, PartialEq, Debug)]
pub enum Property<'a> {
    /// 低圧スマート電力量メータクラス
    Meter(SM::Properties),
    /// 機器オブジェクトスーパークラス
    Superclass(superclass::Properties),
    /// 解釈できない
    Unknown(&'a EchonetliteEdata<'a>),
}

impl Property<'_> {
    pub fn show(&self, opt_unit: Option<&SM::UnitForCumlativeAmountsPower>) -> String {
        match self {
            Self::Meter(a) => a.show(opt_unit),
            Self::Superclass(a) => a.show(),
            Self::Unknown(edata) => {
                let edt = edata
                    .edt
                    .iter()
                    .map(|x| format!("0x{:02X}", x))
                    .collect::<Vec<String>>();
                format!("UNKNOWN EPC:0x{:02X}, EDT:[{}]", edata.epc, edt.join(","))
            }
        }
    }
}

impl<'a> EchonetliteEdata<'a> {
    /// 値を要求する(PDC=0)
    pub fn request(epc: u8) -> Self {
        Self {
            epc,
            ..Default::default()
        }
    }

    /// スマートメーターのプロパティとして解釈してから, スーパークラスとして解釈する
    pub fn property(&self) -> Property<'_> {
        SM::Properties::try_from(self)
            .map(Property::Meter)
            .or_else(|_| superclass::Properties::try_from(self).map(Property::Superclass))
            .unwrap_or(Property::Unknown(self))
    }

    pub fn show(&self, opt_unit: Option<&SM::UnitForCumlativeAmountsPower>) -> String {
        self.property().show(opt_unit)
    }
}

impl<'a, 'de: 'a, Context> bincode::BorrowDecode<'de, Context> for EchonetliteEdata<'a> {
    fn borrow_decode<D: BorrowDecoder<'de, Context = Context>>(
        decoder: &mut D,
    ) -> Result<Self, DecodeError> {
        let epc: u8 = bincode::BorrowDecode::borrow_decode(decoder)?;
        let pdc: u8 = bincode::BorrowDecode::borrow_decode(decoder)?;
        // EDTは入力を借用する
        let len = usize::from(pdc);
        decoder.claim_bytes_read(len)?;
        let edt = decoder.borrow_reader().take_bytes(len)?;
        Ok(Self { epc, pdc, edt })
    }
}

impl bincode::Encode for EchonetliteEdata<'_> {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        // PDCはEDTの長さから決める
        let pdc = u8::try_from(self.edt.len()).map_err(|_| {
            EncodeError::OtherString(format!("EDT too long: {} bytes", self.edt.len()))
        })?;
        bincode::Encode::encode(&self.epc, encoder)?;
        bincode::Encode::encode(&pdc, encoder)?;
        encoder.writer().write(self.edt)
    }
}

impl fmt::Display for EchonetliteEdata<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.show(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let config = crate::echonetlite::bincode_config();
        let binary = [0xe7, 0x04, 0x01, 0x02, 0x03, 0x04];

        let (decoded, len): (EchonetliteEdata, usize) =
            bincode::borrow_decode_from_slice(&binary, config).unwrap();
        assert_eq!(len, 6);
        assert_eq!(decoded.epc, 0xe7);
        assert_eq!(decoded.edt, &[1, 2, 3, 4]);
        assert_eq!(bincode::encode_to_vec(&decoded, config).unwrap(), binary);

        // 要求はPDC=0
        assert_eq!(
            bincode::encode_to_vec(EchonetliteEdata::request(0xe8), config).unwrap(),
            vec![0xe8, 0x00]
        );

        // PDCよりEDTが短い
        let truncated: Result<(EchonetliteEdata, usize), _> =
            bincode::borrow_decode_from_slice(&[0xe7, 0x04, 0x01], config);
        assert!(truncated.is_err());
    }

    #[test]
    fn test_property() {
        let e7 = EchonetliteEdata {
            epc: 0xe7,
            pdc: 4,
            edt: &[0, 0, 0x01, 0xf4],
        };
        assert!(matches!(
            e7.property(),
            Property::Meter(SM::Properties::InstantiousPower(_))
        ));
        assert_eq!(e7.to_string(), "瞬時電力=  500 W");

        let operation = EchonetliteEdata {
            epc: 0x80,
            pdc: 1,
            edt: &[0x30],
        };
        assert!(matches!(
            operation.property(),
            Property::Superclass(superclass::Properties::OperationStatus(_))
        ));

        let unknown = EchonetliteEdata {
            epc: 0xf0,
            pdc: 1,
            edt: &[0x12],
        };
        assert_eq!(unknown.property(), Property::Unknown(&unknown));
        assert_eq!(unknown.to_string(), "UNKNOWN EPC:0xF0, EDT:[0x12]");
    }
}
