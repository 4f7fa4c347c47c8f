// Echonetlite FRAME
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::echonetlite::{self, EchonetliteEdata, esv};
use bincode;
use core::result;
use std::fmt;

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct EchonetliteFrame<'a> {
    pub ehd: u16,
    pub tid: u16,
    pub seoj: [u8; 3],
    pub deoj: [u8; 3],
    pub esv: u8,
    pub opc: u8,
    pub edata: Vec<EchonetliteEdata<'a>>,
}

/// 受信した電文の種類
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ResponseKind {
    /// Get_Res 全プロパティ応答
    GetRes,
    /// Get_SNA 一部のプロパティが読み出し不可
    GetSna,
    /// INF / INFC 自発的な通知
    Notification,
    /// それ以外
    Other,
}

impl<'a> EchonetliteFrame<'a> {
    /// コントローラからスマートメーターへのGet要求
    pub fn get_request(tid: u16, epcs: &[u8]) -> Self {
        Self {
            tid,
            seoj: echonetlite::EOJ_HOME_CONTROLLER,
            deoj: echonetlite::EOJ_SMART_METER,
            esv: esv::GET,
            opc: epcs.len() as u8,
            edata: epcs.iter().map(|epc| EchonetliteEdata::request(*epc)).collect(),
            ..Default::default()
        }
    }

    pub fn kind(&self) -> ResponseKind {
        match self.esv {
            esv::GET_RES => ResponseKind::GetRes,
            esv::GET_SNA => ResponseKind::GetSna,
            esv::INF | esv::INFC => ResponseKind::Notification,
            _ => ResponseKind::Other,
        }
    }

    /// スマートメーターからのtid番要求に対する応答か
    pub fn is_response_to(&self, tid: u16) -> bool {
        self.tid == tid
            && self.seoj == echonetlite::EOJ_SMART_METER
            && matches!(self.kind(), ResponseKind::GetRes | ResponseKind::GetSna)
    }

    pub fn show(&self) -> String {
        match self.esv {
            // SetI_SNA
            0x50 => format!("SetI_SNAプロパティ値書き込み要求不可応答 N={}", self.opc),
            // SetC_SNA
            0x51 => format!("SetC_SNAプロパティ値書き込み要求不可応答 N={}", self.opc),
            // Get_SNA
            0x52 => format!("Get_SNAプロパティ値読み出し不可応答 N={}", self.opc),
            // INF_SNA
            0x53 => format!("INF_SNAプロパティ値通知不可応答 N={}", self.opc),
            // Get
            0x62 => format!("Getプロパティ値読み出し要求 N={}", self.opc),
            // Set_res
            0x71 => format!("Set_resプロパティ値書き込み応答 N={}", self.opc),
            // Get_res
            0x72 => format!("Get_resプロパティ値読み出し応答 N={}", self.opc),
            // INF
            0x73 => format!("INFプロパティ値通知 N={}", self.opc),
            // INFC
            0x74 => format!("INFCプロパティ値通知(応答要) N={}", self.opc),
            _ => match bincode::encode_to_vec(self, echonetlite::bincode_config()) {
                Ok(encoded) => format!(
                    "よくわからないESV値 N={} frame={}",
                    self.opc,
                    encoded
                        .into_iter()
                        .map(|n| format!("{:02X}", n))
                        .collect::<String>()
                ),
                Err(e) => format!("よくわからないESV値 N={} ({})", self.opc, e),
            },
        }
    }
}

impl<'de, Context> bincode::BorrowDecode<'de, Context> for EchonetliteFrame<'de> {
    fn borrow_decode<D: bincode::de::BorrowDecoder<'de, Context = Context>>(
        decoder: &mut D,
    ) -> core::result::Result<Self, bincode::error::DecodeError> {
        let ehd: u16 = bincode::BorrowDecode::borrow_decode(decoder)?;
        if ehd != echonetlite::EHD {
            return Err(bincode::error::DecodeError::OtherString(format!(
                "EHD:0x{:04X} is not ECHONET Lite",
                ehd
            )));
        }
        let tid: u16 = bincode::BorrowDecode::borrow_decode(decoder)?;
        let seoj: [u8; 3] = bincode::BorrowDecode::borrow_decode(decoder)?;
        let deoj: [u8; 3] = bincode::BorrowDecode::borrow_decode(decoder)?;
        let esv: u8 = bincode::BorrowDecode::borrow_decode(decoder)?;
        let opc: u8 = bincode::BorrowDecode::borrow_decode(decoder)?;
        let mut edata: Vec<EchonetliteEdata> = Vec::with_capacity(opc as usize);
        for _idx in 0..opc {
            edata.push(bincode::BorrowDecode::borrow_decode(decoder)?);
        }
        Ok(Self {
            ehd,
            tid,
            seoj,
            deoj,
            esv,
            opc,
            edata,
        })
    }
}

impl<'a> bincode::Encode for EchonetliteFrame<'a> {
    fn encode<E: bincode::enc::Encoder>(
        &self,
        encoder: &mut E,
    ) -> result::Result<(), bincode::error::EncodeError> {
        bincode::Encode::encode(&self.ehd, encoder)?;
        bincode::Encode::encode(&self.tid, encoder)?;
        bincode::Encode::encode(&self.seoj, encoder)?;
        bincode::Encode::encode(&self.deoj, encoder)?;
        bincode::Encode::encode(&self.esv, encoder)?;
        bincode::Encode::encode(&self.opc, encoder)?;
        for v in &self.edata {
            bincode::Encode::encode(v, encoder)?;
        }
        Ok(())
    }
}

impl<'a> fmt::Display for EchonetliteFrame<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.show())
    }
}

impl<'a> Default for EchonetliteFrame<'a> {
    #[inline]
    fn default() -> Self {
        EchonetliteFrame {
            ehd: echonetlite::EHD,
            tid: 0,
            seoj: [0, 0, 0],
            deoj: [0, 0, 0],
            esv: 0,
            opc: 0,
            edata: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test1() {
        let frame = EchonetliteFrame::get_request(0x1234, &[0xe7]);

        let binary: Vec<u8> = vec![
            0x10, 0x81, //
            0x12, 0x34, //
            0x05, 0xff, 0x01, //
            0x02, 0x88, 0x01, //
            0x62, //
            0x01, //
            0xe7, 0x00, //
        ];
        let config = echonetlite::bincode_config();

        let encoded = bincode::encode_to_vec(&frame, config).unwrap();
        assert_eq!(encoded.len(), 14);
        assert_eq!(encoded, binary);

        let (decoded, _len): (EchonetliteFrame, usize) =
            bincode::borrow_decode_from_slice(&encoded[..], config).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn test_get_res() {
        let binary: Vec<u8> = vec![
            0x10, 0x81, //
            0x00, 0x05, //
            0x02, 0x88, 0x01, //
            0x05, 0xff, 0x01, //
            0x72, //
            0x02, //
            0xe7, 0x04, 0x00, 0x00, 0x02, 0x0a, //
            0x80, 0x01, 0x30, //
        ];
        let (frame, _len): (EchonetliteFrame, usize) =
            bincode::borrow_decode_from_slice(&binary[..], echonetlite::bincode_config()).unwrap();
        assert_eq!(frame.kind(), ResponseKind::GetRes);
        assert!(frame.is_response_to(5));
        assert!(!frame.is_response_to(6));
        assert_eq!(frame.edata.len(), 2);
        assert_eq!(frame.edata[0].edt, &[0x00, 0x00, 0x02, 0x0a]);
        assert_eq!(frame.edata[1].edt, &[0x30]);
    }

    #[test]
    fn test_get_sna_and_notification() {
        let mut frame = EchonetliteFrame {
            tid: 7,
            seoj: echonetlite::EOJ_SMART_METER,
            deoj: echonetlite::EOJ_HOME_CONTROLLER,
            esv: esv::GET_SNA,
            ..Default::default()
        };
        assert_eq!(frame.kind(), ResponseKind::GetSna);
        assert!(frame.is_response_to(7));
        frame.esv = esv::INF;
        assert_eq!(frame.kind(), ResponseKind::Notification);
        assert!(!frame.is_response_to(7));
        frame.esv = esv::INFC;
        assert_eq!(frame.to_string(), "INFCプロパティ値通知(応答要) N=0");
    }

    #[test]
    fn test_bad_header() {
        let binary: Vec<u8> = vec![0x10, 0x82, 0x00, 0x01];
        let result: Result<(EchonetliteFrame, usize), _> =
            bincode::borrow_decode_from_slice(&binary[..], echonetlite::bincode_config());
        assert!(result.is_err());
    }
}
