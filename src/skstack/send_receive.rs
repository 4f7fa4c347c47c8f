// シリアル通信 送受信
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::adapter::AdapterModel;
use crate::{
    echonetlite::{self, EchonetliteFrame},
    skstack::{self, SkRxD, parser},
};
use std::io::{self, BufRead, BufReader};
use std::net::Ipv6Addr;

/// SKSETPWD C / SKSETRBID 以降の認証情報を伏せる
pub fn mask_credentials(s: &str) -> String {
    let mut masked = s.to_owned();
    for (pattern, len) in [("SKSETPWD C ", 12), ("SKSETRBID ", 32)] {
        if let Some(pos) = masked.find(pattern) {
            let start = pos + pattern.len();
            let end = masked[start..]
                .char_indices()
                .take(len)
                .take_while(|(_, c)| !c.is_whitespace() && *c != '\\')
                .last()
                .map(|(i, c)| start + i + c.len_utf8())
                .unwrap_or(start);
            masked.replace_range(start..end, &"#".repeat(end - start));
        }
    }
    masked
}

/// コマンドを送信する
pub fn send(w: &mut dyn io::Write, command: &[u8]) -> io::Result<()> {
    // ポートに書き込む
    let s = command
        .iter()
        .map(|n| *n as char)
        .filter(|n| n.is_ascii())
        .collect::<String>();
    tracing::trace!(target:"Tx->","{}", mask_credentials(&s.escape_debug().to_string()));
    w.write_all(command)?;
    w.flush()
}

/// 結果を受信する
pub fn receive(r: &mut BufReader<dyn io::Read>) -> io::Result<SkRxD> {
    let mut linebuf = Vec::<String>::new();
    loop {
        let mut bytes = Vec::<u8>::new();
        if r.read_until(b'\n', &mut bytes)? == 0 {
            // ポートが閉じられた
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
        }
        // 雑音で壊れたバイトは置き換えて読み進める
        let line = String::from_utf8_lossy(&bytes).into_owned();
        tracing::trace!(target:"<-Rx","{}", line.escape_debug());
        linebuf.push(line);
        match parser::parse_rxd(linebuf.concat().as_ref()) {
            Ok((_s, r)) => return Ok(r),
            Err(nom::Err::Incomplete(_)) => continue, // つづけて次行を読み込む
            Err(e) => tracing::trace!(target:"parser","{:?}", e),
        }
        linebuf.clear();
    }
}

/// コマンドを送信してOKまでの応答を集める
pub fn query(
    r: &mut BufReader<dyn io::Read>,
    w: &mut dyn io::Write,
    command: &str,
    max_timeouts: usize,
) -> Result<Vec<SkRxD>, skstack::Error> {
    send(w, command.as_bytes())?;
    let mut responses = Vec::new();
    let mut timeouts = 0;
    loop {
        match receive(r) {
            Ok(SkRxD::Ok) => return Ok(responses),
            Ok(SkRxD::Fail(code)) => {
                return Err(skstack::Error::Fail {
                    command: mask_credentials(command.trim_end()),
                    code,
                });
            }
            Ok(SkRxD::Void) => {}
            Ok(rxd) => responses.push(rxd),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                timeouts += 1;
                if timeouts >= max_timeouts {
                    return Err(skstack::Error::CommandTimeout(mask_credentials(
                        command.trim_end(),
                    )));
                }
            }
            Err(e) => return Err(skstack::Error::Io(e)),
        }
    }
}

/// コマンドを送信してOKを待つ
pub fn command(
    r: &mut BufReader<dyn io::Read>,
    w: &mut dyn io::Write,
    command: &str,
    max_timeouts: usize,
) -> Result<(), skstack::Error> {
    for rxd in query(r, w, command, max_timeouts)? {
        tracing::trace!("{:?}", rxd);
    }
    Ok(())
}

/// MACアドレスからIPv6リンクローカルアドレスへ変換する
pub fn link_local_address(mac_address: u64) -> Ipv6Addr {
    // MACアドレスの最初の1バイト下位2bit目を反転して
    // 0xFE80000000000000XXXXXXXXXXXXXXXXのXXをMACアドレスに置き換える
    Ipv6Addr::from_bits(
        0xFE80_0000_0000_0000u128 << 64 | (mac_address as u128 ^ 0x0200_0000_0000_0000u128),
    )
}

/// SKSTACKの表記でIPv6アドレスを書く
pub fn format_ipv6addr(addr: &Ipv6Addr) -> String {
    addr.segments().map(|n| format!("{:04X}", n)).join(":")
}

/// Echonetliteメッセージ送信コマンド
pub fn command_from_echonetliteframe(
    model: AdapterModel,
    sender: &Ipv6Addr,
    frame: &EchonetliteFrame,
) -> Result<Vec<u8>, skstack::Error> {
    let payload = bincode::encode_to_vec(frame, echonetlite::bincode_config())?;
    let side = if model.uses_side_parameter() { "0 " } else { "" };
    let sksendto = format!(
        "SKSENDTO 1 {} {:04X} 1 {}{:04X} ",
        format_ipv6addr(sender),
        skstack::ECHONETLITE_PORT,
        side,
        payload.len(),
    );
    Ok([sksendto.as_bytes(), &payload].concat())
}

/// Echonetliteメッセージ送信
pub fn send_echonetlite(
    w: &mut dyn io::Write,
    model: AdapterModel,
    sender: &Ipv6Addr,
    frame: &EchonetliteFrame,
) -> Result<(), skstack::Error> {
    let command = command_from_echonetliteframe(model, sender, frame)?;
    send(w, &command).map_err(skstack::Error::from)
}

#[test]
fn test_mask_credentials() {
    assert_eq!(
        mask_credentials("SKSETPWD C 0123456789AB\\r\\n"),
        "SKSETPWD C ############\\r\\n"
    );
    assert_eq!(
        mask_credentials("SKSETRBID 00112233445566778899AABBCCDDEEFF\r\n"),
        "SKSETRBID ################################\r\n"
    );
    assert_eq!(mask_credentials("SKSREG S2 21\r\n"), "SKSREG S2 21\r\n");
}

#[test]
fn test_link_local_address() {
    let addr = link_local_address(0x001D_1290_1234_5678);
    assert_eq!(
        format_ipv6addr(&addr),
        "FE80:0000:0000:0000:021D:1290:1234:5678"
    );
}

#[test]
fn test_receive() {
    use crate::skstack::mock::ScriptedReader;

    let script = ScriptedReader::new()
        .line("SKSREG SFE 0")
        .line("OK")
        .line("EPANDESC")
        .line("  Channel:21")
        .line("  Channel Page:09")
        .line("  Pan ID:8888")
        .line("  Addr:001D129012345678")
        .line("  LQI:84")
        .line("  PairID:00ABCDEF");
    let mut reader = BufReader::new(script);

    // エコーバックは読み飛ばされる
    assert_eq!(receive(&mut reader).unwrap(), SkRxD::Ok);
    assert!(matches!(receive(&mut reader).unwrap(), SkRxD::Epandesc(_)));
    assert_eq!(
        receive(&mut reader).unwrap_err().kind(),
        io::ErrorKind::UnexpectedEof
    );
}

#[test]
fn test_receive_noise() {
    use crate::skstack::mock::ScriptedReader;

    let script = ScriptedReader::new()
        .bytes(b"\xff\xfe\x80\r\n")
        .bytes(b"O\x80K\r\n")
        .line("OK");
    let mut reader = BufReader::new(script);

    // 壊れた行は捨てて次の応答を返す
    assert_eq!(receive(&mut reader).unwrap(), SkRxD::Ok);
    assert_eq!(
        receive(&mut reader).unwrap_err().kind(),
        io::ErrorKind::UnexpectedEof
    );
}

#[test]
fn test_query() {
    use crate::skstack::mock::{ScriptedReader, SharedWriter};

    let script = ScriptedReader::new()
        .line("EVER 1.2.10")
        .line("OK")
        .timeout()
        .line("FAIL ER04");
    let mut reader = BufReader::new(script);
    let mut writer = SharedWriter::default();

    assert_eq!(
        query(&mut reader, &mut writer, "SKVER\r\n", 3).unwrap(),
        vec![SkRxD::Ever("1.2.10".to_owned())]
    );
    match command(&mut reader, &mut writer, "SKSETPWD C 0123456789AB\r\n", 3) {
        Err(skstack::Error::Fail { command, code }) => {
            assert_eq!(command, "SKSETPWD C ############");
            assert_eq!(code, 4);
        }
        other => panic!("{:?}", other),
    }
    assert_eq!(
        writer.text(),
        "SKVER\r\nSKSETPWD C 0123456789AB\r\n".to_owned()
    );
}

#[test]
fn test_command_from_echonetliteframe() {
    let frame = EchonetliteFrame {
        ehd: 0x1081,
        tid: 1,
        seoj: [0x05, 0xff, 0x01],
        deoj: [0x02, 0x88, 0x01],
        esv: 0x62,
        opc: 1,
        edata: vec![echonetlite::EchonetliteEdata {
            epc: 0xe7,
            ..Default::default()
        }],
    };
    let sender = link_local_address(0x001D_1290_1234_5678);
    let a1 = command_from_echonetliteframe(AdapterModel::Bp35a1, &sender, &frame).unwrap();
    let prefix = "SKSENDTO 1 FE80:0000:0000:0000:021D:1290:1234:5678 0E1A 1 000E ";
    assert_eq!(&a1[..prefix.len()], prefix.as_bytes());
    assert_eq!(a1.len(), prefix.len() + 14);

    let c2 = command_from_echonetliteframe(AdapterModel::Bp35c2, &sender, &frame).unwrap();
    let prefix = "SKSENDTO 1 FE80:0000:0000:0000:021D:1290:1234:5678 0E1A 1 0 000E ";
    assert_eq!(&c2[..prefix.len()], prefix.as_bytes());
}
