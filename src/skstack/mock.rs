// テスト用の擬似シリアルポート
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

enum Chunk {
    Data(Vec<u8>),
    Timeout,
}

/// 台本どおりに応答を返す読み込み側
#[derive(Default)]
pub struct ScriptedReader {
    chunks: VecDeque<Chunk>,
}

impl ScriptedReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// 1行(CRLFを付ける)
    pub fn line(mut self, s: &str) -> Self {
        self.chunks
            .push_back(Chunk::Data(format!("{}\r\n", s).into_bytes()));
        self
    }

    /// 任意のバイト列
    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.chunks.push_back(Chunk::Data(data.to_vec()));
        self
    }

    /// 複数行
    pub fn lines(self, xs: &[&str]) -> Self {
        xs.iter().fold(self, |acc, s| acc.line(s))
    }

    /// 読み込みタイムアウト
    pub fn timeout(mut self) -> Self {
        self.chunks.push_back(Chunk::Timeout);
        self
    }

    /// 読み込みタイムアウトをn回
    pub fn timeouts(self, n: usize) -> Self {
        (0..n).fold(self, |acc, _| acc.timeout())
    }
}

impl io::Read for ScriptedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.chunks.pop_front() {
            None => Ok(0),
            Some(Chunk::Timeout) => Err(io::Error::from(io::ErrorKind::TimedOut)),
            Some(Chunk::Data(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    self.chunks.push_front(Chunk::Data(data[n..].to_vec()));
                }
                Ok(n)
            }
        }
    }
}

/// 書き込まれた内容を共有する書き込み側
#[derive(Clone, Default)]
pub struct SharedWriter(pub Arc<Mutex<Vec<u8>>>);

impl SharedWriter {
    pub fn text(&self) -> String {
        let written = self.0.lock().unwrap();
        String::from_utf8_lossy(&written).into_owned()
    }

    /// 書き込まれたコマンドの先頭語
    pub fn commands(&self) -> Vec<String> {
        self.text()
            .split("\r\n")
            .filter_map(|line| line.split(' ').next())
            .filter(|s| s.starts_with("SK"))
            .map(|s| s.to_owned())
            .collect()
    }
}

impl io::Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
