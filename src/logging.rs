// ログ出力
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::skstack;
use std::io;
use std::path::PathBuf;
use tracing::{Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, FormatEvent, FormatFields, MakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

/// ログ出力先
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// systemd-journaldを優先する
    pub journald: bool,
    /// 指定すると日毎のログファイルにも出力する
    pub log_dir: Option<PathBuf>,
    /// RUST_LOG 環境変数がない場合のフィルタ
    pub default_filter: String,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            journald: true,
            log_dir: None,
            default_filter: "info".to_owned(),
        }
    }
}

/// ルートBのパスワードとIDをマスクするフォーマッタ
pub struct MaskingFormatter<F> {
    inner: F,
}

impl<F> MaskingFormatter<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }
}

impl<S, N, F> FormatEvent<S, N> for MaskingFormatter<F>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'writer> FormatFields<'writer> + 'static,
    F: FormatEvent<S, N>,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: fmt::format::Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        // まず内側のフォーマットをバッファに書き出す
        let mut buf = String::new();
        self.inner
            .format_event(ctx, fmt::format::Writer::new(&mut buf), event)?;
        // マスクして出力
        writer.write_str(&skstack::mask_credentials(&buf))
    }
}

/// マスク付きのテキスト出力レイヤー
pub fn masking_layer<S, W>(make_writer: W) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> MakeWriter<'writer> + 'static,
{
    let format = fmt::format()
        .with_timer(fmt::time::LocalTime::rfc_3339())
        .with_file(false)
        .with_line_number(false)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_ansi(false);
    fmt::layer()
        .with_ansi(false)
        .with_writer(make_writer)
        .event_format(MaskingFormatter::new(format))
}

/// tracingの設定
/// ログファイルに出力する場合は返値を保持しておくこと
pub fn init(app_name: &str, options: &LogOptions) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&options.default_filter));

    let (file_writer, guard) = match &options.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, format!("{app_name}.log"));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(file_writer.map(|w| masking_layer(w)));

    let journald = options.journald.then(tracing_journald::layer);
    match journald {
        // journaldにログ出力する
        Some(Ok(journald_layer)) => registry.with(journald_layer).init(),
        // journaldが使えないので、標準出力にログ出力する
        Some(Err(e)) => {
            registry.with(masking_layer(io::stdout)).init();
            tracing::error!("couldn't connect to journald: {}", e)
        }
        None => registry.with(masking_layer(io::stdout)).init(),
    }
    guard
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skstack::mock::SharedWriter;

    #[test]
    fn test_masking_layer() {
        let writer = SharedWriter::default();
        let w = writer.clone();
        let subscriber = tracing_subscriber::registry().with(masking_layer(move || w.clone()));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("SKSETPWD C 0123456789AB\r\n");
            tracing::info!("SKSETRBID 00112233445566778899AABBCCDDEEFF\r\n");
            tracing::info!("SKJOIN FE80:0000:0000:0000:021D:1290:1234:5678");
        });
        let text = writer.text();
        assert!(text.contains("SKSETPWD C ############"));
        assert!(!text.contains("0123456789AB"));
        assert!(text.contains(&format!("SKSETRBID {}", "#".repeat(32))));
        assert!(!text.contains("00112233445566778899AABBCCDDEEFF"));
        // 他の行はそのまま
        assert!(text.contains("SKJOIN FE80:0000:0000:0000:021D:1290:1234:5678"));
    }
}
