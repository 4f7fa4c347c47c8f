// スマートメーターに接続してみる。
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use broute_meter::adapter::{Adapter, SerialDevice, SkstackAdapter};
use broute_meter::config::{Settings, SettingsArgs};
use broute_meter::logging::{self, LogOptions};
use clap::Parser;
use serde_json::json;

/// スマートメーターBルートから計測値を1回だけ取得する。
#[derive(Parser, Debug)]
#[command(name = "dryrun")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: SettingsArgs,

    /// アダプタとネットワークの状態も出力する
    #[arg(long)]
    diagnostics: bool,
}

fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();
    let cli = Cli::parse();

    let _guard = logging::init(
        "dryrun",
        &LogOptions {
            journald: false,
            log_dir: None,
            default_filter: "debug".to_owned(),
        },
    );

    let settings = Settings::resolve(&cli.settings)?;
    let mut adapter = SkstackAdapter::new(
        SerialDevice::new(&settings.serial_port),
        settings.adapter_model()?,
        settings.credentials()?,
    )
    .with_connection_settings(settings.connection.clone())
    .with_session_lifetime(settings.session_lifetime());

    // スマートメーターと接続する
    adapter.connect()?;

    let mut read_once = || -> anyhow::Result<serde_json::Value> {
        let reading = adapter.get_data()?;
        let diagnostic_info = match cli.diagnostics {
            true => Some(adapter.get_diagnostic_info()?),
            false => None,
        };
        Ok(json!({
            "settings": settings.redacted(),
            "connection": adapter.connection_settings(),
            "reading": reading,
            "diagnostic_info": diagnostic_info,
        }))
    };
    let result = read_once();

    // 切断してから結果を出す
    adapter.close();
    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}
