// アクティブスキャンでスマートメーターを探して接続情報を設定ファイルに保存する。
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use anyhow::Context;
use broute_meter::adapter::{self, SerialDevice};
use broute_meter::config::{Settings, SettingsArgs};
use broute_meter::logging::{self, LogOptions};
use broute_meter::skstack;
use clap::Parser;
use std::fs;
use std::path::PathBuf;

/// 接続対象のスマートメーターを探す
#[derive(Parser, Debug)]
#[command(name = "pairing")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: SettingsArgs,

    /// アクティブスキャン時間(1～14) 省略すると見つかるまで延ばしていく
    #[arg(short = 'T', long, value_parser = clap::value_parser!(u8).range(1..=14))]
    activescan: Option<u8>,

    /// 出力先ファイル名 省略すると設定ファイルを更新する
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();
    let cli = Cli::parse();

    // デバッグレベルは RUST_LOG 環境変数で設定できる
    let _guard = logging::init(
        "pairing",
        &LogOptions {
            journald: false,
            log_dir: None,
            default_filter: "debug".to_owned(),
        },
    );

    let mut settings = Settings::resolve(&cli.settings)?;
    let scan_durations = match cli.activescan {
        Some(n) => n as usize..=n as usize,
        None => skstack::DEFAULT_SCAN_DURATIONS,
    };

    // 接続するスマートメーターをアクティブスキャンで探す
    let connection = match adapter::pairing(
        SerialDevice::new(&settings.serial_port),
        settings.adapter_model()?,
        settings.credentials()?,
        scan_durations,
    ) {
        Ok(connection) => connection,
        Err(adapter::Error::Skstack(skstack::Error::MeterNotFound)) => {
            println!("Could not find smart meter.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    println!("{}", toml::to_string_pretty(&connection)?);

    // TOML化
    settings.connection = Some(connection);
    let comment = "# broute-meter 設定ファイル".to_string();
    let toml = toml::to_string_pretty(&settings)?;

    // ファイル出力
    let file_name = cli.output.unwrap_or(cli.settings.config_file);
    fs::write(&file_name, [comment, toml].join("\n"))
        .with_context(|| format!(r#"Failed to write "{}""#, file_name.display()))?;
    println!(r#""{}" file write finished."#, file_name.display());
    Ok(())
}
