// スマートメーターから定期的に計測値を得て出力する。
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use anyhow::Context;
use broute_meter::adapter::{SerialDevice, SkstackAdapter};
use broute_meter::config::{Settings, SettingsArgs};
use broute_meter::coordinator::{self, Coordinator, CoordinatorState};
use broute_meter::logging::{self, LogOptions};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// 再始動までのクールダウン時間
const RESTART_COOLDOWN: Duration = Duration::from_secs(5);

/// スマートメーターBルートから計測値を定期的に取得する。
#[derive(Parser, Debug)]
#[command(name = "broute_meterd")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: SettingsArgs,

    /// 計測結果(JSON)の出力先ファイル
    #[arg(short = 'o', long, env = "BROUTE_METER_STATE_FILE")]
    state_file: Option<PathBuf>,

    /// ログファイルの出力先ディレクトリ
    #[arg(long, env = "BROUTE_METER_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// systemd-journaldを使わずに標準出力にログ出力する
    #[arg(long)]
    no_journald: bool,
}

/// 計測結果を出力する
async fn publish(state: &CoordinatorState, state_file: Option<&Path>) {
    let json = match serde_json::to_string(state) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!("{}", e);
            return;
        }
    };
    tracing::info!("{}", json);
    if let Some(path) = state_file {
        // 書きかけのファイルを読まれないように置き換える
        let temporary = path.with_extension("tmp");
        let result = match tokio::fs::write(&temporary, &json).await {
            Ok(()) => tokio::fs::rename(&temporary, path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::error!(r#"Failed to write "{}": {}"#, path.display(), e);
        }
    }
}

/// 計測を開始して取り消されるまで結果を出力する
async fn exec_service(cli: &Cli, cancel: CancellationToken) -> anyhow::Result<()> {
    let settings = Settings::resolve(&cli.settings).context("configuration error")?;
    tracing::info!("{}", settings.redacted());
    if settings.connection.is_none() {
        tracing::info!("no pairing information, the smart meter is searched by active scan");
    }

    let adapter = SkstackAdapter::new(
        SerialDevice::new(&settings.serial_port),
        settings.adapter_model()?,
        settings.credentials()?,
    )
    .with_connection_settings(settings.connection.clone())
    .with_session_lifetime(settings.session_lifetime())
    .with_connect_deadline(coordinator::CONNECT_TIMEOUT);

    let coordinator = Coordinator::new(adapter)
        .with_retry_count(settings.retry_count)
        .with_update_interval(settings.update_interval())
        .with_schedule(settings.schedule()?);
    let mut rx = coordinator.subscribe();
    let mut handle = tokio::spawn(coordinator.run(cancel));

    loop {
        tokio::select! {
            joined = &mut handle => {
                if let Err(e) = joined {
                    tracing::error!("coordinator task: {}", e);
                }
                return Ok(());
            }
            Ok(()) = rx.changed() => {
                let state = rx.borrow_and_update().clone();
                publish(&state, cli.state_file.as_deref()).await;
            }
        }
    }
}

/// 停止要求を待つ
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenv::dotenv();
    let cli = Cli::parse();

    // プログラムの情報
    let git_head_ref = built_info::GIT_HEAD_REF.unwrap_or_default();
    let app_info = format!(
        "{} / {}{}",
        built_info::PKG_NAME,
        built_info::PKG_VERSION,
        built_info::GIT_COMMIT_HASH_SHORT
            .map(|s| format!(" ({s} - {git_head_ref})"))
            .unwrap_or_default()
    );

    // tracingの設定
    let _guard = logging::init(
        "broute_meterd",
        &LogOptions {
            journald: !cli.no_journald,
            log_dir: cli.log_dir.clone(),
            ..Default::default()
        },
    );

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            tracing::info!("shutdown requested");
            cancel.cancel();
        }
    });

    // サービスを開始する
    tracing::info!("{app_info} started.");
    let reason = loop {
        match exec_service(&cli, cancel.child_token()).await {
            Ok(()) if cancel.is_cancelled() => {
                tracing::info!("{app_info} stopped.");
                return ExitCode::SUCCESS;
            }
            Ok(()) => {
                tokio::time::sleep(RESTART_COOLDOWN).await; // 再始動まで少々クールダウン時間をもつ
                continue; // 再始動
            }
            Err(e) => break e,
        }
    };

    // ここに到達するのは異常終了しかありえない
    tracing::error!("{app_info} aborted, reason: {reason:#}");
    ExitCode::FAILURE
}
