// スマートメーターの定期計測
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
use crate::adapter::{self, Adapter, DiagnosticInfo, MeterReading};
use chrono::{DateTime, Utc};
use chrono_tz::Asia;
use cron::Schedule;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 接続のタイムアウト
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// 診断情報の更新間隔(30分)
pub const DIAGNOSTIC_UPDATE_INTERVAL: Duration = Duration::from_secs(1800);

/// 計測値が空のときや読み出しに失敗したときの最大待ち時間(秒)
const MAX_RETRY_WAIT_SECS: u32 = 3;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Adapter(#[from] adapter::Error),
    #[error("スマートメーターとの接続が {0:?} でタイムアウトした")]
    ConnectTimeout(Duration),
    #[error("{attempts} 回試行しても計測値を得られなかった: {reason}")]
    UpdateFailed { attempts: u32, reason: String },
    #[error("worker thread {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// 動作状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OperationStatus {
    #[serde(rename = "ON")]
    On,
    #[serde(rename = "OFF")]
    Off,
}

/// 異常発生状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FaultStatus {
    Normal,
    Error,
}

/// 1回の計測結果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e7_power: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e8_current: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r_phase_current: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t_phase_current: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e9_voltage: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ea_forward: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eb_reverse: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ea_forward_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eb_reverse_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_status: Option<OperationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault_status: Option<FaultStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic_info: Option<DiagnosticInfo>,
}

impl Snapshot {
    fn merge_reading(&mut self, reading: &MeterReading) {
        self.e7_power = reading.power;
        self.e8_current = reading.current;
        if reading.current.is_some() {
            self.r_phase_current = reading.r_phase_current;
            self.t_phase_current = reading.t_phase_current;
        }
        self.e9_voltage = reading.voltage;
        self.ea_forward = reading.forward;
        self.eb_reverse = reading.reverse;
        self.ea_forward_timestamp = reading.forward_timestamp;
        self.eb_reverse_timestamp = reading.reverse_timestamp;
        self.operation_status = reading.operation_status.map(|on| match on {
            true => OperationStatus::On,
            false => OperationStatus::Off,
        });
        self.fault_status = reading.fault_status.map(|fault| match fault {
            true => FaultStatus::Error,
            false => FaultStatus::Normal,
        });
    }

    fn merge_diagnostics(&mut self, info: Option<&DiagnosticInfo>) {
        if let Some(info) = info {
            self.diagnostic_info = Some(info.clone());
            if info.rssi.is_some() {
                self.rssi = info.rssi;
            }
        }
    }
}

/// 更新の成否
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpdateStatus {
    pub last_update_success: bool,
    pub last_exception: Option<String>,
    pub update_success_count: u64,
    pub update_fail_count: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

/// 購読者に配る状態
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoordinatorState {
    pub data: Option<Snapshot>,
    pub status: UpdateStatus,
}

/// アダプタの操作をブロッキングスレッドで実行する
async fn run_blocking<A, T, F>(adapter: Arc<Mutex<A>>, f: F) -> Result<T, Error>
where
    A: Adapter,
    T: Send + 'static,
    F: FnOnce(&mut A) -> Result<T, adapter::Error> + Send + 'static,
{
    let result = tokio::task::spawn_blocking(move || {
        let mut guard = adapter.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut *guard)
    })
    .await?;
    Ok(result?)
}

/// 失敗後の待ち時間
fn connect_retry_wait(attempt: u32) -> Duration {
    match attempt {
        1 => Duration::from_secs(1),
        n => Duration::from_secs(n as u64),
    }
}

fn read_retry_wait(attempt: u32) -> Duration {
    Duration::from_secs(attempt.min(MAX_RETRY_WAIT_SECS) as u64)
}

/// 定期的にアダプタから計測値を得て配る
pub struct Coordinator<A: Adapter> {
    adapter: Arc<Mutex<A>>,
    connected: bool,
    retry_count: u32,
    update_interval: Duration,
    schedule: Option<Schedule>,
    connect_timeout: Duration,
    diagnostic_interval: Duration,
    diagnostic_info: Option<DiagnosticInfo>,
    last_diagnostic_update: Option<Instant>,
    state: CoordinatorState,
    sender: watch::Sender<CoordinatorState>,
}

impl<A: Adapter> Coordinator<A> {
    pub fn new(adapter: A) -> Self {
        let (sender, _) = watch::channel(CoordinatorState::default());
        Self {
            adapter: Arc::new(Mutex::new(adapter)),
            connected: false,
            retry_count: crate::config::DEFAULT_RETRY_COUNT,
            update_interval: Duration::from_secs(crate::config::DEFAULT_UPDATE_INTERVAL),
            schedule: None,
            connect_timeout: CONNECT_TIMEOUT,
            diagnostic_interval: DIAGNOSTIC_UPDATE_INTERVAL,
            diagnostic_info: None,
            last_diagnostic_update: None,
            state: CoordinatorState::default(),
            sender,
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count.max(1);
        self
    }

    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    /// cronスケジュール(日本時間)で計測する
    pub fn with_schedule(mut self, schedule: Option<Schedule>) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<CoordinatorState> {
        self.sender.subscribe()
    }

    pub fn state(&self) -> &CoordinatorState {
        &self.state
    }

    pub fn adapter(&self) -> &Arc<Mutex<A>> {
        &self.adapter
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// 接続する
    async fn try_connect(&mut self) -> Result<(), Error> {
        if self.connected {
            return Ok(());
        }
        tracing::info!("Try connecting to B-Route meter");
        let adapter = Arc::clone(&self.adapter);
        let result =
            tokio::time::timeout(self.connect_timeout, run_blocking(adapter, |a| a.connect()))
                .await;
        match result {
            Ok(Ok(())) => {
                self.connected = true;
                tracing::info!("Successfully connected to B-Route meter");
                Ok(())
            }
            Ok(Err(e)) => {
                self.connected = false;
                tracing::error!("Failed to connect to B-Route meter: {}", e);
                Err(e)
            }
            Err(_) => {
                self.connected = false;
                tracing::error!(
                    "Connection to B-Route meter timed out after {:?}",
                    self.connect_timeout
                );
                Err(Error::ConnectTimeout(self.connect_timeout))
            }
        }
    }

    /// 切断してから接続しなおす
    async fn reconnect(&mut self) {
        self.connected = false;
        let adapter = Arc::clone(&self.adapter);
        if let Err(e) = run_blocking(adapter, |a| {
            a.close();
            Ok(())
        })
        .await
        {
            tracing::error!("Error closing adapter connection: {}", e);
        }
        if let Err(e) = self.try_connect().await {
            tracing::error!("Failed to reconnect: {}", e);
        }
    }

    /// 必要なら診断情報を更新する
    async fn update_diagnostic_info(&mut self) {
        let due = self
            .last_diagnostic_update
            .is_none_or(|t| t.elapsed() >= self.diagnostic_interval);
        if !due || !self.connected {
            return;
        }
        let adapter = Arc::clone(&self.adapter);
        match run_blocking(adapter, |a| a.get_diagnostic_info()).await {
            Ok(info) => {
                self.diagnostic_info = Some(info);
                self.last_diagnostic_update = Some(Instant::now());
                tracing::debug!("Successfully updated diagnostic information");
            }
            Err(e) => tracing::warn!("Failed to update diagnostic information: {}", e),
        }
    }

    /// 計測値を得る
    /// 失敗したら前回の計測結果を返す
    #[tracing::instrument(skip_all)]
    pub async fn update_data(&mut self) -> Result<Snapshot, Error> {
        let previous = self.state.data.clone();

        let mut result = Snapshot::default();
        self.update_diagnostic_info().await;
        result.merge_diagnostics(self.diagnostic_info.as_ref());

        let max_attempts = self.retry_count;
        let mut last_error: Option<Error> = None;
        let mut success = false;
        let mut attempt = 0;
        while attempt < max_attempts {
            attempt += 1;
            tracing::debug!(
                "Fetching data from B-Route meter (attempt {}/{})",
                attempt,
                max_attempts
            );
            let started = Instant::now();

            if let Err(e) = self.try_connect().await {
                let wait = connect_retry_wait(attempt);
                tracing::warn!(
                    "Update attempt {}/{} failed: {}. Retrying in {:?}",
                    attempt,
                    max_attempts,
                    e,
                    wait
                );
                last_error = Some(e);
                if attempt < max_attempts {
                    tokio::time::sleep(wait).await;
                }
                continue;
            }

            let adapter = Arc::clone(&self.adapter);
            match run_blocking(adapter, |a| a.get_data()).await {
                Ok(reading) if reading.is_empty() => {
                    tracing::warn!("All meter readings are None. Check device communication.");
                    if attempt < max_attempts {
                        self.reconnect().await;
                        tokio::time::sleep(read_retry_wait(attempt)).await;
                        continue;
                    }
                    tracing::warn!("After {} attempts, still no valid readings", max_attempts);
                }
                Ok(reading) => {
                    result.merge_reading(&reading);
                    success = true;
                }
                Err(e) => {
                    tracing::error!("Error fetching data from B-Route meter: {}", e);
                    // 次の試行で接続しなおす
                    self.connected = false;
                    last_error = Some(e);
                    if attempt < max_attempts {
                        tokio::time::sleep(read_retry_wait(attempt)).await;
                        continue;
                    }
                }
            }

            tracing::debug!(
                "Finished fetching B-Route Smart Meter data in {:.3} seconds (success: {})",
                started.elapsed().as_secs_f64(),
                success
            );
            if success {
                break;
            }
        }

        if success {
            return Ok(result);
        }
        match (previous, last_error) {
            (Some(mut previous), _) => {
                tracing::warn!(
                    "Using previous data due to consecutive failures after {} attempts",
                    max_attempts
                );
                previous.merge_diagnostics(self.diagnostic_info.as_ref());
                Ok(previous)
            }
            (None, Some(e)) => Err(Error::UpdateFailed {
                attempts: max_attempts,
                reason: e.to_string(),
            }),
            // 計測値は空だが通信はできている
            (None, None) => Ok(result),
        }
    }

    /// 計測して結果を配る
    pub async fn refresh(&mut self) -> &CoordinatorState {
        match self.update_data().await {
            Ok(snapshot) => {
                self.state.data = Some(snapshot);
                self.state.status.last_update_success = true;
                self.state.status.last_exception = None;
                self.state.status.update_success_count += 1;
            }
            Err(e) => {
                tracing::error!("{}", e);
                self.state.status.last_update_success = false;
                self.state.status.last_exception = Some(e.to_string());
                self.state.status.update_fail_count += 1;
            }
        }
        self.state.status.last_updated = Some(Utc::now());
        self.sender.send_replace(self.state.clone());
        &self.state
    }

    /// 次の計測までの待ち時間
    pub fn next_wait(&self) -> Duration {
        match &self.schedule {
            Some(schedule) => schedule
                .upcoming(Asia::Tokyo)
                .next()
                .and_then(|next| (next.to_utc() - Utc::now()).to_std().ok())
                .unwrap_or(self.update_interval),
            None => self.update_interval,
        }
    }

    /// 接続を終了する
    pub async fn close(&mut self) {
        let adapter = Arc::clone(&self.adapter);
        if let Err(e) = run_blocking(adapter, |a| {
            a.close();
            Ok(())
        })
        .await
        {
            tracing::error!("Error closing adapter connection: {}", e);
        }
        self.connected = false;
    }

    /// 取り消されるまで計測を繰り返す
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.refresh() => {}
            }
            let wait = self.next_wait();
            tracing::trace!("Next update, sleep ({:?})", wait);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        tracing::info!("Coordinator stopped");
        self.close().await;
    }
}
