// Bルート スマートメーター読み取り
// SPDX-License-Identifier: MPL-2.0
// SPDX-FileCopyrightText: 2025 Akihiro Yamamoto <github.com/ak1211>
//
pub mod adapter;
pub mod config;
pub mod connection_settings;
pub mod coordinator;
pub mod echonetlite;
pub mod logging;
pub mod skstack;

pub use connection_settings::*;
