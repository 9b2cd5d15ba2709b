//! Roomlink Demo
//!
//! Runs one scripted room session against the loopback engine and checks that
//! every native object was returned afterwards.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


mod session;

use anyhow::Result;
use roomlink_config::SdkConfig;
use roomlink_core::{CallbackThread, LoopbackEngine, MediaRuntime, ResourceKind, RuntimeOptions};
use roomlink_logging::init_from_config;
use std::sync::Arc;
use tracing::{error, info};

use session::Session;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = SdkConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    // Initialize logging
    init_from_config("roomlink-demo", &config);

    info!(
        callback_thread = %config.callback_thread_name,
        share_render_context = config.share_render_context,
        "Configuration loaded"
    );

    let engine = Arc::new(LoopbackEngine::new());
    let runtime = MediaRuntime::with_options(engine.clone(), RuntimeOptions::from(&config));
    let callbacks = CallbackThread::spawn(config.callback_thread_name.clone())?;

    let session = Session::new(engine.clone(), runtime.clone(), callbacks.handle());
    let report = session.run("demo-room").await;
    callbacks.shutdown();
    let report = report?;

    for stats in &report.stats {
        info!(stats = %serde_json::to_string(stats)?, "Stats report");
    }

    let leaked: Vec<_> = [
        ResourceKind::MediaFactory,
        ResourceKind::RenderContext,
        ResourceKind::AudioTrack,
        ResourceKind::VideoTrack,
        ResourceKind::DataTrack,
        ResourceKind::RemoteTrack,
        ResourceKind::Room,
        ResourceKind::LocalParticipant,
        ResourceKind::RemoteParticipant,
    ]
    .into_iter()
    .filter(|kind| engine.live(*kind) > 0)
    .collect();

    info!(
        factory_constructed = report.factory_constructed,
        factory_destroyed = report.factory_destroyed,
        underflows = report.underflows,
        invalid_releases = report.invalid_releases,
        "Session finished"
    );

    if !leaked.is_empty() || report.underflows > 0 || report.invalid_releases > 0 {
        error!(leaked = ?leaked, "Native objects were not returned cleanly");
        anyhow::bail!("session left native objects behind");
    }

    info!("Roomlink demo completed cleanly");
    Ok(())
}
