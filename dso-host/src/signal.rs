// Copyright 2025 The kmesh Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

use dso_error::BoxedError;
use std::{
    io,
    thread::{self, JoinHandle},
};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Signal types that can trigger shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// CTRL+C (SIGINT) signal
    Interrupt,
    /// SIGTERM signal (Unix only)
    #[cfg(unix)]
    Terminate,
    /// Manual shutdown request
    Manual,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "SIGINT (CTRL+C)"),
            #[cfg(unix)]
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
            ShutdownSignal::Manual => write!(f, "Manual"),
        }
    }
}

/// What the host is asked to do from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Shutdown(ShutdownSignal),
    /// Re-read the route discovery file (SIGHUP)
    ReloadRoutes,
}

impl std::fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlSignal::Shutdown(signal) => signal.fmt(f),
            ControlSignal::ReloadRoutes => write!(f, "SIGHUP"),
        }
    }
}

/// Spawns a signal handler thread that turns process signals into [`ControlSignal`]s and notifies
/// all subscribers via a broadcast channel.
///
/// On Unix platforms, SIGINT and SIGTERM request shutdown and SIGHUP requests a route reload.
/// On Windows, only CTRL+C is handled.
pub fn spawn_signal_handler() -> io::Result<(broadcast::Sender<ControlSignal>, JoinHandle<()>)> {
    let (control_tx, _) = broadcast::channel::<ControlSignal>(16);
    let signal_control_tx = control_tx.clone();

    let signal_handle = thread::Builder::new().name("signal_handler".to_owned()).spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                warn!("Failed to create signal handler runtime: {e}");
                return;
            },
        };

        rt.block_on(async {
            if let Err(e) = listen_for_signals(signal_control_tx).await {
                warn!("Signal handler error: {e}");
            }
        });
    })?;

    Ok((control_tx, signal_handle))
}

async fn listen_for_signals(control_tx: broadcast::Sender<ControlSignal>) -> Result<(), BoxedError> {
    #[cfg(unix)]
    {
        listen_for_signals_unix(control_tx).await
    }
    #[cfg(not(unix))]
    {
        listen_for_signals_windows(control_tx).await
    }
}

#[cfg(unix)]
async fn listen_for_signals_unix(control_tx: broadcast::Sender<ControlSignal>) -> Result<(), BoxedError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    loop {
        let received = tokio::select! {
            _ = sigint.recv() => ControlSignal::Shutdown(ShutdownSignal::Interrupt),
            _ = sigterm.recv() => ControlSignal::Shutdown(ShutdownSignal::Terminate),
            _ = sighup.recv() => ControlSignal::ReloadRoutes,
        };
        info!("Received {received} signal");
        if let Err(e) = control_tx.send(received) {
            warn!("Failed to forward {received} signal: {e}");
        }
        if matches!(received, ControlSignal::Shutdown(_)) {
            return Ok(());
        }
    }
}

#[cfg(not(unix))]
async fn listen_for_signals_windows(control_tx: broadcast::Sender<ControlSignal>) -> Result<(), BoxedError> {
    if let Err(e) = tokio::signal::ctrl_c().await {
        return Err(format!("Failed to listen for CTRL+C: {e}").into());
    }

    info!("Received {} signal, initiating shutdown...", ShutdownSignal::Interrupt);
    if let Err(e) = control_tx.send(ControlSignal::Shutdown(ShutdownSignal::Interrupt)) {
        warn!("Failed to send shutdown signal: {e}");
    }

    Ok(())
}

pub fn create_control_receiver(control_tx: &broadcast::Sender<ControlSignal>) -> broadcast::Receiver<ControlSignal> {
    control_tx.subscribe()
}

pub fn trigger_manual_shutdown(
    control_tx: &broadcast::Sender<ControlSignal>,
) -> Result<(), broadcast::error::SendError<ControlSignal>> {
    info!("Triggering manual shutdown...");
    control_tx.send(ControlSignal::Shutdown(ShutdownSignal::Manual)).map(|_| ())
}

pub fn trigger_route_reload(
    control_tx: &broadcast::Sender<ControlSignal>,
) -> Result<(), broadcast::error::SendError<ControlSignal>> {
    control_tx.send(ControlSignal::ReloadRoutes).map(|_| ())
}
