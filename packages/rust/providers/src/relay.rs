//! Manual relay: a human carries the prompt to an external tool and brings
//! the answer back.
//!
//! The exchange is a two-state machine. `publish` moves Idle to Awaiting and
//! is rejected with [`AiBridgeError::RelayBusy`] while a response is pending;
//! `retrieve` reads the counter-response and returns to Idle; `cancel` returns
//! to Idle without producing anything. As a [`TransformProvider`] the relay
//! publishes, then suspends until a [`RelayHandle`] signals readiness or
//! cancellation. There is no timeout.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use aibridge_shared::{AiBridgeError, Result};

use crate::TransformProvider;

/// Name reported by the manual relay provider.
const RELAY_NAME: &str = "manual";

// ---------------------------------------------------------------------------
// RelayChannel
// ---------------------------------------------------------------------------

/// Transport between the pipeline and the operator.
#[async_trait]
pub trait RelayChannel: Send + Sync {
    /// Make `text` available to the operator.
    async fn publish(&self, text: &str) -> Result<()>;

    /// Read the operator's response. Fails while none is available.
    async fn retrieve(&self) -> Result<String>;
}

/// File-based relay: the prompt is written to `<dir>/prompt.txt` and the
/// operator saves the answer as `<dir>/response.txt`.
#[derive(Debug, Clone)]
pub struct FileRelayChannel {
    dir: PathBuf,
}

impl FileRelayChannel {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn prompt_path(&self) -> PathBuf {
        self.dir.join("prompt.txt")
    }

    pub fn response_path(&self) -> PathBuf {
        self.dir.join("response.txt")
    }
}

#[async_trait]
impl RelayChannel for FileRelayChannel {
    async fn publish(&self, text: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AiBridgeError::io(&self.dir, e))?;

        // A leftover answer belongs to an earlier prompt.
        remove_if_exists(&self.response_path()).await?;

        let prompt = self.prompt_path();
        tokio::fs::write(&prompt, text)
            .await
            .map_err(|e| AiBridgeError::io(&prompt, e))
    }

    async fn retrieve(&self) -> Result<String> {
        let path = self.response_path();
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AiBridgeError::provider(
                    RELAY_NAME,
                    format!("no response file at {}", path.display()),
                ));
            }
            Err(e) => return Err(AiBridgeError::io(&path, e)),
        };

        if text.trim().is_empty() {
            return Err(AiBridgeError::provider(
                RELAY_NAME,
                format!("{} is empty", path.display()),
            ));
        }

        remove_if_exists(&path).await?;
        Ok(text)
    }
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AiBridgeError::io(path, e)),
    }
}

/// In-process relay for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryRelayChannel {
    published: Mutex<Vec<String>>,
    responses: Mutex<VecDeque<String>>,
}

impl MemoryRelayChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an operator response.
    pub fn push_response(&self, text: impl Into<String>) {
        lock(&self.responses).push_back(text.into());
    }

    /// Every prompt published so far, oldest first.
    pub fn published(&self) -> Vec<String> {
        lock(&self.published).clone()
    }
}

#[async_trait]
impl RelayChannel for MemoryRelayChannel {
    async fn publish(&self, text: &str) -> Result<()> {
        lock(&self.published).push(text.to_string());
        Ok(())
    }

    async fn retrieve(&self) -> Result<String> {
        lock(&self.responses)
            .pop_front()
            .ok_or_else(|| AiBridgeError::provider(RELAY_NAME, "no response queued"))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// ManualRelayProvider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayState {
    Idle,
    Awaiting,
}

#[derive(Debug)]
enum RelaySignal {
    Ready,
    Cancel,
}

/// Operator-side controls for a waiting relay.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    signals: mpsc::UnboundedSender<RelaySignal>,
    state: Arc<Mutex<RelayState>>,
}

impl RelayHandle {
    /// The operator has placed a response; wake the waiting call.
    pub fn response_ready(&self) {
        let _ = self.signals.send(RelaySignal::Ready);
    }

    /// Abandon the pending exchange.
    pub fn cancel(&self) {
        // Sent under the state lock so `publish` sees the reset and the
        // signal together or neither.
        let mut state = lock(&self.state);
        *state = RelayState::Idle;
        let _ = self.signals.send(RelaySignal::Cancel);
    }

    pub fn is_awaiting(&self) -> bool {
        *lock(&self.state) == RelayState::Awaiting
    }
}

/// Provider backed by a human operator.
pub struct ManualRelayProvider {
    channel: Arc<dyn RelayChannel>,
    state: Arc<Mutex<RelayState>>,
    signals_tx: mpsc::UnboundedSender<RelaySignal>,
    signals_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<RelaySignal>>,
}

impl ManualRelayProvider {
    pub fn new(channel: Arc<dyn RelayChannel>) -> Self {
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        Self {
            channel,
            state: Arc::new(Mutex::new(RelayState::Idle)),
            signals_tx,
            signals_rx: tokio::sync::Mutex::new(signals_rx),
        }
    }

    pub fn handle(&self) -> RelayHandle {
        RelayHandle {
            signals: self.signals_tx.clone(),
            state: Arc::clone(&self.state),
        }
    }

    pub fn is_awaiting(&self) -> bool {
        *lock(&self.state) == RelayState::Awaiting
    }

    /// Hand `text` to the operator. Fails with [`AiBridgeError::RelayBusy`]
    /// while an earlier exchange is still pending.
    pub async fn publish(&self, text: &str) -> Result<()> {
        {
            let mut state = lock(&self.state);
            if *state == RelayState::Awaiting {
                return Err(AiBridgeError::RelayBusy);
            }
            // Signals sent while idle must not complete this exchange.
            if let Ok(mut signals) = self.signals_rx.try_lock() {
                while signals.try_recv().is_ok() {}
            }
            *state = RelayState::Awaiting;
        }

        if let Err(e) = self.channel.publish(text).await {
            self.cancel();
            return Err(e);
        }
        info!(
            chars = text.chars().count(),
            "prompt published, waiting for operator"
        );
        Ok(())
    }

    /// Read the counter-response and return to idle.
    pub async fn retrieve(&self) -> Result<String> {
        if !self.is_awaiting() {
            return Err(AiBridgeError::provider(
                RELAY_NAME,
                "no relay exchange in progress",
            ));
        }
        let text = self.channel.retrieve().await?;
        *lock(&self.state) = RelayState::Idle;
        Ok(text)
    }

    /// Return to idle without a response.
    pub fn cancel(&self) {
        *lock(&self.state) = RelayState::Idle;
    }
}

#[async_trait]
impl TransformProvider for ManualRelayProvider {
    fn name(&self) -> &str {
        RELAY_NAME
    }

    #[instrument(skip_all, fields(provider = RELAY_NAME))]
    async fn call(&self, prompt: &str) -> Result<String> {
        self.publish(prompt).await?;

        let mut signals = self.signals_rx.lock().await;
        loop {
            match signals.recv().await {
                Some(RelaySignal::Ready) => match self.retrieve().await {
                    Ok(text) => return Ok(text),
                    Err(e) => warn!(error = %e, "response not usable yet, still waiting"),
                },
                Some(RelaySignal::Cancel) | None => {
                    self.cancel();
                    return Err(AiBridgeError::RelayCancelled);
                }
            }
        }
    }

    fn begin_run(&self) {
        self.cancel();
    }
}
