//! Transformation backends behind a single [`TransformProvider`] contract.
//!
//! - [`AutomaticProvider`]: HTTPS call to a model API with credential rotation.
//!   The wire format of each API family lives in a [`backends::BackendAdapter`]
//!   chosen once, at construction.
//! - [`ManualRelayProvider`]: hands the prompt to a human through a
//!   [`RelayChannel`] and waits for the counter-response.
//!
//! The orchestrator only ever sees `dyn TransformProvider`.

pub mod backends;
mod automatic;
mod credentials;
mod relay;

use async_trait::async_trait;

use aibridge_shared::Result;

pub use automatic::AutomaticProvider;
pub use credentials::CredentialPool;
pub use relay::{
    FileRelayChannel, ManualRelayProvider, MemoryRelayChannel, RelayChannel, RelayHandle,
};

/// A backend that turns one encoded batch prompt into response text.
#[async_trait]
pub trait TransformProvider: Send + Sync {
    /// Human-readable name for tracing.
    fn name(&self) -> &str;

    /// Execute one batch prompt.
    ///
    /// Non-fatal failures ([`AiBridgeError::Provider`]) cost only the current
    /// batch; anything else ends the run.
    ///
    /// [`AiBridgeError::Provider`]: aibridge_shared::AiBridgeError::Provider
    async fn call(&self, prompt: &str) -> Result<String>;

    /// Clear per-run state. Called by the orchestrator before the first batch.
    fn begin_run(&self) {}
}
