//! Request/response exchange with the runner over the file mailbox.
//!
//! The runner is a separate OS process with no socket to us; the only
//! shared medium is a handful of files in the app sandbox. The bridge
//! appends one JSON line per outgoing message to `protocol.sherlo`, then
//! polls the file until the runner's acknowledgement shows up, matching
//! by echoed request id. Requests are strictly sequential within a
//! session, so there is never more than one in flight.
//!
//! Transport failures are logged and retried on the next poll tick; only
//! a missing or unverifiable signed config is fatal, since testing
//! cannot proceed without a trusted config.

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use sherlo_device::{DeviceError, DeviceFs};
use sherlo_types::{
    ACTION_ACK_REQUEST_SNAPSHOT, ACTION_ACK_SCROLL_REQUEST, ACTION_ACK_START, AckStart, DeviceConfig,
    EndMessage, Entity, JsLoadedMessage, LogRecord, RequestSnapshotMessage, RunnerAck, RunnerState,
    Snapshot, StartMessage,
};
use sherlo_wire::{MailboxState, WireError, paths};
use tracing::{debug, warn};

#[derive(Debug)]
pub enum BridgeError {
    Device(DeviceError),
    Wire(WireError),
    /// The runner never acknowledged within the overall send deadline.
    AckTimeout { action: &'static str, waited: Duration },
    /// `state.sherlo` does not exist or does not parse; callers fall back
    /// to mailbox reconstruction.
    NoState,
    Encode(String),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(error) => write!(f, "{error}"),
            Self::Wire(error) => write!(f, "{error}"),
            Self::AckTimeout { action, waited } => {
                write!(f, "no acknowledgement for {action} after {waited:?}")
            }
            Self::NoState => write!(f, "no persisted runner state"),
            Self::Encode(detail) => write!(f, "failed to encode protocol item: {detail}"),
        }
    }
}

impl Error for BridgeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Device(error) => Some(error),
            Self::Wire(error) => Some(error),
            _ => None,
        }
    }
}

impl From<DeviceError> for BridgeError {
    fn from(error: DeviceError) -> Self {
        Self::Device(error)
    }
}

impl From<WireError> for BridgeError {
    fn from(error: WireError) -> Self {
        Self::Wire(error)
    }
}

#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// How often the mailbox is re-read while waiting for an ack.
    pub poll_interval: Duration,
    /// Overall deadline for one send; an unresponsive runner fails the
    /// request instead of hanging the session forever.
    pub send_timeout: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            send_timeout: Duration::from_secs(300),
        }
    }
}

/// Handle to the runner mailbox. Cheap to clone.
#[derive(Clone)]
pub struct RunnerBridge {
    fs: Arc<dyn DeviceFs>,
    options: BridgeOptions,
}

impl RunnerBridge {
    pub fn new(fs: Arc<dyn DeviceFs>) -> Self {
        Self::with_options(fs, BridgeOptions::default())
    }

    pub fn with_options(fs: Arc<dyn DeviceFs>, options: BridgeOptions) -> Self {
        Self { fs, options }
    }

    /// Prepares the session's files: the snapshots directory and an
    /// empty protocol mailbox if none exists yet.
    pub async fn create(&self) -> Result<(), BridgeError> {
        self.fs.mkdir(paths::SNAPSHOTS_DIR).await?;
        if self.fs.read_file(paths::PROTOCOL).await.is_err() {
            self.fs.write_file(paths::PROTOCOL, "").await?;
        }
        self.log("bridge created", None).await;
        Ok(())
    }

    /// Reads and verifies the signed device config. A bad signature is
    /// fatal for the session and propagates.
    pub async fn get_config(&self) -> Result<DeviceConfig, BridgeError> {
        let config_text = self.fs.read_file(paths::CONFIG).await?;
        let signature_text = self.fs.read_file(paths::CONFIG_SIGNATURE).await?;
        let config = sherlo_wire::decode_config(&config_text, &signature_text)?;
        self.log("config loaded", None).await;
        Ok(config)
    }

    /// Reads the `state.sherlo` recovery record.
    pub async fn get_state(&self) -> Result<RunnerState, BridgeError> {
        let content = self
            .fs
            .read_file(paths::STATE)
            .await
            .map_err(|_| BridgeError::NoState)?;
        facet_json::from_str(&content).map_err(|error| {
            warn!(%error, "state file did not parse");
            BridgeError::NoState
        })
    }

    /// Atomically rewrites the `state.sherlo` recovery record.
    pub async fn update_state(&self, state: &RunnerState) -> Result<(), BridgeError> {
        let json =
            facet_json::to_string(state).map_err(|error| BridgeError::Encode(error.to_string()))?;
        self.fs.write_file(paths::STATE, &json).await?;
        Ok(())
    }

    /// Reconstructs the session position from the mailbox alone, the
    /// crash-recovery path when `state.sherlo` is gone. Read failures
    /// mean "no previous session".
    pub async fn get_last_state(&self) -> Option<MailboxState> {
        let content = self.fs.read_file(paths::PROTOCOL).await.ok()?;
        let state = sherlo_wire::reconstruct_last_state(&content);
        if state.is_some() {
            self.log("recovered state from mailbox", None).await;
        }
        state
    }

    /// Announces that the bundle loaded. Nothing acknowledges this; it
    /// exists so the runner can distinguish "app never started" from
    /// "app started and hung".
    pub async fn send_js_loaded(&self) -> Result<(), BridgeError> {
        let mut message = JsLoadedMessage::new();
        message.timestamp = sherlo_wire::now_ms();
        let json = facet_json::to_string(&message)
            .map_err(|error| BridgeError::Encode(error.to_string()))?;
        self.append_line(&json).await
    }

    /// Closes the session. Nothing is awaited; by the time this is sent
    /// the runner may already have moved on.
    pub async fn send_end(&self) -> Result<(), BridgeError> {
        let mut message = EndMessage::new();
        message.timestamp = sherlo_wire::now_ms();
        let json = facet_json::to_string(&message)
            .map_err(|error| BridgeError::Encode(error.to_string()))?;
        self.append_line(&json).await
    }

    /// Opens the session: sends the traversal plan, waits for `ACK_START`.
    pub async fn send_start(&self, snapshots: Vec<Snapshot>) -> Result<AckStart, BridgeError> {
        let mut message = StartMessage::new(snapshots);
        message.timestamp = sherlo_wire::now_ms();
        let json = facet_json::to_string(&message)
            .map_err(|error| BridgeError::Encode(error.to_string()))?;

        let ack = self
            .send_and_await(&json, "START", &[ACTION_ACK_START], None)
            .await?;
        match ack {
            RunnerAck::Start(ack) => Ok(ack),
            other => Err(BridgeError::Wire(WireError::UnknownAction(
                other.action().to_string(),
            ))),
        }
    }

    /// Reports the rendered snapshot and waits for the runner's verdict:
    /// either the next snapshot or a scroll request for this one.
    pub async fn send_request_snapshot(
        &self,
        mut message: RequestSnapshotMessage,
    ) -> Result<RunnerAck, BridgeError> {
        message.timestamp = sherlo_wire::now_ms();
        message.entity = Entity::App;
        let request_id = message.request_id.clone();
        let json = facet_json::to_string(&message)
            .map_err(|error| BridgeError::Encode(error.to_string()))?;

        self.send_and_await(
            &json,
            "REQUEST_SNAPSHOT",
            &[ACTION_ACK_REQUEST_SNAPSHOT, ACTION_ACK_SCROLL_REQUEST],
            Some(&request_id),
        )
        .await
    }

    /// Best-effort audit line in `log.sherlo`. Swallows its own errors;
    /// diagnostics must never take the session down.
    pub async fn log(&self, key: &str, parameters: Option<facet_value::Value>) {
        let timestamp = sherlo_wire::now_ms();
        let record = LogRecord {
            key: key.to_string(),
            timestamp,
            time: sherlo_wire::iso_time(timestamp),
            parameters,
        };
        let Ok(json) = facet_json::to_string(&record) else {
            return;
        };
        if let Err(error) = self.fs.append_file(paths::LOG, &format!("{json}\n")).await {
            debug!(%error, "log append failed");
        }
    }

    async fn append_line(&self, json: &str) -> Result<(), BridgeError> {
        self.fs
            .append_file(paths::PROTOCOL, &format!("{json}\n"))
            .await?;
        Ok(())
    }

    async fn send_and_await(
        &self,
        json: &str,
        action: &'static str,
        expected_actions: &[&str],
        request_id: Option<&str>,
    ) -> Result<RunnerAck, BridgeError> {
        self.log("appending to protocol", None).await;
        self.append_line(json).await?;

        let started = tokio::time::Instant::now();
        loop {
            tokio::time::sleep(self.options.poll_interval).await;

            match self.fs.read_file(paths::PROTOCOL).await {
                Ok(content) => {
                    if let Some(ack) = sherlo_wire::find_ack(&content, expected_actions, request_id)
                    {
                        self.log("received ack message", None).await;
                        return Ok(ack);
                    }
                }
                Err(error) => {
                    // Transient read failures are retried on the next tick.
                    warn!(%error, "mailbox read failed while awaiting ack");
                }
            }

            let waited = started.elapsed();
            if waited >= self.options.send_timeout {
                self.log("ack wait timed out", None).await;
                return Err(BridgeError::AckTimeout { action, waited });
            }
        }
    }
}

#[cfg(test)]
mod tests;
