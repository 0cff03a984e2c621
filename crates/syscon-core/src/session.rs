//! DFU Session - High-level orchestrator for a syscon firmware update.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::device::{DEFAULT_READ_SIZE, DeviceSession};
use crate::events::{DfuEvent, DfuObserver, DfuPhase, LogLevel, TracingObserver};
use crate::payload::FirmwareImage;
use crate::protocol::{DFU_PACKET, DecoderStats, Frame, describe_type};
use crate::state::{Action, AdvancePolicy, UpdateSequencer, UpdateState};
use crate::transport::{DevicePathTransport, SerialTransport, TransportError};

/// Which advance policy to use.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyMode {
    /// Advance on any frame (compatible with existing syscon firmware).
    #[default]
    AnyFrame,
    /// Advance only on a matching reply, with timeout and retry.
    Correlated,
}

/// Serializable form of [`AdvancePolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub mode: PolicyMode,
    /// Response timeout (correlated mode only).
    pub timeout_ms: u64,
    /// Re-sends before giving up (correlated mode only).
    pub max_retries: u32,
    /// Stop on a negative ACK (correlated mode only).
    pub abort_on_nack: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            mode: PolicyMode::AnyFrame,
            timeout_ms: AdvancePolicy::DEFAULT_TIMEOUT.as_millis() as u64,
            max_retries: AdvancePolicy::DEFAULT_RETRIES,
            abort_on_nack: true,
        }
    }
}

impl PolicyConfig {
    pub fn to_policy(&self) -> AdvancePolicy {
        match self.mode {
            PolicyMode::AnyFrame => AdvancePolicy::AnyFrame,
            PolicyMode::Correlated => AdvancePolicy::Correlated {
                timeout: Duration::from_millis(self.timeout_ms),
                max_retries: self.max_retries,
                abort_on_nack: self.abort_on_nack,
            },
        }
    }
}

/// Configuration for a DFU session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Path to the syscon serial device.
    pub device_path: Option<String>,
    /// Path to the firmware image.
    pub image_path: Option<String>,
    /// Bytes requested per transport read.
    pub read_size: usize,
    /// Pause after a read that returned nothing.
    pub poll_interval_ms: u64,
    /// Advance policy.
    pub policy: PolicyConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_path: None,
            image_path: None,
            read_size: DEFAULT_READ_SIZE,
            poll_interval_ms: 5,
            policy: PolicyConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// How an update ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Complete,
    Aborted { reason: String },
}

/// Summary of a finished update.
#[derive(Debug, Clone)]
pub struct UpdateReport {
    pub outcome: UpdateOutcome,
    pub chunks_sent: usize,
    pub bytes_sent: usize,
    pub decoder: DecoderStats,
}

impl UpdateReport {
    pub fn is_complete(&self) -> bool {
        self.outcome == UpdateOutcome::Complete
    }
}

/// DFU Session - runs one update against one device.
pub struct DfuSession<O: DfuObserver> {
    config: SessionConfig,
    observer: Arc<O>,
}

impl DfuSession<TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }
}

impl<O: DfuObserver + 'static> DfuSession<O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(config: SessionConfig, observer: Arc<O>) -> Self {
        Self { config, observer }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Load the image, open the configured device and run the update.
    #[instrument(skip(self))]
    pub fn run(&self) -> Result<UpdateReport> {
        let image_path = self
            .config
            .image_path
            .as_deref()
            .ok_or_else(|| anyhow!("No firmware image configured"))?;
        let device_path = self
            .config
            .device_path
            .as_deref()
            .ok_or_else(|| anyhow!("No device path configured"))?;

        let image = FirmwareImage::load(image_path)?;
        let transport = DevicePathTransport::open(device_path)?;
        self.observer.on_event(&DfuEvent::DeviceOpened {
            path: device_path.to_string(),
        });

        self.run_with_transport(transport, image)
    }

    /// Run the update over an already open transport.
    ///
    /// Transport errors other than read timeouts end the session.
    pub fn run_with_transport<T: SerialTransport>(
        &self,
        transport: T,
        image: FirmwareImage,
    ) -> Result<UpdateReport> {
        let policy = self.config.policy.to_policy();
        info!(
            device = %transport.device_path(),
            image_size = image.len(),
            policy = ?policy,
            "Starting DFU session"
        );

        let mut device = DeviceSession::new(transport, self.observer.clone())
            .with_read_size(self.config.read_size);
        let mut seq = UpdateSequencer::new(image, policy);
        let mut driver = Driver {
            observer: self.observer.as_ref(),
            phase: DfuPhase::Idle,
            last_send: Instant::now(),
        };
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        let action = seq.start();
        if let Some(outcome) = driver.apply(&device, &seq, action, false)? {
            return Ok(report(outcome, &seq, &device));
        }

        loop {
            if !device.transport().is_connected() {
                let err = TransportError::Disconnected;
                self.observer.on_event(&DfuEvent::Error {
                    message: err.to_string(),
                });
                return Err(err.into());
            }

            let idle = match device.poll() {
                Ok(frames) => {
                    for frame in &frames {
                        driver.observe_reply(&seq, frame);
                        let action = seq.on_response(frame);
                        if let Some(outcome) = driver.apply(&device, &seq, action, false)? {
                            return Ok(report(outcome, &seq, &device));
                        }
                    }
                    frames.is_empty()
                }
                Err(e) if e.is_timeout() => true,
                Err(e) => {
                    self.observer.on_event(&DfuEvent::Error {
                        message: e.to_string(),
                    });
                    return Err(e.into());
                }
            };

            // Traffic that does not answer the in-flight command must not
            // hold off the deadline.
            if let Some(timeout) = policy.timeout()
                && driver.last_send.elapsed() >= timeout
            {
                let action = seq.on_timeout();
                if let Some(outcome) = driver.apply(&device, &seq, action, true)? {
                    return Ok(report(outcome, &seq, &device));
                }
            }

            if idle && !poll_interval.is_zero() {
                thread::sleep(poll_interval);
            }
        }
    }
}

/// Per-run bookkeeping between the sequencer and the device session.
struct Driver<'a, O: DfuObserver> {
    observer: &'a O,
    phase: DfuPhase,
    last_send: Instant,
}

impl<O: DfuObserver> Driver<'_, O> {
    /// Surface the syscon's answer to VERSION; the sequencer itself ignores
    /// reply contents.
    fn observe_reply(&self, seq: &UpdateSequencer, frame: &Frame) {
        if seq.state() != UpdateState::QueryVersion {
            return;
        }
        self.observer.on_event(&DfuEvent::Log {
            level: LogLevel::Info,
            message: format!(
                "Syscon version reply: {} [{}]",
                describe_type(frame.frame_type),
                hex_string(&frame.payload)
            ),
        });
    }

    /// Carry out one sequencer action. `Some` once the update has ended.
    fn apply<T: SerialTransport, P: DfuObserver>(
        &mut self,
        device: &DeviceSession<T, P>,
        seq: &UpdateSequencer,
        action: Action,
        is_retry: bool,
    ) -> Result<Option<UpdateOutcome>> {
        match action {
            Action::Send {
                frame_type,
                payload,
            } => {
                self.set_phase(seq.state().phase());
                if is_retry {
                    self.observer.on_event(&DfuEvent::Retry {
                        frame_type,
                        attempt: seq.retries(),
                    });
                }
                if let Err(e) = device.send(frame_type, &payload) {
                    self.observer.on_event(&DfuEvent::Error {
                        message: e.to_string(),
                    });
                    return Err(e.into());
                }
                self.last_send = Instant::now();

                if frame_type == DFU_PACKET {
                    self.observer.on_event(&DfuEvent::Progress {
                        phase: DfuPhase::Write,
                        operation: "Firmware".to_string(),
                        current: seq.bytes_sent() as u64,
                        total: seq.image().body().len() as u64,
                    });
                }
                Ok(None)
            }
            Action::Wait => Ok(None),
            Action::Complete => {
                self.set_phase(DfuPhase::Complete);
                self.observer.on_event(&DfuEvent::Complete);
                Ok(Some(UpdateOutcome::Complete))
            }
            Action::Abort { reason } => {
                self.set_phase(DfuPhase::Aborted);
                self.observer.on_event(&DfuEvent::Aborted {
                    reason: reason.clone(),
                });
                Ok(Some(UpdateOutcome::Aborted { reason }))
            }
        }
    }

    fn set_phase(&mut self, to: DfuPhase) {
        if to != self.phase {
            self.observer.on_event(&DfuEvent::PhaseChanged {
                from: self.phase,
                to,
            });
            self.phase = to;
        }
    }
}

fn hex_string(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn report<T: SerialTransport, O: DfuObserver>(
    outcome: UpdateOutcome,
    seq: &UpdateSequencer,
    device: &DeviceSession<T, O>,
) -> UpdateReport {
    UpdateReport {
        outcome,
        chunks_sent: seq.chunks_sent(),
        bytes_sent: seq.bytes_sent(),
        decoder: device.decoder_stats(),
    }
}
