//! Update sequencer.
//!
//! A pure state machine: it never touches the transport. The driver sends
//! whatever [`Action::Send`] asks for and reports back each decoded frame via
//! [`UpdateSequencer::on_response`] and each silent interval via
//! [`UpdateSequencer::on_timeout`].
//!
//! Steps, in order: VERSION, ERASE, one DFU_PACKET per 1 KiB of image body,
//! VALIDATE, MODE_CHANGE.

use std::fmt;

use tracing::{debug, info, warn};

use super::policy::AdvancePolicy;
use crate::device::classify_ack;
use crate::events::DfuPhase;
use crate::payload::FirmwareImage;
use crate::protocol::{ACK, Command, Frame, describe_type};

/// Sequencer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateState {
    #[default]
    Idle,
    QueryVersion,
    Erase,
    /// Writing the chunk at this body offset.
    WriteChunk(usize),
    Validate,
    Start,
    Complete,
    /// Only reachable under [`AdvancePolicy::Correlated`].
    Aborted,
}

impl UpdateState {
    pub fn phase(&self) -> DfuPhase {
        match self {
            UpdateState::Idle => DfuPhase::Idle,
            UpdateState::QueryVersion => DfuPhase::QueryVersion,
            UpdateState::Erase => DfuPhase::Erase,
            UpdateState::WriteChunk(_) => DfuPhase::Write,
            UpdateState::Validate => DfuPhase::Validate,
            UpdateState::Start => DfuPhase::Start,
            UpdateState::Complete => DfuPhase::Complete,
            UpdateState::Aborted => DfuPhase::Aborted,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UpdateState::Complete | UpdateState::Aborted)
    }
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateState::Idle => write!(f, "IDLE"),
            UpdateState::QueryVersion => write!(f, "QUERY_VERSION"),
            UpdateState::Erase => write!(f, "ERASE"),
            UpdateState::WriteChunk(offset) => write!(f, "WRITE_CHUNK@{}", offset),
            UpdateState::Validate => write!(f, "VALIDATE"),
            UpdateState::Start => write!(f, "START"),
            UpdateState::Complete => write!(f, "COMPLETE"),
            UpdateState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// What the driver should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send this frame, then wait for a response.
    Send { frame_type: u16, payload: Vec<u8> },
    /// Keep waiting for a response.
    Wait,
    /// Every step is done.
    Complete,
    /// Stop; the update failed.
    Abort { reason: String },
}

impl Action {
    fn send(command: Command, payload: Vec<u8>) -> Self {
        Action::Send {
            frame_type: command.id(),
            payload,
        }
    }
}

/// Drives one firmware update.
#[derive(Debug)]
pub struct UpdateSequencer {
    image: FirmwareImage,
    policy: AdvancePolicy,
    state: UpdateState,
    /// Payload of the most recent DFU_PACKET; VALIDATE sends it again as-is.
    last_payload: Vec<u8>,
    /// Command awaiting a response.
    in_flight: Option<(u16, Vec<u8>)>,
    /// Re-sends of the in-flight command so far.
    retries: u32,
    chunks_sent: usize,
}

impl UpdateSequencer {
    pub fn new(image: FirmwareImage, policy: AdvancePolicy) -> Self {
        Self {
            image,
            policy,
            state: UpdateState::Idle,
            last_payload: Vec::new(),
            in_flight: None,
            retries: 0,
            chunks_sent: 0,
        }
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    pub fn policy(&self) -> AdvancePolicy {
        self.policy
    }

    pub fn image(&self) -> &FirmwareImage {
        &self.image
    }

    /// DFU_PACKETs issued so far.
    pub fn chunks_sent(&self) -> usize {
        self.chunks_sent
    }

    /// DFU_PACKETs the image needs.
    pub fn total_chunks(&self) -> usize {
        self.image.chunk_count()
    }

    /// Body bytes handed out in DFU_PACKETs so far.
    pub fn bytes_sent(&self) -> usize {
        match self.state {
            UpdateState::Idle | UpdateState::QueryVersion | UpdateState::Erase => 0,
            UpdateState::WriteChunk(offset) => self
                .image
                .chunk_at(offset)
                .map_or(offset, |c| offset + c.data.len()),
            _ => self.image.body().len(),
        }
    }

    /// Begin the update. Only valid from `Idle`.
    pub fn start(&mut self) -> Action {
        if self.state != UpdateState::Idle {
            warn!(state = %self.state, "Sequencer already started");
            return Action::Wait;
        }
        info!(
            image_size = self.image.len(),
            chunks = self.total_chunks(),
            "Starting firmware update"
        );
        self.enter(UpdateState::QueryVersion)
    }

    /// A frame arrived from the device.
    pub fn on_response(&mut self, frame: &Frame) -> Action {
        if self.state == UpdateState::Idle || self.state.is_terminal() {
            debug!(state = %self.state, frame_type = %describe_type(frame.frame_type), "Frame outside an active step");
            return self.idle_action();
        }

        if let AdvancePolicy::Correlated { abort_on_nack, .. } = self.policy {
            let expected = self.in_flight.as_ref().map(|(ty, _)| *ty);
            let correlated =
                frame.frame_type == ACK || Some(frame.frame_type) == expected;
            if !correlated {
                debug!(
                    state = %self.state,
                    frame_type = %describe_type(frame.frame_type),
                    "Ignoring uncorrelated frame"
                );
                return Action::Wait;
            }
            if abort_on_nack
                && let Some(status) = classify_ack(frame)
                && status.is_nack()
            {
                return self.abort(format!(
                    "device rejected {} with status {}",
                    self.state,
                    status.value()
                ));
            }
        }

        self.advance()
    }

    /// No frame arrived within the policy timeout.
    pub fn on_timeout(&mut self) -> Action {
        let AdvancePolicy::Correlated { max_retries, .. } = self.policy else {
            return Action::Wait;
        };
        if self.state == UpdateState::Idle || self.state.is_terminal() {
            return self.idle_action();
        }
        let Some((frame_type, payload)) = self.in_flight.clone() else {
            return Action::Wait;
        };

        if self.retries >= max_retries {
            return self.abort(format!(
                "no response to {} after {} retries",
                describe_type(frame_type),
                self.retries
            ));
        }
        self.retries += 1;
        warn!(
            state = %self.state,
            attempt = self.retries,
            max_retries,
            "Response timeout, re-sending"
        );
        Action::Send {
            frame_type,
            payload,
        }
    }

    /// Re-sends of the in-flight command.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    fn idle_action(&self) -> Action {
        match self.state {
            UpdateState::Complete => Action::Complete,
            UpdateState::Aborted => Action::Abort {
                reason: "update already aborted".to_string(),
            },
            _ => Action::Wait,
        }
    }

    fn advance(&mut self) -> Action {
        let next = match self.state {
            UpdateState::QueryVersion => UpdateState::Erase,
            UpdateState::Erase => self.first_chunk_or_validate(0),
            UpdateState::WriteChunk(offset) => {
                let len = self.image.chunk_at(offset).map_or(0, |c| c.data.len());
                self.first_chunk_or_validate(offset + len)
            }
            UpdateState::Validate => UpdateState::Start,
            UpdateState::Start => UpdateState::Complete,
            UpdateState::Idle | UpdateState::Complete | UpdateState::Aborted => {
                return self.idle_action();
            }
        };
        self.enter(next)
    }

    fn first_chunk_or_validate(&self, offset: usize) -> UpdateState {
        if self.image.chunk_at(offset).is_some() {
            UpdateState::WriteChunk(offset)
        } else {
            UpdateState::Validate
        }
    }

    fn enter(&mut self, next: UpdateState) -> Action {
        if next.phase() != self.state.phase() {
            info!(from = %self.state, to = %next, "State transition");
        }
        self.state = next;
        self.retries = 0;

        let action = match next {
            UpdateState::QueryVersion => Action::send(Command::Version, Vec::new()),
            UpdateState::Erase => Action::send(Command::Erase, Vec::new()),
            UpdateState::WriteChunk(offset) => {
                let payload = self
                    .image
                    .chunk_at(offset)
                    .map(|c| {
                        debug!(
                            offset,
                            len = c.data.len(),
                            words = c.word_count(),
                            "Writing chunk"
                        );
                        c.to_payload()
                    })
                    .unwrap_or_default();
                self.chunks_sent += 1;
                self.last_payload = payload.clone();
                Action::send(Command::DfuPacket, payload)
            }
            UpdateState::Validate => Action::send(Command::Validate, self.last_payload.clone()),
            UpdateState::Start => Action::send(Command::ModeChange, Vec::new()),
            UpdateState::Complete => {
                info!(chunks = self.chunks_sent, "Firmware update sequence complete");
                self.in_flight = None;
                return Action::Complete;
            }
            UpdateState::Idle | UpdateState::Aborted => {
                self.in_flight = None;
                return Action::Wait;
            }
        };

        if let Action::Send {
            frame_type,
            payload,
        } = &action
        {
            self.in_flight = Some((*frame_type, payload.clone()));
        }
        action
    }

    fn abort(&mut self, reason: String) -> Action {
        warn!(state = %self.state, reason = %reason, "Aborting update");
        self.state = UpdateState::Aborted;
        self.in_flight = None;
        Action::Abort { reason }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::protocol::constants::*;

    fn image(len: usize) -> FirmwareImage {
        FirmwareImage::from_bytes((0..len).map(|i| (i % 251) as u8).collect()).unwrap()
    }

    /// Run to completion, answering every send with `reply(step)`.
    fn drive(seq: &mut UpdateSequencer, reply: impl Fn(usize) -> Frame) -> Vec<(u16, Vec<u8>)> {
        let mut sent = Vec::new();
        let mut action = seq.start();
        let mut step = 0;
        loop {
            match action {
                Action::Send {
                    frame_type,
                    payload,
                } => {
                    sent.push((frame_type, payload));
                    action = seq.on_response(&reply(step));
                    step += 1;
                }
                Action::Complete => break,
                other => panic!("unexpected action {:?}", other),
            }
            assert!(step < 10_000, "sequencer did not terminate");
        }
        sent
    }

    fn types(sent: &[(u16, Vec<u8>)]) -> Vec<u16> {
        sent.iter().map(|(t, _)| *t).collect()
    }

    fn hardened(max_retries: u32) -> AdvancePolicy {
        AdvancePolicy::Correlated {
            timeout: Duration::from_millis(10),
            max_retries,
            abort_on_nack: true,
        }
    }

    #[test]
    fn test_sequence_order() {
        let mut seq = UpdateSequencer::new(image(2000), AdvancePolicy::AnyFrame);
        let sent = drive(&mut seq, |_| Frame::new(ACK, 0i32.to_le_bytes()));

        assert_eq!(
            types(&sent),
            vec![VERSION, ERASE, DFU_PACKET, DFU_PACKET, VALIDATE, MODE_CHANGE]
        );
        assert_eq!(seq.state(), UpdateState::Complete);
        assert_eq!(seq.chunks_sent(), 2);
    }

    #[test]
    fn test_chunk_payloads() {
        let img = image(2000);
        let mut seq = UpdateSequencer::new(img.clone(), AdvancePolicy::AnyFrame);
        let sent = drive(&mut seq, |_| Frame::new(DATA_FRAME, vec![]));

        let first = &sent[2].1;
        assert_eq!(&first[0..2], &0u16.to_le_bytes());
        assert_eq!(&first[2..4], &256u16.to_le_bytes());
        assert_eq!(&first[4..], &img.body()[..1024]);

        let second = &sent[3].1;
        assert_eq!(&second[0..2], &1024u16.to_le_bytes());
        assert_eq!(&second[2..4], &240u16.to_le_bytes());
        assert_eq!(&second[4..], &img.body()[1024..]);
    }

    #[test]
    fn test_validate_reuses_last_chunk_payload() {
        let mut seq = UpdateSequencer::new(image(2000), AdvancePolicy::AnyFrame);
        let sent = drive(&mut seq, |_| Frame::new(ACK, 0i32.to_le_bytes()));

        assert_eq!(sent[4].0, VALIDATE);
        assert_eq!(sent[4].1, sent[3].1);
        assert!(sent[0].1.is_empty());
        assert!(sent[1].1.is_empty());
        assert!(sent[5].1.is_empty());
    }

    #[test]
    fn test_order_independent_of_responses() {
        let responses = [
            Frame::new(ACK, (-1i32).to_le_bytes()),
            Frame::new(VERSION, b"garbage".to_vec()),
            Frame::new(0x1234, vec![]),
            Frame::new(ACK, vec![0xFF]),
            Frame::new(MODE_CHANGE, vec![1, 2, 3]),
        ];

        for len in [16, 17, 1040, 2000, 16 + 5 * 1024 + 3] {
            let mut seq = UpdateSequencer::new(image(len), AdvancePolicy::AnyFrame);
            let chunks = seq.total_chunks();
            let sent = drive(&mut seq, |i| responses[i % responses.len()].clone());

            let mut expected = vec![VERSION, ERASE];
            expected.extend(std::iter::repeat_n(DFU_PACKET, chunks));
            expected.extend([VALIDATE, MODE_CHANGE]);
            assert_eq!(types(&sent), expected, "image length {}", len);
        }
    }

    #[test]
    fn test_all_nack_still_completes() {
        let mut seq = UpdateSequencer::new(image(4000), AdvancePolicy::AnyFrame);
        let sent = drive(&mut seq, |_| Frame::new(ACK, (-5i32).to_le_bytes()));
        assert_eq!(sent.len(), 2 + 4 + 2);
        assert_eq!(seq.state(), UpdateState::Complete);
    }

    #[test]
    fn test_header_only_image_validates_empty() {
        let mut seq = UpdateSequencer::new(image(16), AdvancePolicy::AnyFrame);
        let sent = drive(&mut seq, |_| Frame::new(ACK, 0i32.to_le_bytes()));
        assert_eq!(types(&sent), vec![VERSION, ERASE, VALIDATE, MODE_CHANGE]);
        assert!(sent[2].1.is_empty());
    }

    #[test]
    fn test_any_frame_never_times_out() {
        let mut seq = UpdateSequencer::new(image(100), AdvancePolicy::AnyFrame);
        seq.start();
        for _ in 0..10 {
            assert_eq!(seq.on_timeout(), Action::Wait);
        }
        assert_eq!(seq.state(), UpdateState::QueryVersion);
    }

    #[test]
    fn test_start_twice() {
        let mut seq = UpdateSequencer::new(image(100), AdvancePolicy::AnyFrame);
        assert!(matches!(seq.start(), Action::Send { .. }));
        assert_eq!(seq.start(), Action::Wait);
    }

    #[test]
    fn test_response_before_start_ignored() {
        let mut seq = UpdateSequencer::new(image(100), AdvancePolicy::AnyFrame);
        assert_eq!(seq.on_response(&Frame::new(ACK, vec![])), Action::Wait);
        assert_eq!(seq.state(), UpdateState::Idle);
    }

    #[test]
    fn test_write_state_tracks_offset() {
        let mut seq = UpdateSequencer::new(image(2000), AdvancePolicy::AnyFrame);
        let ack = Frame::new(ACK, 0i32.to_le_bytes());
        seq.start();
        seq.on_response(&ack);
        seq.on_response(&ack);
        assert_eq!(seq.state(), UpdateState::WriteChunk(0));
        assert_eq!(seq.bytes_sent(), 1024);
        seq.on_response(&ack);
        assert_eq!(seq.state(), UpdateState::WriteChunk(1024));
        assert_eq!(seq.bytes_sent(), 1984);
    }

    #[test]
    fn test_correlated_ignores_unrelated_frames() {
        let mut seq = UpdateSequencer::new(image(100), hardened(1));
        seq.start();

        assert_eq!(seq.on_response(&Frame::new(DATA_FRAME, vec![0; 8])), Action::Wait);
        assert_eq!(seq.state(), UpdateState::QueryVersion);

        let next = seq.on_response(&Frame::new(VERSION, b"1.2".to_vec()));
        assert_eq!(
            next,
            Action::Send {
                frame_type: ERASE,
                payload: vec![]
            }
        );
    }

    #[test]
    fn test_correlated_aborts_on_nack() {
        let mut seq = UpdateSequencer::new(image(100), hardened(1));
        seq.start();
        seq.on_response(&Frame::new(ACK, 0i32.to_le_bytes()));
        assert_eq!(seq.state(), UpdateState::Erase);

        let action = seq.on_response(&Frame::new(ACK, (-2i32).to_le_bytes()));
        assert!(matches!(action, Action::Abort { .. }));
        assert_eq!(seq.state(), UpdateState::Aborted);
        assert!(matches!(
            seq.on_response(&Frame::new(ACK, 0i32.to_le_bytes())),
            Action::Abort { .. }
        ));
    }

    #[test]
    fn test_correlated_nack_tolerated_when_disabled() {
        let policy = AdvancePolicy::Correlated {
            timeout: Duration::from_millis(10),
            max_retries: 0,
            abort_on_nack: false,
        };
        let mut seq = UpdateSequencer::new(image(100), policy);
        let sent = drive(&mut seq, |_| Frame::new(ACK, (-1i32).to_le_bytes()));
        assert_eq!(sent.len(), 5);
    }

    #[test]
    fn test_correlated_retries_then_aborts() {
        let mut seq = UpdateSequencer::new(image(100), hardened(2));
        let first = seq.start();

        assert_eq!(seq.on_timeout(), first);
        assert_eq!(seq.on_timeout(), first);
        assert_eq!(seq.retries(), 2);

        let action = seq.on_timeout();
        assert!(matches!(action, Action::Abort { .. }));
        assert_eq!(seq.state(), UpdateState::Aborted);
    }

    #[test]
    fn test_retry_counter_resets_on_advance() {
        let mut seq = UpdateSequencer::new(image(100), hardened(1));
        seq.start();
        assert!(matches!(seq.on_timeout(), Action::Send { .. }));
        seq.on_response(&Frame::new(ACK, 0i32.to_le_bytes()));
        assert_eq!(seq.retries(), 0);
        assert!(matches!(seq.on_timeout(), Action::Send { .. }));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(UpdateState::WriteChunk(2048).to_string(), "WRITE_CHUNK@2048");
        assert_eq!(UpdateState::WriteChunk(0).phase(), DfuPhase::Write);
    }
}
