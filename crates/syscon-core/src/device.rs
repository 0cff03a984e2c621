//! Device session: the frame codec bound to one transport.
//!
//! One `DeviceSession` exists per connection. It owns the receive buffer,
//! turns commands into frames on the way out, and on the way in hands every
//! decoded frame to the registered callbacks in arrival order. ACK frames are
//! classified for logging only; nothing here waits for or interprets replies.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::events::{DfuEvent, DfuObserver, PacketDirection};
use crate::protocol::{
    ACK, AckStatus, Command, DecoderStats, Frame, FrameDecoder, describe_type, encode,
};
use crate::transport::{SerialTransport, TransportError};

/// Default bytes requested per transport read.
pub const DEFAULT_READ_SIZE: usize = 256;

/// Handler invoked once per decoded frame.
pub type FrameCallback = Box<dyn FnMut(&Frame) + Send>;

/// Classify an ACK frame. `None` for other frame types and for ACK payloads
/// too short to carry a status.
pub fn classify_ack(frame: &Frame) -> Option<AckStatus> {
    if frame.frame_type != ACK {
        return None;
    }
    AckStatus::from_payload(&frame.payload)
}

pub struct DeviceSession<T: SerialTransport, O: DfuObserver> {
    transport: T,
    observer: Arc<O>,
    decoder: FrameDecoder,
    callbacks: Vec<FrameCallback>,
    read_size: usize,
}

impl<T: SerialTransport, O: DfuObserver> DeviceSession<T, O> {
    pub fn new(transport: T, observer: Arc<O>) -> Self {
        Self {
            transport,
            observer,
            decoder: FrameDecoder::new(),
            callbacks: Vec::new(),
            read_size: DEFAULT_READ_SIZE,
        }
    }

    /// Bytes requested per `poll`.
    pub fn with_read_size(mut self, read_size: usize) -> Self {
        self.read_size = read_size.max(1);
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn decoder_stats(&self) -> DecoderStats {
        self.decoder.stats()
    }

    /// Encode and write one frame. Does not wait for a reply.
    pub fn send(&self, frame_type: u16, payload: &[u8]) -> Result<(), TransportError> {
        let bytes = encode(frame_type, payload);
        self.transport.write(&bytes)?;

        trace!(frame_type = %describe_type(frame_type), len = payload.len(), "Frame sent");
        self.observer.on_event(&DfuEvent::Packet {
            direction: PacketDirection::Tx,
            frame_type,
            length: payload.len(),
        });
        Ok(())
    }

    pub fn send_command(&self, command: Command, payload: &[u8]) -> Result<(), TransportError> {
        self.send(command.id(), payload)
    }

    /// Register a handler for every decoded frame.
    pub fn on_frame<F>(&mut self, callback: F)
    where
        F: FnMut(&Frame) + Send + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    /// Feed bytes delivered by the transport and dispatch the frames found.
    pub fn receive(&mut self, bytes: &[u8]) -> Vec<Frame> {
        let before = self.decoder.stats();
        let frames = self.decoder.feed(bytes);
        let after = self.decoder.stats();

        let bytes_discarded = after.bytes_discarded - before.bytes_discarded;
        let crc_failures = after.crc_failures - before.crc_failures;
        if bytes_discarded > 0 || crc_failures > 0 {
            self.observer.on_event(&DfuEvent::StreamResync {
                bytes_discarded,
                crc_failures,
            });
        }

        for frame in &frames {
            self.observer.on_event(&DfuEvent::Packet {
                direction: PacketDirection::Rx,
                frame_type: frame.frame_type,
                length: frame.payload.len(),
            });
            self.observe_ack(frame);
            for callback in self.callbacks.iter_mut() {
                callback(frame);
            }
        }

        frames
    }

    /// Read once from the transport and dispatch whatever decodes.
    ///
    /// `TransportError::Timeout` means nothing arrived; any other error is fatal.
    pub fn poll(&mut self) -> Result<Vec<Frame>, TransportError> {
        let bytes = self.transport.read(self.read_size)?;
        debug!(len = bytes.len(), "Bytes received");
        Ok(self.receive(&bytes))
    }

    fn observe_ack(&self, frame: &Frame) {
        if frame.frame_type != ACK {
            return;
        }
        match classify_ack(frame) {
            Some(status) => {
                if status.is_nack() {
                    warn!(value = status.value(), "Device replied NACK");
                } else {
                    debug!(value = status.value(), "Device replied ACK");
                }
                self.observer.on_event(&DfuEvent::AckReceived { status });
            }
            None => {
                warn!(len = frame.payload.len(), "ACK frame without a status");
                self.observer.on_event(&DfuEvent::MalformedAck {
                    length: frame.payload.len(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::protocol::{SyncMarker, constants::*, encode_with_sync};
    use crate::transport::MockTransport;

    /// Observer that records events for assertions.
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<DfuEvent>>,
    }

    impl DfuObserver for Recorder {
        fn on_event(&self, event: &DfuEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    impl Recorder {
        fn acks(&self) -> Vec<AckStatus> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    DfuEvent::AckReceived { status } => Some(*status),
                    _ => None,
                })
                .collect()
        }
    }

    fn session() -> (DeviceSession<MockTransport, Recorder>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        (
            DeviceSession::new(MockTransport::new(), recorder.clone()),
            recorder,
        )
    }

    #[test]
    fn test_send_writes_encoded_frame() {
        let (session, _) = session();
        session.send_command(Command::Erase, &[]).unwrap();

        let writes = session.transport().get_writes();
        assert_eq!(writes, vec![encode(ERASE, &[])]);
    }

    #[test]
    fn test_callbacks_in_order() {
        let (mut session, _) = session();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        session.on_frame(move |f| sink.lock().unwrap().push(f.frame_type));

        let mut stream = encode_with_sync(SyncMarker::DeviceToHost, VERSION, b"1.0");
        stream.extend(encode_with_sync(SyncMarker::DeviceToHost, DATA_FRAME, &[]));
        let frames = session.receive(&stream);

        assert_eq!(frames.len(), 2);
        assert_eq!(*seen.lock().unwrap(), vec![VERSION, DATA_FRAME]);
    }

    #[test]
    fn test_ack_and_nack_classified() {
        let (mut session, recorder) = session();
        let mut stream = encode_with_sync(SyncMarker::DeviceToHost, ACK, &5i32.to_le_bytes());
        stream.extend(encode_with_sync(
            SyncMarker::DeviceToHost,
            ACK,
            &(-9i32).to_le_bytes(),
        ));
        session.receive(&stream);

        assert_eq!(recorder.acks(), vec![AckStatus::Ack(5), AckStatus::Nack(-9)]);
    }

    #[test]
    fn test_short_ack_reported() {
        let (mut session, recorder) = session();
        session.receive(&encode_with_sync(SyncMarker::DeviceToHost, ACK, &[0x01]));

        let events = recorder.events.lock().unwrap();
        assert!(
            events
                .iter()
                .any(|e| matches!(e, DfuEvent::MalformedAck { length: 1 }))
        );
    }

    #[test]
    fn test_resync_event() {
        let (mut session, recorder) = session();
        let mut stream = vec![0x01, 0x02, 0x03];
        stream.extend(encode_with_sync(SyncMarker::DeviceToHost, VERSION, &[]));
        session.receive(&stream);

        let events = recorder.events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            DfuEvent::StreamResync {
                bytes_discarded: 3,
                crc_failures: 0
            }
        )));
    }

    #[test]
    fn test_poll_reads_transport() {
        let (mut session, _) = session();
        session.transport().queue_frame(ACK, &0i32.to_le_bytes());

        let frames = session.poll().unwrap();
        assert_eq!(frames, vec![Frame::new(ACK, 0i32.to_le_bytes())]);
        assert!(session.poll().unwrap_err().is_timeout());
    }

    #[test]
    fn test_classify_ignores_other_types() {
        let frame = Frame::new(VERSION, (-1i32).to_le_bytes());
        assert_eq!(classify_ack(&frame), None);
    }
}
