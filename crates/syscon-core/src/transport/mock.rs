//! Mock serial transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::traits::{SerialTransport, TransportError};
use crate::protocol::{Frame, FrameDecoder, SyncMarker, encode_with_sync};

/// Reply hook: sees every write, returns bytes to queue for reading.
pub type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

/// Mock transport for unit testing session and sequencer logic.
///
/// Clones share the same queues, so a test can keep a handle after moving
/// the transport into a session.
#[derive(Clone)]
pub struct MockTransport {
    /// Queued byte deliveries to return on read.
    rx_queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// Captured writes.
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Emulated device reply logic.
    responder: Arc<Mutex<Option<Responder>>>,
    /// Whether device is "connected".
    connected: Arc<Mutex<bool>>,
    path: String,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            rx_queue: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            responder: Arc::new(Mutex::new(None)),
            connected: Arc::new(Mutex::new(true)),
            path: "mock".to_string(),
        }
    }

    /// Queue raw bytes to be returned by one read.
    pub fn queue_bytes(&self, bytes: &[u8]) {
        self.rx_queue.lock().unwrap().push_back(bytes.to_vec());
    }

    /// Queue a well-formed device -> host frame.
    pub fn queue_frame(&self, frame_type: u16, payload: &[u8]) {
        self.queue_bytes(&encode_with_sync(
            SyncMarker::DeviceToHost,
            frame_type,
            payload,
        ));
    }

    /// Install a reply hook called on every write.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        *self.responder.lock().unwrap() = Some(Box::new(responder));
    }

    /// Reply to every write with the same frame.
    pub fn auto_reply(&self, frame_type: u16, payload: &[u8]) {
        let reply = encode_with_sync(SyncMarker::DeviceToHost, frame_type, payload);
        self.set_responder(move |_| Some(reply.clone()));
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    /// Decode every captured write as host -> device frames.
    pub fn written_frames(&self) -> Vec<Frame> {
        let mut decoder = FrameDecoder::with_sync(SyncMarker::HostToDevice);
        self.get_writes()
            .iter()
            .flat_map(|w| decoder.feed(w))
            .collect()
    }

    /// Pending reads.
    pub fn pending_reads(&self) -> usize {
        self.rx_queue.lock().unwrap().len()
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }

    /// Simulate device reconnect.
    pub fn reconnect(&self) {
        *self.connected.lock().unwrap() = true;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialTransport for MockTransport {
    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        self.write_log.lock().unwrap().push(data.to_vec());

        if let Some(responder) = self.responder.lock().unwrap().as_mut()
            && let Some(reply) = responder(data)
        {
            self.rx_queue.lock().unwrap().push_back(reply);
        }
        Ok(data.len())
    }

    fn read(&self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        let mut queue = self.rx_queue.lock().unwrap();
        let mut bytes = queue
            .pop_front()
            .ok_or(TransportError::Timeout { timeout_ms: 0 })?;
        if bytes.len() > max_len {
            let rest = bytes.split_off(max_len);
            queue.push_front(rest);
        }
        Ok(bytes)
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap()
    }

    fn device_path(&self) -> &str {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::*;

    #[test]
    fn test_mock_read_queue() {
        let mock = MockTransport::new();
        mock.queue_bytes(b"abc");
        mock.queue_bytes(b"de");

        assert_eq!(mock.read(512).unwrap(), b"abc");
        assert_eq!(mock.read(512).unwrap(), b"de");

        // Queue is empty now
        assert!(mock.read(512).unwrap_err().is_timeout());
    }

    #[test]
    fn test_mock_read_respects_max_len() {
        let mock = MockTransport::new();
        mock.queue_bytes(b"abcdef");

        assert_eq!(mock.read(4).unwrap(), b"abcd");
        assert_eq!(mock.read(4).unwrap(), b"ef");
    }

    #[test]
    fn test_mock_write_capture() {
        let mock = MockTransport::new();
        mock.write(b"Hello").unwrap();
        mock.write(b"World").unwrap();

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], b"Hello");
        assert_eq!(writes[1], b"World");
    }

    #[test]
    fn test_mock_auto_reply() {
        let mock = MockTransport::new();
        mock.auto_reply(ACK, &0i32.to_le_bytes());

        mock.write(&crate::protocol::encode(VERSION, &[])).unwrap();
        assert_eq!(mock.pending_reads(), 1);

        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(&mock.read(512).unwrap());
        assert_eq!(frames, vec![Frame::new(ACK, 0i32.to_le_bytes())]);
        assert_eq!(mock.written_frames(), vec![Frame::new(VERSION, vec![])]);
    }

    #[test]
    fn test_mock_disconnect() {
        let mock = MockTransport::new();
        assert!(mock.is_connected());

        mock.disconnect();
        assert!(!mock.is_connected());
        assert!(mock.write(b"test").is_err());

        mock.reconnect();
        assert!(mock.write(b"test").is_ok());
    }
}
