use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::cs;
use super::error::{SdoAbortedError, SdoCommunicationError};
use crate::node::LocalNode;

enum Session {
    Idle,
    SegmentedUpload { index: u16, subindex: u8, remaining: VecDeque<u8>, toggle: bool },
    SegmentedDownload { index: u16, subindex: u8, buffer: Vec<u8>, expected_total: Option<u32>, toggle: bool },
}

/// One request in, at most one response out. Initiating a new request
/// cancels any session already in flight for this server.
pub struct SdoServer {
    node: Arc<LocalNode>,
    node_id: u8,
    session: Mutex<Session>,
    /// Most recent abort code received *from* the client, kept around so an
    /// application can inspect why a transfer was cancelled.
    pub last_client_abort: Mutex<Option<u32>>,
    /// Most recent protocol-level failure detected on this side (toggle
    /// mismatch, unrecognised command specifier), as opposed to an abort the
    /// client itself sent. Kept around for the same introspection reason as
    /// `last_client_abort`.
    pub last_communication_error: Mutex<Option<SdoCommunicationError>>,
}

impl SdoServer {
    pub fn new(node: Arc<LocalNode>, node_id: u8) -> Self {
        SdoServer {
            node,
            node_id,
            session: Mutex::new(Session::Idle),
            last_client_abort: Mutex::new(None),
            last_communication_error: Mutex::new(None),
        }
    }

    pub fn rx_cob_id(&self) -> u16 {
        super::rx_cob_id(self.node_id)
    }

    pub fn tx_cob_id(&self) -> u16 {
        super::tx_cob_id(self.node_id)
    }

    /// Processes one incoming 8-byte request frame. Returns the response
    /// frame to send back, or `None` if the frame was an abort (the session
    /// ends silently, no reply is sent).
    pub fn handle_request(&self, request: &[u8]) -> Option<[u8; 8]> {
        if request.len() != 8 {
            return Some(abort_frame(0, 0, SdoAbortedError::COMMAND_SPECIFIER_INVALID));
        }
        let cs_byte = request[0];
        let index = u16::from_le_bytes([request[1], request[2]]);
        let subindex = request[3];

        if cs_byte == cs::ABORT {
            let code = u32::from_le_bytes(request[4..8].try_into().unwrap());
            *self.last_client_abort.lock().unwrap() = Some(code);
            *self.session.lock().unwrap() = Session::Idle;
            return None;
        }

        let mut session = self.session.lock().unwrap();

        if matches!(&*session, Session::SegmentedUpload { .. }) && (cs_byte & !cs::TOGGLE_BIT) == cs::SEGMENT_UPLOAD_REQUEST {
            return Some(self.continue_segmented_upload(&mut session, cs_byte));
        }
        if matches!(&*session, Session::SegmentedDownload { .. }) && (cs_byte & cs::SEGMENT_DOWNLOAD_MASK) == cs::SEGMENT_DOWNLOAD {
            return Some(self.continue_segmented_download(&mut session, cs_byte, &request[1..8]));
        }

        // Any other request cancels whatever session was in flight.
        *session = Session::Idle;

        if cs_byte == cs::INITIATE_UPLOAD_REQUEST {
            return Some(self.start_upload(&mut session, index, subindex));
        }
        if cs_byte & cs::INITIATE_DOWNLOAD_MASK == cs::INITIATE_DOWNLOAD {
            return Some(self.start_download(&mut session, cs_byte, index, subindex, &request[4..8]));
        }
        if cs_byte == cs::BLOCK_UPLOAD || cs_byte == cs::BLOCK_DOWNLOAD {
            *self.last_communication_error.lock().unwrap() = Some(SdoCommunicationError::UnexpectedCommandSpecifier(cs_byte));
            return Some(abort_frame(index, subindex, SdoAbortedError::COMMAND_SPECIFIER_INVALID));
        }
        *self.last_communication_error.lock().unwrap() = Some(SdoCommunicationError::UnexpectedCommandSpecifier(cs_byte));
        Some(abort_frame(index, subindex, SdoAbortedError::COMMAND_SPECIFIER_INVALID))
    }

    fn start_upload(&self, session: &mut Session, index: u16, subindex: u8) -> [u8; 8] {
        let bytes = match self.node.get_data(index, subindex) {
            Ok(bytes) => bytes,
            Err(err) => return abort_frame(index, subindex, err),
        };

        if bytes.len() <= 4 {
            let n = 4 - bytes.len();
            let mut response = [0u8; 8];
            response[0] = 0x43 | ((n as u8) << 2);
            response[1..3].copy_from_slice(&index.to_le_bytes());
            response[3] = subindex;
            response[4..4 + bytes.len()].copy_from_slice(&bytes);
            response
        } else {
            let total = bytes.len() as u32;
            *session = Session::SegmentedUpload { index, subindex, remaining: bytes.into(), toggle: false };
            let mut response = [0u8; 8];
            response[0] = cs::INITIATE_UPLOAD_SEGMENTED_RESPONSE;
            response[1..3].copy_from_slice(&index.to_le_bytes());
            response[3] = subindex;
            response[4..8].copy_from_slice(&total.to_le_bytes());
            response
        }
    }

    fn continue_segmented_upload(&self, session: &mut Session, request_cs: u8) -> [u8; 8] {
        let (index, subindex, mut remaining, toggle) = match std::mem::replace(session, Session::Idle) {
            Session::SegmentedUpload { index, subindex, remaining, toggle } => (index, subindex, remaining, toggle),
            _ => unreachable!("guarded by caller"),
        };

        let request_toggle = request_cs & cs::TOGGLE_BIT != 0;
        if request_toggle != toggle {
            *self.last_communication_error.lock().unwrap() = Some(SdoCommunicationError::ToggleMismatch);
            return abort_frame(index, subindex, SdoAbortedError::TOGGLE_BIT_NOT_ALTERNATED);
        }

        let n = remaining.len().min(7);
        let mut payload = [0u8; 7];
        for slot in payload.iter_mut().take(n) {
            *slot = remaining.pop_front().expect("n <= remaining.len()");
        }
        let last = remaining.is_empty();

        let mut response = [0u8; 8];
        response[0] = (toggle as u8 * cs::TOGGLE_BIT) | (((7 - n) as u8) << 1) | (last as u8);
        response[1..8].copy_from_slice(&payload);

        if !last {
            *session = Session::SegmentedUpload { index, subindex, remaining, toggle: !toggle };
        }
        response
    }

    fn start_download(&self, session: &mut Session, request_cs: u8, index: u16, subindex: u8, payload: &[u8]) -> [u8; 8] {
        let expedited = request_cs & cs::EXPEDITED_BIT != 0;
        let size_indicated = request_cs & cs::SIZE_INDICATED_BIT != 0;
        let unused_bytes = ((request_cs >> 2) & 0x3) as usize;

        if expedited {
            let size = if size_indicated { 4 - unused_bytes } else { 4 };
            let data = payload[..size].to_vec();
            return match self.node.set_data(index, subindex, data, true) {
                Ok(()) => initiate_download_response(index, subindex),
                Err(err) => abort_frame(index, subindex, err),
            };
        }

        let expected_total = size_indicated.then(|| u32::from_le_bytes(payload.try_into().unwrap()));
        *session = Session::SegmentedDownload {
            index,
            subindex,
            buffer: Vec::with_capacity(expected_total.unwrap_or(0) as usize),
            expected_total,
            toggle: false,
        };
        initiate_download_response(index, subindex)
    }

    fn continue_segmented_download(&self, session: &mut Session, request_cs: u8, payload: &[u8]) -> [u8; 8] {
        let (index, subindex, mut buffer, expected_total, toggle) = match std::mem::replace(session, Session::Idle) {
            Session::SegmentedDownload { index, subindex, buffer, expected_total, toggle } => (index, subindex, buffer, expected_total, toggle),
            _ => unreachable!("guarded by caller"),
        };

        let request_toggle = request_cs & cs::TOGGLE_BIT != 0;
        if request_toggle != toggle {
            *self.last_communication_error.lock().unwrap() = Some(SdoCommunicationError::ToggleMismatch);
            return abort_frame(index, subindex, SdoAbortedError::TOGGLE_BIT_NOT_ALTERNATED);
        }

        let last = request_cs & 0x01 != 0;
        let unused = ((request_cs >> 1) & 0x7) as usize;
        let used = 7 - unused;
        buffer.extend_from_slice(&payload[..used]);

        if last {
            match self.node.set_data(index, subindex, buffer, true) {
                Ok(()) => segment_download_response(toggle),
                Err(err) => abort_frame(index, subindex, err),
            }
        } else {
            let response = segment_download_response(toggle);
            *session = Session::SegmentedDownload { index, subindex, buffer, expected_total, toggle: !toggle };
            response
        }
    }
}

fn abort_frame(index: u16, subindex: u8, error: SdoAbortedError) -> [u8; 8] {
    let mut frame = [0u8; 8];
    frame[0] = cs::ABORT;
    frame[1..3].copy_from_slice(&index.to_le_bytes());
    frame[3] = subindex;
    frame[4..8].copy_from_slice(&error.code().to_le_bytes());
    frame
}

fn initiate_download_response(index: u16, subindex: u8) -> [u8; 8] {
    let mut frame = [0u8; 8];
    frame[0] = cs::INITIATE_DOWNLOAD_RESPONSE;
    frame[1..3].copy_from_slice(&index.to_le_bytes());
    frame[3] = subindex;
    frame
}

fn segment_download_response(toggle: bool) -> [u8; 8] {
    let mut frame = [0u8; 8];
    frame[0] = 0x20 | (toggle as u8 * cs::TOGGLE_BIT);
    frame
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dictionary::{AccessType, DataType, ObjectDictionary, OdValue, Variable};
    use crate::node::NodeConfig;

    fn node_with(var: Variable) -> Arc<LocalNode> {
        let od = ObjectDictionary::builder().variable(var).unwrap().build().unwrap();
        Arc::new(LocalNode::new(NodeConfig::new(2), od))
    }

    #[test]
    fn expedited_upload_returns_stored_value() {
        let node = node_with(
            Variable::new(0x2004, "x", DataType::Unsigned16, AccessType::READ_WRITE).with_default(OdValue::U16(0)),
        );
        node.write_typed(0x2004, 0, &OdValue::U16(0xFEFF), true).unwrap();
        let server = SdoServer::new(node, 2);
        let request = [0x40, 0x04, 0x20, 0, 0, 0, 0, 0];
        let response = server.handle_request(&request).unwrap();
        assert_eq!(response[0], 0x4B);
        assert_eq!(u16::from_le_bytes([response[4], response[5]]), 0xFEFF);
    }

    #[test]
    fn upload_of_missing_index_aborts_with_0x06020000() {
        let node = node_with(Variable::new(0x2004, "x", DataType::Unsigned16, AccessType::READ_WRITE));
        let server = SdoServer::new(node, 2);
        let request = [0x40, 0x34, 0x12, 0, 0, 0, 0, 0];
        let response = server.handle_request(&request).unwrap();
        assert_eq!(response[0], cs::ABORT);
        assert_eq!(u32::from_le_bytes(response[4..8].try_into().unwrap()), 0x0602_0000);
    }

    #[test]
    fn upload_of_missing_subindex_aborts_with_0x06090011() {
        let node = node_with(Variable::new(0x1018, "identity", DataType::Unsigned8, AccessType::READ_WRITE));
        let server = SdoServer::new(node, 2);
        let request = [0x40, 0x18, 0x10, 100, 0, 0, 0, 0];
        let response = server.handle_request(&request).unwrap();
        assert_eq!(u32::from_le_bytes(response[4..8].try_into().unwrap()), 0x0609_0011);
    }

    #[test]
    fn segmented_round_trip() {
        let node = node_with(
            Variable::new(0x1008, "device name", DataType::VisibleString, AccessType::READ_WRITE)
                .with_bit_length(16 * 8),
        );
        let server = SdoServer::new(node, 2);

        // Initiate segmented download, size = 16.
        let mut request = [0x21, 0x08, 0x10, 0, 16, 0, 0, 0];
        let response = server.handle_request(&request).unwrap();
        assert_eq!(response[0], cs::INITIATE_DOWNLOAD_RESPONSE);

        let text: &[u8] = b"Some cool device";
        let chunks: Vec<&[u8]> = text.chunks(7).collect();
        let mut toggle = false;
        for (i, chunk) in chunks.iter().enumerate() {
            let last = i == chunks.len() - 1;
            let unused = 7 - chunk.len();
            let mut segment = [0u8; 8];
            segment[0] = (toggle as u8 * cs::TOGGLE_BIT) | ((unused as u8) << 1) | (last as u8);
            segment[1..1 + chunk.len()].copy_from_slice(chunk);
            let response = server.handle_request(&segment).unwrap();
            assert_eq!(response[0] & cs::TOGGLE_BIT, toggle as u8 * cs::TOGGLE_BIT);
            toggle = !toggle;
        }

        // Now upload it back.
        let upload_request = [0x40, 0x08, 0x10, 0, 0, 0, 0, 0];
        let response = server.handle_request(&upload_request).unwrap();
        assert_eq!(response[0], cs::INITIATE_UPLOAD_SEGMENTED_RESPONSE);
        assert_eq!(u32::from_le_bytes(response[4..8].try_into().unwrap()), 16);

        let mut collected = Vec::new();
        let mut toggle = false;
        loop {
            let request = [cs::SEGMENT_UPLOAD_REQUEST | (toggle as u8 * cs::TOGGLE_BIT), 0, 0, 0, 0, 0, 0, 0];
            let response = server.handle_request(&request).unwrap();
            let n = 7 - (((response[0] >> 1) & 0x7) as usize);
            collected.extend_from_slice(&response[1..1 + n]);
            let last = response[0] & 0x01 != 0;
            toggle = !toggle;
            if last {
                break;
            }
        }
        assert_eq!(&collected, text);
    }

    #[test]
    fn block_upload_is_rejected() {
        let node = node_with(Variable::new(0x2004, "x", DataType::Unsigned16, AccessType::READ_WRITE));
        let server = SdoServer::new(node, 2);
        let request = [cs::BLOCK_UPLOAD, 0x04, 0x20, 0, 0, 0, 0, 0];
        let response = server.handle_request(&request).unwrap();
        assert_eq!(response[0], cs::ABORT);
        assert_eq!(u32::from_le_bytes(response[4..8].try_into().unwrap()), 0x0504_0001);
    }

    #[test]
    fn abort_from_client_ends_session_silently() {
        let node = node_with(
            Variable::new(0x1008, "device name", DataType::VisibleString, AccessType::READ_WRITE)
                .with_bit_length(16 * 8),
        );
        let server = SdoServer::new(node, 2);
        let _ = server.handle_request(&[0x40, 0x08, 0x10, 0, 0, 0, 0, 0]);
        let abort = [cs::ABORT, 0x08, 0x10, 0, 0x01, 0x00, 0x04, 0x08];
        assert!(server.handle_request(&abort).is_none());
        assert_eq!(*server.last_client_abort.lock().unwrap(), Some(0x0804_0001));
    }

    #[test]
    fn toggle_mismatch_is_surfaced_on_last_communication_error() {
        let node = node_with(
            Variable::new(0x1008, "device name", DataType::VisibleString, AccessType::READ_WRITE)
                .with_bit_length(16 * 8),
        );
        let server = SdoServer::new(node, 2);
        let _ = server.handle_request(&[0x21, 0x08, 0x10, 0, 16, 0, 0, 0]);

        // Wrong toggle bit on the first segment (should be 0, sent as 1).
        let bad_segment = [cs::TOGGLE_BIT, b'S', b'o', b'm', b'e', b' ', b'c', b'o'];
        let response = server.handle_request(&bad_segment).unwrap();
        assert_eq!(response[0], cs::ABORT);
        assert!(matches!(
            *server.last_communication_error.lock().unwrap(),
            Some(SdoCommunicationError::ToggleMismatch)
        ));
    }
}
