use uuid::Uuid;

/// GATT service exposed by the badge.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x6a3a7b52_2d6d_4a2b_8d1a_0d4d6c3a1c10);
/// Framebuffer characteristic inside [`SERVICE_UUID`], written with response.
pub const FRAMEBUFFER_UUID: Uuid = Uuid::from_u128(0xf3a7e19c_5f21_4c3c_8b64_3c2f6fd1c4ab);

/// `"FB"`
pub const FRAME_MAGIC: [u8; 2] = [0x46, 0x42];
pub const FRAME_HEADER_LEN: usize = 4;
pub const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

/// ATT MTU every link starts with.
pub const DEFAULT_MTU: u16 = 23;
/// MTU asked for right after connecting.
pub const PREFERRED_MTU: u16 = 247;
/// ATT write request overhead (opcode + handle).
pub const ATT_WRITE_OVERHEAD: u16 = 3;
pub const MIN_CHUNK: usize = 20;
pub const MAX_CHUNK: usize = 244;

/// Largest single write for a link with the given MTU.
pub fn effective_chunk_size(mtu: u16) -> usize {
    (mtu.saturating_sub(ATT_WRITE_OVERHEAD) as usize).clamp(MIN_CHUNK, MAX_CHUNK)
}

/// Frame header: magic, then the payload length (header excluded) as u16 LE.
///
/// Returns `None` when the payload does not fit the 16-bit length field.
pub fn frame_header(payload_len: usize) -> Option<[u8; FRAME_HEADER_LEN]> {
    let len = u16::try_from(payload_len).ok()?;
    let [lo, hi] = len.to_le_bytes();
    Some([FRAME_MAGIC[0], FRAME_MAGIC[1], lo, hi])
}

/// Splits data into chunks of given size. The last chunk may be shorter.
pub fn chunk_data(data: &[u8], chunk_size: usize) -> Vec<&[u8]> {
    if chunk_size == 0 {
        return vec![data];
    }
    data.chunks(chunk_size).collect()
}

/// The full write sequence for one frame: the header on its own, then the payload
/// in chunks of at most `chunk_size`.
///
/// Returns `None` if the payload is longer than a frame can announce
pub fn frame_writes(payload: &[u8], chunk_size: usize) -> Option<Vec<Vec<u8>>> {
    let header = frame_header(payload.len())?;
    let mut writes = Vec::with_capacity(1 + payload.len().div_ceil(chunk_size.max(1)));
    writes.push(header.to_vec());
    writes.extend(chunk_data(payload, chunk_size).into_iter().map(<[u8]>::to_vec));
    Some(writes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AssembleError {
    #[error("bad frame magic {0:02x?}")]
    BadMagic([u8; 2]),
    #[error("write overruns the frame by {0} bytes")]
    Overrun(usize),
}

/// Receiver side of the framing: concatenates writes in arrival order until the
/// announced payload length is reached. Mirrors what the badge firmware does.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    header: Vec<u8>,
    expected: Option<usize>,
    payload: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one write. Returns the payload once the frame is complete.
    pub fn push(&mut self, mut data: &[u8]) -> Result<Option<Vec<u8>>, AssembleError> {
        if self.expected.is_none() {
            let need = FRAME_HEADER_LEN - self.header.len();
            let take = need.min(data.len());
            self.header.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.header.len() < FRAME_HEADER_LEN {
                return Ok(None);
            }
            let magic = [self.header[0], self.header[1]];
            if magic != FRAME_MAGIC {
                self.reset();
                return Err(AssembleError::BadMagic(magic));
            }
            let len = u16::from_le_bytes([self.header[2], self.header[3]]) as usize;
            self.expected = Some(len);
            self.payload = Vec::with_capacity(len);
        }

        let expected = self.expected.unwrap_or_default();
        let room = expected - self.payload.len();
        if data.len() > room {
            let extra = data.len() - room;
            self.reset();
            return Err(AssembleError::Overrun(extra));
        }
        self.payload.extend_from_slice(data);
        if self.payload.len() < expected {
            return Ok(None);
        }
        let payload = std::mem::take(&mut self.payload);
        self.reset();
        Ok(Some(payload))
    }

    pub fn reset(&mut self) {
        self.header.clear();
        self.expected = None;
        self.payload.clear();
    }
}
