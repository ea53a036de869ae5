use std::io;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;

/// An opaque binary record pulled from an upstream page buffer: a byte blob
/// plus the number of positions it carries. The client never looks inside.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page {
    position_count: u32,
    data: Bytes,
}

impl Page {
    pub fn new(position_count: u32, data: Bytes) -> Self {
        Self {
            position_count,
            data,
        }
    }

    pub fn position_count(&self) -> u32 {
        self.position_count
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn size_in_bytes(&self) -> usize {
        self.data.len()
    }
}

/// The deserializer seam: a pure function from one response body to the
/// ordered list of pages it carries.
pub trait PageDeserializer: Send + Sync + 'static {
    fn deserialize(&self, body: Bytes) -> io::Result<Vec<Page>>;
}

/// The default wire framing for a page stream: per page a little-endian `u32`
/// position count, a little-endian `u32` payload length, then the payload
/// bytes, repeated to the end of the body.
#[derive(Clone, Copy, Debug, Default)]
pub struct FramedPageCodec;

impl FramedPageCodec {
    /// Frame pages into one body. The server-side counterpart of the codec;
    /// also used by tests to build canned responses.
    pub fn encode(pages: &[Page]) -> Bytes {
        let mut body = Vec::new();
        for page in pages {
            // Writing into a Vec cannot fail.
            body.write_u32::<LittleEndian>(page.position_count()).unwrap();
            body.write_u32::<LittleEndian>(page.size_in_bytes() as u32)
                .unwrap();
            body.extend_from_slice(page.data());
        }
        body.into()
    }
}

impl PageDeserializer for FramedPageCodec {
    fn deserialize(&self, body: Bytes) -> io::Result<Vec<Page>> {
        let mut pages = Vec::new();
        let buf = body.as_ref();
        let mut offset = 0;
        while offset < buf.len() {
            let mut header = &buf[offset..];
            let position_count = header.read_u32::<LittleEndian>()?;
            let len = header.read_u32::<LittleEndian>()? as usize;
            offset += 8;
            if buf.len() - offset < len {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("page payload truncated: expected {len} bytes"),
                ));
            }
            // Pages outlive the response body, so slice the shared buffer
            // instead of borrowing it.
            pages.push(Page::new(position_count, body.slice(offset..offset + len)));
            offset += len;
        }
        Ok(pages)
    }
}
