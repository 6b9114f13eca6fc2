//! Length-prefixed framing for TCP messages.
//!
//! Wire format: `[u32 length (big-endian)][JSON payload]`

use std::io::{self, Read, Write};

use serde::{de::DeserializeOwned, Serialize};

/// Reject frames larger than 16MB; a full controller sync for a thirty-seat
/// show is a few hundred kilobytes at most.
const MAX_FRAME_BYTES: usize = 16_000_000;

/// Serialise a message into a length-prefixed frame buffer.
pub fn frame_bytes<T: Serialize>(msg: &T) -> io::Result<Vec<u8>> {
    let payload =
        serde_json::to_vec(msg).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut frame = Vec::with_capacity(payload.len() + 4);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Write a length-prefixed JSON message to a stream.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> io::Result<()> {
    let frame = frame_bytes(msg)?;
    writer.write_all(&frame)?;
    writer.flush()
}

/// Read a length-prefixed JSON message from a stream.
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> io::Result<T> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {} bytes", len),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;

    serde_json::from_slice(&payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn roundtrip_string() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &"hello stage".to_string()).unwrap();

        let mut cursor = Cursor::new(buf);
        let result: String = read_frame(&mut cursor).unwrap();
        assert_eq!(result, "hello stage");
    }

    #[test]
    fn roundtrip_struct() {
        #[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
        struct TestMsg {
            version: u64,
            name: String,
        }

        let msg = TestMsg {
            version: 9,
            name: "sync".to_string(),
        };

        let mut buf = Vec::new();
        write_frame(&mut buf, &msg).unwrap();

        let mut cursor = Cursor::new(buf);
        let result: TestMsg = read_frame(&mut cursor).unwrap();
        assert_eq!(result, msg);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_BYTES as u32 + 1).to_be_bytes());
        let mut cursor = Cursor::new(buf);
        let result: io::Result<String> = read_frame(&mut cursor);
        assert!(result.is_err());
    }
}
