// Length-delimited message framing over TCP.
//
// Wire format: a 4-byte big-endian length prefix followed by a JSON payload.
// `write_message` and `read_message` move raw bytes only; JSON encoding is
// done by the caller (see `message.rs`), so this module stays format-agnostic.
//
// Control events are a few dozen bytes each. `MAX_MESSAGE_SIZE` bounds the
// allocation a bogus length prefix can trigger.

use std::io::{self, Read, Write};

/// Maximum allowed message size (64 KiB).
pub const MAX_MESSAGE_SIZE: u32 = 64 * 1024;

const HEADER_LEN: usize = 4;

/// Write one frame and flush it.
///
/// Header and payload are assembled first and handed to the writer in a
/// single `write_all`, so a writer that times out mid-frame never sees a
/// bare length prefix queued on its own.
pub fn write_message<W: Write>(writer: &mut W, msg: &[u8]) -> io::Result<()> {
    let len = u32::try_from(msg.len())
        .ok()
        .filter(|len| *len <= MAX_MESSAGE_SIZE)
        .ok_or_else(|| oversized(io::ErrorKind::InvalidInput, msg.len()))?;
    let mut frame = Vec::with_capacity(HEADER_LEN + msg.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(msg);
    writer.write_all(&frame)?;
    writer.flush()
}

/// Read one frame's payload.
///
/// `UnexpectedEof` if the stream ends inside a frame, `InvalidData` if the
/// header announces more than `MAX_MESSAGE_SIZE`.
pub fn read_message<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header)?;
    let len = u32::from_be_bytes(header);
    if len > MAX_MESSAGE_SIZE {
        return Err(oversized(io::ErrorKind::InvalidData, len as usize));
    }
    let mut payload = Vec::with_capacity(len as usize);
    reader.by_ref().take(u64::from(len)).read_to_end(&mut payload)?;
    if payload.len() < len as usize {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("frame cut short: {} of {len} bytes", payload.len()),
        ));
    }
    Ok(payload)
}

fn oversized(kind: io::ErrorKind, len: usize) -> io::Error {
    io::Error::new(
        kind,
        format!("frame of {len} bytes exceeds the {MAX_MESSAGE_SIZE} byte limit"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frames_survive_back_to_back_writes() {
        let messages: Vec<&[u8]> = vec![b"\"stopAll\"", b"", b"{\"playSound\":{}}"];
        let mut buf = Vec::new();
        for msg in &messages {
            write_message(&mut buf, msg).unwrap();
        }

        let mut cursor = Cursor::new(&buf);
        for expected in &messages {
            assert_eq!(read_message(&mut cursor).unwrap(), *expected);
        }
    }

    #[test]
    fn length_prefix_is_big_endian() {
        let mut buf = Vec::new();
        write_message(&mut buf, b"abc").unwrap();
        assert_eq!(&buf[..4], &[0, 0, 0, 3]);
    }

    /// Records the size of every `write` call it receives.
    #[derive(Default)]
    struct ChunkLog(Vec<usize>);

    impl Write for ChunkLog {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.push(buf.len());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn header_and_payload_leave_in_one_write() {
        let mut log = ChunkLog::default();
        write_message(&mut log, b"\"stopAllTriggered\"").unwrap();
        assert_eq!(log.0, vec![HEADER_LEN + 18]);
    }

    #[test]
    fn rejects_oversized_write() {
        let big = vec![0u8; MAX_MESSAGE_SIZE as usize + 1];
        let err = write_message(&mut Vec::new(), &big).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn rejects_oversized_read() {
        let fake_len = (MAX_MESSAGE_SIZE + 1).to_be_bytes();
        let mut cursor = Cursor::new(fake_len.to_vec());
        let err = read_message(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_payload_is_eof() {
        let mut buf = Vec::new();
        write_message(&mut buf, b"hello").unwrap();
        buf.truncate(6);
        let err = read_message(&mut Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
