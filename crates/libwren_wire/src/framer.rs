//! Frame reassembly: TCP gives us arbitrary chunks, IRC gives us CR/LF-terminated lines.

use crate::{parse_one_message, Msg, ParseError};

use log::warn;

/// Maximum accepted frame length, including any tag section. RFC 1459 limits messages to 512
/// bytes but the message-tags extension allows a 4096-byte tag section on top; we accept 8 KiB to
/// leave room for non-conforming servers.
pub const MAX_FRAME_LEN: usize = 8192;

/// Reassembles CR/LF-delimited frames from arbitrary byte chunks. An unterminated trailing
/// segment is carried until the next chunk arrives. Cleared wholesale on disconnect.
#[derive(Debug, Default)]
pub struct MsgBuffer {
    buf: Vec<u8>,
    /// Set when an over-long unterminated segment was discarded; the remainder of that frame is
    /// dropped when its terminator finally shows up.
    skipping: bool,
}

impl MsgBuffer {
    pub fn new() -> MsgBuffer {
        MsgBuffer::default()
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Clears any buffered bytes, including the unterminated tail. Used on disconnect: an
    /// in-flight parse is abandoned at a frame boundary.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.skipping = false;
    }

    /// Pops the next complete frame off the buffer and parses it. CR and LF both terminate a
    /// frame; empty frames (e.g. the middle of a "\r\n" pair) are discarded. Returns `None` when
    /// no complete frame remains.
    pub fn next_msg(&mut self) -> Option<Result<Msg, ParseError>> {
        self.next_line()
            .map(|line| line.and_then(|line| parse_one_message(&line)))
    }

    /// Like [`next_msg`](MsgBuffer::next_msg) but yields the raw frame text, for callers that
    /// run modifiers over the line before parsing it.
    pub fn next_line(&mut self) -> Option<Result<String, ParseError>> {
        loop {
            let eol = self.buf.iter().position(|b| *b == b'\r' || *b == b'\n');
            match eol {
                None => {
                    if self.buf.len() > MAX_FRAME_LEN {
                        warn!(
                            "discarding unterminated segment of {} bytes",
                            self.buf.len()
                        );
                        self.buf.clear();
                        self.skipping = true;
                    }
                    return None;
                }
                Some(0) => {
                    self.buf.drain(0..1);
                    self.skipping = false;
                    continue;
                }
                Some(idx) => {
                    let line = String::from_utf8_lossy(&self.buf[0..idx]).into_owned();
                    let too_long = idx > MAX_FRAME_LEN || self.skipping;
                    let len = idx;
                    self.buf.drain(0..idx + 1);
                    self.skipping = false;
                    if too_long {
                        return Some(Err(ParseError::TooLong { len }));
                    }
                    return Some(Ok(line));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Cmd, MsgTarget, Pfx};

    fn drain(buf: &mut MsgBuffer) -> Vec<String> {
        let mut lines = vec![];
        while let Some(msg) = buf.next_msg() {
            match msg.unwrap().cmd {
                Cmd::PING { server } => lines.push(server),
                Cmd::PRIVMSG { msg, .. } => lines.push(msg),
                cmd => panic!("unexpected cmd: {:?}", cmd),
            }
        }
        lines
    }

    #[test]
    fn frame_restart_across_chunks() {
        let mut buf = MsgBuffer::new();
        buf.push_bytes(b":a!u@h PRIVMSG #c :hel");
        assert!(buf.next_msg().is_none());
        buf.push_bytes(b"lo\r\n:b PING x\r\n");

        let msg = buf.next_msg().unwrap().unwrap();
        assert_eq!(
            msg.pfx,
            Some(Pfx::User {
                nick: "a".to_owned(),
                user: "u@h".to_owned()
            })
        );
        assert_eq!(
            msg.cmd,
            Cmd::PRIVMSG {
                target: MsgTarget::Chan(libwren_common::ChanNameRef::new("#c").to_owned()),
                msg: "hello".to_owned(),
                is_notice: false,
                ctcp: None,
            }
        );

        let msg = buf.next_msg().unwrap().unwrap();
        assert_eq!(msg.cmd, Cmd::PING { server: "x".to_owned() });
        assert!(buf.next_msg().is_none());
    }

    #[test]
    fn arbitrary_chunking_equals_full_split() {
        let stream = b"PING a\rPING b\nPING c\r\nPING d\n\r\nPING e\r\n";
        for chunk_size in 1..stream.len() {
            let mut buf = MsgBuffer::new();
            let mut got = vec![];
            for chunk in stream.chunks(chunk_size) {
                buf.push_bytes(chunk);
                got.extend(drain(&mut buf));
            }
            assert_eq!(got, vec!["a", "b", "c", "d", "e"], "chunk_size={}", chunk_size);
        }
    }

    #[test]
    fn lone_cr_then_lf_does_not_merge() {
        let mut buf = MsgBuffer::new();
        buf.push_bytes(b"PING a\r");
        assert_eq!(drain(&mut buf), vec!["a"]);
        buf.push_bytes(b"\nPING b\r\n");
        assert_eq!(drain(&mut buf), vec!["b"]);
    }

    #[test]
    fn clear_drops_unterminated_tail() {
        let mut buf = MsgBuffer::new();
        buf.push_bytes(b"PING partial");
        buf.clear();
        buf.push_bytes(b"PING x\r\n");
        assert_eq!(drain(&mut buf), vec!["x"]);
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut buf = MsgBuffer::new();
        let mut frame = b"PRIVMSG #c :".to_vec();
        frame.resize(MAX_FRAME_LEN + 10, b'x');
        frame.extend_from_slice(b"\r\nPING ok\r\n");
        buf.push_bytes(&frame);
        assert!(matches!(
            buf.next_msg(),
            Some(Err(ParseError::TooLong { .. }))
        ));
        assert_eq!(drain(&mut buf), vec!["ok"]);
    }

    #[test]
    fn exactly_512_byte_frame_accepted() {
        // 512 bytes including the CRLF
        let mut frame = b"PRIVMSG #c :".to_vec();
        frame.resize(510, b'y');
        frame.extend_from_slice(b"\r\n");
        assert_eq!(frame.len(), 512);

        let mut buf = MsgBuffer::new();
        buf.push_bytes(&frame);
        let msg = buf.next_msg().unwrap().unwrap();
        match msg.cmd {
            Cmd::PRIVMSG { msg, .. } => assert_eq!(msg.len(), 498),
            cmd => panic!("unexpected cmd: {:?}", cmd),
        }
    }
}
