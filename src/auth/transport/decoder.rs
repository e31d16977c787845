/// Incremental UTF-8 decoder for PTY byte streams.
///
/// Multi-byte sequences split across frames are held until the rest of the
/// sequence arrives; invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::new();
        let mut consumed = 0;
        loop {
            let rest = &self.pending[consumed..];
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    consumed = self.pending.len();
                    break;
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    // valid_up_to bytes were checked by from_utf8 above
                    out.push_str(std::str::from_utf8(&rest[..valid_up_to]).unwrap_or_default());
                    consumed += valid_up_to;
                    match err.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            consumed += bad;
                        }
                        // incomplete sequence at the end: keep it for the next frame
                        None => break,
                    }
                }
            }
        }

        self.pending.drain(..consumed);
        out
    }

    /// Flushes whatever is left; an incomplete trailing sequence becomes U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest).into_owned()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passes_through() {
        let mut decoder = Utf8StreamDecoder::new();
        assert_eq!(decoder.decode(b"hello"), "hello");
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_split_multibyte_sequence() {
        let bytes = "로그인 성공".as_bytes();
        let mut decoder = Utf8StreamDecoder::new();

        // '로' is three bytes; cut after the first byte
        let first = decoder.decode(&bytes[..1]);
        assert_eq!(first, "");
        assert!(decoder.has_pending());

        let second = decoder.decode(&bytes[1..5]);
        let third = decoder.decode(&bytes[5..]);
        assert_eq!(format!("{}{}{}", first, second, third), "로그인 성공");
        assert!(!decoder.has_pending());
    }

    #[test]
    fn test_every_split_point_round_trips() {
        let text = "✔ Credential이 저장되었습니다";
        let bytes = text.as_bytes();
        for cut in 0..=bytes.len() {
            let mut decoder = Utf8StreamDecoder::new();
            let mut out = decoder.decode(&bytes[..cut]);
            out.push_str(&decoder.decode(&bytes[cut..]));
            out.push_str(&decoder.finish());
            assert_eq!(out, text, "cut at {}", cut);
        }
    }

    #[test]
    fn test_invalid_bytes_are_replaced() {
        let mut decoder = Utf8StreamDecoder::new();
        assert_eq!(decoder.decode(&[b'a', 0xff, b'b']), "a\u{fffd}b");
    }

    #[test]
    fn test_finish_flushes_incomplete_tail() {
        let mut decoder = Utf8StreamDecoder::new();
        assert_eq!(decoder.decode(&[b'x', 0xe2, 0x9c]), "x");
        assert_eq!(decoder.finish(), "\u{fffd}");
        assert_eq!(decoder.finish(), "");
    }
}
