//! Bracketed-paste demultiplexer
//!
//! Scans outbound terminal input for the bracketed-paste markers and
//! routes paste payloads to the upload path instead of the raw relay
//! path. Ordinary typing takes the zero-buffering fast path: a chunk
//! with no start marker and no paste in progress forwards untouched.

/// Start marker the terminal emits before pasted text
pub const PASTE_START: &[u8] = b"\x1b[200~";
/// End marker the terminal emits after pasted text
pub const PASTE_END: &[u8] = b"\x1b[201~";

/// What to do with a span of input
#[derive(Debug, PartialEq, Eq)]
pub enum DemuxEvent {
    /// Forward these bytes to the transport verbatim
    Forward(Vec<u8>),
    /// A complete paste payload
    Paste(String),
}

/// Incremental scanner over chunks of raw terminal input.
///
/// The accumulation buffer exists only between an observed start marker
/// and its terminator; it is unbounded, matching the transport's own
/// message-size behavior. Dropping the demux discards a partial paste,
/// which is what connection teardown wants.
#[derive(Debug, Default)]
pub struct PasteDemux {
    /// Bytes seen since the start marker, marker included
    buffer: Vec<u8>,
    in_paste: bool,
}

impl PasteDemux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a paste is currently being accumulated
    pub fn in_paste(&self) -> bool {
        self.in_paste
    }

    /// Scan one chunk of input, producing forward/paste events in input
    /// order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<DemuxEvent> {
        let mut events = Vec::new();
        let mut data = chunk.to_vec();

        loop {
            if self.in_paste {
                let prior = self.buffer.len();
                self.buffer.extend_from_slice(&data);

                // The end marker may straddle the previous chunk
                // boundary; back the search up by marker-length - 1,
                // but never into the start marker itself.
                let from = prior
                    .saturating_sub(PASTE_END.len() - 1)
                    .max(PASTE_START.len());
                let Some(rel) = find_subslice(&self.buffer[from..], PASTE_END) else {
                    break;
                };
                let end = from + rel;

                match std::str::from_utf8(&self.buffer[PASTE_START.len()..end]) {
                    Ok(payload) => events.push(DemuxEvent::Paste(payload.to_string())),
                    Err(_) => {
                        // Undecodable payload: forward the original
                        // bytes, markers included, unmodified.
                        events.push(DemuxEvent::Forward(
                            self.buffer[..end + PASTE_END.len()].to_vec(),
                        ));
                    }
                }

                let trailing = self.buffer[end + PASTE_END.len()..].to_vec();
                self.buffer.clear();
                self.in_paste = false;

                if trailing.is_empty() {
                    break;
                }
                data = trailing;
                continue;
            }

            match find_subslice(&data, PASTE_START) {
                None => {
                    if !data.is_empty() {
                        events.push(DemuxEvent::Forward(data));
                    }
                    break;
                }
                Some(pos) => {
                    if pos > 0 {
                        events.push(DemuxEvent::Forward(data[..pos].to_vec()));
                    }
                    self.in_paste = true;
                    self.buffer = PASTE_START.to_vec();
                    data = data[pos + PASTE_START.len()..].to_vec();
                }
            }
        }

        events
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forward(bytes: &[u8]) -> DemuxEvent {
        DemuxEvent::Forward(bytes.to_vec())
    }

    fn paste(text: &str) -> DemuxEvent {
        DemuxEvent::Paste(text.to_string())
    }

    #[test]
    fn test_plain_typing_forwards_immediately() {
        let mut demux = PasteDemux::new();
        assert_eq!(demux.feed(b"ls -la\r"), vec![forward(b"ls -la\r")]);
        assert!(!demux.in_paste());
    }

    #[test]
    fn test_single_chunk_paste_with_surrounding_bytes() {
        let mut demux = PasteDemux::new();
        let mut chunk = Vec::new();
        chunk.extend_from_slice(b"pre");
        chunk.extend_from_slice(PASTE_START);
        chunk.extend_from_slice(b"pasted text");
        chunk.extend_from_slice(PASTE_END);
        chunk.extend_from_slice(b"post");

        assert_eq!(
            demux.feed(&chunk),
            vec![forward(b"pre"), paste("pasted text"), forward(b"post")]
        );
        assert!(!demux.in_paste());
    }

    #[test]
    fn test_paste_spanning_many_chunks() {
        let mut demux = PasteDemux::new();

        let mut first = Vec::new();
        first.extend_from_slice(b"before");
        first.extend_from_slice(PASTE_START);
        first.extend_from_slice(b"part one ");

        assert_eq!(demux.feed(&first), vec![forward(b"before")]);
        assert!(demux.in_paste());

        assert_eq!(demux.feed(b"part two "), Vec::<DemuxEvent>::new());
        assert_eq!(demux.feed(b"part three"), Vec::<DemuxEvent>::new());

        let mut last = Vec::new();
        last.extend_from_slice(PASTE_END);
        last.extend_from_slice(b"after");

        assert_eq!(
            demux.feed(&last),
            vec![paste("part one part two part three"), forward(b"after")]
        );
        assert!(!demux.in_paste());
    }

    #[test]
    fn test_end_marker_straddles_chunk_boundary() {
        let mut demux = PasteDemux::new();

        let mut first = PASTE_START.to_vec();
        first.extend_from_slice(b"payload\x1b[20");
        assert_eq!(demux.feed(&first), Vec::<DemuxEvent>::new());

        assert_eq!(demux.feed(b"1~tail"), vec![paste("payload"), forward(b"tail")]);
    }

    #[test]
    fn test_two_pastes_in_one_chunk() {
        let mut demux = PasteDemux::new();
        let mut chunk = Vec::new();
        chunk.extend_from_slice(PASTE_START);
        chunk.extend_from_slice(b"one");
        chunk.extend_from_slice(PASTE_END);
        chunk.extend_from_slice(b" mid ");
        chunk.extend_from_slice(PASTE_START);
        chunk.extend_from_slice(b"two");
        chunk.extend_from_slice(PASTE_END);

        assert_eq!(
            demux.feed(&chunk),
            vec![paste("one"), forward(b" mid "), paste("two")]
        );
    }

    #[test]
    fn test_invalid_utf8_payload_forwards_original_bytes() {
        let mut demux = PasteDemux::new();
        let mut chunk = Vec::new();
        chunk.extend_from_slice(PASTE_START);
        chunk.extend_from_slice(&[0xff, 0xfe, 0xfd]);
        chunk.extend_from_slice(PASTE_END);

        let mut expected = Vec::new();
        expected.extend_from_slice(PASTE_START);
        expected.extend_from_slice(&[0xff, 0xfe, 0xfd]);
        expected.extend_from_slice(PASTE_END);

        assert_eq!(demux.feed(&chunk), vec![forward(&expected)]);
    }

    #[test]
    fn test_empty_paste() {
        let mut demux = PasteDemux::new();
        let mut chunk = PASTE_START.to_vec();
        chunk.extend_from_slice(PASTE_END);
        assert_eq!(demux.feed(&chunk), vec![paste("")]);
    }
}
