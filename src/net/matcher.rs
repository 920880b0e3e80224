//! Classification rules over the leading bytes of a connection.
//!
//! A rule sees the whole buffered prefix each time more bytes arrive and
//! answers [`Decision::NeedMore`] until it can decide. Rules never consume
//! anything: the router replays the prefix to whichever listener wins.

/// Outcome of inspecting a connection prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The connection belongs to this rule's listener.
    Match,
    /// The connection can never match this rule.
    Reject,
    /// More bytes are needed before the rule can decide.
    NeedMore,
}

/// A classification rule.
///
/// Implementations must be pure functions of the prefix: the router may call
/// `inspect` many times on a growing buffer.
pub trait Matcher: Send + Sync + 'static {
    fn inspect(&self, prefix: &[u8]) -> Decision;
}

impl<F> Matcher for F
where
    F: Fn(&[u8]) -> Decision + Send + Sync + 'static,
{
    fn inspect(&self, prefix: &[u8]) -> Decision {
        self(prefix)
    }
}

/// Matches every connection, without reading.
#[derive(Debug, Clone, Copy, Default)]
pub struct Any;

impl Matcher for Any {
    fn inspect(&self, _prefix: &[u8]) -> Decision {
        Decision::Match
    }
}

/// Matches connections whose stream starts with a fixed byte string.
#[derive(Debug, Clone)]
pub struct Prefix(pub Vec<u8>);

impl Prefix {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }
}

impl Matcher for Prefix {
    fn inspect(&self, prefix: &[u8]) -> Decision {
        starts_with(prefix, &self.0)
    }
}

fn starts_with(buf: &[u8], expected: &[u8]) -> Decision {
    if buf.len() < expected.len() {
        if expected.starts_with(buf) {
            Decision::NeedMore
        } else {
            Decision::Reject
        }
    } else if buf.starts_with(expected) {
        Decision::Match
    } else {
        Decision::Reject
    }
}

const HTTP1_METHODS: [&[u8]; 9] = [
    b"GET", b"POST", b"PUT", b"DELETE", b"HEAD", b"OPTIONS", b"PATCH", b"CONNECT", b"TRACE",
];

/// Matches an HTTP/1.x request line (`METHOD SP target SP HTTP/1.x CRLF`).
#[derive(Debug, Clone, Copy, Default)]
pub struct Http1;

impl Matcher for Http1 {
    fn inspect(&self, prefix: &[u8]) -> Decision {
        let Some(space) = prefix.iter().position(|&b| b == b' ') else {
            let partial_method = HTTP1_METHODS.iter().any(|m| m.starts_with(prefix));
            return if partial_method {
                Decision::NeedMore
            } else {
                Decision::Reject
            };
        };

        if !HTTP1_METHODS.contains(&&prefix[..space]) {
            return Decision::Reject;
        }

        let Some(line_end) = prefix.windows(2).position(|w| w == b"\r\n") else {
            return Decision::NeedMore;
        };

        let line = &prefix[..line_end];
        if line.ends_with(b" HTTP/1.1") || line.ends_with(b" HTTP/1.0") {
            Decision::Match
        } else {
            Decision::Reject
        }
    }
}

/// The HTTP/2 client connection preface.
pub const HTTP2_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Matches any connection opening with the HTTP/2 client preface.
#[derive(Debug, Clone, Copy, Default)]
pub struct Http2;

impl Matcher for Http2 {
    fn inspect(&self, prefix: &[u8]) -> Decision {
        starts_with(prefix, HTTP2_PREFACE)
    }
}

const FRAME_HEADER_LEN: usize = 9;
const FRAME_HEADERS: u8 = 0x1;
const FRAME_CONTINUATION: u8 = 0x9;
const FLAG_END_HEADERS: u8 = 0x4;
const FLAG_PADDED: u8 = 0x8;
const FLAG_PRIORITY: u8 = 0x20;

/// How a header value is compared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueMatch {
    Exact(Vec<u8>),
    Prefix(Vec<u8>),
}

impl ValueMatch {
    fn accepts(&self, value: &[u8]) -> bool {
        match self {
            ValueMatch::Exact(expected) => value == expected.as_slice(),
            ValueMatch::Prefix(expected) => value.starts_with(expected),
        }
    }
}

/// Matches HTTP/2 connections whose first header block carries a field.
///
/// After the preface, frames are skipped until the first HEADERS frame; its
/// block (joined with any CONTINUATION frames) is HPACK-decoded and searched
/// for `name` with a value accepted by `value`.
#[derive(Debug, Clone)]
pub struct Http2HeaderField {
    name: Vec<u8>,
    value: ValueMatch,
}

impl Http2HeaderField {
    pub fn exact(name: &str, value: &str) -> Self {
        Self {
            name: name.to_ascii_lowercase().into_bytes(),
            value: ValueMatch::Exact(value.as_bytes().to_vec()),
        }
    }

    pub fn prefix(name: &str, value: &str) -> Self {
        Self {
            name: name.to_ascii_lowercase().into_bytes(),
            value: ValueMatch::Prefix(value.as_bytes().to_vec()),
        }
    }
}

/// The gRPC rule: HTTP/2 with `content-type: application/grpc[+codec]`.
pub fn grpc() -> Http2HeaderField {
    Http2HeaderField::prefix("content-type", "application/grpc")
}

impl Matcher for Http2HeaderField {
    fn inspect(&self, prefix: &[u8]) -> Decision {
        match starts_with(prefix, HTTP2_PREFACE) {
            Decision::Match => {}
            other => return other,
        }

        let block = match first_header_block(&prefix[HTTP2_PREFACE.len()..]) {
            Ok(block) => block,
            Err(decision) => return decision,
        };

        // hpack's decoder panics on some malformed table size updates.
        let decoded = std::panic::catch_unwind(|| hpack::Decoder::new().decode(&block));
        let Ok(Ok(fields)) = decoded else {
            tracing::trace!(block_len = block.len(), "Undecodable header block");
            return Decision::Reject;
        };

        let found = fields
            .iter()
            .any(|(name, value)| name.eq_ignore_ascii_case(&self.name) && self.value.accepts(value));
        if found {
            Decision::Match
        } else {
            Decision::Reject
        }
    }
}

/// Collect the first complete header block from the frames after the preface.
///
/// Returns `Err(NeedMore)` while the block is incomplete and `Err(Reject)`
/// for framing that cannot precede a request.
fn first_header_block(frames: &[u8]) -> Result<Vec<u8>, Decision> {
    let mut pos = 0;
    let mut block = Vec::new();
    let mut open_stream: Option<u32> = None;

    loop {
        let header = frames
            .get(pos..pos + FRAME_HEADER_LEN)
            .ok_or(Decision::NeedMore)?;
        let len = u32::from_be_bytes([0, header[0], header[1], header[2]]) as usize;
        let kind = header[3];
        let flags = header[4];
        let stream_id =
            u32::from_be_bytes([header[5], header[6], header[7], header[8]]) & 0x7fff_ffff;

        let body_start = pos + FRAME_HEADER_LEN;
        let payload = frames
            .get(body_start..body_start + len)
            .ok_or(Decision::NeedMore)?;
        pos = body_start + len;

        match (open_stream, kind) {
            (None, FRAME_HEADERS) => {
                let fragment = headers_fragment(payload, flags).ok_or(Decision::Reject)?;
                block.extend_from_slice(fragment);
                if flags & FLAG_END_HEADERS != 0 {
                    return Ok(block);
                }
                open_stream = Some(stream_id);
            }
            (Some(open), FRAME_CONTINUATION) if open == stream_id => {
                block.extend_from_slice(payload);
                if flags & FLAG_END_HEADERS != 0 {
                    return Ok(block);
                }
            }
            // Only CONTINUATION may follow an unterminated header block.
            (Some(_), _) => return Err(Decision::Reject),
            // SETTINGS, WINDOW_UPDATE, PING and PRIORITY may precede the first request.
            (None, _) => {}
        }
    }
}

/// Strip padding and priority fields from a HEADERS payload.
fn headers_fragment(payload: &[u8], flags: u8) -> Option<&[u8]> {
    let mut start = 0;
    let mut padding = 0;
    if flags & FLAG_PADDED != 0 {
        padding = *payload.first()? as usize;
        start = 1;
    }
    if flags & FLAG_PRIORITY != 0 {
        start += 5;
    }
    let end = payload.len().checked_sub(padding)?;
    payload.get(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(kind: u8, flags: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
        let len = payload.len() as u32;
        let mut out = len.to_be_bytes()[1..].to_vec();
        out.push(kind);
        out.push(flags);
        out.extend_from_slice(&stream_id.to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn header_block(fields: &[(&str, &str)]) -> Vec<u8> {
        let mut encoder = hpack::Encoder::new();
        encoder.encode(fields.iter().map(|(n, v)| (n.as_bytes(), v.as_bytes())))
    }

    fn grpc_prefix() -> Vec<u8> {
        let mut bytes = HTTP2_PREFACE.to_vec();
        bytes.extend(frame(0x4, 0, 0, &[]));
        bytes.extend(frame(0x8, 0, 0, &[0, 0, 0xff, 0xff]));
        let block = header_block(&[
            (":method", "POST"),
            (":scheme", "http"),
            (":path", "/example.service.ServiceExampleService/GetUser"),
            ("content-type", "application/grpc"),
            ("te", "trailers"),
        ]);
        bytes.extend(frame(FRAME_HEADERS, FLAG_END_HEADERS, 1, &block));
        bytes
    }

    #[test]
    fn any_matches_empty_prefix() {
        assert_eq!(Any.inspect(b""), Decision::Match);
    }

    #[test]
    fn prefix_needs_more_then_decides() {
        let rule = Prefix::new("PING");
        assert_eq!(rule.inspect(b"PI"), Decision::NeedMore);
        assert_eq!(rule.inspect(b"PING\r\n"), Decision::Match);
        assert_eq!(rule.inspect(b"PO"), Decision::Reject);
    }

    #[test]
    fn http1_request_line() {
        assert_eq!(Http1.inspect(b"GE"), Decision::NeedMore);
        assert_eq!(Http1.inspect(b"GET / HT"), Decision::NeedMore);
        assert_eq!(Http1.inspect(b"GET / HTTP/1.1\r\n\r\n"), Decision::Match);
        assert_eq!(Http1.inspect(b"DELETE /x HTTP/1.0\r\n"), Decision::Match);
        assert_eq!(Http1.inspect(b"FETCH / HTTP/1.1\r\n"), Decision::Reject);
        assert_eq!(Http1.inspect(b"GET / HTTP/2.0\r\n"), Decision::Reject);
        assert_eq!(Http1.inspect(HTTP2_PREFACE), Decision::Reject);
    }

    #[test]
    fn http2_preface() {
        assert_eq!(Http2.inspect(&HTTP2_PREFACE[..10]), Decision::NeedMore);
        assert_eq!(Http2.inspect(HTTP2_PREFACE), Decision::Match);
        assert_eq!(Http2.inspect(b"GET / HTTP/1.1\r\n"), Decision::Reject);
    }

    #[test]
    fn grpc_matches_content_type() {
        assert_eq!(grpc().inspect(&grpc_prefix()), Decision::Match);
    }

    #[test]
    fn grpc_needs_complete_headers_frame() {
        let bytes = grpc_prefix();
        for cut in [10, HTTP2_PREFACE.len(), HTTP2_PREFACE.len() + 4, bytes.len() - 1] {
            assert_eq!(grpc().inspect(&bytes[..cut]), Decision::NeedMore, "cut at {cut}");
        }
    }

    #[test]
    fn grpc_accepts_codec_suffix() {
        let mut bytes = HTTP2_PREFACE.to_vec();
        let block = header_block(&[("content-type", "application/grpc+proto")]);
        bytes.extend(frame(FRAME_HEADERS, FLAG_END_HEADERS, 1, &block));
        assert_eq!(grpc().inspect(&bytes), Decision::Match);
        assert_eq!(
            Http2HeaderField::exact("content-type", "application/grpc").inspect(&bytes),
            Decision::Reject
        );
    }

    #[test]
    fn plain_http2_is_rejected() {
        let mut bytes = HTTP2_PREFACE.to_vec();
        let block = header_block(&[(":method", "GET"), (":path", "/")]);
        bytes.extend(frame(FRAME_HEADERS, FLAG_END_HEADERS, 1, &block));
        assert_eq!(grpc().inspect(&bytes), Decision::Reject);
    }

    #[test]
    fn header_block_split_across_continuation() {
        let block = header_block(&[(":method", "POST"), ("content-type", "application/grpc")]);
        let (first, rest) = block.split_at(block.len() / 2);

        let mut bytes = HTTP2_PREFACE.to_vec();
        bytes.extend(frame(FRAME_HEADERS, 0, 3, first));
        assert_eq!(grpc().inspect(&bytes), Decision::NeedMore);

        bytes.extend(frame(FRAME_CONTINUATION, FLAG_END_HEADERS, 3, rest));
        assert_eq!(grpc().inspect(&bytes), Decision::Match);
    }

    #[test]
    fn padded_and_prioritized_headers() {
        let block = header_block(&[("content-type", "application/grpc")]);
        let mut payload = vec![3];
        payload.extend_from_slice(&[0, 0, 0, 0, 16]);
        payload.extend_from_slice(&block);
        payload.extend_from_slice(&[0, 0, 0]);

        let mut bytes = HTTP2_PREFACE.to_vec();
        bytes.extend(frame(
            FRAME_HEADERS,
            FLAG_END_HEADERS | FLAG_PADDED | FLAG_PRIORITY,
            1,
            &payload,
        ));
        assert_eq!(grpc().inspect(&bytes), Decision::Match);
    }

    #[test]
    fn undecodable_header_block_is_rejected() {
        let mut bytes = HTTP2_PREFACE.to_vec();
        let block = [0x38, 0x3f, 0xfc, 0xef, 0x9c, 0xbb, 0x44, 0xa4];
        bytes.extend(frame(FRAME_HEADERS, FLAG_END_HEADERS, 1, &block));
        assert_eq!(grpc().inspect(&bytes), Decision::Reject);

        bytes.truncate(HTTP2_PREFACE.len());
        bytes.extend(frame(FRAME_HEADERS, FLAG_END_HEADERS, 1, &[0xff, 0xff, 0xff]));
        assert_eq!(grpc().inspect(&bytes), Decision::Reject);
    }

    #[test]
    fn interleaved_frame_inside_header_block_is_rejected() {
        let block = header_block(&[("content-type", "application/grpc")]);
        let mut bytes = HTTP2_PREFACE.to_vec();
        bytes.extend(frame(FRAME_HEADERS, 0, 1, &block));
        bytes.extend(frame(0x4, 0, 0, &[]));
        assert_eq!(grpc().inspect(&bytes), Decision::Reject);
    }

    #[test]
    fn closures_are_rules() {
        let rule = |prefix: &[u8]| {
            if prefix.is_empty() {
                Decision::NeedMore
            } else if prefix[0] == 0x16 {
                Decision::Match
            } else {
                Decision::Reject
            }
        };
        assert_eq!(rule.inspect(&[0x16, 0x03]), Decision::Match);
        assert_eq!(rule.inspect(b"G"), Decision::Reject);
    }
}
