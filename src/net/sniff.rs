//! Protocol detection from the first bytes of a connection.
//!
//! Matchers are pure functions over the bytes buffered so far. Each says
//! whether the prefix matches, cannot match, or is too short to tell.
//! [`classify`] runs them in priority order: gRPC, HTTP/1, text.

use std::fmt;

/// Protocol a connection is routed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProtocolClass {
    /// gRPC over cleartext HTTP/2
    Grpc,
    /// HTTP/1.x request line
    Http1,
    /// RESP-style text protocol
    Text,
}

impl ProtocolClass {
    /// All classes, highest priority first.
    pub const PRIORITY: [ProtocolClass; 3] =
        [ProtocolClass::Grpc, ProtocolClass::Http1, ProtocolClass::Text];

    pub fn matcher(self) -> Matcher {
        match self {
            ProtocolClass::Grpc => match_grpc,
            ProtocolClass::Http1 => match_http1,
            ProtocolClass::Text => match_text,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ProtocolClass::Grpc => "grpc",
            ProtocolClass::Http1 => "http",
            ProtocolClass::Text => "text",
        }
    }
}

impl fmt::Display for ProtocolClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one matcher over a prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sniff {
    Match,
    NoMatch,
    NeedMore,
}

/// A protocol predicate over buffered bytes.
pub type Matcher = fn(&[u8]) -> Sniff;

/// Outcome of running every matcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Matched(ProtocolClass),
    Unmatched,
    /// A higher-priority matcher needs more bytes before anything can win.
    Pending,
}

/// Classify `prefix`. With `exhausted` set no more bytes will arrive, so
/// undecided matchers count as non-matches.
pub fn classify(prefix: &[u8], exhausted: bool) -> Verdict {
    for class in ProtocolClass::PRIORITY {
        match (class.matcher())(prefix) {
            Sniff::Match => return Verdict::Matched(class),
            Sniff::NoMatch => continue,
            Sniff::NeedMore if exhausted => continue,
            Sniff::NeedMore => return Verdict::Pending,
        }
    }
    Verdict::Unmatched
}

// ---------------------------------------------------------------------------
// Text protocol
// ---------------------------------------------------------------------------

/// Frame-type sigils: error, status, integer, bulk, multi-bulk.
pub const TEXT_SIGILS: [u8; 5] = [b'-', b'+', b':', b'$', b'*'];

/// Sigil, one ASCII digit, CRLF.
pub fn match_text(p: &[u8]) -> Sniff {
    let checks: [fn(u8) -> bool; 4] = [
        |b| TEXT_SIGILS.contains(&b),
        |b| b.is_ascii_digit(),
        |b| b == b'\r',
        |b| b == b'\n',
    ];
    if p.iter().zip(checks).any(|(&b, ok)| !ok(b)) {
        return Sniff::NoMatch;
    }
    if p.len() < checks.len() {
        Sniff::NeedMore
    } else {
        Sniff::Match
    }
}

// ---------------------------------------------------------------------------
// HTTP/1
// ---------------------------------------------------------------------------

const HTTP1_METHODS: [&[u8]; 9] = [
    b"OPTIONS", b"GET", b"HEAD", b"POST", b"PUT", b"DELETE", b"TRACE", b"CONNECT", b"PATCH",
];

/// A known method token followed by a space.
pub fn match_http1(p: &[u8]) -> Sniff {
    let mut pending = false;
    for method in HTTP1_METHODS {
        let want = method.len() + 1;
        let seen = &p[..p.len().min(want)];
        let agrees = seen
            .iter()
            .enumerate()
            .all(|(i, &b)| b == method.get(i).copied().unwrap_or(b' '));
        if !agrees {
            continue;
        }
        if seen.len() == want {
            return Sniff::Match;
        }
        pending = true;
    }
    if pending {
        Sniff::NeedMore
    } else {
        Sniff::NoMatch
    }
}

// ---------------------------------------------------------------------------
// gRPC over HTTP/2
// ---------------------------------------------------------------------------

/// Connection preface every HTTP/2 client sends first.
pub const H2_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

const FRAME_HEADER_LEN: usize = 9;
const FRAME_HEADERS: u8 = 0x1;
const FRAME_CONTINUATION: u8 = 0x9;
const FLAG_END_HEADERS: u8 = 0x4;
const FLAG_PADDED: u8 = 0x8;
const FLAG_PRIORITY: u8 = 0x20;

/// HTTP/2 preface followed by a HEADERS block whose `content-type` is gRPC.
pub fn match_grpc(p: &[u8]) -> Sniff {
    let n = p.len().min(H2_PREFACE.len());
    if p[..n] != H2_PREFACE[..n] {
        return Sniff::NoMatch;
    }
    if p.len() < H2_PREFACE.len() {
        return Sniff::NeedMore;
    }

    let block = match first_header_block(&p[H2_PREFACE.len()..]) {
        HeaderBlock::Complete(block) => block,
        HeaderBlock::Partial => return Sniff::NeedMore,
        HeaderBlock::Invalid => return Sniff::NoMatch,
    };

    // hpack 0.3 panics on a malformed table size update instead of failing.
    if !representations_well_formed(&block) {
        return Sniff::NoMatch;
    }

    // The first header block never depends on earlier dynamic table state.
    let mut decoder = hpack::Decoder::new();
    match decoder.decode(&block) {
        Ok(headers) => {
            let grpc = headers
                .iter()
                .any(|(name, value)| name.as_slice() == b"content-type" && is_grpc_content_type(value));
            if grpc {
                Sniff::Match
            } else {
                Sniff::NoMatch
            }
        }
        Err(_) => Sniff::NoMatch,
    }
}

fn is_grpc_content_type(value: &[u8]) -> bool {
    const GRPC: &[u8] = b"application/grpc";
    value == GRPC || (value.starts_with(GRPC) && value.get(GRPC.len()) == Some(&b'+'))
}

/// Longest integer encoding accepted: the prefix octet plus four more.
const HPACK_INT_MAX_OCTETS: usize = 5;

/// Walk the header representations of `block` and check that every integer
/// and string is complete.
fn representations_well_formed(mut block: &[u8]) -> bool {
    while let Some(&first) = block.first() {
        let consumed = match first {
            // Indexed field
            b if b & 0x80 != 0 => hpack_int(block, 7),
            // Literal with incremental indexing
            b if b & 0x40 != 0 => literal_len(block, 6),
            // Dynamic table size update
            b if b & 0x20 != 0 => hpack_int(block, 5),
            // Literal without indexing, or never indexed
            _ => literal_len(block, 4),
        };
        match consumed {
            Some(n) => block = &block[n..],
            None => return false,
        }
    }
    true
}

/// Octets taken by a literal field: the name index, an inline name when the
/// index is zero, then the value.
fn literal_len(block: &[u8], prefix: u32) -> Option<usize> {
    let (index, mut n) = hpack_int_value(block, prefix)?;
    if index == 0 {
        n += hpack_string(&block[n..])?;
    }
    n += hpack_string(&block[n..])?;
    Some(n)
}

/// Octets taken by a length-prefixed string.
fn hpack_string(buf: &[u8]) -> Option<usize> {
    let (len, n) = hpack_int_value(buf, 7)?;
    let end = n.checked_add(len)?;
    (end <= buf.len()).then_some(end)
}

fn hpack_int(buf: &[u8], prefix: u32) -> Option<usize> {
    hpack_int_value(buf, prefix).map(|(_, n)| n)
}

/// Decode a prefixed integer, returning its value and encoded length.
fn hpack_int_value(buf: &[u8], prefix: u32) -> Option<(usize, usize)> {
    let mask = (1u8 << prefix) - 1;
    let mut value = (buf.first()? & mask) as usize;
    if value < mask as usize {
        return Some((value, 1));
    }
    for (i, &b) in buf.iter().enumerate().take(HPACK_INT_MAX_OCTETS).skip(1) {
        value += ((b & 0x7f) as usize) << (7 * (i - 1));
        if b & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

enum HeaderBlock {
    Complete(Vec<u8>),
    Partial,
    Invalid,
}

/// Walk frames after the preface, skipping everything before the first
/// HEADERS frame, and join it with its CONTINUATION frames.
fn first_header_block(mut rest: &[u8]) -> HeaderBlock {
    let mut block = Vec::new();
    let mut in_headers = false;

    loop {
        if rest.len() < FRAME_HEADER_LEN {
            return HeaderBlock::Partial;
        }
        let len = u32::from_be_bytes([0, rest[0], rest[1], rest[2]]) as usize;
        let kind = rest[3];
        let flags = rest[4];
        if rest.len() < FRAME_HEADER_LEN + len {
            return HeaderBlock::Partial;
        }
        let payload = &rest[FRAME_HEADER_LEN..FRAME_HEADER_LEN + len];
        rest = &rest[FRAME_HEADER_LEN + len..];

        match (in_headers, kind) {
            (false, FRAME_HEADERS) => {
                let Some(fragment) = headers_fragment(payload, flags) else {
                    return HeaderBlock::Invalid;
                };
                block.extend_from_slice(fragment);
                in_headers = true;
            }
            (false, _) => continue,
            (true, FRAME_CONTINUATION) => block.extend_from_slice(payload),
            (true, _) => return HeaderBlock::Invalid,
        }

        if flags & FLAG_END_HEADERS != 0 {
            return HeaderBlock::Complete(block);
        }
    }
}

/// Strip padding and priority fields from a HEADERS payload.
fn headers_fragment(payload: &[u8], flags: u8) -> Option<&[u8]> {
    let mut start = 0;
    let mut pad = 0;
    if flags & FLAG_PADDED != 0 {
        pad = *payload.first()? as usize;
        start = 1;
    }
    if flags & FLAG_PRIORITY != 0 {
        start += 5;
    }
    let end = payload.len().checked_sub(pad)?;
    payload.get(start..end)
}
