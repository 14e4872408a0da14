//! Encode/decode for the fixed 32-bit transaction header.

/// Size of the packed header in bytes. Also the minimum word size a target
/// may report; a word must be able to hold a whole header.
pub const HEADER_SIZE: usize = 4;

/// The only protocol version this codec speaks.
pub const PROTOCOL_VERSION: u32 = 0;

/// Reserved transaction id meaning "accept any response". Used only by QUERY.
pub const XID_DONT_CARE: u8 = 0;

/// Highest bit count a single SHIFT can carry (20-bit length field, stored
/// as length minus one).
pub const MAX_SHIFT_BITS: u32 = 1 << 20;

const VERSION_SHIFT: u32 = 30;
const COMMAND_SHIFT: u32 = 28;
const COMMAND_MASK: u32 = 0x3;
const XID_SHIFT: u32 = 20;
const XID_MASK: u32 = 0xFF;
const LEN_MASK: u32 = 0x000F_FFFF;

/// Target-reported error codes carried by an ERROR header.
pub const ERR_BAD_VERSION: u32 = 1;
pub const ERR_BAD_COMMAND: u32 = 2;
pub const ERR_TRUNCATED: u32 = 3;
pub const ERR_NOT_PRESENT: u32 = 4;

/// Renders a target error code as a human-readable message.
/// Codes outside the fixed table fall back to a numeric rendering.
pub fn error_message(code: u32) -> String {
    match code {
        ERR_BAD_VERSION => "unsupported protocol version".to_string(),
        ERR_BAD_COMMAND => "unsupported command".to_string(),
        ERR_TRUNCATED => "truncated transfer".to_string(),
        ERR_NOT_PRESENT => "feature not present in firmware".to_string(),
        other => format!("error code {}", other),
    }
}

/// The command carried in header bits [29:28].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command {
    /// Capability discovery; the response encodes word size, memory depth
    /// and clock period in the header fields themselves.
    Query = 0b00,
    /// Transfer `len` bits of TMS/TDI, receive TDO.
    Shift = 0b01,
    /// Target-reported fault; the length field carries an error code.
    Error = 0b10,
}

impl Command {
    fn from_bits(bits: u32) -> Option<Command> {
        match bits {
            0b00 => Some(Command::Query),
            0b01 => Some(Command::Shift),
            0b10 => Some(Command::Error),
            _ => None,
        }
    }
}

/// A packed transaction header.
///
/// The wire representation is the 32-bit value in little-endian byte order,
/// zero-padded up to the negotiated word size. Padding bytes carry no
/// information and are ignored on receive.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Header(u32);

impl Header {
    /// Builds a QUERY request header. QUERY always uses the "don't care"
    /// transaction id since its response carries no echo of the request.
    pub fn query() -> Header {
        Header::new(Command::Query, XID_DONT_CARE, 0)
    }

    /// Builds a SHIFT request header for `len_bits` bits tagged with `xid`.
    ///
    /// # Panics
    ///
    /// Panics if `len_bits` is zero or exceeds [`MAX_SHIFT_BITS`], or if
    /// `xid` is the reserved "don't care" id.
    pub fn shift(len_bits: u32, xid: u8) -> Header {
        assert!(
            len_bits >= 1 && len_bits <= MAX_SHIFT_BITS,
            "SHIFT length {} out of range 1..={}",
            len_bits,
            MAX_SHIFT_BITS
        );
        assert_ne!(xid, XID_DONT_CARE, "SHIFT requires a real transaction id");
        Header::new(Command::Shift, xid, len_bits - 1)
    }

    fn new(command: Command, xid: u8, low: u32) -> Header {
        Header(
            (PROTOCOL_VERSION << VERSION_SHIFT)
                | ((command as u32) << COMMAND_SHIFT)
                | (u32::from(xid) << XID_SHIFT)
                | (low & LEN_MASK),
        )
    }

    /// Reconstructs a header from wire bytes (little-endian, low 4 bytes).
    ///
    /// # Panics
    ///
    /// Panics if fewer than [`HEADER_SIZE`] bytes are given.
    pub fn from_bytes(bytes: &[u8]) -> Header {
        let word: [u8; HEADER_SIZE] = bytes[..HEADER_SIZE]
            .try_into()
            .expect("header needs at least 4 bytes");
        Header(u32::from_le_bytes(word))
    }

    /// Writes the header into `buf`, zero-padding the remainder. The buffer
    /// length is expected to be the negotiated word size.
    pub fn write_to(&self, buf: &mut [u8]) {
        assert!(buf.len() >= HEADER_SIZE, "word buffer smaller than header");
        buf.fill(0);
        buf[..HEADER_SIZE].copy_from_slice(&self.0.to_le_bytes());
    }

    /// The raw packed value.
    pub fn raw(&self) -> u32 {
        self.0
    }

    /// Protocol version field; anything but 0 is a foreign speaker.
    pub fn version(&self) -> u32 {
        self.0 >> VERSION_SHIFT
    }

    /// The command field, or `None` for the unassigned bit pattern.
    pub fn command(&self) -> Option<Command> {
        Command::from_bits((self.0 >> COMMAND_SHIFT) & COMMAND_MASK)
    }

    /// The transaction id field.
    pub fn xid(&self) -> u8 {
        ((self.0 >> XID_SHIFT) & XID_MASK) as u8
    }

    /// The bit count of a SHIFT header.
    ///
    /// # Panics
    ///
    /// Panics if the header is not a SHIFT; the length field of other
    /// commands means something else entirely.
    pub fn len_bits(&self) -> u32 {
        assert_eq!(
            self.command(),
            Some(Command::Shift),
            "length extracted from non-SHIFT header"
        );
        (self.0 & LEN_MASK) + 1
    }

    /// The error code of an ERROR header.
    ///
    /// # Panics
    ///
    /// Panics if the header is not an ERROR.
    pub fn error_code(&self) -> u32 {
        assert_eq!(
            self.command(),
            Some(Command::Error),
            "error code extracted from non-ERROR header"
        );
        self.0 & LEN_MASK
    }
}

/// Capability fields unpacked from a QUERY response header.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct QueryReply {
    /// Bytes per protocol word, at least [`HEADER_SIZE`].
    pub word_size: usize,
    /// Words of buffering behind the target's shift engine. 0 means the
    /// target has no backing memory and the transport must be reliable.
    pub mem_depth: u32,
    /// Logarithmically quantized clock-period exponent, 0 = unknown.
    pub period_code: u8,
}

impl QueryReply {
    /// Unpacks the capability fields from a QUERY response header.
    pub fn parse(header: Header) -> QueryReply {
        let raw = header.raw();
        QueryReply {
            word_size: ((raw & 0xF) + 1) as usize,
            mem_depth: (raw >> 4) & 0xFFFF,
            period_code: ((raw >> 20) & 0xFF) as u8,
        }
    }

    /// The target clock period in nanoseconds, if the target reported one.
    ///
    /// The wire carries `round(log10(period * 200 MHz) * 256 / 4)`; this
    /// inverts that quantization.
    pub fn period_ns(&self) -> Option<u32> {
        if self.period_code == 0 {
            return None;
        }
        let exponent = f64::from(self.period_code) * 4.0 / 256.0;
        Some((10f64.powf(exponent) * 1e9 / 200e6).round() as u32)
    }
}

/// Generator for the one-byte transaction id space.
///
/// Ids cycle through 1..=255; the reserved 0 is never produced.
#[derive(Debug)]
pub struct XidGen {
    next: u8,
}

impl XidGen {
    pub fn new() -> XidGen {
        XidGen { next: 1 }
    }

    /// Returns the next transaction id, skipping the reserved 0.
    pub fn next_id(&mut self) -> u8 {
        let id = self.next;
        self.next = if self.next == u8::MAX { 1 } else { self.next + 1 };
        id
    }
}

impl Default for XidGen {
    fn default() -> Self {
        XidGen::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_round_trip() {
        for (command, xid, low) in [
            (Command::Query, XID_DONT_CARE, 0),
            (Command::Shift, 1, 0),
            (Command::Shift, 0x80, 11),
            (Command::Shift, 0xFF, LEN_MASK),
            (Command::Error, 7, ERR_TRUNCATED),
        ] {
            let header = Header::new(command, xid, low);
            let mut wire = [0u8; 8];
            header.write_to(&mut wire);
            let decoded = Header::from_bytes(&wire);
            assert_eq!(decoded, header);
            assert_eq!(decoded.command(), Some(command));
            assert_eq!(decoded.xid(), xid);
            assert_eq!(decoded.version(), 0);
            // padding beyond the header must stay zero
            assert_eq!(&wire[HEADER_SIZE..], &[0, 0, 0, 0]);
        }
    }

    #[test]
    fn length_minus_one_encoding() {
        for bits in [1, 2, 7, 8, 9, 0xFFFF, MAX_SHIFT_BITS] {
            assert_eq!(Header::shift(bits, 1).len_bits(), bits);
        }
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn zero_length_shift_rejected() {
        let _ = Header::shift(0, 1);
    }

    #[test]
    #[should_panic(expected = "non-SHIFT")]
    fn length_of_query_is_a_contract_violation() {
        let _ = Header::query().len_bits();
    }

    #[test]
    fn xid_generator_never_yields_zero_and_cycles() {
        let mut xids = XidGen::new();
        let first_cycle: Vec<u8> = (0..255).map(|_| xids.next_id()).collect();
        assert!(first_cycle.iter().all(|&id| id != 0));
        assert_eq!(first_cycle.len(), 255);
        // full period: the next 255 ids repeat the first cycle exactly
        let second_cycle: Vec<u8> = (0..255).map(|_| xids.next_id()).collect();
        assert_eq!(first_cycle, second_cycle);
    }

    #[test]
    fn query_reply_fields() {
        // word size 4, depth 256, period code 128
        let raw: u32 = 0x3 | (256 << 4) | (128 << 20);
        let reply = QueryReply::parse(Header(raw));
        assert_eq!(reply.word_size, 4);
        assert_eq!(reply.mem_depth, 256);
        assert_eq!(reply.period_code, 128);
        // 10^(4*128/256) * 1e9 / 200e6 = 100 * 5 = 500ns
        assert_eq!(reply.period_ns(), Some(500));
    }

    #[test]
    fn unknown_period_code() {
        let reply = QueryReply::parse(Header(0x3));
        assert_eq!(reply.period_ns(), None);
    }

    #[test]
    fn error_messages() {
        assert_eq!(error_message(ERR_BAD_VERSION), "unsupported protocol version");
        assert_eq!(error_message(ERR_NOT_PRESENT), "feature not present in firmware");
        assert_eq!(error_message(99), "error code 99");
    }
}
