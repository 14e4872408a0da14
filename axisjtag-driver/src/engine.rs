//! Protocol engine: reliable exchange and vector chunking on top of an
//! abstract transport.

use axisjtag_protocol::{
    Command, ERR_BAD_COMMAND, ERR_BAD_VERSION, ERR_TRUNCATED, HEADER_SIZE, Header,
    MAX_SHIFT_BITS, PROTOCOL_VERSION, QueryReply, XID_DONT_CARE, XidGen,
};

use crate::{Capabilities, JtagDriver, error::DriverError};

/// How often an exchange is resent after a transport timeout or a stale
/// response before giving up. Set to 0 against memory-less targets.
pub const DEFAULT_RETRY_LIMIT: u32 = 5;

/// The transport-specific exchange primitive.
///
/// One call sends the request bytes and blocks (up to a transport-defined
/// timeout) for the response, splitting it into the word-sized header and
/// the payload. Implementations report a timed-out receive as
/// [`DriverError::Timeout`] so the engine can resend.
pub trait Transport {
    /// Performs one request/response exchange.
    ///
    /// # Returns
    ///
    /// The number of payload bytes received (excluding the header word).
    fn xfer(
        &mut self,
        tx: &[u8],
        rx_hdr: &mut [u8],
        rx_payload: &mut [u8],
    ) -> Result<usize, DriverError>;
}

/// Splits a transmitted SHIFT payload back into its contiguous TMS and TDI
/// streams. Inverse of the word interleaving done by
/// [`AxisJtagDriver::send_vectors`]; the loopback emulator uses it to check
/// traffic against its expectation script.
pub fn split_streams(payload: &[u8], num_bytes: usize, word_size: usize) -> (Vec<u8>, Vec<u8>) {
    let mut tms = Vec::with_capacity(num_bytes);
    let mut tdi = Vec::with_capacity(num_bytes);
    let mut off = 0;
    while tms.len() < num_bytes {
        let chunk = word_size.min(num_bytes - tms.len());
        tms.extend_from_slice(&payload[off..off + chunk]);
        off += chunk;
        tdi.extend_from_slice(&payload[off..off + chunk]);
        off += chunk;
    }
    (tms, tdi)
}

/// Protocol engine driving one AXIS-to-JTAG target through a [`Transport`].
///
/// Owns the transmit and receive buffers for the lifetime of the driver;
/// after a successful QUERY the buffers grow to the negotiated vector limit
/// and are never shrunk again.
pub struct AxisJtagDriver<T> {
    transport: T,
    caps: Capabilities,
    /// Last period a caller asked for, kept for reporting when the target
    /// has no fixed clock.
    requested_period_ns: Option<u32>,
    xids: XidGen,
    retry_limit: u32,
    drv_max_vector: usize,
    negotiated_max: usize,
    tx: Vec<u8>,
    rx_hdr: Vec<u8>,
    rx_payload: Vec<u8>,
}

impl<T: Transport> AxisJtagDriver<T> {
    /// Wraps `transport` into a driver declaring `max_vector_size` bytes as
    /// its per-call limit. The limit is clamped to what a single SHIFT
    /// header can describe.
    pub fn new(transport: T, max_vector_size: usize) -> AxisJtagDriver<T> {
        let drv_max_vector = max_vector_size.max(1).min(MAX_SHIFT_BITS as usize / 8);
        let mut driver = AxisJtagDriver {
            transport,
            caps: Capabilities::default(),
            requested_period_ns: None,
            xids: XidGen::new(),
            retry_limit: DEFAULT_RETRY_LIMIT,
            drv_max_vector,
            negotiated_max: drv_max_vector,
            tx: Vec::new(),
            rx_hdr: Vec::new(),
            rx_payload: Vec::new(),
        };
        driver.grow_buffers();
        driver
    }

    /// The capability snapshot from the most recent [`query`](JtagDriver::query).
    pub fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn grow_buffers(&mut self) {
        let wsz = self.caps.word_size;
        // streams are transmitted word-aligned, so round the limit up
        let stream = self.negotiated_max.div_ceil(wsz) * wsz;
        let tx_len = wsz + 2 * stream;
        if self.tx.len() < tx_len {
            self.tx.resize(tx_len, 0);
        }
        if self.rx_hdr.len() < wsz {
            self.rx_hdr.resize(wsz, 0);
        }
        if self.rx_payload.len() < stream {
            self.rx_payload.resize(stream, 0);
        }
    }

    /// Runs one exchange reliably: resends the identical request on
    /// transport timeouts and discards responses carrying a foreign
    /// transaction id, up to the retry budget.
    ///
    /// Resending is safe because a retried SHIFT is byte-identical to the
    /// original and therefore idempotent against the target's memory.
    fn xfer_rel(&mut self, tx_len: usize) -> Result<usize, DriverError> {
        let request = Header::from_bytes(&self.tx[..HEADER_SIZE]);
        let xid = request.xid();
        let attempts = self.retry_limit + 1;
        let wsz = self.caps.word_size;

        for attempt in 1..=attempts {
            log::trace!(
                "xfer attempt {}/{}: header 0x{:08x}, {} bytes",
                attempt,
                attempts,
                request.raw(),
                tx_len
            );
            let payload_len = match self.transport.xfer(
                &self.tx[..tx_len],
                &mut self.rx_hdr[..wsz],
                &mut self.rx_payload,
            ) {
                Ok(n) => n,
                Err(e) if e.is_timeout() => {
                    log::debug!("transport timeout on attempt {}/{}", attempt, attempts);
                    continue;
                }
                Err(other) => return Err(other),
            };

            let reply = Header::from_bytes(&self.rx_hdr[..HEADER_SIZE]);
            if reply.version() != PROTOCOL_VERSION {
                return Err(DriverError::Protocol {
                    code: ERR_BAD_VERSION,
                });
            }
            match reply.command() {
                Some(Command::Error) => {
                    return Err(DriverError::Protocol {
                        code: reply.error_code(),
                    });
                }
                Some(_) => {
                    if xid == XID_DONT_CARE || reply.xid() == xid {
                        return Ok(payload_len);
                    }
                    // stale or foreign response; the next receive may still
                    // carry ours
                    log::debug!("discarding response xid {} (wanted {})", reply.xid(), xid);
                }
                None => {
                    return Err(DriverError::Protocol {
                        code: ERR_BAD_COMMAND,
                    });
                }
            }
        }
        Err(DriverError::Timeout { attempts })
    }
}

impl<T: Transport> JtagDriver for AxisJtagDriver<T> {
    fn query(&mut self) -> Result<usize, DriverError> {
        let wsz = self.caps.word_size;
        Header::query().write_to(&mut self.tx[..wsz]);
        let _ = self.xfer_rel(wsz)?;

        let reply = QueryReply::parse(Header::from_bytes(&self.rx_hdr[..HEADER_SIZE]));
        if reply.word_size < HEADER_SIZE {
            log::error!(
                "target reports word size {} smaller than the header",
                reply.word_size
            );
            return Err(DriverError::Protocol {
                code: ERR_TRUNCATED,
            });
        }
        self.caps.word_size = reply.word_size;
        self.caps.mem_depth = reply.mem_depth;
        self.caps.period_ns = reply.period_ns();
        // A memory-less target executes every datagram it sees, so a blind
        // resend could double-execute a SHIFT. The transport must be
        // reliable instead.
        self.retry_limit = if reply.mem_depth == 0 {
            0
        } else {
            DEFAULT_RETRY_LIMIT
        };

        let target_max = reply.mem_depth as usize * reply.word_size;
        self.negotiated_max = if target_max > 0 {
            self.drv_max_vector.min(target_max)
        } else {
            self.drv_max_vector
        };
        self.grow_buffers();

        log::debug!(
            "query: word_size={} mem_depth={} period={:?} max_vector={}",
            self.caps.word_size,
            self.caps.mem_depth,
            self.caps.period_ns,
            self.negotiated_max
        );
        Ok(self.negotiated_max)
    }

    fn max_vector_size(&self) -> usize {
        self.drv_max_vector
    }

    fn set_period_ns(&mut self, requested_ns: u32) -> u32 {
        match self.caps.period_ns {
            Some(fixed) => fixed,
            None => {
                self.requested_period_ns = Some(requested_ns);
                requested_ns
            }
        }
    }

    fn send_vectors(
        &mut self,
        num_bits: usize,
        tms: &[u8],
        tdi: &[u8],
        tdo: &mut [u8],
    ) -> Result<(), DriverError> {
        assert!(num_bits >= 1, "cannot shift zero bits");
        let num_bytes = num_bits.div_ceil(8);
        assert!(
            num_bytes <= self.negotiated_max,
            "vector of {} bytes exceeds the negotiated limit of {}",
            num_bytes,
            self.negotiated_max
        );
        assert!(
            tms.len() >= num_bytes && tdi.len() >= num_bytes && tdo.len() >= num_bytes,
            "vector buffers shorter than the bit count"
        );

        let wsz = self.caps.word_size;
        let header = Header::shift(num_bits as u32, self.xids.next_id());
        header.write_to(&mut self.tx[..wsz]);

        // One TMS word followed by one TDI word per word-sized chunk; the
        // trailing partial word carries only the remaining bytes.
        let mut off = wsz;
        let full_words = num_bytes / wsz;
        for word in 0..full_words {
            let chunk = word * wsz;
            self.tx[off..off + wsz].copy_from_slice(&tms[chunk..chunk + wsz]);
            off += wsz;
            self.tx[off..off + wsz].copy_from_slice(&tdi[chunk..chunk + wsz]);
            off += wsz;
        }
        let rem = num_bytes % wsz;
        if rem > 0 {
            let chunk = full_words * wsz;
            self.tx[off..off + rem].copy_from_slice(&tms[chunk..chunk + rem]);
            off += rem;
            self.tx[off..off + rem].copy_from_slice(&tdi[chunk..chunk + rem]);
            off += rem;
        }

        log::trace!("shift TMS data: {:02x?}", &tms[..num_bytes]);
        log::trace!("shift TDI data: {:02x?}", &tdi[..num_bytes]);

        let payload_len = self.xfer_rel(off)?;
        if payload_len < num_bytes {
            log::error!(
                "short TDO payload: wanted {} bytes, got {}",
                num_bytes,
                payload_len
            );
            return Err(DriverError::Protocol {
                code: ERR_TRUNCATED,
            });
        }
        tdo[..num_bytes].copy_from_slice(&self.rx_payload[..num_bytes]);
        log::trace!("shift TDO data: {:02x?}", &tdo[..num_bytes]);
        Ok(())
    }

    fn dump_info(&self) {
        log::info!("word size      : {} bytes", self.caps.word_size);
        log::info!("memory depth   : {} words", self.caps.mem_depth);
        match (self.caps.period_ns, self.requested_period_ns) {
            (Some(fixed), _) => log::info!("clock period   : {} ns (fixed)", fixed),
            (None, Some(requested)) => {
                log::info!("clock period   : {} ns (as requested)", requested)
            }
            (None, None) => log::info!("clock period   : unknown"),
        }
        log::info!("max vector size: {} bytes", self.negotiated_max);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::VecDeque;

    /// Transport double whose responses are scripted up front.
    struct ScriptedTransport {
        replies: VecDeque<Scripted>,
        attempts: u32,
    }

    enum Scripted {
        Timeout,
        /// Raw header value plus payload bytes.
        Reply(u32, Vec<u8>),
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Scripted>) -> ScriptedTransport {
            ScriptedTransport {
                replies: replies.into(),
                attempts: 0,
            }
        }
    }

    impl Transport for ScriptedTransport {
        fn xfer(
            &mut self,
            _tx: &[u8],
            rx_hdr: &mut [u8],
            rx_payload: &mut [u8],
        ) -> Result<usize, DriverError> {
            self.attempts += 1;
            match self.replies.pop_front().expect("transport script exhausted") {
                Scripted::Timeout => Err(DriverError::Timeout { attempts: 1 }),
                Scripted::Reply(raw, payload) => {
                    rx_hdr.fill(0);
                    rx_hdr[..HEADER_SIZE].copy_from_slice(&raw.to_le_bytes());
                    rx_payload[..payload.len()].copy_from_slice(&payload);
                    Ok(payload.len())
                }
            }
        }
    }

    /// QUERY reply raw value for the given capabilities.
    fn query_raw(word_size: usize, mem_depth: u32, period_code: u32) -> u32 {
        (word_size as u32 - 1) | (mem_depth << 4) | (period_code << 20)
    }

    /// SHIFT echo raw value matching the engine's first generated xid.
    fn shift_raw(xid: u8, len_bits: u32) -> u32 {
        (0b01 << 28) | (u32::from(xid) << 20) | (len_bits - 1)
    }

    #[test]
    fn query_updates_capability_snapshot() {
        let transport = ScriptedTransport::new(vec![Scripted::Reply(query_raw(4, 256, 128), vec![])]);
        let mut driver = AxisJtagDriver::new(transport, 32768);
        let max = driver.query().unwrap();

        // depth 256 words of 4 bytes bounds the vector size below the
        // driver's own 32768-byte limit
        assert_eq!(max, 1024);
        let caps = driver.capabilities();
        assert_eq!(caps.word_size, 4);
        assert_eq!(caps.mem_depth, 256);
        assert_eq!(caps.period_ns, Some(500));
        assert_eq!(driver.retry_limit, DEFAULT_RETRY_LIMIT);
    }

    #[test]
    fn query_against_memoryless_target_disables_retries() {
        let transport = ScriptedTransport::new(vec![Scripted::Reply(query_raw(4, 0, 0), vec![])]);
        let mut driver = AxisJtagDriver::new(transport, 2048);
        assert_eq!(driver.query().unwrap(), 2048);
        assert_eq!(driver.retry_limit, 0);
        assert_eq!(driver.capabilities().period_ns, None);
    }

    #[test]
    fn fixed_target_period_wins_over_requested() {
        let transport = ScriptedTransport::new(vec![Scripted::Reply(query_raw(4, 16, 128), vec![])]);
        let mut driver = AxisJtagDriver::new(transport, 2048);
        driver.query().unwrap();
        assert_eq!(driver.set_period_ns(10), 500);

        // without a fixed period the requested value is authoritative
        let transport = ScriptedTransport::new(vec![Scripted::Reply(query_raw(4, 16, 0), vec![])]);
        let mut driver = AxisJtagDriver::new(transport, 2048);
        driver.query().unwrap();
        assert_eq!(driver.set_period_ns(10), 10);
        assert_eq!(driver.requested_period_ns, Some(10));
    }

    #[test]
    fn dropped_datagram_is_resent_and_succeeds() {
        let transport = ScriptedTransport::new(vec![
            Scripted::Reply(query_raw(4, 256, 0), vec![]),
            Scripted::Timeout,
            Scripted::Reply(shift_raw(1, 8), vec![0xA5]),
        ]);
        let mut driver = AxisJtagDriver::new(transport, 1024);
        driver.query().unwrap();

        let mut tdo = [0u8; 1];
        driver
            .send_vectors(8, &[0x0F], &[0x5A], &mut tdo)
            .unwrap();
        assert_eq!(tdo, [0xA5]);
        assert_eq!(driver.transport.attempts, 3); // 1 query + dropped + resend
    }

    #[test]
    fn stale_transaction_id_is_discarded() {
        let transport = ScriptedTransport::new(vec![
            Scripted::Reply(query_raw(4, 256, 0), vec![]),
            Scripted::Reply(shift_raw(99, 8), vec![0xEE]),
            Scripted::Reply(shift_raw(1, 8), vec![0x33]),
        ]);
        let mut driver = AxisJtagDriver::new(transport, 1024);
        driver.query().unwrap();

        let mut tdo = [0u8; 1];
        driver.send_vectors(8, &[0], &[0], &mut tdo).unwrap();
        assert_eq!(tdo, [0x33]);
    }

    #[test]
    fn timeout_after_exhausting_the_retry_budget() {
        let replies: Vec<Scripted> = (0..DEFAULT_RETRY_LIMIT + 1)
            .map(|_| Scripted::Timeout)
            .collect();
        let transport = ScriptedTransport::new(replies);
        let mut driver = AxisJtagDriver::new(transport, 1024);

        match driver.query() {
            Err(DriverError::Timeout { attempts }) => {
                assert_eq!(attempts, DEFAULT_RETRY_LIMIT + 1)
            }
            other => panic!("expected Timeout, got {:?}", other),
        }
        assert_eq!(driver.transport.attempts, DEFAULT_RETRY_LIMIT + 1);
    }

    #[test]
    fn target_errors_are_not_retried() {
        let error_raw = (0b10u32 << 28) | 4; // ERROR, feature not present
        let transport = ScriptedTransport::new(vec![Scripted::Reply(error_raw, vec![])]);
        let mut driver = AxisJtagDriver::new(transport, 1024);

        match driver.query() {
            Err(DriverError::Protocol { code }) => assert_eq!(code, 4),
            other => panic!("expected Protocol, got {:?}", other),
        }
        assert_eq!(driver.transport.attempts, 1);
    }

    #[test]
    fn nonzero_version_in_reply_is_a_protocol_error() {
        let transport = ScriptedTransport::new(vec![Scripted::Reply(1 << 30, vec![])]);
        let mut driver = AxisJtagDriver::new(transport, 1024);
        match driver.query() {
            Err(DriverError::Protocol { code }) => assert_eq!(code, ERR_BAD_VERSION),
            other => panic!("expected Protocol, got {:?}", other),
        }
    }

    #[test]
    fn short_tdo_payload_is_truncated_transfer() {
        let transport = ScriptedTransport::new(vec![
            Scripted::Reply(query_raw(4, 256, 0), vec![]),
            Scripted::Reply(shift_raw(1, 16), vec![0x01]), // one byte short
        ]);
        let mut driver = AxisJtagDriver::new(transport, 1024);
        driver.query().unwrap();

        let mut tdo = [0u8; 2];
        match driver.send_vectors(16, &[0, 0], &[0, 0], &mut tdo) {
            Err(DriverError::Protocol { code }) => assert_eq!(code, ERR_TRUNCATED),
            other => panic!("expected Protocol, got {:?}", other),
        }
    }

    #[test]
    fn split_streams_inverts_the_interleaving() {
        // 9 bytes at word size 4: two full words plus a 1-byte partial
        let tms: Vec<u8> = (0..9).collect();
        let tdi: Vec<u8> = (100..109).collect();
        let payload = [
            &tms[0..4], &tdi[0..4], &tms[4..8], &tdi[4..8], &tms[8..9], &tdi[8..9],
        ]
        .concat();
        let (got_tms, got_tdi) = split_streams(&payload, 9, 4);
        assert_eq!(got_tms, tms);
        assert_eq!(got_tdi, tdi);
    }

    /// Transport echoing the request TDI stream back as TDO, used to check
    /// the chunking round-trip bit-for-bit.
    struct EchoTransport {
        word_size: usize,
        echo_tms: bool,
    }

    impl Transport for EchoTransport {
        fn xfer(
            &mut self,
            tx: &[u8],
            rx_hdr: &mut [u8],
            rx_payload: &mut [u8],
        ) -> Result<usize, DriverError> {
            let header = Header::from_bytes(tx);
            match header.command() {
                Some(Command::Query) => {
                    let raw = query_raw(self.word_size, 4096, 0);
                    rx_hdr.fill(0);
                    rx_hdr[..HEADER_SIZE].copy_from_slice(&raw.to_le_bytes());
                    Ok(0)
                }
                Some(Command::Shift) => {
                    let num_bytes = (header.len_bits() as usize).div_ceil(8);
                    let (tms, tdi) = split_streams(&tx[self.word_size..], num_bytes, self.word_size);
                    let echoed = if self.echo_tms { tms } else { tdi };
                    rx_hdr.fill(0);
                    rx_hdr[..HEADER_SIZE].copy_from_slice(&tx[..HEADER_SIZE]);
                    rx_payload[..num_bytes].copy_from_slice(&echoed);
                    Ok(num_bytes)
                }
                _ => panic!("unexpected command"),
            }
        }
    }

    fn patterned(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    fn mask_last_byte(buf: &mut [u8], num_bits: usize) {
        let rem = num_bits % 8;
        if rem != 0 {
            if let Some(last) = buf.last_mut() {
                *last &= (1u8 << rem) - 1;
            }
        }
    }

    #[test]
    fn chunking_round_trips_bit_for_bit() {
        for word_size in [4usize, 8] {
            for num_bits in [1usize, 7, 8, 9, 31, 32, 33, 1000] {
                for echo_tms in [false, true] {
                    let num_bytes = num_bits.div_ceil(8);
                    let tms = patterned(num_bytes, 3);
                    let tdi = patterned(num_bytes, 77);
                    let mut driver = AxisJtagDriver::new(
                        EchoTransport { word_size, echo_tms },
                        32768,
                    );
                    driver.query().unwrap();
                    assert_eq!(driver.capabilities().word_size, word_size);

                    let mut tdo = vec![0u8; num_bytes];
                    driver.send_vectors(num_bits, &tms, &tdi, &mut tdo).unwrap();

                    let mut expected = if echo_tms { tms.clone() } else { tdi.clone() };
                    mask_last_byte(&mut expected, num_bits);
                    mask_last_byte(&mut tdo, num_bits);
                    assert_eq!(
                        tdo, expected,
                        "word_size={} num_bits={} echo_tms={}",
                        word_size, num_bits, echo_tms
                    );
                }
            }
        }
    }

    #[test]
    #[should_panic(expected = "negotiated limit")]
    fn oversized_vector_is_a_contract_violation() {
        let transport = ScriptedTransport::new(vec![Scripted::Reply(query_raw(4, 1, 0), vec![])]);
        let mut driver = AxisJtagDriver::new(transport, 1024);
        driver.query().unwrap(); // negotiated limit: 1 word = 4 bytes
        let mut tdo = [0u8; 8];
        let _ = driver.send_vectors(64, &[0; 8], &[0; 8], &mut tdo);
    }
}
