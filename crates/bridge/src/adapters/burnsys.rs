//! Fonte binária: cartão Burnsys numa porta serial exclusiva.
//!
//! Os bytes lidos se acumulam até o tamanho anunciado no cabeçalho Modbus
//! (`[slave][0x03][n][n bytes][crc]`). Um fragmento que fica sem
//! continuação por uma leitura vazia é descartado como frame curto.

use super::{AdapterError, AdapterIssue, PollOutcome, SourceAdapter};
use crate::link::Transport;
use bridge_core::frame::{FrameCodec, FrameError};
use bridge_core::identity::BoardIdentity;
use bridge_core::types::BoardId;
use std::io::{ErrorKind, Read};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Maior frame esperado do cartão, com folga.
const READ_BUFFER: usize = 256;

/// Slave, função e contagem de bytes.
const HEADER_LEN: usize = 3;
const CRC_LEN: usize = 2;

pub struct BurnsysAdapter {
    device: String,
    port: Box<dyn Transport>,
    codec: FrameCodec,
    identity: Arc<Mutex<BoardIdentity>>,
    idle_sleep: Duration,
    buf: [u8; READ_BUFFER],
    /// Bytes de um frame ainda incompleto
    pending: Vec<u8>,
}

impl BurnsysAdapter {
    pub fn new(
        device: String,
        port: Box<dyn Transport>,
        codec: FrameCodec,
        identity: Arc<Mutex<BoardIdentity>>,
        idle_sleep: Duration,
    ) -> Self {
        Self {
            device,
            port,
            codec,
            identity,
            idle_sleep,
            buf: [0u8; READ_BUFFER],
            pending: Vec::with_capacity(READ_BUFFER),
        }
    }

    fn identity(&self) -> MutexGuard<'_, BoardIdentity> {
        self.identity.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Tamanho total anunciado pelo cabeçalho, se já recebido.
    fn expected_len(&self) -> Option<usize> {
        self.pending
            .get(HEADER_LEN - 1)
            .map(|&count| HEADER_LEN + usize::from(count) + CRC_LEN)
    }

    fn decode_into(&self, frame: &[u8], outcome: &mut PollOutcome) {
        match self.codec.decode(frame) {
            Ok(decoded) => {
                // Identidade calculada antes do encaminhamento
                let id = self.identity().record_success_at(Instant::now());
                debug!("Frame de {} bytes → placa {id}", frame.len());
                outcome
                    .records
                    .push(decoded.into_record(BoardId::Counter(id)));
            }
            Err(e) => outcome.issues.push(e.into()),
        }
    }

    /// Extrai todos os frames completos do buffer.
    fn extract_frames(&mut self, outcome: &mut PollOutcome) {
        while let Some(len) = self.expected_len() {
            if self.pending.len() < len {
                break;
            }
            let frame: Vec<u8> = self.pending.drain(..len).collect();
            self.decode_into(&frame, outcome);
        }
        if self.pending.len() > READ_BUFFER {
            outcome
                .issues
                .push(FrameError::TooShort(self.pending.len()).into());
            self.pending.clear();
        }
    }

    /// Leitura vazia com fragmento pendente: o resto não vem mais.
    fn discard_fragment(&mut self, outcome: &mut PollOutcome) {
        if self.pending.is_empty() {
            return;
        }
        let fragment = std::mem::take(&mut self.pending);
        debug!("Fragmento de {} bytes sem continuação", fragment.len());
        self.decode_into(&fragment, outcome);
    }
}

impl SourceAdapter for BurnsysAdapter {
    fn name(&self) -> &'static str {
        "burnsys"
    }

    fn poll(&mut self) -> Result<PollOutcome, AdapterError> {
        let mut outcome = PollOutcome::default();

        if self.identity().expire_if_silent(Instant::now()) {
            info!("Cartão em silêncio além da janela, numeração volta para 1");
            outcome.issues.push(AdapterIssue::Notice(
                "Silêncio do cartão: numeração das placas reiniciada".into(),
            ));
        }

        let n = match self.port.read(&mut self.buf) {
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                0
            }
            Err(source) => {
                return Err(AdapterError::Device {
                    device: self.device.clone(),
                    source,
                });
            }
        };

        if n == 0 {
            self.discard_fragment(&mut outcome);
        } else {
            self.pending.extend_from_slice(&self.buf[..n]);
            self.extract_frames(&mut outcome);
        }

        Ok(outcome)
    }

    fn next_delay(&self, produced: bool) -> Duration {
        if produced || !self.pending.is_empty() {
            Duration::ZERO
        } else {
            self.idle_sleep
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::PortOpener;
    use crate::link::testing::MemoryOpener;
    use bridge_core::frame::{CardFrame, encode_frame};
    use bridge_core::types::{ChannelKey, Reading};

    fn adapter(opener: &MemoryOpener, timeout: Duration) -> (BurnsysAdapter, Arc<Mutex<BoardIdentity>>) {
        let identity = Arc::new(Mutex::new(BoardIdentity::new(timeout)));
        let port = opener.open("COM16", 9600, Duration::from_millis(10)).unwrap();
        let adapter = BurnsysAdapter::new(
            "COM16".into(),
            port,
            FrameCodec::default(),
            identity.clone(),
            Duration::from_millis(100),
        );
        (adapter, identity)
    }

    fn frame(p1_tenths: u16) -> Vec<u8> {
        encode_frame(&CardFrame {
            slave_id: 10,
            raw: [p1_tenths, 2, 3, 4, 1500, 250, 7, 8],
        })
    }

    #[test]
    fn successive_frames_get_increasing_identity() {
        let opener = MemoryOpener::default();
        let (mut adapter, _) = adapter(&opener, Duration::from_secs(1200));
        let port = opener.port("COM16");
        port.push_incoming(&frame(250));
        port.push_incoming(&frame(251));

        let first = adapter.poll().unwrap();
        let second = adapter.poll().unwrap();
        assert_eq!(first.records[0].board, BoardId::Counter(1));
        assert_eq!(second.records[0].board, BoardId::Counter(2));
        assert_eq!(first.records[0].get(ChannelKey::P1), Some(Reading::Value(25.0)));
        assert_eq!(first.records[0].get(ChannelKey::Vx), Some(Reading::Value(1.5)));
        assert_eq!(adapter.next_delay(true), Duration::ZERO);
    }

    #[test]
    fn short_read_is_reported_and_identity_untouched() {
        let opener = MemoryOpener::default();
        let (mut adapter, identity) = adapter(&opener, Duration::from_secs(1200));
        opener.port("COM16").push_incoming(b"\x02\x03\x04\x00\xf8\x00\xfa\xc8\x81");

        let outcome = adapter.poll().unwrap();
        assert!(outcome.records.is_empty());
        assert!(matches!(
            outcome.issues.as_slice(),
            [AdapterIssue::Frame(FrameError::TooShort(9))]
        ));
        let identity = identity.lock().unwrap();
        assert_eq!(identity.current(), 1);
        assert_eq!(identity.last_success(), None);
    }

    #[test]
    fn empty_read_is_quiet() {
        let opener = MemoryOpener::default();
        let (mut adapter, _) = adapter(&opener, Duration::from_secs(1200));
        assert!(adapter.poll().unwrap().is_empty());
        assert_eq!(adapter.next_delay(false), Duration::from_millis(100));
    }

    #[test]
    fn silence_resets_numbering() {
        let opener = MemoryOpener::default();
        let (mut adapter, identity) = adapter(&opener, Duration::from_millis(30));
        let port = opener.port("COM16");
        port.push_incoming(&frame(1));
        port.push_incoming(&frame(2));
        adapter.poll().unwrap();
        adapter.poll().unwrap();
        assert_eq!(identity.lock().unwrap().current(), 3);

        std::thread::sleep(Duration::from_millis(60));
        port.push_incoming(&frame(3));
        let outcome = adapter.poll().unwrap();
        assert_eq!(outcome.records[0].board, BoardId::Counter(1));
        assert!(matches!(outcome.issues.as_slice(), [AdapterIssue::Notice(_)]));
    }

    #[test]
    fn frame_split_across_reads_is_reassembled() {
        let opener = MemoryOpener::default();
        let (mut adapter, _) = adapter(&opener, Duration::from_secs(1200));
        let port = opener.port("COM16");
        let bytes = frame(250);
        port.push_incoming(&bytes[..20]);
        port.push_incoming(&bytes[20..]);

        let first = adapter.poll().unwrap();
        assert!(first.is_empty());
        assert_eq!(adapter.next_delay(false), Duration::ZERO);

        let second = adapter.poll().unwrap();
        assert!(second.issues.is_empty(), "{:?}", second.issues);
        assert_eq!(second.records[0].board, BoardId::Counter(1));
        assert_eq!(second.records[0].get(ChannelKey::P1), Some(Reading::Value(25.0)));
    }

    #[test]
    fn two_frames_in_one_read() {
        let opener = MemoryOpener::default();
        let (mut adapter, _) = adapter(&opener, Duration::from_secs(1200));
        let mut bytes = frame(1);
        bytes.extend(frame(2));
        opener.port("COM16").push_incoming(&bytes);

        let outcome = adapter.poll().unwrap();
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[1].board, BoardId::Counter(2));
    }

    #[test]
    fn abandoned_fragment_is_discarded() {
        let opener = MemoryOpener::default();
        let (mut adapter, identity) = adapter(&opener, Duration::from_secs(1200));
        let port = opener.port("COM16");
        port.push_incoming(&frame(1)[..20]);

        assert!(adapter.poll().unwrap().is_empty());
        let outcome = adapter.poll().unwrap();
        assert!(matches!(
            outcome.issues.as_slice(),
            [AdapterIssue::Frame(FrameError::TooShort(20))]
        ));

        // O próximo frame inteiro ainda é decodificado
        port.push_incoming(&frame(3));
        assert_eq!(adapter.poll().unwrap().records.len(), 1);
        assert_eq!(identity.lock().unwrap().current(), 2);
    }

    #[test]
    fn device_failure_is_fatal() {
        let opener = MemoryOpener::default();
        let (mut adapter, _) = adapter(&opener, Duration::from_secs(1200));
        opener.port("COM16").set_fail_reads(true);
        assert!(matches!(adapter.poll(), Err(AdapterError::Device { .. })));
    }
}
