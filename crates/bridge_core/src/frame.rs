//! Codec do frame binário do cartão Burnsys.
//!
//! O cartão responde como um escravo Modbus RTU (função 0x03):
//!
//! ```text
//! ┌──────────┬─────────┬──────────┬────────────────────────────┬─────────┐
//! │ Slave(1) │ Fn(1)   │ Count(1) │ Registros BE (8 × 2 + pad) │ CRC(2)  │
//! └──────────┴─────────┴──────────┴────────────────────────────┴─────────┘
//! ```
//!
//! Os oito canais ficam nos offsets 3, 5, …, 17 como `u16` big-endian.
//! P1, P2, T1, T2, Ct e Vt estão em décimos; Vx e Vz em milésimos.
//! Nenhum estado: só bytes → leituras e leituras → bytes.

use crate::types::{BoardId, CanonicalRecord, ChannelKey, Reading};

/// Tamanho mínimo aceito para decodificar um frame.
pub const MIN_FRAME_LEN: usize = 28;

/// Offset do primeiro registro de canal.
const CHANNEL_OFFSET: usize = 3;

/// Código de função Modbus "read holding registers".
pub const FUNCTION_READ_HOLDING: u8 = 0x03;

/// Bytes de dados que o cartão envia (20 registros).
const PAYLOAD_LEN: usize = 0x28;

/// Tamanho do frame completo gerado por [`encode_frame`].
pub const FULL_FRAME_LEN: usize = CHANNEL_OFFSET + PAYLOAD_LEN + 2;

/// Erros de decodificação do frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Frame muito curto ({0} bytes, mínimo {MIN_FRAME_LEN})")]
    TooShort(usize),

    #[error("CRC inválido: calculado 0x{expected:04X}, recebido 0x{found:04X}")]
    CrcMismatch { expected: u16, found: u16 },
}

/// Divisor de escala de cada canal.
pub fn scale_for(key: ChannelKey) -> f64 {
    match key {
        ChannelKey::Vx | ChannelKey::Vz => 1000.0,
        _ => 10.0,
    }
}

/// Frame decodificado: registros crus na ordem de [`ChannelKey::ALL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardFrame {
    pub slave_id: u8,
    pub raw: [u16; 8],
}

impl CardFrame {
    /// Valores já divididos pela escala de cada canal.
    pub fn scaled(&self) -> [(ChannelKey, f64); 8] {
        let mut out = [(ChannelKey::P1, 0.0); 8];
        for (i, key) in ChannelKey::ALL.into_iter().enumerate() {
            out[i] = (key, f64::from(self.raw[i]) / scale_for(key));
        }
        out
    }

    /// Reconstrói os registros crus a partir de valores escalados.
    pub fn from_scaled(slave_id: u8, values: &[f64; 8]) -> Self {
        let mut raw = [0u16; 8];
        for (i, key) in ChannelKey::ALL.into_iter().enumerate() {
            let scaled = (values[i] * scale_for(key)).round();
            raw[i] = scaled.clamp(0.0, f64::from(u16::MAX)) as u16;
        }
        Self { slave_id, raw }
    }

    pub fn into_record(self, board: BoardId) -> CanonicalRecord {
        let mut record = CanonicalRecord::new(board);
        record.channels = self
            .scaled()
            .into_iter()
            .map(|(k, v)| (k, Reading::Value(v)))
            .collect();
        record
    }
}

/// Codec configurável (verificação de CRC opcional).
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec {
    pub verify_crc: bool,
}

impl FrameCodec {
    pub fn new(verify_crc: bool) -> Self {
        Self { verify_crc }
    }

    /// Decodifica um frame. Frames curtos nunca são decodificados parcialmente.
    pub fn decode(&self, data: &[u8]) -> Result<CardFrame, FrameError> {
        if data.len() < MIN_FRAME_LEN {
            return Err(FrameError::TooShort(data.len()));
        }

        if self.verify_crc {
            let (body, tail) = data.split_at(data.len() - 2);
            let expected = crc16_modbus(body);
            let found = u16::from_le_bytes([tail[0], tail[1]]);
            if expected != found {
                return Err(FrameError::CrcMismatch { expected, found });
            }
        }

        let mut raw = [0u16; 8];
        for (i, slot) in raw.iter_mut().enumerate() {
            let at = CHANNEL_OFFSET + i * 2;
            *slot = u16::from_be_bytes([data[at], data[at + 1]]);
        }

        Ok(CardFrame {
            slave_id: data[0],
            raw,
        })
    }
}

/// Atalho para [`FrameCodec::decode`] sem verificação de CRC.
pub fn decode_frame(data: &[u8]) -> Result<CardFrame, FrameError> {
    FrameCodec::default().decode(data)
}

/// Monta um frame completo (cabeçalho, registros, padding, CRC).
pub fn encode_frame(frame: &CardFrame) -> Vec<u8> {
    let mut out = Vec::with_capacity(FULL_FRAME_LEN);
    out.push(frame.slave_id);
    out.push(FUNCTION_READ_HOLDING);
    out.push(PAYLOAD_LEN as u8);
    for value in frame.raw {
        out.extend_from_slice(&value.to_be_bytes());
    }
    out.resize(CHANNEL_OFFSET + PAYLOAD_LEN, 0);
    let crc = crc16_modbus(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

/// CRC-16/MODBUS (poly 0xA001 refletido, init 0xFFFF).
pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
