//! Protocolo de linha com o controlador do forno (downstream).
//!
//! Cada comando é uma linha ASCII terminada em `\n`:
//!
//! ```text
//! CONNECT <nome>
//! JSON:<config serializada>
//! ACTIVE
//! IDLE
//! DISCONNECT
//! Board: <NN> P1:<v> P2:<v> …
//! ```

use crate::types::CanonicalRecord;
use std::fmt;

/// Terminador de linha do protocolo.
pub const LINE_END: char = '\n';

/// Erros ao montar uma linha do protocolo.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Linha contém terminador interno")]
    EmbeddedNewline,
}

/// Comando enviado ao controlador.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Connect(String),
    Json(String),
    Active,
    Idle,
    Disconnect,
    /// Linha `Board:` já formatada por [`format_record`].
    Record(String),
}

impl Command {
    /// Linha pronta para escrita, com `\n`.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let body = self.to_string();
        if body.contains(['\n', '\r']) {
            return Err(ProtocolError::EmbeddedNewline);
        }
        let mut line = body;
        line.push(LINE_END);
        Ok(line)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Connect(name) => write!(f, "CONNECT {name}"),
            Command::Json(payload) => write!(f, "JSON:{payload}"),
            Command::Active => f.write_str("ACTIVE"),
            Command::Idle => f.write_str("IDLE"),
            Command::Disconnect => f.write_str("DISCONNECT"),
            Command::Record(line) => f.write_str(line),
        }
    }
}

/// Formata um registro como `Board: <id> K:v K:v …`.
///
/// `id_width` aplica zero-padding ao contador (0 = sem padding).
pub fn format_record(record: &CanonicalRecord, id_width: usize) -> String {
    let mut line = format!("Board: {}", record.board.render(id_width));
    for (key, reading) in &record.channels {
        line.push(' ');
        line.push_str(key.as_str());
        line.push(':');
        line.push_str(&reading.to_string());
    }
    line
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoardId, ChannelKey, Reading};

    #[test]
    fn commands_encode_as_lines() {
        assert_eq!(Command::Connect("Gimli".into()).encode().unwrap(), "CONNECT Gimli\n");
        assert_eq!(Command::Json("{\"a\":1}".into()).encode().unwrap(), "JSON:{\"a\":1}\n");
        assert_eq!(Command::Active.encode().unwrap(), "ACTIVE\n");
        assert_eq!(Command::Idle.encode().unwrap(), "IDLE\n");
        assert_eq!(Command::Disconnect.encode().unwrap(), "DISCONNECT\n");
    }

    #[test]
    fn rejects_embedded_newline() {
        assert_eq!(
            Command::Connect("a\nb".into()).encode(),
            Err(ProtocolError::EmbeddedNewline)
        );
    }

    #[test]
    fn record_line_format() {
        let mut rec = CanonicalRecord::new(BoardId::Counter(4));
        rec.channels = vec![
            (ChannelKey::P1, Reading::Value(99.0)),
            (ChannelKey::Vx, Reading::Value(0.147)),
            (ChannelKey::Ct, Reading::Missing),
        ];
        assert_eq!(format_record(&rec, 2), "Board: 04 P1:99 Vx:0.147 Ct:N/A");
        assert_eq!(format_record(&rec, 0), "Board: 4 P1:99 Vx:0.147 Ct:N/A");

        let line = Command::Record(format_record(&rec, 2)).encode().unwrap();
        assert_eq!(line, "Board: 04 P1:99 Vx:0.147 Ct:N/A\n");
    }
}
