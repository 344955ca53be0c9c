//! Adaptadores de fonte: produzem registros canônicos a cada tick.
//!
//! - [`FilePollingAdapter`] – varre um diretório de logs de texto
//! - [`BurnsysAdapter`] – lê frames binários do cartão em serial dedicada

mod burnsys;
mod file_polling;

pub use burnsys::BurnsysAdapter;
pub use file_polling::FilePollingAdapter;

use crate::link::PortOpener;
use bridge_core::config::{BridgeConfig, SourceKind};
use bridge_core::frame::{FrameCodec, FrameError};
use bridge_core::identity::BoardIdentity;
use bridge_core::parsers::ParseError;
use bridge_core::tail::TailError;
use bridge_core::types::{CanonicalRecord, UnknownChannel};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Erro local de um tick; reportado sem interromper o loop.
#[derive(Debug, thiserror::Error)]
pub enum AdapterIssue {
    #[error("{}: {error}", .file.display())]
    Parse { file: PathBuf, error: ParseError },

    #[error("Frame descartado: {0}")]
    Frame(#[from] FrameError),

    #[error(transparent)]
    FileIo(#[from] TailError),

    #[error("{0}")]
    Notice(String),
}

/// Falha irrecuperável do dispositivo; encerra o loop do adaptador.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("Falha de I/O no dispositivo {device}: {source}")]
    Device {
        device: String,
        #[source]
        source: std::io::Error,
    },
}

/// Falhas ao construir um adaptador a partir da config.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Sequence(#[from] UnknownChannel),

    #[error("Não foi possível abrir {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: std::io::Error,
    },
}

/// Resultado de um tick.
#[derive(Debug, Default)]
pub struct PollOutcome {
    pub records: Vec<CanonicalRecord>,
    pub issues: Vec<AdapterIssue>,
}

impl PollOutcome {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.issues.is_empty()
    }
}

/// Capacidade comum: produzir registros e reportar erros sem abortar.
pub trait SourceAdapter: Send {
    fn name(&self) -> &'static str;

    /// Executa um tick. `Err` só para falha irrecuperável do dispositivo.
    fn poll(&mut self) -> Result<PollOutcome, AdapterError>;

    /// Pausa antes do próximo tick, dado se este produziu registros.
    fn next_delay(&self, produced: bool) -> Duration;
}

/// Instancia o adaptador selecionado na config.
pub fn build_adapter(
    config: &BridgeConfig,
    opener: &dyn PortOpener,
    identity: Arc<Mutex<BoardIdentity>>,
) -> Result<Box<dyn SourceAdapter>, BuildError> {
    match config.source.kind {
        SourceKind::FilePolling => {
            let adapter = FilePollingAdapter::new(&config.source.file)?;
            Ok(Box::new(adapter))
        }
        SourceKind::BinarySerial => {
            let serial = &config.source.serial;
            let port = opener
                .open(
                    &serial.device,
                    serial.baud_rate,
                    Duration::from_millis(serial.read_timeout_ms),
                )
                .map_err(|source| BuildError::Open {
                    device: serial.device.clone(),
                    source,
                })?;
            Ok(Box::new(BurnsysAdapter::new(
                serial.device.clone(),
                port,
                FrameCodec::new(serial.verify_crc),
                identity,
                Duration::from_millis(serial.idle_sleep_ms),
            )))
        }
    }
}
