//! # Bridge Core
//!
//! Crate compartilhada da ponte de telemetria dos fornos: tipos canônicos,
//! codec do frame binário Burnsys, tail incremental de logs, parsers dos
//! formatos de texto, numeração das placas, protocolo de linha com o
//! controlador e configuração TOML.
//!
//! ## Módulos
//! - [`types`] – Canais, leituras e registro canônico
//! - [`frame`] – Decode/encode do frame do cartão (Modbus RTU)
//! - [`tail`] – Cursores por arquivo e última linha completa
//! - [`parsers`] – Formatos normal e treebeard
//! - [`identity`] – Contador de placas com reset por silêncio
//! - [`protocol`] – Comandos e linha `Board:` do downstream
//! - [`config`] – Configuração unificada via TOML

pub mod types;
pub mod frame;
pub mod tail;
pub mod parsers;
pub mod identity;
pub mod protocol;
pub mod config;

// Re-exports convenientes
pub use types::{BoardId, CanonicalRecord, ChannelKey, Reading};
pub use frame::{FrameCodec, FrameError, decode_frame, encode_frame};
pub use tail::{TailError, TailReader, last_complete_line};
pub use parsers::{ParseError, TextFormat, TreebeardLayout};
pub use identity::BoardIdentity;
pub use protocol::{Command, format_record};
pub use config::{BridgeConfig, SourceKind};
