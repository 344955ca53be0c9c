//! Tipos canônicos de telemetria das placas de sensores.
//!
//! Todo adaptador de fonte (log de texto, cartão binário Burnsys, variante
//! treebeard) normaliza suas leituras para um [`CanonicalRecord`].

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sentinela encaminhado verbatim quando uma coluna não existe na linha.
pub const MISSING_SENTINEL: &str = "N/A";

// ──────────────────────────────────────────────
// Canais
// ──────────────────────────────────────────────

/// Identificador de canal de sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelKey {
    P1,
    P2,
    T1,
    T2,
    Vx,
    Vz,
    Ct,
    Vt,
}

impl ChannelKey {
    /// Ordem dos canais no frame do cartão (e ordem padrão da sequência).
    pub const ALL: [ChannelKey; 8] = [
        ChannelKey::P1,
        ChannelKey::P2,
        ChannelKey::T1,
        ChannelKey::T2,
        ChannelKey::Vx,
        ChannelKey::Vz,
        ChannelKey::Ct,
        ChannelKey::Vt,
    ];

    /// Seis canais obrigatórios do formato treebeard.
    pub const TREEBEARD_CORE: [ChannelKey; 6] = [
        ChannelKey::P1,
        ChannelKey::P2,
        ChannelKey::T1,
        ChannelKey::T2,
        ChannelKey::Vx,
        ChannelKey::Vz,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKey::P1 => "P1",
            ChannelKey::P2 => "P2",
            ChannelKey::T1 => "T1",
            ChannelKey::T2 => "T2",
            ChannelKey::Vx => "Vx",
            ChannelKey::Vz => "Vz",
            ChannelKey::Ct => "Ct",
            ChannelKey::Vt => "Vt",
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chave de canal desconhecida.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Canal desconhecido: {0:?}")]
pub struct UnknownChannel(pub String);

impl FromStr for ChannelKey {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChannelKey::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownChannel(s.to_string()))
    }
}

/// Converte uma sequência separada por espaços (`"P1 P2 T1"`) em chaves.
pub fn parse_sequence(sequence: &str) -> Result<Vec<ChannelKey>, UnknownChannel> {
    sequence.split_whitespace().map(str::parse).collect()
}

// ──────────────────────────────────────────────
// Leituras
// ──────────────────────────────────────────────

/// Valor de um canal: número ou o sentinela `N/A`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Reading {
    Value(f64),
    Missing,
}

impl Reading {
    /// Interpreta um token de texto; tokens não numéricos viram `Missing`.
    pub fn from_token(token: Option<&str>) -> Self {
        token
            .and_then(|t| t.parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .map_or(Reading::Missing, Reading::Value)
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Value(v) => write!(f, "{v}"),
            Reading::Missing => f.write_str(MISSING_SENTINEL),
        }
    }
}

// ──────────────────────────────────────────────
// Identidade da placa
// ──────────────────────────────────────────────

/// Identidade atribuída a uma leitura.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoardId {
    /// Contador sequencial (adaptador binário).
    Counter(u32),
    /// Dígitos extraídos do nome do arquivo, preservados como texto.
    Named(String),
    /// Nome de arquivo sem dígitos.
    Unknown,
}

impl BoardId {
    /// Renderiza a identidade; `width` aplica zero-padding só ao contador.
    pub fn render(&self, width: usize) -> String {
        match self {
            BoardId::Counter(n) => format!("{n:0width$}"),
            BoardId::Named(digits) => digits.clone(),
            BoardId::Unknown => "Unknown".into(),
        }
    }
}

impl fmt::Display for BoardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(0))
    }
}

// ──────────────────────────────────────────────
// Registro canônico
// ──────────────────────────────────────────────

/// Leitura normalizada de uma placa.
///
/// Os canais ficam na ordem em que devem ser encaminhados: a sequência
/// configurada, a ordem fixa treebeard ou a ordem do frame binário.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub board: BoardId,
    pub timestamp: Option<NaiveDateTime>,
    pub channels: Vec<(ChannelKey, Reading)>,
}

impl CanonicalRecord {
    pub fn new(board: BoardId) -> Self {
        Self {
            board,
            timestamp: None,
            channels: Vec::with_capacity(ChannelKey::ALL.len()),
        }
    }

    pub fn get(&self, key: ChannelKey) -> Option<Reading> {
        self.channels
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, r)| *r)
    }
}
