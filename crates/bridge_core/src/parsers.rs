//! Parsers dos formatos de texto das placas.
//!
//! - **Normal**: `data hora <seq> v1 v2 …`, valores mapeados na ordem da
//!   sequência configurada.
//! - **Treebeard**: colunas fixas por canal, índices vindos da config.
//!
//! Linhas curtas geram [`ParseError`], nunca registro parcial. Tokens não
//! numéricos ou colunas fora do alcance viram o sentinela `N/A`.

use crate::types::{BoardId, CanonicalRecord, ChannelKey, Reading};
use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;

/// Formatos de timestamp aceitos nas duas primeiras colunas.
const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%d/%m/%Y %H:%M:%S%.f"];

/// Tokens antes dos valores no formato normal: data, hora e marcador.
const NORMAL_PREFIX_TOKENS: usize = 3;

static FIRST_DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());
static UNDERSCORE_DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_(\d+)_").unwrap());

/// Erros de parse de linha.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Linha vazia")]
    EmptyLine,

    #[error("Tokens insuficientes ({found}, mínimo {required})")]
    TooFewTokens { found: usize, required: usize },

    #[error("Timestamp inválido: {0:?}")]
    BadTimestamp(String),
}

/// Formato de texto selecionado na config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    Normal,
    Treebeard,
}

/// Índices de coluna do formato treebeard (posição no split por espaços).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreebeardLayout {
    pub p1: usize,
    pub p2: usize,
    pub t1: usize,
    pub t2: usize,
    pub vx: usize,
    pub vz: usize,
    /// Ausente nas placas mais antigas
    pub ct: Option<usize>,
    pub vt: Option<usize>,
}

impl Default for TreebeardLayout {
    fn default() -> Self {
        Self {
            p1: 2,
            p2: 3,
            t1: 4,
            t2: 5,
            vx: 6,
            vz: 7,
            ct: None,
            vt: None,
        }
    }
}

impl TreebeardLayout {
    /// Colunas na ordem fixa de encaminhamento treebeard.
    pub fn columns(&self) -> [(ChannelKey, Option<usize>); 8] {
        [
            (ChannelKey::P1, Some(self.p1)),
            (ChannelKey::P2, Some(self.p2)),
            (ChannelKey::T1, Some(self.t1)),
            (ChannelKey::T2, Some(self.t2)),
            (ChannelKey::Vx, Some(self.vx)),
            (ChannelKey::Vz, Some(self.vz)),
            (ChannelKey::Ct, self.ct),
            (ChannelKey::Vt, self.vt),
        ]
    }

    /// Quantidade mínima de tokens: cobre os seis canais obrigatórios.
    pub fn min_tokens(&self) -> usize {
        let deepest = [self.p1, self.p2, self.t1, self.t2, self.vx, self.vz]
            .into_iter()
            .max()
            .unwrap_or(0);
        (deepest + 1).max(ChannelKey::TREEBEARD_CORE.len())
    }
}

fn parse_timestamp(date: &str, time: &str) -> Option<NaiveDateTime> {
    let joined = format!("{date} {time}");
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&joined, fmt).ok())
}

/// Formato normal: `data hora <marcador> v1 … vN` com N = `sequence.len()`.
pub fn parse_normal(
    line: &str,
    sequence: &[ChannelKey],
    board: BoardId,
) -> Result<CanonicalRecord, ParseError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(ParseError::EmptyLine);
    }

    let required = NORMAL_PREFIX_TOKENS + sequence.len();
    if tokens.len() < required {
        return Err(ParseError::TooFewTokens {
            found: tokens.len(),
            required,
        });
    }

    let timestamp = parse_timestamp(tokens[0], tokens[1])
        .ok_or_else(|| ParseError::BadTimestamp(format!("{} {}", tokens[0], tokens[1])))?;

    let mut record = CanonicalRecord::new(board);
    record.timestamp = Some(timestamp);
    record.channels = sequence
        .iter()
        .enumerate()
        .map(|(i, &key)| {
            let token = tokens.get(NORMAL_PREFIX_TOKENS + i).copied();
            (key, Reading::from_token(token))
        })
        .collect();
    Ok(record)
}

/// Formato treebeard: cada canal lido de sua coluna fixa.
pub fn parse_treebeard(
    line: &str,
    layout: &TreebeardLayout,
    board: BoardId,
) -> Result<CanonicalRecord, ParseError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(ParseError::EmptyLine);
    }

    let required = layout.min_tokens();
    if tokens.len() < required {
        return Err(ParseError::TooFewTokens {
            found: tokens.len(),
            required,
        });
    }

    let mut record = CanonicalRecord::new(board);
    // Timestamp é opcional neste formato
    record.timestamp = match (tokens.first(), tokens.get(1)) {
        (Some(d), Some(t)) => parse_timestamp(d, t),
        _ => None,
    };
    record.channels = layout
        .columns()
        .into_iter()
        .map(|(key, column)| {
            let token = column.and_then(|c| tokens.get(c).copied());
            (key, Reading::from_token(token))
        })
        .collect();
    Ok(record)
}

/// Despacha para o parser do formato selecionado.
pub fn parse_line(
    line: &str,
    format: TextFormat,
    sequence: &[ChannelKey],
    layout: &TreebeardLayout,
    board: BoardId,
) -> Result<CanonicalRecord, ParseError> {
    match format {
        TextFormat::Normal => parse_normal(line, sequence, board),
        TextFormat::Treebeard => parse_treebeard(line, layout, board),
    }
}

/// Identidade da placa a partir do nome do arquivo.
///
/// Treebeard: dígitos entre underscores (`oven_07_log.txt` → `07`).
/// Normal: primeira sequência de dígitos (`CB05136_240625.txt` → `05136`).
pub fn board_from_filename(path: &Path, format: TextFormat) -> BoardId {
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return BoardId::Unknown;
    };

    let digits = match format {
        TextFormat::Treebeard => UNDERSCORE_DIGITS
            .captures(stem)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str()),
        TextFormat::Normal => FIRST_DIGITS.find(stem).map(|m| m.as_str()),
    };

    digits.map_or(BoardId::Unknown, |d| BoardId::Named(d.to_string()))
}
