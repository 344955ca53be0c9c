//! Configuração da ponte via TOML.
//!
//! Um único `bridge.toml` descreve a fonte selecionada, o link downstream
//! e a política de numeração das placas. A config é imutável durante uma
//! sessão e vai inteira para o controlador na linha `JSON:`.

use crate::parsers::{TextFormat, TreebeardLayout};
use crate::types::{ChannelKey, UnknownChannel, parse_sequence};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Tipo de fonte de telemetria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Diretório de logs de texto (Modbus em arquivo).
    FilePolling,
    /// Cartão Burnsys em porta serial dedicada.
    BinarySerial,
}

/// Parâmetros da fonte por arquivos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSourceConfig {
    /// Diretório observado
    pub watch_dir: PathBuf,
    /// Extensões reconhecidas (sem ponto)
    pub extensions: Vec<String>,
    /// Sequência de canais do formato normal, separada por espaços
    pub sequence: String,
    /// Usa o formato treebeard em vez do normal
    pub treebeard: bool,
    /// Intervalo entre varreduras (segundos)
    pub poll_interval_secs: f64,
    /// Colunas do formato treebeard
    pub treebeard_columns: TreebeardLayout,
}

impl Default for FileSourceConfig {
    fn default() -> Self {
        Self {
            watch_dir: PathBuf::from("."),
            extensions: vec!["txt".into(), "log".into(), "csv".into()],
            sequence: "P1 P2 T1 T2 Vx Vz Ct Vt".into(),
            treebeard: false,
            poll_interval_secs: 120.0,
            treebeard_columns: TreebeardLayout::default(),
        }
    }
}

impl FileSourceConfig {
    pub fn format(&self) -> TextFormat {
        if self.treebeard {
            TextFormat::Treebeard
        } else {
            TextFormat::Normal
        }
    }

    pub fn channel_sequence(&self) -> Result<Vec<ChannelKey>, UnknownChannel> {
        parse_sequence(&self.sequence)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs.max(0.0))
    }

    /// Verifica se o arquivo tem extensão reconhecida.
    pub fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)))
    }
}

/// Parâmetros do cartão Burnsys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSourceConfig {
    /// Porta do cartão (ex: "COM16", "/dev/ttyUSB1")
    pub device: String,
    pub baud_rate: u32,
    /// Timeout de cada leitura (ms)
    pub read_timeout_ms: u64,
    /// Pausa após leitura vazia (ms)
    pub idle_sleep_ms: u64,
    /// Valida o CRC Modbus dos frames
    pub verify_crc: bool,
}

impl Default for SerialSourceConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB1".into(),
            baud_rate: 9600,
            read_timeout_ms: 100,
            idle_sleep_ms: 100,
            verify_crc: false,
        }
    }
}

/// Fonte selecionada e seus parâmetros.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub file: FileSourceConfig,
    pub serial: SerialSourceConfig,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::FilePolling,
            file: FileSourceConfig::default(),
            serial: SerialSourceConfig::default(),
        }
    }
}

/// Link serial com o controlador do forno.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownstreamConfig {
    /// Porta do controlador (ex: "COM4")
    pub device: String,
    pub baud_rate: u32,
    /// Espera após abrir a porta, antes do handshake (ms)
    pub settle_ms: u64,
    /// Tempo máximo para drenar o eco do dispositivo (ms)
    pub drain_timeout_ms: u64,
    /// Largura do zero-padding da identidade na linha `Board:`
    pub board_id_width: usize,
    /// Mantém a porta aberta no DISCONNECT (reconexão só com IDLE)
    pub hold_open: bool,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".into(),
            baud_rate: 115_200,
            settle_ms: 2000,
            drain_timeout_ms: 50,
            board_id_width: 2,
            hold_open: false,
        }
    }
}

impl DownstreamConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Política de numeração das placas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub silence_timeout_secs: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            silence_timeout_secs: 20 * 60,
        }
    }
}

impl IdentityConfig {
    pub fn silence_timeout(&self) -> Duration {
        Duration::from_secs(self.silence_timeout_secs)
    }
}

/// Configuração raiz da ponte.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Nome da sessão/forno enviado no CONNECT
    pub name: String,
    pub source: SourceConfig,
    pub downstream: DownstreamConfig,
    pub identity: IdentityConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: "Gimli".into(),
            source: SourceConfig::default(),
            downstream: DownstreamConfig::default(),
            identity: IdentityConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<BridgeConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        BridgeConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(path, content).map_err(|e| e.to_string())?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do bridge.toml.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("bridge.toml")
    }

    /// Payload da linha `JSON:` do handshake.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("Nome da sessão não pode ser vazio".into());
        }
        if self.name.contains(['\n', '\r']) {
            errors.push("Nome da sessão não pode conter quebra de linha".into());
        }
        if self.downstream.device.is_empty() {
            errors.push("Porta downstream não configurada".into());
        }
        if self.downstream.baud_rate == 0 {
            errors.push("Baud rate downstream não pode ser 0".into());
        }

        match self.source.kind {
            SourceKind::FilePolling => {
                let file = &self.source.file;
                match file.channel_sequence() {
                    Ok(seq) if seq.is_empty() && !file.treebeard => {
                        errors.push("Sequência de canais vazia".into());
                    }
                    Ok(_) => {}
                    Err(e) => errors.push(e.to_string()),
                }
                if file.poll_interval_secs < 0.1 {
                    errors.push(format!(
                        "Intervalo de varredura inválido: {} (mínimo 0.1)",
                        file.poll_interval_secs
                    ));
                }
                if file.extensions.is_empty() {
                    errors.push("Nenhuma extensão de arquivo reconhecida".into());
                }
            }
            SourceKind::BinarySerial => {
                let serial = &self.source.serial;
                if serial.device.is_empty() {
                    errors.push("Porta do cartão Burnsys não configurada".into());
                }
                if serial.device == self.downstream.device {
                    errors.push(format!(
                        "Cartão Burnsys e downstream usam a mesma porta: {}",
                        serial.device
                    ));
                }
                if serial.baud_rate == 0 {
                    errors.push("Baud rate do cartão não pode ser 0".into());
                }
                if serial.read_timeout_ms == 0 {
                    errors.push("Timeout de leitura do cartão não pode ser 0".into());
                }
            }
        }

        if self.identity.silence_timeout_secs == 0 {
            errors.push("Janela de silêncio não pode ser 0".into());
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = BridgeConfig::default();
        let errors = config.validate();
        assert!(errors.is_empty(), "Erros: {:?}", errors);
    }

    #[test]
    fn roundtrip_toml() {
        let config = BridgeConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: BridgeConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let partial = r#"
name = "Treebeard"

[source]
kind = "binary_serial"

[source.serial]
device = "COM16"
"#;
        let config: BridgeConfig = toml::from_str(partial).unwrap();
        assert_eq!(config.name, "Treebeard");
        assert_eq!(config.source.kind, SourceKind::BinarySerial);
        assert_eq!(config.source.serial.device, "COM16");
        // Outros campos devem ter valor padrão
        assert_eq!(config.source.serial.baud_rate, 9600);
        assert_eq!(config.downstream.baud_rate, 115_200);
        assert_eq!(config.identity.silence_timeout_secs, 1200);
    }

    #[test]
    fn treebeard_columns_from_toml() {
        let partial = r#"
[source.file]
treebeard = true

[source.file.treebeard_columns]
p1 = 4
ct = 10
"#;
        let config: BridgeConfig = toml::from_str(partial).unwrap();
        let file = &config.source.file;
        assert_eq!(file.format(), TextFormat::Treebeard);
        assert_eq!(file.treebeard_columns.p1, 4);
        assert_eq!(file.treebeard_columns.p2, 3);
        assert_eq!(file.treebeard_columns.ct, Some(10));
        assert_eq!(file.treebeard_columns.vt, None);
    }

    #[test]
    fn validate_catches_bad_values() {
        let mut config = BridgeConfig::default();
        config.source.file.sequence = "P1 Q9".into();
        config.name = String::new();
        let errors = config.validate();
        assert_eq!(errors.len(), 2, "Erros: {:?}", errors);

        let mut config = BridgeConfig::default();
        config.source.kind = SourceKind::BinarySerial;
        config.source.serial.device = config.downstream.device.clone();
        assert_eq!(config.validate().len(), 1);
    }

    #[test]
    fn extension_filter() {
        let file = FileSourceConfig::default();
        assert!(file.accepts(Path::new("a/CB05136_240625.TXT")));
        assert!(file.accepts(Path::new("x.log")));
        assert!(!file.accepts(Path::new("x.bin")));
        assert!(!file.accepts(Path::new("noext")));
    }

    #[test]
    fn json_payload_is_single_line() {
        let json = BridgeConfig::default().to_json().unwrap();
        assert!(!json.contains('\n'));
        let back: BridgeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, BridgeConfig::default());
    }
}
