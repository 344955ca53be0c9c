//! Leitura incremental de arquivos de log (tail).
//!
//! Cada arquivo observado ganha um cursor de bytes. [`TailReader::poll`]
//! devolve só o trecho anexado desde a última leitura; a extração da
//! última linha completa é independente do cursor.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Tamanho do bloco usado na varredura reversa.
const BACKSCAN_BLOCK: u64 = 4096;

/// Erro de acesso a arquivo durante o tail.
#[derive(Debug, thiserror::Error)]
#[error("Erro de I/O em {}: {source}", path.display())]
pub struct TailError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

impl TailError {
    fn at(path: &Path) -> impl FnOnce(std::io::Error) -> TailError + '_ {
        move |source| TailError {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Cursores por arquivo. Exclusivo de um adaptador.
#[derive(Debug, Default)]
pub struct TailReader {
    cursors: HashMap<PathBuf, u64>,
}

impl TailReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Posição atual do cursor, se o arquivo já foi observado.
    pub fn cursor(&self, path: &Path) -> Option<u64> {
        self.cursors.get(path).copied()
    }

    /// Lê os bytes anexados desde o último poll.
    ///
    /// O cursor avança para o fim do arquivo mesmo que o conteúdo depois
    /// não seja interpretável, para que um fragmento ruim não seja relido.
    /// Se o arquivo encolheu (rotação/truncamento) a leitura recomeça do 0.
    pub fn poll(&mut self, path: &Path) -> Result<Vec<u8>, TailError> {
        let len = std::fs::metadata(path).map_err(TailError::at(path))?.len();
        let cursor = self.cursors.entry(path.to_path_buf()).or_insert(0);

        if len < *cursor {
            debug!("{} encolheu ({} → {len}), relendo do início", path.display(), *cursor);
            *cursor = 0;
        }
        if len == *cursor {
            return Ok(Vec::new());
        }

        let start = *cursor;
        *cursor = len;

        let mut file = File::open(path).map_err(TailError::at(path))?;
        file.seek(SeekFrom::Start(start)).map_err(TailError::at(path))?;
        let mut appended = Vec::with_capacity((len - start) as usize);
        file.take(len - start)
            .read_to_end(&mut appended)
            .map_err(TailError::at(path))?;
        Ok(appended)
    }

    /// Arquivos com cursor.
    pub fn tracked(&self) -> impl Iterator<Item = &PathBuf> {
        self.cursors.keys()
    }

    /// Esquece um arquivo (ex.: removido do diretório).
    pub fn forget(&mut self, path: &Path) {
        self.cursors.remove(path);
    }
}

/// Última linha completa (terminada por `\n`) do arquivo.
///
/// Fragmentos finais sem terminador e linhas em branco são ignorados.
/// Lê o arquivo de trás para frente em blocos, sem carregar tudo.
pub fn last_complete_line(path: &Path) -> Result<Option<String>, TailError> {
    let mut file = File::open(path).map_err(TailError::at(path))?;
    let len = file.metadata().map_err(TailError::at(path))?.len();

    // Bytes já lidos, do fim para o começo (em ordem normal dentro do Vec)
    let mut tail: Vec<u8> = Vec::new();
    let mut pos = len;

    loop {
        if let Some(line) = complete_line_in(&tail, pos == 0) {
            return Ok(Some(line));
        }
        if pos == 0 {
            return Ok(None);
        }

        let step = pos.min(BACKSCAN_BLOCK);
        pos -= step;
        let mut block = vec![0u8; step as usize];
        file.seek(SeekFrom::Start(pos)).map_err(TailError::at(path))?;
        file.read_exact(&mut block).map_err(TailError::at(path))?;
        block.extend_from_slice(&tail);
        tail = block;
    }
}

/// Procura a última linha não vazia terminada por `\n` em `buf`.
/// `at_start` indica que `buf` começa no byte 0 do arquivo.
fn complete_line_in(buf: &[u8], at_start: bool) -> Option<String> {
    let last_nl = buf.iter().rposition(|&b| b == b'\n')?;
    let mut end = last_nl;

    loop {
        let head = &buf[..end];
        let begin = match head.iter().rposition(|&b| b == b'\n') {
            Some(i) => i + 1,
            // Sem início garantido: precisa de mais bytes
            None if !at_start => return None,
            None => 0,
        };
        let line = String::from_utf8_lossy(&head[begin..]);
        let line = line.trim_end_matches('\r');
        if !line.trim().is_empty() {
            return Some(line.to_string());
        }
        if begin == 0 {
            return None;
        }
        end = begin - 1;
    }
}
