//! Fonte por arquivos: varre o diretório de logs a cada poucos minutos.
//!
//! Para cada arquivo com bytes novos, o registro encaminhado é sempre a
//! última linha completa do arquivo. Linhas intermediárias anexadas entre
//! duas varreduras não são encaminhadas.

use super::{AdapterError, AdapterIssue, PollOutcome, SourceAdapter};
use bridge_core::config::FileSourceConfig;
use bridge_core::parsers::{self, TextFormat};
use bridge_core::tail::{TailError, TailReader, last_complete_line};
use bridge_core::types::{ChannelKey, UnknownChannel};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub struct FilePollingAdapter {
    config: FileSourceConfig,
    format: TextFormat,
    sequence: Vec<ChannelKey>,
    tail: TailReader,
}

impl FilePollingAdapter {
    pub fn new(config: &FileSourceConfig) -> Result<Self, UnknownChannel> {
        Ok(Self {
            format: config.format(),
            sequence: config.channel_sequence()?,
            config: config.clone(),
            tail: TailReader::new(),
        })
    }

    /// Arquivos de telemetria do diretório, em ordem de nome.
    fn list_files(&self) -> Result<Vec<PathBuf>, TailError> {
        let dir = &self.config.watch_dir;
        let entries = std::fs::read_dir(dir).map_err(|source| TailError {
            path: dir.clone(),
            source,
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && self.config.accepts(path))
            .collect();
        files.sort();
        Ok(files)
    }

    fn poll_file(&mut self, path: &Path, outcome: &mut PollOutcome) {
        let appended = match self.tail.poll(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                outcome.issues.push(e.into());
                return;
            }
        };
        if appended.is_empty() {
            return;
        }
        debug!("{}: {} bytes novos", path.display(), appended.len());

        let line = match last_complete_line(path) {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("{}: nenhuma linha completa ainda", path.display());
                return;
            }
            Err(e) => {
                outcome.issues.push(e.into());
                return;
            }
        };

        let board = parsers::board_from_filename(path, self.format);
        match parsers::parse_line(
            &line,
            self.format,
            &self.sequence,
            &self.config.treebeard_columns,
            board,
        ) {
            Ok(record) => outcome.records.push(record),
            Err(error) => outcome.issues.push(AdapterIssue::Parse {
                file: path.to_path_buf(),
                error,
            }),
        }
    }
}

impl SourceAdapter for FilePollingAdapter {
    fn name(&self) -> &'static str {
        match self.format {
            TextFormat::Normal => "modbus-files",
            TextFormat::Treebeard => "treebeard-files",
        }
    }

    fn poll(&mut self) -> Result<PollOutcome, AdapterError> {
        let mut outcome = PollOutcome::default();

        let files = match self.list_files() {
            Ok(files) => files,
            Err(e) => {
                // Diretório inacessível neste tick; tenta de novo no próximo
                outcome.issues.push(e.into());
                return Ok(outcome);
            }
        };

        for path in &files {
            self.poll_file(path, &mut outcome);
        }

        // Arquivos removidos perdem o cursor
        let present: HashSet<&PathBuf> = files.iter().collect();
        let stale: Vec<PathBuf> = self
            .tail
            .tracked()
            .filter(|p| !present.contains(p))
            .cloned()
            .collect();
        for path in stale {
            self.tail.forget(&path);
        }

        Ok(outcome)
    }

    fn next_delay(&self, _produced: bool) -> Duration {
        self.config.poll_interval()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_core::types::{BoardId, Reading};
    use std::io::Write;

    fn config(dir: &Path) -> FileSourceConfig {
        FileSourceConfig {
            watch_dir: dir.to_path_buf(),
            ..FileSourceConfig::default()
        }
    }

    fn append(path: &Path, text: &str) {
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    const ROW: &str = "2024-06-25 13:20:16.451 <00000> 99 98 253 264 23 11 100 1210\n";

    #[test]
    fn forwards_last_line_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CB05136_240625.txt");
        append(&path, "2024-06-25 13:20:15.000 <00000> 1 1 1 1 1 1 1 1\n");
        append(&path, ROW);

        let mut adapter = FilePollingAdapter::new(&config(dir.path())).unwrap();
        let outcome = adapter.poll().unwrap();
        assert!(outcome.issues.is_empty(), "{:?}", outcome.issues);
        assert_eq!(outcome.records.len(), 1);
        let rec = &outcome.records[0];
        assert_eq!(rec.board, BoardId::Named("05136".into()));
        assert_eq!(rec.get(ChannelKey::Vt), Some(Reading::Value(1210.0)));

        // Sem bytes novos, nada é encaminhado
        assert!(adapter.poll().unwrap().is_empty());
    }

    #[test]
    fn parse_failure_does_not_block_other_files() {
        let dir = tempfile::tempdir().unwrap();
        append(&dir.path().join("a_01.txt"), "garbage\n");
        append(&dir.path().join("b_02.txt"), ROW);
        append(&dir.path().join("ignored.bin"), ROW);

        let mut adapter = FilePollingAdapter::new(&config(dir.path())).unwrap();
        let outcome = adapter.poll().unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].board, BoardId::Named("02".into()));
        assert_eq!(outcome.issues.len(), 1);
        assert!(matches!(outcome.issues[0], AdapterIssue::Parse { .. }));

        // O fragmento ruim não é relido
        assert!(adapter.poll().unwrap().is_empty());
    }

    #[test]
    fn treebeard_short_line_yields_no_record() {
        let dir = tempfile::tempdir().unwrap();
        append(&dir.path().join("Treebeard_3_log.txt"), "2024-06-25 13:20:16 1 2\n");

        let cfg = FileSourceConfig {
            treebeard: true,
            ..config(dir.path())
        };
        let mut adapter = FilePollingAdapter::new(&cfg).unwrap();
        assert_eq!(adapter.name(), "treebeard-files");
        let outcome = adapter.poll().unwrap();
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.issues.len(), 1);
    }

    #[test]
    fn treebeard_identity_and_order() {
        let dir = tempfile::tempdir().unwrap();
        append(
            &dir.path().join("Treebeard_3_log.txt"),
            "2024-06-25 13:20:16 10 11 12 13 14 15\n",
        );
        let cfg = FileSourceConfig {
            treebeard: true,
            ..config(dir.path())
        };
        let mut adapter = FilePollingAdapter::new(&cfg).unwrap();
        let outcome = adapter.poll().unwrap();
        let rec = &outcome.records[0];
        assert_eq!(rec.board, BoardId::Named("3".into()));
        assert_eq!(rec.channels.len(), 8);
        assert_eq!(rec.get(ChannelKey::Ct), Some(Reading::Missing));
    }

    #[test]
    fn missing_directory_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut adapter = FilePollingAdapter::new(&config(&dir.path().join("nope"))).unwrap();
        let outcome = adapter.poll().unwrap();
        assert!(matches!(outcome.issues.as_slice(), [AdapterIssue::FileIo(_)]));
    }

    #[test]
    fn partial_line_waits_for_terminator() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log_1.txt");
        append(&path, "2024-06-25 13:20:16.451 <00000> 99 98");

        let mut adapter = FilePollingAdapter::new(&config(dir.path())).unwrap();
        assert!(adapter.poll().unwrap().is_empty());

        append(&path, " 253 264 23 11 100 1210\n");
        let outcome = adapter.poll().unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].get(ChannelKey::P1), Some(Reading::Value(99.0)));
    }
}
