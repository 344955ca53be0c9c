//! Link serial com o controlador do forno.
//!
//! A porta fica atrás de um `Mutex`: o controlador de sessão e o worker do
//! adaptador ativo escrevem pelo mesmo [`Link`], uma linha por vez.

use bridge_core::protocol::{Command, ProtocolError};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

/// Qualquer coisa que leia e escreva bytes (porta serial, mock de teste).
pub trait Transport: Read + Write + Send {}

impl<T: Read + Write + Send + ?Sized> Transport for T {}

/// Abre portas pelo caminho do dispositivo.
pub trait PortOpener: Send + Sync {
    fn open(&self, path: &str, baud_rate: u32, timeout: Duration) -> io::Result<Box<dyn Transport>>;
}

/// Abridor real, via crate `serialport` (8N1).
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialOpener;

impl PortOpener for SerialOpener {
    fn open(&self, path: &str, baud_rate: u32, timeout: Duration) -> io::Result<Box<dyn Transport>> {
        let port = serialport::new(path, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .timeout(timeout)
            .open()?;
        Ok(Box::new(port))
    }
}

/// Erros de escrita/leitura no link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Link fechado")]
    Stale,

    #[error("Erro de I/O no link: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

struct LinkInner {
    path: String,
    port: Mutex<Option<Box<dyn Transport>>>,
    broken: AtomicBool,
}

/// Handle compartilhado do link downstream.
#[derive(Clone)]
pub struct Link {
    inner: Arc<LinkInner>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("path", &self.inner.path)
            .field("open", &self.is_open())
            .field("broken", &self.is_broken())
            .finish()
    }
}

impl Link {
    pub fn open(
        opener: &dyn PortOpener,
        path: &str,
        baud_rate: u32,
        read_timeout: Duration,
    ) -> io::Result<Self> {
        let port = opener.open(path, baud_rate, read_timeout)?;
        Ok(Self {
            inner: Arc::new(LinkInner {
                path: path.to_string(),
                port: Mutex::new(Some(port)),
                broken: AtomicBool::new(false),
            }),
        })
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    /// `true` depois de uma falha de I/O; o link não deve mais ser usado.
    pub fn is_broken(&self) -> bool {
        self.inner.broken.load(Ordering::Acquire)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn Transport>>> {
        // Um writer que entrou em pânico não invalida a porta
        self.inner.port.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Escreve um comando como uma linha completa.
    pub fn send(&self, command: &Command) -> Result<(), LinkError> {
        let line = command.encode()?;
        let mut guard = self.lock();
        let port = guard.as_mut().ok_or(LinkError::Stale)?;

        let result = port.write_all(line.as_bytes()).and_then(|_| port.flush());
        if let Err(e) = result {
            self.inner.broken.store(true, Ordering::Release);
            return Err(LinkError::Io(e));
        }
        debug!("→ {}: {}", self.inner.path, line.trim_end());
        Ok(())
    }

    /// Descarta bytes pendentes (eco do dispositivo) sem bloquear além de `max_wait`.
    /// Retorna quantos bytes foram descartados.
    pub fn drain(&self, max_wait: Duration) -> Result<usize, LinkError> {
        let mut guard = self.lock();
        let port = guard.as_mut().ok_or(LinkError::Stale)?;

        let deadline = Instant::now() + max_wait;
        let mut buf = [0u8; 256];
        let mut discarded = Vec::new();

        while Instant::now() < deadline {
            match port.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => discarded.extend_from_slice(&buf[..n]),
                Err(ref e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                    ) =>
                {
                    break;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.inner.broken.store(true, Ordering::Release);
                    return Err(LinkError::Io(e));
                }
            }
        }

        if !discarded.is_empty() {
            debug!(
                "← {} (descartado): {}",
                self.inner.path,
                String::from_utf8_lossy(&discarded).trim_end()
            );
        }
        Ok(discarded.len())
    }

    /// Fecha a porta. Handles clonados passam a receber [`LinkError::Stale`].
    pub fn close(&self) {
        if self.lock().take().is_some() {
            debug!("Link {} fechado", self.inner.path);
        }
    }
}

// ──────────────────────────────────────────────
// Porta em memória para testes
// ──────────────────────────────────────────────
