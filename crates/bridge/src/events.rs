//! Notificações para a camada de UI via channel.

use crate::session::SessionState;
use bridge_core::types::CanonicalRecord;
use crossbeam_channel::{Receiver, Sender, bounded};
use std::time::Duration;
use tracing::{debug, warn};

/// Capacidade padrão do channel de eventos.
pub const EVENT_BUFFER: usize = 256;

/// Espera máxima para entregar o fim de sessão com o channel cheio.
const FATAL_SEND_TIMEOUT: Duration = Duration::from_millis(200);

/// Mensagem enviada da ponte para a UI.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// Transição do estado da sessão
    StateChanged(SessionState),
    /// Registro encaminhado e a linha escrita no link
    Forwarded { record: CanonicalRecord, line: String },
    /// Erro local de um adaptador (parse, frame, arquivo); o loop segue
    Issue { adapter: &'static str, message: String },
    /// Operação rejeitada ou ignorada
    Warning(String),
    /// Sessão encerrada por falha irrecuperável
    SessionEnded { reason: String },
}

/// Lado emissor; clonado para cada worker.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<BridgeEvent>,
}

impl EventSink {
    /// Cria o par emissor/receptor.
    pub fn channel(capacity: usize) -> (Self, Receiver<BridgeEvent>) {
        let (tx, rx) = bounded(capacity);
        (Self { tx }, rx)
    }

    /// Non-blocking: se a UI está lenta, o evento é descartado.
    /// `SessionEnded` espera um pouco por espaço antes de desistir.
    pub fn emit(&self, event: BridgeEvent) {
        if matches!(event, BridgeEvent::SessionEnded { .. }) {
            if self.tx.send_timeout(event, FATAL_SEND_TIMEOUT).is_err() {
                warn!("Fim de sessão não entregue à UI");
            }
            return;
        }
        if self.tx.try_send(event).is_err() {
            debug!("Channel de eventos cheio ou fechado, descartando evento");
        }
    }
}
