//! Máquina de estados da sessão com o controlador do forno.
//!
//! ```text
//! Disconnected ──connect──▶ Idle ──start_active──▶ Active
//!      ▲  └─reconnect_idle─▶  ▲ ◀────end_active─────┘
//!      └──────disconnect──────┴──────────────────────┘
//! ```
//!
//! O controlador é dono do [`Link`] downstream e do worker do adaptador.
//! Toda troca de estado passa por [`SessionController::set_state`].

use crate::adapters::build_adapter;
use crate::events::{BridgeEvent, EventSink};
use crate::link::{Link, LinkError, PortOpener};
use crate::worker::{AdapterWorker, WorkerExit};
use bridge_core::config::BridgeConfig;
use bridge_core::identity::BoardIdentity;
use bridge_core::protocol::Command;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Idle,
    Active,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Disconnected => "desconectado",
            SessionState::Idle => "idle",
            SessionState::Active => "ativo",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Configuração inválida: {0}")]
    InvalidConfig(String),

    #[error("Não foi possível abrir {path}: {reason}")]
    LinkUnavailable { path: String, reason: String },

    #[error("Dispositivo não aceitou o handshake: {0}")]
    HandshakeTimeout(String),

    #[error("Escrita em link fechado")]
    StaleLink,

    #[error("Link downstream perdido: {0}")]
    LinkLost(String),

    #[error("{op} inválido no estado {state}")]
    InvalidTransition { op: &'static str, state: SessionState },

    #[error("Adaptador: {0}")]
    Adapter(String),
}

impl From<LinkError> for SessionError {
    fn from(e: LinkError) -> Self {
        match e {
            LinkError::Stale => SessionError::StaleLink,
            other => SessionError::LinkLost(other.to_string()),
        }
    }
}

pub struct SessionController {
    opener: Arc<dyn PortOpener>,
    events: EventSink,
    state: SessionState,
    /// Config da sessão corrente (ou da última, com link retido)
    config: Option<BridgeConfig>,
    /// Aberto em Idle/Active; em Disconnected só se `hold_open` reteve a porta
    link: Option<Link>,
    worker: Option<AdapterWorker>,
    identity: Arc<Mutex<BoardIdentity>>,
}

impl SessionController {
    pub fn new(opener: Arc<dyn PortOpener>, events: EventSink) -> Self {
        Self {
            opener,
            events,
            state: SessionState::Disconnected,
            config: None,
            link: None,
            worker: None,
            identity: Arc::new(Mutex::new(BoardIdentity::default())),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Próximo número de placa que o cartão Burnsys receberá.
    pub fn current_board(&self) -> u32 {
        self.identity.lock().unwrap_or_else(|e| e.into_inner()).current()
    }

    /// A numeração sobrevive a reconexões; só a janela vem da config nova.
    fn apply_silence_timeout(&self, config: &BridgeConfig) {
        self.identity
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .set_timeout(config.identity.silence_timeout());
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            info!("Sessão: {} → {}", self.state, state);
            self.state = state;
            self.events.emit(BridgeEvent::StateChanged(state));
        }
    }

    fn reject(&self, op: &'static str) -> SessionError {
        let err = SessionError::InvalidTransition {
            op,
            state: self.state,
        };
        warn!("{err}");
        self.events.emit(BridgeEvent::Warning(err.to_string()));
        err
    }

    fn drain_timeout(&self) -> std::time::Duration {
        self.config
            .as_ref()
            .map(|c| c.downstream.drain_timeout())
            .unwrap_or_default()
    }

    /// Drena o eco pendente e escreve o comando.
    fn command(&self, link: &Link, command: &Command) -> Result<(), LinkError> {
        link.drain(self.drain_timeout())?;
        link.send(command)
    }

    // ── Transições ──

    /// Abre o link e faz o handshake `CONNECT` + `JSON:`.
    ///
    /// Com `hold_open`, se a porta da sessão anterior ainda estiver retida
    /// para o mesmo dispositivo, segue pelo atalho [`Self::reconnect_idle`].
    pub fn connect(&mut self, config: &BridgeConfig, name: &str) -> Result<(), SessionError> {
        self.check_health();
        if self.state != SessionState::Disconnected {
            return Err(self.reject("connect"));
        }

        let problems = config.validate();
        if !problems.is_empty() {
            return Err(SessionError::InvalidConfig(problems.join("; ")));
        }

        if let Some(link) = self.link.take() {
            if link.path() == config.downstream.device && link.is_open() && !link.is_broken() {
                self.link = Some(link);
                self.config = Some(config.clone());
                self.apply_silence_timeout(config);
                return self.reconnect_idle(name);
            }
            debug!("Descartando link retido de {}", link.path());
            link.close();
        }

        let downstream = &config.downstream;
        let link = Link::open(
            self.opener.as_ref(),
            &downstream.device,
            downstream.baud_rate,
            downstream.drain_timeout(),
        )
        .map_err(|e| SessionError::LinkUnavailable {
            path: downstream.device.clone(),
            reason: e.to_string(),
        })?;
        info!("Link {} aberto ({} baud)", downstream.device, downstream.baud_rate);

        let payload = match config.to_json() {
            Ok(json) => json,
            Err(e) => {
                link.close();
                return Err(SessionError::InvalidConfig(e.to_string()));
            }
        };

        self.config = Some(config.clone());
        let handshake = self
            .command(&link, &Command::Connect(name.to_string()))
            .and_then(|_| {
                std::thread::sleep(downstream.settle());
                self.command(&link, &Command::Json(payload))
            });
        if let Err(e) = handshake {
            error!("Handshake com {} falhou: {e}", downstream.device);
            link.close();
            self.config = None;
            return Err(SessionError::HandshakeTimeout(e.to_string()));
        }

        self.link = Some(link);
        self.apply_silence_timeout(config);
        info!("Conectado como {name}");
        self.set_state(SessionState::Idle);
        Ok(())
    }

    /// Reentrada com a porta retida: só reenvia `IDLE`.
    pub fn reconnect_idle(&mut self, name: &str) -> Result<(), SessionError> {
        self.check_health();
        let retained = self.state == SessionState::Disconnected
            && self.config.is_some()
            && self.link.as_ref().is_some_and(|l| l.is_open() && !l.is_broken());
        if !retained {
            return Err(self.reject("reconnect_idle"));
        }
        let Some(link) = self.link.clone() else {
            return Err(self.reject("reconnect_idle"));
        };

        if let Err(e) = self.command(&link, &Command::Idle) {
            error!("Reentrada em {} falhou: {e}", link.path());
            link.close();
            self.link = None;
            return Err(SessionError::HandshakeTimeout(e.to_string()));
        }

        info!("Reconectado como {name} (link retido)");
        self.set_state(SessionState::Idle);
        Ok(())
    }

    /// Envia `ACTIVE` e inicia o loop do adaptador configurado.
    pub fn start_active(&mut self, name: &str) -> Result<(), SessionError> {
        self.check_health();
        if self.state != SessionState::Idle {
            return Err(self.reject("start_active"));
        }
        let (Some(config), Some(link)) = (self.config.clone(), self.link.clone()) else {
            return Err(self.reject("start_active"));
        };

        // Adaptador antes do ACTIVE: porta do cartão indisponível não muda o estado
        let adapter = build_adapter(&config, self.opener.as_ref(), self.identity.clone())
            .map_err(|e| {
                warn!("Adaptador não iniciado: {e}");
                SessionError::Adapter(e.to_string())
            })?;

        if let Err(e) = self.command(&link, &Command::Active) {
            let err = SessionError::from(e);
            self.fail(&err.to_string());
            return Err(err);
        }

        let worker = match AdapterWorker::spawn(
            adapter,
            link.clone(),
            config.downstream.board_id_width,
            self.events.clone(),
        ) {
            Ok(worker) => worker,
            Err(e) => {
                // Volta para Idle do lado do controlador do forno
                if let Err(e) = self.command(&link, &Command::Idle) {
                    let err = SessionError::from(e);
                    self.fail(&err.to_string());
                    return Err(err);
                }
                return Err(SessionError::Adapter(e.to_string()));
            }
        };

        info!("Sessão {name} ativa, adaptador {}", worker.name());
        self.worker = Some(worker);
        self.set_state(SessionState::Active);
        Ok(())
    }

    /// Para o adaptador e envia `IDLE`. O link continua aberto.
    pub fn end_active(&mut self) -> Result<(), SessionError> {
        self.check_health();
        if self.state != SessionState::Active {
            return Err(self.reject("end_active"));
        }

        if let WorkerExit::Fatal(reason) = self.stop_worker() {
            self.fail(&reason);
            return Err(SessionError::Adapter(reason));
        }

        let Some(link) = self.link.clone() else {
            self.fail("link ausente");
            return Err(SessionError::StaleLink);
        };
        if let Err(e) = self.command(&link, &Command::Idle) {
            let err = SessionError::from(e);
            self.fail(&err.to_string());
            return Err(err);
        }

        self.set_state(SessionState::Idle);
        Ok(())
    }

    /// Encerra a sessão a partir de Idle ou Active.
    ///
    /// Falha na escrita do `DISCONNECT` é só reportada: o estado final é
    /// sempre Disconnected.
    pub fn disconnect(&mut self) -> Result<(), SessionError> {
        self.check_health();
        if self.state == SessionState::Disconnected {
            return Err(self.reject("disconnect"));
        }

        if self.state == SessionState::Active {
            self.stop_worker();
        }

        let hold_open = self.config.as_ref().is_some_and(|c| c.downstream.hold_open);
        if let Some(link) = self.link.take() {
            if let Err(e) = self.command(&link, &Command::Disconnect) {
                warn!("DISCONNECT não enviado: {e}");
                self.events
                    .emit(BridgeEvent::Warning(format!("DISCONNECT não enviado: {e}")));
            }
            if let Err(e) = link.drain(self.drain_timeout()) {
                debug!("Drain final falhou: {e}");
            }

            if hold_open && !link.is_broken() {
                debug!("Link {} retido para reentrada", link.path());
                self.link = Some(link);
            } else {
                link.close();
            }
        }

        self.set_state(SessionState::Disconnected);
        Ok(())
    }

    /// Recolhe um worker que morreu sozinho e força Disconnected.
    ///
    /// Retorna `true` se a sessão foi encerrada nesta chamada.
    pub fn check_health(&mut self) -> bool {
        let dead = self.state == SessionState::Active
            && self.worker.as_ref().is_some_and(|w| w.is_finished());
        if !dead {
            return false;
        }

        let reason = match self.stop_worker() {
            WorkerExit::Fatal(reason) => reason,
            WorkerExit::Stopped => "adaptador parou".to_string(),
        };
        // O worker já emitiu SessionEnded
        self.teardown(&reason);
        true
    }

    // ── Internos ──

    fn stop_worker(&mut self) -> WorkerExit {
        match self.worker.take() {
            Some(worker) => worker.stop(),
            None => WorkerExit::Stopped,
        }
    }

    /// Falha irrecuperável originada no controlador.
    fn fail(&mut self, reason: &str) {
        self.events.emit(BridgeEvent::SessionEnded {
            reason: reason.to_string(),
        });
        self.teardown(reason);
    }

    fn teardown(&mut self, reason: &str) {
        error!("Sessão encerrada: {reason}");
        self.stop_worker();
        if let Some(link) = self.link.take() {
            if !link.is_broken() {
                if let Err(e) = link.send(&Command::Disconnect) {
                    debug!("DISCONNECT de encerramento falhou: {e}");
                }
            }
            link.close();
        }
        self.set_state(SessionState::Disconnected);
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.stop_worker();
    }
}
