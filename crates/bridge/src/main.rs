//! # Telemetry Bridge
//!
//! Lê a telemetria das placas (logs de texto ou cartão Burnsys) e encaminha
//! cada leitura ao controlador do forno pela serial downstream.
//!
//! ## Uso
//! ```bash
//! telemetry_bridge            # usa bridge.toml ao lado do executável
//! RUST_LOG=debug telemetry_bridge
//! ```
//!
//! Comandos no stdin: `active`, `idle`, `status`, `quit`. EOF equivale a `quit`.

mod adapters;
mod events;
mod link;
mod session;
mod worker;

use bridge_core::config::{BridgeConfig, SourceKind};
use crossbeam_channel::{RecvTimeoutError, Sender, unbounded};
use events::{BridgeEvent, EVENT_BUFFER, EventSink};
use link::SerialOpener;
use session::{SessionController, SessionState};
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Intervalo de verificação de saúde do worker.
const HEALTH_TICK: Duration = Duration::from_millis(500);

enum Console {
    Active,
    Idle,
    Status,
    Quit,
}

fn main() {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Carregar config ──
    let config_path = BridgeConfig::default_path();
    let config = BridgeConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    let problems = config.validate();
    if !problems.is_empty() {
        for p in &problems {
            error!("Config: {p}");
        }
        std::process::exit(1);
    }

    // ── Eventos (camada de UI) ──
    let (sink, rx) = EventSink::channel(EVENT_BUFFER);
    let logger = std::thread::Builder::new()
        .name("events".into())
        .spawn(move || {
            for event in rx {
                match event {
                    BridgeEvent::StateChanged(state) => info!("Estado: {state}"),
                    BridgeEvent::Forwarded { record, line } => match record.timestamp {
                        Some(ts) => info!("{line} (lido em {ts})"),
                        None => info!("{line}"),
                    },
                    BridgeEvent::Issue { adapter, message } => warn!("[{adapter}] {message}"),
                    BridgeEvent::Warning(message) => warn!("{message}"),
                    BridgeEvent::SessionEnded { reason } => error!("Sessão encerrada: {reason}"),
                }
            }
        });
    if let Err(e) = logger {
        error!("Falha ao iniciar thread de eventos: {e}");
        std::process::exit(1);
    }

    // ── Banner ──
    let source = match config.source.kind {
        SourceKind::FilePolling if config.source.file.treebeard => {
            format!("treebeard em {}", config.source.file.watch_dir.display())
        }
        SourceKind::FilePolling => format!("logs em {}", config.source.file.watch_dir.display()),
        SourceKind::BinarySerial => format!("cartão Burnsys em {}", config.source.serial.device),
    };
    println!();
    println!("══════════════════════════════════════════════");
    println!("   ⚡ TELEMETRY BRIDGE – {}", config.name);
    println!("══════════════════════════════════════════════");
    println!("  Fonte:      {source}");
    println!(
        "  Downstream: {} @ {} baud",
        config.downstream.device, config.downstream.baud_rate
    );
    println!("══════════════════════════════════════════════");
    println!();

    // ── Sessão ──
    let mut session = SessionController::new(Arc::new(SerialOpener), sink);
    if let Err(e) = session.connect(&config, &config.name) {
        error!("Falha ao conectar: {e}");
        std::process::exit(1);
    }
    if let Err(e) = session.start_active(&config.name) {
        error!("Falha ao ativar: {e}");
    }

    // ── Console ──
    let (cmd_tx, cmd_rx) = unbounded();
    if let Err(e) = std::thread::Builder::new()
        .name("stdin".into())
        .spawn(move || read_console(cmd_tx))
    {
        warn!("Console indisponível: {e}");
    }

    // ── Loop principal ──
    loop {
        let command = match cmd_rx.recv_timeout(HEALTH_TICK) {
            Ok(command) => command,
            Err(RecvTimeoutError::Timeout) => {
                if session.check_health() {
                    warn!("Sessão caiu; encerrando");
                    break;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => Console::Quit,
        };

        let result = match command {
            Console::Active => session.start_active(&config.name),
            Console::Idle => session.end_active(),
            Console::Status => {
                info!(
                    "Estado: {} | próxima placa: {}",
                    session.state(),
                    session.current_board()
                );
                Ok(())
            }
            Console::Quit => break,
        };
        if let Err(e) = result {
            warn!("{e}");
        }
    }

    if session.state() != SessionState::Disconnected {
        if let Err(e) = session.disconnect() {
            warn!("{e}");
        }
    }
    info!("Ponte encerrada");
}

/// Lê comandos do stdin até `quit` ou EOF.
fn read_console(tx: Sender<Console>) {
    for line in std::io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        let command = match line.trim().to_ascii_lowercase().as_str() {
            "" => continue,
            "active" => Console::Active,
            "idle" => Console::Idle,
            "status" => Console::Status,
            "quit" | "exit" => Console::Quit,
            other => {
                warn!("Comando desconhecido: {other} (use active, idle, status, quit)");
                continue;
            }
        };
        let quit = matches!(command, Console::Quit);
        if tx.send(command).is_err() || quit {
            break;
        }
    }
}
