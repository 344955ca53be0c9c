//! Thread supervisionada que roda o loop de um adaptador.
//!
//! O worker possui seu próprio flag de parada. O flag é observado entre
//! ticks: um decode em andamento sempre termina e seus registros são
//! encaminhados antes da saída.

use crate::adapters::SourceAdapter;
use crate::events::{BridgeEvent, EventSink};
use crate::link::Link;
use bridge_core::protocol::{Command, format_record};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Granularidade da espera entre ticks (resposta ao flag de parada).
const STOP_CHECK: Duration = Duration::from_millis(50);

/// Motivo de saída do loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    Stopped,
    Fatal(String),
}

pub struct AdapterWorker {
    name: &'static str,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<WorkerExit>,
}

impl AdapterWorker {
    /// Inicia o loop numa thread dedicada.
    pub fn spawn(
        adapter: Box<dyn SourceAdapter>,
        link: Link,
        id_width: usize,
        events: EventSink,
    ) -> std::io::Result<Self> {
        let name = adapter.name();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();

        let handle = std::thread::Builder::new()
            .name(format!("adapter-{name}"))
            .spawn(move || run_loop(adapter, &link, id_width, &events, &flag))?;

        info!("Adaptador {name} iniciado");
        Ok(Self { name, stop, handle })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// `true` se o loop já saiu por conta própria (falha fatal).
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Sinaliza a parada e espera o tick em andamento terminar.
    pub fn stop(self) -> WorkerExit {
        self.stop.store(true, Ordering::Release);
        let exit = self
            .handle
            .join()
            .unwrap_or_else(|_| WorkerExit::Fatal(format!("thread do adaptador {} entrou em pânico", self.name)));
        info!("Adaptador {} parado ({:?})", self.name, exit);
        exit
    }
}

fn run_loop(
    mut adapter: Box<dyn SourceAdapter>,
    link: &Link,
    id_width: usize,
    events: &EventSink,
    stop: &AtomicBool,
) -> WorkerExit {
    let name = adapter.name();

    loop {
        if stop.load(Ordering::Acquire) {
            return WorkerExit::Stopped;
        }

        let outcome = match adapter.poll() {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Adaptador {name}: {e}");
                let reason = e.to_string();
                events.emit(BridgeEvent::SessionEnded {
                    reason: reason.clone(),
                });
                return WorkerExit::Fatal(reason);
            }
        };

        if outcome.is_empty() {
            sleep_unless_stopped(adapter.next_delay(false), stop);
            continue;
        }

        for issue in outcome.issues {
            warn!("Adaptador {name}: {issue}");
            events.emit(BridgeEvent::Issue {
                adapter: name,
                message: issue.to_string(),
            });
        }

        let produced = !outcome.records.is_empty();
        for record in outcome.records {
            let line = format_record(&record, id_width);
            if let Err(e) = link.send(&Command::Record(line.clone())) {
                error!("Falha ao encaminhar para {}: {e}", link.path());
                let reason = format!("link downstream: {e}");
                events.emit(BridgeEvent::SessionEnded {
                    reason: reason.clone(),
                });
                return WorkerExit::Fatal(reason);
            }
            debug!("Encaminhado: {line}");
            events.emit(BridgeEvent::Forwarded { record, line });
        }

        sleep_unless_stopped(adapter.next_delay(produced), stop);
    }
}

/// Dorme até `total`, acordando cedo se o flag de parada subir.
fn sleep_unless_stopped(total: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + total;
    loop {
        if stop.load(Ordering::Acquire) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep((deadline - now).min(STOP_CHECK));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{AdapterError, AdapterIssue, PollOutcome};
    use crate::link::testing::MemoryOpener;
    use bridge_core::types::{BoardId, CanonicalRecord, ChannelKey, Reading};
    use std::collections::VecDeque;

    /// Adaptador roteirizado: devolve um tick por poll, depois fica vazio.
    struct Scripted {
        ticks: VecDeque<Result<PollOutcome, AdapterError>>,
    }

    impl SourceAdapter for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn poll(&mut self) -> Result<PollOutcome, AdapterError> {
            self.ticks.pop_front().unwrap_or_else(|| Ok(PollOutcome::default()))
        }

        fn next_delay(&self, _produced: bool) -> Duration {
            Duration::from_millis(5)
        }
    }

    fn record(id: u32, p1: f64) -> CanonicalRecord {
        let mut rec = CanonicalRecord::new(BoardId::Counter(id));
        rec.channels.push((ChannelKey::P1, Reading::Value(p1)));
        rec
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() {
            assert!(Instant::now() < deadline, "timeout esperando condição");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn forwards_in_order_and_reports_issues() {
        let opener = MemoryOpener::default();
        let link = Link::open(&opener, "COM4", 115_200, Duration::from_millis(5)).unwrap();
        let (events, rx) = EventSink::channel(16);

        let ticks = VecDeque::from([Ok(PollOutcome {
            records: vec![record(1, 1.5), record(2, 2.0)],
            issues: vec![AdapterIssue::Notice("aviso".into())],
        })]);
        let worker = AdapterWorker::spawn(Box::new(Scripted { ticks }), link, 2, events).unwrap();

        let port = opener.port("COM4");
        wait_until(|| port.written_lines().len() == 2);
        assert_eq!(worker.stop(), WorkerExit::Stopped);
        assert_eq!(port.written_lines(), vec!["Board: 01 P1:1.5", "Board: 02 P1:2"]);

        let received: Vec<BridgeEvent> = rx.try_iter().collect();
        assert!(matches!(received[0], BridgeEvent::Issue { adapter: "scripted", .. }));
        assert!(matches!(received[1], BridgeEvent::Forwarded { .. }));
    }

    #[test]
    fn device_failure_ends_loop() {
        let opener = MemoryOpener::default();
        let link = Link::open(&opener, "COM4", 115_200, Duration::from_millis(5)).unwrap();
        let (events, rx) = EventSink::channel(16);

        let ticks = VecDeque::from([Err(AdapterError::Device {
            device: "COM16".into(),
            source: std::io::Error::other("cabo desconectado"),
        })]);
        let worker = AdapterWorker::spawn(Box::new(Scripted { ticks }), link, 2, events).unwrap();

        wait_until(|| worker.is_finished());
        assert!(matches!(worker.stop(), WorkerExit::Fatal(_)));
        assert!(matches!(rx.try_recv(), Ok(BridgeEvent::SessionEnded { .. })));
    }

    #[test]
    fn downstream_write_failure_is_fatal() {
        let opener = MemoryOpener::default();
        let link = Link::open(&opener, "COM4", 115_200, Duration::from_millis(5)).unwrap();
        opener.port("COM4").set_fail_writes(true);
        let (events, _rx) = EventSink::channel(16);

        let ticks = VecDeque::from([Ok(PollOutcome {
            records: vec![record(1, 1.0)],
            issues: vec![],
        })]);
        let worker =
            AdapterWorker::spawn(Box::new(Scripted { ticks }), link.clone(), 2, events).unwrap();

        wait_until(|| worker.is_finished());
        assert!(matches!(worker.stop(), WorkerExit::Fatal(_)));
        assert!(link.is_broken());
    }

    #[test]
    fn stop_interrupts_long_sleep() {
        let start = Instant::now();
        let stop = AtomicBool::new(true);
        sleep_unless_stopped(Duration::from_secs(60), &stop);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
