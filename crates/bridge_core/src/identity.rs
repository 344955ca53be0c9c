//! Numeração sequencial das placas com reset por silêncio.
//!
//! O cartão Burnsys não informa qual placa está lendo: as placas são
//! lidas em sequência e o contador volta a 1 quando o fluxo de frames
//! fica parado por mais que a janela de silêncio (20 min por padrão).

use std::time::{Duration, Instant};

/// Janela de silêncio padrão.
pub const DEFAULT_SILENCE_TIMEOUT: Duration = Duration::from_secs(20 * 60);

#[derive(Debug, Clone)]
pub struct BoardIdentity {
    next: u32,
    last_success: Option<Instant>,
    timeout: Duration,
}

impl Default for BoardIdentity {
    fn default() -> Self {
        Self::new(DEFAULT_SILENCE_TIMEOUT)
    }
}

impl BoardIdentity {
    pub fn new(timeout: Duration) -> Self {
        Self {
            next: 1,
            last_success: None,
            timeout,
        }
    }

    /// Valor que será atribuído à próxima leitura.
    pub fn current(&self) -> u32 {
        self.next
    }

    pub fn last_success(&self) -> Option<Instant> {
        self.last_success
    }

    /// Registra um decode bem-sucedido em `now` e devolve a identidade dele.
    pub fn record_success_at(&mut self, now: Instant) -> u32 {
        if self.is_silent(now) {
            self.next = 1;
        }
        let assigned = self.next;
        self.next = self.next.saturating_add(1);
        self.last_success = Some(now);
        assigned
    }

    /// Troca a janela de silêncio sem mexer na numeração.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// `true` se a janela de silêncio estourou desde o último sucesso.
    pub fn is_silent(&self, now: Instant) -> bool {
        self.last_success
            .is_some_and(|last| now.saturating_duration_since(last) > self.timeout)
    }

    /// Verificação periódica: volta o contador para 1 se houve silêncio.
    /// Retorna `true` quando houve reset.
    pub fn expire_if_silent(&mut self, now: Instant) -> bool {
        if !self.is_silent(now) {
            return false;
        }
        self.next = 1;
        self.last_success = None;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_up_within_window() {
        let t0 = Instant::now();
        let mut id = BoardIdentity::default();
        assert_eq!(id.record_success_at(t0), 1);
        assert_eq!(id.record_success_at(t0 + Duration::from_secs(60)), 2);
        assert_eq!(id.record_success_at(t0 + Duration::from_secs(120)), 3);
        assert_eq!(id.current(), 4);
    }

    #[test]
    fn resets_after_silence() {
        let t0 = Instant::now();
        let mut id = BoardIdentity::default();
        assert_eq!(id.record_success_at(t0), 1);
        assert_eq!(id.record_success_at(t0 + Duration::from_millis(1)), 2);
        assert_eq!(id.record_success_at(t0 + Duration::from_millis(2)), 3);
        assert_eq!(id.record_success_at(t0 + Duration::from_secs(1201)), 1);
        assert_eq!(id.record_success_at(t0 + Duration::from_secs(1202)), 2);
    }

    #[test]
    fn exactly_at_timeout_does_not_reset() {
        let t0 = Instant::now();
        let mut id = BoardIdentity::new(Duration::from_secs(10));
        id.record_success_at(t0);
        assert_eq!(id.record_success_at(t0 + Duration::from_secs(10)), 2);
    }

    #[test]
    fn new_timeout_keeps_numbering() {
        let t0 = Instant::now();
        let mut id = BoardIdentity::new(Duration::from_secs(1200));
        id.record_success_at(t0);
        id.record_success_at(t0);
        id.set_timeout(Duration::from_secs(5));
        assert_eq!(id.current(), 3);
        assert_eq!(id.record_success_at(t0 + Duration::from_secs(6)), 1);
    }

    #[test]
    fn periodic_expiry() {
        let t0 = Instant::now();
        let mut id = BoardIdentity::new(Duration::from_secs(10));
        assert!(!id.expire_if_silent(t0));
        id.record_success_at(t0);
        id.record_success_at(t0);
        assert!(!id.expire_if_silent(t0 + Duration::from_secs(5)));
        assert_eq!(id.current(), 3);
        assert!(id.expire_if_silent(t0 + Duration::from_secs(11)));
        assert_eq!(id.current(), 1);
        assert_eq!(id.last_success(), None);
        assert_eq!(id.record_success_at(t0 + Duration::from_secs(12)), 1);
    }
}
