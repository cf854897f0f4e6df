use crate::domain::amount::Amount;
use crate::domain::denomination::{DEFAULT_TOLERANCE, DenominationTable};
use crate::domain::invoice::{
    DEFAULT_FRESHNESS, Invoice, PaymentOutcome, PaymentReport, select_fresh_tokens,
};
use crate::domain::ports::{HardwareLineRef, InvoiceClientRef, Level, Pin};
use crate::domain::pulse::{
    AggregatorSettings, DEFAULT_BURST_QUIET, DEFAULT_DEBOUNCE, EdgeAcceptance, PulseAggregator,
};
use crate::domain::settlement::{DEFAULT_ABSOLUTE_TIMEOUT, Progress, Settlement, SettlementTimer};
use crate::domain::transaction::{Transaction, TransactionSnapshot, TransactionState};
use crate::error::{ClientError, ControllerError, HardwareError};
use chrono::Utc;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// Tunables of the controller. See [`crate::config::TransactionConfig`].
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub pulse_pin: Pin,
    pub enable_pin: Pin,
    pub debounce: Duration,
    /// Silence that closes a burst, and the quiet window before settling.
    pub burst_quiet: Duration,
    pub absolute_timeout: Duration,
    pub freshness: Duration,
    pub discovery_backoff: Duration,
    pub tick: Duration,
    /// Insufficient-payment rejections tolerated before abandoning.
    pub retry_ceiling: u32,
    pub tolerance: u32,
    pub denominations: DenominationTable,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            pulse_pin: Pin(14),
            enable_pin: Pin(15),
            debounce: DEFAULT_DEBOUNCE,
            burst_quiet: DEFAULT_BURST_QUIET,
            absolute_timeout: DEFAULT_ABSOLUTE_TIMEOUT,
            freshness: DEFAULT_FRESHNESS,
            discovery_backoff: Duration::from_secs(1),
            tick: Duration::from_secs(1),
            retry_ceiling: 2,
            tolerance: DEFAULT_TOLERANCE,
            denominations: DenominationTable::default(),
        }
    }
}

/// Result of one settlement tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No transaction is active; nothing was evaluated.
    Inactive,
    Pending { remaining: Duration },
    Settled {
        settlement: Settlement,
        disposition: ReportDisposition,
    },
}

/// What the controller did with the backend's answer to a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportDisposition {
    Paid,
    /// Short payment within the retry ceiling; the transaction is active again.
    RetryAllowed { retries: u32 },
    /// Short payment beyond the retry ceiling.
    Abandoned { retries: u32 },
    AlreadyCompleted,
    /// Generic rejection or transport failure.
    Failed,
    /// The transaction was reset while the report was in flight.
    Stale,
}

struct Inner {
    state: TransactionState,
    transaction: Option<Transaction>,
    aggregator: PulseAggregator,
    timer: Option<SettlementTimer>,
}

struct Shared {
    inner: Mutex<Inner>,
    hardware: HardwareLineRef,
    client: InvoiceClientRef,
    settings: ControllerSettings,
    phase: watch::Sender<TransactionState>,
}

impl Shared {
    fn transition(&self, inner: &mut Inner, next: TransactionState) {
        if inner.state == next {
            return;
        }
        info!(from = %inner.state, to = %next, "state transition");
        inner.state = next;
        self.phase.send_replace(next);
    }

    fn drive_enable(&self, level: Level) {
        if let Err(e) = self.hardware.write(self.settings.enable_pin, level) {
            error!(pin = %self.settings.enable_pin, ?level, error = %e, "failed to drive enable line");
        }
    }

    fn reset(&self, inner: &mut Inner) {
        inner.transaction = None;
        inner.timer = None;
        inner.aggregator.clear();
        self.transition(inner, TransactionState::Idle);
        self.drive_enable(Level::Low);
        info!("transaction reset");
    }

    /// Resolves a quiet burst into a deposit and reopens the acceptor.
    fn resolve_pending(&self, inner: &mut Inner) {
        let Some(result) = inner.aggregator.finish_burst() else {
            return;
        };
        match (result, inner.transaction.as_mut()) {
            (Ok(resolution), Some(tx)) => {
                tx.deposit(resolution.amount);
                info!(
                    transaction_id = %tx.id,
                    pulses = resolution.observed,
                    corrected = resolution.corrected,
                    amount = %resolution.amount,
                    total = %tx.total_inserted,
                    remaining_due = %tx.remaining_due(),
                    "burst resolved"
                );
            }
            (Ok(resolution), None) => {
                warn!(pulses = resolution.observed, "burst resolved without a transaction, discarded");
            }
            (Err(invalid), _) => {
                warn!(pulses = invalid.observed, nearest = ?invalid.nearest, "invalid pulse burst discarded");
            }
        }
        if inner.state == TransactionState::Active {
            self.drive_enable(Level::High);
        }
    }

    fn start_timer(&self, now: Instant) -> SettlementTimer {
        SettlementTimer::start(now, self.settings.absolute_timeout, self.settings.burst_quiet)
    }
}

/// Owns the transaction lifecycle and everything that touches it.
///
/// All mutable state sits behind one lock. The edge callback, discovery and
/// settlement only ever hold it for in-memory work and GPIO writes; network
/// calls run with the lock released.
#[derive(Clone)]
pub struct TransactionController {
    shared: Arc<Shared>,
}

impl TransactionController {
    pub fn new(
        hardware: HardwareLineRef,
        client: InvoiceClientRef,
        settings: ControllerSettings,
    ) -> Self {
        let aggregator = PulseAggregator::new(
            settings.denominations.clone(),
            AggregatorSettings {
                debounce: settings.debounce,
                burst_quiet: settings.burst_quiet,
                tolerance: settings.tolerance,
            },
        );
        let (phase, _) = watch::channel(TransactionState::Idle);
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: TransactionState::Idle,
                    transaction: None,
                    aggregator,
                    timer: None,
                }),
                hardware,
                client,
                settings,
                phase,
            }),
        }
    }

    /// Configures both lines, gates the acceptor and subscribes to pulses.
    ///
    /// A failure here means pulses can be neither observed nor gated, so the
    /// caller must not proceed.
    pub fn attach(&self) -> Result<(), HardwareError> {
        let settings = &self.shared.settings;
        let hardware = &self.shared.hardware;

        hardware.configure_input(settings.pulse_pin)?;
        hardware.configure_output(settings.enable_pin)?;
        hardware.write(settings.enable_pin, Level::Low)?;

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        hardware.on_rising_edge(
            settings.pulse_pin,
            Box::new(move |at| {
                if let Some(shared) = weak.upgrade() {
                    TransactionController { shared }.on_edge(at);
                }
            }),
        )?;

        info!(
            pulse_pin = %settings.pulse_pin,
            enable_pin = %settings.enable_pin,
            "acceptor lines attached"
        );
        Ok(())
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.shared.settings
    }

    pub fn state(&self) -> TransactionState {
        self.shared.inner.lock().state
    }

    /// True while a transaction exists (active, settling or reporting).
    pub fn is_busy(&self) -> bool {
        self.state().is_in_flight()
    }

    pub fn snapshot(&self) -> TransactionSnapshot {
        let inner = self.shared.inner.lock();
        TransactionSnapshot {
            state: inner.state,
            transaction: inner.transaction.clone(),
            pending_pulse_count: inner.aggregator.pending(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<TransactionState> {
        self.shared.phase.subscribe()
    }

    /// Handles one rising edge from the pulse line.
    pub fn on_edge(&self, at: Instant) {
        let shared = &self.shared;
        let mut guard = shared.inner.lock();
        let inner = &mut *guard;

        if inner.state != TransactionState::Active {
            trace!(state = %inner.state, "edge ignored outside an active transaction");
            return;
        }

        match inner.aggregator.on_edge(at) {
            EdgeAcceptance::Debounced => trace!("edge debounced"),
            EdgeAcceptance::Accepted { pending, first } => {
                if first {
                    shared.drive_enable(Level::Low);
                    debug!("burst started, acceptor gated");
                }
                if let Some(timer) = inner.timer.as_mut() {
                    timer.refresh(at);
                }
                debug!(pending, "pulse received");
            }
        }
    }

    /// Polls the backend once for a fresh, unpaid invoice and activates it.
    pub async fn discover(&self) -> Result<Option<Transaction>, ControllerError> {
        {
            let mut inner = self.shared.inner.lock();
            if inner.state.is_in_flight() {
                return Ok(None);
            }
            self.shared.transition(&mut inner, TransactionState::Searching);
        }

        info!("searching for payment token");
        let tokens = self.shared.client.pending_tokens().await?;
        let now = Utc::now();
        let candidates = select_fresh_tokens(&tokens, now, self.shared.settings.freshness);
        if candidates.is_empty() {
            info!(listed = tokens.len(), "no qualifying payment token, waiting");
            return Ok(None);
        }

        for token in candidates {
            let age = (now - token.created_at).num_seconds();
            info!(token = %token.payment_token, age_secs = age, "payment token found");

            let invoice = self.shared.client.invoice(&token.payment_token).await?;
            if invoice.is_paid {
                info!(token = %invoice.payment_token, "invoice already paid, searching again");
                continue;
            }
            return self.activate(invoice).map(Some);
        }
        Ok(None)
    }

    /// Starts a transaction for `invoice` and opens the acceptor.
    pub fn activate(&self, invoice: Invoice) -> Result<Transaction, ControllerError> {
        let now = Instant::now();
        let shared = &self.shared;
        let mut guard = shared.inner.lock();
        let inner = &mut *guard;

        if inner.transaction.is_some() || inner.state.is_in_flight() {
            return Err(ControllerError::AlreadyActive);
        }

        let tx = Transaction::from_invoice(invoice);
        inner.aggregator.clear();
        inner.timer = Some(shared.start_timer(now));
        inner.transaction = Some(tx.clone());
        shared.transition(inner, TransactionState::Active);
        shared.drive_enable(Level::High);

        info!(
            transaction_id = %tx.id,
            token = %tx.payment_token,
            price = %tx.product_price,
            "transaction started"
        );
        Ok(tx)
    }

    /// Runs one settlement evaluation and, when it is terminal, the report.
    pub async fn tick(&self) -> TickOutcome {
        let now = Instant::now();
        let shared = &self.shared;

        let (report, settlement) = {
            let mut guard = shared.inner.lock();
            let inner = &mut *guard;

            let settlement = loop {
                if inner.state != TransactionState::Active {
                    return TickOutcome::Inactive;
                }
                let (Some(timer), Some(tx)) = (inner.timer, inner.transaction.as_ref()) else {
                    return TickOutcome::Inactive;
                };
                let progress = Progress {
                    total_inserted: tx.total_inserted,
                    product_price: tx.product_price,
                    burst: inner.aggregator.status(now),
                };
                match timer.evaluate(now, progress) {
                    Settlement::ResolveBurst => shared.resolve_pending(inner),
                    Settlement::Pending { remaining } => {
                        debug!(remaining_secs = remaining.as_secs(), "waiting for payment");
                        return TickOutcome::Pending { remaining };
                    }
                    settlement => {
                        debug_assert!(settlement.is_terminal());
                        break settlement;
                    }
                }
            };

            inner.timer = None;
            shared.transition(inner, TransactionState::Settling);
            shared.drive_enable(Level::Low);

            let Some(tx) = inner.transaction.as_ref() else {
                return TickOutcome::Inactive;
            };
            log_settlement(tx, settlement);
            let report = tx.report();
            shared.transition(inner, TransactionState::Reporting);
            (report, settlement)
        };

        info!(
            transaction_id = %report.id,
            token = %report.payment_token,
            total = %report.product_price,
            "submitting payment status"
        );
        let outcome = shared.client.submit_payment(&report).await;
        let disposition = self.apply_report(&report, outcome);

        TickOutcome::Settled {
            settlement,
            disposition,
        }
    }

    fn apply_report(
        &self,
        report: &PaymentReport,
        outcome: Result<PaymentOutcome, ClientError>,
    ) -> ReportDisposition {
        let shared = &self.shared;
        let mut guard = shared.inner.lock();
        let inner = &mut *guard;

        let still_reporting = inner.state == TransactionState::Reporting
            && inner.transaction.as_ref().is_some_and(|tx| tx.id == report.id);
        if !still_reporting {
            warn!(transaction_id = %report.id, "report outcome for a transaction no longer reporting");
            return ReportDisposition::Stale;
        }

        match outcome {
            Ok(PaymentOutcome::Accepted {
                message,
                payment_date,
            }) => {
                info!(
                    transaction_id = %report.id,
                    total = %report.product_price,
                    response = %message,
                    payment_date = payment_date.as_deref().unwrap_or("-"),
                    "payment accepted"
                );
                shared.reset(inner);
                ReportDisposition::Paid
            }
            Ok(PaymentOutcome::InsufficientPayment(message)) => {
                let ceiling = shared.settings.retry_ceiling;
                let Some(tx) = inner.transaction.as_mut() else {
                    return ReportDisposition::Stale;
                };
                tx.insufficient_payment_retries += 1;
                let retries = tx.insufficient_payment_retries;

                if retries > ceiling {
                    warn!(
                        transaction_id = %report.id,
                        retries,
                        ceiling,
                        response = %message,
                        "insufficient payment beyond retry ceiling, transaction abandoned"
                    );
                    shared.reset(inner);
                    ReportDisposition::Abandoned { retries }
                } else {
                    info!(
                        transaction_id = %report.id,
                        retries,
                        ceiling,
                        remaining_due = %tx.remaining_due(),
                        response = %message,
                        "insufficient payment, customer may keep inserting money"
                    );
                    inner.timer = Some(shared.start_timer(Instant::now()));
                    shared.transition(inner, TransactionState::Active);
                    shared.drive_enable(Level::High);
                    ReportDisposition::RetryAllowed { retries }
                }
            }
            Ok(PaymentOutcome::AlreadyCompleted(message)) => {
                info!(transaction_id = %report.id, response = %message, "payment already completed elsewhere");
                shared.reset(inner);
                ReportDisposition::AlreadyCompleted
            }
            Ok(PaymentOutcome::Rejected { status, message }) => {
                warn!(transaction_id = %report.id, status, response = %message, "payment rejected");
                shared.reset(inner);
                ReportDisposition::Failed
            }
            Err(e) => {
                warn!(transaction_id = %report.id, error = %e, "failed to submit payment status");
                shared.reset(inner);
                ReportDisposition::Failed
            }
        }
    }

    /// Drops the current transaction, if any, and gates the acceptor.
    pub fn reset(&self) {
        let mut inner = self.shared.inner.lock();
        self.shared.reset(&mut inner);
    }

    /// Runs discovery and settlement until `shutdown` resolves.
    ///
    /// The acceptor is gated on the way out.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        info!("controller running");
        tokio::select! {
            _ = shutdown => info!("shutdown requested"),
            _ = self.discovery_loop() => warn!("discovery loop stopped"),
            _ = self.settlement_loop() => warn!("settlement loop stopped"),
        }
        self.reset();
    }

    async fn discovery_loop(&self) {
        let mut phase = self.subscribe();
        loop {
            if phase.wait_for(|state| !state.is_in_flight()).await.is_err() {
                return;
            }
            match self.discover().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => warn!(error = %e, "invoice discovery failed"),
            }
            tokio::time::sleep(self.shared.settings.discovery_backoff).await;
        }
    }

    async fn settlement_loop(&self) {
        let mut phase = self.subscribe();
        loop {
            if phase
                .wait_for(|state| *state == TransactionState::Active)
                .await
                .is_err()
            {
                return;
            }
            self.supervise_transaction(&mut phase).await;
        }
    }

    /// Ticks the settlement timer of the current transaction until it leaves
    /// the in-flight states.
    async fn supervise_transaction(&self, phase: &mut watch::Receiver<TransactionState>) {
        let period = self.shared.settings.tick;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = phase.wait_for(|state| !state.is_in_flight()) => {
                    debug!("settlement timer cancelled");
                    return;
                }
            }
            match self.tick().await {
                TickOutcome::Inactive => return,
                TickOutcome::Pending { .. } => {}
                TickOutcome::Settled {
                    disposition: ReportDisposition::RetryAllowed { .. },
                    ..
                } => {}
                TickOutcome::Settled { .. } => return,
            }
        }
    }
}

fn log_settlement(tx: &Transaction, settlement: Settlement) {
    match settlement {
        Settlement::PaidComplete { overpaid } if overpaid == Amount::ZERO => {
            info!(transaction_id = %tx.id, total = %tx.total_inserted, "transaction complete");
        }
        Settlement::PaidComplete { overpaid } => {
            info!(
                transaction_id = %tx.id,
                total = %tx.total_inserted,
                %overpaid,
                "transaction complete with overpayment"
            );
        }
        Settlement::TimedOut { shortfall, .. } if !tx.is_covered() => {
            warn!(
                transaction_id = %tx.id,
                total = %tx.total_inserted,
                %shortfall,
                "transaction timed out short"
            );
        }
        Settlement::TimedOut { .. } => {
            info!(
                transaction_id = %tx.id,
                total = %tx.total_inserted,
                overpaid = %tx.overpaid(),
                "transaction timed out fully paid"
            );
        }
        Settlement::Pending { .. } | Settlement::ResolveBurst => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::invoice::InvoiceId;
    use crate::infrastructure::in_memory::InMemoryInvoiceClient;
    use crate::infrastructure::simulated::SimulatedLine;

    fn controller() -> (TransactionController, SimulatedLine) {
        let line = SimulatedLine::new();
        let controller = TransactionController::new(
            Arc::new(line.clone()),
            Arc::new(InMemoryInvoiceClient::new()),
            ControllerSettings::default(),
        );
        controller.attach().unwrap();
        (controller, line)
    }

    fn invoice() -> Invoice {
        Invoice {
            id: InvoiceId::Number(1),
            payment_token: "tok".to_string(),
            product_price: Amount::new(2000),
            is_paid: false,
        }
    }

    #[tokio::test]
    async fn test_outcome_after_reset_is_stale() {
        let (controller, line) = controller();
        let tx = controller.activate(invoice()).unwrap();
        controller.reset();

        let outcome = Ok(PaymentOutcome::Accepted {
            message: "ok".to_string(),
            payment_date: None,
        });
        assert_eq!(
            controller.apply_report(&tx.report(), outcome),
            ReportDisposition::Stale
        );
        assert_eq!(controller.state(), TransactionState::Idle);
        assert_eq!(line.level(settings_enable(&controller)), Some(Level::Low));
    }

    #[tokio::test]
    async fn test_attach_fails_without_driver() {
        let controller = TransactionController::new(
            Arc::new(SimulatedLine::failing("no daemon")),
            Arc::new(InMemoryInvoiceClient::new()),
            ControllerSettings::default(),
        );
        assert!(matches!(
            controller.attach(),
            Err(HardwareError::Unavailable(_))
        ));
    }

    #[test]
    fn test_attach_configures_lines_and_gates_acceptor() {
        let (controller, line) = controller();
        let settings = controller.settings();
        assert!(line.is_input(settings.pulse_pin));
        assert!(line.is_output(settings.enable_pin));
        assert!(!line.is_output(settings.pulse_pin));
        assert_eq!(line.writes(), vec![(settings.enable_pin, Level::Low)]);
    }

    #[test]
    fn test_phase_is_published() {
        let (controller, _) = controller();
        let phase = controller.subscribe();
        controller.activate(invoice()).unwrap();
        assert_eq!(*phase.borrow(), TransactionState::Active);
        assert!(controller.is_busy());
    }

    fn settings_enable(controller: &TransactionController) -> Pin {
        controller.settings().enable_pin
    }
}
