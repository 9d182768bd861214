//! Value-change detection and periodic scanning
//!
//! A [`ChangeDetector`] decides which freshly read values are significant
//! enough to send downstream, and optionally drives the reads on a timer.
//!
//! The detector is data-type agnostic: it always works on one [`ScalarValue`].
//! The caller extracts that scalar (a digital state, a latch flag, a feature
//! value, an analog reading or a memory-mapped value) from the response body
//! before calling [`ChangeDetector::update_value`].
//!
//! # Change policies
//!
//! | Policy | Emits when |
//! |---|---|
//! | [`ChangeType::None`] | `new != last` |
//! | [`ChangeType::Deadband`] | `abs(new - last) >= deadband` |
//! | [`ChangeType::RisingEdgeOnly`] | `last == false && new == true` |
//! | [`ChangeType::FallingEdgeOnly`] | `last == true && new == false` |
//!
//! The first reading is the baseline. It is emitted only when the detector was
//! built with `send_initial_value`.
//!
//! # Example
//!
//! ```ignore
//! let detector = ChangeDetector::new(500.0, ChangeType::Deadband, Some(0.5), false, on_tick)?;
//! detector.start()?;
//! // in the tick handler:
//! if detector.update_value(ScalarValue::Number(reading))? {
//!     host.send(msg);
//! }
//! ```

use crate::error::{BridgeError, Result};
use crate::types::ScalarValue;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Future returned by a scan callback
pub type ScanFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Callback invoked once per scan tick
pub type ScanCallback = Arc<dyn Fn() -> ScanFuture + Send + Sync>;

/// Policy deciding which readings are significant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChangeType {
    /// Any change
    #[default]
    None,
    /// Numeric change of at least the deadband
    Deadband,
    /// `false` to `true` transitions only
    RisingEdgeOnly,
    /// `true` to `false` transitions only
    FallingEdgeOnly,
}

/// Comparison state of one detector
#[derive(Debug, Clone)]
pub struct ScanState {
    change_type: ChangeType,
    deadband: Option<f64>,
    send_initial_value: bool,
    last_value: Option<ScalarValue>,
    has_emitted_once: bool,
    consecutive_errors: u32,
}

impl ScanState {
    /// Create the state, validating that a deadband policy has a threshold
    pub fn new(
        change_type: ChangeType,
        deadband: Option<f64>,
        send_initial_value: bool,
    ) -> Result<Self> {
        if change_type == ChangeType::Deadband {
            match deadband {
                Some(d) if d.is_finite() && d >= 0.0 => {}
                Some(d) => {
                    return Err(BridgeError::Config(format!(
                        "Deadband must be a non-negative number, got {}",
                        d
                    )))
                }
                None => {
                    return Err(BridgeError::Config(
                        "Deadband change type requires a deadband".to_string(),
                    ))
                }
            }
        }

        Ok(Self {
            change_type,
            deadband,
            send_initial_value,
            last_value: None,
            has_emitted_once: false,
            consecutive_errors: 0,
        })
    }

    /// Compare a new reading with the previous one and record it
    ///
    /// Returns whether the reading should be emitted. `last_value` is replaced
    /// by `new_value` whatever the decision, except when the reading is
    /// rejected as invalid for the policy.
    pub fn update_value(&mut self, new_value: ScalarValue) -> Result<bool> {
        if self.change_type == ChangeType::Deadband && new_value.as_f64().is_none() {
            return Err(BridgeError::InvalidValue(format!(
                "Deadband comparison needs a numeric value, got \"{}\"",
                new_value
            )));
        }

        let emit = match &self.last_value {
            None => self.send_initial_value,
            Some(last) => match self.change_type {
                ChangeType::None => *last != new_value,
                ChangeType::Deadband => {
                    let (Some(last), Some(new), Some(deadband)) =
                        (last.as_f64(), new_value.as_f64(), self.deadband)
                    else {
                        return Err(BridgeError::InvalidValue(
                            "Deadband comparison needs numeric values".to_string(),
                        ));
                    };
                    (new - last).abs() >= deadband
                }
                ChangeType::RisingEdgeOnly => {
                    last.as_bool() == Some(false) && new_value.as_bool() == Some(true)
                }
                ChangeType::FallingEdgeOnly => {
                    last.as_bool() == Some(true) && new_value.as_bool() == Some(false)
                }
            },
        };

        self.last_value = Some(new_value);
        self.consecutive_errors = 0;
        if emit {
            self.has_emitted_once = true;
        }
        Ok(emit)
    }

    /// Record a failed scan; the baseline is kept
    pub fn update_error(&mut self) {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
    }

    /// Forget the baseline so the next reading is treated as the first
    pub fn reset(&mut self) {
        self.last_value = None;
        self.has_emitted_once = false;
        self.consecutive_errors = 0;
    }

    pub fn change_type(&self) -> ChangeType {
        self.change_type
    }

    pub fn deadband(&self) -> Option<f64> {
        self.deadband
    }

    pub fn last_value(&self) -> Option<&ScalarValue> {
        self.last_value.as_ref()
    }

    pub fn has_emitted_once(&self) -> bool {
        self.has_emitted_once
    }

    /// Number of failed scans since the last successful one
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }
}

/// Periodic scanner with value-change filtering
pub struct ChangeDetector {
    interval: Option<Duration>,
    state: Mutex<ScanState>,
    on_tick: ScanCallback,
    /// Held for the whole of one scan, timer or on demand
    scan_gate: Arc<tokio::sync::Mutex<()>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl ChangeDetector {
    /// Create a detector
    ///
    /// # Arguments
    /// * `interval_ms` - Scan period. Zero, negative or non-finite values disable the timer.
    /// * `change_type` - Policy deciding which readings are emitted
    /// * `deadband` - Threshold, required for [`ChangeType::Deadband`]
    /// * `send_initial_value` - Whether the first reading is emitted
    /// * `on_tick` - Invoked once per tick; its future is awaited before the next tick
    pub fn new(
        interval_ms: f64,
        change_type: ChangeType,
        deadband: Option<f64>,
        send_initial_value: bool,
        on_tick: ScanCallback,
    ) -> Result<Self> {
        let state = ScanState::new(change_type, deadband, send_initial_value)?;
        Ok(Self::with_state(interval_ms, state, on_tick))
    }

    /// Create a detector from an already validated state
    pub fn with_state(interval_ms: f64, state: ScanState, on_tick: ScanCallback) -> Self {
        let interval = if interval_ms.is_finite() && interval_ms > 0.0 {
            Some(Duration::from_secs_f64(interval_ms / 1000.0))
        } else {
            None
        };

        Self {
            interval,
            state: Mutex::new(state),
            on_tick,
            scan_gate: Arc::new(tokio::sync::Mutex::new(())),
            ticker: Mutex::new(None),
        }
    }

    /// Scan period, `None` when scanning is manual
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Start invoking the scan callback at the configured interval
    ///
    /// Does nothing for manual detectors or when already running.
    pub fn start(&self) -> Result<()> {
        let Some(period) = self.interval else {
            tracing::debug!("Scanner has no interval, manual scanning only");
            return Ok(());
        };

        let mut ticker = self.ticker_guard();
        if ticker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BridgeError::Runtime(e.to_string()))?;
        let on_tick = Arc::clone(&self.on_tick);
        let gate = Arc::clone(&self.scan_gate);

        *ticker = Some(runtime.spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let _scan = gate.lock().await;
                on_tick().await;
            }
        }));

        tracing::debug!("Scanner started with period {:?}", period);
        Ok(())
    }

    /// Stop the timer. Safe to call more than once.
    pub fn close(&self) {
        if let Some(handle) = self.ticker_guard().take() {
            handle.abort();
            tracing::debug!("Scanner stopped");
        }
    }

    /// Whether the timer is running
    pub fn is_running(&self) -> bool {
        self.ticker_guard()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Run one scan now, outside the timer
    ///
    /// Waits for a timer scan in progress to finish first.
    pub async fn scan_now(&self) {
        let _scan = self.scan_gate.lock().await;
        (self.on_tick)().await;
    }

    /// Record a fresh reading; returns whether it should be emitted
    pub fn update_value(&self, new_value: ScalarValue) -> Result<bool> {
        self.state_guard().update_value(new_value)
    }

    /// Record a failed scan
    pub fn update_error(&self) {
        self.state_guard().update_error();
    }

    /// Forget the baseline
    pub fn reset(&self) {
        self.state_guard().reset();
    }

    /// Snapshot of the comparison state
    pub fn state(&self) -> ScanState {
        self.state_guard().clone()
    }

    fn state_guard(&self) -> MutexGuard<'_, ScanState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ticker_guard(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.ticker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ChangeDetector {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ChangeDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeDetector")
            .field("interval", &self.interval)
            .field("state", &*self.state_guard())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn state(change_type: ChangeType, deadband: Option<f64>, initial: bool) -> ScanState {
        ScanState::new(change_type, deadband, initial).unwrap()
    }

    fn emitted(state: &mut ScanState, values: &[ScalarValue]) -> Vec<usize> {
        values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| state.update_value(v.clone()).unwrap().then_some(i))
            .collect()
    }

    fn bools(values: &[bool]) -> Vec<ScalarValue> {
        values.iter().map(|b| ScalarValue::Bool(*b)).collect()
    }

    fn counting_callback() -> (ScanCallback, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let callback: ScanCallback = Arc::new(move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });
        (callback, count)
    }

    #[test]
    fn test_initial_value_follows_flag() {
        let mut quiet = state(ChangeType::None, None, false);
        assert!(!quiet.update_value(ScalarValue::Bool(false)).unwrap());
        assert!(quiet.update_value(ScalarValue::Bool(true)).unwrap());

        let mut loud = state(ChangeType::None, None, true);
        assert!(loud.update_value(ScalarValue::Bool(false)).unwrap());
        assert!(loud.has_emitted_once());
    }

    #[test]
    fn test_none_policy_any_type() {
        let mut s = state(ChangeType::None, None, false);
        let values = vec![
            ScalarValue::from("a"),
            ScalarValue::from("a"),
            ScalarValue::from("b"),
            ScalarValue::Number(1.0),
            ScalarValue::Number(1.0),
        ];
        assert_eq!(emitted(&mut s, &values), vec![2, 3]);
    }

    #[test]
    fn test_rising_edge_sequence() {
        let mut s = state(ChangeType::RisingEdgeOnly, None, false);
        let values = bools(&[false, false, true, true, false]);
        assert_eq!(emitted(&mut s, &values), vec![2]);
    }

    #[test]
    fn test_falling_edge_sequence() {
        let mut s = state(ChangeType::FallingEdgeOnly, None, false);
        let values = bools(&[false, true, false, true, true, false]);
        assert_eq!(emitted(&mut s, &values), vec![2, 5]);
    }

    #[test]
    fn test_deadband_boundary_is_inclusive() {
        let mut s = state(ChangeType::Deadband, Some(1.0), false);
        let values: Vec<ScalarValue> = [0.0, 0.5, 1.5, 2.0, 0.9]
            .iter()
            .map(|v| ScalarValue::Number(*v))
            .collect();
        // Compared with the previous reading, not the last emitted one
        assert_eq!(emitted(&mut s, &values), vec![2, 4]);
    }

    #[test]
    fn test_deadband_requires_threshold() {
        assert!(ScanState::new(ChangeType::Deadband, None, false).is_err());
        assert!(ScanState::new(ChangeType::Deadband, Some(-1.0), false).is_err());
        assert!(ScanState::new(ChangeType::None, None, false).is_ok());
    }

    #[test]
    fn test_deadband_rejects_non_numeric_without_touching_state() {
        let mut s = state(ChangeType::Deadband, Some(1.0), false);
        s.update_value(ScalarValue::Number(3.0)).unwrap();
        let err = s.update_value(ScalarValue::Bool(true)).unwrap_err();
        assert!(err.is_application_error());
        assert_eq!(s.last_value(), Some(&ScalarValue::Number(3.0)));
    }

    #[test]
    fn test_error_keeps_baseline() {
        let mut s = state(ChangeType::None, None, false);
        s.update_value(ScalarValue::Number(5.0)).unwrap();
        s.update_error();
        s.update_error();
        assert_eq!(s.consecutive_errors(), 2);
        assert!(!s.update_value(ScalarValue::Number(5.0)).unwrap());
        assert_eq!(s.consecutive_errors(), 0);
    }

    #[test]
    fn test_reset_restores_baseline_rules() {
        let mut s = state(ChangeType::None, None, true);
        s.update_value(ScalarValue::Number(1.0)).unwrap();
        s.reset();
        assert!(s.last_value().is_none());
        assert!(s.update_value(ScalarValue::Number(1.0)).unwrap());
    }

    #[test]
    fn test_manual_detector_has_no_interval() {
        let (callback, _) = counting_callback();
        let d = ChangeDetector::new(-1.0, ChangeType::None, None, false, callback.clone()).unwrap();
        assert!(d.interval().is_none());
        let d = ChangeDetector::new(0.0, ChangeType::None, None, false, callback).unwrap();
        assert!(d.interval().is_none());
    }

    #[test]
    fn test_start_without_runtime_fails() {
        let (callback, _) = counting_callback();
        let d = ChangeDetector::new(100.0, ChangeType::None, None, false, callback).unwrap();
        assert!(matches!(d.start(), Err(BridgeError::Runtime(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_drives_callback() {
        let (callback, count) = counting_callback();
        let d = ChangeDetector::new(250.0, ChangeType::None, None, false, callback).unwrap();
        d.start().unwrap();
        d.start().unwrap();
        assert!(d.is_running());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        d.close();
        d.close();
        assert!(!d.is_running());
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_start_does_not_tick() {
        let (callback, count) = counting_callback();
        let d = ChangeDetector::new(-1.0, ChangeType::None, None, false, callback).unwrap();
        d.start().unwrap();
        assert!(!d.is_running());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        d.scan_now().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_and_manual_scans_never_overlap() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let scans = Arc::new(AtomicUsize::new(0));
        let callback: ScanCallback = {
            let (active, peak, scans) = (active.clone(), peak.clone(), scans.clone());
            Arc::new(move || -> ScanFuture {
                let (active, peak, scans) = (active.clone(), peak.clone(), scans.clone());
                Box::pin(async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    scans.fetch_add(1, Ordering::SeqCst);
                })
            })
        };
        let d = Arc::new(ChangeDetector::new(1000.0, ChangeType::None, None, false, callback).unwrap());
        d.start().unwrap();

        // Land inside the first timer scan (1000..1300 ms)
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let manual = tokio::spawn({
            let d = Arc::clone(&d);
            async move { d.scan_now().await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(scans.load(Ordering::SeqCst), 0);

        manual.await.unwrap();
        assert_eq!(scans.load(Ordering::SeqCst), 2);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        d.close();
    }

    proptest! {
        #[test]
        fn prop_none_emits_iff_changed(values in prop::collection::vec(0i32..4, 1..40)) {
            let mut s = state(ChangeType::None, None, false);
            let mut previous: Option<i32> = None;
            for v in values {
                let emit = s.update_value(ScalarValue::Number(v as f64)).unwrap();
                match previous {
                    None => prop_assert!(!emit),
                    Some(p) => prop_assert_eq!(emit, p != v),
                }
                previous = Some(v);
            }
        }

        #[test]
        fn prop_deadband_emits_iff_delta_reaches_threshold(
            values in prop::collection::vec(-100i32..100, 2..40),
            deadband in 0i32..20,
        ) {
            let mut s = state(ChangeType::Deadband, Some(deadband as f64), false);
            let mut previous: Option<i32> = None;
            for v in values {
                let emit = s.update_value(ScalarValue::Number(v as f64)).unwrap();
                if let Some(p) = previous {
                    prop_assert_eq!(emit, (v - p).abs() >= deadband);
                }
                previous = Some(v);
            }
        }

        #[test]
        fn prop_edges_match_transitions(values in prop::collection::vec(any::<bool>(), 1..40)) {
            let mut rising = state(ChangeType::RisingEdgeOnly, None, false);
            let mut falling = state(ChangeType::FallingEdgeOnly, None, false);
            let mut previous: Option<bool> = None;
            for v in values {
                let r = rising.update_value(ScalarValue::Bool(v)).unwrap();
                let f = falling.update_value(ScalarValue::Bool(v)).unwrap();
                prop_assert_eq!(r, previous == Some(false) && v);
                prop_assert_eq!(f, previous == Some(true) && !v);
                previous = Some(v);
            }
        }
    }
}
