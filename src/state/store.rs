//! ControlStore - last known value of every physical control
//!
//! Values live in a concurrent map so readers never see a torn value. Every
//! write and its notification happen under one delivery lock, which keeps
//! notifications for a given control in the order the writes happened.

use dashmap::DashMap;
use parking_lot::ReentrantMutex;
use std::sync::Arc;
use tracing::trace;

use super::types::{CcMethod, ControlSettings};
use crate::midi::ControlId;
use crate::subscription::{Registry, Subscription};

/// Change listener. Runs on the writer's thread and must not block.
pub type ControlListener = dyn Fn(ControlId, u16) + Send + Sync;

/// Thread-safe control state model, shared by reference
#[derive(Clone)]
pub struct ControlStore {
    values: Arc<DashMap<ControlId, u16>>,
    settings: Arc<DashMap<ControlId, ControlSettings>>,
    listeners: Registry<ControlListener>,
    /// Reentrant so a listener may write another control
    delivery: Arc<ReentrantMutex<()>>,
}

impl ControlStore {
    pub fn new() -> Self {
        Self {
            values: Arc::new(DashMap::new()),
            settings: Arc::new(DashMap::new()),
            listeners: Registry::new(),
            delivery: Arc::new(ReentrantMutex::new(())),
        }
    }

    /// Last value written for `id`, or the kind's neutral value if none
    pub fn get(&self, id: &ControlId) -> u16 {
        self.values
            .get(id)
            .map(|v| *v)
            .unwrap_or_else(|| id.kind.neutral())
    }

    /// Replace the value for `id` and notify listeners
    pub fn set(&self, id: ControlId, value: u16) {
        let _delivery = self.delivery.lock();
        self.store_and_notify(id, value);
    }

    /// Register a change listener; it is removed when the handle drops
    pub fn subscribe(&self, listener: Arc<ControlListener>) -> Subscription {
        self.listeners.subscribe(listener)
    }

    /// Interpretation and limits for `id` (full range, absolute when unset)
    pub fn settings(&self, id: &ControlId) -> ControlSettings {
        self.settings
            .get(id)
            .map(|s| *s)
            .unwrap_or_else(|| ControlSettings::for_kind(id.kind))
    }

    pub fn set_settings(&self, id: ControlId, settings: ControlSettings) {
        if settings == ControlSettings::for_kind(id.kind) {
            self.settings.remove(&id);
        } else {
            self.settings.insert(id, settings);
        }
    }

    /// Convert a raw MIDI value through the control's settings and store it
    ///
    /// Absolute controls clamp the raw value into their limits. Relative
    /// encoders add their signed step to the current value. Returns the value
    /// that was stored.
    pub fn apply_midi(&self, id: ControlId, raw: u16) -> u16 {
        let settings = self.settings(&id);
        let _delivery = self.delivery.lock();
        let value = match settings.method {
            CcMethod::Absolute => settings.clamp(raw as i64),
            method => {
                let current = settings.clamp(self.get(&id) as i64);
                settings.clamp(current as i64 + method.delta(raw) as i64)
            }
        };
        self.store_and_notify(id, value);
        value
    }

    /// Store a value reported by the remote application
    ///
    /// Rounded to the nearest integer and clamped into the control's limits.
    pub fn apply_feedback(&self, id: ControlId, value: f64) -> u16 {
        let settings = self.settings(&id);
        let value = if value.is_finite() {
            settings.clamp(value.round() as i64)
        } else {
            self.get(&id)
        };
        self.set(id, value);
        value
    }

    /// All stored values, sorted by control
    pub fn values(&self) -> Vec<(ControlId, u16)> {
        let mut values: Vec<_> = self.values.iter().map(|e| (*e.key(), *e.value())).collect();
        values.sort();
        values
    }

    /// All non-default settings, sorted by control
    pub fn all_settings(&self) -> Vec<(ControlId, ControlSettings)> {
        let mut settings: Vec<_> = self
            .settings
            .iter()
            .map(|e| (*e.key(), *e.value()))
            .collect();
        settings.sort_by_key(|(id, _)| *id);
        settings
    }

    /// Restore values without notifying anyone (startup only)
    pub(crate) fn hydrate(&self, values: impl IntoIterator<Item = (ControlId, u16)>) {
        for (id, value) in values {
            self.values.insert(id, value);
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn store_and_notify(&self, id: ControlId, value: u16) {
        self.values.insert(id, value);
        trace!("State {} = {}", id, value);
        for listener in self.listeners.snapshot() {
            listener(id, value);
        }
    }
}

impl Default for ControlStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use proptest::prelude::*;

    #[test]
    fn test_unset_control_reads_neutral() {
        let store = ControlStore::new();
        assert_eq!(store.get(&ControlId::cc(1, 1, 7)), 0);
        assert_eq!(store.get(&ControlId::pitch_bend(1, 1)), 8192);
    }

    #[test]
    fn test_set_replaces_and_notifies() {
        let store = ControlStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let sub = store.subscribe(Arc::new(move |id, v| seen_clone.lock().push((id, v))));

        let knob = ControlId::cc(1, 1, 7);
        store.set(knob, 10);
        store.set(knob, 99);
        assert_eq!(store.get(&knob), 99);
        assert_eq!(*seen.lock(), vec![(knob, 10), (knob, 99)]);

        drop(sub);
        store.set(knob, 5);
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_listener_may_write_other_controls() {
        let store = ControlStore::new();
        let mirror = ControlId::cc(1, 1, 8);
        let inner = store.clone();
        let _sub = store.subscribe(Arc::new(move |id, v| {
            if id != mirror {
                inner.set(mirror, v);
            }
        }));

        store.set(ControlId::cc(1, 1, 7), 42);
        assert_eq!(store.get(&mirror), 42);
    }

    #[test]
    fn test_relative_encoder_accumulates_within_limits() {
        let store = ControlStore::new();
        let encoder = ControlId::cc(1, 1, 16);
        store.set_settings(
            encoder,
            ControlSettings {
                method: CcMethod::TwosComplement,
                low: 0,
                high: 20,
            },
        );

        assert_eq!(store.apply_midi(encoder, 5), 5);
        assert_eq!(store.apply_midi(encoder, 5), 10);
        assert_eq!(store.apply_midi(encoder, 127), 9);
        assert_eq!(store.apply_midi(encoder, 63), 20);
        assert_eq!(store.apply_midi(encoder, 65), 0);
    }

    #[test]
    fn test_absolute_midi_is_clamped_to_limits() {
        let store = ControlStore::new();
        let knob = ControlId::cc(1, 1, 7);
        store.set_settings(
            knob,
            ControlSettings {
                method: CcMethod::Absolute,
                low: 10,
                high: 100,
            },
        );
        assert_eq!(store.apply_midi(knob, 127), 100);
        assert_eq!(store.apply_midi(knob, 0), 10);
    }

    #[test]
    fn test_feedback_is_rounded_and_clamped() {
        let store = ControlStore::new();
        let knob = ControlId::cc(1, 1, 7);
        assert_eq!(store.apply_feedback(knob, 31.6), 32);
        assert_eq!(store.apply_feedback(knob, 500.0), 127);
        assert_eq!(store.apply_feedback(knob, -3.0), 0);
        assert_eq!(store.apply_feedback(knob, f64::NAN), 0);
    }

    #[test]
    fn test_default_settings_are_not_stored() {
        let store = ControlStore::new();
        let fader = ControlId::pitch_bend(1, 1);
        store.set_settings(fader, ControlSettings::for_kind(fader.kind));
        assert!(store.all_settings().is_empty());
    }

    #[test]
    fn test_per_control_notifications_keep_write_order() {
        let store = ControlStore::new();
        let knob = ControlId::cc(1, 1, 7);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let _sub = store.subscribe(Arc::new(move |_, v| seen_clone.lock().push(v)));

        let threads: Vec<_> = (0..4u16)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..100u16 {
                        store.set(knob, t * 1000 + i);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        // Each writer's values appear in its own order, and the last
        // notification matches the stored value
        let seen = seen.lock();
        assert_eq!(seen.len(), 400);
        for t in 0..4u16 {
            let mine: Vec<_> = seen.iter().filter(|v| **v / 1000 == t).collect();
            assert!(mine.windows(2).all(|w| w[0] < w[1]));
        }
        assert_eq!(*seen.last().unwrap(), store.get(&knob));
    }

    proptest! {
        #[test]
        fn prop_no_torn_reads(values in proptest::collection::vec(0u16..=16383, 1..40)) {
            let store = ControlStore::new();
            let fader = ControlId::pitch_bend(2, 3);

            let writer = {
                let store = store.clone();
                let values = values.clone();
                std::thread::spawn(move || {
                    for v in values {
                        store.set(fader, v);
                    }
                })
            };
            let reader = {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..200).map(|_| store.get(&fader)).collect::<Vec<_>>()
                })
            };
            writer.join().unwrap();
            let reads = reader.join().unwrap();

            for read in reads {
                prop_assert!(read == fader.kind.neutral() || values.contains(&read));
            }
            prop_assert_eq!(store.get(&fader), *values.last().unwrap());
        }
    }
}
