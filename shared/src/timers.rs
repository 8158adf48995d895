use std::collections::BTreeMap;

/// Keyed one-shot deadlines on a caller-supplied millisecond clock.
///
/// Scheduling a key that is already pending replaces its deadline, so a key
/// never fires twice. Nothing fires on its own: owners call [`Timers::pop_due`]
/// from their tick and handle each key in deadline order.
#[derive(Debug, Clone)]
pub struct Timers<K> {
    deadlines: BTreeMap<K, u64>,
}

impl<K: Ord + Clone> Default for Timers<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone> Timers<K> {
    pub fn new() -> Self {
        Timers {
            deadlines: BTreeMap::new(),
        }
    }

    /// Arms `key` to fire at `at_ms`, returning the deadline it replaced.
    pub fn schedule(&mut self, key: K, at_ms: u64) -> Option<u64> {
        self.deadlines.insert(key, at_ms)
    }

    pub fn schedule_in(&mut self, key: K, now_ms: u64, delay_ms: u64) -> Option<u64> {
        self.schedule(key, now_ms.saturating_add(delay_ms))
    }

    pub fn cancel(&mut self, key: &K) -> bool {
        self.deadlines.remove(key).is_some()
    }

    /// Cancels every pending key matching `predicate`.
    pub fn cancel_where(&mut self, mut predicate: impl FnMut(&K) -> bool) -> usize {
        let before = self.deadlines.len();
        self.deadlines.retain(|key, _| !predicate(key));
        before - self.deadlines.len()
    }

    pub fn is_scheduled(&self, key: &K) -> bool {
        self.deadlines.contains_key(key)
    }

    pub fn deadline(&self, key: &K) -> Option<u64> {
        self.deadlines.get(key).copied()
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.deadlines.values().min().copied()
    }

    /// Removes and returns the earliest key due at `now_ms`. Ties go to the
    /// smallest key.
    pub fn pop_due(&mut self, now_ms: u64) -> Option<K> {
        let key = self
            .deadlines
            .iter()
            .filter(|(_, &at)| at <= now_ms)
            .min_by_key(|(_, &at)| at)
            .map(|(key, _)| key.clone())?;
        self.deadlines.remove(&key);
        Some(key)
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    enum Key {
        A,
        B,
        C,
    }

    #[test]
    fn test_pop_due_in_deadline_order() {
        let mut timers = Timers::new();
        timers.schedule(Key::A, 300);
        timers.schedule(Key::B, 100);
        timers.schedule(Key::C, 200);

        assert_eq!(timers.pop_due(50), None);
        assert_eq!(timers.pop_due(250), Some(Key::B));
        assert_eq!(timers.pop_due(250), Some(Key::C));
        assert_eq!(timers.pop_due(250), None);
        assert_eq!(timers.len(), 1);
        assert_eq!(timers.next_deadline(), Some(300));
    }

    #[test]
    fn test_equal_deadlines_fire_by_key() {
        let mut timers = Timers::new();
        timers.schedule(Key::C, 10);
        timers.schedule(Key::A, 10);

        assert_eq!(timers.pop_due(10), Some(Key::A));
        assert_eq!(timers.pop_due(10), Some(Key::C));
    }

    #[test]
    fn test_reschedule_replaces_deadline() {
        let mut timers = Timers::new();
        assert_eq!(timers.schedule(Key::A, 100), None);
        assert_eq!(timers.schedule_in(Key::A, 100, 50), Some(100));

        assert_eq!(timers.pop_due(120), None);
        assert_eq!(timers.deadline(&Key::A), Some(150));
        assert_eq!(timers.pop_due(150), Some(Key::A));
        assert!(timers.is_empty());
    }

    #[test]
    fn test_cancel() {
        let mut timers = Timers::new();
        timers.schedule(Key::A, 1);
        timers.schedule(Key::B, 2);
        timers.schedule(Key::C, 3);

        assert!(timers.cancel(&Key::A));
        assert!(!timers.cancel(&Key::A));
        assert_eq!(timers.cancel_where(|k| *k != Key::B), 1);
        assert!(timers.is_scheduled(&Key::B));
        assert!(!timers.is_scheduled(&Key::C));

        timers.clear();
        assert_eq!(timers.pop_due(u64::MAX), None);
    }

    #[test]
    fn test_schedule_in_saturates() {
        let mut timers = Timers::new();
        timers.schedule_in(Key::A, u64::MAX - 1, 10);
        assert_eq!(timers.deadline(&Key::A), Some(u64::MAX));
    }
}
