use parking_lot::Mutex;

type Effect = Box<dyn FnOnce() + Send>;

/// Per-story effects that must run once the story is actually on screen,
/// before its screenshot is taken.
///
/// A story registers an effect while rendering; the traversal executes
/// whatever is pending right before stabilization and then waits long
/// enough for the effect's consequences to settle. Registration is
/// drained on execution, so an effect runs at most once per render.
#[derive(Default)]
pub struct EffectRegistry {
    pending: Mutex<Vec<Effect>>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, effect: impl FnOnce() + Send + 'static) {
        self.pending.lock().push(Box::new(effect));
    }

    /// Runs and clears all pending effects. Returns whether any ran.
    pub fn execute(&self) -> bool {
        let drained: Vec<Effect> = std::mem::take(&mut *self.pending.lock());
        let ran = !drained.is_empty();
        for effect in drained {
            effect();
        }
        ran
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn effects_run_once_and_drain() {
        let registry = EffectRegistry::new();
        let counter = Arc::new(AtomicU32::new(0));

        let seen = counter.clone();
        registry.register(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        assert!(registry.has_pending());
        assert!(registry.execute());
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // Second execution has nothing left to run.
        assert!(!registry.execute());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn execute_without_registration_reports_none() {
        let registry = EffectRegistry::new();
        assert!(!registry.execute());
    }
}
