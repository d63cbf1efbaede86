//! Key dispatch: flattened, tree-ordered key bindings and their matching
//! rules.
//!
//! A [`DispatchTable`] is rebuilt once per dirty frame by walking the
//! element tree depth-first and collecting every `KeyMap()` entry from every
//! attached [`crate::element::Component`], in the naming convention
//! (`on_key`, `on_key_with_modifiers`) the pack's `node/div.rs` uses for its
//! own (unflattened) per-node key callbacks.

use crate::input::{Key, KeyEvent, Modifier};
use crate::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A pattern a [`KeyEvent`] is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyPattern {
    /// Matches a specific symbolic key, if non-`None`.
    pub key: Option<Key>,
    /// Matches a specific rune (only meaningful when `key` resolves to `Key::Rune`).
    pub rune: Option<char>,
    /// Matches any printable rune.
    pub any_rune: bool,
    /// Required modifier bitset; when non-empty the event's modifiers must
    /// equal it exactly.
    pub modifiers: Modifier,
    /// When `true`, the event must carry no modifiers at all, overriding `modifiers`.
    pub require_no_mods: bool,
}

/// Whether a handler consumes the event (stopping later dispatch) or lets
/// it continue to subsequent broadcast handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    Stop,
    Broadcast,
}

/// A single `{pattern, handler, stop}` entry collected from a component's
/// `KeyMap()`.
pub struct KeyBinding {
    pub pattern: KeyPattern,
    pub propagation: Propagation,
    pub handler: Box<dyn FnMut(&KeyEvent) + Send>,
}

/// A built dispatch entry: a binding plus its DFS position in the element
/// tree, used only to keep matching order deterministic and documented.
struct DispatchEntry {
    pattern: KeyPattern,
    propagation: Propagation,
    handler: Box<dyn FnMut(&KeyEvent) + Send>,
    #[allow(dead_code)]
    position: usize,
}

/// The flattened, ordered table of key bindings for the current frame.
#[derive(Default)]
pub struct DispatchTable {
    entries: Vec<DispatchEntry>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl KeyPattern {
    pub fn key(key: Key) -> Self {
        Self { key: Some(key), ..Default::default() }
    }

    pub fn rune(r: char) -> Self {
        Self { key: Some(Key::Rune), rune: Some(r), ..Default::default() }
    }

    pub fn any_rune() -> Self {
        Self { key: Some(Key::Rune), any_rune: true, ..Default::default() }
    }

    pub fn with_modifiers(mut self, modifiers: Modifier) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn no_mods(mut self) -> Self {
        self.require_no_mods = true;
        self
    }

    fn matches(&self, event: &KeyEvent) -> bool {
        if self.require_no_mods && !event.modifiers.is_empty() {
            return false;
        }
        if !self.require_no_mods && !self.modifiers.is_empty() && event.modifiers != self.modifiers {
            return false;
        }
        if self.any_rune {
            return event.key == Key::Rune;
        }
        if let Some(r) = self.rune {
            return event.key == Key::Rune && event.rune == r;
        }
        if let Some(k) = self.key {
            return event.key == k;
        }
        false
    }
}

impl DispatchTable {
    /// Builds a table from bindings collected in DFS tree order. Fails if
    /// two `Stop` entries share an equal pattern.
    pub fn build(bindings: Vec<KeyBinding>) -> Result<Self, Error> {
        let mut entries = Vec::with_capacity(bindings.len());
        for (position, b) in bindings.into_iter().enumerate() {
            if b.propagation == Propagation::Stop {
                for existing in &entries {
                    let existing: &DispatchEntry = existing;
                    if existing.propagation == Propagation::Stop && existing.pattern == b.pattern {
                        return Err(Error::DispatchValidation { pattern: format!("{:?}", b.pattern) });
                    }
                }
            }
            entries.push(DispatchEntry {
                pattern: b.pattern,
                propagation: b.propagation,
                handler: b.handler,
                position,
            });
        }
        Ok(Self { entries })
    }

    /// Dispatches `event` in table order. Returns `true` if a `Stop` handler
    /// fired (suppressing any later element-level fallback dispatch).
    pub fn dispatch(&mut self, event: &KeyEvent) -> bool {
        for entry in &mut self.entries {
            if entry.pattern.matches(event) {
                (entry.handler)(event);
                if entry.propagation == Propagation::Stop {
                    return true;
                }
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn logging_binding(pattern: KeyPattern, propagation: Propagation, log: Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> KeyBinding {
        KeyBinding {
            pattern,
            propagation,
            handler: Box::new(move |_| log.lock().unwrap().push(tag)),
        }
    }

    #[test]
    fn rejects_duplicate_stop_patterns() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bindings = vec![
            logging_binding(KeyPattern::key(Key::Escape), Propagation::Stop, log.clone(), "a"),
            logging_binding(KeyPattern::key(Key::Escape), Propagation::Stop, log.clone(), "b"),
        ];
        assert!(DispatchTable::build(bindings).is_err());
    }

    #[test]
    fn allows_duplicate_broadcast_patterns() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bindings = vec![
            logging_binding(KeyPattern::key(Key::Escape), Propagation::Broadcast, log.clone(), "a"),
            logging_binding(KeyPattern::key(Key::Escape), Propagation::Broadcast, log.clone(), "b"),
        ];
        assert!(DispatchTable::build(bindings).is_ok());
    }

    #[test]
    fn scenario_e_stop_suppresses_later_broadcast() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bindings = vec![
            logging_binding(KeyPattern::key(Key::Escape), Propagation::Broadcast, log.clone(), "h1"),
            logging_binding(KeyPattern::key(Key::Escape), Propagation::Stop, log.clone(), "h2"),
            logging_binding(KeyPattern::key(Key::Escape), Propagation::Broadcast, log.clone(), "h3"),
        ];
        let mut table = DispatchTable::build(bindings).unwrap();
        let stopped = table.dispatch(&KeyEvent::symbolic(Key::Escape, Modifier::empty()));
        assert!(stopped);
        assert_eq!(*log.lock().unwrap(), vec!["h1", "h2"]);
    }

    #[test]
    fn pattern_with_required_mods_rejects_mismatched_event() {
        let p = KeyPattern::rune('s').with_modifiers(Modifier::CTRL);
        let ev_plain = KeyEvent::rune('s', Modifier::empty());
        let ev_ctrl = KeyEvent::rune('s', Modifier::CTRL);
        assert!(!p.matches(&ev_plain));
        assert!(p.matches(&ev_ctrl));
    }

    #[test]
    fn require_no_mods_rejects_any_modifier() {
        let p = KeyPattern::any_rune().no_mods();
        assert!(p.matches(&KeyEvent::rune('x', Modifier::empty())));
        assert!(!p.matches(&KeyEvent::rune('x', Modifier::SHIFT)));
    }
}
