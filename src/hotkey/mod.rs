//! Hotkey intent translation
//!
//! Platform key capture lives outside this crate: an embedding listener
//! (compositor keybinding, evdev shim, menu bar) delivers raw press/release
//! events, and the bridge turns them into the abstract intents the session
//! state machine consumes. This keeps the core free of any platform
//! dependency and fully testable.

use crate::config::ActivationMode;
use chrono::{DateTime, Utc};

/// Abstract activation intents consumed by the session controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentKind {
    /// Tap mode: start (or, while capturing, stop) a session
    Engage,
    /// Tap mode: explicit stop edge
    Disengage,
    /// Hold mode: chord pressed, start capturing
    HoldStart,
    /// Hold mode: chord released, stop capturing
    HoldEnd,
    /// Abort the active session without emitting text
    Cancel,
}

/// An intent with the time it was produced
#[derive(Debug, Clone, Copy)]
pub struct HotkeyIntent {
    pub kind: IntentKind,
    pub at: DateTime<Utc>,
}

impl HotkeyIntent {
    pub fn new(kind: IntentKind) -> Self {
        Self {
            kind,
            at: Utc::now(),
        }
    }
}

/// Raw key phases delivered by the external listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPhase {
    Pressed,
    Released,
}

/// A raw event for one of the two keys the bridge understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    /// The activation chord changed phase
    Chord(KeyPhase),
    /// The cancel key was pressed
    Cancel,
}

/// Translates raw key events into activation intents.
///
/// Tap mode maps every chord press to `Engage` and ignores releases; the
/// state machine decides whether that press starts or stops a session.
/// Hold mode maps press to `HoldStart` and release to `HoldEnd`; a release
/// with no recorded press is dropped.
pub struct HotkeyBridge {
    mode: ActivationMode,
    chord_down: bool,
}

impl HotkeyBridge {
    pub fn new(mode: ActivationMode) -> Self {
        Self {
            mode,
            chord_down: false,
        }
    }

    pub fn mode(&self) -> ActivationMode {
        self.mode
    }

    /// Translate one raw event; None when the event carries no intent.
    pub fn translate(&mut self, event: KeyEvent) -> Option<HotkeyIntent> {
        match (event, self.mode) {
            (KeyEvent::Cancel, _) => Some(HotkeyIntent::new(IntentKind::Cancel)),

            (KeyEvent::Chord(KeyPhase::Pressed), ActivationMode::Tap) => {
                if self.chord_down {
                    // Key repeat while held; the first press already fired.
                    return None;
                }
                self.chord_down = true;
                Some(HotkeyIntent::new(IntentKind::Engage))
            }
            (KeyEvent::Chord(KeyPhase::Released), ActivationMode::Tap) => {
                self.chord_down = false;
                None
            }

            (KeyEvent::Chord(KeyPhase::Pressed), ActivationMode::Hold) => {
                if self.chord_down {
                    return None;
                }
                self.chord_down = true;
                Some(HotkeyIntent::new(IntentKind::HoldStart))
            }
            (KeyEvent::Chord(KeyPhase::Released), ActivationMode::Hold) => {
                if !self.chord_down {
                    // Release without a recorded press (e.g. chord held
                    // across a mode switch) carries no intent.
                    return None;
                }
                self.chord_down = false;
                Some(HotkeyIntent::new(IntentKind::HoldEnd))
            }
        }
    }
}
