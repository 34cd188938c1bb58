//! uinput-based input injection backend.
//!
//! Creates two virtual evdev devices (mouse + keyboard) and replays
//! remote commands through them.
//!
//! # Requirements
//!
//! - Write access to `/dev/uinput` (run as root or add the user to the
//!   `input` group), and the `uinput` kernel module loaded.
//!
//! # Platform
//!
//! Linux-only. On other platforms the backend is defined but every
//! method returns an injection error, which the caller logs and
//! swallows per command.

#![cfg_attr(not(target_os = "linux"), allow(dead_code))]

use castlink_core::{CastError, InputBackend, KeyModifier, MouseButton};

/// Virtual-device input backend.
pub struct UinputBackend {
    #[cfg(target_os = "linux")]
    inner: linux_impl::Devices,
}

// ── Linux implementation ─────────────────────────────────────────

#[cfg(target_os = "linux")]
mod linux_impl {
    use super::*;
    use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
    use evdev::{AttributeSet, EventType, InputEvent, Key, RelativeAxisType};

    /// Wheel detent granularity used when translating scroll deltas.
    const SCROLL_UNIT: f64 = 10.0;

    pub(super) struct Devices {
        mouse: VirtualDevice,
        keyboard: VirtualDevice,
        /// Last absolute position we moved to, for relative synthesis.
        last_pos: Option<(i32, i32)>,
    }

    impl UinputBackend {
        /// Create the virtual mouse and keyboard devices.
        pub fn new() -> Result<Self, CastError> {
            let mut mouse_keys = AttributeSet::<Key>::new();
            mouse_keys.insert(Key::BTN_LEFT);
            mouse_keys.insert(Key::BTN_RIGHT);
            mouse_keys.insert(Key::BTN_MIDDLE);

            let mut rel_axes = AttributeSet::<RelativeAxisType>::new();
            rel_axes.insert(RelativeAxisType::REL_X);
            rel_axes.insert(RelativeAxisType::REL_Y);
            rel_axes.insert(RelativeAxisType::REL_WHEEL);

            let mouse = VirtualDeviceBuilder::new()
                .and_then(|b| b.name("castlink mouse").with_keys(&mouse_keys))
                .and_then(|b| b.with_relative_axes(&rel_axes))
                .and_then(|b| b.build())
                .map_err(|e| CastError::Injection(format!("uinput mouse: {e}")))?;

            let mut key_set = AttributeSet::<Key>::new();
            for code in 1u16..=248 {
                key_set.insert(Key::new(code));
            }
            let keyboard = VirtualDeviceBuilder::new()
                .and_then(|b| b.name("castlink keyboard").with_keys(&key_set))
                .and_then(|b| b.build())
                .map_err(|e| CastError::Injection(format!("uinput keyboard: {e}")))?;

            Ok(Self {
                inner: Devices {
                    mouse,
                    keyboard,
                    last_pos: None,
                },
            })
        }
    }

    impl Devices {
        fn emit_mouse(&mut self, events: &[InputEvent]) -> Result<(), CastError> {
            self.mouse
                .emit(events)
                .map_err(|e| CastError::Injection(e.to_string()))
        }

        fn emit_keyboard(&mut self, events: &[InputEvent]) -> Result<(), CastError> {
            self.keyboard
                .emit(events)
                .map_err(|e| CastError::Injection(e.to_string()))
        }

        fn key_event(key: Key, pressed: bool) -> InputEvent {
            InputEvent::new(EventType::KEY, key.code(), pressed as i32)
        }

        fn button_key(button: MouseButton) -> Key {
            match button {
                MouseButton::Left => Key::BTN_LEFT,
                MouseButton::Right => Key::BTN_RIGHT,
                MouseButton::Middle => Key::BTN_MIDDLE,
            }
        }

        fn press_release(&mut self, button: MouseButton) -> Result<(), CastError> {
            let key = Self::button_key(button);
            self.emit_mouse(&[Self::key_event(key, true)])?;
            self.emit_mouse(&[Self::key_event(key, false)])
        }
    }

    impl InputBackend for UinputBackend {
        fn move_mouse(&mut self, x: i32, y: i32) -> Result<(), CastError> {
            // uinput mice are relative; synthesize the motion from the
            // last known position. The first move forces the pointer
            // into the top-left corner so the following delta lands on
            // an absolute position.
            let (dx, dy) = match self.inner.last_pos {
                Some((lx, ly)) => (x - lx, y - ly),
                None => {
                    self.inner.emit_mouse(&[
                        InputEvent::new(EventType::RELATIVE, RelativeAxisType::REL_X.0, -65_535),
                        InputEvent::new(EventType::RELATIVE, RelativeAxisType::REL_Y.0, -65_535),
                    ])?;
                    (x, y)
                }
            };
            self.inner.last_pos = Some((x, y));
            if dx == 0 && dy == 0 {
                return Ok(());
            }
            self.inner.emit_mouse(&[
                InputEvent::new(EventType::RELATIVE, RelativeAxisType::REL_X.0, dx),
                InputEvent::new(EventType::RELATIVE, RelativeAxisType::REL_Y.0, dy),
            ])
        }

        fn click(&mut self, button: MouseButton, double: bool) -> Result<(), CastError> {
            self.inner.press_release(button)?;
            if double {
                self.inner.press_release(button)?;
            }
            Ok(())
        }

        fn mouse_down(&mut self, button: MouseButton) -> Result<(), CastError> {
            let key = Devices::button_key(button);
            self.inner.emit_mouse(&[Devices::key_event(key, true)])
        }

        fn mouse_up(&mut self, button: MouseButton) -> Result<(), CastError> {
            let key = Devices::button_key(button);
            self.inner.emit_mouse(&[Devices::key_event(key, false)])
        }

        fn scroll(&mut self, delta_y: f64) -> Result<(), CastError> {
            let mut ticks = (delta_y / SCROLL_UNIT).round() as i32;
            if ticks == 0 && delta_y != 0.0 {
                ticks = delta_y.signum() as i32;
            }
            if ticks == 0 {
                return Ok(());
            }
            // Wheel-up is positive in evdev; deltaY is positive when
            // scrolling down.
            self.inner.emit_mouse(&[InputEvent::new(
                EventType::RELATIVE,
                RelativeAxisType::REL_WHEEL.0,
                -ticks,
            )])
        }

        fn key_tap(&mut self, key: &str, modifiers: &[KeyModifier]) -> Result<(), CastError> {
            let (code, shifted) = key_to_evdev(key)
                .ok_or_else(|| CastError::Injection(format!("unmapped key {key:?}")))?;

            let mut down = Vec::new();
            let mut up = Vec::new();
            for modifier in modifiers {
                let m = modifier_key(*modifier);
                down.push(Devices::key_event(m, true));
                up.push(Devices::key_event(m, false));
            }
            if shifted && !modifiers.contains(&KeyModifier::Shift) {
                down.push(Devices::key_event(Key::KEY_LEFTSHIFT, true));
                up.push(Devices::key_event(Key::KEY_LEFTSHIFT, false));
            }
            down.push(Devices::key_event(code, true));

            self.inner.emit_keyboard(&down)?;
            let mut release = vec![Devices::key_event(code, false)];
            release.extend(up.into_iter().rev());
            self.inner.emit_keyboard(&release)
        }

        fn type_text(&mut self, text: &str) -> Result<(), CastError> {
            for ch in text.chars() {
                let key = ch.to_string();
                if let Err(e) = self.key_tap(&key, &[]) {
                    // One untypeable character does not abort the rest.
                    tracing::debug!("skipping character {ch:?}: {e}");
                }
            }
            Ok(())
        }
    }

    fn modifier_key(modifier: KeyModifier) -> Key {
        match modifier {
            KeyModifier::Control => Key::KEY_LEFTCTRL,
            KeyModifier::Shift => Key::KEY_LEFTSHIFT,
            KeyModifier::Alt => Key::KEY_LEFTALT,
            KeyModifier::Command => Key::KEY_LEFTMETA,
        }
    }

    /// Map a browser-style key name to an evdev key, with a flag for
    /// characters that need shift.
    pub(super) fn key_to_evdev(key: &str) -> Option<(Key, bool)> {
        // Single characters first.
        if key.chars().count() == 1 {
            let ch = key.chars().next().expect("length checked");
            return char_to_evdev(ch);
        }

        let named = match key.to_ascii_lowercase().as_str() {
            "enter" | "return" => Key::KEY_ENTER,
            "escape" | "esc" => Key::KEY_ESC,
            "backspace" => Key::KEY_BACKSPACE,
            "tab" => Key::KEY_TAB,
            "space" | "spacebar" => Key::KEY_SPACE,
            "delete" => Key::KEY_DELETE,
            "insert" => Key::KEY_INSERT,
            "home" => Key::KEY_HOME,
            "end" => Key::KEY_END,
            "pageup" => Key::KEY_PAGEUP,
            "pagedown" => Key::KEY_PAGEDOWN,
            "arrowup" | "up" => Key::KEY_UP,
            "arrowdown" | "down" => Key::KEY_DOWN,
            "arrowleft" | "left" => Key::KEY_LEFT,
            "arrowright" | "right" => Key::KEY_RIGHT,
            "f1" => Key::KEY_F1,
            "f2" => Key::KEY_F2,
            "f3" => Key::KEY_F3,
            "f4" => Key::KEY_F4,
            "f5" => Key::KEY_F5,
            "f6" => Key::KEY_F6,
            "f7" => Key::KEY_F7,
            "f8" => Key::KEY_F8,
            "f9" => Key::KEY_F9,
            "f10" => Key::KEY_F10,
            "f11" => Key::KEY_F11,
            "f12" => Key::KEY_F12,
            _ => return None,
        };
        Some((named, false))
    }

    fn char_to_evdev(ch: char) -> Option<(Key, bool)> {
        let letter = |k| Some((k, false));
        let shifted = |k| Some((k, true));
        match ch {
            'a'..='z' => letter(Key::new(letter_code(ch))),
            'A'..='Z' => shifted(Key::new(letter_code(ch.to_ascii_lowercase()))),
            '0' => letter(Key::KEY_0),
            '1'..='9' => letter(Key::new(Key::KEY_1.code() + (ch as u16 - b'1' as u16))),
            ' ' => letter(Key::KEY_SPACE),
            '-' => letter(Key::KEY_MINUS),
            '_' => shifted(Key::KEY_MINUS),
            '=' => letter(Key::KEY_EQUAL),
            '+' => shifted(Key::KEY_EQUAL),
            '.' => letter(Key::KEY_DOT),
            ',' => letter(Key::KEY_COMMA),
            '/' => letter(Key::KEY_SLASH),
            '?' => shifted(Key::KEY_SLASH),
            ';' => letter(Key::KEY_SEMICOLON),
            ':' => shifted(Key::KEY_SEMICOLON),
            '\'' => letter(Key::KEY_APOSTROPHE),
            '"' => shifted(Key::KEY_APOSTROPHE),
            '[' => letter(Key::KEY_LEFTBRACE),
            ']' => letter(Key::KEY_RIGHTBRACE),
            '\\' => letter(Key::KEY_BACKSLASH),
            '`' => letter(Key::KEY_GRAVE),
            '\n' => letter(Key::KEY_ENTER),
            _ => None,
        }
    }

    /// evdev letter codes are not alphabetical; map via a table.
    fn letter_code(ch: char) -> u16 {
        match ch {
            'a' => Key::KEY_A.code(),
            'b' => Key::KEY_B.code(),
            'c' => Key::KEY_C.code(),
            'd' => Key::KEY_D.code(),
            'e' => Key::KEY_E.code(),
            'f' => Key::KEY_F.code(),
            'g' => Key::KEY_G.code(),
            'h' => Key::KEY_H.code(),
            'i' => Key::KEY_I.code(),
            'j' => Key::KEY_J.code(),
            'k' => Key::KEY_K.code(),
            'l' => Key::KEY_L.code(),
            'm' => Key::KEY_M.code(),
            'n' => Key::KEY_N.code(),
            'o' => Key::KEY_O.code(),
            'p' => Key::KEY_P.code(),
            'q' => Key::KEY_Q.code(),
            'r' => Key::KEY_R.code(),
            's' => Key::KEY_S.code(),
            't' => Key::KEY_T.code(),
            'u' => Key::KEY_U.code(),
            'v' => Key::KEY_V.code(),
            'w' => Key::KEY_W.code(),
            'x' => Key::KEY_X.code(),
            'y' => Key::KEY_Y.code(),
            'z' => Key::KEY_Z.code(),
            _ => Key::KEY_RESERVED.code(),
        }
    }

}

// ── NullBackend ──────────────────────────────────────────────────

/// Fallback used when the virtual devices cannot be created (no
/// `/dev/uinput` access). Every call errors; the injector logs and
/// swallows those per command, so sessions keep working view-only.
pub struct NullBackend;

impl InputBackend for NullBackend {
    fn move_mouse(&mut self, _x: i32, _y: i32) -> Result<(), CastError> {
        Err(CastError::Injection("no input backend available".into()))
    }
    fn click(&mut self, _button: MouseButton, _double: bool) -> Result<(), CastError> {
        Err(CastError::Injection("no input backend available".into()))
    }
    fn mouse_down(&mut self, _button: MouseButton) -> Result<(), CastError> {
        Err(CastError::Injection("no input backend available".into()))
    }
    fn mouse_up(&mut self, _button: MouseButton) -> Result<(), CastError> {
        Err(CastError::Injection("no input backend available".into()))
    }
    fn scroll(&mut self, _delta_y: f64) -> Result<(), CastError> {
        Err(CastError::Injection("no input backend available".into()))
    }
    fn key_tap(&mut self, _key: &str, _modifiers: &[KeyModifier]) -> Result<(), CastError> {
        Err(CastError::Injection("no input backend available".into()))
    }
    fn type_text(&mut self, _text: &str) -> Result<(), CastError> {
        Err(CastError::Injection("no input backend available".into()))
    }
}

// ── Non-Linux stub ───────────────────────────────────────────────

#[cfg(not(target_os = "linux"))]
mod stub {
    use super::*;

    impl UinputBackend {
        pub fn new() -> Result<Self, CastError> {
            Ok(Self {})
        }
    }

    fn unsupported() -> Result<(), CastError> {
        Err(CastError::Injection(
            "input injection is only available on Linux".into(),
        ))
    }

    impl InputBackend for UinputBackend {
        fn move_mouse(&mut self, _x: i32, _y: i32) -> Result<(), CastError> {
            unsupported()
        }
        fn click(&mut self, _button: MouseButton, _double: bool) -> Result<(), CastError> {
            unsupported()
        }
        fn mouse_down(&mut self, _button: MouseButton) -> Result<(), CastError> {
            unsupported()
        }
        fn mouse_up(&mut self, _button: MouseButton) -> Result<(), CastError> {
            unsupported()
        }
        fn scroll(&mut self, _delta_y: f64) -> Result<(), CastError> {
            unsupported()
        }
        fn key_tap(&mut self, _key: &str, _modifiers: &[KeyModifier]) -> Result<(), CastError> {
            unsupported()
        }
        fn type_text(&mut self, _text: &str) -> Result<(), CastError> {
            unsupported()
        }
    }
}
