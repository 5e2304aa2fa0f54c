use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::logger;

/// Flags raised by the global hotkeys.
pub struct HotkeyFlags {
    pub start: Arc<AtomicBool>,
    pub panic: Arc<AtomicBool>,
}

impl HotkeyFlags {
    pub fn fire(&self, hotkey: Hotkey) {
        let flag = match hotkey {
            Hotkey::Start => &self.start,
            Hotkey::Panic => &self.panic,
        };
        flag.store(true, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hotkey {
    /// F1, no modifiers.
    Start,
    /// Cmd+Shift+Q on macOS, Ctrl+Shift+Q elsewhere.
    Panic,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Modifiers {
    pub cmd: bool,
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
}

impl Modifiers {
    fn primary(&self) -> bool {
        if cfg!(target_os = "macos") { self.cmd && !self.ctrl } else { self.ctrl && !self.cmd }
    }

    fn none(&self) -> bool {
        !(self.cmd || self.ctrl || self.shift || self.alt)
    }
}

/// Which hotkey, if any, a key press with `mods` held is.
pub fn classify(key: &str, mods: Modifiers) -> Option<Hotkey> {
    match key {
        "f1" if mods.none() => Some(Hotkey::Start),
        "q" if mods.primary() && mods.shift && !mods.alt => Some(Hotkey::Panic),
        _ => None,
    }
}

/// Listen for the start and panic hotkeys on a background thread.
#[cfg(target_os = "macos")]
pub fn start_hotkey_listener(flags: HotkeyFlags) {
    use core_foundation::runloop::{kCFRunLoopCommonModes, CFRunLoop};
    use core_graphics::event::{
        CGEvent, CGEventFlags, CGEventTap, CGEventTapLocation, CGEventTapOptions,
        CGEventTapPlacement, CGEventTapProxy, CGEventType, EventField,
    };

    let (Some(q), Some(f1)) = (super::darwin::key_code("q"), super::darwin::key_code("f1")) else {
        return;
    };

    std::thread::spawn(move || {
        let on_key = move |_: CGEventTapProxy, _: CGEventType, event: &CGEvent| -> Option<CGEvent> {
            let code = event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE);
            let key = match code {
                c if c == q as i64 => "q",
                c if c == f1 as i64 => "f1",
                _ => return None,
            };
            let held = event.get_flags();
            let mods = Modifiers {
                cmd: held.contains(CGEventFlags::CGEventFlagCommand),
                ctrl: held.contains(CGEventFlags::CGEventFlagControl),
                shift: held.contains(CGEventFlags::CGEventFlagShift),
                alt: held.contains(CGEventFlags::CGEventFlagAlternate),
            };
            if let Some(hotkey) = classify(key, mods) {
                flags.fire(hotkey);
            }
            None
        };

        let tap = match CGEventTap::new(
            CGEventTapLocation::HID,
            CGEventTapPlacement::HeadInsertEventTap,
            CGEventTapOptions::ListenOnly,
            vec![CGEventType::KeyDown],
            on_key,
        ) {
            Ok(tap) => tap,
            Err(()) => {
                logger::error("no event tap for global hotkeys, grant Accessibility permission to your terminal");
                return;
            }
        };
        let Ok(source) = tap.mach_port.create_runloop_source(0) else {
            logger::error("no run loop source for the hotkey tap");
            return;
        };
        let run_loop = CFRunLoop::get_current();
        unsafe { run_loop.add_source(&source, kCFRunLoopCommonModes) };
        tap.enable();
        logger::info("global hotkeys F1 (start) and Cmd+Shift+Q (panic) registered");
        CFRunLoop::run_current();
    });
}

/// Bring the terminal that launched us to the front.
#[cfg(target_os = "macos")]
pub fn activate_terminal() {
    super::darwin::bring_to_front(unsafe { libc::getppid() });
}

/// Listen for the start and panic hotkeys on a background thread.
#[cfg(target_os = "windows")]
pub fn start_hotkey_listener(flags: HotkeyFlags) {
    use windows::Win32::Foundation::HWND;
    use windows::Win32::UI::Input::KeyboardAndMouse::{
        RegisterHotKey, HOT_KEY_MODIFIERS, MOD_CONTROL, MOD_NOREPEAT, MOD_SHIFT, VK_F1, VK_Q,
    };
    use windows::Win32::UI::WindowsAndMessaging::{GetMessageW, MSG, WM_HOTKEY};

    const START_ID: i32 = 1;
    const PANIC_ID: i32 = 2;

    std::thread::spawn(move || {
        // Hotkeys belong to the registering thread's message queue.
        let register = |id: i32, mods: HOT_KEY_MODIFIERS, vk: u16| unsafe {
            RegisterHotKey(HWND::default(), id, mods | MOD_NOREPEAT, vk as u32)
        };
        if let Err(e) = register(PANIC_ID, MOD_CONTROL | MOD_SHIFT, VK_Q.0) {
            logger::error(&format!("panic hotkey Ctrl+Shift+Q unavailable: {}", e));
            return;
        }
        if let Err(e) = register(START_ID, HOT_KEY_MODIFIERS(0), VK_F1.0) {
            logger::warn(&format!("start hotkey F1 unavailable ({}), use 's' in the dashboard", e));
        }
        logger::info("global hotkeys F1 (start) and Ctrl+Shift+Q (panic) registered");

        let mut msg = MSG::default();
        while unsafe { GetMessageW(&mut msg, HWND::default(), 0, 0) }.0 > 0 {
            if msg.message != WM_HOTKEY {
                continue;
            }
            match msg.wParam.0 as i32 {
                PANIC_ID => flags.fire(Hotkey::Panic),
                START_ID => flags.fire(Hotkey::Start),
                _ => {}
            }
        }
    });
}

/// Bring our console window to the front.
#[cfg(target_os = "windows")]
pub fn activate_terminal() {
    use windows::Win32::System::Console::GetConsoleWindow;
    use windows::Win32::UI::WindowsAndMessaging::{SetForegroundWindow, ShowWindow, SW_RESTORE};

    unsafe {
        let hwnd = GetConsoleWindow();
        if !hwnd.0.is_null() {
            let _ = ShowWindow(hwnd, SW_RESTORE);
            let _ = SetForegroundWindow(hwnd);
        }
    }
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub fn start_hotkey_listener(_flags: HotkeyFlags) {
    logger::warn("global hotkeys not supported on this platform, use the dashboard keys");
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub fn activate_terminal() {}

#[cfg(test)]
mod tests {
    use super::*;

    fn primary_shift() -> Modifiers {
        let mut mods = Modifiers { shift: true, ..Default::default() };
        if cfg!(target_os = "macos") {
            mods.cmd = true;
        } else {
            mods.ctrl = true;
        }
        mods
    }

    #[test]
    fn bare_f1_starts() {
        assert_eq!(classify("f1", Modifiers::default()), Some(Hotkey::Start));
        assert_eq!(classify("f1", Modifiers { shift: true, ..Default::default() }), None);
    }

    #[test]
    fn panic_needs_the_full_chord() {
        assert_eq!(classify("q", primary_shift()), Some(Hotkey::Panic));
        assert_eq!(classify("q", Modifiers { shift: true, ..Default::default() }), None);
        assert_eq!(classify("q", Modifiers { alt: true, ..primary_shift() }), None);
        assert_eq!(classify("w", primary_shift()), None);
    }

    #[test]
    fn firing_raises_only_its_flag() {
        let flags = HotkeyFlags {
            start: Arc::new(AtomicBool::new(false)),
            panic: Arc::new(AtomicBool::new(false)),
        };
        flags.fire(Hotkey::Panic);
        assert!(flags.panic.load(Ordering::Acquire));
        assert!(!flags.start.load(Ordering::Acquire));
    }
}
