use std::ffi::c_void;
use std::process::{Command as ProcessCommand, Stdio};

use anyhow::{anyhow, bail, Result};
use core_foundation::array::CFArray;
use core_foundation::base::{TCFType, TCFTypeRef};
use core_foundation::dictionary::CFDictionary;
use core_foundation::number::CFNumber;
use core_foundation::string::CFString;
use core_graphics::event::*;
use core_graphics::event_source::*;
use core_graphics::geometry::*;
use core_graphics::window::*;

use crate::logger;
use crate::types::*;
use super::{Platform, WindowHandle};

/// ANSI virtual key codes.
pub(crate) fn key_code(key: &str) -> Option<CGKeyCode> {
    let code = match key.to_lowercase().as_str() {
        "a" => 0, "s" => 1, "d" => 2, "f" => 3, "h" => 4, "g" => 5, "z" => 6,
        "x" => 7, "c" => 8, "v" => 9, "b" => 11, "q" => 12, "w" => 13, "e" => 14,
        "r" => 15, "y" => 16, "t" => 17, "o" => 31, "u" => 32, "i" => 34,
        "p" => 35, "l" => 37, "j" => 38, "k" => 40, "n" => 45, "m" => 46,
        "1" => 18, "2" => 19, "3" => 20, "4" => 21, "6" => 22, "5" => 23,
        "9" => 25, "7" => 26, "8" => 28, "0" => 29,
        "enter" | "return" => 36,
        "tab" => 48,
        "space" => 49,
        "delete" | "backspace" => 51,
        "escape" | "esc" => 53,
        "cmd" | "command" => 55,
        "shift" => 56,
        "alt" | "option" => 58,
        "ctrl" | "control" => 59,
        "f1" => 122, "f2" => 120, "f3" => 99, "f4" => 118, "f5" => 96, "f6" => 97,
        "f7" => 98, "f8" => 100, "f9" => 101, "f10" => 109, "f11" => 103, "f12" => 111,
        "left" => 123,
        "right" => 124,
        "down" => 125,
        "up" => 126,
        _ => return None,
    };
    Some(code)
}

/// One on-screen window as the window server lists it.
struct WindowInfo {
    id: CGWindowID,
    name: String,
    owner: String,
    pid: Option<i32>,
    layer: i64,
    bounds: Option<Region>,
}

impl WindowInfo {
    fn title(&self) -> &str {
        if self.name.is_empty() { &self.owner } else { &self.name }
    }
}

type InfoDict = CFDictionary<CFString, *const c_void>;

/// Look up `key` and wrap the value as `T`. Caller vouches for the type.
unsafe fn lookup<T: TCFType>(dict: &InfoDict, key: &str) -> Option<T> {
    let value = dict.find(&CFString::new(key))?;
    Some(T::wrap_under_get_rule(T::Ref::from_void_ptr(*value)))
}

unsafe fn number(dict: &InfoDict, key: &str) -> Option<i64> {
    lookup::<CFNumber>(dict, key)?.to_i64()
}

/// Snapshot of the on-screen window list, desktop elements excluded.
fn on_screen_windows() -> Vec<WindowInfo> {
    let option = kCGWindowListOptionOnScreenOnly | kCGWindowListExcludeDesktopElements;
    let list_ref = unsafe { CGWindowListCopyWindowInfo(option, kCGNullWindowID) };
    if list_ref.is_null() {
        logger::warn_p("darwin", "window list unavailable");
        return Vec::new();
    }

    let list: CFArray = unsafe { CFArray::wrap_under_create_rule(list_ref as _) };
    list.get_all_values()
        .iter()
        .filter_map(|ptr| unsafe {
            let dict: InfoDict = CFDictionary::wrap_under_get_rule(*ptr as _);
            let bounds = lookup::<InfoDict>(&dict, "kCGWindowBounds").map(|b| {
                let get = |k| number(&b, k).unwrap_or(0) as i32;
                Region::new(get("X"), get("Y"), get("Width"), get("Height"))
            });
            Some(WindowInfo {
                id: number(&dict, "kCGWindowNumber")? as CGWindowID,
                name: lookup::<CFString>(&dict, "kCGWindowName").map(|s| s.to_string()).unwrap_or_default(),
                owner: lookup::<CFString>(&dict, "kCGWindowOwnerName").map(|s| s.to_string()).unwrap_or_default(),
                pid: number(&dict, "kCGWindowOwnerPID").map(|v| v as i32),
                layer: number(&dict, "kCGWindowLayer").unwrap_or(-1),
                bounds,
            })
        })
        .collect()
}

/// Raise the frontmost window of process `pid` through System Events.
pub(crate) fn bring_to_front(pid: i32) {
    let script = format!(
        "tell application \"System Events\" to set frontmost of first process whose unix id is {} to true",
        pid
    );
    ProcessCommand::new("osascript")
        .args(["-e", &script])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .ok();
}

pub struct DarwinPlatform;

impl Platform for DarwinPlatform {
    /// Normal-layer windows whose title or owner matches `pattern`.
    fn get_instances(&self, pattern: &str) -> Vec<(WindowId, String)> {
        let re = match regex::Regex::new(&format!("(?i){}", pattern)) {
            Ok(r) => r,
            Err(e) => {
                logger::error(&format!("invalid pattern '{}': {}", pattern, e));
                return Vec::new();
            }
        };
        on_screen_windows()
            .into_iter()
            .filter(|w| w.layer == 0 && !w.title().is_empty())
            .filter(|w| re.is_match(w.title()) || re.is_match(&w.owner))
            .map(|w| {
                logger::info_p("darwin", &format!("candidate \"{}\" (id {})", w.title(), w.id));
                (w.id as WindowId, w.title().to_string())
            })
            .collect()
    }

    fn create_window(&self, _pattern: &str, window_id: WindowId) -> Box<dyn WindowHandle> {
        let mut win = DarwinWindow {
            window_id: window_id as CGWindowID,
            title: String::new(),
            pid: None,
            region: None,
            pointer: CGPoint::new(0.0, 0.0),
        };
        win.refresh();
        Box::new(win)
    }
}

struct DarwinWindow {
    window_id: CGWindowID,
    title: String,
    pid: Option<i32>,
    region: Option<Region>,
    pointer: CGPoint,
}

impl DarwinWindow {
    /// Re-read title, owner pid and bounds. A window that left the screen
    /// has no region.
    fn refresh(&mut self) {
        match on_screen_windows().into_iter().find(|w| w.id == self.window_id) {
            Some(info) => {
                self.title = info.title().to_string();
                self.pid = info.pid;
                self.region = info.bounds;
            }
            None => self.region = None,
        }
    }

    fn source() -> Result<CGEventSource> {
        CGEventSource::new(CGEventSourceStateID::HIDSystemState)
            .map_err(|_| anyhow!("cannot create event source"))
    }

    fn post_mouse(&self, kind: CGEventType, button: CGMouseButton) -> Result<()> {
        let event = CGEvent::new_mouse_event(Self::source()?, kind, self.pointer, button)
            .map_err(|_| anyhow!("cannot create mouse event"))?;
        event.post(CGEventTapLocation::HID);
        Ok(())
    }

    fn post_key(&self, key: &str, down: bool) -> Result<()> {
        let code = key_code(key).ok_or_else(|| anyhow!("unknown key: {}", key))?;
        let event = CGEvent::new_keyboard_event(Self::source()?, code, down)
            .map_err(|_| anyhow!("cannot create key event for {}", key))?;
        event.post(CGEventTapLocation::HID);
        Ok(())
    }
}

fn mouse_kinds(button: MouseButton) -> (CGEventType, CGEventType, CGMouseButton) {
    match button {
        MouseButton::Left => (CGEventType::LeftMouseDown, CGEventType::LeftMouseUp, CGMouseButton::Left),
        MouseButton::Right => (CGEventType::RightMouseDown, CGEventType::RightMouseUp, CGMouseButton::Right),
    }
}

impl WindowHandle for DarwinWindow {
    fn id(&self) -> WindowId {
        self.window_id as WindowId
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn region(&self) -> Option<Region> {
        self.region
    }

    fn update(&mut self) {
        self.refresh();
    }

    fn activate(&mut self) {
        if self.pid.is_none() {
            self.refresh();
        }
        match self.pid {
            Some(pid) => bring_to_front(pid),
            None => logger::warn_p("darwin", &format!("window {} has no owner to activate", self.window_id)),
        }
    }

    fn move_pointer(&mut self, x: i32, y: i32) -> Result<()> {
        self.pointer = CGPoint::new(x as f64, y as f64);
        self.post_mouse(CGEventType::MouseMoved, CGMouseButton::Left)
    }

    fn button_down(&mut self, button: MouseButton) -> Result<()> {
        let (down, _, b) = mouse_kinds(button);
        self.post_mouse(down, b)
    }

    fn button_up(&mut self, button: MouseButton) -> Result<()> {
        let (_, up, b) = mouse_kinds(button);
        self.post_mouse(up, b)
    }

    fn key_down(&mut self, key: &str) -> Result<()> {
        self.post_key(key, true)
    }

    fn key_up(&mut self, key: &str) -> Result<()> {
        self.post_key(key, false)
    }

    fn type_text(&mut self, text: &str) -> Result<()> {
        // A zero keycode event carrying the string types it regardless of layout.
        for down in [true, false] {
            let event = CGEvent::new_keyboard_event(Self::source()?, 0, down)
                .map_err(|_| anyhow!("cannot create text event"))?;
            event.set_string(text);
            event.post(CGEventTapLocation::HID);
        }
        Ok(())
    }

    fn capture(&mut self, rect: ScreenRect) -> Result<Capture> {
        if rect.is_empty() {
            bail!("empty capture rect");
        }
        let cg_rect = CGRect::new(
            &CGPoint::new(rect.left as f64, rect.top as f64),
            &CGSize::new(rect.width as f64, rect.height as f64),
        );

        let image_option = kCGWindowImageBoundsIgnoreFraming | kCGWindowImageNominalResolution;
        let image = create_image(
            cg_rect,
            kCGWindowListOptionIncludingWindow,
            self.window_id,
            image_option,
        )
        .ok_or_else(|| anyhow!("capture of window {} failed (screen recording permission?)", self.window_id))?;

        let bytes = image.data().bytes().to_vec();
        Ok(Capture {
            data: bytes,
            width: image.width() as u32,
            height: image.height() as u32,
            bytes_per_row: image.bytes_per_row() as u32,
        })
    }
}
