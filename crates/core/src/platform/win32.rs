use std::ffi::c_void;
use std::mem;

use anyhow::{anyhow, bail, Result};
use windows::Win32::Foundation::{BOOL, HWND, LPARAM, RECT};
use windows::Win32::Graphics::Gdi::{
    BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject, GetDC, GetDIBits,
    ReleaseDC, SelectObject, BITMAPINFO, BITMAPINFOHEADER, BI_RGB, CAPTUREBLT, DIB_RGB_COLORS,
    SRCCOPY,
};
use windows::Win32::UI::Input::KeyboardAndMouse::{
    MapVirtualKeyW, SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBDINPUT,
    KEYBD_EVENT_FLAGS, KEYEVENTF_EXTENDEDKEY, KEYEVENTF_KEYUP, KEYEVENTF_SCANCODE,
    KEYEVENTF_UNICODE, MAPVK_VK_TO_VSC, MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP,
    MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP, MOUSEINPUT, MOUSE_EVENT_FLAGS, VIRTUAL_KEY,
};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetWindowRect, GetWindowTextW, IsWindowVisible, SetCursorPos,
    SetForegroundWindow,
};

use crate::logger;
use crate::types::*;
use super::{Platform, WindowHandle};

/// Virtual-key code for a key name. Letters and digits map to themselves.
fn virtual_key(key: &str) -> Option<u16> {
    let lower = key.to_lowercase();
    let vk = match lower.as_str() {
        "enter" | "return" => 0x0D,
        "esc" | "escape" => 0x1B,
        "tab" => 0x09,
        "space" => 0x20,
        "backspace" => 0x08,
        "delete" => 0x2E,
        "shift" => 0x10,
        "ctrl" | "control" => 0x11,
        "alt" => 0x12,
        "left" => 0x25,
        "up" => 0x26,
        "right" => 0x27,
        "down" => 0x28,
        f if f.len() > 1 && f.starts_with('f') => {
            let n: u16 = f[1..].parse().ok()?;
            if !(1..=12).contains(&n) {
                return None;
            }
            0x70 + n - 1
        }
        s if s.len() == 1 => {
            let ch = s.chars().next()?.to_ascii_uppercase();
            if !ch.is_ascii_alphanumeric() {
                return None;
            }
            ch as u16
        }
        _ => return None,
    };
    Some(vk)
}

fn is_extended(vk: u16) -> bool {
    matches!(vk, 0x25..=0x28 | 0x2E)
}

fn send(inputs: &[INPUT]) -> Result<()> {
    let sent = unsafe { SendInput(inputs, mem::size_of::<INPUT>() as i32) };
    if sent as usize != inputs.len() {
        bail!("SendInput accepted {} of {} events", sent, inputs.len());
    }
    Ok(())
}

fn key_input(vk: u16, up: bool) -> INPUT {
    // Scan codes reach games that read raw keyboard state.
    let scan = unsafe { MapVirtualKeyW(vk as u32, MAPVK_VK_TO_VSC) } as u16;
    let mut flags = KEYEVENTF_SCANCODE;
    if is_extended(vk) {
        flags |= KEYEVENTF_EXTENDEDKEY;
    }
    if up {
        flags |= KEYEVENTF_KEYUP;
    }
    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: VIRTUAL_KEY(0),
                wScan: scan,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

fn unicode_input(unit: u16, up: bool) -> INPUT {
    let flags = if up { KEYEVENTF_UNICODE | KEYEVENTF_KEYUP } else { KEYEVENTF_UNICODE };
    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: VIRTUAL_KEY(0),
                wScan: unit,
                dwFlags: flags | KEYBD_EVENT_FLAGS(0),
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

fn mouse_input(flags: MOUSE_EVENT_FLAGS) -> INPUT {
    INPUT {
        r#type: INPUT_MOUSE,
        Anonymous: INPUT_0 {
            mi: MOUSEINPUT { dx: 0, dy: 0, mouseData: 0, dwFlags: flags, time: 0, dwExtraInfo: 0 },
        },
    }
}

fn window_text(hwnd: HWND) -> String {
    let mut buf = [0u16; 512];
    let len = unsafe { GetWindowTextW(hwnd, &mut buf) };
    String::from_utf16_lossy(&buf[..len.max(0) as usize])
}

pub struct WindowsPlatform;

impl Platform for WindowsPlatform {
    fn get_instances(&self, pattern: &str) -> Vec<(WindowId, String)> {
        let re = match regex::Regex::new(&format!("(?i){}", pattern)) {
            Ok(r) => r,
            Err(e) => {
                logger::error(&format!("invalid pattern '{}': {}", pattern, e));
                return Vec::new();
            }
        };

        unsafe extern "system" fn collect(hwnd: HWND, lparam: LPARAM) -> BOOL {
            let found = &mut *(lparam.0 as *mut Vec<HWND>);
            if IsWindowVisible(hwnd).as_bool() {
                found.push(hwnd);
            }
            BOOL(1)
        }

        let mut handles: Vec<HWND> = Vec::new();
        let ok = unsafe { EnumWindows(Some(collect), LPARAM(&mut handles as *mut _ as isize)) };
        if let Err(e) = ok {
            logger::warn_p("windows", &format!("EnumWindows failed: {}", e));
        }

        let mut windows = Vec::new();
        for hwnd in handles {
            let title = window_text(hwnd);
            if !title.is_empty() && re.is_match(&title) {
                logger::info_p("windows", &format!("found window: \"{}\" ({:?})", title, hwnd.0));
                windows.push((hwnd.0 as usize as WindowId, title));
            }
        }
        windows
    }

    fn create_window(&self, _pattern: &str, window_id: WindowId) -> Box<dyn WindowHandle> {
        let mut win = Win32Window {
            hwnd: window_id as usize,
            title: String::new(),
            region: None,
        };
        win.do_update();
        Box::new(win)
    }
}

/// `HWND` kept as an integer so the handle can cross threads.
struct Win32Window {
    hwnd: usize,
    title: String,
    region: Option<Region>,
}

impl Win32Window {
    fn handle(&self) -> HWND {
        HWND(self.hwnd as *mut c_void)
    }

    fn do_update(&mut self) {
        let hwnd = self.handle();
        let mut rect = RECT::default();
        if unsafe { GetWindowRect(hwnd, &mut rect) }.is_err() {
            self.region = None;
            return;
        }
        self.title = window_text(hwnd);
        self.region = Some(Region::new(
            rect.left,
            rect.top,
            rect.right - rect.left,
            rect.bottom - rect.top,
        ));
    }
}

impl WindowHandle for Win32Window {
    fn id(&self) -> WindowId {
        self.hwnd as WindowId
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn region(&self) -> Option<Region> {
        self.region
    }

    fn update(&mut self) {
        self.do_update();
    }

    fn activate(&mut self) {
        unsafe {
            let _ = SetForegroundWindow(self.handle());
        }
    }

    fn move_pointer(&mut self, x: i32, y: i32) -> Result<()> {
        unsafe { SetCursorPos(x, y) }.map_err(|e| anyhow!("SetCursorPos({}, {}): {}", x, y, e))
    }

    fn button_down(&mut self, button: MouseButton) -> Result<()> {
        let flags = match button {
            MouseButton::Left => MOUSEEVENTF_LEFTDOWN,
            MouseButton::Right => MOUSEEVENTF_RIGHTDOWN,
        };
        send(&[mouse_input(flags)])
    }

    fn button_up(&mut self, button: MouseButton) -> Result<()> {
        let flags = match button {
            MouseButton::Left => MOUSEEVENTF_LEFTUP,
            MouseButton::Right => MOUSEEVENTF_RIGHTUP,
        };
        send(&[mouse_input(flags)])
    }

    fn key_down(&mut self, key: &str) -> Result<()> {
        let vk = virtual_key(key).ok_or_else(|| anyhow!("unknown key: {}", key))?;
        send(&[key_input(vk, false)])
    }

    fn key_up(&mut self, key: &str) -> Result<()> {
        let vk = virtual_key(key).ok_or_else(|| anyhow!("unknown key: {}", key))?;
        send(&[key_input(vk, true)])
    }

    fn type_text(&mut self, text: &str) -> Result<()> {
        let mut inputs = Vec::new();
        for unit in text.encode_utf16() {
            inputs.push(unicode_input(unit, false));
            inputs.push(unicode_input(unit, true));
        }
        send(&inputs)
    }

    fn capture(&mut self, rect: ScreenRect) -> Result<Capture> {
        if rect.is_empty() {
            bail!("empty capture rect");
        }
        let (w, h) = (rect.width as i32, rect.height as i32);

        unsafe {
            let screen = GetDC(HWND::default());
            if screen.is_invalid() {
                bail!("GetDC failed");
            }
            let mem_dc = CreateCompatibleDC(screen);
            let bitmap = CreateCompatibleBitmap(screen, w, h);
            let previous = SelectObject(mem_dc, bitmap);

            let blit = BitBlt(mem_dc, 0, 0, w, h, screen, rect.left, rect.top, SRCCOPY | CAPTUREBLT);

            let mut info = BITMAPINFO {
                bmiHeader: BITMAPINFOHEADER {
                    biSize: mem::size_of::<BITMAPINFOHEADER>() as u32,
                    biWidth: w,
                    // Negative height: top-down rows.
                    biHeight: -h,
                    biPlanes: 1,
                    biBitCount: 32,
                    biCompression: BI_RGB.0,
                    ..Default::default()
                },
                ..Default::default()
            };
            let mut data = vec![0u8; (rect.width * rect.height * 4) as usize];
            let lines = GetDIBits(
                mem_dc,
                bitmap,
                0,
                rect.height,
                Some(data.as_mut_ptr() as *mut c_void),
                &mut info,
                DIB_RGB_COLORS,
            );

            SelectObject(mem_dc, previous);
            let _ = DeleteObject(bitmap);
            let _ = DeleteDC(mem_dc);
            ReleaseDC(HWND::default(), screen);

            blit.map_err(|e| anyhow!("BitBlt failed: {}", e))?;
            if lines != h {
                bail!("GetDIBits copied {} of {} rows", lines, h);
            }

            Ok(Capture {
                data,
                width: rect.width,
                height: rect.height,
                bytes_per_row: rect.width * 4,
            })
        }
    }
}
