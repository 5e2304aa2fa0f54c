pub mod stub;
pub mod hotkey;

#[cfg(target_os = "macos")]
pub mod darwin;

#[cfg(target_os = "windows")]
pub mod win32;

use std::thread;
use std::time::Duration;

use anyhow::Result;

use crate::types::*;
use crate::logger;

/// Handle to the target window: geometry, synthetic input and capture.
///
/// Coordinates are absolute display coordinates. Input calls return once
/// the event is queued and take effect before the next capture.
pub trait WindowHandle: Send {
    fn id(&self) -> WindowId;
    fn title(&self) -> &str;
    fn region(&self) -> Option<Region>;
    /// Refresh the cached geometry.
    fn update(&mut self);
    fn activate(&mut self);
    fn move_pointer(&mut self, x: i32, y: i32) -> Result<()>;
    fn button_down(&mut self, button: MouseButton) -> Result<()>;
    fn button_up(&mut self, button: MouseButton) -> Result<()>;
    fn key_down(&mut self, key: &str) -> Result<()>;
    fn key_up(&mut self, key: &str) -> Result<()>;
    fn type_text(&mut self, text: &str) -> Result<()>;
    fn capture(&mut self, rect: ScreenRect) -> Result<Capture>;
}

/// Platform-level operations (window enumeration, factory).
pub trait Platform: Send {
    fn get_instances(&self, pattern: &str) -> Vec<(WindowId, String)>;
    fn create_window(&self, pattern: &str, window_id: WindowId) -> Box<dyn WindowHandle>;
}

/// Create the platform appropriate for the current OS.
pub fn create_platform(force_stub: bool) -> Box<dyn Platform> {
    if force_stub {
        logger::register_prefix("stub", logger::COLOR_GRAY);
        return Box::new(stub::StubPlatform);
    }
    #[cfg(target_os = "macos")]
    {
        logger::register_prefix("darwin", logger::COLOR_GRAY);
        return Box::new(darwin::DarwinPlatform);
    }
    #[cfg(target_os = "windows")]
    {
        logger::register_prefix("windows", logger::COLOR_GRAY);
        return Box::new(win32::WindowsPlatform);
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        logger::register_prefix("stub", logger::COLOR_GRAY);
        return Box::new(stub::StubPlatform);
    }
}

/// Move to (x, y) and click. The down/up pair is never split.
pub fn click(win: &mut dyn WindowHandle, x: i32, y: i32, button: MouseButton, hold: Duration) -> Result<()> {
    win.move_pointer(x, y)?;
    click_here(win, button, hold)
}

/// Click wherever the pointer currently is.
pub fn click_here(win: &mut dyn WindowHandle, button: MouseButton, hold: Duration) -> Result<()> {
    win.button_down(button)?;
    thread::sleep(hold);
    win.button_up(button)
}

pub fn press(win: &mut dyn WindowHandle, key: &str, hold: Duration) -> Result<()> {
    win.key_down(key)?;
    thread::sleep(hold);
    win.key_up(key)
}

/// Hold `keys` in order, then release them in reverse.
pub fn chord(win: &mut dyn WindowHandle, keys: &[String], hold: Duration) -> Result<()> {
    for key in keys {
        win.key_down(key)?;
        thread::sleep(hold);
    }
    for key in keys.iter().rev() {
        win.key_up(key)?;
        thread::sleep(hold);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::stub::StubWindow;

    #[test]
    fn click_moves_then_presses_and_releases() {
        let mut win = StubWindow::new(1, 64, 48, 0);
        let events = win.events();
        click(&mut win, 10, 20, MouseButton::Left, Duration::ZERO).unwrap();
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                InputEvent::Move(10, 20),
                InputEvent::ButtonDown(MouseButton::Left),
                InputEvent::ButtonUp(MouseButton::Left),
            ]
        );
    }

    #[test]
    fn chord_releases_in_reverse() {
        let mut win = StubWindow::new(1, 64, 48, 0);
        let events = win.events();
        chord(&mut win, &["alt".to_string(), "f5".to_string()], Duration::ZERO).unwrap();
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                InputEvent::KeyDown("alt".into()),
                InputEvent::KeyDown("f5".into()),
                InputEvent::KeyUp("f5".into()),
                InputEvent::KeyUp("alt".into()),
            ]
        );
    }
}
