mod app;
mod confirm;
mod event;
mod ui;

pub use app::App;
pub use event::run;
