#![forbid(unsafe_code)]

mod frame;
mod keyevent;
mod parse;
mod request;

pub use frame::Frame;
pub use keyevent::{KeyEvent, KeyEventKind, keyevent_pattern};
pub use parse::Parse;
pub use request::{Request, ScanPage};
