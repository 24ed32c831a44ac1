mod backend;
mod error;
mod event;
mod message;
mod notice;
mod send;
mod slash_commands;
mod thread;

pub use backend::*;
pub use error::*;
pub use event::*;
pub use message::*;
pub use notice::*;
pub use send::*;
pub use slash_commands::*;
pub use thread::*;
