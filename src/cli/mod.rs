//! Command-line surface: argument parsing, console display, and the
//! interactive interrupt loop.

mod commands;
mod display;
mod interactive;

pub use commands::{Cli, Commands};
pub use display::Display;
pub use interactive::spawn_interrupt_repl;
