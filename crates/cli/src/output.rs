//! Terminal output helpers.

use owo_colors::{OwoColorize, Stream};

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
}

pub fn success(msg: &str) {
  println!(
    "{} {msg}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green())
  );
}

pub fn note(msg: &str) {
  println!("{} {msg}", symbols::INFO.if_supports_color(Stream::Stdout, |s| s.cyan()));
}

pub fn warning(msg: &str) {
  eprintln!(
    "{} {msg}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}
