//! Text output for exported flows

pub mod text;

pub use text::TextOutput;
