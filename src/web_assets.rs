//! Stylesheet and page runtime compiled into the binary.
//!
//! The rendered page links both by these paths and `serve` answers them
//! from memory.

/// Request path of [`CSS`].
pub const CSS_PATH: &str = "/assets/paperdoc.css";

/// Request path of [`JS`].
pub const JS_PATH: &str = "/assets/paperdoc.js";

/// Page stylesheet: layout, light/dark palettes, TOC and marker styles.
pub const CSS: &str = include_str!("assets/paperdoc.css");

/// Browser runtime: theme toggle, scroll progress, back-to-top, active
/// section tracking, the search hotkey, and live search highlighting.
pub const JS: &str = include_str!("assets/paperdoc.js");
