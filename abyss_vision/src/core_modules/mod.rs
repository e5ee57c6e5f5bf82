// THEORY:
// `core_modules` holds the per-pixel machinery of the engine. Everything here
// works on a single frame pair and knows nothing about video files, sampling or
// output; the `pipeline` module layers those concerns on top.

pub mod backend;
pub mod event;
pub mod foreground;
pub mod grid;
pub mod guided_filter;
pub mod novelty_model;
