//! HTML served by the upload form.
//!
//! The page shell is kept as a `&'static str` so it is bundled inside the
//! binary without filesystem lookups.

pub mod page;

pub use page::render_page;
