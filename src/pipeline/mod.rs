//! Pipeline stages for both conversion directions.
//!
//! Each submodule implements exactly one transformation step, so each can be
//! tested on its own and the native pdfium dependency stays confined to
//! [`render`].
//!
//! ## Data Flow
//!
//! ```text
//! split:  pdf ──▶ render ──▶ split ──▶ output/images/<job>/page-NNNN.jpg
//!                (pdfium)   (encode)
//!
//! join:   images/** ──▶ pages ──▶ compose (_max)
//!                      (order)      │
//!                                   ▼
//!                              compress ──▶ compose (_min) ──▶ compress …
//! ```
//!
//! 1. [`render`]   : rasterise every page on a dedicated pdfium thread
//! 2. [`split`]    : validate the source and write numbered JPEG pages
//! 3. [`pages`]    : discover, order and finally clear join inputs
//! 4. [`compose`]  : assemble ordered images into a PDF with lopdf
//! 5. [`compress`] : quality/scale passes toward the size budget
//! 6. [`encode`]   : codec helpers shared by the stages above

pub mod compose;
pub mod compress;
pub mod encode;
pub mod pages;
pub mod render;
pub mod split;
