//! Pipeline stages for turning an intake-form PDF into a patient record.
//!
//! Each submodule does one transformation step and is tested on its own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ extract ──▶ normalize ──▶ merge
//! (checks)  (pdfium)   (base64)   (vision)    (fences)     (per page → record)
//! ```
//!
//! 1. [`input`]: path preconditions and `%PDF` magic check
//! 2. [`render`]: rasterise every page; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`encode`]: PNG-encode each page and base64-wrap it for the request
//! 4. [`extract`]: one vision call per page, with optional timeout and
//!    retry; the only stage with network I/O
//! 5. [`normalize`]: strip code fences, parse the reply as a JSON object
//! 6. [`merge`]: fold page results into one record, last write wins

pub mod encode;
pub mod extract;
pub mod input;
pub mod merge;
pub mod normalize;
pub mod render;
