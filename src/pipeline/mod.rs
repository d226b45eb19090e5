//! Pipeline stages for chunked text extraction.
//!
//! Each submodule implements one step; the [`driver`] strings them together
//! one chunk at a time.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ subset ──▶ slicer ──▶ driver ──▶ bypass ──▶ postprocess
//! (bytes)   (lopdf)    (ranges)   (extract)  (decode)   (cleanup)
//!                                    │
//!                                    └── pacing between chunks
//! ```
//!
//! 1. [`input`]   : read a local path or download a URL into memory
//! 2. [`subset`]  : parse the source and cut standalone page subsets
//! 3. [`slicer`]  : split the requested range into contiguous chunks
//! 4. [`driver`]  : the run state machine; owns the result buffer
//! 5. [`bypass`]  : undo the marker scheme the model was asked to apply
//! 6. [`postprocess`] : deterministic cleanup of each chunk's text
//! 7. [`pacing`]  : delay policy between consecutive requests
//! 8. [`render`]  : pdfium rasterisation for the local extractor

pub mod bypass;
pub mod driver;
pub mod input;
pub mod pacing;
pub mod postprocess;
pub mod render;
pub mod slicer;
pub mod subset;
