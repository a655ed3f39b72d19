//! Pipeline stages for figure reconciliation and chunking.
//!
//! Each submodule implements exactly one transformation step, so each is
//! testable on its own and the external collaborators (vision model,
//! artifact store) stay behind traits.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ crop ──▶ encode ──▶ describe ──▶ postprocess ──▶ store
//! (path/URL) (pdfium/tiff) (PNG) (VLM)      (cleanup)      (cache)
//!                    └──────────── resolve (per figure) ─────────┘
//!
//! reconcile ──▶ split
//! (placeholders) (headers, then figures)
//! ```
//!
//! 1. [`input`]    — canonicalise the path or URL and classify the media type
//! 2. [`crop`]     — cut one region out of a PDF page or TIFF frame; runs in
//!    `spawn_blocking` because pdfium and the TIFF decoder are blocking
//! 3. [`encode`]   — PNG-encode the crop, wrap it for the API or as a data URL
//! 4. [`describe`] — drive the VLM call with retry/backoff; the only stage
//!    with network I/O
//! 5. [`postprocess`] — deterministic cleanup so descriptions cannot inject
//!    headers, placeholders or figure tags
//! 6. [`store`]    — per-(document, figure) cache of crops and descriptions
//! 7. [`resolve`]  — steps 2–6 for every figure, concurrently
//! 8. [`reconcile`] — single-cursor marker substitution
//! 9. [`split`]    — header sections, then figure pieces, then chunks

pub mod crop;
pub mod describe;
pub mod encode;
pub mod input;
pub mod postprocess;
pub mod reconcile;
pub mod resolve;
pub mod split;
pub mod store;
