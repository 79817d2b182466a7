//! Pipeline stages for figure reconciliation.
//!
//! Each submodule implements one step. Keeping them separate makes each
//! testable on its own and lets the collaborators (renderer, model) be
//! swapped without touching the rest.
//!
//! ## Data Flow
//!
//! ```text
//! analysis ──▶ replacements ──▶ coordinator ──────────────────────▶ splice
//!                   │              │ per region:                     ▲
//!                   │              ├─ region / render  (raster)      │
//!                   │              ├─ cache            (reuse)       │
//!                   │              └─ describe ─▶ classify / llm     │
//!                   └──────────────────── merge_outcomes ────────────┘
//! ```
//!
//! 1. [`replacements`] — one pending edit per figure span, with its caption
//! 2. [`context`]      — section name and surrounding paragraphs per figure
//! 3. [`region`]       — polygon → crop rectangle, image naming, renderer seam
//! 4. [`render`]       — pdfium implementation of the renderer
//! 5. [`encode`]       — PNG bytes → base64 attachment
//! 6. [`llm`]          — model seam, provider adapter, retry wrapper
//! 7. [`classify`]     — classifier reply parsing and template lookup
//! 8. [`describe`]     — direct and classify-then-specialise descriptions
//! 9. [`cache`]        — per-region description cache
//! 10. [`coordinator`] — bounded fan-out, barrier, outcome reducer
//! 11. [`splice`]      — descending-offset text splice
//! 12. [`input`]       — local input validation

pub mod cache;
pub mod classify;
pub mod context;
pub mod coordinator;
pub mod describe;
pub mod encode;
pub mod input;
pub mod llm;
pub mod region;
pub mod render;
pub mod replacements;
pub mod splice;
