//! # edgequake-figdesc
//!
//! Describe the figures of an analysed PDF with Vision Language Models (VLMs)
//! and splice the descriptions back into its Markdown.
//!
//! ## Why this crate?
//!
//! Layout analysis turns a PDF into good Markdown text, but every chart,
//! table image, diagram or scan becomes an opaque hole. This crate cuts each
//! figure region out of the page, asks a VLM to describe it (optionally
//! classifying it first so a chart gets a chart-specific instruction), and
//! replaces the figure's span in the text with a marked-up description block.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Analyse   layout analysis service → text + figure spans/polygons (cached)
//!  ├─ 2. Plan      one pending replacement per figure span, caption extracted
//!  ├─ 3. Extract   crop each bounding region via pdfium (spawn_blocking)
//!  ├─ 4. Describe  direct, or classify → specialised prompt (bounded concurrency)
//!  ├─ 5. Barrier   wait for every region, merge results per figure
//!  └─ 6. Splice    replace spans in descending offset order, detect title
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_figdesc::{parse, ParseConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Analysis service from DOCINTEL_ENDPOINT / DOCINTEL_KEY,
//!     // provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = ParseConfig::default();
//!     let output = parse("report.pdf", &config).await?;
//!     println!("{}", output.markdown);
//!     eprintln!(
//!         "{}/{} regions described",
//!         output.stats.described, output.stats.regions
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Bring your own collaborators
//!
//! [`reconcile`] takes an [`AnalysisResult`], a [`PageRenderer`] and an
//! optional [`VisionModel`], so the pipeline runs without network or pdfium
//! when the caller supplies its own implementations.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `figdesc` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analysis;
pub mod analyzer;
pub mod config;
pub mod error;
pub mod output;
pub mod parse;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analysis::{AnalysisPage, AnalysisResult, BoundingRegion, Figure, Paragraph, Span, Table};
pub use analyzer::{DocIntelAnalyzer, LayoutAnalyzer};
pub use config::{DescriptionMode, ParseConfig, ParseConfigBuilder, RetryPolicy};
pub use error::{DescribeError, FigDescError, ModelError, RegionError, SpliceError};
pub use output::{BatchItem, ParseOutput, ParseStats};
pub use parse::{
    parse, parse_directory, parse_sync, parse_to_file, parse_with, reconcile, write_markdown,
};
pub use pipeline::coordinator::{RegionOutcome, RegionStatus};
pub use pipeline::llm::{ProviderModel, RequestStage, VisionModel, VisionRequest};
pub use pipeline::region::{PageExtent, PageRenderer, RegionKey, RenderRect};
pub use pipeline::render::PdfiumPageRenderer;
pub use progress::{NoopProgressCallback, ParseProgressCallback, ProgressCallback};
