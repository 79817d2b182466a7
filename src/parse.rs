//! Document-level entry points.
//!
//! [`reconcile`] is the core: given an analysis and the two collaborators
//! (page renderer, vision model) it extracts every figure region, describes
//! it, and splices the descriptions into the text. [`parse_with`] adds the
//! analysis step and its cache; [`parse`] wires up the production
//! collaborators from a [`ParseConfig`].

use crate::analysis::AnalysisResult;
use crate::analyzer::{DocIntelAnalyzer, LayoutAnalyzer};
use crate::config::ParseConfig;
use crate::error::{FigDescError, RegionError};
use crate::output::{BatchItem, ParseOutput, ParseStats};
use crate::pipeline::cache::DescriptionCache;
use crate::pipeline::context::ContextHints;
use crate::pipeline::coordinator::{self, RegionTask, TaskContext};
use crate::pipeline::describe::DescriptionEngine;
use crate::pipeline::llm::{self, ProviderModel, VisionModel};
use crate::pipeline::region::{PageRenderer, RegionKey, ResultPage};
use crate::pipeline::render::PdfiumPageRenderer;
use crate::pipeline::{input, replacements, splice};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Files processed at once by [`parse_directory`] when no value is given.
pub const DEFAULT_FILE_CONCURRENCY: usize = 4;

/// Reconcile an analysed document with descriptions of its figures.
///
/// `model = None` skips description: regions are still extracted (and saved
/// when configured) and every figure carries the "no description" marker.
///
/// Per-region failures never fail the call; they show up in
/// [`ParseOutput::regions`] and as placeholders in the text.
pub async fn reconcile(
    analysis: &AnalysisResult,
    renderer: Arc<dyn PageRenderer>,
    model: Option<Arc<dyn VisionModel>>,
    doc_stem: &str,
    image_dir: &Path,
    config: &ParseConfig,
) -> Result<ParseOutput, FigDescError> {
    let total_start = Instant::now();
    let total_regions = analysis.region_count();
    info!(
        "Reconciling '{}': {} figures, {} regions",
        doc_stem,
        analysis.figures.len(),
        total_regions
    );

    // ── Step 1: Prepare the image directory ──────────────────────────────
    let needs_dir = total_regions > 0 && (config.save_images || (config.use_cache && model.is_some()));
    if needs_dir {
        tokio::fs::create_dir_all(image_dir)
            .await
            .map_err(|e| FigDescError::ImageDirFailed {
                path: image_dir.to_path_buf(),
                source: e,
            })?;
    }

    // ── Step 2: Page geometry ────────────────────────────────────────────
    let (pages, page_count) = if total_regions > 0 {
        let r = Arc::clone(&renderer);
        let extents = tokio::task::spawn_blocking(move || r.page_extents())
            .await
            .map_err(|e| FigDescError::Internal(format!("page extent task: {e}")))??;
        let page_count = extents.len();
        let pages: HashMap<u32, Result<ResultPage, RegionError>> = analysis
            .pages
            .iter()
            .map(|page| {
                let extent = (page.page_number as usize)
                    .checked_sub(1)
                    .and_then(|idx| extents.get(idx));
                let result = match extent {
                    Some(extent) => ResultPage::new(page, *extent),
                    None => Err(RegionError::PageNotFound {
                        page: page.page_number,
                        total: page_count,
                    }),
                };
                (page.page_number, result)
            })
            .collect();
        (pages, page_count)
    } else {
        (HashMap::new(), 0)
    };

    // ── Step 3: Pending replacements ─────────────────────────────────────
    let mut pending = replacements::build_replacements(analysis);
    debug!("{} figure spans to replace", pending.len());

    // ── Step 4: Region tasks ─────────────────────────────────────────────
    let mut tasks = Vec::with_capacity(total_regions);
    for (figure_index, figure) in analysis.figures.iter().enumerate() {
        let hints = replacements::first_span_of(&pending, figure_index)
            .map(|rep| ContextHints::around(&analysis.text, rep.start, rep.end))
            .unwrap_or_default();
        for (region_index, region) in figure.bounding_regions.iter().enumerate() {
            tasks.push(RegionTask {
                key: RegionKey {
                    page_number: region.page_number,
                    figure_index,
                    region_index,
                },
                region: region.clone(),
                hints: hints.clone(),
            });
        }
    }

    let engine = model
        .as_ref()
        .map(|m| DescriptionEngine::new(Arc::clone(m), config.mode, config.retry_policy()));
    let cache = (config.use_cache && engine.is_some()).then(|| DescriptionCache::new(image_dir));

    let ctx = Arc::new(TaskContext {
        renderer,
        pages,
        page_count,
        engine,
        cache,
        image_dir: image_dir.to_path_buf(),
        save_images: config.save_images,
        doc_stem: doc_stem.to_string(),
        render_scale: config.render_scale,
        progress: config.progress_callback.clone(),
        total_regions,
    });

    if let Some(ref cb) = config.progress_callback {
        cb.on_parse_start(total_regions);
    }

    // ── Step 5: Fan out, then wait for every region ──────────────────────
    let regions_start = Instant::now();
    let mut outcomes = coordinator::run_regions(ctx, tasks, config.worker_count()).await;
    let regions_duration_ms = regions_start.elapsed().as_millis() as u64;
    outcomes.sort_by_key(|o| (o.key.figure_index, o.key.region_index));

    // ── Step 6: Merge and splice ─────────────────────────────────────────
    coordinator::merge_outcomes(&mut pending, &outcomes);
    let replaced = pending.len();
    let markdown = splice::splice(&analysis.text, pending)?;
    let title = splice::detect_title(analysis, &markdown, doc_stem);

    // ── Step 7: Stats ────────────────────────────────────────────────────
    let images: Vec<PathBuf> = if config.save_images {
        outcomes
            .iter()
            .filter(|o| o.is_extracted())
            .filter_map(|o| o.image_path.clone())
            .collect()
    } else {
        Vec::new()
    };

    let (total_input_tokens, total_output_tokens) =
        model.as_ref().map(|m| m.token_usage()).unwrap_or((0, 0));
    let mut stats = ParseStats {
        figures: analysis.figures.len(),
        replacements: replaced,
        total_input_tokens,
        total_output_tokens,
        regions_duration_ms,
        ..Default::default()
    };
    stats.count_outcomes(&outcomes);
    stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    info!(
        "Reconciled '{}': {}/{} regions described ({} cached), {} failed, {} skipped, {}ms",
        doc_stem,
        stats.described,
        stats.regions,
        stats.cached,
        stats.failed,
        stats.skipped,
        stats.total_duration_ms
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_parse_complete(total_regions, stats.described);
    }

    Ok(ParseOutput {
        markdown,
        title,
        images,
        regions: outcomes,
        stats,
    })
}

/// Analyse `path` (or reuse its cached analysis) and reconcile it.
///
/// The analysis cache is `<doc dir>/<stem>.analysis.json`; images and region
/// caches go to `config.image_dir` or `<doc dir>/images`.
pub async fn parse_with(
    path: &Path,
    analyzer: &dyn LayoutAnalyzer,
    renderer: Arc<dyn PageRenderer>,
    model: Option<Arc<dyn VisionModel>>,
    config: &ParseConfig,
) -> Result<ParseOutput, FigDescError> {
    let total_start = Instant::now();
    let doc_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());

    // ── Step 1: Layout analysis ──────────────────────────────────────────
    let analysis_start = Instant::now();
    let cache_path = doc_dir.join(format!("{stem}.analysis.json"));
    let cached = if config.use_cache {
        AnalysisResult::load_cached(&cache_path).await
    } else {
        None
    };
    let analysis_cached = cached.is_some();
    let analysis = match cached {
        Some(analysis) => {
            debug!("Reusing analysis {}", cache_path.display());
            analysis
        }
        None => {
            let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
                std::io::ErrorKind::PermissionDenied => FigDescError::PermissionDenied {
                    path: path.to_path_buf(),
                },
                _ => FigDescError::FileNotFound {
                    path: path.to_path_buf(),
                },
            })?;
            info!("Analysing layout of '{}'", path.display());
            let analysis = analyzer.analyze(path, &bytes).await?;
            if config.use_cache {
                analysis.save_cache(&cache_path).await;
            }
            analysis
        }
    };
    let analysis_duration_ms = analysis_start.elapsed().as_millis() as u64;

    // ── Step 2: Reconcile ────────────────────────────────────────────────
    let image_dir = config
        .image_dir
        .clone()
        .unwrap_or_else(|| doc_dir.join("images"));
    let mut output = reconcile(&analysis, renderer, model, &stem, &image_dir, config).await?;

    output.stats.analysis_cached = analysis_cached;
    output.stats.analysis_duration_ms = analysis_duration_ms;
    output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
    Ok(output)
}

/// Parse a local PDF with the production collaborators.
///
/// Configuration problems (analysis service, LLM provider) are reported
/// before any work starts.
///
/// # Errors
/// Only fatal errors: unreadable input, missing configuration, a failed
/// analysis, or an image directory that cannot be created.
pub async fn parse(
    path: impl AsRef<Path>,
    config: &ParseConfig,
) -> Result<ParseOutput, FigDescError> {
    // ── Step 1: Resolve input ────────────────────────────────────────────
    let path = input::resolve_local(path.as_ref())?;
    info!("Starting parse: {}", path.display());

    // ── Step 2: Collaborators ────────────────────────────────────────────
    let analyzer = DocIntelAnalyzer::from_config(config)?;
    let model: Option<Arc<dyn VisionModel>> = if config.describe_images {
        let provider = llm::resolve_provider(config)?;
        let model: Arc<dyn VisionModel> = Arc::new(ProviderModel::from_config(provider, config));
        Some(model)
    } else {
        debug!("Image description disabled");
        None
    };
    let renderer: Arc<dyn PageRenderer> =
        Arc::new(PdfiumPageRenderer::new(&path, config.password.clone()));

    // ── Step 3: Run ──────────────────────────────────────────────────────
    parse_with(&path, &analyzer, renderer, model, config).await
}

/// Parse a PDF and write the Markdown to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn parse_to_file(
    input_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    config: &ParseConfig,
) -> Result<ParseStats, FigDescError> {
    let output = parse(input_path, config).await?;
    write_markdown(output_path.as_ref(), &output.markdown).await?;
    Ok(output.stats)
}

/// Write `markdown` to `path` through a sibling temp file.
pub async fn write_markdown(path: &Path, markdown: &str) -> Result<(), FigDescError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| FigDescError::OutputWriteFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
    }

    let tmp_path = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, markdown)
        .await
        .map_err(|e| FigDescError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| FigDescError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    Ok(())
}

/// Parse every PDF in `dir`, writing `<out_dir>/<stem>.md` for each.
///
/// Up to `file_concurrency` files (default [`DEFAULT_FILE_CONCURRENCY`]) run
/// at once. A failing file is reported in its [`BatchItem`] and never stops
/// the others. Items come back sorted by input path.
pub async fn parse_directory(
    dir: impl AsRef<Path>,
    out_dir: impl AsRef<Path>,
    config: &ParseConfig,
    file_concurrency: Option<usize>,
    overwrite: bool,
) -> Result<Vec<BatchItem>, FigDescError> {
    let pdfs = input::list_pdfs(dir.as_ref())?;
    let out_dir = out_dir.as_ref();
    let workers = file_concurrency.unwrap_or(DEFAULT_FILE_CONCURRENCY).max(1);
    info!(
        "Batch: {} PDFs in '{}' ({} at a time)",
        pdfs.len(),
        dir.as_ref().display(),
        workers
    );

    let mut items: Vec<BatchItem> = stream::iter(pdfs.into_iter().map(|input| {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let output = out_dir.join(format!("{stem}.md"));
        async move {
            let result = if !overwrite && output.exists() {
                Err(FigDescError::OutputExists {
                    path: output.clone(),
                })
            } else {
                parse_to_file(&input, &output, config).await
            };
            if let Err(ref e) = result {
                warn!("'{}' failed: {}", input.display(), e);
            }
            BatchItem {
                input,
                output,
                result,
            }
        }
    }))
    .buffer_unordered(workers)
    .collect()
    .await;

    items.sort_by(|a, b| a.input.cmp(&b.input));
    Ok(items)
}

/// Synchronous wrapper around [`parse`].
///
/// Creates a temporary tokio runtime internally.
pub fn parse_sync(
    path: impl AsRef<Path>,
    config: &ParseConfig,
) -> Result<ParseOutput, FigDescError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| FigDescError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(parse(path, config))
}
