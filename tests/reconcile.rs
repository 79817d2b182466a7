//! Integration tests for the reconciliation pipeline.
//!
//! Every collaborator is stubbed: pages "render" to a short label naming the
//! page and crop origin, and the model answers from a closure that sees that
//! label. No network, no pdfium.
//!
//! Run with:
//!   cargo test --test reconcile

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_figdesc::pipeline::replacements::{PendingReplacement, ANALYSIS_ERROR, NO_DESCRIPTION};
use edgequake_figdesc::pipeline::splice::render_block;
use edgequake_figdesc::{
    parse_with, prompts, reconcile, AnalysisPage, AnalysisResult, BoundingRegion, DescriptionMode,
    Figure, FigDescError, LayoutAnalyzer, ModelError, PageExtent, PageRenderer,
    ParseConfig, ParseProgressCallback, RegionError, RegionStatus, RenderRect, RequestStage, Span,
    VisionModel, VisionRequest,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ── Stubs ────────────────────────────────────────────────────────────────────

/// US Letter in points, matching an 8.5 × 11 inch analysis page.
const LETTER: PageExtent = PageExtent {
    width: 612.0,
    height: 792.0,
};

struct StubRenderer {
    pages: usize,
    renders: AtomicUsize,
}

impl StubRenderer {
    fn new(pages: usize) -> Arc<Self> {
        Arc::new(Self {
            pages,
            renders: AtomicUsize::new(0),
        })
    }
}

impl PageRenderer for StubRenderer {
    fn page_extents(&self) -> Result<Vec<PageExtent>, FigDescError> {
        Ok(vec![LETTER; self.pages])
    }

    fn render_region(
        &self,
        page_index: usize,
        rect: &RenderRect,
        _scale: u32,
    ) -> Result<Vec<u8>, RegionError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        Ok(format!("p{}@{:.0},{:.0}", page_index, rect.x0, rect.y0).into_bytes())
    }
}

/// How [`BrokenRenderer`] fails the region it is told to break.
#[derive(Clone, Copy)]
enum Breakage {
    Error,
    Panic,
}

/// Renders like [`StubRenderer`] except for the crop starting at `bad_x0`.
struct BrokenRenderer {
    inner: Arc<StubRenderer>,
    bad_x0: f64,
    breakage: Breakage,
}

impl BrokenRenderer {
    fn new(bad_x0: f64, breakage: Breakage) -> Arc<Self> {
        Arc::new(Self {
            inner: StubRenderer::new(1),
            bad_x0,
            breakage,
        })
    }
}

impl PageRenderer for BrokenRenderer {
    fn page_extents(&self) -> Result<Vec<PageExtent>, FigDescError> {
        self.inner.page_extents()
    }

    fn render_region(
        &self,
        page_index: usize,
        rect: &RenderRect,
        scale: u32,
    ) -> Result<Vec<u8>, RegionError> {
        if (rect.x0 - self.bad_x0).abs() < 0.5 {
            match self.breakage {
                Breakage::Error => {
                    return Err(RegionError::RenderFailed {
                        page: page_index as u32 + 1,
                        detail: "bitmap allocation failed".into(),
                    })
                }
                Breakage::Panic => panic!("renderer crashed"),
            }
        }
        self.inner.render_region(page_index, rect, scale)
    }
}

type Reply = dyn Fn(&VisionRequest, &str) -> Result<String, ModelError> + Send + Sync;

/// Model answering from a closure over (request, rendered label).
struct StubModel {
    reply: Box<Reply>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    seen: Mutex<Vec<(RequestStage, String)>>,
    delay: Option<Duration>,
}

impl StubModel {
    fn new(
        reply: impl Fn(&VisionRequest, &str) -> Result<String, ModelError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Self::with_delay(reply, None)
    }

    fn with_delay(
        reply: impl Fn(&VisionRequest, &str) -> Result<String, ModelError> + Send + Sync + 'static,
        delay: Option<Duration>,
    ) -> Arc<Self> {
        Arc::new(Self {
            reply: Box::new(reply),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            delay,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn instructions(&self, stage: RequestStage) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == stage)
            .map(|(_, i)| i.clone())
            .collect()
    }
}

#[async_trait]
impl VisionModel for StubModel {
    async fn generate(&self, request: &VisionRequest) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.seen
            .lock()
            .unwrap()
            .push((request.stage, request.instruction.clone()));
        let label = String::from_utf8(STANDARD.decode(&request.image.data).unwrap()).unwrap();
        let reply = (self.reply)(request, &label);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        reply
    }

    fn token_usage(&self) -> (u64, u64) {
        let n = self.calls() as u64;
        (n * 100, n * 10)
    }
}

struct StubAnalyzer {
    result: Result<AnalysisResult, String>,
    calls: AtomicUsize,
}

#[async_trait]
impl LayoutAnalyzer for StubAnalyzer {
    async fn analyze(&self, path: &Path, document: &[u8]) -> Result<AnalysisResult, FigDescError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(document.starts_with(b"%PDF"));
        self.result
            .clone()
            .map_err(|detail| FigDescError::AnalysisFailed {
                path: path.to_path_buf(),
                detail,
            })
    }
}

#[derive(Default)]
struct CountingCallback {
    started_with: AtomicUsize,
    complete: AtomicUsize,
    errors: AtomicUsize,
    finished_described: AtomicUsize,
}

impl ParseProgressCallback for CountingCallback {
    fn on_parse_start(&self, total_regions: usize) {
        self.started_with.store(total_regions, Ordering::SeqCst);
    }
    fn on_region_complete(&self, _image_name: &str, _total: usize, _described: bool) {
        self.complete.fetch_add(1, Ordering::SeqCst);
    }
    fn on_region_error(&self, _page: u32, _total: usize, _error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
    fn on_parse_complete(&self, _total_regions: usize, described: usize) {
        self.finished_described.store(described, Ordering::SeqCst);
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────────

const FIGURE_TEXT: &str = "<figure>Fig 1. Revenues by year</figure>";
const SUFFIX: &str = "\n\nGrowth was strongest in the north.\n";

/// 100 bytes of heading and paragraph ahead of the figure.
fn prefix() -> String {
    let mut p = String::from("# Quarterly Report\n\nRevenue grew in every region. ");
    while p.len() < 98 {
        p.push('x');
    }
    p.push_str("\n\n");
    p
}

/// Axis-aligned polygon in inches, clockwise from the top-left corner.
fn rect_polygon(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<f64> {
    vec![x0, y0, x1, y0, x1, y1, x0, y1]
}

fn region(page_number: u32, x0: f64) -> BoundingRegion {
    BoundingRegion {
        page_number,
        polygon: rect_polygon(x0, 1.0, x0 + 2.0, 3.0),
    }
}

fn letter_page(page_number: u32) -> AnalysisPage {
    AnalysisPage {
        page_number,
        width: 8.5,
        height: 11.0,
        unit: Some("inch".into()),
        angle: Some(0.0),
    }
}

/// One figure at [100, 140) with the given regions.
fn single_figure(regions: Vec<BoundingRegion>) -> AnalysisResult {
    let prefix = prefix();
    assert_eq!(prefix.len(), 100);
    assert_eq!(FIGURE_TEXT.len(), 40);
    AnalysisResult {
        text: format!("{prefix}{FIGURE_TEXT}{SUFFIX}"),
        pages: vec![letter_page(1)],
        figures: vec![Figure {
            spans: vec![Span::new(100, 40)],
            bounding_regions: regions,
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn dyn_model(model: &Arc<StubModel>) -> Option<Arc<dyn VisionModel>> {
    let model: Arc<dyn VisionModel> = model.clone();
    Some(model)
}

fn config(mode: DescriptionMode) -> ParseConfig {
    ParseConfig::builder()
        .mode(mode)
        .concurrency(4)
        .max_retries(2)
        .retry_backoff_ms(0)
        .retry_step_ms(0)
        .build()
        .unwrap()
}

fn block(image_names: &[&str], caption: &str, description: &str) -> String {
    let mut rep = PendingReplacement::new(0, 0, 0, caption.into());
    rep.image_names = image_names.iter().map(|s| s.to_string()).collect();
    rep.description = description.into();
    render_block(&rep)
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn single_figure_is_described_and_spliced() {
    let dir = TempDir::new().unwrap();
    let analysis = single_figure(vec![region(1, 1.0)]);
    let model = StubModel::new(|_, _| Ok("  A bar chart.  ".into()));

    let out = reconcile(
        &analysis,
        StubRenderer::new(1),
        dyn_model(&model),
        "report",
        dir.path(),
        &config(DescriptionMode::Direct),
    )
    .await
    .unwrap();

    let expected_block = "<!-- Start of description of image at this position in the source document -->\n\n\
         <!-- Image Path: report_1_0_0.png -->\n\n\
         **Caption:** Fig 1. Revenues by year\n\n\
         **Description:** A bar chart.\n\
         <!-- End of Image Description -->";
    assert_eq!(out.markdown, format!("{}{}{}", prefix(), expected_block, SUFFIX));
    assert_eq!(out.title, "Quarterly Report");

    let image = dir.path().join("report_1_0_0.png");
    assert_eq!(out.images, vec![image.clone()]);
    assert_eq!(std::fs::read(&image).unwrap(), b"p0@72,72");

    let cached = std::fs::read_to_string(dir.path().join("report_1_0_0.analysis.json")).unwrap();
    let cached: serde_json::Value = serde_json::from_str(&cached).unwrap();
    assert_eq!(cached["description"], "A bar chart.");
    assert_eq!(cached["section_name"], "Quarterly Report");

    let direct = model.instructions(RequestStage::Direct);
    assert_eq!(direct.len(), 1);
    assert!(direct[0].contains("Quarterly Report"));

    assert_eq!(out.stats.figures, 1);
    assert_eq!(out.stats.replacements, 1);
    assert_eq!(out.stats.described, 1);
    assert_eq!(out.stats.total_input_tokens, 100);
    assert_eq!(out.stats.total_output_tokens, 10);
}

#[tokio::test]
async fn one_failing_region_of_three_keeps_the_others() {
    let dir = TempDir::new().unwrap();
    let analysis = single_figure(vec![region(1, 0.5), region(1, 3.0), region(1, 5.5)]);
    // The middle region starts at x = 3.0 in → 216 pt.
    let model = StubModel::new(|_, label| {
        if label.contains("@216,") {
            Err(ModelError::new("HTTP 500"))
        } else {
            Ok(format!("described {label}"))
        }
    });
    let progress = Arc::new(CountingCallback::default());
    let mut cfg = config(DescriptionMode::Direct);
    cfg.progress_callback = Some(progress.clone() as Arc<dyn ParseProgressCallback>);

    let out = reconcile(
        &analysis,
        StubRenderer::new(1),
        dyn_model(&model),
        "report",
        dir.path(),
        &cfg,
    )
    .await
    .unwrap();

    let expected = block(
        &["report_1_0_0.png", "report_1_0_1.png", "report_1_0_2.png"],
        "Fig 1. Revenues by year",
        &format!("described p0@36,72\n\n{ANALYSIS_ERROR}\n\ndescribed p0@396,72"),
    );
    assert_eq!(out.markdown, format!("{}{}{}", prefix(), expected, SUFFIX));

    // Two attempts for the failing region, one for each of the others.
    assert_eq!(model.calls(), 4);
    assert_eq!(out.stats.described, 2);
    assert_eq!(out.stats.failed, 1);
    assert_eq!(out.images.len(), 3);
    assert!(!dir.path().join("report_1_0_1.analysis.json").exists());

    assert_eq!(progress.started_with.load(Ordering::SeqCst), 3);
    assert_eq!(progress.complete.load(Ordering::SeqCst), 2);
    assert_eq!(progress.errors.load(Ordering::SeqCst), 1);
    assert_eq!(progress.finished_described.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn second_run_is_served_from_the_cache() {
    let dir = TempDir::new().unwrap();
    let analysis = single_figure(vec![region(1, 1.0), region(1, 4.0)]);
    let cfg = config(DescriptionMode::Direct);

    let first_model = StubModel::new(|_, label| Ok(format!("about {label}")));
    let first = reconcile(
        &analysis,
        StubRenderer::new(1),
        dyn_model(&first_model),
        "report",
        dir.path(),
        &cfg,
    )
    .await
    .unwrap();
    assert_eq!(first_model.calls(), 2);

    let second_model = StubModel::new(|_, _| panic!("cache should answer"));
    let second = reconcile(
        &analysis,
        StubRenderer::new(1),
        dyn_model(&second_model),
        "report",
        dir.path(),
        &cfg,
    )
    .await
    .unwrap();

    assert_eq!(second_model.calls(), 0);
    assert_eq!(second.markdown, first.markdown);
    assert_eq!(second.stats.cached, 2);
    assert!(second
        .regions
        .iter()
        .all(|r| matches!(r.status, RegionStatus::Described { cached: true, .. })));
}

#[tokio::test]
async fn unknown_sub_category_falls_back_to_the_category_template() {
    let dir = TempDir::new().unwrap();
    let analysis = single_figure(vec![region(1, 1.0)]);
    let model = StubModel::new(|req, _| match req.stage {
        RequestStage::Classify => Ok(r#"{"category": "chart", "sub_category": "spiral"}"#.into()),
        RequestStage::Specialize => Ok("A spiral chart.".into()),
        RequestStage::Direct => panic!("iterative mode never sends a direct request"),
    });

    let out = reconcile(
        &analysis,
        StubRenderer::new(1),
        dyn_model(&model),
        "report",
        dir.path(),
        &config(DescriptionMode::Iterative),
    )
    .await
    .unwrap();

    assert!(out.markdown.contains("**Description:** A spiral chart."));
    let classify = model.instructions(RequestStage::Classify);
    assert!(classify[0].starts_with(prompts::CLASSIFIER_PROMPT));
    let specialize = model.instructions(RequestStage::Specialize);
    assert_eq!(specialize.len(), 1);
    assert!(specialize[0].starts_with(&prompts::chart_other()));
}

#[tokio::test]
async fn empty_classification_leaves_no_description() {
    let dir = TempDir::new().unwrap();
    let analysis = single_figure(vec![region(1, 1.0)]);
    let model = StubModel::new(|_, _| Ok("   ".into()));

    let out = reconcile(
        &analysis,
        StubRenderer::new(1),
        dyn_model(&model),
        "report",
        dir.path(),
        &config(DescriptionMode::Iterative),
    )
    .await
    .unwrap();

    assert_eq!(model.calls(), 1);
    assert!(out.markdown.contains(NO_DESCRIPTION));
    assert_eq!(out.regions[0].status, RegionStatus::NoDescription);
    assert!(!dir.path().join("report_1_0_0.analysis.json").exists());
}

#[tokio::test]
async fn output_length_matches_replaced_spans() {
    let dir = TempDir::new().unwrap();
    let text = "Intro.\n\n<figure>A</figure>\n\nMiddle.\n\n<figure>B</figure>\n\nEnd.\n";
    let a = text.find("<figure>A").unwrap();
    let b = text.find("<figure>B").unwrap();
    let len = "<figure>A</figure>".len();
    let analysis = AnalysisResult {
        text: text.into(),
        pages: vec![letter_page(1), letter_page(2)],
        figures: vec![
            Figure {
                spans: vec![Span::new(a, len)],
                bounding_regions: vec![region(1, 1.0)],
                ..Default::default()
            },
            Figure {
                spans: vec![Span::new(b, len)],
                bounding_regions: vec![region(2, 1.0)],
                ..Default::default()
            },
        ],
        ..Default::default()
    };

    let out = reconcile(
        &analysis,
        StubRenderer::new(2),
        None,
        "doc",
        dir.path(),
        &config(DescriptionMode::Direct),
    )
    .await
    .unwrap();

    let blocks = [
        block(&["doc_1_0_0.png"], "A", NO_DESCRIPTION),
        block(&["doc_2_1_0.png"], "B", NO_DESCRIPTION),
    ];
    let inserted: usize = blocks.iter().map(String::len).sum();
    assert_eq!(out.markdown.len(), text.len() - 2 * len + inserted);
    assert_eq!(out.title, "doc");
}

#[tokio::test]
async fn describe_off_extracts_without_model_or_cache() {
    let dir = TempDir::new().unwrap();
    let analysis = single_figure(vec![region(1, 1.0)]);
    let renderer = StubRenderer::new(1);

    let out = reconcile(
        &analysis,
        renderer.clone(),
        None,
        "report",
        dir.path(),
        &config(DescriptionMode::Iterative),
    )
    .await
    .unwrap();

    assert_eq!(renderer.renders.load(Ordering::SeqCst), 1);
    assert!(dir.path().join("report_1_0_0.png").exists());
    assert!(!dir.path().join("report_1_0_0.analysis.json").exists());
    assert!(out.markdown.contains("<!-- Image Path: report_1_0_0.png -->"));
    assert!(out.markdown.contains(NO_DESCRIPTION));
    assert_eq!(out.stats.described, 0);
    assert_eq!(out.stats.total_input_tokens, 0);
}

#[tokio::test]
async fn region_on_missing_page_is_skipped() {
    let dir = TempDir::new().unwrap();
    let mut analysis = single_figure(vec![region(1, 1.0), region(5, 1.0)]);
    analysis.pages.push(letter_page(5));
    let model = StubModel::new(|_, _| Ok("ok".into()));

    let out = reconcile(
        &analysis,
        StubRenderer::new(1),
        dyn_model(&model),
        "report",
        dir.path(),
        &config(DescriptionMode::Direct),
    )
    .await
    .unwrap();

    assert_eq!(model.calls(), 1);
    assert_eq!(out.stats.skipped, 1);
    assert_eq!(out.images, vec![dir.path().join("report_1_0_0.png")]);
    assert!(matches!(
        out.regions[1].status,
        RegionStatus::Skipped {
            error: RegionError::PageNotFound { page: 5, total: 1 }
        }
    ));
    assert!(out.markdown.contains("**Description:** ok\n"));
}

async fn reconcile_with_broken_middle_region(
    breakage: Breakage,
) -> (edgequake_figdesc::ParseOutput, Arc<StubModel>, TempDir) {
    let dir = TempDir::new().unwrap();
    let analysis = single_figure(vec![region(1, 0.5), region(1, 3.0), region(1, 5.5)]);
    let model = StubModel::new(|_, label| Ok(format!("described {label}")));

    // The middle region starts at x = 3.0 in → 216 pt.
    let out = reconcile(
        &analysis,
        BrokenRenderer::new(216.0, breakage),
        dyn_model(&model),
        "report",
        dir.path(),
        &config(DescriptionMode::Direct),
    )
    .await
    .unwrap();
    (out, model, dir)
}

fn assert_middle_region_skipped(out: &edgequake_figdesc::ParseOutput, dir: &Path) {
    let expected = block(
        &["report_1_0_0.png", "report_1_0_2.png"],
        "Fig 1. Revenues by year",
        "described p0@36,72\n\ndescribed p0@396,72",
    );
    assert_eq!(out.markdown, format!("{}{}{}", prefix(), expected, SUFFIX));
    assert!(!out.markdown.contains("report_1_0_1"));
    assert_eq!(
        out.images,
        vec![
            dir.join("report_1_0_0.png"),
            dir.join("report_1_0_2.png")
        ]
    );
    assert!(!dir.join("report_1_0_1.png").exists());
    assert_eq!(out.stats.regions, 3);
    assert_eq!(out.stats.described, 2);
    assert_eq!(out.stats.skipped, 1);
    assert_eq!(out.stats.failed, 0);
}

#[tokio::test]
async fn render_error_skips_only_that_region() {
    let (out, model, dir) = reconcile_with_broken_middle_region(Breakage::Error).await;

    assert_middle_region_skipped(&out, dir.path());
    assert_eq!(model.calls(), 2);
    assert!(matches!(
        out.regions[1].status,
        RegionStatus::Skipped {
            error: RegionError::RenderFailed { page: 1, .. }
        }
    ));
}

#[tokio::test]
async fn render_panic_skips_only_that_region() {
    let (out, model, dir) = reconcile_with_broken_middle_region(Breakage::Panic).await;

    assert_middle_region_skipped(&out, dir.path());
    assert_eq!(model.calls(), 2);
    assert!(matches!(
        out.regions[1].status,
        RegionStatus::Skipped {
            error: RegionError::TaskAborted { page: 1, .. }
        }
    ));
}

#[tokio::test]
async fn concurrency_is_bounded() {
    let dir = TempDir::new().unwrap();
    let regions = (0..6).map(|i| region(1, 0.5 + i as f64)).collect();
    let analysis = single_figure(regions);
    let model = StubModel::with_delay(|_, _| Ok("d".into()), Some(Duration::from_millis(20)));
    let mut cfg = config(DescriptionMode::Direct);
    cfg.concurrency = Some(2);

    let out = reconcile(
        &analysis,
        StubRenderer::new(1),
        dyn_model(&model),
        "report",
        dir.path(),
        &cfg,
    )
    .await
    .unwrap();

    assert_eq!(out.stats.described, 6);
    assert!(model.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn analysis_is_cached_next_to_the_document() {
    let dir = TempDir::new().unwrap();
    let pdf = dir.path().join("My Report.pdf");
    std::fs::write(&pdf, b"%PDF-1.7\n").unwrap();
    let analyzer = StubAnalyzer {
        result: Ok(single_figure(vec![region(1, 1.0)])),
        calls: AtomicUsize::new(0),
    };
    let cfg = config(DescriptionMode::Direct);

    let first = parse_with(&pdf, &analyzer, StubRenderer::new(1), None, &cfg)
        .await
        .unwrap();
    let second = parse_with(&pdf, &analyzer, StubRenderer::new(1), None, &cfg)
        .await
        .unwrap();

    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);
    assert!(dir.path().join("My Report.analysis.json").exists());
    assert!(!first.stats.analysis_cached);
    assert!(second.stats.analysis_cached);
    assert_eq!(first.markdown, second.markdown);
    assert!(dir.path().join("images").join("My_Report_1_0_0.png").exists());
}

#[tokio::test]
async fn analysis_failure_is_fatal() {
    let dir = TempDir::new().unwrap();
    let pdf = dir.path().join("doc.pdf");
    std::fs::write(&pdf, b"%PDF-1.7\n").unwrap();
    let analyzer = StubAnalyzer {
        result: Err("service unavailable".into()),
        calls: AtomicUsize::new(0),
    };

    let err = parse_with(
        &pdf,
        &analyzer,
        StubRenderer::new(1),
        None,
        &config(DescriptionMode::Direct),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, FigDescError::AnalysisFailed { .. }));
    assert!(!dir.path().join("images").exists());
    assert!(!dir.path().join("doc.analysis.json").exists());
}

#[test]
fn callback_is_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<CountingCallback>();
    assert_send_sync::<StubModel>();
}
