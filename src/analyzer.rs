//! Layout analysis collaborator: document bytes in, [`AnalysisResult`] out.
//!
//! The pipeline only depends on the [`LayoutAnalyzer`] trait. The bundled
//! implementation, [`DocIntelAnalyzer`], drives the Document Intelligence
//! `prebuilt-layout` REST API:
//!
//! ```text
//! POST …/prebuilt-layout:analyze  ──202──▶ Operation-Location
//! GET  Operation-Location          ──200──▶ {status: running}
//! GET  Operation-Location          ──200──▶ {status: succeeded, analyzeResult}
//! ```
//!
//! The service is asked for Unicode code-point offsets; they are converted to
//! byte offsets here so every later stage can slice the Markdown directly.

use crate::analysis::{
    AnalysisPage, AnalysisResult, BoundingRegion, Figure, Paragraph, Span, Table,
    ANALYSIS_SCHEMA_VERSION,
};
use crate::config::{ParseConfig, DEFAULT_DOCINTEL_API_VERSION};
use crate::error::FigDescError;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

/// Turns a source document into a structured [`AnalysisResult`].
#[async_trait]
pub trait LayoutAnalyzer: Send + Sync {
    /// Analyse `document` (the raw bytes of the file at `path`).
    ///
    /// Any failure is fatal for the document.
    async fn analyze(&self, path: &Path, document: &[u8]) -> Result<AnalysisResult, FigDescError>;
}

/// Document Intelligence `prebuilt-layout` client.
pub struct DocIntelAnalyzer {
    client: reqwest::Client,
    endpoint: String,
    key: String,
    api_version: String,
    timeout: Duration,
}

impl std::fmt::Debug for DocIntelAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocIntelAnalyzer")
            .field("endpoint", &self.endpoint)
            .field("api_version", &self.api_version)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl DocIntelAnalyzer {
    pub fn new(
        endpoint: impl Into<String>,
        key: impl Into<String>,
        api_version: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FigDescError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| FigDescError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            key: key.into(),
            api_version: api_version.into(),
            timeout,
        })
    }

    /// Build from config, falling back to environment variables.
    ///
    /// Endpoint: `DOCINTEL_ENDPOINT`, then `AZURE_FORM_RECOGNIZER_ENDPOINT`.
    /// Key: `DOCINTEL_KEY`, then `AZURE_FORM_RECOGNIZER_KEY`.
    /// Version: `DOCINTEL_API_VERSION`, then [`DEFAULT_DOCINTEL_API_VERSION`].
    pub fn from_config(config: &ParseConfig) -> Result<Self, FigDescError> {
        let endpoint = config
            .docintel_endpoint
            .clone()
            .or_else(|| env_nonempty("DOCINTEL_ENDPOINT"))
            .or_else(|| env_nonempty("AZURE_FORM_RECOGNIZER_ENDPOINT"))
            .ok_or_else(|| FigDescError::AnalyzerNotConfigured {
                hint: "endpoint missing. Pass --docintel-endpoint or set DOCINTEL_ENDPOINT."
                    .into(),
            })?;
        let key = config
            .docintel_key
            .clone()
            .or_else(|| env_nonempty("DOCINTEL_KEY"))
            .or_else(|| env_nonempty("AZURE_FORM_RECOGNIZER_KEY"))
            .ok_or_else(|| FigDescError::AnalyzerNotConfigured {
                hint: "key missing. Pass --docintel-key or set DOCINTEL_KEY.".into(),
            })?;
        let api_version = config
            .docintel_api_version
            .clone()
            .or_else(|| env_nonempty("DOCINTEL_API_VERSION"))
            .unwrap_or_else(|| DEFAULT_DOCINTEL_API_VERSION.to_string());

        Self::new(
            endpoint,
            key,
            api_version,
            Duration::from_secs(config.analysis_timeout_secs),
        )
    }

    fn analyze_url(&self) -> String {
        format!(
            "{}/documentintelligence/documentModels/prebuilt-layout:analyze\
             ?api-version={}&outputContentFormat=markdown&stringIndexType=unicodeCodePoint\
             &features=formulas,styleFont,ocrHighResolution",
            self.endpoint, self.api_version
        )
    }

    async fn submit(&self, path: &Path, document: &[u8]) -> Result<String, FigDescError> {
        let failed = |detail: String| FigDescError::AnalysisFailed {
            path: path.to_path_buf(),
            detail,
        };

        let response = self
            .client
            .post(self.analyze_url())
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(document.to_vec())
            .send()
            .await
            .map_err(|e| failed(format!("submit request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(failed(format!("submit returned HTTP {status}: {body}")));
        }

        response
            .headers()
            .get("operation-location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| failed("response has no Operation-Location header".into()))
    }

    async fn poll(&self, path: &Path, operation: &str) -> Result<WireAnalyzeResult, FigDescError> {
        let failed = |detail: String| FigDescError::AnalysisFailed {
            path: path.to_path_buf(),
            detail,
        };
        let deadline = Instant::now() + self.timeout;

        loop {
            let response = self
                .client
                .get(operation)
                .header("Ocp-Apim-Subscription-Key", &self.key)
                .send()
                .await
                .map_err(|e| failed(format!("poll request failed: {e}")))?;

            let status = response.status();
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(1));
            let body = response
                .bytes()
                .await
                .map_err(|e| failed(format!("poll body: {e}")))?;
            if !status.is_success() {
                return Err(failed(format!(
                    "poll returned HTTP {status}: {}",
                    String::from_utf8_lossy(&body)
                )));
            }

            let op: OperationStatus = serde_json::from_slice(&body)
                .map_err(|e| failed(format!("unexpected poll response: {e}")))?;

            match op.status.as_str() {
                "succeeded" => {
                    return op
                        .analyze_result
                        .ok_or_else(|| failed("succeeded without analyzeResult".into()));
                }
                "failed" | "canceled" => {
                    let detail = op
                        .error
                        .map(|e| {
                            format!(
                                "{}: {}",
                                e.code.unwrap_or_default(),
                                e.message.unwrap_or_default()
                            )
                        })
                        .unwrap_or_else(|| format!("operation {}", op.status));
                    return Err(failed(detail));
                }
                other => debug!("Analysis of '{}' is {}", path.display(), other),
            }

            if Instant::now() + retry_after > deadline {
                return Err(FigDescError::AnalysisTimeout {
                    path: path.to_path_buf(),
                    secs: self.timeout.as_secs(),
                });
            }
            sleep(retry_after).await;
        }
    }
}

#[async_trait]
impl LayoutAnalyzer for DocIntelAnalyzer {
    async fn analyze(&self, path: &Path, document: &[u8]) -> Result<AnalysisResult, FigDescError> {
        info!(
            "Submitting '{}' ({} bytes) for layout analysis",
            path.display(),
            document.len()
        );
        let operation = self.submit(path, document).await?;
        let wire = self.poll(path, &operation).await?;
        let result = wire.into_analysis();
        info!(
            "Layout analysis done: {} pages, {} figures, {} paragraphs",
            result.pages.len(),
            result.figures.len(),
            result.paragraphs.len()
        );
        Ok(result)
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

// ── Wire format ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationStatus {
    status: String,
    #[serde(default)]
    analyze_result: Option<WireAnalyzeResult>,
    #[serde(default)]
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAnalyzeResult {
    #[serde(default)]
    content: String,
    #[serde(default)]
    pages: Vec<WirePage>,
    #[serde(default)]
    paragraphs: Vec<WireParagraph>,
    #[serde(default)]
    tables: Vec<WireTable>,
    #[serde(default)]
    figures: Vec<WireFigure>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePage {
    page_number: u32,
    #[serde(default)]
    width: f64,
    #[serde(default)]
    height: f64,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    angle: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRegion {
    page_number: u32,
    #[serde(default)]
    polygon: Vec<f64>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct WireSpan {
    offset: usize,
    length: usize,
}

#[derive(Debug, Deserialize)]
struct WireCaption {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireParagraph {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    bounding_regions: Vec<WireRegion>,
    #[serde(default)]
    spans: Vec<WireSpan>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTable {
    #[serde(default)]
    row_count: usize,
    #[serde(default)]
    column_count: usize,
    #[serde(default)]
    bounding_regions: Vec<WireRegion>,
    #[serde(default)]
    spans: Vec<WireSpan>,
    #[serde(default)]
    caption: Option<WireCaption>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFigure {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    bounding_regions: Vec<WireRegion>,
    #[serde(default)]
    spans: Vec<WireSpan>,
    #[serde(default)]
    caption: Option<WireCaption>,
}

/// Maps code-point offsets to byte offsets of one string.
struct CodePointIndex {
    byte_at: Vec<usize>,
}

impl CodePointIndex {
    fn new(text: &str) -> Self {
        let byte_at = text
            .char_indices()
            .map(|(b, _)| b)
            .chain(std::iter::once(text.len()))
            .collect();
        Self { byte_at }
    }

    fn byte(&self, code_point: usize) -> usize {
        self.byte_at
            .get(code_point)
            .or_else(|| self.byte_at.last())
            .copied()
            .unwrap_or(0)
    }

    fn span(&self, s: WireSpan) -> Span {
        let start = self.byte(s.offset);
        let end = self.byte(s.offset.saturating_add(s.length));
        Span::new(start, end.saturating_sub(start))
    }

    fn spans(&self, spans: &[WireSpan]) -> Vec<Span> {
        spans.iter().map(|s| self.span(*s)).collect()
    }
}

fn regions(wire: Vec<WireRegion>) -> Vec<BoundingRegion> {
    wire.into_iter()
        .map(|r| BoundingRegion {
            page_number: r.page_number,
            polygon: r.polygon,
        })
        .collect()
}

impl WireAnalyzeResult {
    fn into_analysis(self) -> AnalysisResult {
        let index = CodePointIndex::new(&self.content);

        AnalysisResult {
            schema_version: ANALYSIS_SCHEMA_VERSION,
            pages: self
                .pages
                .into_iter()
                .map(|p| AnalysisPage {
                    page_number: p.page_number,
                    width: p.width,
                    height: p.height,
                    unit: p.unit,
                    angle: p.angle,
                })
                .collect(),
            figures: self
                .figures
                .into_iter()
                .map(|f| Figure {
                    id: f.id,
                    spans: index.spans(&f.spans),
                    bounding_regions: regions(f.bounding_regions),
                    caption: f.caption.map(|c| c.content),
                })
                .collect(),
            paragraphs: self
                .paragraphs
                .into_iter()
                .map(|p| Paragraph {
                    role: p.role,
                    content: p.content,
                    spans: index.spans(&p.spans),
                    bounding_regions: regions(p.bounding_regions),
                })
                .collect(),
            tables: self
                .tables
                .into_iter()
                .map(|t| Table {
                    row_count: t.row_count,
                    column_count: t.column_count,
                    spans: index.spans(&t.spans),
                    bounding_regions: regions(t.bounding_regions),
                    caption: t.caption.map(|c| c.content),
                })
                .collect(),
            text: self.content,
        }
    }
}
