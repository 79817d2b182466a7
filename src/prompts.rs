//! Instruction texts for the vision model.
//!
//! Every prompt lives here so wording changes never touch the retry,
//! parsing or selection logic. The category/sub-category lookup that picks
//! one of the specialised templates lives in [`crate::pipeline::classify`].

/// First call of iterative mode: decide what kind of image this is.
///
/// The reply must be a bare JSON object, parsed by
/// [`crate::pipeline::classify::parse_classification`].
pub const CLASSIFIER_PROMPT: &str = r#"You are classifying an image cut out of a document.

Decide which category the image belongs to and, where one applies, its sub-category.

Categories and sub-categories:
- table: standard, matrix, pivot, cross-tab, nested
- chart: bar, line, pie, scatter, histogram, box, time-series, heat-map, network, venn, sankey, tree, radar, bubble, waterfall, gantt
- formula
- text
- picture: diagram, photo, drawing
- radiograph: x-ray, mri, ct
- other

Use "other" as sub_category when none of the listed ones fits.

Reply with ONLY a JSON object and nothing else, for example:
{"category": "chart", "sub_category": "bar"}"#;

/// Single-call instruction of direct mode.
///
/// Placeholders `{section_name}`, `{prior_context}` and `{post_context}` are
/// filled by [`direct_prompt`].
pub const DIRECT_PROMPT: &str = r#"You are describing an image cut out of a document so that a reader who cannot see it loses nothing.

The image appears in the section "{section_name}".
Text before the image: "{prior_context}"
Text after the image: "{post_context}"
Use the surrounding text only to disambiguate what you see.

Check the following cases in order and apply the first one that matches:

1. TABLE: reproduce it as a Markdown table with every row, column and cell value. Keep header rows. If cells carry meaning through colour, icons or bold text, state that meaning in the cell.
2. GRAPH OR CHART: name the chart type, restate the title, the legend and both axes with their units, then give every data series with its values as precisely as they can be read.
3. FORMULA: transcribe it as LaTeX between $$ delimiters.
4. TEXT ONLY: transcribe the text verbatim, keeping line breaks and emphasis.
5. ANYTHING ELSE: describe what the image shows, its parts and how they relate, and any text inside it.

Output only the description. No preamble, no closing remarks, no code fences."#;

/// Appended to every iterative-mode instruction.
///
/// Same placeholders as [`DIRECT_PROMPT`].
pub const CONTEXT_APPENDIX: &str = r#"

Context from the document (use it only to disambiguate the image):
- Section: "{section_name}"
- Text before the image: "{prior_context}"
- Text after the image: "{post_context}""#;

const OUTPUT_RULES: &str = "\n\nOutput only the requested content. No preamble, no closing remarks, no code fences around the whole answer.";

pub const DEFAULT_SECTION_NAME: &str = "Unknown";
pub const DEFAULT_PRIOR_CONTEXT: &str = "No prior context";
pub const DEFAULT_POST_CONTEXT: &str = "No post context";

// ── Tables ───────────────────────────────────────────────────────────────

pub const TABLE_STANDARD: &str = "The image is a table. Reproduce it as a Markdown table. Keep every header row, every row and every column in their original order and copy each cell value exactly, including units and footnote marks. Merge nothing and invent nothing; leave a cell empty when it is empty in the image.";

pub const TABLE_MATRIX: &str = "The image is a matrix table where cells carry meaning through colour, icons, symbols or font weight (for example ticks, crosses, traffic lights, bold maxima). Reproduce it as a Markdown table and write that meaning out in every cell, such as \"yes (green tick)\" or \"**12.4** (bold, best)\". Before the table, add one line explaining the visual legend if the image has one.";

pub const TABLE_PIVOT: &str = "The image is a pivot table with grouped rows or columns and subtotals. Reproduce it as a Markdown table, repeating group labels on every row they apply to so that each row stands alone. Keep subtotal and grand total rows and label them as such.";

pub const TABLE_CROSS_TAB: &str = "The image is a cross-tabulation with hierarchical row and column headers. A flat Markdown table would lose the header structure, so reproduce it as a LaTeX tabular environment using \\multicolumn and \\multirow for spanning headers. Copy every cell value exactly.";

pub const TABLE_NESTED: &str = "The image is a table with nested tables or cells that span several rows or columns. Reproduce it as a LaTeX tabular environment, using \\multicolumn, \\multirow and inner tabular environments for nested parts. Copy every cell value exactly.";

// ── Charts ───────────────────────────────────────────────────────────────

/// Shared opening of every chart template.
const CHART_BASE: &str = "The image is a chart. Start with the chart title, then the legend, then each axis with its label, range and units.";

pub const CHART_BAR: &str = "The image is a bar chart. Give the title, the legend and both axes with labels, ranges and units. State whether bars are grouped or stacked. Then list every category with the value of every bar, as a Markdown table when there is more than one series.";

pub const CHART_LINE: &str = "The image is a line chart. Give the title, the legend and both axes with labels, ranges and units. For every line, list its values at each labelled x position and describe its trend, peaks and crossings with other lines.";

pub const CHART_PIE: &str = "The image is a pie or donut chart. Give the title, then every slice with its label, its percentage and its absolute value when shown, largest first.";

pub const CHART_SCATTER: &str = "The image is a scatter plot. Give the title, the legend and both axes with labels, ranges and units. Describe every point group, its approximate centre and spread, any fitted line with its equation or R², and notable outliers with coordinates.";

pub const CHART_HISTOGRAM: &str = "The image is a histogram. Give the title and both axes. List every bin range with its count or frequency, then describe the shape of the distribution (skew, modes, tails).";

pub const CHART_BOX: &str = "The image is a box plot. Give the title and axes, then for every box its group label, minimum, first quartile, median, third quartile, maximum and any outliers.";

pub const CHART_TIME_SERIES: &str = "The image is a time-series chart. Give the title, the legend, the time axis with its range and granularity, and the value axis with units. For every series list the values at each labelled date and describe trends, seasonality and notable events.";

pub const CHART_HEAT_MAP: &str = "The image is a heat map. Give the title, the row and column labels and the colour scale with its range. Reproduce the cell values as a Markdown table, estimating from the colour scale where numbers are not printed and saying so.";

pub const CHART_NETWORK: &str = "The image is a network graph. List every node with its label, then every edge as `source -> target` with its label or weight, then describe clusters and central nodes.";

pub const CHART_VENN: &str = "The image is a Venn diagram. Name every set, then every region (including intersections) with its label, count or members.";

pub const CHART_SANKEY: &str = "The image is a Sankey diagram. List every node, then every flow as `source -> target: value`, then summarise the largest flows.";

pub const CHART_TREE: &str = "The image is a tree or hierarchy chart. Reproduce the hierarchy as a nested Markdown list with every node label and any values attached to the nodes.";

pub const CHART_RADAR: &str = "The image is a radar chart. List every axis with its scale, then every series with its value on every axis, as a Markdown table.";

pub const CHART_BUBBLE: &str = "The image is a bubble chart. Give the title and both axes, state what bubble size encodes, then list every bubble with its label, x value, y value and size.";

pub const CHART_WATERFALL: &str = "The image is a waterfall chart. Give the title and value axis, then list every step in order with its label, its increase or decrease, and the running total, ending with the final total.";

pub const CHART_GANTT: &str = "The image is a Gantt chart. Give the time axis, then list every task with its start, end, duration, owner and dependencies where shown, in the order drawn. Mention milestones separately.";

// ── Formula, text, pictures ──────────────────────────────────────────────

pub const FORMULA: &str = "The image contains one or more mathematical formulas. Transcribe each as LaTeX between $$ delimiters, one per line, keeping equation numbers as \\tag{}. Add nothing else.";

pub const TEXT: &str = "The image contains only text. Transcribe it verbatim, keeping line breaks, lists and emphasis as Markdown. Do not summarise or correct it.";

pub const PICTURE_DIAGRAM: &str = "The image is a diagram. Name its type (flowchart, architecture, process, schematic). List every element with its label and every connection between elements with its direction and label, then explain in a few sentences what the diagram conveys.";

pub const PICTURE_PHOTO: &str = "The image is a photograph. Describe the subject, the setting, the people or objects present and their arrangement, and transcribe any visible text. Do not guess identities of people.";

pub const PICTURE_DRAWING: &str = "The image is a drawing or illustration. Describe what it depicts, its style, its labelled parts and any text it contains.";

pub const PICTURE_OTHER: &str = "The image is a picture. Describe what it shows, its notable parts and any text it contains.";

// ── Radiographs ──────────────────────────────────────────────────────────

/// Shared closing of every radiograph template.
const RADIOGRAPH_FINDINGS: &str = "Report, as separate labelled lines: the imaging modality, the acquisition date if printed, the anatomical region and view, then every visible abnormality with its location and apparent severity. Transcribe any annotations or measurements. If nothing abnormal is visible, say so.";

pub const RADIOGRAPH_XRAY: &str = "The image is an X-ray.";
pub const RADIOGRAPH_MRI: &str = "The image is an MRI scan. Name the sequence (T1, T2, FLAIR, …) if it can be identified.";
pub const RADIOGRAPH_CT: &str = "The image is a CT scan. Name the window (bone, lung, soft tissue) and whether contrast was used if it can be identified.";
pub const RADIOGRAPH_OTHER: &str = "The image is a medical scan.";

// ── Fallback ─────────────────────────────────────────────────────────────

pub const GENERIC: &str = "Describe the image so that a reader who cannot see it loses nothing: what it shows, its parts and how they relate, and any text or numbers it contains.";

/// A chart template with the shared opening, for chart kinds without their own.
pub fn chart_other() -> String {
    format!("{CHART_BASE} Then describe every data series with its values as precisely as they can be read.")
}

/// A radiograph template: the modality-specific opening plus the findings rules.
pub fn radiograph(opening: &str) -> String {
    format!("{opening} {RADIOGRAPH_FINDINGS}")
}

/// Complete a specialised template with the context appendix and output rules.
pub fn specialized_prompt(
    template: &str,
    section_name: Option<&str>,
    prior_context: Option<&str>,
    post_context: Option<&str>,
) -> String {
    let mut out = String::with_capacity(template.len() + 512);
    out.push_str(template);
    out.push_str(&fill_context(
        CONTEXT_APPENDIX,
        section_name,
        prior_context,
        post_context,
    ));
    out.push_str(OUTPUT_RULES);
    out
}

/// The classifier instruction with the context appendix.
pub fn classifier_prompt(
    section_name: Option<&str>,
    prior_context: Option<&str>,
    post_context: Option<&str>,
) -> String {
    let mut out = String::from(CLASSIFIER_PROMPT);
    out.push_str(&fill_context(
        CONTEXT_APPENDIX,
        section_name,
        prior_context,
        post_context,
    ));
    out
}

/// The direct-mode instruction with context filled in.
pub fn direct_prompt(
    section_name: Option<&str>,
    prior_context: Option<&str>,
    post_context: Option<&str>,
) -> String {
    fill_context(DIRECT_PROMPT, section_name, prior_context, post_context)
}

fn fill_context(
    template: &str,
    section_name: Option<&str>,
    prior_context: Option<&str>,
    post_context: Option<&str>,
) -> String {
    let pick = |v: Option<&str>, default: &'static str| -> String {
        match v.map(str::trim) {
            Some(s) if !s.is_empty() => s.replace('"', "'"),
            _ => default.to_string(),
        }
    };
    template
        .replace("{section_name}", &pick(section_name, DEFAULT_SECTION_NAME))
        .replace("{prior_context}", &pick(prior_context, DEFAULT_PRIOR_CONTEXT))
        .replace("{post_context}", &pick(post_context, DEFAULT_POST_CONTEXT))
}
