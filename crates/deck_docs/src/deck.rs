//! Slide model and deck assembly.

use chrono::NaiveDate;
use deck_ai::{Narrative, SectionRole};
use deck_core::{DeckConfig, EmptySectionPolicy};
use deck_data::{ChartImage, ChartKind, DatasetSummary};
use tracing::debug;

/// Titles listed per overview slide.
pub const OVERVIEW_PAGE_SIZE: usize = 6;

const PLACEHOLDER_TEXT: &str = "No generated content was available for this section.";

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlideLayout {
    /// Large centred title on the accent background.
    Cover,
    /// Title plus bullet list.
    Content,
    /// Title plus the chart picture and its caption.
    Chart,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Slide {
    pub title: String,
    pub bullets: Vec<String>,
    pub image: Option<ChartImage>,
    pub layout: SlideLayout,
}

impl Slide {
    pub fn cover(title: impl Into<String>, lines: Vec<String>) -> Self {
        Self {
            title: title.into(),
            bullets: lines,
            image: None,
            layout: SlideLayout::Cover,
        }
    }

    pub fn content(title: impl Into<String>, bullets: Vec<String>) -> Self {
        Self {
            title: title.into(),
            bullets,
            image: None,
            layout: SlideLayout::Content,
        }
    }

    pub fn chart(title: impl Into<String>, image: ChartImage) -> Self {
        Self {
            title: title.into(),
            bullets: vec![image.caption.clone()],
            image: Some(image),
            layout: SlideLayout::Chart,
        }
    }
}

/// An ordered list of slides ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct Deck {
    pub title: String,
    pub slides: Vec<Slide>,
}

impl Deck {
    pub fn len(&self) -> usize {
        self.slides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slides.is_empty()
    }

    pub fn titles(&self) -> Vec<&str> {
        self.slides.iter().map(|s| s.title.as_str()).collect()
    }

    pub fn chart_slides(&self) -> usize {
        self.slides.iter().filter(|s| s.image.is_some()).count()
    }
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// Knobs for [`DeckAssembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblerOptions {
    pub min_slides: usize,
    pub overview: bool,
    /// Index pages, added only when `min_slides` exceeds twice the column count.
    pub index: bool,
    pub closing: bool,
    pub comparison_insights: bool,
    /// Other columns that get per-column slides, in column order.
    pub max_compared: usize,
    pub empty_section_policy: EmptySectionPolicy,
    pub generated_on: NaiveDate,
}

impl AssemblerOptions {
    pub fn from_config(config: &DeckConfig, min_slides: usize) -> Self {
        Self {
            min_slides,
            overview: config.overview_slide,
            index: config.index_slide,
            closing: config.closing_slide,
            comparison_insights: config.comparison_insights,
            max_compared: config.max_compared_columns,
            empty_section_policy: config.empty_section_policy,
            generated_on: chrono::Local::now().date_naive(),
        }
    }
}

/// Everything the assembler turns into slides.
#[derive(Debug, Clone, Copy)]
pub struct DeckInputs<'a> {
    pub summary: &'a DatasetSummary,
    pub narrative: &'a Narrative,
    pub chart: &'a ChartImage,
    /// Pair charts, matched to columns through `compared_with`.
    pub comparisons: &'a [ChartImage],
}

/// Listing pages and padding that bring the deck up to its minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    padding: usize,
    overview_pages: usize,
    index_pages: usize,
}

pub struct DeckAssembler {
    options: AssemblerOptions,
}

impl DeckAssembler {
    pub fn new(options: AssemblerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &AssemblerOptions {
        &self.options
    }

    /// Lay out the deck: cover, overview, introduction, target chart,
    /// comparison, per-column plot/insight slides, analysis, index, summary,
    /// additional analysis, conclusion, closing. The result always holds at
    /// least `min_slides` slides and the target chart on exactly one slide.
    pub fn assemble(&self, inputs: DeckInputs<'_>) -> Deck {
        let DeckInputs {
            summary,
            narrative,
            chart,
            comparisons,
        } = inputs;
        let column = &summary.target;

        let title = narrative
            .title()
            .filter(|t| !t.is_empty())
            .map(String::from)
            .unwrap_or_else(|| format!("Analysis of {column}"));

        let mut front = Vec::new();
        if let Some(slide) = self.section_slide(narrative, SectionRole::Introduction) {
            front.push(slide);
        }
        front.push(Slide::chart(chart_title(chart.kind, column), chart.clone()));
        if let Some(slide) = self.section_slide(narrative, SectionRole::Comparison) {
            front.push(slide);
        }
        for other in summary.other_columns().into_iter().take(self.options.max_compared) {
            front.extend(self.column_slides(summary, narrative, comparisons, other));
        }
        if let Some(slide) = self.section_slide(narrative, SectionRole::Analysis) {
            front.push(slide);
        }

        let mut back = Vec::new();
        if let Some(slide) = self.section_slide(narrative, SectionRole::Summary) {
            back.push(slide);
        }
        let heading = SectionRole::Bullets.heading();
        let mut extra = 0;
        if let Some(block) = narrative.get(SectionRole::Bullets) {
            extra += 1;
            back.push(Slide::content(format!("{heading} {extra}"), block.lines()));
        }

        let mut tail = Vec::new();
        if let Some(slide) = self.section_slide(narrative, SectionRole::Conclusion) {
            tail.push(slide);
        }
        if self.options.closing {
            tail.push(Slide::cover(
                "Thank You",
                vec![format!("Questions about {column} are welcome.")],
            ));
        }

        let with_index =
            self.options.index && self.options.min_slides > 2 * summary.column_count();
        let layout = self.layout(front.len() + back.len() + tail.len(), with_index);
        for n in 1..=layout.padding {
            back.push(Slide::content(
                format!("{heading} {}", extra + n),
                padding_bullets(summary, n),
            ));
        }
        back.append(&mut tail);

        let listed: Vec<&str> = front
            .iter()
            .chain(&back)
            .map(|s| s.title.as_str())
            .collect();
        let overview = listing_slides("Overview", &listed, layout.overview_pages);
        let index = listing_slides("Index of Slides", &listed, layout.index_pages);

        let mut slides =
            Vec::with_capacity(1 + overview.len() + index.len() + front.len() + back.len());
        slides.push(Slide::cover(
            title.clone(),
            vec![
                format!("Analysis of {column} across {} rows", summary.rows),
                format!("Generated {}", self.options.generated_on.format("%B %-d, %Y")),
            ],
        ));
        slides.extend(overview);
        slides.extend(front);
        slides.extend(index);
        slides.extend(back);

        debug!(
            slides = slides.len(),
            padding = layout.padding,
            overview_pages = layout.overview_pages,
            index_pages = layout.index_pages,
            min_slides = self.options.min_slides,
            "deck assembled"
        );
        Deck { title, slides }
    }

    /// Plot, statistics and generated insights for one other column.
    fn column_slides(
        &self,
        summary: &DatasetSummary,
        narrative: &Narrative,
        comparisons: &[ChartImage],
        other: &str,
    ) -> Vec<Slide> {
        let column = &summary.target;
        let mut slides = Vec::new();
        if let Some(plot) = comparisons
            .iter()
            .find(|c| c.compared_with.as_deref() == Some(other))
        {
            slides.push(Slide::chart(
                format!("Comparison Plot: {column} vs {other}"),
                plot.clone(),
            ));
        }
        if self.options.comparison_insights {
            let bullets = summary.comparison_bullets(other);
            if !bullets.is_empty() {
                slides.push(Slide::content(
                    format!("Comparison Insights: {column} vs {other}"),
                    bullets,
                ));
            }
        }
        let detail = format!("Detailed Insights: {column} vs {other}");
        match narrative.insight(other) {
            Some(insight) => slides.push(Slide::content(detail, insight.lines())),
            None if self.options.empty_section_policy == EmptySectionPolicy::Placeholder
                && narrative.compared.iter().any(|c| c == other) =>
            {
                slides.push(Slide::content(detail, vec![PLACEHOLDER_TEXT.to_string()]));
            }
            None => {}
        }
        slides
    }

    /// Slide for a generated role, or a placeholder when the policy asks for
    /// one and the role was requested but came back empty.
    fn section_slide(&self, narrative: &Narrative, role: SectionRole) -> Option<Slide> {
        match narrative.get(role) {
            Some(block) => Some(Slide::content(role.heading(), block.lines())),
            None if self.options.empty_section_policy == EmptySectionPolicy::Placeholder
                && narrative.requested.contains(&role) =>
            {
                Some(Slide::content(role.heading(), vec![PLACEHOLDER_TEXT.to_string()]))
            }
            None => None,
        }
    }

    /// Padding and listing pages needed so that
    /// `1 + overview + index + listed + padding >= min_slides`. Padding grows
    /// the listings, so iterate until the count settles.
    fn layout(&self, listed: usize, with_index: bool) -> Layout {
        let mut padding = 0;
        loop {
            let pages = (listed + padding).div_ceil(OVERVIEW_PAGE_SIZE);
            let layout = Layout {
                padding,
                overview_pages: if self.options.overview { pages } else { 0 },
                index_pages: if with_index { pages } else { 0 },
            };
            let total = 1 + layout.overview_pages + layout.index_pages + listed + padding;
            if total >= self.options.min_slides {
                return layout;
            }
            padding += self.options.min_slides - total;
        }
    }
}

fn chart_title(kind: ChartKind, column: &str) -> String {
    let label = match kind {
        ChartKind::Scatter => "Scatter Plot",
        ChartKind::Hexbin => "Hexbin Density",
        ChartKind::Box => "Box Plot",
        ChartKind::Bar => "Bar Chart",
    };
    format!("{label} of {column}")
}

/// Numbered title listing, `OVERVIEW_PAGE_SIZE` entries per page.
fn listing_slides(label: &str, titles: &[&str], pages: usize) -> Vec<Slide> {
    if pages == 0 {
        return Vec::new();
    }
    titles
        .chunks(OVERVIEW_PAGE_SIZE)
        .enumerate()
        .map(|(page, chunk)| {
            let title = if pages > 1 {
                format!("{label} ({}/{pages})", page + 1)
            } else {
                label.to_string()
            };
            let bullets = chunk
                .iter()
                .enumerate()
                .map(|(i, t)| format!("{}. {t}", page * OVERVIEW_PAGE_SIZE + i + 1))
                .collect();
            Slide::content(title, bullets)
        })
        .collect()
}

/// Per-column statistics for the `n`th padding slide, cycling through the
/// columns a page at a time.
fn padding_bullets(summary: &DatasetSummary, n: usize) -> Vec<String> {
    let pages = summary.columns.len().div_ceil(OVERVIEW_PAGE_SIZE).max(1);
    summary
        .columns
        .iter()
        .skip(((n - 1) % pages) * OVERVIEW_PAGE_SIZE)
        .take(OVERVIEW_PAGE_SIZE)
        .map(|c| c.describe())
        .collect()
}
