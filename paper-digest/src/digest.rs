use crate::types::{
    CategoryCount, CategoryGroup, Digest, DigestEntry, FetchWindow, Item, PaperSummary, RunId, Score,
};
use crate::utils::{arxiv::category_label, time::display_day};
use std::collections::HashMap;
use std::fmt::Write;
use tracing::{debug, info};

const DIGEST_TITLE: &str = "Weekly AI Papers Digest";
const UNCATEGORIZED: &str = "uncategorized";
const HISTOGRAM_WIDTH: usize = 20;

/// One ranked paper with everything the compiler renders
#[derive(Debug, Clone, Copy)]
pub struct RankedPaper<'a> {
    pub score: &'a Score,
    pub item: &'a Item,
    pub summary: &'a PaperSummary,
}

/// Buckets ranked papers and renders the Markdown document.
/// Pure: the same input always yields the same digest.
pub struct DigestCompiler {
    breakthrough_count: usize,
}

impl DigestCompiler {
    pub fn new(breakthrough_count: usize) -> Self {
        Self { breakthrough_count }
    }

    pub fn compile(&self, run_id: RunId, window: FetchWindow, ranked: &[RankedPaper<'_>]) -> Digest {
        let mut entries: Vec<DigestEntry> = ranked.iter().map(to_entry).collect();
        entries.sort_by_key(|e| e.rank);

        let trends = category_counts(&entries);

        let split = self.breakthrough_count.min(entries.len());
        let skim = entries.split_off(split);
        let breakthroughs = entries;
        let worth_skimming = group_by_category(skim);

        debug!(
            "Digest buckets: {} breakthroughs, {} skim groups",
            breakthroughs.len(),
            worth_skimming.len()
        );

        let mut digest = Digest {
            run_id,
            window,
            breakthroughs,
            worth_skimming,
            trends,
            markdown: String::new(),
        };
        digest.markdown = render_markdown(&digest);

        info!("Compiled digest with {} papers", digest.len());
        digest
    }
}

/// Subject line shared by every delivery channel
pub fn digest_subject(window: &FetchWindow) -> String {
    format!(
        "{} ({} - {})",
        DIGEST_TITLE,
        display_day(window.start),
        display_day(window.end)
    )
}

fn to_entry(paper: &RankedPaper<'_>) -> DigestEntry {
    DigestEntry {
        rank: paper.score.rank,
        item_id: paper.item.id.clone(),
        title: paper.item.title.clone(),
        link: paper.item.link.clone(),
        category: paper
            .item
            .primary_category()
            .unwrap_or(UNCATEGORIZED)
            .to_string(),
        final_score: paper.score.final_score,
        summary: paper.summary.clone(),
    }
}

/// Groups keep the order of their best-ranked entry; entries stay in rank order
fn group_by_category(entries: Vec<DigestEntry>) -> Vec<CategoryGroup> {
    let mut groups: Vec<CategoryGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for entry in entries {
        match index.get(&entry.category) {
            Some(&pos) => groups[pos].entries.push(entry),
            None => {
                index.insert(entry.category.clone(), groups.len());
                groups.push(CategoryGroup {
                    category: entry.category.clone(),
                    label: category_label(&entry.category).to_string(),
                    entries: vec![entry],
                });
            }
        }
    }

    groups
}

/// Count desc, then label asc
fn category_counts(entries: &[DigestEntry]) -> Vec<CategoryCount> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for entry in entries {
        *counts.entry(entry.category.as_str()).or_insert(0) += 1;
    }

    let mut trends: Vec<CategoryCount> = counts
        .into_iter()
        .map(|(category, count)| CategoryCount {
            category: category.to_string(),
            label: category_label(category).to_string(),
            count,
        })
        .collect();

    trends.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.label.cmp(&b.label))
            .then_with(|| a.category.cmp(&b.category))
    });
    trends
}

fn render_markdown(digest: &Digest) -> String {
    let mut out = String::new();

    // Writing into a String cannot fail
    let _ = writeln!(out, "# {}", DIGEST_TITLE);
    let _ = writeln!(
        out,
        "_{} to {}_\n",
        display_day(digest.window.start),
        display_day(digest.window.end)
    );

    if digest.is_empty() {
        out.push_str("No papers matched this week's window. Nothing to report.\n");
        return out;
    }

    out.push_str("## 🚀 Top Breakthroughs\n\n");
    for entry in &digest.breakthroughs {
        render_breakthrough(&mut out, entry);
    }

    if !digest.worth_skimming.is_empty() {
        out.push_str("## 👓 Worth Skimming\n\n");
        for group in &digest.worth_skimming {
            let _ = writeln!(out, "### {}\n", group.label);
            for entry in &group.entries {
                let _ = writeln!(
                    out,
                    "- **[{}]({})**: {}",
                    entry.title, entry.link, entry.summary.contribution
                );
            }
            out.push('\n');
        }
    }

    out.push_str("## 📈 Trends of the Week\n\n");
    let _ = writeln!(out, "{}\n", trend_sentence(digest));
    out.push_str("```\n");
    out.push_str(&histogram(&digest.trends));
    out.push_str("```\n");

    out
}

fn render_breakthrough(out: &mut String, entry: &DigestEntry) {
    let summary = &entry.summary;
    let _ = writeln!(out, "### {}. [{}]({})", entry.rank, entry.title, entry.link);
    let _ = writeln!(out, "**Takeaway**: {}", summary.takeaway);
    let _ = writeln!(out, "- **Contribution**: {}", summary.contribution);
    let _ = writeln!(out, "- **Why it matters**: {}", summary.significance);
    if let Some(limitations) = &summary.limitations {
        let _ = writeln!(out, "- **Limitations**: {}", limitations);
    }
    let _ = writeln!(
        out,
        "- **Category**: {} (score {:.3})\n",
        category_label(&entry.category),
        entry.final_score
    );
}

fn trend_sentence(digest: &Digest) -> String {
    let total = digest.len();
    let mut trends = digest.trends.iter();

    let lead = match trends.next() {
        Some(lead) => lead,
        None => return String::new(),
    };

    let mut sentence = format!(
        "{} of this week's top {} papers are in {}",
        lead.count, total, lead.label
    );

    let rest: Vec<String> = trends
        .take(2)
        .map(|t| format!("{} ({})", t.label, t.count))
        .collect();
    if !rest.is_empty() {
        let _ = write!(sentence, ", followed by {}", rest.join(" and "));
    }
    sentence.push('.');
    sentence
}

/// Fixed-width text bar chart, one row per category
pub fn histogram(trends: &[CategoryCount]) -> String {
    let max = trends.iter().map(|t| t.count).max().unwrap_or(0);
    let label_width = trends.iter().map(|t| t.label.chars().count()).max().unwrap_or(0);

    let mut out = String::new();
    for trend in trends {
        let bar_len = if max == 0 {
            0
        } else {
            (trend.count * HISTOGRAM_WIDTH + max - 1) / max
        };
        let _ = writeln!(
            out,
            "{:<width$} {} {}",
            trend.label,
            "█".repeat(bar_len),
            trend.count,
            width = label_width
        );
    }
    out
}
