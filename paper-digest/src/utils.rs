/// Text processing utilities
pub mod text {
    /// Truncate to at most `max_chars` characters, never splitting a code point
    pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
        match text.char_indices().nth(max_chars) {
            Some((byte_idx, _)) => &text[..byte_idx],
            None => text,
        }
    }

    /// Collapse runs of whitespace (including the line breaks arXiv puts in titles)
    pub fn normalize_whitespace(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// First sentence of a paragraph, or the whole text when it has no terminator
    pub fn first_sentence(text: &str) -> String {
        let text = normalize_whitespace(text);
        let end = text
            .char_indices()
            .find(|&(i, c)| {
                matches!(c, '.' | '!' | '?')
                    && text[i + c.len_utf8()..]
                        .chars()
                        .next()
                        .map_or(true, |next| next.is_whitespace())
            })
            .map(|(i, c)| i + c.len_utf8());

        match end {
            Some(end) => text[..end].to_string(),
            None => text,
        }
    }

    /// Same as `truncate_chars` but appends an ellipsis when something was cut
    pub fn ellipsize(text: &str, max_chars: usize) -> String {
        let cut = truncate_chars(text, max_chars);
        if cut.len() < text.len() {
            format!("{}...", cut.trim_end())
        } else {
            text.to_string()
        }
    }
}

/// arXiv identifiers and links
pub mod arxiv {
    /// `http://arxiv.org/abs/2401.12345v2` -> `2401.12345`, `.../abs/cs/0001001v1` -> `cs/0001001`
    pub fn extract_id(entry_id: &str) -> Option<String> {
        let (_, tail) = entry_id.rsplit_once("/abs/")?;
        let id = strip_version(tail.trim().trim_end_matches('/'));
        if id.is_empty() {
            None
        } else {
            Some(id.to_string())
        }
    }

    /// Remove a trailing `vN` revision marker
    pub fn strip_version(id: &str) -> &str {
        if let Some(pos) = id.rfind('v') {
            let digits = &id[pos + 1..];
            if pos > 0 && !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                return &id[..pos];
            }
        }
        id
    }

    pub fn abs_url(id: &str) -> String {
        format!("https://arxiv.org/abs/{}", id)
    }

    /// Derive the PDF link from an abstract page link
    pub fn pdf_from_abs(abs_url: &str) -> Option<String> {
        if abs_url.contains("/abs/") {
            Some(format!("{}.pdf", abs_url.replacen("/abs/", "/pdf/", 1)))
        } else {
            None
        }
    }

    /// Display name for an arXiv category code; unknown codes render as the code itself
    pub fn category_label(code: &str) -> &str {
        match code {
            "cs.AI" => "Artificial Intelligence",
            "cs.LG" => "Machine Learning",
            "cs.CL" => "Computation and Language",
            "cs.CV" => "Computer Vision",
            "cs.RO" => "Robotics",
            "cs.NE" => "Neural and Evolutionary Computing",
            "cs.IR" => "Information Retrieval",
            "cs.CR" => "Cryptography and Security",
            "cs.HC" => "Human-Computer Interaction",
            "cs.MA" => "Multiagent Systems",
            "cs.SE" => "Software Engineering",
            "stat.ML" => "Statistical Machine Learning",
            "eess.AS" => "Audio and Speech Processing",
            "eess.IV" => "Image and Video Processing",
            other => other,
        }
    }
}

/// Time utilities
pub mod time {
    use chrono::{DateTime, Utc};

    /// Day stamp used in arXiv `submittedDate` ranges
    pub fn arxiv_day(at: DateTime<Utc>) -> String {
        at.format("%Y%m%d").to_string()
    }

    /// Short human form, e.g. `Jan 15, 2024`
    pub fn display_day(at: DateTime<Utc>) -> String {
        at.format("%b %d, %Y").to_string()
    }
}
