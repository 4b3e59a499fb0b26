/// Text helpers shared by the reader, crawler, and pipeline. Everything here
/// counts characters, not bytes, because content is frequently multibyte.

/// Strip HTML tags and collapse runs of whitespace.
pub fn strip_html_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `max_chars` characters, appending an ellipsis when
/// anything was cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut)
}

/// First `max_chars` characters with no ellipsis, for hard caps on prompt
/// input.
pub fn take_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// True if `text` contains a run of at least `min_run` consecutive latin
/// letters. Used as a cheap "this title is probably not in the target
/// language" signal.
pub fn has_latin_run(text: &str, min_run: usize) -> bool {
    let mut run = 0usize;
    for c in text.chars() {
        if c.is_ascii_alphabetic() {
            run += 1;
            if run >= min_run {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

/// Ratio of hangul syllables among non-space characters, 0.0 when empty.
pub fn hangul_ratio(text: &str) -> f64 {
    let mut hangul = 0usize;
    let mut total = 0usize;
    for c in text.chars() {
        if c.is_whitespace() {
            continue;
        }
        total += 1;
        if ('\u{AC00}'..='\u{D7A3}').contains(&c) {
            hangul += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        hangul as f64 / total as f64
    }
}

/// Recommended section count from source text length: opening plus closing
/// plus between one and seven content sections.
pub fn recommended_section_count(chars: usize) -> usize {
    if chars < 500 {
        3
    } else if chars < 1500 {
        5
    } else if chars < 3000 {
        7
    } else {
        9
    }
}
