//! User-visible chat texts.

pub const THINKING: &str = "⏳ **Bob is thinking...**";

pub const BUSY: &str =
    "❌ **Bob is currently busy or having trouble thinking. Please try again in a bit.**";

pub const OFFLINE: &str = "⚠️ **Bob's brain link is offline.** The workflow isn't active yet. Please try again shortly.";

pub const UNAUTHORIZED: &str =
    "⚠️ **Bob's brain link is unauthorized.** The workflow API key may be invalid.";

pub const BLANK: &str = "⚠️ **Bob had a blank thought. Please try again.**";

/// Error-styled relay of an engine-reported error.
pub fn engine_error(error: &str) -> String {
    format!("❌ **Error from AI:** {}", error)
}

/// Cut `text` to at most `max` characters, marking the cut with `...`.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    if max < 3 {
        return text.chars().take(max).collect();
    }
    let keep = max - 3;
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}
