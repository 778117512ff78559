//! In-page script snippets evaluated through `Runtime.evaluate`.

/// Escape a string for embedding inside a single-quoted JS literal.
pub fn escape_js(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out
}

/// Collect the first client rectangle of every element matching `selector`.
/// Elements that produce no rectangle are dropped, not serialized as null.
pub fn element_rects(selector: &str) -> String {
    format!(
        "var elements = Array.from(document.querySelectorAll('{}')); {{ JSON.stringify(elements.map((e) => e.getClientRects()?.['0']).filter((e) => e !== undefined)); }}",
        escape_js(selector)
    )
}

/// Screen-chrome offset: the difference between screen size and viewport size
/// accounts for the window decorations and browser UI above the page.
pub fn screen_offset() -> &'static str {
    "JSON.stringify({offsetY: window.screen.height - window.innerHeight, offsetX: window.screen.width - window.innerWidth})"
}

/// Vertical measurements used by the scroll-into-view feedback loop.
pub fn element_position(selector: &str) -> String {
    format!(
        "(()=>{{
  const {{ y: scrollPos, height: elHeight }} = document.querySelector('{}').getBoundingClientRect();
  const viewportHeight = document.documentElement.clientHeight;
  return JSON.stringify({{ viewportHeight, scrollPos, elHeight }});
}})()",
        escape_js(selector)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_quotes_and_backslashes() {
        assert_eq!(escape_js(r"a'b\c"), r"a\'b\\c");
    }

    #[test]
    fn element_rects_embeds_escaped_selector() {
        let script = element_rects("a[title='x']");
        assert!(script.contains(r"querySelectorAll('a[title=\'x\']')"));
    }
}
