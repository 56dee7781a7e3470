//! Page-side queries for extension UI.
//!
//! The extension draws hints inside a shadow root attached to a host
//! element, out of reach of plain `querySelectorAll`. These scripts walk
//! into it from the main world.

use keynav_cdp::{Page, Result};

/// Host element the extension attaches its hint shadow root to.
pub const HINTS_HOST: &str = ".surfingkeys_hints_host";

fn hint_labels_script() -> String {
    format!(
        "(() => {{
            const labels = [];
            for (const host of document.querySelectorAll('{HINTS_HOST}')) {{
                const root = host.shadowRoot;
                if (!root) continue;
                for (const el of root.querySelectorAll('section > div')) {{
                    const text = el.textContent.trim();
                    if (text && getComputedStyle(el).display !== 'none') labels.push(text);
                }}
            }}
            return labels;
        }})()"
    )
}

/// Labels of the hints currently on screen, in document order.
///
/// # Errors
///
/// Returns an error if evaluation fails.
pub async fn hint_labels(page: &Page) -> Result<Vec<String>> {
    page.evaluate(&hint_labels_script()).await
}

/// `Selection.type`: `None`, `Caret` or `Range`.
///
/// # Errors
///
/// Returns an error if evaluation fails.
pub async fn selection_type(page: &Page) -> Result<String> {
    page.evaluate("window.getSelection().type").await
}

/// Number of elements matching `selector`.
///
/// # Errors
///
/// Returns an error if evaluation fails.
pub async fn count(page: &Page, selector: &str) -> Result<usize> {
    let selector = serde_json::to_string(selector)?;
    page.evaluate(&format!("document.querySelectorAll({selector}).length"))
        .await
}

/// Maximum vertical scroll offset of the page.
///
/// # Errors
///
/// Returns an error if evaluation fails.
pub async fn max_scroll_y(page: &Page) -> Result<f64> {
    page.evaluate(
        "Math.max(0, document.scrollingElement.scrollHeight - window.innerHeight)",
    )
    .await
}

/// Viewport height.
///
/// # Errors
///
/// Returns an error if evaluation fails.
pub async fn viewport_height(page: &Page) -> Result<f64> {
    page.evaluate("window.innerHeight").await
}

/// Places a collapsed caret at `offset` inside the first text node of the
/// element matching `selector`.
///
/// # Errors
///
/// Returns an error if the element or its text node is missing.
pub async fn place_caret(page: &Page, selector: &str, offset: usize) -> Result<()> {
    let selector = serde_json::to_string(selector)?;
    page.client()
        .evaluate(&format!(
            "(() => {{
                const el = document.querySelector({selector});
                if (!el || !el.firstChild) throw new Error('no text at ' + {selector});
                const range = document.createRange();
                range.setStart(el.firstChild, {offset});
                range.collapse(true);
                const sel = window.getSelection();
                sel.removeAllRanges();
                sel.addRange(range);
            }})()"
        ))
        .await?;
    Ok(())
}

/// Clears any selection and blurs the focused element.
///
/// # Errors
///
/// Returns an error if evaluation fails.
pub async fn clear_selection(page: &Page) -> Result<()> {
    page.client()
        .evaluate(
            "(() => {
                window.getSelection().removeAllRanges();
                if (document.activeElement && document.activeElement !== document.body) {
                    document.activeElement.blur();
                }
            })()",
        )
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hint_script_targets_host_shadow_root() {
        let script = hint_labels_script();
        assert!(script.contains("document.querySelectorAll('.surfingkeys_hints_host')"));
        assert!(script.contains("host.shadowRoot"));
        assert!(script.trim_end().ends_with("})()"));
    }
}
