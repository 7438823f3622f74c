//! Text-selector normalization (`§6`).
//!
//! Actions write selectors as either plain CSS strings, or a text-filtered shape — `base` plus a
//! text match — spelled differently depending on which driver is plugged in: Driver A accepts
//! `:has-text("…")`/`:text-is("…")` suffixes baked into the selector string itself, Driver B wants
//! a separate `{ kind: "text-selector", base, text, exact }` record. Normalization resolves either
//! shape against the live DOM once, down to a single concrete selector string a `data-qa`
//! attribute or an indexed `<tag>:nth-of-type(N)` can refer back to without re-querying for text.

use serde_json::Value as Json;

use crate::driver::DriverAdapter;
use crate::error::CoreError;

/// One selector argument as given to an action, before normalization.
#[derive(Clone, Debug, PartialEq)]
pub enum SelectorInput {
    /// A plain CSS selector, already concrete.
    Css(String),
    /// A text-filtered query: find the first element matching `base` whose text content
    /// contains (or, if `exact`, equals) `text`.
    TextSelector { base: String, text: String, exact: bool },
    /// Anything else (arrays, numbers, unrecognised records). Never resolved; always produces
    /// `None` with a warning from [`normalize`].
    Other(Json),
}

impl SelectorInput {
    /// Parse a raw selector argument, recognising both accepted text-selector shapes. Returns
    /// `Err(BadSelector)` only when `raw` is neither a string nor a JSON object/array/etc. — it
    /// always succeeds for those, deferring the "unrecognised shape" case to [`normalize`].
    pub fn parse(raw: &Json) -> Result<Self, CoreError> {
        match raw {
            Json::String(s) => Ok(parse_driver_a_string(s)),
            Json::Object(_) => Ok(parse_driver_b_record(raw).unwrap_or_else(|| SelectorInput::Other(raw.clone()))),
            Json::Null => Err(CoreError::BadSelector("selector was null".to_string())),
            other => Ok(SelectorInput::Other(other.clone())),
        }
    }
}

fn parse_driver_a_string(s: &str) -> SelectorInput {
    for (suffix, exact) in [(":text-is(", true), (":has-text(", false)] {
        if let Some(start) = s.rfind(suffix) {
            let after = &s[start + suffix.len()..];
            if let Some(end) = after.rfind(')') {
                let quoted = after[..end].trim();
                if let Some(text) = unquote(quoted) {
                    let base = &s[..start];
                    return SelectorInput::TextSelector {
                        base: base.to_string(),
                        text,
                        exact,
                    };
                }
            }
        }
    }
    SelectorInput::Css(s.to_string())
}

fn unquote(s: &str) -> Option<String> {
    let s = s.trim();
    for quote in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return Some(s[1..s.len() - 1].to_string());
        }
    }
    None
}

fn parse_driver_b_record(raw: &Json) -> Option<SelectorInput> {
    let obj = raw.as_object()?;
    if obj.get("kind")?.as_str()? != "text-selector" {
        return None;
    }
    let base = obj.get("base")?.as_str()?.to_string();
    let text = obj.get("text")?.as_str()?.to_string();
    let exact = obj.get("exact").and_then(Json::as_bool).unwrap_or(false);
    Some(SelectorInput::TextSelector { base, text, exact })
}

/// Resolve `input` against the live DOM, down to a single concrete selector string. Returns
/// `Ok(None)` (after logging a warning) for shapes that can't be resolved — they must not be
/// returned unchanged.
pub async fn normalize(adapter: &DriverAdapter, input: &SelectorInput) -> Result<Option<String>, CoreError> {
    match input {
        SelectorInput::Css(s) => Ok(Some(s.clone())),
        SelectorInput::TextSelector { base, text, exact } => {
            normalize_text_selector(adapter, base, text, *exact).await
        }
        SelectorInput::Other(value) => {
            tracing::warn!(shape = %value, "selector input did not match a recognised shape; dropping");
            Ok(None)
        }
    }
}

async fn normalize_text_selector(
    adapter: &DriverAdapter,
    base: &str,
    text: &str,
    exact: bool,
) -> Result<Option<String>, CoreError> {
    let candidates = adapter.query_all(base).await?;
    let mut same_tag_index = 0usize;
    let mut last_tag: Option<String> = None;

    for candidate in &candidates {
        let tag = adapter.tag_name(candidate).await?;
        same_tag_index = match &last_tag {
            Some(prev) if *prev == tag => same_tag_index + 1,
            _ => 0,
        };
        last_tag = Some(tag.clone());

        let content = adapter.text_content(candidate).await?.unwrap_or_default();
        let content = content.trim();
        let matched = if exact { content == text } else { content.contains(text) };
        if !matched {
            continue;
        }

        if let Some(data_qa) = adapter.get_attribute(candidate, "data-qa").await? {
            return Ok(Some(format!("[data-qa=\"{data_qa}\"]")));
        }
        return Ok(Some(format!("{base} {tag}:nth-of-type({})", same_tag_index + 1)));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_has_text_driver_a_string() {
        let input = SelectorInput::parse(&json!("button.cta:has-text(\"Apply\")")).unwrap();
        assert_eq!(
            input,
            SelectorInput::TextSelector {
                base: "button.cta".to_string(),
                text: "Apply".to_string(),
                exact: false,
            }
        );
    }

    #[test]
    fn parses_text_is_as_exact() {
        let input = SelectorInput::parse(&json!("a:text-is('Sign in')")).unwrap();
        assert_eq!(
            input,
            SelectorInput::TextSelector {
                base: "a".to_string(),
                text: "Sign in".to_string(),
                exact: true,
            }
        );
    }

    #[test]
    fn plain_css_string_passes_through() {
        let input = SelectorInput::parse(&json!("#submit")).unwrap();
        assert_eq!(input, SelectorInput::Css("#submit".to_string()));
    }

    #[test]
    fn parses_driver_b_record() {
        let input = SelectorInput::parse(&json!({
            "kind": "text-selector",
            "base": "li.row",
            "text": "Vacancy",
            "exact": false,
        }))
        .unwrap();
        assert_eq!(
            input,
            SelectorInput::TextSelector {
                base: "li.row".to_string(),
                text: "Vacancy".to_string(),
                exact: false,
            }
        );
    }

    #[test]
    fn unrecognised_shapes_become_other() {
        let input = SelectorInput::parse(&json!([1, 2, 3])).unwrap();
        assert_eq!(input, SelectorInput::Other(json!([1, 2, 3])));
    }

    #[test]
    fn null_selector_is_bad_selector() {
        assert!(matches!(SelectorInput::parse(&json!(null)), Err(CoreError::BadSelector(_))));
    }
}
