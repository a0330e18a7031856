use std::collections::HashMap;
use std::sync::LazyLock;

use anyhow::ensure;
use regex::Regex;

use super::{Rect, UiElement};

/// Dumps beyond this size fail outright rather than being partially
/// parsed.
pub(crate) const MAX_DUMP_BYTES: usize = 4 * 1024 * 1024;

/// Scanning stops silently once this many elements have been collected,
/// keeping huge dumps usable instead of erroring.
pub(crate) const MAX_ELEMENTS: usize = 500;

static NODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<node\b[^>]*>").expect("node pattern must compile"));

static ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([\w:-]+)="([^"]*)""#).expect("attribute pattern must compile"));

/// Parse an accessibility dump into a flat element list in document order.
///
/// The producer is not trusted: attributes are extracted defensively
/// (absent attribute means empty string or false), nothing beyond the
/// node declarations is interpreted, and resource consumption is bounded
/// by `MAX_DUMP_BYTES` and `MAX_ELEMENTS`. Output order is load-bearing
/// for the matcher's first-match semantics, so it is never re-sorted.
pub(crate) fn parse_dump(dump: &str) -> anyhow::Result<Vec<UiElement>> {
    ensure!(
        dump.len() <= MAX_DUMP_BYTES,
        "Accessibility dump is {} bytes, exceeding the {MAX_DUMP_BYTES}-byte limit",
        dump.len()
    );

    let mut elements = Vec::new();
    for node in NODE_RE.find_iter(dump) {
        if elements.len() >= MAX_ELEMENTS {
            break;
        }
        elements.push(parse_node(node.as_str()));
    }

    Ok(elements)
}

fn parse_node(declaration: &str) -> UiElement {
    let mut attrs: HashMap<&str, String> = HashMap::new();
    for capture in ATTR_RE.captures_iter(declaration) {
        let (_, [name, value]) = capture.extract();
        attrs.insert(name, unescape(value));
    }

    let bounds = attrs.get("bounds").and_then(|raw| Rect::parse(raw));
    let (center_x, center_y) = match bounds {
        Some(rect) => {
            let (x, y) = rect.center();
            (Some(x), Some(y))
        }
        None => (None, None),
    };

    UiElement {
        text: attrs.remove("text").unwrap_or_default(),
        resource_id: attrs.remove("resource-id").unwrap_or_default(),
        class_name: attrs.remove("class").unwrap_or_default(),
        accessibility_label: attrs.remove("content-desc").unwrap_or_default(),
        bounds,
        clickable: flag(&attrs, "clickable"),
        enabled: flag(&attrs, "enabled"),
        focused: flag(&attrs, "focused"),
        selected: flag(&attrs, "selected"),
        checked: flag(&attrs, "checked"),
        scrollable: flag(&attrs, "scrollable"),
        center_x,
        center_y,
    }
}

fn flag(attrs: &HashMap<&str, String>, name: &str) -> bool {
    attrs.get(name).is_some_and(|value| value == "true")
}

fn unescape(value: &str) -> String {
    if !value.contains('&') {
        return value.to_owned();
    }

    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
