pub(crate) mod matcher;
pub(crate) mod parser;
pub(crate) mod wait;

use serde::Serialize;

/// Rectangle from an accessibility dump bounds literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) struct Rect {
    pub(crate) left: i64,
    pub(crate) top: i64,
    pub(crate) right: i64,
    pub(crate) bottom: i64,
}

impl Rect {
    /// Parse a `[x1,y1][x2,y2]` literal. Anything else is `None`.
    pub(crate) fn parse(raw: &str) -> Option<Self> {
        let rest = raw.strip_prefix('[')?;
        let (first, rest) = rest.split_once("][")?;
        let second = rest.strip_suffix(']')?;
        let (left, top) = first.split_once(',')?;
        let (right, bottom) = second.split_once(',')?;

        Some(Self {
            left: left.trim().parse().ok()?,
            top: top.trim().parse().ok()?,
            right: right.trim().parse().ok()?,
            bottom: bottom.trim().parse().ok()?,
        })
    }

    /// Integer floor of the rectangle's midpoint.
    pub(crate) fn center(&self) -> (i64, i64) {
        (
            (self.left + self.right).div_euclid(2),
            (self.top + self.bottom).div_euclid(2),
        )
    }
}

/// One parsed node from an accessibility dump. Constructed fresh per
/// dump-parse call and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UiElement {
    pub(crate) text: String,
    pub(crate) resource_id: String,
    pub(crate) class_name: String,
    pub(crate) accessibility_label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) bounds: Option<Rect>,
    pub(crate) clickable: bool,
    pub(crate) enabled: bool,
    pub(crate) focused: bool,
    pub(crate) selected: bool,
    pub(crate) checked: bool,
    pub(crate) scrollable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) center_x: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) center_y: Option<i64>,
}
