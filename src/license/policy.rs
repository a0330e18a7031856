use serde::{Deserialize, Serialize};

/// Entitlement level controlling which tools and limits are available.
///
/// Ordered by entitlement: everything the free tier may do, the advanced
/// tier may do as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Tier {
    Free,
    Advanced,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Free => write!(f, "free"),
            Tier::Advanced => write!(f, "advanced"),
        }
    }
}

impl Tier {
    /// Parse a tier label, treating anything unrecognized as `free`.
    pub(crate) fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "advanced" => Tier::Advanced,
            _ => Tier::Free,
        }
    }

    /// Map the human-readable product name from a validation response to a
    /// tier. Unmatched product names resolve to `free`.
    pub(crate) fn from_product_name(product_name: &str) -> Self {
        let name = product_name.to_lowercase();

        if name.contains("advanced") || name.contains("pro") {
            Tier::Advanced
        } else {
            Tier::Free
        }
    }
}

/// Tools available on the free tier (and therefore on every tier).
pub(crate) const FREE_TOOLS: &[&str] = &[
    "mobile_list_devices",
    "mobile_get_device_info",
    "mobile_get_screen_size",
    "mobile_list_apps",
    "mobile_list_elements_on_screen",
    "mobile_find_element",
    "mobile_get_logs",
];

/// Tools requiring an advanced license.
pub(crate) const ADVANCED_ONLY_TOOLS: &[&str] = &[
    "mobile_wait_for_element",
    "mobile_assert_element",
    "mobile_take_screenshot",
    "mobile_get_app_info",
];

/// The tier a tool belongs to, or `None` for tool names outside the
/// catalogue.
pub(crate) fn tool_tier(tool: &str) -> Option<Tier> {
    if FREE_TOOLS.contains(&tool) {
        Some(Tier::Free)
    } else if ADVANCED_ONLY_TOOLS.contains(&tool) {
        Some(Tier::Advanced)
    } else {
        None
    }
}

/// Whether `tier` may invoke `tool`. Unknown tool names are always denied.
pub(crate) fn can_access(tool: &str, tier: Tier) -> bool {
    match tool_tier(tool) {
        Some(Tier::Free) => true,
        Some(Tier::Advanced) => tier == Tier::Advanced,
        None => false,
    }
}

/// Numeric resource limits applied when shaping tool results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TierLimits {
    pub(crate) max_log_lines: usize,
    pub(crate) max_devices: usize,
}

impl TierLimits {
    pub(crate) fn for_tier(tier: Tier) -> Self {
        match tier {
            Tier::Free => Self {
                max_log_lines: 100,
                max_devices: 1,
            },
            Tier::Advanced => Self {
                max_log_lines: 1000,
                max_devices: 5,
            },
        }
    }

    /// Limits for a tier label of unknown provenance. Unrecognized labels
    /// get the free tier's limits, never the advanced ones.
    pub(crate) fn for_label(label: &str) -> Self {
        Self::for_tier(Tier::from_label(label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entitlement_is_monotonic() {
        // Anything the free tier can do, the advanced tier can do too.
        let unknown = ["mobile_tap", "", "bogus_tool"];
        for tool in FREE_TOOLS
            .iter()
            .chain(ADVANCED_ONLY_TOOLS)
            .chain(unknown.iter())
        {
            if can_access(tool, Tier::Free) {
                assert!(can_access(tool, Tier::Advanced), "{tool} lost on upgrade");
            }
        }
    }

    #[test]
    fn free_tools_are_available_to_both_tiers() {
        for tool in FREE_TOOLS {
            assert!(can_access(tool, Tier::Free));
            assert!(can_access(tool, Tier::Advanced));
        }
    }

    #[test]
    fn advanced_tools_require_an_advanced_tier() {
        for tool in ADVANCED_ONLY_TOOLS {
            assert!(!can_access(tool, Tier::Free));
            assert!(can_access(tool, Tier::Advanced));
        }
    }

    #[test]
    fn unknown_tools_are_denied_for_every_tier() {
        assert!(!can_access("mobile_tap", Tier::Free));
        assert!(!can_access("mobile_tap", Tier::Advanced));
        assert!(!can_access("", Tier::Advanced));
    }

    #[test]
    fn tool_sets_do_not_overlap() {
        for tool in FREE_TOOLS {
            assert!(!ADVANCED_ONLY_TOOLS.contains(tool));
        }
    }

    #[test]
    fn bogus_tier_label_gets_free_limits() {
        assert_eq!(
            TierLimits::for_label("bogus-tier"),
            TierLimits::for_tier(Tier::Free)
        );
        assert_eq!(
            TierLimits::for_label("advanced"),
            TierLimits::for_tier(Tier::Advanced)
        );
    }

    #[test]
    fn product_name_maps_to_tier_by_substring() {
        assert_eq!(
            Tier::from_product_name("MobiScope Advanced"),
            Tier::Advanced
        );
        assert_eq!(Tier::from_product_name("mobiscope pro"), Tier::Advanced);
        assert_eq!(Tier::from_product_name("MobiScope Starter"), Tier::Free);
        assert_eq!(Tier::from_product_name(""), Tier::Free);
    }
}
