use anyhow::ensure;
use serde::Deserialize;

use super::UiElement;

/// Ceiling on individual search strings.
pub(crate) const MAX_CRITERION_LEN: usize = 256;

/// Search criteria for element lookup. Any non-empty subset of the fields
/// may be supplied.
///
/// Matching is disjunctive: an element matches as soon as any one supplied
/// criterion matches, checked in a fixed priority order (text, resource
/// id, accessibility label, class name). A caller supplying both `text`
/// and `resourceId` gets a match if either matches. This is a behavioral
/// contract relied on by callers, not an implementation detail.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ElementCriteria {
    #[serde(default)]
    pub(crate) text: Option<String>,
    #[serde(default)]
    pub(crate) resource_id: Option<String>,
    #[serde(default)]
    pub(crate) accessibility_label: Option<String>,
    #[serde(default)]
    pub(crate) class_name: Option<String>,
}

impl ElementCriteria {
    pub(crate) fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.resource_id.is_none()
            && self.accessibility_label.is_none()
            && self.class_name.is_none()
    }

    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            !self.is_empty(),
            "At least one search criterion is required: text, resourceId, accessibilityLabel, or className"
        );

        for value in [
            &self.text,
            &self.resource_id,
            &self.accessibility_label,
            &self.class_name,
        ]
        .into_iter()
        .flatten()
        {
            ensure!(
                value.len() <= MAX_CRITERION_LEN,
                "Search criterion exceeds the {MAX_CRITERION_LEN}-character limit"
            );
        }

        Ok(())
    }

    fn matches(&self, element: &UiElement) -> bool {
        // Text and accessibility label match case-insensitively; resource
        // id and class name are case-sensitive. First criterion hit wins.
        if let Some(text) = &self.text
            && contains_ignore_case(&element.text, text)
        {
            return true;
        }
        if let Some(resource_id) = &self.resource_id
            && element.resource_id.contains(resource_id.as_str())
        {
            return true;
        }
        if let Some(label) = &self.accessibility_label
            && contains_ignore_case(&element.accessibility_label, label)
        {
            return true;
        }
        if let Some(class_name) = &self.class_name
            && element.class_name.contains(class_name.as_str())
        {
            return true;
        }

        false
    }
}

/// First matching element in document order, or `None`.
pub(crate) fn find_first<'a>(
    elements: &'a [UiElement],
    criteria: &ElementCriteria,
) -> Option<&'a UiElement> {
    elements.iter().find(|element| criteria.matches(element))
}

/// Every matching element, preserving document order.
pub(crate) fn find_all<'a>(
    elements: &'a [UiElement],
    criteria: &ElementCriteria,
) -> Vec<&'a UiElement> {
    elements
        .iter()
        .filter(|element| criteria.matches(element))
        .collect()
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(text: &str, resource_id: &str, label: &str, class_name: &str) -> UiElement {
        UiElement {
            text: text.to_owned(),
            resource_id: resource_id.to_owned(),
            accessibility_label: label.to_owned(),
            class_name: class_name.to_owned(),
            ..UiElement::default()
        }
    }

    fn text_criteria(text: &str) -> ElementCriteria {
        ElementCriteria {
            text: Some(text.to_owned()),
            ..ElementCriteria::default()
        }
    }

    #[test]
    fn first_match_follows_document_order_case_insensitively() {
        let elements = vec![
            element("cancel", "", "", ""),
            element("submit", "", "", ""),
        ];

        let found = find_first(&elements, &text_criteria("Submit")).unwrap();
        assert_eq!(found.text, "submit");
    }

    #[test]
    fn earlier_element_wins_when_both_match() {
        let elements = vec![
            element("Submit order", "", "", ""),
            element("Submit again", "", "", ""),
        ];

        assert_eq!(
            find_first(&elements, &text_criteria("submit")).unwrap().text,
            "Submit order"
        );
    }

    #[test]
    fn supplied_criteria_are_disjunctive() {
        // text does not match, but resourceId does: still a match.
        let elements = vec![element("Log in", "com.example:id/submit", "", "")];
        let criteria = ElementCriteria {
            text: Some("nonexistent".to_owned()),
            resource_id: Some("submit".to_owned()),
            ..ElementCriteria::default()
        };

        assert!(find_first(&elements, &criteria).is_some());
    }

    #[test]
    fn resource_id_and_class_match_case_sensitively() {
        let elements = vec![element("", "com.example:id/Submit", "", "android.widget.Button")];

        let wrong_case = ElementCriteria {
            resource_id: Some("submit".to_owned()),
            ..ElementCriteria::default()
        };
        assert!(find_first(&elements, &wrong_case).is_none());

        let wrong_class_case = ElementCriteria {
            class_name: Some("button".to_owned()),
            ..ElementCriteria::default()
        };
        assert!(find_first(&elements, &wrong_class_case).is_none());

        let exact = ElementCriteria {
            class_name: Some("Button".to_owned()),
            ..ElementCriteria::default()
        };
        assert!(find_first(&elements, &exact).is_some());
    }

    #[test]
    fn accessibility_label_matches_case_insensitively() {
        let elements = vec![element("", "", "Close Dialog", "")];
        let criteria = ElementCriteria {
            accessibility_label: Some("close".to_owned()),
            ..ElementCriteria::default()
        };

        assert!(find_first(&elements, &criteria).is_some());
    }

    #[test]
    fn no_match_and_empty_list_return_none() {
        assert!(find_first(&[], &text_criteria("anything")).is_none());

        let elements = vec![element("cancel", "", "", "")];
        assert!(find_first(&elements, &text_criteria("submit")).is_none());
    }

    #[test]
    fn find_all_preserves_document_order() {
        let elements = vec![
            element("Item one", "", "", ""),
            element("other", "", "", ""),
            element("Item two", "", "", ""),
        ];

        let found = find_all(&elements, &text_criteria("item"));
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].text, "Item one");
        assert_eq!(found[1].text, "Item two");
    }

    #[test]
    fn empty_criteria_fail_validation() {
        assert!(ElementCriteria::default().validate().is_err());
        assert!(text_criteria("ok").validate().is_ok());
    }

    #[test]
    fn overlong_criteria_fail_validation() {
        let criteria = text_criteria(&"x".repeat(MAX_CRITERION_LEN + 1));
        let err = criteria.validate().unwrap_err();
        assert!(err.to_string().contains("character limit"));
    }
}
