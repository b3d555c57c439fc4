//! Field eligibility
//!
//! A field is tracked when its name contains one of the configured lead
//! substrings and none of the excluded ones. Matching is case-insensitive.
//! Hidden and password inputs are never tracked, whatever their name.

use crate::client_config::FormsConfig;

/// Track/exclude lists, lowercased once
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldFilter {
    track: Vec<String>,
    exclude: Vec<String>,
}

impl FieldFilter {
    pub fn new(track: &[String], exclude: &[String]) -> Self {
        let normalize = |list: &[String]| -> Vec<String> {
            list.iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        };
        Self {
            track: normalize(track),
            exclude: normalize(exclude),
        }
    }

    pub fn from_config(forms: &FormsConfig) -> Self {
        Self::new(&forms.track_fields, &forms.exclude_fields)
    }

    /// Should interactions with this field be captured?
    pub fn should_track_field(&self, name: &str, field_type: &str) -> bool {
        if name.is_empty() {
            return false;
        }
        if field_type.eq_ignore_ascii_case("hidden") || field_type.eq_ignore_ascii_case("password") {
            return false;
        }
        if self.is_excluded(name) {
            return false;
        }
        let lower = name.to_lowercase();
        self.track.iter().any(|tracked| lower.contains(tracked))
    }

    /// Does the name match the exclude list (redacted on submission)?
    pub fn is_excluded(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.exclude.iter().any(|excluded| lower.contains(excluded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> FieldFilter {
        FieldFilter::from_config(&FormsConfig::default())
    }

    #[test]
    fn test_should_track_truth_table() {
        let f = filter();
        let cases = [
            ("", "text", false),
            ("email", "email", true),
            ("Work_Email", "text", true),
            ("email", "hidden", false),
            ("email", "password", false),
            ("password", "text", false),
            ("user_password_confirm", "text", false),
            ("company_name", "text", true),
            ("billing_ssn", "text", false),
            ("message", "textarea", false),
            ("PHONE", "tel", true),
            ("organization", "select-one", true),
        ];

        for (name, field_type, expected) in cases {
            assert_eq!(
                f.should_track_field(name, field_type),
                expected,
                "should_track_field({:?}, {:?})",
                name,
                field_type
            );
        }
    }

    #[test]
    fn test_exclude_wins_over_track() {
        let f = FieldFilter::new(&["email".to_string()], &["email_secret".to_string()]);
        assert!(f.should_track_field("email", "text"));
        assert!(!f.should_track_field("EMAIL_SECRET", "text"));
    }

    #[test]
    fn test_empty_patterns_ignored() {
        let f = FieldFilter::new(&["".to_string()], &["  ".to_string()]);
        assert!(!f.should_track_field("email", "text"));
        assert!(!f.is_excluded("email"));
    }

    #[test]
    fn test_is_excluded() {
        let f = filter();
        assert!(f.is_excluded("credit_card_number"));
        assert!(f.is_excluded("CVV"));
        assert!(!f.is_excluded("email"));
    }
}
