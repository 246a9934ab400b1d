//! Placeholder text models emit instead of real values.

/// Lowercase substrings that mark a string value as an extraction error.
pub const ERROR_MARKERS: [&str; 6] = ["null", "undefined", "not found", "n/a", "no data", "error"];

/// Case-insensitive substring check against [`ERROR_MARKERS`].
#[must_use]
pub fn contains_error_marker(text: &str) -> bool {
    let lower = text.to_lowercase();
    ERROR_MARKERS.iter().any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_markers_case_insensitive() {
        assert!(contains_error_marker("N/A"));
        assert!(contains_error_marker("Value Not Found on page"));
        assert!(contains_error_marker("NULL"));
    }

    #[test]
    fn test_real_values_pass() {
        assert!(!contains_error_marker("18%"));
        assert!(!contains_error_marker("پرداخت سود ماهانه"));
        assert!(!contains_error_marker("Acme Ventures"));
    }
}
