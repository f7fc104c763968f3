//! Field extraction from label text
//!
//! Pulls a product name, a strength or pack-size variant, and an expiry
//! date out of noisy OCR output with independent regex rules.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Tokens that mark a line as the likely product name
pub const BRAND_HINTS: [&str; 6] = [
    "campbell",
    "kleenex",
    "acetaminophen",
    "ibuprofen",
    "tylenol",
    "advil",
];

/// Only the first few lines are considered for the name
const NAME_LINE_WINDOW: usize = 4;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static STRENGTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d+(?:\.\d+)?)\s?(MG|MCG|G|ML|M L|L|%)\b").expect("valid regex")
});
static PACK_SIZE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d+)\s?(PACK|TABS?|CAPS?)\b").expect("valid regex"));
static EXPIRY_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(EXP|BEST BEFORE|BEST BY|USE BY|BB)\s*[:\-]?\s*").expect("valid regex"));
static DATE_DMY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{1,2})[/\-.](\d{1,2})[/\-.](\d{2,4})\b").expect("valid regex")
});
// Month/year takes no `.` separator so decimals like `12.50` never match
static DATE_MY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(0?[1-9]|1[0-2])[/\-](\d{4}|\d{2})\b").expect("valid regex"));
static DATE_MONTH_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(JAN|FEB|MAR|APR|MAY|JUN|JUL|AUG|SEP|OCT|NOV|DEC)[A-Z]*\s?\d{2,4}\b")
        .expect("valid regex")
});
static LINE_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[;\n]| {2,}").expect("valid regex"));
static NON_WORDY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\d\W]+$").expect("valid regex"));
static STANDALONE_M_L: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bM L\b").expect("valid regex"));

/// Fields parsed from label text; each is independently optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractedFields {
    pub name: Option<String>,
    pub variant: Option<String>,
    pub expiry_text: Option<String>,
}

impl ExtractedFields {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.variant.is_none() && self.expiry_text.is_none()
    }
}

/// Upper-case, drop trademark symbols, collapse whitespace
pub fn normalize(text: &str) -> String {
    let upper = text.to_uppercase().replace(['®', '™'], "");
    WHITESPACE.replace_all(&upper, " ").trim().to_string()
}

/// Title-case: a letter is upper-cased when it follows a non-letter and
/// lower-cased otherwise
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_is_letter = false;
    for ch in text.chars() {
        if ch.is_alphabetic() {
            if previous_is_letter {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            previous_is_letter = true;
        } else {
            out.push(ch);
            previous_is_letter = false;
        }
    }
    out
}

/// Run every rule over `text`
pub fn extract_fields(text: &str) -> ExtractedFields {
    let normalized = normalize(text);
    ExtractedFields {
        name: extract_name(&normalized),
        variant: extract_variant(&normalized),
        expiry_text: extract_expiry(&normalized),
    }
}

/// Strength first, pack size as the fallback
fn extract_variant(text: &str) -> Option<String> {
    if let Some(m) = STRENGTH.find(text) {
        let titled = title_case(m.as_str());
        return Some(STANDALONE_M_L.replace_all(&titled, "mL").into_owned());
    }
    PACK_SIZE.find(text).map(|m| title_case(m.as_str()))
}

/// A date only counts as an expiry when an expiry tag is also present
fn extract_expiry(text: &str) -> Option<String> {
    if !EXPIRY_TAG.is_match(text) {
        return None;
    }
    [&*DATE_DMY, &*DATE_MY, &*DATE_MONTH_NAME]
        .iter()
        .find_map(|re| re.find(text))
        .map(|m| m.as_str().to_string())
}

fn extract_name(text: &str) -> Option<String> {
    let lines: Vec<&str> = LINE_SPLIT
        .split(text)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(NAME_LINE_WINDOW)
        .collect();

    let wordy = |line: &str| !NON_WORDY.is_match(line);
    let has_brand = |line: &str| {
        BRAND_HINTS
            .iter()
            .any(|hint| line.contains(hint.to_uppercase().as_str()))
    };

    lines
        .iter()
        .copied()
        .find(|line| has_brand(line) && wordy(line))
        .or_else(|| lines.iter().copied().find(|line| wordy(line)))
        .map(title_case)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tylenol_label() {
        let fields = extract_fields("TYLENOL EXTRA STRENGTH 500 MG EXP 08/2026");

        let name = fields.name.unwrap();
        assert!(name.starts_with("Tylenol Extra Strength"), "{name}");
        assert!(fields.variant.unwrap().contains("500 Mg"));
        assert_eq!(fields.expiry_text.as_deref(), Some("08/2026"));
    }

    #[test]
    fn test_expiry_tag_without_date() {
        let fields = extract_fields("ADVIL 200 MG EXP SOON");
        assert!(fields.expiry_text.is_none());
    }

    #[test]
    fn test_decimal_strength_is_not_expiry() {
        let fields = extract_fields("TYLENOL 12.50 MG EXP 08/2026");
        assert_eq!(fields.expiry_text.as_deref(), Some("08/2026"));

        let fields = extract_fields("CAMPBELL SOUP 10.75 OZ BEST BY SEE LID");
        assert!(fields.expiry_text.is_none());
    }

    #[test]
    fn test_month_year_needs_valid_month() {
        assert!(extract_fields("EXP 13/2026").expiry_text.is_none());
        assert_eq!(
            extract_fields("EXP 3-27").expiry_text.as_deref(),
            Some("3-27")
        );
    }

    #[test]
    fn test_date_without_tag_is_not_expiry() {
        let fields = extract_fields("LOT 12/05/2025 ADVIL");
        assert!(fields.expiry_text.is_none());
    }

    #[test]
    fn test_expiry_date_formats() {
        assert_eq!(
            extract_fields("BEST BEFORE: 12/05/2025").expiry_text.as_deref(),
            Some("12/05/2025")
        );
        assert_eq!(
            extract_fields("use by 3.7.24").expiry_text.as_deref(),
            Some("3.7.24")
        );
        assert_eq!(
            extract_fields("BB AUGUST 2026").expiry_text.as_deref(),
            Some("AUGUST 2026")
        );
        // full date wins over month/year even when later in the text
        assert_eq!(
            extract_fields("EXP 08/2026 LOT 01-02-2027").expiry_text.as_deref(),
            Some("01-02-2027")
        );
    }

    #[test]
    fn test_variant_falls_back_to_pack_size() {
        let fields = extract_fields("KLEENEX TISSUES 3 PACK");
        assert_eq!(fields.variant.as_deref(), Some("3 Pack"));

        let fields = extract_fields("IBUPROFEN 24 TABS");
        assert_eq!(fields.variant.as_deref(), Some("24 Tabs"));
    }

    #[test]
    fn test_variant_units() {
        assert_eq!(
            extract_fields("syrup 5 m l dose").variant.as_deref(),
            Some("5 mL")
        );
        assert_eq!(extract_fields("gel 2.5%").variant, None);
        assert_eq!(
            extract_fields("CAMPBELL SOUP 10.75 ML").variant.as_deref(),
            Some("10.75 Ml")
        );
    }

    #[test]
    fn test_name_prefers_brand_line() {
        let fields = extract_fields("EXTRA STRENGTH; ADVIL LIQUI-GELS;200 MG");
        assert_eq!(fields.name.as_deref(), Some("Advil Liqui-Gels"));
    }

    #[test]
    fn test_name_falls_back_to_first_wordy_line() {
        let fields = extract_fields("1234 5678;ORGANIC HONEY;NET WT 12 OZ");
        assert_eq!(fields.name.as_deref(), Some("Organic Honey"));
    }

    #[test]
    fn test_whitespace_runs_do_not_split_lines() {
        // normalization collapses whitespace before lines are split
        let fields = extract_fields("ORGANIC HONEY\n\nNET WT 12 OZ");
        assert_eq!(fields.name.as_deref(), Some("Organic Honey Net Wt 12 Oz"));
    }

    #[test]
    fn test_name_window_is_four_lines() {
        let fields = extract_fields("1;2;3;4;TYLENOL");
        assert!(fields.name.is_none());
    }

    #[test]
    fn test_empty_text() {
        assert!(extract_fields("").is_empty());
        assert!(extract_fields("   \n ").is_empty());
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("Advil®  Liqui-Gels™\n200mg"), "ADVIL LIQUI-GELS 200MG");
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("TYLENOL EXTRA STRENGTH"), "Tylenol Extra Strength");
        assert_eq!(title_case("500 MG"), "500 Mg");
        assert_eq!(title_case("LIQUI-GELS"), "Liqui-Gels");
        assert_eq!(title_case("3RD"), "3Rd");
    }
}
