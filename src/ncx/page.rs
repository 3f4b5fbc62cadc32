//! Page number types and parsing.

/// DTBook `page` attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub enum PageKind {
    Normal,
    Front,
    Special,
}

impl PageKind {
    /// Parse the `page` attribute; anything unknown counts as normal.
    pub fn from_attribute(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("front") => PageKind::Front,
            Some("special") => PageKind::Special,
            _ => PageKind::Normal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PageKind::Normal => "normal",
            PageKind::Front => "front",
            PageKind::Special => "special",
        }
    }

    /// Numeric value of a page label, if this kind carries one.
    pub fn parse_value(self, label: &str) -> Option<u32> {
        let label = label.trim();
        match self {
            PageKind::Normal => label.parse().ok(),
            PageKind::Front => parse_roman(label),
            PageKind::Special => None,
        }
    }
}

const NUMERALS: [(u32, &str); 13] = [
    (1000, "M"),
    (900, "CM"),
    (500, "D"),
    (400, "CD"),
    (100, "C"),
    (90, "XC"),
    (50, "L"),
    (40, "XL"),
    (10, "X"),
    (9, "IX"),
    (5, "V"),
    (4, "IV"),
    (1, "I"),
];

/// Parse a Roman numeral (case-insensitive). Only canonical forms are accepted.
pub fn parse_roman(s: &str) -> Option<u32> {
    let upper = s.trim().to_ascii_uppercase();
    if upper.is_empty() {
        return None;
    }

    let mut rest = upper.as_str();
    let mut value = 0;
    for (n, symbol) in NUMERALS {
        while let Some(tail) = rest.strip_prefix(symbol) {
            value += n;
            rest = tail;
        }
    }
    if !rest.is_empty() {
        return None;
    }

    // Greedy parsing accepts "IIII" or "VV"; round-trip to reject them.
    (to_roman(value) == upper).then_some(value)
}

/// Format a number as an upper-case Roman numeral.
pub fn to_roman(mut value: u32) -> String {
    let mut out = String::new();
    for (n, symbol) in NUMERALS {
        while value >= n {
            out.push_str(symbol);
            value -= n;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_roman() {
        assert_eq!(parse_roman("iv"), Some(4));
        assert_eq!(parse_roman("IX"), Some(9));
        assert_eq!(parse_roman("xlii"), Some(42));
        assert_eq!(parse_roman("MCMXCIV"), Some(1994));
        assert_eq!(parse_roman("IIII"), None);
        assert_eq!(parse_roman("VX"), None);
        assert_eq!(parse_roman("4"), None);
        assert_eq!(parse_roman(""), None);
    }

    #[test]
    fn test_page_kind() {
        assert_eq!(PageKind::from_attribute(Some("front")), PageKind::Front);
        assert_eq!(PageKind::from_attribute(None), PageKind::Normal);
        assert_eq!(PageKind::Normal.parse_value(" 12 "), Some(12));
        assert_eq!(PageKind::Normal.parse_value("twelve"), None);
        assert_eq!(PageKind::Front.parse_value("iv"), Some(4));
        assert_eq!(PageKind::Special.parse_value("1"), None);
    }

    proptest! {
        #[test]
        fn prop_roman_round_trip(n in 1u32..4000) {
            prop_assert_eq!(parse_roman(&to_roman(n).to_lowercase()), Some(n));
        }
    }
}
