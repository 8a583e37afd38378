//! Privacy level detection
//!
//! Classifies memory content into one of four privacy tiers from content
//! patterns and tag hints:
//!
//! - `LOCAL_ONLY`: API keys, credentials, PII, secrets
//! - `CONFIDENTIAL`: financial, health, legal, personal-identifier data
//! - `INTERNAL`: conversations, notes, personal context (the default)
//! - `PUBLIC`: documentation, tutorials, general knowledge
//!
//! Rules apply in priority order, most restrictive first. Credit-card
//! digits are validated with the Luhn algorithm before the card rule may
//! fire, which removes most 16-digit false positives. The classifier is
//! deterministic and side-effect free; all regexes compile once at
//! construction.

use crate::types::PrivacyLevel;
use regex::Regex;
use std::collections::HashSet;

/// Content patterns that force `LOCAL_ONLY`. The credit-card shape is
/// handled separately so it can be Luhn-gated.
const LOCAL_ONLY_PATTERNS: &[&str] = &[
    // API keys and tokens
    r#"(?i)api[_-]?key\s*[:=]\s*["']?[a-zA-Z0-9_-]{20,}"#,
    r"(?i)bearer\s+[a-zA-Z0-9_-]{20,}",
    r#"(?i)token\s*[:=]\s*["']?[a-zA-Z0-9_-]{20,}"#,
    r"sk-[a-zA-Z0-9]{20,}",
    r"AKIA[0-9A-Z]{16}",
    r"AIza[0-9A-Za-z\-_]{35}",
    // Passwords and credentials
    r#"(?i)password\s*[:=]\s*["']?[^\s"']{8,}"#,
    r#"(?i)passwd\s*[:=]\s*["']?[^\s"']{8,}"#,
    r#"(?i)secret\s*[:=]\s*["']?[^\s"']{8,}"#,
    r"(?i)credentials?\s*[:=]",
    r"(?i)auth_token\s*[:=]",
    // Private keys
    r"-----BEGIN (RSA|DSA|EC|OPENSSH|PGP) PRIVATE KEY-----",
    r"BEGIN PRIVATE KEY",
    // Database connection strings
    r"(?i)postgres://\S+",
    r"(?i)mysql://\S+",
    r"(?i)mongodb://\S+",
    // JWT triples
    r"eyJ[a-zA-Z0-9_-]+\.eyJ[a-zA-Z0-9_-]+\.[a-zA-Z0-9_-]+",
    // US Social Security Numbers
    r"\b\d{3}-\d{2}-\d{4}\b",
    r"\b\d{9}\b",
    // Phone numbers
    r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b",
    r"\(\d{3}\)\s*\d{3}[-.]?\d{4}",
    // Email addresses paired with credentials
    r#"(?i)email\s*[:=]\s*["']?[^\s@]+@[^\s@]+\.[^\s@"']+"#,
];

/// Content patterns that suggest `CONFIDENTIAL`.
const CONFIDENTIAL_PATTERNS: &[&str] = &[
    // Financial
    r"(?i)\b(bank\s+account|routing\s+number|account\s+number)\b",
    r"(?i)\b(investment|portfolio|401k|ira|stocks|bonds)\b",
    r"\$\d{1,3}(,\d{3})*(\.\d{2})?",
    // Health
    r"(?i)\b(medical|health|diagnosis|prescription|doctor|patient)\b",
    r"(?i)\b(blood\s+pressure|cholesterol|glucose|medication)\b",
    // Personal identifiers
    r"(?i)\b(passport|driver's?\s+license|license\s+number)\b",
    r"(?i)\bdate\s+of\s+birth\b",
    // Legal
    r"(?i)\b(attorney|lawyer|legal|lawsuit|settlement)\b",
];

/// Documentation markers; two or more suggest `PUBLIC`.
const DOC_MARKER_PATTERNS: &[&str] = &[
    r"(?m)^#\s+",
    r"```",
    r"## \w+",
    r"### \w+",
    r"\bREADME\b",
    r"\bTutorial\b",
    r"\bGuide\b",
];

const LOCAL_ONLY_TAGS: &[&str] = &[
    "password", "credential", "api-key", "secret", "private-key", "ssh-key", "token", "auth",
    "api_key", "secrets", "keys",
];

const CONFIDENTIAL_TAGS: &[&str] = &[
    "financial", "investment", "bank", "medical", "health", "personal", "confidential",
    "sensitive", "private", "legal", "attorney", "patient", "diagnosis",
];

const PUBLIC_TAGS: &[&str] = &[
    "documentation", "tutorial", "guide", "public", "docs", "readme", "how-to", "example",
    "demo", "reference",
];

/// Validate a run of digits with the Luhn algorithm.
fn luhn_valid(digits: &str) -> bool {
    let mut checksum = 0u32;
    for (i, c) in digits.chars().rev().enumerate() {
        let Some(d) = c.to_digit(10) else { return false };
        if i % 2 == 1 {
            let doubled = d * 2;
            checksum += doubled / 10 + doubled % 10;
        } else {
            checksum += d;
        }
    }
    checksum % 10 == 0
}

/// Detects the privacy level of memory content from patterns and tags.
pub struct PrivacyDetector {
    local_only: Vec<Regex>,
    confidential: Vec<Regex>,
    doc_markers: Vec<Regex>,
    card_shape: Regex,
}

impl Default for PrivacyDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PrivacyDetector {
    /// Compile the full pattern inventory.
    ///
    /// # Panics
    ///
    /// Never in practice: every pattern is a module constant validated by
    /// the test suite.
    #[must_use]
    pub fn new() -> Self {
        let compile = |patterns: &[&str]| {
            patterns
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect::<Vec<_>>()
        };
        #[allow(clippy::unwrap_used)]
        let card_shape = Regex::new(r"\b(\d{4})[- ]?(\d{4})[- ]?(\d{4})[- ]?(\d{4})\b").unwrap();
        Self {
            local_only: compile(LOCAL_ONLY_PATTERNS),
            confidential: compile(CONFIDENTIAL_PATTERNS),
            doc_markers: compile(DOC_MARKER_PATTERNS),
            card_shape,
        }
    }

    /// Classify `content` with optional tag hints.
    ///
    /// Returns `INTERNAL` for empty content and whenever no rule fires.
    #[must_use]
    pub fn detect(&self, content: &str, tags: &[String]) -> PrivacyLevel {
        if content.is_empty() {
            return PrivacyLevel::Internal;
        }

        let tags_lower: HashSet<String> = tags.iter().map(|t| t.to_lowercase()).collect();

        if self.is_local_only(content, &tags_lower) {
            return PrivacyLevel::LocalOnly;
        }
        if self.is_confidential(content, &tags_lower) {
            return PrivacyLevel::Confidential;
        }
        if self.is_public(content, &tags_lower) {
            return PrivacyLevel::Public;
        }
        PrivacyLevel::Internal
    }

    fn is_local_only(&self, content: &str, tags_lower: &HashSet<String>) -> bool {
        // Tags first: cheapest check.
        if LOCAL_ONLY_TAGS.iter().any(|t| tags_lower.contains(*t)) {
            return true;
        }

        // Card numbers are Luhn-gated so arbitrary 16-digit runs don't fire.
        for caps in self.card_shape.captures_iter(content) {
            let digits: String = caps
                .iter()
                .skip(1)
                .flatten()
                .map(|m| m.as_str())
                .collect();
            if digits.len() == 16 && luhn_valid(&digits) {
                return true;
            }
        }

        self.local_only.iter().any(|re| re.is_match(content))
    }

    fn is_confidential(&self, content: &str, tags_lower: &HashSet<String>) -> bool {
        if CONFIDENTIAL_TAGS.iter().any(|t| tags_lower.contains(*t)) {
            return true;
        }
        self.confidential.iter().any(|re| re.is_match(content))
    }

    fn is_public(&self, content: &str, tags_lower: &HashSet<String>) -> bool {
        if PUBLIC_TAGS.iter().any(|t| tags_lower.contains(*t)) {
            return true;
        }
        let marker_count = self
            .doc_markers
            .iter()
            .filter(|re| re.is_match(content))
            .count();
        marker_count >= 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn all_patterns_compile() {
        let detector = PrivacyDetector::new();
        assert_eq!(detector.local_only.len(), LOCAL_ONLY_PATTERNS.len());
        assert_eq!(detector.confidential.len(), CONFIDENTIAL_PATTERNS.len());
        assert_eq!(detector.doc_markers.len(), DOC_MARKER_PATTERNS.len());
    }

    #[test]
    fn api_keys_are_local_only() {
        let detector = PrivacyDetector::new();
        let content = format!("This is my OpenAI key: sk-{}", "a".repeat(40));
        assert_eq!(detector.detect(&content, &[]), PrivacyLevel::LocalOnly);
        assert_eq!(
            detector.detect("password=mysecretpass123", &[]),
            PrivacyLevel::LocalOnly
        );
    }

    #[test]
    fn luhn_valid_card_is_local_only() {
        let detector = PrivacyDetector::new();
        // 4532015112830366 passes Luhn; 4532015112830367 does not.
        assert_eq!(
            detector.detect("card on file: 4532 0151 1283 0366", &[]),
            PrivacyLevel::LocalOnly
        );
        assert_ne!(
            detector.detect("build number 4532015112830367", &[]),
            PrivacyLevel::LocalOnly
        );
    }

    #[test]
    fn financial_content_is_confidential() {
        let detector = PrivacyDetector::new();
        assert_eq!(
            detector.detect("My investment portfolio has $50,000 in stocks", &tags(&["financial"])),
            PrivacyLevel::Confidential
        );
    }

    #[test]
    fn documentation_is_public() {
        let detector = PrivacyDetector::new();
        let content = "# Python Tutorial\n\n## Introduction\n```py\nprint()\n```";
        assert_eq!(detector.detect(content, &tags(&["tutorial"])), PrivacyLevel::Public);
        // Markers alone (no tag) are enough when two or more fire.
        assert_eq!(detector.detect(content, &[]), PrivacyLevel::Public);
    }

    #[test]
    fn conversations_default_to_internal() {
        let detector = PrivacyDetector::new();
        assert_eq!(
            detector.detect(
                "Had a great conversation with ChatGPT today about coding",
                &tags(&["chatgpt", "conversation"])
            ),
            PrivacyLevel::Internal
        );
        assert_eq!(detector.detect("", &[]), PrivacyLevel::Internal);
    }

    #[test]
    fn local_only_outranks_public_markers() {
        let detector = PrivacyDetector::new();
        let content = "# Deploy Guide\n\n```\nexport API_KEY=abcdefghij0123456789abcd\n```";
        assert_eq!(detector.detect(content, &[]), PrivacyLevel::LocalOnly);
    }

    #[test]
    fn luhn_checksum_reference_values() {
        assert!(luhn_valid("4532015112830366"));
        assert!(!luhn_valid("4532015112830367"));
        assert!(!luhn_valid("453201511283036a"));
    }
}
