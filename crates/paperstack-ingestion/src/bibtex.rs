//! Citation key assignment and BibTeX rendering.
//!
//! Keys follow the `{Surname}{Year}` convention. On collision a letter
//! suffix is appended: Smith2024, Smith2024a, ..., Smith2024z, Smith2024aa.
//! Key assignment must run under the ingest lock so two concurrent ingests
//! can never mint the same key.

use crate::models::ResolvedMetadata;
use std::collections::HashSet;

/// Surname of one author name, cleaned for use in a citation key.
///
/// Handles both "Smith, Jane" and "Jane Smith" forms.
pub fn surname(author: &str) -> String {
    let raw = if let Some((last, _first)) = author.split_once(',') {
        last.trim()
    } else {
        author.split_whitespace().last().unwrap_or(author)
    };

    let cleaned: String = raw.chars().filter(|c| c.is_ascii_alphabetic()).collect();
    if cleaned.is_empty() {
        return "Unknown".to_string();
    }

    let mut chars = cleaned.chars();
    let first = chars.next().map(|c| c.to_ascii_uppercase()).unwrap_or('U');
    format!("{}{}", first, chars.as_str())
}

/// Letter suffix for the n-th collision: a..z, aa, ab, ...
fn collision_suffix(n: usize) -> String {
    let mut n = n + 1;
    let mut out = Vec::new();
    while n > 0 {
        n -= 1;
        out.push(b'a' + (n % 26) as u8);
        n /= 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Pick the first free key for this surname and year.
pub fn assign_citation_key(surname: &str, year: i64, existing: &HashSet<String>) -> String {
    let base = format!("{}{}", surname, year);
    if !existing.contains(&base) {
        return base;
    }
    for n in 0.. {
        let candidate = format!("{}{}", base, collision_suffix(n));
        if !existing.contains(&candidate) {
            return candidate;
        }
    }
    unreachable!("suffix sequence is unbounded")
}

/// Join author names the way BibTeX expects.
pub fn format_authors(authors: &[String]) -> String {
    authors.join(" and ")
}

/// Render a complete @article entry for the paper.
pub fn format_entry(key: &str, meta: &ResolvedMetadata) -> String {
    let mut fields = vec![
        format!("  title = {{{}}}", meta.title),
        format!("  author = {{{}}}", format_authors(&meta.authors)),
        format!("  year = {{{}}}", meta.year),
    ];
    if let Some(ref journal) = meta.journal {
        fields.push(format!("  journal = {{{}}}", journal));
    }
    if let Some(ref publisher) = meta.publisher {
        fields.push(format!("  publisher = {{{}}}", publisher));
    }
    if let Some(ref doi) = meta.doi {
        fields.push(format!("  doi = {{{}}}", doi));
    }
    if let Some(ref url) = meta.url {
        fields.push(format!("  url = {{{}}}", url));
    }

    format!("@article{{{},\n{}\n}}", key, fields.join(",\n"))
}

/// Cheap structural check used by tests and the bibliography exporter.
pub fn validate_entry(entry: &str) -> bool {
    if !entry.starts_with('@') {
        return false;
    }
    let mut depth: i64 = 0;
    for c in entry.chars() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use paperstack_db::ExtractionMethod;

    fn meta() -> ResolvedMetadata {
        ResolvedMetadata {
            title: "Deep Residual Learning".to_string(),
            authors: vec!["Kaiming He".to_string(), "Xiangyu Zhang".to_string()],
            year: 2016,
            journal: Some("CVPR".to_string()),
            doi: Some("10.1109/CVPR.2016.90".to_string()),
            url: None,
            abstract_text: None,
            publisher: None,
            method: ExtractionMethod::ExternalLookupDoi,
        }
    }

    #[test]
    fn surname_handles_both_name_orders() {
        assert_eq!(surname("Jane Smith"), "Smith");
        assert_eq!(surname("Smith, Jane"), "Smith");
        assert_eq!(surname("van der Berg, Anna"), "VanderBerg");
        assert_eq!(surname("O'Brien, Liam"), "OBrien");
        assert_eq!(surname("  "), "Unknown");
        assert_eq!(surname("123"), "Unknown");
    }

    #[test]
    fn first_key_has_no_suffix() {
        let existing = HashSet::new();
        assert_eq!(assign_citation_key("Smith", 2024, &existing), "Smith2024");
    }

    #[test]
    fn collisions_get_letter_suffixes() {
        let mut existing = HashSet::new();
        existing.insert("Smith2024".to_string());
        assert_eq!(assign_citation_key("Smith", 2024, &existing), "Smith2024a");

        existing.insert("Smith2024a".to_string());
        existing.insert("Smith2024b".to_string());
        assert_eq!(assign_citation_key("Smith", 2024, &existing), "Smith2024c");
    }

    #[test]
    fn suffixes_extend_past_z() {
        let mut existing = HashSet::new();
        existing.insert("Smith2024".to_string());
        for c in b'a'..=b'z' {
            existing.insert(format!("Smith2024{}", c as char));
        }
        assert_eq!(assign_citation_key("Smith", 2024, &existing), "Smith2024aa");
        existing.insert("Smith2024aa".to_string());
        assert_eq!(assign_citation_key("Smith", 2024, &existing), "Smith2024ab");
    }

    #[test]
    fn entry_contains_all_present_fields() {
        let entry = format_entry("He2016", &meta());
        assert!(entry.starts_with("@article{He2016,"));
        assert!(entry.contains("title = {Deep Residual Learning}"));
        assert!(entry.contains("author = {Kaiming He and Xiangyu Zhang}"));
        assert!(entry.contains("year = {2016}"));
        assert!(entry.contains("journal = {CVPR}"));
        assert!(entry.contains("doi = {10.1109/CVPR.2016.90}"));
        assert!(!entry.contains("url ="));
        assert!(validate_entry(&entry));
    }

    #[test]
    fn unbalanced_entries_fail_validation() {
        assert!(!validate_entry("@article{X, title = {open"));
        assert!(!validate_entry("no at sign"));
    }
}
