//! Destination path derivation.
//!
//! Source relative paths pass through Unicode normalization and character
//! sanitization before becoming output paths, then through collision
//! resolution so no two outputs land on the same file on a
//! case-insensitive filesystem. Everything here is pure string work;
//! resolution order is fixed so the same inputs always produce the same
//! assignments.

use std::collections::HashSet;

use unicode_normalization::UnicodeNormalization;

/// Longest allowed path segment, in characters.
const MAX_SEGMENT_CHARS: usize = 120;

/// Characters replaced in path segments. Forward slash is the separator
/// and never appears inside a segment.
const ILLEGAL: &[char] = &['<', '>', ':', '"', '\\', '|', '?', '*'];

/// Sanitizes a destination relative path segment by segment.
///
/// Applies NFC so the same title typed on different platforms lands on
/// the same output path, replaces illegal and control characters with a
/// single placeholder, trims trailing dots and spaces, and truncates
/// oversized segments while keeping the extension intact.
pub fn sanitize_rel_path(rel_path: &str) -> String {
    let normalized: String = rel_path.nfc().collect();
    normalized
        .split('/')
        .filter(|s| !s.is_empty())
        .map(sanitize_segment)
        .collect::<Vec<_>>()
        .join("/")
}

fn sanitize_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut last_was_placeholder = false;
    for ch in segment.chars() {
        if ILLEGAL.contains(&ch) || ch.is_control() {
            if !last_was_placeholder {
                out.push('_');
                last_was_placeholder = true;
            }
        } else {
            out.push(ch);
            last_was_placeholder = false;
        }
    }

    let trimmed = out.trim_end_matches([' ', '.']);
    let out = if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    };

    truncate_segment(&out)
}

/// Caps a segment at [`MAX_SEGMENT_CHARS`] characters. The extension
/// survives truncation; the stem absorbs the cut.
fn truncate_segment(segment: &str) -> String {
    if segment.chars().count() <= MAX_SEGMENT_CHARS {
        return segment.to_string();
    }

    let (stem, ext) = split_extension(segment);
    let ext_chars = ext.map_or(0, |e| e.chars().count() + 1);
    let keep = MAX_SEGMENT_CHARS.saturating_sub(ext_chars).max(1);
    let stem: String = stem.chars().take(keep).collect();
    // Truncation can leave a trailing dot or space again.
    let stem = stem.trim_end_matches([' ', '.']);
    match ext {
        Some(e) => format!("{stem}.{e}"),
        None => stem.to_string(),
    }
}

/// Splits `name` into stem and extension. A leading dot is not an
/// extension separator.
pub fn split_extension(name: &str) -> (&str, Option<&str>) {
    let sep = name.rfind('/').map_or(0, |s| s + 1);
    let base = &name[sep..];
    match base.rfind('.') {
        Some(dot) if dot > 0 => {
            let abs_dot = sep + dot;
            (&name[..abs_dot], Some(&name[abs_dot + 1..]))
        }
        _ => (name, None),
    }
}

/// Path without its extension.
pub fn stem_of(rel_path: &str) -> &str {
    split_extension(rel_path).0
}

/// Swaps the extension of a relative path.
pub fn replace_extension(rel_path: &str, new_ext: &str) -> String {
    format!("{}.{new_ext}", stem_of(rel_path))
}

/// Assigns a collision-free destination path to each candidate.
///
/// `existing` holds paths already occupied by outputs that are staying
/// put. Collisions are detected case-insensitively and resolved with
/// ` (n)` counters before the extension. Candidates are claimed in
/// sorted order of their sanitized form, then results are returned in
/// input order, so assignment does not depend on scan order.
pub fn resolve_paths(candidates: &[String], existing: &HashSet<String>) -> Vec<String> {
    let mut taken: HashSet<String> = existing.iter().map(|p| fold_key(p)).collect();

    let mut indexed: Vec<(usize, String)> = candidates
        .iter()
        .map(|c| sanitize_rel_path(c))
        .enumerate()
        .collect();
    // Ties between identical sanitized forms break on the original string,
    // never on input position.
    indexed.sort_by(|a, b| {
        a.1.cmp(&b.1)
            .then_with(|| candidates[a.0].cmp(&candidates[b.0]))
    });

    let mut resolved = vec![String::new(); candidates.len()];
    for (index, candidate) in indexed {
        let assigned = claim(&candidate, &mut taken);
        resolved[index] = assigned;
    }
    resolved
}

fn claim(candidate: &str, taken: &mut HashSet<String>) -> String {
    if taken.insert(fold_key(candidate)) {
        return candidate.to_string();
    }

    let (stem, ext) = split_extension(candidate);
    for n in 1.. {
        let attempt = match ext {
            Some(e) => format!("{stem} ({n}).{e}"),
            None => format!("{stem} ({n})"),
        };
        if taken.insert(fold_key(&attempt)) {
            return attempt;
        }
    }
    unreachable!("counter space exhausted");
}

/// Case-insensitive collision key.
fn fold_key(path: &str) -> String {
    path.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_replaces_illegal_characters() {
        assert_eq!(
            sanitize_rel_path("AC/DC: Back In Black/Hells Bells?.ogg"),
            "AC/DC_ Back In Black/Hells Bells_.ogg"
        );
    }

    #[test]
    fn test_sanitize_collapses_placeholder_runs() {
        assert_eq!(sanitize_rel_path("a/b<>:c.ogg"), "a/b_c.ogg");
    }

    #[test]
    fn test_sanitize_trims_trailing_dots_and_spaces() {
        assert_eq!(sanitize_rel_path("album./track .ogg"), "album/track .ogg");
        assert_eq!(sanitize_rel_path("album /x.ogg"), "album/x.ogg");
    }

    #[test]
    fn test_sanitize_applies_nfc() {
        // e + combining acute normalizes to precomposed e-acute.
        let decomposed = "Re\u{0301}publique/track.ogg";
        let composed = "R\u{00e9}publique/track.ogg";
        assert_eq!(sanitize_rel_path(decomposed), composed);
    }

    #[test]
    fn test_truncation_preserves_extension() {
        let long = format!("{}.ogg", "x".repeat(200));
        let out = sanitize_rel_path(&long);
        assert!(out.ends_with(".ogg"));
        assert!(out.chars().count() <= MAX_SEGMENT_CHARS);
    }

    #[test]
    fn test_split_extension_edge_cases() {
        assert_eq!(split_extension("a/b.ogg"), ("a/b", Some("ogg")));
        assert_eq!(split_extension("a/noext"), ("a/noext", None));
        assert_eq!(split_extension("a/.hidden"), ("a/.hidden", None));
        assert_eq!(split_extension("a.b/c"), ("a.b/c", None));
    }

    #[test]
    fn test_replace_extension() {
        assert_eq!(replace_extension("a/track.ogg", "opus"), "a/track.opus");
        assert_eq!(replace_extension("a/track", "ogg"), "a/track.ogg");
    }

    #[test]
    fn test_resolution_without_collisions_is_identity() {
        let existing = HashSet::new();
        let resolved = resolve_paths(
            &["a/x.ogg".to_string(), "b/y.ogg".to_string()],
            &existing,
        );
        assert_eq!(resolved, vec!["a/x.ogg", "b/y.ogg"]);
    }

    #[test]
    fn test_case_fold_collision_gets_counter() {
        let existing: HashSet<String> = ["a/Track.ogg".to_string()].into();
        let resolved = resolve_paths(&["a/track.ogg".to_string()], &existing);
        assert_eq!(resolved, vec!["a/track (1).ogg"]);
    }

    #[test]
    fn test_sanitization_collision_among_candidates() {
        // Two different source names sanitize to the same output path.
        let existing = HashSet::new();
        let resolved = resolve_paths(
            &["a/track?.ogg".to_string(), "a/track*.ogg".to_string()],
            &existing,
        );
        // "a/track*.ogg" sorts before "a/track?.ogg" and claims the base.
        assert_eq!(resolved[0], "a/track_ (1).ogg");
        assert_eq!(resolved[1], "a/track_.ogg");
    }

    #[test]
    fn test_assignment_independent_of_input_order() {
        let existing = HashSet::new();
        let forward = resolve_paths(
            &["a/track?.ogg".to_string(), "a/track*.ogg".to_string()],
            &existing,
        );
        let backward = resolve_paths(
            &["a/track*.ogg".to_string(), "a/track?.ogg".to_string()],
            &existing,
        );
        // Same candidate string gets the same assignment either way.
        assert_eq!(forward[0], backward[1]);
        assert_eq!(forward[1], backward[0]);
    }

    #[test]
    fn test_counter_skips_taken_values() {
        let existing: HashSet<String> =
            ["x.ogg".to_string(), "x (1).ogg".to_string()].into();
        let resolved = resolve_paths(&["x.ogg".to_string()], &existing);
        assert_eq!(resolved, vec!["x (2).ogg"]);
    }
}
