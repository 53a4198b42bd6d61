//! Natural ordering of stage names
//!
//! Spack names its stages `stage-0`, `stage-1`, ..., `stage-10`; they must
//! run in numeric order, not in lexicographic order.

use regex::Regex;
use std::cmp::Ordering;
use std::sync::OnceLock;

#[derive(Debug, PartialEq, Eq)]
enum Chunk<'a> {
    Number(&'a str),
    Text(&'a str),
}

fn chunks(s: &str) -> impl Iterator<Item = Chunk<'_>> {
    static CHUNK: OnceLock<Regex> = OnceLock::new();
    let re = CHUNK.get_or_init(|| Regex::new(r"[0-9]+|[^0-9]+").expect("chunk pattern is valid"));
    re.find_iter(s).map(|m| {
        let text = m.as_str();
        if text.as_bytes()[0].is_ascii_digit() {
            Chunk::Number(text)
        } else {
            Chunk::Text(text)
        }
    })
}

/// Compare two digit runs by numeric value, without overflowing
fn compare_numbers(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Compare two strings chunk by chunk: digit runs numerically, text
/// lexicographically. Digits sort before text.
///
/// Names equal under this rule (`stage-1` and `stage-01`) collide; see
/// [`natural_cmp`] for a total order.
pub fn natural_key_cmp(a: &str, b: &str) -> Ordering {
    let mut left = chunks(a);
    let mut right = chunks(b);
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ordering = match (l, r) {
                    (Chunk::Number(l), Chunk::Number(r)) => compare_numbers(l, r),
                    (Chunk::Text(l), Chunk::Text(r)) => l.cmp(r),
                    (Chunk::Number(_), Chunk::Text(_)) => Ordering::Less,
                    (Chunk::Text(_), Chunk::Number(_)) => Ordering::Greater,
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

/// Natural order, falling back to plain string order for colliding names
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    natural_key_cmp(a, b).then_with(|| a.cmp(b))
}

/// Sort strings in natural order
pub fn natural_sort<S: AsRef<str>>(items: &mut [S]) {
    items.sort_by(|a, b| natural_cmp(a.as_ref(), b.as_ref()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers_sort_numerically() {
        let mut stages = vec!["stage-10", "stage-2", "stage-1", "stage-rebuild-index"];
        natural_sort(&mut stages);
        assert_eq!(stages, vec!["stage-1", "stage-2", "stage-10", "stage-rebuild-index"]);
    }

    #[test]
    fn test_leading_numbers() {
        let mut stages = vec!["10-deploy", "2-test", "1-build"];
        natural_sort(&mut stages);
        assert_eq!(stages, vec!["1-build", "2-test", "10-deploy"]);
    }

    #[test]
    fn test_collision_detected_by_key() {
        assert_eq!(natural_key_cmp("stage-1", "stage-01"), Ordering::Equal);
        assert_ne!(natural_cmp("stage-1", "stage-01"), Ordering::Equal);
    }

    #[test]
    fn test_huge_numbers() {
        assert_eq!(
            natural_cmp("stage-99999999999999999999999", "stage-100000000000000000000000"),
            Ordering::Less
        );
    }

    #[test]
    fn test_prefix_sorts_first() {
        assert_eq!(natural_cmp("stage", "stage-1"), Ordering::Less);
    }
}
