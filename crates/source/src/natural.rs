//! Natural ordering of page names
//!
//! Digit runs compare by numeric value and everything else compares
//! case-insensitively, so `page2.png` sorts before `page10.png`.

use std::cmp::Ordering;
use std::iter::Peekable;
use std::str::Chars;

/// Compare two names in natural order
///
/// Names equal under natural order fall back to a plain byte comparison so
/// the ordering stays total (`a01` and `a1` never compare equal).
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let ordering = compare_digit_runs(&mut left, &mut right);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            (Some(l), Some(r)) => {
                let ordering = l
                    .to_lowercase()
                    .cmp(r.to_lowercase());
                if ordering != Ordering::Equal {
                    return ordering;
                }
                left.next();
                right.next();
            }
        }
    }
}

fn take_digits(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(c) = chars.next_if(char::is_ascii_digit) {
        digits.push(c);
    }
    digits
}

fn compare_digit_runs(left: &mut Peekable<Chars<'_>>, right: &mut Peekable<Chars<'_>>) -> Ordering {
    let l = take_digits(left);
    let r = take_digits(right);
    let l_trimmed = l.trim_start_matches('0');
    let r_trimmed = r.trim_start_matches('0');

    // Longer run of significant digits is the larger number
    l_trimmed
        .len()
        .cmp(&r_trimmed.len())
        .then_with(|| l_trimmed.cmp(r_trimmed))
}

/// Sort names in place in natural order
pub fn natural_sort<S: AsRef<str>>(names: &mut [S]) {
    names.sort_by(|a, b| natural_cmp(a.as_ref(), b.as_ref()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers_compare_by_value() {
        let mut names = vec!["page10.png", "page2.png", "page1.png"];
        natural_sort(&mut names);
        assert_eq!(names, vec!["page1.png", "page2.png", "page10.png"]);
    }

    #[test]
    fn test_case_insensitive_text() {
        assert_eq!(natural_cmp("Cover.jpg", "chapter.jpg"), Ordering::Greater);
        assert_eq!(natural_cmp("a.png", "B.png"), Ordering::Less);
    }

    #[test]
    fn test_leading_zeros() {
        assert_eq!(natural_cmp("p007", "p7"), Ordering::Less);
        assert_eq!(natural_cmp("p007", "p10"), Ordering::Less);
        assert_eq!(natural_cmp("p7", "p7"), Ordering::Equal);
    }

    #[test]
    fn test_nested_paths() {
        let mut names = vec!["vol2/001.png", "vol10/001.png", "vol1/010.png", "vol1/002.png"];
        natural_sort(&mut names);
        assert_eq!(
            names,
            vec!["vol1/002.png", "vol1/010.png", "vol2/001.png", "vol10/001.png"]
        );
    }

    #[test]
    fn test_prefix_sorts_first() {
        assert_eq!(natural_cmp("page", "page1"), Ordering::Less);
    }
}
