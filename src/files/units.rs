use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizeUnits {
    /// kB, MB, GB (powers of 1000)
    #[default]
    Si,
    /// KiB, MiB, GiB (powers of 1024)
    Binary,
}

impl SizeUnits {
    pub fn from_flag(alternate: bool) -> Self {
        if alternate { SizeUnits::Binary } else { SizeUnits::Si }
    }

    fn scale(self) -> [(u64, &'static str); 3] {
        match self {
            SizeUnits::Si => [(1_000_000_000, "GB"), (1_000_000, "MB"), (1_000, "kB")],
            SizeUnits::Binary => [(1 << 30, "GiB"), (1 << 20, "MiB"), (1 << 10, "KiB")],
        }
    }
}

/// Renders a byte count with the largest unit it reaches, e.g. `1500` as
/// `"1.50 kB"`. Counts below the smallest unit print as raw bytes.
pub fn format_size(size: u64, decimal_places: usize, units: SizeUnits) -> String {
    for (threshold, suffix) in units.scale() {
        if size >= threshold {
            let value = size as f64 / threshold as f64;
            return format!("{value:.decimal_places$} {suffix}");
        }
    }
    format!("{size} B")
}

/// One run of a natural sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NaturalChunk {
    Text(String),
    /// Digit run with leading zeros stripped.
    Number(String),
}

impl Ord for NaturalChunk {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (NaturalChunk::Number(a), NaturalChunk::Number(b)) => {
                a.len().cmp(&b.len()).then_with(|| a.cmp(b))
            }
            (NaturalChunk::Text(a), NaturalChunk::Text(b)) => a.cmp(b),
            // keys alternate text/number from the same start, so mixed pairs
            // only show up at a position where one side ran out of text
            (NaturalChunk::Number(_), NaturalChunk::Text(_)) => Ordering::Less,
            (NaturalChunk::Text(_), NaturalChunk::Number(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for NaturalChunk {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Splits `s` into alternating text and digit runs. The key always starts
/// with a (possibly empty) text run, so text and numbers line up position by
/// position between two keys.
pub fn natural_key(s: &str) -> Vec<NaturalChunk> {
    let mut chunks = Vec::new();
    let mut text = String::new();
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            if digits.is_empty() {
                chunks.push(NaturalChunk::Text(std::mem::take(&mut text).to_lowercase()));
            }
            digits.push(c);
        } else {
            if !digits.is_empty() {
                chunks.push(number_chunk(&std::mem::take(&mut digits)));
            }
            text.push(c);
        }
    }
    if !digits.is_empty() {
        chunks.push(number_chunk(&digits));
    }
    chunks.push(NaturalChunk::Text(text.to_lowercase()));
    chunks
}

fn number_chunk(digits: &str) -> NaturalChunk {
    let trimmed = digits.trim_start_matches('0');
    NaturalChunk::Number(if trimmed.is_empty() { "0".to_string() } else { trimmed.to_string() })
}

#[cfg(test)]
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    natural_key(a).cmp(&natural_key(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_counts_below_a_kilobyte_stay_raw() {
        assert_eq!(format_size(0, 2, SizeUnits::Si), "0 B");
        assert_eq!(format_size(999, 2, SizeUnits::Si), "999 B");
        assert_eq!(format_size(1023, 2, SizeUnits::Binary), "1023 B");
    }

    #[test]
    fn picks_largest_reached_unit() {
        assert_eq!(format_size(1500, 2, SizeUnits::Si), "1.50 kB");
        assert_eq!(format_size(1536, 2, SizeUnits::Binary), "1.50 KiB");
        assert_eq!(format_size(2_500_000, 1, SizeUnits::Si), "2.5 MB");
        assert_eq!(format_size(3 << 30, 0, SizeUnits::Binary), "3 GiB");
        assert_eq!(format_size(1000, 2, SizeUnits::Si), "1.00 kB");
    }

    #[test]
    fn digits_compare_by_value() {
        let mut names = vec!["item10", "item2", "item1"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, ["item1", "item2", "item10"]);
    }

    #[test]
    fn text_runs_ignore_case() {
        assert_eq!(natural_cmp("Alpha", "alpha"), Ordering::Equal);
        assert_eq!(natural_cmp("beta", "Alpha"), Ordering::Greater);
        assert_eq!(natural_cmp("file007", "file7"), Ordering::Equal);
    }

    #[test]
    fn long_digit_runs_do_not_overflow() {
        assert_eq!(
            natural_cmp("v99999999999999999999999", "v100000000000000000000000"),
            Ordering::Less
        );
    }

    #[test]
    fn composite_kind_key_groups_directories_first() {
        assert_eq!(natural_cmp("directory-zeta", "file-alpha"), Ordering::Less);
    }
}
