//! Parsers for the small text values found in /sys. Malformed input is `None`, never an error.

use itertools::Itertools;

/// The first line of the file, trimmed. `None` if there is no non-blank first line.
pub(super) fn first_line(contents: &str) -> Option<&str> {
    let line = contents.lines().next()?.trim();

    (!line.is_empty()).then_some(line)
}

/// Parses a single unsigned integer.
pub(super) fn parse_int(contents: &str) -> Option<u32> {
    first_line(contents)?.parse().ok()
}

/// Parses a cpulist ("0,1,2-4,5-10:2" style list) into ascending IDs without duplicates.
///
/// An empty list is valid and yields an empty result. Any malformed part makes the whole
/// list unusable.
pub(super) fn parse_id_list(contents: &str) -> Option<Vec<u32>> {
    let Some(line) = first_line(contents) else {
        return Some(Vec::new());
    };

    let parts: Option<Vec<Vec<u32>>> = line.split(',').map(parse_part).collect();

    Some(parts?.into_iter().flatten().sorted().dedup().collect())
}

fn parse_part(part: &str) -> Option<Vec<u32>> {
    let part = part.trim();

    if part.is_empty() {
        return Some(Vec::new());
    }

    let Some((start, end_and_stride)) = part.split_once('-') else {
        return part.parse().ok().map(|id| vec![id]);
    };

    let start: u32 = start.parse().ok()?;

    let (end, stride): (u32, u32) = match end_and_stride.split_once(':') {
        Some((end, stride)) => (end.parse().ok()?, stride.parse().ok()?),
        None => (end_and_stride.parse().ok()?, 1),
    };

    if stride == 0 || start > end {
        return None;
    }

    Some((start..=end).step_by(stride as usize).collect())
}

/// Parses a byte count with an optional `K` or `M` binary unit suffix (e.g. "32K", "8192K").
pub(super) fn parse_byte_count(contents: &str) -> Option<u64> {
    let line = first_line(contents)?;

    let (digits, multiplier) = [(['K', 'k'], 1024), (['M', 'm'], 1024 * 1024)]
        .into_iter()
        .find_map(|(suffix, multiplier)| {
            line.strip_suffix(suffix).map(|digits| (digits, multiplier))
        })
        .unwrap_or((line, 1));

    digits.trim().parse::<u64>().ok()?.checked_mul(multiplier)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn first_line_trims() {
        assert_eq!(first_line("Unified\n"), Some("Unified"));
        assert_eq!(first_line("  3 \nignored"), Some("3"));
        assert_eq!(first_line("\n"), None);
        assert_eq!(first_line(""), None);
    }

    #[test]
    fn parse_int_smoke_test() {
        assert_eq!(parse_int("7\n"), Some(7));
        assert_eq!(parse_int("-1"), None);
        assert_eq!(parse_int("x"), None);
    }

    #[test]
    fn parse_id_list_smoke_test() {
        assert_eq!(parse_id_list(""), Some(vec![]));
        assert_eq!(parse_id_list("555\n"), Some(vec![555]));
        assert_eq!(parse_id_list("0-3,7"), Some(vec![0, 1, 2, 3, 7]));
        assert_eq!(parse_id_list("2,3,1"), Some(vec![1, 2, 3]));
        assert_eq!(parse_id_list("0-5,1-6"), Some(vec![0, 1, 2, 3, 4, 5, 6]));
        assert_eq!(
            parse_id_list("0-10:3,5-15:3"),
            Some(vec![0, 3, 5, 6, 8, 9, 11, 14])
        );
    }

    #[test]
    fn parse_id_list_rejects_malformed() {
        assert_eq!(parse_id_list("1-22:0"), None);
        assert_eq!(parse_id_list("5-1"), None);
        assert_eq!(parse_id_list("1,x"), None);
        assert_eq!(parse_id_list("1-"), None);
    }

    #[test]
    fn parse_byte_count_scales_suffixes() {
        assert_eq!(parse_byte_count("64\n"), Some(64));
        assert_eq!(parse_byte_count("32K\n"), Some(32 * 1024));
        assert_eq!(parse_byte_count("8M"), Some(8 * 1024 * 1024));
        assert_eq!(parse_byte_count("12k"), Some(12 * 1024));
    }

    #[test]
    fn parse_byte_count_rejects_malformed() {
        assert_eq!(parse_byte_count(""), None);
        assert_eq!(parse_byte_count("K"), None);
        assert_eq!(parse_byte_count("12G"), None);
        assert_eq!(parse_byte_count("abc"), None);
        assert_eq!(parse_byte_count("99999999999999999999M"), None);
    }
}
