//! Channel list files for bulk scans
//!
//! One channel ID per line, `-100`-prefixed as the platform formats
//! supergroup IDs. Blank lines and anything else are skipped with a
//! warning rather than aborting the whole batch.

use tracing::warn;

/// Parse the contents of a channel list file into channel IDs, keeping
/// input order.
pub fn parse_channel_list(contents: &str) -> Vec<i64> {
    contents
        .lines()
        .enumerate()
        .filter_map(|(i, line)| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let digits = line.strip_prefix("-100");
            match digits {
                Some(digits) if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) => {
                    line.parse::<i64>().ok()
                }
                _ => {
                    warn!(line_number = i + 1, line = %line, "Skipping invalid channel ID");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ids_parsed_in_order() {
        let contents = "-1001234567890\n-1009876543210\n";
        assert_eq!(
            parse_channel_list(contents),
            vec![-1001234567890, -1009876543210]
        );
    }

    #[test]
    fn test_invalid_lines_skipped() {
        let contents = "-1001234567890\n\nnot-a-channel\n12345\n-100\n  -1005555555555  \n";
        assert_eq!(
            parse_channel_list(contents),
            vec![-1001234567890, -1005555555555]
        );
    }
}
