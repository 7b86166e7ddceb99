//! Recording filename composition.
//!
//! Names are built from the channel, the local start time and the stream
//! title, then reduced to a conservative character set that every target
//! filesystem accepts.

use chrono::NaiveDateTime;

/// Timestamp layout used in recording filenames.
pub const FILENAME_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %Hh%Mm%Ss";

/// Container extension of recorded files.
pub const RECORDING_EXTENSION: &str = "mp4";

/// Characters kept besides ASCII letters and digits.
const ALLOWED_PUNCTUATION: &[char] = &[' ', '-', '_', '.'];

/// Whether `c` may appear in a sanitized filename.
#[inline]
pub fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || ALLOWED_PUNCTUATION.contains(&c)
}

/// Remove every character outside ASCII alphanumerics, space, `-`, `_` and `.`.
///
/// # Examples
///
/// ```
/// use twitch_srec::utils::filename::sanitize_filename;
///
/// assert_eq!(sanitize_filename("Ranked Play!"), "Ranked Play");
/// assert_eq!(sanitize_filename("a/b\\c:d"), "abcd");
/// ```
pub fn sanitize_filename(input: &str) -> String {
    input.chars().filter(|&c| is_allowed_char(c)).collect()
}

/// Compose the sanitized filename for a recording that starts at `started_at`.
///
/// Layout: `<channel> - <YYYY-MM-DD HHhMMmSSs> - <title>.mp4`.
pub fn recording_filename(channel: &str, started_at: NaiveDateTime, title: &str) -> String {
    let raw = format!(
        "{} - {} - {}.{}",
        channel,
        started_at.format(FILENAME_TIMESTAMP_FORMAT),
        title,
        RECORDING_EXTENSION
    );
    sanitize_filename(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_recording_filename_strips_exclamation() {
        let name = recording_filename("bob", at(2024, 1, 2, 3, 4, 5), "Ranked Play!");
        assert_eq!(name, "bob - 2024-01-02 03h04m05s - Ranked Play.mp4");
    }

    #[test]
    fn test_recording_filename_empty_title() {
        let name = recording_filename("alice", at(2023, 12, 31, 23, 59, 0), "");
        assert_eq!(name, "alice - 2023-12-31 23h59m00s - .mp4");
    }

    #[test]
    fn test_path_separators_removed() {
        let name = recording_filename("carol", at(2024, 5, 6, 7, 8, 9), "../../etc/passwd");
        assert!(!name.contains('/'));
        assert_eq!(name, "carol - 2024-05-06 07h08m09s - ....etcpasswd.mp4");
    }

    #[test]
    fn test_windows_invalid_chars_removed() {
        assert_eq!(sanitize_filename("a<b>c:d\"e|f?g*h"), "abcdefgh");
    }

    #[test]
    fn test_non_ascii_removed() {
        assert_eq!(sanitize_filename("观看 一只 青蛙 🐸 ok"), "    ok");
        assert_eq!(sanitize_filename("Größe"), "Gre");
    }

    #[test]
    fn test_control_characters_removed() {
        assert_eq!(sanitize_filename("line\nbreak\ttab\x00"), "linebreaktab");
    }

    #[test]
    fn test_output_charset_for_assorted_inputs() {
        let titles = [
            "Ranked Play!",
            "🔴 LIVE | !drops | day 3/7",
            "mañana — café",
            "C:\\Program Files\\x",
            "100% <raw> \"speedrun\"",
            "",
            "     ",
            "tab\tnew\nline",
        ];
        let channels = ["bob", "x_y-z", "Name123", "日本"];

        for channel in channels {
            for title in titles {
                let name = recording_filename(channel, at(2024, 1, 2, 3, 4, 5), title);
                assert!(
                    name.chars().all(is_allowed_char),
                    "unexpected character in {name:?}"
                );
                assert!(name.ends_with(".mp4"));
            }
        }
    }

    #[test]
    fn test_idempotency() {
        for input in ["Ranked Play!", "a/b", "ok name.mp4", "??"] {
            let once = sanitize_filename(input);
            assert_eq!(sanitize_filename(&once), once);
        }
    }
}
