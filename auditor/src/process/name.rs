//! Process name normalization.
//!
//! The kernel stores a task's name in a `TASK_COMM_LEN` (16 byte) buffer,
//! including the trailing NUL, so `/proc/<pid>/status` never reports more than
//! 15 bytes. Every name that is compared against a live process (baseline,
//! exclusions, ignored ancestors) must go through [`normalize`] so that long
//! daemon names still match.

/// Maximum number of bytes the kernel keeps of a process name.
pub const COMM_NAME_MAX: usize = 15;

/// Truncate a process name to the kernel's comm width.
///
/// Truncation backs off to a UTF-8 character boundary, so the result can be
/// shorter than [`COMM_NAME_MAX`] bytes for multi-byte names.
#[must_use]
pub fn normalize(raw: &str) -> String {
    if raw.len() <= COMM_NAME_MAX {
        return raw.to_string();
    }

    let mut end = COMM_NAME_MAX;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    raw[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_name_unchanged() {
        assert_eq!(normalize("powerd"), "powerd");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_exact_width_unchanged() {
        let name = "a".repeat(COMM_NAME_MAX);
        assert_eq!(normalize(&name), name);
    }

    #[test]
    fn test_long_name_truncated() {
        assert_eq!(normalize("chapsd-long-daemon-name"), "chapsd-long-dae");
        assert_eq!(normalize("tpm_managerd_extra").len(), COMM_NAME_MAX);
    }

    #[test]
    fn test_truncation_is_idempotent() {
        let once = normalize("attestationd-helper");
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn test_multibyte_boundary() {
        // 14 ASCII bytes followed by a 2-byte character straddling the limit.
        let name = format!("{}é-suffix", "x".repeat(14));
        let normalized = normalize(&name);
        assert_eq!(normalized, "x".repeat(14));
        assert!(normalized.len() <= COMM_NAME_MAX);
    }
}
