//! The `.disabled` directory-name convention.
//!
//! An item is disabled exactly when its directory name ends with
//! [`DISABLED_SUFFIX`]. All suffix handling in the crate goes through
//! [`mark_disabled`] and [`is_disabled`].

/// Marker appended to a directory name to take it out of play.
pub const DISABLED_SUFFIX: &str = ".disabled";

/// Disabled form of `name`.
pub fn mark_disabled(name: &str) -> String {
    format!("{name}{DISABLED_SUFFIX}")
}

/// Whether `name` carries the suffix, plus the base name with it removed.
///
/// A directory named exactly `.disabled` has no base name and is treated as
/// an ordinary enabled entry.
pub fn is_disabled(name: &str) -> (bool, &str) {
    match name.strip_suffix(DISABLED_SUFFIX) {
        Some(base) if !base.is_empty() => (true, base),
        _ => (false, name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_disabled_appends_suffix() {
        assert_eq!(mark_disabled("BusA"), "BusA.disabled");
        assert_eq!(mark_disabled("/tmp/vehicles/BusA"), "/tmp/vehicles/BusA.disabled");
    }

    #[test]
    fn test_mark_then_strip_round_trips() {
        for name in ["BusA", "Bus A (v2)", "BusA.disabled"] {
            let marked = mark_disabled(name);
            assert_eq!(is_disabled(&marked), (true, name));
        }
    }

    #[test]
    fn test_is_disabled_strips_suffix() {
        assert_eq!(is_disabled("BusB.disabled"), (true, "BusB"));
        assert_eq!(is_disabled("BusB"), (false, "BusB"));
    }

    #[test]
    fn test_suffix_match_is_exact() {
        // Case and partial matches are not the convention.
        assert_eq!(is_disabled("BusB.DISABLED"), (false, "BusB.DISABLED"));
        assert_eq!(is_disabled("BusB.disable"), (false, "BusB.disable"));
        assert_eq!(is_disabled("Bus.disabled.old"), (false, "Bus.disabled.old"));
    }

    #[test]
    fn test_only_last_suffix_is_stripped() {
        assert_eq!(is_disabled("BusB.disabled.disabled"), (true, "BusB.disabled"));
    }

    #[test]
    fn test_bare_suffix_is_not_disabled() {
        assert_eq!(is_disabled(".disabled"), (false, ".disabled"));
    }
}
