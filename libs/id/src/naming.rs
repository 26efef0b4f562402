//! Instance naming convention.

use crate::VoyageId;

/// Suffix of the storage instance name.
pub const STORAGE_SUFFIX: &str = "-storage";

/// Marker between the voyage ID and a ship's index.
pub const SHIP_MARKER: &str = "-ship";

impl VoyageId {
    /// Name of the voyage's storage instance.
    #[must_use]
    pub fn storage_name(&self) -> String {
        format!("{self}{STORAGE_SUFFIX}")
    }

    /// Name of the ship instance at `index`.
    #[must_use]
    pub fn ship_name(&self, index: usize) -> String {
        format!("{self}{SHIP_MARKER}{index}")
    }

    /// Extracts the ship index from an instance name.
    ///
    /// Returns `None` unless `name` is exactly `ship_name(i)` for some `i`.
    #[must_use]
    pub fn ship_index(&self, name: &str) -> Option<usize> {
        let suffix = name
            .strip_prefix(self.to_string().as_str())?
            .strip_prefix(SHIP_MARKER)?;

        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if suffix.len() > 1 && suffix.starts_with('0') {
            return None;
        }

        suffix.parse().ok()
    }

    /// Git branch the voyage works on.
    #[must_use]
    pub fn branch(&self) -> String {
        self.to_string()
    }

    /// Task namespace shared by all ships of the voyage.
    #[must_use]
    pub fn task_namespace(&self) -> String {
        format!("{self}-tasks")
    }
}

/// Session window name for the ship at `index`.
#[must_use]
pub fn window_name(index: usize) -> String {
    format!("ship-{index}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fixed_id() -> VoyageId {
        VoyageId::from_bytes([0xab, 0xcd, 0xef, 0x01, 0x23, 0x45])
    }

    #[test]
    fn test_storage_name() {
        assert_eq!(fixed_id().storage_name(), "voyage-abcdef012345-storage");
    }

    #[test]
    fn test_ship_name_has_no_separator_before_index() {
        assert_eq!(fixed_id().ship_name(7), "voyage-abcdef012345-ship7");
    }

    #[test]
    fn test_ship_index_rejects_non_ship_names() {
        let id = fixed_id();
        assert_eq!(id.ship_index(&id.storage_name()), None);
        assert_eq!(id.ship_index("voyage-abcdef012345-ship"), None);
        assert_eq!(id.ship_index("voyage-abcdef012345-ship-1"), None);
        assert_eq!(id.ship_index("voyage-abcdef012345-ship+1"), None);
        assert_eq!(id.ship_index("voyage-abcdef012345-ship01"), None);
        assert_eq!(id.ship_index("voyage-abcdef012345-ship1a"), None);
        assert_eq!(id.ship_index("voyage-000000000000-ship1"), None);
    }

    #[test]
    fn test_derived_names() {
        let id = fixed_id();
        assert_eq!(id.branch(), "voyage-abcdef012345");
        assert_eq!(id.task_namespace(), "voyage-abcdef012345-tasks");
        assert_eq!(window_name(3), "ship-3");
    }

    proptest! {
        #[test]
        fn ship_names_are_distinct_and_invertible(bytes in any::<[u8; 6]>(), count in 1usize..64) {
            let id = VoyageId::from_bytes(bytes);
            let names: Vec<String> = (0..count).map(|i| id.ship_name(i)).collect();

            let unique: std::collections::HashSet<_> = names.iter().collect();
            prop_assert_eq!(unique.len(), count);

            for (i, name) in names.iter().enumerate() {
                prop_assert!(name.starts_with(&id.to_string()));
                prop_assert_eq!(id.ship_index(name), Some(i));
            }
        }

        #[test]
        fn other_voyages_ships_do_not_match(a in any::<[u8; 6]>(), b in any::<[u8; 6]>(), i in 0usize..1000) {
            prop_assume!(a != b);
            let ours = VoyageId::from_bytes(a);
            let theirs = VoyageId::from_bytes(b);
            prop_assert_eq!(ours.ship_index(&theirs.ship_name(i)), None);
        }
    }
}
