//! Prefixed unique ids.

use uuid::Uuid;

/// Generate a unique id with a short entity prefix, e.g. `evt_6f9a…`.
///
/// The prefix makes ids self-describing in logs; the body is a v4 uuid in
/// simple (dashless) form.
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_prefix() {
        let id = new_id("room");
        assert!(id.starts_with("room_"));
        assert_eq!(id.len(), "room_".len() + 32);
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(new_id("evt"), new_id("evt"));
    }
}
