//! UUID generation.

use uuid::Uuid;

/// Namespace for ids derived from definition paths.
const DEFINITION_NAMESPACE: Uuid = Uuid::from_u128(0x6a1f_3c2e_9b4d_4e7a_8f21_5d0c_b7e4_1a93);

/// Generates a new UUID v4.
#[must_use]
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}

/// Generates a new UUID v7 (time-ordered).
#[must_use]
pub fn generate_uuid_v7() -> Uuid {
    Uuid::now_v7()
}

/// Derives a stable UUID v5 from a name.
///
/// The same name always yields the same id, so re-building a plan from the
/// same definition produces the same plan node ids.
#[must_use]
pub fn stable_uuid(name: &str) -> Uuid {
    Uuid::new_v5(&DEFINITION_NAMESPACE, name.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_uuid_is_deterministic() {
        let a = stable_uuid("pipeline/stages/[0]/stage");
        let b = stable_uuid("pipeline/stages/[0]/stage");
        let c = stable_uuid("pipeline/stages/[1]/stage");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.get_version_num(), 5);
    }

    #[test]
    fn test_v7_ordering() {
        let a = generate_uuid_v7();
        let b = generate_uuid_v7();
        assert!(a <= b);
    }
}
