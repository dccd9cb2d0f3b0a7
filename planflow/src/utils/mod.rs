//! Utility functions for ids, timestamps and duration strings.

mod duration;
mod ids;
mod timestamps;

pub use duration::{parse_duration, DurationParseError};
pub use ids::{generate_uuid, generate_uuid_v7, stable_uuid};
pub use timestamps::{
    deadline_after, earliest, format_iso8601, iso_timestamp, now_utc, Timestamp,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_uuid_is_valid() {
        let id = generate_uuid();
        assert_eq!(id.get_version_num(), 4);
    }

    #[test]
    fn test_stable_uuid_depends_only_on_name() {
        assert_eq!(stable_uuid("pipeline.stages"), stable_uuid("pipeline.stages"));
        assert_ne!(stable_uuid("pipeline.stages"), stable_uuid("pipeline.stage"));
    }
}
