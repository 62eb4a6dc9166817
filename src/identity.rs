use std::fmt::Display;
use uuid::Uuid;

/// UUIDv5 in the DNS namespace over the `/`-joined field values.
pub fn record_id(fields: &[&dyn Display]) -> Uuid {
    let joined = fields
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("/");
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, joined.as_bytes())
}

pub fn record_id_for(title: &str, year: i32, genre: &str, description: &str) -> Uuid {
    record_id(&[&title, &year, &genre, &description])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_fields_same_id() {
        let a = record_id_for("Movie One", 2001, "Drama", "A man finds a box.");
        let b = record_id_for("Movie One", 2001, "Drama", "A man finds a box.");
        assert_eq!(a, b);
        assert_eq!(a.get_version_num(), 5);
    }

    #[test]
    fn any_field_change_changes_id() {
        let base = record_id_for("Movie One", 2001, "Drama", "A man finds a box.");
        assert_ne!(base, record_id_for("Movie Two", 2001, "Drama", "A man finds a box."));
        assert_ne!(base, record_id_for("Movie One", 2002, "Drama", "A man finds a box."));
        assert_ne!(base, record_id_for("Movie One", 2001, "Comedy", "A man finds a box."));
        assert_ne!(base, record_id_for("Movie One", 2001, "Drama", "A man loses a box."));
    }

    #[test]
    fn matches_joined_string_form() {
        let expected = Uuid::new_v5(&Uuid::NAMESPACE_DNS, b"Movie One/2001/Drama/A man finds a box.");
        assert_eq!(
            record_id_for("Movie One", 2001, "Drama", "A man finds a box."),
            expected
        );
    }
}
