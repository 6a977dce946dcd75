//! Friendly-message mapping for remote service errors.
//!
//! Remote error text is matched against a configuration table of
//! substring rules (first hit wins) rather than hard-coded switch arms,
//! so deployments can extend the set without a rebuild.

use nebo_domain::config::FriendlyPattern;

/// Map raw remote error text to a plain-language sentence.
pub fn map(table: &[FriendlyPattern], raw: &str) -> String {
    let lower = raw.to_lowercase();
    for rule in table {
        if lower.contains(&rule.contains.to_lowercase()) {
            return rule.message.clone();
        }
    }
    format!("Something went wrong talking to NeboLoop: {raw}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use nebo_domain::config::CommConfig;

    #[test]
    fn default_table_covers_already_a_member() {
        let table = CommConfig::default().friendly_messages;
        assert_eq!(
            map(&table, "HTTP 409: user is already a member of this loop"),
            "You're already in this loop."
        );
    }

    #[test]
    fn matching_is_case_insensitive_first_hit_wins() {
        let table = vec![
            FriendlyPattern {
                contains: "EXPIRED".into(),
                message: "first".into(),
            },
            FriendlyPattern {
                contains: "expired code".into(),
                message: "second".into(),
            },
        ];
        assert_eq!(map(&table, "Expired Code"), "first");
    }

    #[test]
    fn unmatched_text_gets_the_generic_wrapper() {
        let mapped = map(&[], "weird backend glitch");
        assert!(mapped.contains("weird backend glitch"));
        assert!(mapped.starts_with("Something went wrong"));
    }
}
