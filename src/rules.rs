use crate::config::{ResponseRule, ResponsesConfig};

/// Keyword → reply table. Keywords are stored case-folded.
#[derive(Debug, Clone)]
pub struct ResponseRules {
    rules: Vec<ResponseRule>,
    default_response: String,
}

impl ResponseRules {
    pub fn new(rules: Vec<ResponseRule>, default_response: impl Into<String>) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| ResponseRule {
                keyword: rule.keyword.to_lowercase(),
                reply: rule.reply,
            })
            .collect();
        Self {
            rules,
            default_response: default_response.into(),
        }
    }

    pub fn from_config(config: &ResponsesConfig) -> Self {
        Self::new(config.rules.clone(), config.default_response.clone())
    }

    /// Reply of the first rule whose keyword occurs in `text`, else the default.
    pub fn select(&self, text: &str) -> &str {
        let normalized = text.to_lowercase();
        self.rules
            .iter()
            .find(|rule| normalized.contains(&rule.keyword))
            .map(|rule| rule.reply.as_str())
            .unwrap_or(self.default_response.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(keyword: &str, reply: &str) -> ResponseRule {
        ResponseRule {
            keyword: keyword.to_string(),
            reply: reply.to_string(),
        }
    }

    fn shop_rules() -> ResponseRules {
        ResponseRules::new(
            vec![rule("price", "It's $10"), rule("hours", "9-5")],
            "Thanks!",
        )
    }

    #[test]
    fn test_keyword_match_is_case_insensitive() {
        assert_eq!(shop_rules().select("What are your HOURS?"), "9-5");
        assert_eq!(shop_rules().select("What are your hours?"), "9-5");
    }

    #[test]
    fn test_default_when_nothing_matches() {
        assert_eq!(shop_rules().select("hello"), "Thanks!");
        assert_eq!(shop_rules().select(""), "Thanks!");
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let rules = shop_rules();
        assert_eq!(rules.select("price and hours please"), "It's $10");
        assert_eq!(rules.select("hours and price please"), "It's $10");
    }

    #[test]
    fn test_uppercase_keyword_in_config() {
        let rules = ResponseRules::new(vec![rule("Menu", "See bio")], "Thanks!");
        assert_eq!(rules.select("can I see the menu"), "See bio");
    }

    #[test]
    fn test_no_rules_always_default() {
        let rules = ResponseRules::new(Vec::new(), "Hi there");
        assert_eq!(rules.select("price"), "Hi there");
    }
}
