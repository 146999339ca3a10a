use std::{collections::HashMap, fs, io, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One cascade entry: unlocking `achievement_id` forces `stat_id` to at least
/// `required_value` and unlocks any sibling achievement on the same stat whose
/// threshold is already covered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeRule {
    pub achievement_id: String,
    pub stat_id: String,
    pub required_value: i32,
}

/// Cascade rules for a single title.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CascadeRuleSet {
    rules: Vec<CascadeRule>,
}

impl CascadeRuleSet {
    pub fn new(rules: Vec<CascadeRule>) -> Self {
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rule_for(&self, achievement_id: &str) -> Option<&CascadeRule> {
        self.rules
            .iter()
            .find(|rule| rule.achievement_id == achievement_id)
    }

    /// Commit ordering key: achievements without a rule write first.
    pub fn threshold(&self, achievement_id: &str) -> i32 {
        self.rule_for(achievement_id)
            .map(|rule| rule.required_value)
            .unwrap_or(0)
    }

    pub fn rules_on_stat<'a>(
        &'a self,
        stat_id: &'a str,
    ) -> impl Iterator<Item = &'a CascadeRule> + 'a {
        self.rules.iter().filter(move |rule| rule.stat_id == stat_id)
    }
}

/// All configured cascade rules, keyed by title identifier. Loaded from an
/// external YAML file so the engine itself carries no game-specific tables.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct CascadeRuleBook {
    titles: HashMap<String, CascadeRuleSet>,
}

impl CascadeRuleBook {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("failed to parse cascade rule file")
    }

    /// An absent rule file just means no title has cascade rules.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no cascade rule file");
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read {}", path.display()))
            }
        };
        Self::from_yaml_str(&contents)
    }

    pub fn rules_for(&self, game_id: &str) -> Option<&CascadeRuleSet> {
        self.titles.get(game_id).filter(|set| !set.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::{CascadeRule, CascadeRuleBook, CascadeRuleSet};

    #[test]
    fn rule_book_parses_yaml() {
        let yaml = r#"
"17390":
  - achievement_id: DestroyUnits500
    stat_id: UnitsDestroyed
    required_value: 500
  - achievement_id: DestroyUnits5000
    stat_id: UnitsDestroyed
    required_value: 5000
"#;
        let book = CascadeRuleBook::from_yaml_str(yaml).expect("parse");
        let rules = book.rules_for("17390").expect("title present");
        assert_eq!(rules.threshold("DestroyUnits5000"), 5000);
        assert_eq!(rules.threshold("Unmapped"), 0);
        assert_eq!(rules.rules_on_stat("UnitsDestroyed").count(), 2);
        assert!(book.rules_for("440").is_none());
    }

    #[test]
    fn empty_rule_set_is_treated_as_absent() {
        let book = CascadeRuleBook::from_yaml_str("\"440\": []\n").expect("parse");
        assert!(book.rules_for("440").is_none());
    }

    #[test]
    fn rule_lookup_by_achievement() {
        let set = CascadeRuleSet::new(vec![CascadeRule {
            achievement_id: "A".into(),
            stat_id: "S".into(),
            required_value: 10,
        }]);
        assert_eq!(set.rule_for("A").map(|r| r.required_value), Some(10));
        assert!(set.rule_for("B").is_none());
    }
}
