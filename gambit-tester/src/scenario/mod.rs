mod catalog;

use crate::harness::Step;

pub use catalog::catalog_scenarios;

/// A scripted session replay. The script may vary with the seed.
#[derive(Debug, Clone, Copy)]
pub struct Scenario {
    pub key: &'static str,
    pub description: &'static str,
    pub smoke: bool,
    pub script: fn(u64) -> Vec<Step>,
}

pub fn list_scenarios() -> Vec<(&'static str, &'static str)> {
    catalog_scenarios()
        .iter()
        .map(|s| (s.key, s.description))
        .collect()
}

pub fn find_scenario(key: &str) -> Option<Scenario> {
    catalog_scenarios().into_iter().find(|s| s.key == key)
}

/// Expand `all` and `smoke` into scenario keys; other names pass through.
pub fn expand_scenarios(requested: &[String]) -> Vec<String> {
    let mut keys = Vec::new();
    for name in requested {
        let group: Vec<String> = match name.as_str() {
            "all" => catalog_scenarios().iter().map(|s| s.key.to_string()).collect(),
            "smoke" => catalog_scenarios()
                .iter()
                .filter(|s| s.smoke)
                .map(|s| s.key.to_string())
                .collect(),
            other => vec![other.to_string()],
        };
        for key in group {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_unique() {
        let mut keys: Vec<_> = list_scenarios().into_iter().map(|(k, _)| k).collect();
        let total = keys.len();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), total);
    }

    #[test]
    fn groups_expand_without_duplicates() {
        let all = expand_scenarios(&["all".to_string()]);
        assert_eq!(all.len(), catalog_scenarios().len());
        let mixed = expand_scenarios(&["smoke".to_string(), "all".to_string()]);
        assert_eq!(mixed.len(), all.len());
        let smoke = expand_scenarios(&["smoke".to_string()]);
        assert!(!smoke.is_empty() && smoke.len() < all.len());
    }

    #[test]
    fn unknown_names_pass_through() {
        assert_eq!(expand_scenarios(&["nope".to_string()]), vec!["nope"]);
        assert!(find_scenario("nope").is_none());
        assert!(find_scenario("turn-repair").is_some());
    }
}
