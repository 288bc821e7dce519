//! Synonym sets for keyword expansion.

use std::collections::BTreeMap;

use dutyflow_features::{term_sounds_like, tokenize};
use serde::{Deserialize, Serialize};

/// Synonym groups keyed by canonical term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Lexicon {
    pub product_types: BTreeMap<String, Vec<String>>,
    pub demographics: BTreeMap<String, Vec<String>>,
    pub materials: BTreeMap<String, Vec<String>>,
}

impl Default for Lexicon {
    fn default() -> Self {
        Self {
            product_types: groups(&[
                ("t-shirt", &["t-shirt", "tshirt", "tee", "singlet", "tank top", "undershirt"]),
                ("shirt", &["shirt", "blouse", "shirt-blouse"]),
                ("sweater", &["sweater", "pullover", "sweatshirt", "cardigan", "jersey", "waistcoat"]),
                ("trousers", &["trousers", "pants", "breeches", "shorts", "overalls", "bib and brace"]),
                ("dress", &["dress"]),
                ("skirt", &["skirt", "divided skirt"]),
                ("jacket", &["jacket", "blazer", "anorak", "windbreaker", "coat", "overcoat", "parka"]),
                ("suit", &["suit", "ensemble"]),
                ("sleepwear", &["pajamas", "nightshirt", "nightdress", "bathrobe", "dressing gown"]),
                ("hosiery", &["hosiery", "socks", "stockings", "tights", "pantyhose"]),
                ("gloves", &["gloves", "mittens", "mitts"]),
                ("footwear", &["footwear", "shoes", "boots", "sandals", "slippers", "sneakers"]),
                ("headgear", &["hats", "caps", "headgear", "beanie"]),
            ]),
            demographics: groups(&[
                ("men", &["men", "man", "male", "gentlemen"]),
                ("boys", &["boys"]),
                ("women", &["women", "woman", "female", "ladies"]),
                ("girls", &["girls"]),
                ("children", &["children", "child", "kids", "infants", "babies", "toddlers"]),
                ("unisex", &["unisex"]),
            ]),
            materials: groups(&[
                ("cotton", &["cotton"]),
                ("wool", &["wool", "fine animal hair", "cashmere"]),
                ("synthetic", &["synthetic", "man-made", "polyester", "nylon", "acrylic", "artificial"]),
                ("silk", &["silk"]),
                ("linen", &["linen", "flax"]),
                ("leather", &["leather"]),
                ("rubber", &["rubber", "plastics"]),
            ]),
        }
    }
}

fn groups(entries: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
    entries
        .iter()
        .map(|(key, terms)| (key.to_string(), terms.iter().map(|t| t.to_string()).collect()))
        .collect()
}

/// User terms after synonym expansion.
#[derive(Debug, Default)]
pub(crate) struct Expansion {
    /// Every term to look for, matched exactly
    pub terms: Vec<String>,
    /// User terms no group knows; only these may match a label loosely
    pub unresolved: Vec<String>,
}

/// Expand user terms through a synonym map.
///
/// A term belonging to a group (as its key or one of its synonyms) pulls in
/// the whole group. A misspelled term joins the one group it sounds like.
/// Anything else stands for itself.
pub(crate) fn expand(map: &BTreeMap<String, Vec<String>>, terms: &[String]) -> Expansion {
    let mut out = Expansion::default();
    for term in terms {
        let wanted = tokenize(term);
        if wanted.is_empty() {
            continue;
        }

        let mut matched: Vec<&String> = map
            .iter()
            .filter(|(key, synonyms)| tokenize(key) == wanted || synonyms.iter().any(|s| tokenize(s) == wanted))
            .map(|(key, _)| key)
            .collect();
        if matched.is_empty() {
            matched = map
                .iter()
                .filter(|(key, synonyms)| {
                    std::iter::once(*key)
                        .chain(synonyms.iter())
                        .any(|s| term_sounds_like(&tokenize(s), term, &[]))
                })
                .map(|(key, _)| key)
                .collect();
            if matched.len() > 1 {
                matched.clear();
            }
        }

        if matched.is_empty() {
            push_unique(&mut out.terms, term);
            push_unique(&mut out.unresolved, term);
        }
        for key in matched {
            push_unique(&mut out.terms, key);
            for synonym in &map[key] {
                push_unique(&mut out.terms, synonym);
            }
        }
    }
    out
}

/// Every token used anywhere in the map.
pub(crate) fn vocabulary(map: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    let mut out = Vec::new();
    for (key, synonyms) in map {
        for term in std::iter::once(key).chain(synonyms.iter()) {
            for token in tokenize(term) {
                push_unique(&mut out, &token);
            }
        }
    }
    out
}

/// Synonyms of every group the user did *not* ask for.
pub(crate) fn competing(map: &BTreeMap<String, Vec<String>>, requested: &[String]) -> Vec<String> {
    let requested: Vec<Vec<String>> = requested.iter().map(|t| tokenize(t)).collect();
    let mut out = Vec::new();
    for (key, synonyms) in map {
        for term in std::iter::once(key).chain(synonyms.iter()) {
            if !requested.contains(&tokenize(term)) {
                push_unique(&mut out, term);
            }
        }
    }
    out
}

fn push_unique(out: &mut Vec<String>, term: &str) {
    if !out.iter().any(|t| t == term) {
        out.push(term.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_through_synonym() {
        let lexicon = Lexicon::default();
        let expanded = expand(&lexicon.product_types, &["tees".to_string()]);
        assert!(expanded.terms.contains(&"t-shirt".to_string()));
        assert!(expanded.terms.contains(&"tank top".to_string()));
        assert!(expanded.unresolved.is_empty());
    }

    #[test]
    fn test_unknown_term_stands_alone() {
        let lexicon = Lexicon::default();
        let expanded = expand(&lexicon.product_types, &["kimono".to_string()]);
        assert_eq!(expanded.terms, vec!["kimono".to_string()]);
        assert_eq!(expanded.unresolved, vec!["kimono".to_string()]);
    }

    #[test]
    fn test_misspelled_term_joins_its_group() {
        let lexicon = Lexicon::default();
        let expanded = expand(&lexicon.product_types, &["sweter".to_string()]);
        assert!(expanded.terms.contains(&"pullover".to_string()));
        assert!(expanded.unresolved.is_empty());
    }

    #[test]
    fn test_shorts_stay_in_trousers_group() {
        let lexicon = Lexicon::default();
        let expanded = expand(&lexicon.product_types, &["shorts".to_string()]);
        assert!(expanded.terms.contains(&"trousers".to_string()));
        assert!(!expanded.terms.contains(&"shirt".to_string()));
        assert!(competing(&lexicon.product_types, &expanded.terms).contains(&"shirt".to_string()));
    }

    #[test]
    fn test_competing_excludes_requested_group() {
        let lexicon = Lexicon::default();
        let requested = expand(&lexicon.product_types, &["t-shirt".to_string()]);
        let others = competing(&lexicon.product_types, &requested.terms);
        assert!(others.contains(&"sweater".to_string()));
        assert!(!others.contains(&"singlet".to_string()));
    }

    #[test]
    fn test_vocabulary_tokens() {
        let vocabulary = vocabulary(&Lexicon::default().product_types);
        assert!(vocabulary.contains(&"SHIRT".to_string()));
        assert!(vocabulary.contains(&"TANK".to_string()));
    }
}
