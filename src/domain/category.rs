use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Category {
    Restaurant,
    Retail,
    Service,
    Healthcare,
    Entertainment,
    Accommodation,
    Education,
    Automotive,
    Finance,
    #[default]
    Uncategorized,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Restaurant => "Restaurant",
            Category::Retail => "Retail",
            Category::Service => "Service",
            Category::Healthcare => "Healthcare",
            Category::Entertainment => "Entertainment",
            Category::Accommodation => "Accommodation",
            Category::Education => "Education",
            Category::Automotive => "Automotive",
            Category::Finance => "Finance",
            Category::Uncategorized => "Uncategorized",
        }
    }

    pub fn is_default(&self) -> bool {
        *self == Category::Uncategorized
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let all = [
            Category::Restaurant,
            Category::Retail,
            Category::Service,
            Category::Healthcare,
            Category::Entertainment,
            Category::Accommodation,
            Category::Education,
            Category::Automotive,
            Category::Finance,
            Category::Uncategorized,
        ];
        all.into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("{} is not a known category", s))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CategoryRule {
    pub category: Category,
    pub keywords: Vec<String>,
}

impl CategoryRule {
    fn new(category: Category, keywords: &[&str]) -> Self {
        CategoryRule {
            category,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Rules are evaluated in order; the first one with a matching keyword wins.
pub fn default_rules() -> Vec<CategoryRule> {
    vec![
        CategoryRule::new(
            Category::Restaurant,
            &[
                "restaurant", "cafe", "café", "diner", "food", "pizza", "pizzeria", "burger",
                "bar", "grill", "kitchen", "bistro", "bakery", "steakhouse", "sushi", "taqueria",
            ],
        ),
        CategoryRule::new(
            Category::Healthcare,
            &[
                "hospital", "clinic", "dentist", "dental", "pharmacy", "medical", "health",
                "wellness", "therapy", "physiotherapy", "doctor", "optometrist",
            ],
        ),
        CategoryRule::new(
            Category::Accommodation,
            &["hotel", "motel", "inn", "resort", "lodging", "bnb", "guesthouse", "hostel"],
        ),
        CategoryRule::new(
            Category::Education,
            &["school", "university", "college", "academy", "training", "education", "tutoring"],
        ),
        CategoryRule::new(
            Category::Automotive,
            &["car", "auto", "automotive", "mechanic", "dealership", "tire", "tyre", "car wash"],
        ),
        CategoryRule::new(
            Category::Finance,
            &["bank", "finance", "insurance", "accounting", "accountant", "financial", "credit"],
        ),
        CategoryRule::new(
            Category::Entertainment,
            &[
                "theater", "theatre", "cinema", "museum", "park", "gym", "fitness",
                "entertainment", "venue", "bowling", "arcade",
            ],
        ),
        CategoryRule::new(
            Category::Retail,
            &[
                "store", "shop", "boutique", "market", "supermarket", "mall", "retail",
                "clothing", "fashion", "grocery",
            ],
        ),
        CategoryRule::new(
            Category::Service,
            &[
                "salon", "spa", "repair", "cleaning", "consulting", "service", "agency", "studio",
                "barber", "plumber", "electrician", "laundry",
            ],
        ),
    ]
}

struct CompiledRule {
    category: Category,
    phrases: Vec<Vec<String>>,
}

pub struct Classifier {
    rules: Vec<CompiledRule>,
}

impl Default for Classifier {
    fn default() -> Self {
        Classifier::from_rules(default_rules())
    }
}

impl Classifier {
    pub fn from_rules(rules: Vec<CategoryRule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| CompiledRule {
                category: rule.category,
                phrases: rule
                    .keywords
                    .iter()
                    .map(|k| tokenize(k))
                    .filter(|tokens| !tokens.is_empty())
                    .collect(),
            })
            .collect();

        Classifier { rules }
    }

    /// The category hint is consulted first, then the business name, then the
    /// place introduction.
    pub fn classify(
        &self,
        category_hint: Option<&str>,
        name: &str,
        introduction: Option<&str>,
    ) -> Category {
        [
            category_hint.unwrap_or_default(),
            name,
            introduction.unwrap_or_default(),
        ]
            .iter()
            .map(|text| tokenize(text))
            .filter(|tokens| !tokens.is_empty())
            .find_map(|tokens| self.match_tokens(&tokens))
            .unwrap_or_default()
    }

    fn match_tokens(&self, tokens: &[String]) -> Option<Category> {
        self.rules
            .iter()
            .find(|rule| {
                rule.phrases
                    .iter()
                    .any(|phrase| tokens.windows(phrase.len()).any(|w| w == phrase.as_slice()))
            })
            .map(|rule| rule.category)
    }
}

/// Lowercased words with plural endings stripped. Compounds such as
/// "autohaus" stay a single word and match nothing.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(stem)
        .collect()
}

fn stem(word: &str) -> String {
    let len = word.chars().count();
    if len > 4 {
        if let Some(root) = word.strip_suffix("ies") {
            return format!("{}y", root);
        }
    }
    if len > 3 && !["ss", "us", "is"].iter().any(|end| word.ends_with(end)) {
        if let Some(root) = word.strip_suffix('s') {
            return root.to_string();
        }
    }
    word.to_string()
}

#[cfg(test)]
mod tests {
    use super::{Category, CategoryRule, Classifier};

    #[test]
    fn hint_drives_classification() {
        let classifier = Classifier::default();

        assert_eq!(
            classifier.classify(Some("Pizza restaurant"), "Lou Malnati's", None),
            Category::Restaurant
        );
        assert_eq!(
            classifier.classify(Some("Dental clinic"), "Smile Bar", None),
            Category::Healthcare
        );
    }

    #[test]
    fn name_is_used_when_hint_does_not_match() {
        let classifier = Classifier::default();

        assert_eq!(
            classifier.classify(Some("Point of interest"), "Wicker Park Bowling", None),
            Category::Entertainment
        );
        assert_eq!(classifier.classify(None, "Chicago Auto Repair", None), Category::Automotive);
    }

    #[test]
    fn keywords_match_whole_words_only() {
        let classifier = Classifier::default();

        // "barber" must not hit the restaurant keyword "bar", nor "cardinal" hit "car".
        assert_eq!(classifier.classify(None, "Cardinal Barber", None), Category::Service);
    }

    #[test]
    fn plural_words_match_singular_keywords() {
        let classifier = Classifier::default();

        assert_eq!(classifier.classify(Some("Pizzas"), "", None), Category::Restaurant);
        assert_eq!(
            classifier.classify(None, "Lakeview Bakeries", None),
            Category::Restaurant
        );
        assert_eq!(
            classifier.classify(Some("Cleaning services"), "", None),
            Category::Service
        );
        // "wellness" keeps its trailing s.
        assert_eq!(classifier.classify(None, "Wellness", None), Category::Healthcare);
        assert_eq!(classifier.classify(None, "Autohaus Schmidt", None), Category::Uncategorized);
    }

    #[test]
    fn introduction_is_the_last_resort() {
        let classifier = Classifier::default();

        assert_eq!(
            classifier.classify(
                Some("Point of interest"),
                "The Loop Corner",
                Some("Family-run bakery serving kolaches since 1988.")
            ),
            Category::Restaurant
        );
        assert_eq!(
            classifier.classify(
                Some("Hotel"),
                "The Loop Corner",
                Some("Family-run bakery serving kolaches since 1988.")
            ),
            Category::Accommodation
        );
    }

    #[test]
    fn unmatched_input_falls_back_to_default() {
        let classifier = Classifier::default();

        let category = classifier.classify(Some(""), "Zyxx Holdings", None);

        assert_eq!(category, Category::Uncategorized);
        assert!(category.is_default());
        assert_eq!(classifier.classify(None, "", None), Category::Uncategorized);
    }

    #[test]
    fn custom_rule_table_with_phrases() {
        let classifier = Classifier::from_rules(vec![CategoryRule {
            category: Category::Automotive,
            keywords: vec!["car wash".to_string()],
        }]);

        assert_eq!(classifier.classify(Some("Self-service car wash"), "", None), Category::Automotive);
        assert_eq!(classifier.classify(Some("car dealer"), "", None), Category::Uncategorized);
    }

    #[test]
    fn category_parses_case_insensitively() {
        assert_eq!("restaurant".parse::<Category>(), Ok(Category::Restaurant));
        assert_eq!("Uncategorized".parse::<Category>(), Ok(Category::Uncategorized));
        assert!("Bakery".parse::<Category>().is_err());
    }
}
