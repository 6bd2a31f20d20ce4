use url::Url;

/// One search session's worth of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchTask {
    pub index: usize,
    pub query: String,
    pub location: String,
    pub search_text: String,
    pub target: usize,
}

impl SearchTask {
    pub fn search_url(&self) -> String {
        let mut url = Url::parse("https://www.google.com/maps/search/")
            .expect("maps search url is valid");
        url.path_segments_mut()
            .map(|mut segments| {
                segments.pop_if_empty().push(&self.search_text);
            })
            .ok();
        url.query_pairs_mut().append_pair("hl", "en");
        url.to_string()
    }
}

const PHRASINGS: [&str; 5] = [
    "{query} in {location}",
    "{query} near {location}",
    "best {query} in {location}",
    "top rated {query} in {location}",
    "{query} {location}",
];

/// Ordered, finite task sequence covering a target result count.
///
/// A single maps search stops paginating after `per_search` results, so larger
/// targets are spread over differently phrased searches for the same thing.
pub struct QueryPlan {
    query: String,
    location: String,
    remaining: usize,
    per_search: usize,
    next_phrasing: usize,
}

pub fn plan(query: &str, location: &str, target: usize, per_search: usize) -> QueryPlan {
    let query = query.split_whitespace().collect::<Vec<&str>>().join(" ");
    let remaining = match query.is_empty() {
        true => 0,
        false => target,
    };

    QueryPlan {
        query,
        location: location.split_whitespace().collect::<Vec<&str>>().join(" "),
        remaining,
        per_search: per_search.max(1),
        next_phrasing: 0,
    }
}

impl QueryPlan {
    fn phrase(&self, template: &str) -> String {
        match self.location.is_empty() {
            true => self.query.clone(),
            false => template
                .replace("{query}", &self.query)
                .replace("{location}", &self.location),
        }
    }
}

impl Iterator for QueryPlan {
    type Item = SearchTask;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 || self.next_phrasing >= PHRASINGS.len() {
            return None;
        }
        // Without a location every phrasing collapses to the bare query.
        if self.location.is_empty() && self.next_phrasing > 0 {
            return None;
        }

        let index = self.next_phrasing;
        let target = self.remaining.min(self.per_search);
        let search_text = self.phrase(PHRASINGS[index]);

        self.next_phrasing += 1;
        self.remaining -= target;

        Some(SearchTask {
            index,
            query: self.query.clone(),
            location: self.location.clone(),
            search_text,
            target,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::plan;

    #[test]
    fn small_target_is_a_single_task() {
        let tasks: Vec<_> = plan("pizza", "Chicago", 10, 120).collect();

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].search_text, "pizza in Chicago");
        assert_eq!(tasks[0].target, 10);
    }

    #[test]
    fn large_target_is_spread_over_phrasings() {
        let tasks: Vec<_> = plan("pizza", "Chicago", 250, 120).collect();

        assert_eq!(
            tasks.iter().map(|t| t.target).collect::<Vec<_>>(),
            vec![120, 120, 10]
        );
        assert_eq!(tasks[1].search_text, "pizza near Chicago");
        assert_eq!(tasks[2].search_text, "best pizza in Chicago");
        assert_eq!(tasks.iter().map(|t| t.index).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn plan_is_finite_even_for_huge_targets() {
        let tasks: Vec<_> = plan("pizza", "Chicago", 1_000_000, 120).collect();

        assert_eq!(tasks.len(), 5);
    }

    #[test]
    fn plan_is_consumed_once() {
        let mut plan = plan("pizza", "Chicago", 10, 120);

        assert!(plan.next().is_some());
        assert!(plan.next().is_none());
        assert!(plan.next().is_none());
    }

    #[test]
    fn blank_inputs_produce_no_tasks() {
        assert_eq!(plan("   ", "Chicago", 10, 120).count(), 0);
        assert_eq!(plan("pizza", "Chicago", 0, 120).count(), 0);
    }

    #[test]
    fn missing_location_uses_bare_query_once() {
        let tasks: Vec<_> = plan(" coffee  roasters ", "", 500, 120).collect();

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].search_text, "coffee roasters");
        assert_eq!(tasks[0].target, 120);
    }

    #[test]
    fn search_url_encodes_the_search_text() {
        let task = plan("pizza", "Chicago", 10, 120).next().unwrap();

        assert_eq!(
            task.search_url(),
            "https://www.google.com/maps/search/pizza%20in%20Chicago?hl=en"
        );
    }
}
