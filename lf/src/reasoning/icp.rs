//! Local ICP heuristic scoring

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::IcpConfig;
use crate::domain::{COMPANY_KEYS, RawAttributes, TITLE_KEYS, Verdict};

use super::LeadScore;

const EMPLOYEE_KEYS: &[&str] = &["employee_count", "employees", "company_size"];
const LOCATION_KEYS: &[&str] = &["location", "country", "region"];

/// Scores leads against an ideal customer profile without an LLM call
#[derive(Debug, Clone)]
pub struct IcpScorer {
    icp: IcpConfig,
}

impl IcpScorer {
    pub fn new(icp: IcpConfig) -> Self {
        Self { icp }
    }

    pub fn score(&self, attributes: &RawAttributes) -> LeadScore {
        let industry = attributes.get_str("industry");
        let title = attributes.get_first_str(TITLE_KEYS);
        let location = attributes.get_first_str(LOCATION_KEYS);
        let employees = EMPLOYEE_KEYS.iter().find_map(|key| attributes.get_i64(key));
        debug!(
            company = ?attributes.get_first_str(COMPANY_KEYS),
            ?industry,
            ?title,
            "IcpScorer::score: called"
        );

        let industry_match = industry.is_some_and(|i| self.icp.industries.iter().any(|t| t.eq_ignore_ascii_case(i)));
        let employee_count_match =
            employees.is_some_and(|n| self.icp.employee_count.min <= n && n <= self.icp.employee_count.max);
        let location_match = location.is_some_and(|l| contains_any(l, &self.icp.locations));
        let job_title_match = title.is_some_and(|t| contains_any(t, &self.icp.job_titles));
        let is_excluded_title = title.is_some_and(|t| contains_any(t, &self.icp.excluded_titles));

        let weights = &self.icp.weights;
        let mut total = weights.base_score;
        let mut reasons = vec![format!("Base score of {} points.", weights.base_score)];

        let mut add = |matched: bool, points: i32, hit: &str, miss: &str| {
            if matched {
                total += points;
                reasons.push(format!("{:+} for {}.", points, hit));
            } else {
                reasons.push(format!("+0 for {}.", miss));
            }
        };
        add(industry_match, weights.industry_match, "matching industry", "non-target industry");
        add(
            employee_count_match,
            weights.employee_count_within_range,
            "employee count in range",
            "employee count out of range",
        );
        add(location_match, weights.location_match, "matching location", "non-target location");
        add(job_title_match, weights.job_title_match, "target job title", "non-target job title");
        if is_excluded_title {
            total += weights.excluded_title;
            reasons.push(format!("{:+} for excluded job title.", weights.excluded_title));
        }

        let score = total.clamp(0, 100) as u8;
        let verdict = if is_excluded_title {
            reasons.push("Final status: NOT_QUALIFIED due to excluded title.".to_string());
            Verdict::NotQualified
        } else if score < 30 {
            reasons.push("Final status: NOT_QUALIFIED due to low score.".to_string());
            Verdict::NotQualified
        } else if score >= 70 {
            reasons.push("Final status: QUALIFIED due to high score.".to_string());
            Verdict::Qualified
        } else {
            reasons.push("Final status: NEEDS_REVIEW due to score in the middle range.".to_string());
            Verdict::NeedsReview
        };

        let matched_criteria = BTreeMap::from([
            ("industry_match".to_string(), industry_match),
            ("employee_count_match".to_string(), employee_count_match),
            ("location_match".to_string(), location_match),
            ("job_title_match".to_string(), job_title_match),
            ("is_excluded_title".to_string(), is_excluded_title),
        ]);

        LeadScore {
            score,
            verdict,
            reasoning: reasons.join(" "),
            matched_criteria,
        }
    }
}

fn contains_any(value: &str, needles: &[String]) -> bool {
    let value = value.to_lowercase();
    needles.iter().any(|n| !n.is_empty() && value.contains(&n.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmployeeRange, IcpWeights};
    use serde_json::json;

    fn scorer() -> IcpScorer {
        IcpScorer::new(IcpConfig {
            industries: vec!["SaaS".to_string(), "Fintech".to_string()],
            employee_count: EmployeeRange { min: 50, max: 1000 },
            locations: vec!["USA".to_string(), "Canada".to_string()],
            job_titles: vec!["VP of Sales".to_string(), "Head of Growth".to_string()],
            excluded_titles: vec!["Intern".to_string()],
            preferred_crms: vec![],
            weights: IcpWeights::default(),
        })
    }

    fn attrs(value: serde_json::Value) -> RawAttributes {
        match value {
            serde_json::Value::Object(map) => map.into(),
            _ => RawAttributes::new(),
        }
    }

    #[test]
    fn test_perfect_match_is_qualified() {
        let score = scorer().score(&attrs(json!({
            "company": "Acme",
            "industry": "saas",
            "employee_count": "250",
            "location": "Austin, USA",
            "job_title": "VP of Sales"
        })));
        assert_eq!(score.score, 100);
        assert_eq!(score.verdict, Verdict::Qualified);
        assert!(score.matched_criteria["job_title_match"]);
        assert!(score.reasoning.contains("+25 for matching industry."));
    }

    #[test]
    fn test_excluded_title_disqualifies() {
        let score = scorer().score(&attrs(json!({
            "industry": "SaaS",
            "employee_count": 200,
            "location": "USA",
            "title": "Sales Intern"
        })));
        // 10 + 25 + 20 + 15 - 50
        assert_eq!(score.score, 20);
        assert_eq!(score.verdict, Verdict::NotQualified);
        assert!(score.matched_criteria["is_excluded_title"]);
    }

    #[test]
    fn test_middle_band_needs_review() {
        let score = scorer().score(&attrs(json!({
            "industry": "Fintech",
            "employee_count": 5000,
            "location": "Germany"
        })));
        assert_eq!(score.score, 35);
        assert_eq!(score.verdict, Verdict::NeedsReview);
    }

    #[test]
    fn test_empty_lead_is_clamped_and_rejected() {
        let score = scorer().score(&RawAttributes::new());
        assert_eq!(score.score, 10);
        assert_eq!(score.verdict, Verdict::NotQualified);
        assert_eq!(score.matched_criteria.len(), 5);
    }
}
