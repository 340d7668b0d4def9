//! Rule-based design-job classifier.
//!
//! Tiers run in order and the first decisive tier wins:
//!
//! 1. hard exclusion on the title (beats every positive signal)
//! 2. required design vocabulary in the title
//! 3. strong anchored title patterns
//! 4. core design-title whitelist
//! 5. tag fallback: a design tag *and* a design-tool tag
//!
//! The rules prefer false negatives to false positives.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::text::contains_term;

/// Role names that disqualify a title outright.
const EXCLUDED_TITLE_TERMS: &[&str] = &[
    "software engineer",
    "software developer",
    "frontend engineer",
    "front-end engineer",
    "front end engineer",
    "backend engineer",
    "back-end engineer",
    "full stack",
    "fullstack",
    "full-stack",
    "data engineer",
    "data scientist",
    "data analyst",
    "machine learning",
    "ml engineer",
    "devops",
    "site reliability",
    "sre",
    "qa engineer",
    "test engineer",
    "engineering manager",
    "developer",
    "programmer",
    "product manager",
    "product owner",
    "project manager",
    "program manager",
    "marketing manager",
    "marketing specialist",
    "marketing coordinator",
    "growth marketer",
    "performance marketing",
    "seo",
    "copywriter",
    "content writer",
    "social media manager",
    "account executive",
    "account manager",
    "sales",
    "business development",
    "recruiter",
    "talent acquisition",
    "customer success",
    "customer support",
    "support specialist",
    "operations manager",
    "office manager",
    "accountant",
    "financial analyst",
    "business analyst",
    "solutions architect",
    "software architect",
    "security engineer",
    "mechanical",
    "electrical",
    "civil engineer",
    "interior design",
    "landscape design",
    "fashion design",
    "floral design",
    "kitchen design",
    "nail technician",
    "hair stylist",
];

/// Title must contain at least one of these to be considered at all.
const REQUIRED_TITLE_TERMS: &[&str] = &[
    "design",
    "ux",
    "ui",
    "user experience",
    "user interface",
    "user research",
    "ux research",
    "creative",
    "art director",
    "illustrat",
    "visual",
    "brand",
    "graphic",
    "motion",
    "animator",
    "typograph",
    "interaction",
    "figma",
];

static STRONG_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\bdesigners?\b",
        r"(?i)\bux\b",
        r"(?i)\bui\b",
        r"(?i)\bart director\b",
        r"(?i)\bcreative director\b",
        r"(?i)\billustrator\b",
        r"(?i)\bhead of design\b",
        r"(?i)\bdesign (lead|manager|director|researcher|technologist)\b",
        r"(?i)\b(ux|user) researcher\b",
        r"(?i)\bmotion graphics?\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid classifier pattern"))
    .collect()
});

/// Unambiguous design titles.
const CORE_DESIGN_TITLES: &[&str] = &[
    "product design",
    "visual design",
    "interaction design",
    "brand design",
    "graphic design",
    "web design",
    "user experience",
    "user interface",
    "design systems",
    "content design",
    "service design",
    "experience design",
];

/// Tags that label a posting as design work.
const DESIGN_TAGS: &[&str] = &[
    "design",
    "designer",
    "ux",
    "ui",
    "ui/ux",
    "ux/ui",
    "ux design",
    "ui design",
    "product design",
    "graphic design",
    "visual design",
    "web design",
    "brand design",
    "interaction design",
];

/// Tags naming a recognized design tool.
const DESIGN_TOOL_TAGS: &[&str] = &[
    "figma",
    "sketch",
    "adobe xd",
    "xd",
    "photoshop",
    "illustrator",
    "indesign",
    "after effects",
    "adobe creative suite",
    "framer",
    "invision",
    "webflow",
    "protopie",
    "principle",
    "zeplin",
    "blender",
    "cinema 4d",
    "procreate",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Excluded,
    MissingRequiredTerm,
    StrongPattern,
    CoreTitle,
    TagFallback,
    Inconclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub accepted: bool,
    pub tier: Tier,
}

impl Verdict {
    fn accept(tier: Tier) -> Self {
        Self { accepted: true, tier }
    }

    fn reject(tier: Tier) -> Self {
        Self { accepted: false, tier }
    }
}

fn title_hits(title_lower: &str, terms: &[&str]) -> bool {
    terms.iter().any(|t| contains_term(title_lower, t))
}

/// Classify with the tier that decided. `description` is accepted as part
/// of the contract but no tier reads it.
pub fn classify<S: AsRef<str>>(title: &str, tags: &[S], _description: Option<&str>) -> Verdict {
    let title_lower = title.to_lowercase();

    if title_hits(&title_lower, EXCLUDED_TITLE_TERMS) {
        return Verdict::reject(Tier::Excluded);
    }
    if !title_hits(&title_lower, REQUIRED_TITLE_TERMS) {
        return Verdict::reject(Tier::MissingRequiredTerm);
    }
    if STRONG_PATTERNS.iter().any(|re| re.is_match(title)) {
        return Verdict::accept(Tier::StrongPattern);
    }
    if CORE_DESIGN_TITLES.iter().any(|t| title_lower.contains(t)) {
        return Verdict::accept(Tier::CoreTitle);
    }

    let tags_lower: Vec<String> = tags
        .iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .collect();
    let has_design_tag = tags_lower.iter().any(|t| DESIGN_TAGS.contains(&t.as_str()));
    let has_tool_tag = tags_lower
        .iter()
        .any(|t| DESIGN_TOOL_TAGS.contains(&t.as_str()));
    if has_design_tag && has_tool_tag {
        return Verdict::accept(Tier::TagFallback);
    }
    Verdict::reject(Tier::Inconclusive)
}

/// Whether a raw posting is an in-scope design job.
pub fn is_design_job<S: AsRef<str>>(title: &str, tags: &[S], description: Option<&str>) -> bool {
    classify(title, tags, description).accepted
}

/// Cheap title-only pass (tiers 1 and 2) run before spending a detail
/// fetch; survivors still go through [`is_design_job`].
pub fn passes_title_prefilter(title: &str) -> bool {
    let title_lower = title.to_lowercase();
    !title_hits(&title_lower, EXCLUDED_TITLE_TERMS) && title_hits(&title_lower, REQUIRED_TITLE_TERMS)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_TAGS: &[&str] = &[];

    #[test]
    fn exclusion_beats_every_positive_signal() {
        let verdict = classify("UX Designer / Software Engineer", &["design", "figma"], None);
        assert_eq!(verdict, Verdict::reject(Tier::Excluded));
        assert!(!is_design_job("Design Systems Developer", NO_TAGS, None));
        assert!(!is_design_job("Product Manager, Design Tools", NO_TAGS, None));
    }

    #[test]
    fn required_term_gate() {
        let verdict = classify("Office Coordinator", &["design", "figma"], None);
        assert_eq!(verdict.tier, Tier::MissingRequiredTerm);
        assert!(!verdict.accepted);
        assert!(!is_design_job("Build Coordinator", NO_TAGS, None));
    }

    #[test]
    fn strong_patterns_accept() {
        for title in [
            "Senior Product Designer",
            "UX Lead",
            "Art Director",
            "Freelance Illustrator",
            "Design Manager, Growth",
            "UX Researcher",
        ] {
            assert_eq!(classify(title, NO_TAGS, None).tier, Tier::StrongPattern, "{title}");
        }
    }

    #[test]
    fn core_titles_accept() {
        let verdict = classify("Head of Product Design", NO_TAGS, None);
        assert!(verdict.accepted);
        let verdict = classify("Visual Design Specialist", NO_TAGS, None);
        assert_eq!(verdict, Verdict::accept(Tier::CoreTitle));
    }

    #[test]
    fn tag_fallback_requires_co_occurrence() {
        assert!(!is_design_job("Creative Specialist", &["design"], None));
        assert!(!is_design_job("Creative Specialist", &["figma"], None));
        let verdict = classify("Creative Specialist", &["design", "figma"], None);
        assert_eq!(verdict, Verdict::accept(Tier::TagFallback));
    }

    #[test]
    fn description_never_rescues_a_title() {
        assert!(!is_design_job(
            "Creative Specialist",
            NO_TAGS,
            Some("Daily work in Figma on our design system")
        ));
    }

    #[test]
    fn prefilter_runs_only_first_two_tiers() {
        assert!(passes_title_prefilter("Creative Specialist"));
        assert!(!passes_title_prefilter("Senior Software Engineer"));
        assert!(!passes_title_prefilter("Account Coordinator"));
    }
}
