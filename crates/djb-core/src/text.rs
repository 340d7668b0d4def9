//! Pure text helpers: HTML stripping, skill extraction, job-type and
//! experience inference, logo heuristics.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::{ExperienceLevel, JobType, UNKNOWN_COMPANY};

pub const DESCRIPTION_MAX_CHARS: usize = 5000;

static SCRIPT_OR_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript)\b[^>]*>.*?</(script|style|noscript)\s*>")
        .expect("valid script regex")
});
static BLOCK_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<\s*(br|/?p|/?div|/li|/?ul|/?ol|/?h[1-6]|/?tr|/?section|/?article|/?blockquote)\b[^>]*>")
        .expect("valid block regex")
});
static ANY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"));
static NUMERIC_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(x[0-9a-fA-F]+|\d+);").expect("valid entity regex"));
static HORIZONTAL_WS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\r\x0C\u{00A0}]+").expect("valid whitespace regex"));
static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid newline regex"));
static YEARS_EXPERIENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d{1,2})\s*\+?\s*(?:-\s*\d{1,2}\s*)?years?(?:\s+of)?\s+(?:\w+\s+)?experience")
        .expect("valid years regex")
});

const NAMED_ENTITIES: &[(&str, &str)] = &[
    ("&nbsp;", " "),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&apos;", "'"),
    ("&#39;", "'"),
    ("&rsquo;", "'"),
    ("&lsquo;", "'"),
    ("&rdquo;", "\""),
    ("&ldquo;", "\""),
    ("&ndash;", "-"),
    ("&mdash;", "-"),
    ("&hellip;", "..."),
    ("&bull;", "-"),
    ("&middot;", "-"),
    ("&trade;", ""),
    ("&reg;", ""),
    ("&copy;", ""),
    // last so `&amp;lt;` decodes to the literal `&lt;`
    ("&amp;", "&"),
];

pub fn decode_entities(input: &str) -> String {
    let numeric = NUMERIC_ENTITY.replace_all(input, |caps: &regex::Captures<'_>| {
        let body = &caps[1];
        let code = if let Some(hex) = body.strip_prefix('x') {
            u32::from_str_radix(hex, 16).ok()
        } else {
            body.parse::<u32>().ok()
        };
        code.and_then(char::from_u32)
            .map(|c| c.to_string())
            .unwrap_or_default()
    });
    let mut out = numeric.into_owned();
    for (entity, replacement) in NAMED_ENTITIES {
        if out.contains(entity) {
            out = out.replace(entity, replacement);
        }
    }
    out
}

/// Remove markup and entities and collapse whitespace. Pattern based; job
/// bodies are not adversarial input.
pub fn strip_html(input: &str) -> String {
    // ATS feeds ship entity-escaped markup (`&lt;p&gt;`).
    let source = if input.contains("&lt;") && !input.contains('<') {
        decode_entities(input)
    } else {
        input.to_string()
    };

    let without_scripts = SCRIPT_OR_STYLE.replace_all(&source, " ");
    let with_breaks = BLOCK_TAG.replace_all(&without_scripts, "\n");
    let without_tags = ANY_TAG.replace_all(&with_breaks, "");
    let decoded = decode_entities(&without_tags);

    let collapsed = HORIZONTAL_WS.replace_all(&decoded, " ");
    let lines = collapsed
        .split('\n')
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");
    BLANK_LINES.replace_all(&lines, "\n\n").trim().to_string()
}

/// Collapse every whitespace run to a single space.
pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate on a char boundary.
pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => input[..idx].trim_end().to_string(),
        None => input.to_string(),
    }
}

/// Case-insensitive containment. Needles of three characters or fewer must
/// sit on word boundaries so `ui` does not hit `build`.
pub fn contains_term(haystack_lower: &str, needle_lower: &str) -> bool {
    if needle_lower.chars().count() > 3 {
        return haystack_lower.contains(needle_lower);
    }
    contains_word(haystack_lower, needle_lower)
}

/// Containment where both ends of the match border a non-alphanumeric char.
pub fn contains_word(haystack_lower: &str, needle_lower: &str) -> bool {
    if needle_lower.is_empty() {
        return false;
    }
    let mut start = 0;
    while let Some(pos) = haystack_lower[start..].find(needle_lower) {
        let begin = start + pos;
        let end = begin + needle_lower.len();
        let before_ok = haystack_lower[..begin]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = haystack_lower[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
        start = begin + needle_lower.chars().next().map_or(1, char::len_utf8);
    }
    false
}

/// Fixed vocabulary: (lowercase needle, display form). Deliberately
/// permissive; [`filter_skills`] removes the generic entries.
const SKILL_VOCABULARY: &[(&str, &str)] = &[
    ("figma", "Figma"),
    ("figjam", "FigJam"),
    ("sketch", "Sketch"),
    ("adobe xd", "Adobe XD"),
    ("photoshop", "Photoshop"),
    ("illustrator", "Illustrator"),
    ("indesign", "InDesign"),
    ("after effects", "After Effects"),
    ("premiere pro", "Premiere Pro"),
    ("lightroom", "Lightroom"),
    ("adobe creative suite", "Adobe Creative Suite"),
    ("creative cloud", "Adobe Creative Suite"),
    ("framer", "Framer"),
    ("webflow", "Webflow"),
    ("invision", "InVision"),
    ("principle", "Principle"),
    ("protopie", "ProtoPie"),
    ("origami", "Origami Studio"),
    ("zeplin", "Zeplin"),
    ("miro", "Miro"),
    ("axure", "Axure"),
    ("balsamiq", "Balsamiq"),
    ("maze", "Maze"),
    ("usertesting", "UserTesting"),
    ("dovetail", "Dovetail"),
    ("blender", "Blender"),
    ("cinema 4d", "Cinema 4D"),
    ("c4d", "Cinema 4D"),
    ("procreate", "Procreate"),
    ("canva", "Canva"),
    ("rive", "Rive"),
    ("lottie", "Lottie"),
    ("spline", "Spline"),
    ("storybook", "Storybook"),
    ("html", "HTML"),
    ("css", "CSS"),
    ("javascript", "JavaScript"),
    ("react", "React"),
    ("prototyping", "Prototyping"),
    ("wireframing", "Wireframing"),
    ("wireframes", "Wireframing"),
    ("user research", "User Research"),
    ("usability testing", "Usability Testing"),
    ("design systems", "Design Systems"),
    ("design system", "Design Systems"),
    ("interaction design", "Interaction Design"),
    ("visual design", "Visual Design"),
    ("information architecture", "Information Architecture"),
    ("typography", "Typography"),
    ("motion design", "Motion Design"),
    ("animation", "Animation"),
    ("accessibility", "Accessibility"),
    ("wcag", "Accessibility"),
    ("design thinking", "Design Thinking"),
    ("a/b testing", "A/B Testing"),
    ("journey mapping", "Journey Mapping"),
    ("personas", "Personas"),
    ("illustration", "Illustration"),
    ("branding", "Branding"),
    ("brand identity", "Branding"),
    ("art direction", "Art Direction"),
    ("3d", "3D"),
    ("ux writing", "UX Writing"),
    ("content design", "Content Design"),
    // generic terms; extracted, then filtered
    ("design", "Design"),
    ("designer", "Designer"),
    ("senior", "Senior"),
    ("junior", "Junior"),
    ("lead", "Lead"),
    ("remote", "Remote"),
    ("full-time", "Full-time"),
    ("contract", "Contract"),
    ("ux", "UX"),
    ("ui", "UI"),
];

/// Terms that never count as skills.
const GENERIC_TERMS: &[&str] = &[
    "design",
    "designer",
    "designs",
    "senior",
    "junior",
    "lead",
    "principal",
    "staff",
    "mid",
    "entry",
    "head",
    "manager",
    "remote",
    "hybrid",
    "onsite",
    "on-site",
    "full-time",
    "full time",
    "part-time",
    "part time",
    "contract",
    "freelance",
    "internship",
    "intern",
    "usa",
    "us",
    "uk",
    "europe",
    "emea",
    "worldwide",
    "global",
    "anywhere",
    "ux",
    "ui",
    "creative",
];

/// Match the fixed vocabulary against free text.
pub fn extract_skills(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut found = BTreeSet::new();
    for (needle, display) in SKILL_VOCABULARY {
        if contains_word(&lower, needle) {
            found.insert((*display).to_string());
        }
    }
    found.into_iter().collect()
}

/// Drop generic terms and blanks, de-duplicate case-insensitively, sort.
pub fn filter_skills<I, S>(skills: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for skill in skills {
        let trimmed = skill.as_ref().trim();
        let lower = trimmed.to_lowercase();
        if trimmed.is_empty() || GENERIC_TERMS.contains(&lower.as_str()) {
            continue;
        }
        if seen.insert(lower) {
            out.push(trimmed.to_string());
        }
    }
    out.sort();
    out
}

/// Skills from a description plus upstream tags. Tags only count when they
/// hit the vocabulary.
pub fn skills_from(description: &str, tags: &[String]) -> Vec<String> {
    let mut raw = extract_skills(description);
    for tag in tags {
        raw.extend(extract_skills(tag));
    }
    filter_skills(raw)
}

/// Ordered keyword check; first hit wins, default full-time.
pub fn parse_job_type(text: &str) -> JobType {
    let lower = text.to_lowercase().replace('_', "-");
    let any = |needles: &[&str]| needles.iter().any(|n| contains_word(&lower, n));

    if any(&["internship", "intern", "interns"]) {
        JobType::Internship
    } else if any(&["freelance", "freelancer", "freelancing"]) {
        JobType::Freelance
    } else if any(&["contract", "contractor", "temporary", "temp", "fixed-term"]) {
        JobType::Contract
    } else if any(&["part-time", "part time", "parttime"]) {
        JobType::PartTime
    } else {
        JobType::FullTime
    }
}

/// Title keywords first (lead, senior, entry, mid), then a
/// years-of-experience hint from the description; default mid.
pub fn parse_experience_level(title: &str, description: Option<&str>) -> ExperienceLevel {
    let lower = title.to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| contains_word(&lower, n));

    if any(&["lead", "principal", "staff", "head", "director", "vp", "chief"]) {
        return ExperienceLevel::Lead;
    }
    if any(&["senior", "sr", "sr.", "snr", "iii"]) {
        return ExperienceLevel::Senior;
    }
    if any(&["junior", "jr", "jr.", "entry", "entry-level", "intern", "internship", "graduate", "apprentice"]) {
        return ExperienceLevel::Entry;
    }
    if any(&["mid", "mid-level", "intermediate"]) {
        return ExperienceLevel::Mid;
    }

    let years = description
        .and_then(|d| YEARS_EXPERIENCE.captures(d))
        .and_then(|caps| caps[1].parse::<u32>().ok());
    match years {
        Some(y) if y >= 5 => ExperienceLevel::Senior,
        Some(y) if y <= 1 => ExperienceLevel::Entry,
        _ => ExperienceLevel::Mid,
    }
}

const COMPANY_SUFFIXES: &[&str] = &[
    "inc", "inc.", "llc", "ltd", "ltd.", "gmbh", "corp", "corp.", "co", "co.", "limited", "plc",
    "s.a.", "sa", "bv", "ag",
];

/// Best-effort logo URL derived from a domain-like slug of the company name.
pub fn company_logo_url(company: &str) -> Option<String> {
    let trimmed = company.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(UNKNOWN_COMPANY) {
        return None;
    }
    let slug = trimmed
        .to_lowercase()
        .split_whitespace()
        .filter(|w| !COMPANY_SUFFIXES.contains(&w.trim_end_matches(',')))
        .collect::<String>()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '.')
        .collect::<String>()
        .trim_matches('.')
        .to_string();
    if slug.is_empty() {
        return None;
    }
    let domain = if slug.contains('.') { slug } else { format!("{slug}.com") };
    Some(format!("https://www.google.com/s2/favicons?domain={domain}&sz=128"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_html_removes_tags_scripts_and_entities() {
        let html = "<div><h2>About</h2><p>We&rsquo;re hiring&nbsp;a <b>designer</b>.</p>\
                    <script>alert('x')</script><ul><li>Figma</li><li>Research &amp; testing</li></ul></div>";
        let text = strip_html(html);
        assert_eq!(text, "About\n\nWe're hiring a designer.\n\nFigma\nResearch & testing");
    }

    #[test]
    fn strip_html_handles_escaped_markup() {
        let escaped = "&lt;p&gt;Own the &lt;strong&gt;design system&lt;/strong&gt;&lt;/p&gt;";
        assert_eq!(strip_html(escaped), "Own the design system");
    }

    #[test]
    fn numeric_entities_decode() {
        assert_eq!(decode_entities("caf&#233; &#x2014; ok"), "café — ok");
    }

    #[test]
    fn truncate_is_char_safe() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo");
        assert_eq!(truncate_chars("short", 50), "short");
    }

    #[test]
    fn short_terms_need_word_boundaries() {
        assert!(contains_term("senior ui designer", "ui"));
        assert!(!contains_term("build tools", "ui"));
        assert!(contains_term("ux/ui lead", "ux"));
        assert!(contains_term("graphic designer", "graphic"));
    }

    #[test]
    fn skill_filtering_drops_generic_terms() {
        let skills = skills_from("Senior Figma Designer needed, remote", &[]);
        assert_eq!(skills, vec!["Figma".to_string()]);
    }

    #[test]
    fn extraction_is_permissive_before_filtering() {
        let raw = extract_skills("Senior Figma Designer needed, remote");
        assert!(raw.contains(&"Senior".to_string()));
        assert!(raw.contains(&"Remote".to_string()));
        assert!(raw.contains(&"Designer".to_string()));
    }

    #[test]
    fn tags_contribute_only_vocabulary_hits() {
        let tags = vec!["design".to_string(), "Sketch".to_string(), "crypto".to_string()];
        let skills = skills_from("Work on our design system in Figma.", &tags);
        assert_eq!(
            skills,
            vec!["Design Systems".to_string(), "Figma".to_string(), "Sketch".to_string()]
        );
    }

    #[test]
    fn job_type_priority() {
        assert_eq!(parse_job_type("Design Intern (Summer)"), JobType::Internship);
        assert_eq!(parse_job_type("International brand designer"), JobType::FullTime);
        assert_eq!(parse_job_type("Freelance illustrator, contract basis"), JobType::Freelance);
        assert_eq!(parse_job_type("CONTRACTOR"), JobType::Contract);
        assert_eq!(parse_job_type("part_time"), JobType::PartTime);
        assert_eq!(parse_job_type("FULLTIME"), JobType::FullTime);
        assert_eq!(parse_job_type(""), JobType::FullTime);
    }

    #[test]
    fn experience_level_priority_and_default() {
        assert_eq!(parse_experience_level("Lead Product Designer", None), ExperienceLevel::Lead);
        assert_eq!(parse_experience_level("Sr. UX Designer", None), ExperienceLevel::Senior);
        assert_eq!(parse_experience_level("Junior Visual Designer", None), ExperienceLevel::Entry);
        assert_eq!(parse_experience_level("Product Designer", None), ExperienceLevel::Mid);
        assert_eq!(
            parse_experience_level("Product Designer", Some("You have 6+ years of experience shipping")),
            ExperienceLevel::Senior
        );
        assert_eq!(
            parse_experience_level("Brand Designer", Some("1 year of professional experience")),
            ExperienceLevel::Entry
        );
        assert_eq!(
            parse_experience_level("Senior Designer, Lead Generation team", None),
            ExperienceLevel::Lead
        );
    }

    #[test]
    fn logo_heuristic() {
        assert_eq!(
            company_logo_url("Linear, Inc.").as_deref(),
            Some("https://www.google.com/s2/favicons?domain=linear.com&sz=128")
        );
        assert_eq!(company_logo_url("  "), None);
        assert_eq!(company_logo_url(UNKNOWN_COMPANY), None);
    }
}
