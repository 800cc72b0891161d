//! Admission classifier — decides whether an inbound sender looks like a
//! real-estate agency or broker worth engaging.
//!
//! Rules are evaluated in order, first match wins:
//! 1. Known counterparty → accept (1.0)
//! 2. Allow-listed address → accept (1.0)
//! 3. Business profile score ≥ 0.6 → accept
//! 4. Content score: ≥ 0.7 accept, [0.3, 0.7) reject with clarification, else reject
//!
//! The only side effect is the counterparty lookup. A failed lookup rejects.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::config::AdmissionConfig;
use crate::pipeline::types::{MatchedAgency, ProfileMetadata, VerificationResult};
use crate::store::traits::CounterpartyStore;

pub const ACCEPT_THRESHOLD: f32 = 0.7;
pub const CLARIFY_THRESHOLD: f32 = 0.3;
pub const PROFILE_ACCEPT_THRESHOLD: f32 = 0.6;

const DOMAIN_KEYWORDS: &[&str] = &[
    "imobiliaria",
    "corretor",
    "corretora",
    "imovel",
    "imoveis",
    "apartamento",
    "casa",
    "terreno",
    "aluguel",
    "locacao",
    "venda",
    "creci",
    "condominio",
    "lancamento",
    "cobertura",
    "kitnet",
    "sobrado",
    "sala comercial",
];

const BUSINESS_KEYWORDS: &[&str] = &[
    "empresa",
    "equipe",
    "atendimento",
    "clientes",
    "portfolio",
    "carteira",
    "parceria",
    "negocio",
    "comissao",
    "captacao",
];

const DOMAIN_CATEGORIES: &[&str] = &[
    "real estate",
    "real estate agent",
    "imobiliaria",
    "corretor de imoveis",
    "property management",
];

static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| keyword_regex(DOMAIN_KEYWORDS));
static BUSINESS_RE: LazyLock<Regex> = LazyLock::new(|| keyword_regex(BUSINESS_KEYWORDS));

/// "I work with / I offer" phrasing, on normalized text.
static OFFER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:trabalh(?:o|amos) com|oferec(?:o|emos)|tenho\b.{0,60}\bdisponive(?:l|is)|sou corretora?|somos (?:uma )?imobiliaria)\b",
    )
    .unwrap()
});

/// Phone number, e-mail, CRECI registration or URL.
static CONTACT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \(?\b\d{2}\)?\s?9?\d{4}[-\s]?\d{4}\b     # phone
        | [\w.+-]+@[\w-]+\.[\w.]+                 # e-mail
        | \bcreci\b[\s:/-]*[a-z]{0,2}[\s-]*\d{3,} # CRECI number
        | \bhttps?://\S+ | \bwww\.\S+             # URL
        ",
    )
    .unwrap()
});

/// Up to four capitalised words.
const NAME: &str = r"(\p{Lu}[\w'&-]*(?:\s+\p{Lu}[\w'&-]*){0,3})";

static NAME_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        format!(r"(?i:\bsou\s+(?:o|a))\s+{NAME}"),
        format!(r"(?i:\baqui\s+(?:e|é)\s+(?:o|a))\s+{NAME}"),
        format!(r"(?i:\bmeu\s+nome\s+(?:e|é))\s+{NAME}"),
        format!(r"(?i:\bda\s+imobili[aá]ria)\s+{NAME}"),
        r"(\p{Lu}[\w'&-]*(?:\s+\p{Lu}[\w'&-]*){0,2}\s+(?i:im[oó]veis))\b".to_string(),
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

fn keyword_regex(keywords: &[&str]) -> Regex {
    let alternation = keywords
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"\b(?:{alternation})\b")).unwrap()
}

/// Lowercase and strip diacritics ("Imóveis" → "imoveis").
pub fn normalize(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Distinct keywords from `re` found in `normalized`.
fn distinct_hits<'t>(re: &Regex, normalized: &'t str) -> Vec<&'t str> {
    let mut seen = HashSet::new();
    re.find_iter(normalized)
        .map(|m| m.as_str())
        .filter(|k| seen.insert(*k))
        .collect()
}

/// Breakdown of the free-text score.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentScore {
    pub score: f32,
    pub domain_hits: usize,
    pub business_hits: usize,
    pub offer_phrase: bool,
    pub contact: bool,
}

impl ContentScore {
    fn describe(&self) -> String {
        let mut parts = vec![
            format!("{} domain", self.domain_hits),
            format!("{} business", self.business_hits),
        ];
        if self.offer_phrase {
            parts.push("offer phrase".into());
        }
        if self.contact {
            parts.push("contact".into());
        }
        format!("content score {:.2} ({})", self.score, parts.join(", "))
    }
}

/// Score free text against the keyword model.
pub fn score_content(text: &str) -> ContentScore {
    let normalized = normalize(text);
    let domain_hits = distinct_hits(&DOMAIN_RE, &normalized).len();
    let business_hits = distinct_hits(&BUSINESS_RE, &normalized).len();
    let offer_phrase = OFFER_RE.is_match(&normalized);
    let contact = CONTACT_RE.is_match(&normalized);

    let raw = 0.3 * domain_hits as f32
        + 0.15 * business_hits as f32
        + if offer_phrase { 0.2 } else { 0.0 }
        + if contact { 0.15 } else { 0.0 };

    ContentScore {
        score: raw.min(1.0),
        domain_hits,
        business_hits,
        offer_phrase,
        contact,
    }
}

/// Base score from a business profile: 0.9 for a domain category, 0.8 for a
/// domain keyword anywhere in the profile, else 0.
pub fn profile_base_score(profile: &ProfileMetadata) -> f32 {
    let category_match = profile
        .categories
        .iter()
        .map(|c| normalize(c.trim()))
        .any(|c| DOMAIN_CATEGORIES.contains(&c.as_str()));
    if category_match {
        return 0.9;
    }

    let text = [
        profile.display_name.as_deref().unwrap_or_default(),
        profile.description.as_deref().unwrap_or_default(),
        profile.categories.join(" ").as_str(),
    ]
    .join(" ");
    if DOMAIN_RE.is_match(&normalize(&text)) {
        0.8
    } else {
        0.0
    }
}

/// Name to register a new counterparty under.
///
/// The profile's display name wins; otherwise the first matching
/// self-introduction in the message, else `"Agency <address>"`.
pub fn extract_display_name(
    text: &str,
    profile: Option<&ProfileMetadata>,
    channel_address: &str,
) -> String {
    if let Some(name) = profile
        .and_then(|p| p.display_name.as_deref())
        .map(str::trim)
        .filter(|n| !n.is_empty())
    {
        return name.to_string();
    }

    NAME_PATTERNS
        .iter()
        .find_map(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("Agency {channel_address}"))
}

pub struct AdmissionClassifier {
    counterparties: Arc<dyn CounterpartyStore>,
    allowlist: HashSet<String>,
}

impl AdmissionClassifier {
    pub fn new(counterparties: Arc<dyn CounterpartyStore>, config: &AdmissionConfig) -> Self {
        Self {
            counterparties,
            allowlist: config.allowlist.iter().cloned().collect(),
        }
    }

    pub async fn classify(
        &self,
        channel_address: &str,
        text: &str,
        profile: Option<&ProfileMetadata>,
    ) -> VerificationResult {
        match self.counterparties.find_by_address(channel_address).await {
            Ok(Some(existing)) => {
                let mut result = VerificationResult::accept(1.0, "known counterparty");
                result.matched = Some(MatchedAgency {
                    counterparty_id: existing.id,
                    display_name: existing.display_name,
                    channel_address: existing.channel_address,
                });
                return result;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Counterparty lookup failed, rejecting message");
                return VerificationResult::reject(0.0, "admission lookup unavailable");
            }
        }

        if self.allowlist.contains(channel_address) {
            return VerificationResult::accept(1.0, "allow-listed address");
        }

        let content = score_content(text);

        if let Some(profile) = profile {
            let base = profile_base_score(profile);
            let score = (base + 0.3 * content.score).min(1.0);
            debug!(base, score, "Profile score");
            if score >= PROFILE_ACCEPT_THRESHOLD {
                return VerificationResult::accept(
                    score,
                    format!("profile score {score:.2}, {}", content.describe()),
                );
            }
        }

        if content.score >= ACCEPT_THRESHOLD {
            VerificationResult::accept(content.score, content.describe())
        } else {
            let mut result = VerificationResult::reject(content.score, content.describe());
            result.needs_clarification = content.score >= CLARIFY_THRESHOLD;
            result
        }
    }
}
