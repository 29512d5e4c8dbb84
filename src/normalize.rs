// src/normalize.rs
//! Raw source records → canonical [`Paper`].

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate};
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::NormalizationError;
use crate::ingest::types::{ArxivEntry, BiorxivItem, CrossrefItem, RawRecord, ScholarPaper};
use crate::model::{Fingerprint, Paper, SourceName};

pub const TITLE_MAX_CHARS: usize = 300;
pub const ABSTRACT_MAX_CHARS: usize = 2000;
pub const MAX_AUTHORS: usize = 20;

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[a-z][^>]*>").unwrap());
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static RE_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(title|abstract|summary)\s*[:.\-]\s*").unwrap());
static RE_HONORIFIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(dr|prof|professor|mr|mrs|ms|mx)\.?\s+").unwrap());
static RE_ARXIV_VERSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"v\d+$").unwrap());
static RE_DOI_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(https?://(dx\.)?doi\.org/|doi:\s*)").unwrap()
});

/// Decode entities, drop markup (including JATS), collapse whitespace, strip a leading
/// `Title:`/`Abstract:` label and cap the length.
pub fn clean_text(s: &str, max_chars: usize) -> String {
    let decoded = html_escape::decode_html_entities(s);
    let untagged = RE_TAGS.replace_all(&decoded, " ");
    let collapsed = RE_WS.replace_all(&untagged, " ");
    let mut out = RE_LABEL.replace(collapsed.trim(), "").trim().to_string();
    if out.chars().count() > max_chars {
        out = out.chars().take(max_chars).collect::<String>().trim_end().to_string();
    }
    out
}

/// Lower-cased title with punctuation removed and whitespace collapsed. Feeds the fingerprint.
pub fn title_key(title: &str) -> String {
    let lowered: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Bare, lower-cased DOI or `None` for blank input.
pub fn clean_doi(s: &str) -> Option<String> {
    let bare = RE_DOI_PREFIX.replace(s.trim(), "");
    let bare = bare.trim().to_lowercase();
    (!bare.is_empty()).then_some(bare)
}

pub fn clean_author(s: &str) -> Option<String> {
    let collapsed = RE_WS.replace_all(s.trim(), " ");
    let stripped = RE_HONORIFIC.replace(&collapsed, "");
    let name = stripped.trim().trim_end_matches(',').trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// `http://arxiv.org/abs/2405.01234v2` → `2405.01234`; old-style ids keep their archive prefix.
pub fn arxiv_id(raw: &str) -> String {
    let tail = raw
        .trim()
        .split_once("/abs/")
        .map(|(_, t)| t)
        .unwrap_or(raw.trim());
    RE_ARXIV_VERSION.replace(tail, "").to_string()
}

/// Identity half of the fingerprint: DOI when known, otherwise the source-scoped id.
pub fn identity(doi: Option<&str>, source: SourceName, source_id: &str) -> String {
    match doi {
        Some(d) => format!("doi:{d}"),
        None => format!("{}:{}", source.as_str(), source_id.trim().to_lowercase()),
    }
}

/// SHA-256 over `title_key | identity`, hex encoded.
pub fn fingerprint(title: &str, identity: &str) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(title_key(title).as_bytes());
    hasher.update(b"|");
    hasher.update(identity.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    Fingerprint(out)
}

fn clean_categories<I, S>(it: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    it.into_iter()
        .map(|c| c.as_ref().trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect()
}

fn clean_authors<I, S>(it: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    it.into_iter()
        .filter_map(|a| clean_author(a.as_ref()))
        .take(MAX_AUTHORS)
        .collect()
}

fn required(
    source: SourceName,
    field: &str,
    value: Option<String>,
    max_chars: usize,
) -> Result<String, NormalizationError> {
    value
        .map(|v| clean_text(&v, max_chars))
        .filter(|v| !v.is_empty())
        .ok_or_else(|| NormalizationError::new(source, format!("missing {field}")))
}

fn parse_ymd(source: SourceName, s: &str) -> Result<NaiveDate, NormalizationError> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.date_naive());
    }
    let head = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .map_err(|e| NormalizationError::new(source, format!("bad date '{s}': {e}")))
}

/// Assemble the canonical paper once the per-shape mapping has produced its fields.
struct Draft {
    source: SourceName,
    source_id: String,
    title: String,
    abstract_text: String,
    authors: Vec<String>,
    published_at: NaiveDate,
    url: Option<String>,
    categories: BTreeSet<String>,
    doi: Option<String>,
    /// Overrides the source-scoped identity (e.g. an arXiv id found on another source).
    alt_identity: Option<String>,
}

impl Draft {
    fn finish(self) -> Paper {
        let id_key = match (&self.doi, &self.alt_identity) {
            (None, Some(alt)) => alt.clone(),
            _ => identity(self.doi.as_deref(), self.source, &self.source_id),
        };
        let fp = fingerprint(&self.title, &id_key);
        // DOI resolver first, then arXiv abstract page, then whatever the source gave.
        let url = match (&self.doi, self.source) {
            (Some(doi), _) => format!("https://doi.org/{doi}"),
            (None, SourceName::Arxiv) => format!("https://arxiv.org/abs/{}", self.source_id),
            (None, _) => self.url.unwrap_or_default(),
        };
        Paper {
            source_id: self.source_id,
            source_name: self.source,
            title: self.title,
            abstract_text: self.abstract_text,
            authors: self.authors,
            published_at: self.published_at,
            url,
            categories: self.categories,
            doi: self.doi,
            fingerprint: fp,
        }
    }
}

fn from_arxiv(e: ArxivEntry) -> Result<Draft, NormalizationError> {
    let src = SourceName::Arxiv;
    let source_id = e
        .id
        .as_deref()
        .map(arxiv_id)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| NormalizationError::new(src, "missing id"))?;
    let title = required(src, "title", e.title, TITLE_MAX_CHARS)?;
    let published = e
        .published
        .ok_or_else(|| NormalizationError::new(src, "missing published"))?;
    Ok(Draft {
        source: src,
        published_at: parse_ymd(src, &published)?,
        abstract_text: clean_text(e.summary.as_deref().unwrap_or_default(), ABSTRACT_MAX_CHARS),
        authors: clean_authors(e.authors),
        categories: clean_categories(e.categories),
        doi: e.doi.as_deref().and_then(clean_doi),
        url: None,
        alt_identity: None,
        source_id,
        title,
    })
}

fn crossref_date(item: &CrossrefItem) -> Option<NaiveDate> {
    [&item.published_print, &item.published_online, &item.issued]
        .into_iter()
        .flatten()
        .find_map(|d| {
            let parts = d.date_parts.first()?;
            let year = (*parts.first()?)?;
            let month = parts.get(1).copied().flatten().unwrap_or(1);
            let day = parts.get(2).copied().flatten().unwrap_or(1);
            NaiveDate::from_ymd_opt(year, u32::try_from(month).ok()?, u32::try_from(day).ok()?)
        })
}

fn from_crossref(item: CrossrefItem) -> Result<Draft, NormalizationError> {
    let src = SourceName::Crossref;
    let doi = item
        .doi
        .as_deref()
        .and_then(clean_doi)
        .ok_or_else(|| NormalizationError::new(src, "missing DOI"))?;
    let title = required(src, "title", item.title.first().cloned(), TITLE_MAX_CHARS)?;
    let published_at =
        crossref_date(&item).ok_or_else(|| NormalizationError::new(src, "missing or invalid date-parts"))?;
    let authors = clean_authors(item.author.iter().map(|a| match (&a.given, &a.family) {
        (Some(g), Some(f)) => format!("{g} {f}"),
        (None, Some(f)) => f.clone(),
        _ => a.name.clone().or_else(|| a.given.clone()).unwrap_or_default(),
    }));
    Ok(Draft {
        source: src,
        source_id: doi.clone(),
        abstract_text: clean_text(item.abstract_text.as_deref().unwrap_or_default(), ABSTRACT_MAX_CHARS),
        categories: clean_categories(&item.subject),
        url: item.url,
        doi: Some(doi),
        alt_identity: None,
        published_at,
        authors,
        title,
    })
}

fn from_biorxiv(item: BiorxivItem) -> Result<Draft, NormalizationError> {
    let src = item.server;
    let doi = item
        .doi
        .as_deref()
        .and_then(clean_doi)
        .ok_or_else(|| NormalizationError::new(src, "missing doi"))?;
    let title = required(src, "title", item.title, TITLE_MAX_CHARS)?;
    let date = item
        .date
        .ok_or_else(|| NormalizationError::new(src, "missing date"))?;
    let host = match src {
        SourceName::Medrxiv => "www.medrxiv.org",
        _ => "www.biorxiv.org",
    };
    let version = item.version.as_deref().map(str::trim).unwrap_or("1");
    Ok(Draft {
        source: src,
        source_id: doi.clone(),
        published_at: parse_ymd(src, &date)?,
        abstract_text: clean_text(item.abstract_text.as_deref().unwrap_or_default(), ABSTRACT_MAX_CHARS),
        authors: clean_authors(item.authors.as_deref().unwrap_or_default().split(';')),
        categories: clean_categories(item.category.as_deref()),
        url: Some(format!("https://{host}/content/{doi}v{version}")),
        doi: Some(doi),
        alt_identity: None,
        title,
    })
}

fn from_scholar(p: ScholarPaper) -> Result<Draft, NormalizationError> {
    let src = SourceName::SemanticScholar;
    let source_id = p
        .paper_id
        .clone()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| NormalizationError::new(src, "missing paperId"))?;
    let title = required(src, "title", p.title, TITLE_MAX_CHARS)?;
    let published_at = match (p.publication_date.as_deref(), p.year) {
        (Some(d), _) => parse_ymd(src, d)?,
        (None, Some(y)) => NaiveDate::from_ymd_opt(y, 1, 1)
            .ok_or_else(|| NormalizationError::new(src, format!("bad year {y}")))?,
        (None, None) => return Err(NormalizationError::new(src, "missing publicationDate")),
    };
    let ext = p.external_ids.unwrap_or_default();
    let doi = ext.doi.as_deref().and_then(clean_doi);
    // Without a DOI, an arXiv id lets this record collapse with the arXiv copy.
    let alt_identity = ext
        .arxiv
        .as_deref()
        .map(arxiv_id)
        .filter(|id| !id.is_empty())
        .map(|id| identity(None, SourceName::Arxiv, &id));
    Ok(Draft {
        source: src,
        abstract_text: clean_text(p.abstract_text.as_deref().unwrap_or_default(), ABSTRACT_MAX_CHARS),
        authors: clean_authors(p.authors.into_iter().filter_map(|a| a.name)),
        categories: clean_categories(p.fields_of_study.unwrap_or_default()),
        url: p
            .url
            .or_else(|| Some(format!("https://www.semanticscholar.org/paper/{source_id}"))),
        source_id,
        doi,
        alt_identity,
        published_at,
        title,
    })
}

/// Map one raw record. Each source shape has its own mapping.
pub fn normalize(raw: RawRecord) -> Result<Paper, NormalizationError> {
    let draft = match raw {
        RawRecord::Arxiv(e) => from_arxiv(e),
        RawRecord::Crossref(i) => from_crossref(i),
        RawRecord::Biorxiv(i) => from_biorxiv(i),
        RawRecord::SemanticScholar(p) => from_scholar(p),
    }?;
    Ok(draft.finish())
}

/// Normalize a batch. Bad records are logged and dropped; the rest keep their order.
pub fn normalize_all(raw: Vec<RawRecord>) -> (Vec<Paper>, Vec<NormalizationError>) {
    let mut papers = Vec::with_capacity(raw.len());
    let mut errors = Vec::new();
    for r in raw {
        match normalize(r) {
            Ok(p) => papers.push(p),
            Err(e) => {
                tracing::debug!(target: "normalize", source = e.source.as_str(), reason = %e.reason, "record dropped");
                counter!("digest_normalize_errors_total", "source" => e.source.as_str()).increment(1);
                errors.push(e);
            }
        }
    }
    if !errors.is_empty() {
        tracing::info!(target: "normalize", kept = papers.len(), dropped = errors.len(), "normalization finished");
    }
    (papers, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::{CrossrefAuthor, CrossrefDate, ScholarExternalIds};

    #[test]
    fn clean_text_strips_markup_and_labels() {
        let s = "  Abstract: <jats:p>Deep&nbsp;models\n\n are <i>great</i></jats:p> ";
        assert_eq!(clean_text(s, 100), "Deep models are great");
    }

    #[test]
    fn clean_text_caps_length() {
        let s = "x".repeat(500);
        assert_eq!(clean_text(&s, TITLE_MAX_CHARS).chars().count(), TITLE_MAX_CHARS);
    }

    #[test]
    fn title_key_ignores_case_and_punctuation() {
        assert_eq!(title_key("Diffusion Models: A  Survey!"), "diffusion models a survey");
        assert_eq!(title_key("diffusion models - a survey"), "diffusion models a survey");
    }

    #[test]
    fn doi_prefixes_are_removed() {
        assert_eq!(clean_doi("https://doi.org/10.1000/ABC").as_deref(), Some("10.1000/abc"));
        assert_eq!(clean_doi("doi: 10.1/x").as_deref(), Some("10.1/x"));
        assert_eq!(clean_doi("   "), None);
    }

    #[test]
    fn honorifics_are_stripped() {
        assert_eq!(clean_author("Dr. Jane  Doe").as_deref(), Some("Jane Doe"));
        assert_eq!(clean_author("Prof Alan Turing,").as_deref(), Some("Alan Turing"));
        assert_eq!(clean_author("  "), None);
    }

    #[test]
    fn arxiv_versions_are_stripped() {
        assert_eq!(arxiv_id("http://arxiv.org/abs/2405.01234v2"), "2405.01234");
        assert_eq!(arxiv_id("http://arxiv.org/abs/hep-th/9901001v1"), "hep-th/9901001");
        assert_eq!(arxiv_id("2405.01234"), "2405.01234");
    }

    fn arxiv(id: &str, title: &str) -> RawRecord {
        RawRecord::Arxiv(ArxivEntry {
            id: Some(format!("http://arxiv.org/abs/{id}")),
            title: Some(title.into()),
            summary: Some("We study things.".into()),
            published: Some("2024-05-01T17:00:00Z".into()),
            authors: vec!["Ada Lovelace".into()],
            categories: vec![" CS.LG ".into()],
            doi: None,
        })
    }

    #[test]
    fn fingerprint_is_stable_across_versions_and_refetches() {
        let a = normalize(arxiv("2405.01234v1", "Diffusion Models for X")).unwrap();
        let b = normalize(arxiv("2405.01234v3", "Diffusion  models for X.")).unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.source_id, "2405.01234");
        assert!(a.categories.contains("cs.lg"));
        assert_eq!(a.url, "https://arxiv.org/abs/2405.01234");
    }

    #[test]
    fn doi_collapses_records_from_different_sources() {
        let a = normalize(RawRecord::Arxiv(ArxivEntry {
            doi: Some("10.5555/ABC".into()),
            ..match arxiv("2405.00001v1", "Shared Work") {
                RawRecord::Arxiv(e) => e,
                _ => unreachable!(),
            }
        }))
        .unwrap();
        let b = normalize(RawRecord::Crossref(CrossrefItem {
            doi: Some("https://doi.org/10.5555/abc".into()),
            title: vec!["Shared work".into()],
            published_print: Some(CrossrefDate {
                date_parts: vec![vec![Some(2024), Some(6)]],
            }),
            ..Default::default()
        }))
        .unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(b.published_at, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assert_eq!(b.url, "https://doi.org/10.5555/abc");
    }

    #[test]
    fn scholar_arxiv_id_collapses_with_arxiv_record() {
        let a = normalize(arxiv("2405.01234v2", "Diffusion Models for X")).unwrap();
        let s = normalize(RawRecord::SemanticScholar(ScholarPaper {
            paper_id: Some("abc123".into()),
            title: Some("Diffusion Models for X".into()),
            year: Some(2024),
            external_ids: Some(ScholarExternalIds {
                doi: None,
                arxiv: Some("2405.01234".into()),
            }),
            ..Default::default()
        }))
        .unwrap();
        assert_eq!(a.fingerprint, s.fingerprint);
        assert_eq!(s.published_at, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    }

    #[test]
    fn missing_required_fields_are_errors() {
        let err = normalize(RawRecord::Crossref(CrossrefItem {
            doi: Some("10.1/x".into()),
            title: vec!["T".into()],
            ..Default::default()
        }))
        .unwrap_err();
        assert!(err.reason.contains("date"));

        let err = normalize(RawRecord::Arxiv(ArxivEntry {
            id: Some("2405.1".into()),
            title: Some("   ".into()),
            published: Some("2024-05-01".into()),
            ..Default::default()
        }))
        .unwrap_err();
        assert!(err.reason.contains("title"));
    }

    #[test]
    fn unparseable_dates_are_errors() {
        let err = normalize(RawRecord::Biorxiv(BiorxivItem {
            server: SourceName::Biorxiv,
            doi: Some("10.1101/1".into()),
            title: Some("T".into()),
            abstract_text: None,
            authors: None,
            date: Some("May 1st".into()),
            category: None,
            version: None,
        }))
        .unwrap_err();
        assert!(err.reason.starts_with("bad date"));
    }

    #[test]
    fn crossref_authors_join_given_and_family() {
        let p = normalize(RawRecord::Crossref(CrossrefItem {
            doi: Some("10.1/x".into()),
            title: vec!["T".into()],
            author: vec![
                CrossrefAuthor {
                    given: Some("Grace".into()),
                    family: Some("Hopper".into()),
                    name: None,
                },
                CrossrefAuthor {
                    given: None,
                    family: None,
                    name: Some("The Consortium".into()),
                },
            ],
            issued: Some(CrossrefDate {
                date_parts: vec![vec![Some(2023)]],
            }),
            ..Default::default()
        }))
        .unwrap();
        assert_eq!(p.authors, vec!["Grace Hopper", "The Consortium"]);
        assert!(p.abstract_text.is_empty());
    }

    #[test]
    fn batch_drops_bad_records_and_keeps_order() {
        let (papers, errors) = normalize_all(vec![
            arxiv("1", "First"),
            RawRecord::Arxiv(ArxivEntry::default()),
            arxiv("2", "Second"),
        ]);
        assert_eq!(papers.len(), 2);
        assert_eq!(papers[0].title, "First");
        assert_eq!(errors.len(), 1);
    }
}
