// tests/providers_fixtures.rs
//
// Captured payloads from every source, through the fixture-mode adapters, normalizer and a
// full pipeline run.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use common::*;
use paper_digest::ingest::providers::{
    arxiv::ArxivProvider, biorxiv::BiorxivProvider, crossref::CrossrefProvider,
    semantic_scholar::SemanticScholarProvider,
};
use paper_digest::ingest::types::{FetchQuery, SourceAdapter};
use paper_digest::model::{QueryWindow, SourceName};
use paper_digest::normalize::{normalize, normalize_all};
use paper_digest::storage::MemorySeenStore;

fn all_fixture_adapters() -> Vec<Arc<dyn SourceAdapter>> {
    vec![
        Arc::new(ArxivProvider::from_fixture_str(&fixture("arxiv_atom.xml"))),
        Arc::new(CrossrefProvider::from_fixture_str(&fixture("crossref_works.json"))),
        Arc::new(BiorxivProvider::from_fixture_str(
            SourceName::Biorxiv,
            &fixture("biorxiv_details.json"),
        )),
        Arc::new(SemanticScholarProvider::from_fixture_str(&fixture(
            "semantic_scholar_search.json",
        ))),
    ]
}

fn query() -> FetchQuery {
    FetchQuery {
        window: QueryWindow::lookback(evening(2), 48),
        keywords: vec!["diffusion".into()],
        categories: vec![],
    }
}

#[tokio::test]
async fn arxiv_fixture_normalizes_ids_titles_and_doi() {
    let adapter = ArxivProvider::from_fixture_str(&fixture("arxiv_atom.xml"));
    let page = adapter.fetch_page(&query(), 0).await.unwrap();
    assert_eq!(page.records.len(), 3);
    assert!(page.next.is_none());

    let (papers, errors) = normalize_all(page.records);
    assert!(errors.is_empty());

    let first = &papers[0];
    assert_eq!(first.source_id, "2405.01234");
    assert_eq!(first.title, "Diffusion Models for Protein Design");
    assert_eq!(first.authors, vec!["Alice Nguyen".to_string(), "Bob Tran".to_string()]);
    assert_eq!(first.published_at, day(1));
    assert_eq!(first.url, "https://arxiv.org/abs/2405.01234");
    assert!(first.categories.contains("q-bio.bm"));

    let survey = &papers[1];
    assert_eq!(survey.doi.as_deref(), Some("10.1000/gnn.2024.7"));
    assert_eq!(survey.url, "https://doi.org/10.1000/gnn.2024.7");
}

#[tokio::test]
async fn crossref_fixture_strips_markup_and_rejects_missing_doi() {
    let adapter = CrossrefProvider::from_fixture_str(&fixture("crossref_works.json"));
    let page = adapter.fetch_page(&query(), 0).await.unwrap();
    let (papers, errors) = normalize_all(page.records);

    assert_eq!(papers.len(), 2);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].source, SourceName::Crossref);

    let restoration = &papers[1];
    assert_eq!(restoration.doi.as_deref(), Some("10.1016/j.image.2024.104512"));
    // Year-month date-parts: day defaults to the 1st.
    assert_eq!(restoration.published_at, chrono::NaiveDate::from_ymd_opt(2024, 4, 1).unwrap());
    assert!(!restoration.abstract_text.contains('<'));
    assert!(restoration.abstract_text.contains("restoration & enhancement"));
    assert_eq!(restoration.authors, vec!["Eve Martin".to_string(), "Imaging Consortium".to_string()]);
}

#[tokio::test]
async fn biorxiv_fixture_splits_authors_and_builds_versioned_url() {
    let adapter = BiorxivProvider::from_fixture_str(SourceName::Biorxiv, &fixture("biorxiv_details.json"));
    let page = adapter.fetch_page(&query(), 0).await.unwrap();
    let (papers, errors) = normalize_all(page.records);
    assert!(errors.is_empty());

    let atlas = &papers[0];
    assert_eq!(atlas.source_name, SourceName::Biorxiv);
    assert_eq!(atlas.authors, vec!["Garcia, M.", "Okafor, J.", "Chen, L."]);
    assert!(atlas.categories.contains("neuroscience"));
    assert_eq!(atlas.doi.as_deref(), Some("10.1101/2024.04.28.591234"));
}

#[tokio::test]
async fn same_work_from_two_sources_shares_a_fingerprint() {
    let mut by_title = std::collections::HashMap::new();
    for adapter in all_fixture_adapters() {
        let page = adapter.fetch_page(&query(), 0).await.unwrap();
        for raw in page.records {
            if let Ok(p) = normalize(raw) {
                by_title
                    .entry(p.title.clone())
                    .or_insert_with(Vec::new)
                    .push((p.source_name, p.fingerprint));
            }
        }
    }

    // arXiv + Semantic Scholar (via the ArXiv external id).
    let protein = &by_title["Diffusion Models for Protein Design"];
    assert_eq!(protein.len(), 2);
    assert_eq!(protein[0].1, protein[1].1);

    // arXiv + Crossref (via the DOI).
    let gnn = &by_title["A Survey of Graph Neural Networks"];
    assert_eq!(gnn.len(), 2);
    assert_eq!(gnn[0].1, gnn[1].1);
}

#[tokio::test]
async fn normalizing_twice_gives_the_same_fingerprint() {
    let adapter = ArxivProvider::from_fixture_str(&fixture("arxiv_atom.xml"));
    let a = adapter.fetch_page(&query(), 0).await.unwrap();
    let b = adapter.fetch_page(&query(), 0).await.unwrap();
    let fa: Vec<_> = normalize_all(a.records).0.into_iter().map(|p| p.fingerprint).collect();
    let fb: Vec<_> = normalize_all(b.records).0.into_iter().map(|p| p.fingerprint).collect();
    assert_eq!(fa, fb);
    assert_eq!(fa.iter().collect::<BTreeSet<_>>().len(), 3);
}

#[tokio::test]
async fn full_run_over_all_fixtures() {
    let delivery = Arc::new(RecordingDelivery::default());
    let p = pipeline(
        fetch_manager(all_fixture_adapters()),
        Arc::new(MemorySeenStore::new()),
        delivery.clone(),
        &["diffusion", "protein", "graph"],
        &[],
        5,
    );

    let report = p.run_once(day(2), evening(2)).await.unwrap();
    assert_eq!(report.fetched, 10);
    assert_eq!(report.normalize_errors, 1);
    // Two cross-source duplicates collapse.
    assert_eq!(report.unseen, 7);
    assert_eq!(report.selected, 4);
    assert_eq!(report.delivered, 4);
    assert!(report.source_failures.is_empty());

    // First occurrence wins: the arXiv copy of the protein paper is the one posted.
    let ids = delivery.ids(0);
    assert!(ids.contains(&"2405.01234".to_string()));
    assert!(!ids.contains(&"a1b2c3d4e5f6".to_string()));
}
