//! Literature search used to ground generation prompts.
//!
//! [`PubMedClient`] talks to the NCBI E-utilities: `esearch` for PMIDs,
//! `esummary` for titles, authors and dates, then `efetch` XML for
//! abstracts. A failed abstract fetch keeps the summaries.
//! [`EvidenceRetriever`] builds queries from a generation unit and never
//! fails: search errors are logged and yield no evidence.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quick_xml::events::Event;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::EvidenceConfig;
use crate::error::{Error, Result, ServiceError};
use crate::rate_limit::RateLimiter;
use crate::types::{EvidenceArticle, GenerationUnit};

/// Most queries issued per unit
const MAX_QUERIES: usize = 3;

/// Authors listed in a formatted citation before "et al."
const MAX_AUTHORS: usize = 3;

#[async_trait]
pub trait EvidenceService: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> std::result::Result<Vec<EvidenceArticle>, ServiceError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// PubMed E-utilities client
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SearchResponse {
    esearchresult: SearchResult,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    idlist: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    #[serde(default)]
    result: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SummaryDoc {
    #[serde(default)]
    title: String,
    #[serde(default)]
    authors: Vec<SummaryAuthor>,
    #[serde(default)]
    pubdate: String,
    #[serde(default)]
    fulljournalname: String,
}

#[derive(Debug, Deserialize)]
struct SummaryAuthor {
    name: String,
}

/// PMIDs from an `esearch` JSON body.
pub fn parse_search_ids(body: &str) -> std::result::Result<Vec<String>, serde_json::Error> {
    let resp: SearchResponse = serde_json::from_str(body)?;
    Ok(resp.esearchresult.idlist)
}

/// Articles from an `esummary` JSON body, in the order of `ids`.
pub fn parse_summaries(body: &str, ids: &[String]) -> std::result::Result<Vec<EvidenceArticle>, serde_json::Error> {
    let resp: SummaryResponse = serde_json::from_str(body)?;
    let articles = ids
        .iter()
        .filter_map(|id| {
            let doc: SummaryDoc = serde_json::from_value(resp.result.get(id)?.clone()).ok()?;
            let year = doc.pubdate.get(..4).and_then(|y| y.parse().ok());
            Some(EvidenceArticle {
                id: id.clone(),
                title: doc.title.trim().to_string(),
                authors: doc.authors.into_iter().map(|a| a.name).collect(),
                abstract_text: None,
                year,
                journal: (!doc.fulljournalname.is_empty()).then_some(doc.fulljournalname),
            })
        })
        .collect();
    Ok(articles)
}

/// Abstracts keyed by PMID from an `efetch` XML body. Labelled sections
/// read `Label: text`; articles without an abstract are absent.
pub fn parse_abstracts(xml: &str) -> std::result::Result<HashMap<String, String>, quick_xml::Error> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut abstracts = HashMap::new();
    let mut pmid: Option<String> = None;
    let mut in_pmid = false;
    let mut sections: Vec<String> = Vec::new();
    let mut section: Option<String> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"PubmedArticle" => {
                    pmid = None;
                    sections.clear();
                }
                // Cited articles carry PMIDs too; the first one is the article's
                b"PMID" if pmid.is_none() => in_pmid = true,
                b"AbstractText" => {
                    let label = match e.try_get_attribute("Label")? {
                        Some(attr) => attr.unescape_value()?.trim().to_string(),
                        None => String::new(),
                    };
                    section = Some(if label.is_empty() { label } else { format!("{label}: ") });
                }
                _ => {}
            },
            Event::Text(t) => {
                let text = t.unescape()?;
                if in_pmid {
                    pmid = Some(text.trim().to_string());
                } else if let Some(section) = section.as_mut() {
                    section.push_str(&text);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"PMID" => in_pmid = false,
                b"AbstractText" => {
                    if let Some(text) = section.take() {
                        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
                        if !text.is_empty() {
                            sections.push(text);
                        }
                    }
                }
                b"PubmedArticle" => {
                    if let Some(id) = pmid.take() {
                        if !sections.is_empty() {
                            abstracts.insert(id, sections.join(" "));
                        }
                    }
                    sections.clear();
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(abstracts)
}

/// Fill in abstracts by article id.
pub fn attach_abstracts(articles: &mut [EvidenceArticle], mut abstracts: HashMap<String, String>) {
    for article in articles {
        if let Some(text) = abstracts.remove(&article.id) {
            article.abstract_text = Some(text);
        }
    }
}

/// Map a non-success response to a [`ServiceError`].
async fn check_response(resp: reqwest::Response) -> std::result::Result<reqwest::Response, ServiceError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(ServiceError::status(status.as_u16(), message))
}

pub struct PubMedClient {
    base_url: String,
    email: Option<String>,
    api_key: Option<String>,
    limiter: Arc<RateLimiter>,
    timeout: Duration,
    client: reqwest::Client,
}

impl PubMedClient {
    pub fn new(config: &EvidenceConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            email: config.email.clone(),
            api_key: config.api_key.clone(),
            limiter: Arc::new(RateLimiter::new(config.rate_limit)),
            timeout,
            client,
        })
    }

    fn common_params(&self, retmode: &str) -> Vec<(&'static str, String)> {
        let mut params = vec![("db", "pubmed".to_string()), ("retmode", retmode.to_string())];
        if let Some(email) = &self.email {
            params.push(("email", email.clone()));
        }
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        params
    }

    async fn get(&self, endpoint: &str, params: &[(&'static str, String)]) -> std::result::Result<String, ServiceError> {
        self.limiter.acquire().await;
        let url = format!("{}/{}", self.base_url, endpoint);
        let resp = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| ServiceError::from_http(e, self.timeout))?;
        let resp = check_response(resp).await?;
        resp.text().await.map_err(|e| ServiceError::from_http(e, self.timeout))
    }

    async fn fetch_abstracts(&self, ids: &[String]) -> std::result::Result<HashMap<String, String>, ServiceError> {
        let mut params = self.common_params("xml");
        params.push(("rettype", "abstract".to_string()));
        params.push(("id", ids.join(",")));
        let body = self.get("efetch.fcgi", &params).await?;
        parse_abstracts(&body).map_err(|e| ServiceError::MalformedResponse(format!("bad efetch body: {e}")))
    }
}

#[async_trait]
impl EvidenceService for PubMedClient {
    async fn search(&self, query: &str, max_results: usize) -> std::result::Result<Vec<EvidenceArticle>, ServiceError> {
        let mut params = self.common_params("json");
        params.push(("term", query.to_string()));
        params.push(("retmax", max_results.to_string()));
        params.push(("sort", "relevance".to_string()));

        let body = self.get("esearch.fcgi", &params).await?;
        let ids =
            parse_search_ids(&body).map_err(|e| ServiceError::MalformedResponse(format!("bad esearch body: {e}")))?;
        debug!(query, hits = ids.len(), "pubmed search");
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut params = self.common_params("json");
        params.push(("id", ids.join(",")));
        let body = self.get("esummary.fcgi", &params).await?;
        let mut articles = parse_summaries(&body, &ids)
            .map_err(|e| ServiceError::MalformedResponse(format!("bad esummary body: {e}")))?;

        match self.fetch_abstracts(&ids).await {
            Ok(abstracts) => attach_abstracts(&mut articles, abstracts),
            Err(e) => warn!(query, error = %e, "abstract fetch failed, keeping summaries"),
        }
        Ok(articles)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Retrieval for generation units
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct EvidenceRetriever {
    service: Arc<dyn EvidenceService>,
    max_results: usize,
}

impl EvidenceRetriever {
    pub fn new(service: Arc<dyn EvidenceService>, max_results: usize) -> Self {
        Self {
            service,
            max_results: max_results.max(1),
        }
    }

    /// Search queries for a unit: the cohort's category values combined
    /// with the template topic, most specific first.
    pub fn queries(unit: &GenerationUnit) -> Vec<String> {
        let demographic = unit.cohort.category_values().collect::<Vec<_>>().join(" ");
        let topic = if unit.template.description.is_empty() {
            unit.template.id.replace('_', " ")
        } else {
            unit.template.description.clone()
        };

        let candidates = [
            format!("{demographic} {topic}"),
            format!("{} {topic}", unit.cohort.name),
            topic.clone(),
        ];

        let mut queries: Vec<String> = Vec::new();
        for q in candidates {
            let q = q.split_whitespace().collect::<Vec<_>>().join(" ");
            if !q.is_empty() && !queries.contains(&q) {
                queries.push(q);
            }
        }
        queries.truncate(MAX_QUERIES);
        queries
    }

    /// Up to `max_results` distinct articles for the unit; empty on failure.
    pub async fn retrieve(&self, unit: &GenerationUnit) -> Vec<EvidenceArticle> {
        let mut articles: Vec<EvidenceArticle> = Vec::new();
        for query in Self::queries(unit) {
            if articles.len() >= self.max_results {
                break;
            }
            match self.service.search(&query, self.max_results).await {
                Ok(found) => {
                    for article in found {
                        if !articles.iter().any(|a| a.id == article.id) {
                            articles.push(article);
                        }
                    }
                }
                Err(e) => warn!(query, error = %e, "evidence search failed"),
            }
        }
        articles.truncate(self.max_results);
        articles
    }
}

/// Render articles as a prompt context block.
pub fn format_evidence_context(articles: &[EvidenceArticle]) -> String {
    if articles.is_empty() {
        return "No evidence found.".to_string();
    }

    let mut out = String::new();
    for (i, article) in articles.iter().enumerate() {
        let authors = if article.authors.is_empty() {
            "N/A".to_string()
        } else if article.authors.len() > MAX_AUTHORS {
            format!("{} et al.", article.authors[..MAX_AUTHORS].join(", "))
        } else {
            article.authors.join(", ")
        };
        out.push_str(&format!("EVIDENCE SOURCE {}\n", i + 1));
        out.push_str(&format!("Title: {}\n", article.title));
        out.push_str(&format!("Authors: {authors}\n"));
        out.push_str(&format!("Journal: {}\n", article.journal.as_deref().unwrap_or("N/A")));
        out.push_str(&format!(
            "Year: {}\n",
            article.year.map(|y| y.to_string()).unwrap_or_else(|| "N/A".into())
        ));
        out.push_str(&format!("URL: {}\n", article.url()));
        if let Some(abstract_text) = &article.abstract_text {
            out.push_str(&format!("Abstract: {abstract_text}\n"));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Cohort, InsightTemplate, ModelParams};
    use std::sync::Mutex;

    const SEARCH_BODY: &str = r#"{"header":{},"esearchresult":{"count":"2","idlist":["111","222"]}}"#;

    const SUMMARY_BODY: &str = r#"{
        "result": {
            "uids": ["111", "222"],
            "111": {"title": "Smoking and CVD ", "authors": [{"name": "Doe J"}], "pubdate": "2019 Mar", "fulljournalname": "Heart"},
            "222": {"title": "Cessation outcomes", "authors": [], "pubdate": "n.d."}
        }
    }"#;

    const FETCH_BODY: &str = r#"<?xml version="1.0" ?>
<!DOCTYPE PubmedArticleSet PUBLIC "-//NLM//DTD PubMedArticle, 1st January 2024//EN" "https://dtd.nlm.nih.gov/ncbi/pubmed/out/pubmed_240101.dtd">
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation Status="MEDLINE" Owner="NLM">
      <PMID Version="1">111</PMID>
      <Article>
        <ArticleTitle>Smoking and CVD</ArticleTitle>
        <Abstract>
          <AbstractText Label="BACKGROUND" NlmCategory="BACKGROUND">Smoking raises
            cardiovascular risk.</AbstractText>
          <AbstractText Label="RESULTS">Risk was <i>2.1</i> times higher &amp; fell after quitting.</AbstractText>
        </Abstract>
      </Article>
      <CommentsCorrectionsList>
        <CommentsCorrections RefType="Cites"><PMID Version="1">999</PMID></CommentsCorrections>
      </CommentsCorrectionsList>
    </MedlineCitation>
  </PubmedArticle>
  <PubmedArticle>
    <MedlineCitation><PMID Version="1">222</PMID><Article><ArticleTitle>No abstract</ArticleTitle></Article></MedlineCitation>
  </PubmedArticle>
  <PubmedArticle>
    <MedlineCitation><PMID Version="1">333</PMID><Article><Abstract><AbstractText>Plain text.</AbstractText></Abstract></Article></MedlineCitation>
  </PubmedArticle>
</PubmedArticleSet>"#;

    fn unit() -> GenerationUnit {
        GenerationUnit {
            index: 0,
            cohort: Cohort::new("cohort_0001", "Older smokers")
                .with_dimension("age_group", "65+")
                .with_dimension("smoking_status", "current smoker"),
            template: InsightTemplate::new("risk_factor", "heart disease risk"),
            count: 3,
            params: ModelParams::default(),
        }
    }

    struct RecordingSearch {
        queries: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl EvidenceService for RecordingSearch {
        async fn search(&self, query: &str, _max: usize) -> std::result::Result<Vec<EvidenceArticle>, ServiceError> {
            self.queries.lock().unwrap().push(query.to_string());
            if self.fail {
                return Err(ServiceError::status(500, "down"));
            }
            Ok(vec![
                EvidenceArticle {
                    id: "1".into(),
                    title: "Shared".into(),
                    ..Default::default()
                },
                EvidenceArticle {
                    id: format!("q-{}", query.len()),
                    title: query.to_string(),
                    ..Default::default()
                },
            ])
        }
    }

    #[test]
    fn test_parse_search_ids() {
        assert_eq!(parse_search_ids(SEARCH_BODY).unwrap(), vec!["111", "222"]);
        assert!(parse_search_ids("not json").is_err());
    }

    #[test]
    fn test_parse_summaries() {
        let ids = vec!["111".to_string(), "222".to_string(), "333".to_string()];
        let articles = parse_summaries(SUMMARY_BODY, &ids).unwrap();
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].title, "Smoking and CVD");
        assert_eq!(articles[0].year, Some(2019));
        assert_eq!(articles[0].journal.as_deref(), Some("Heart"));
        assert_eq!(articles[1].year, None);
        assert!(articles[1].journal.is_none());
    }

    #[test]
    fn test_parse_abstracts() {
        let abstracts = parse_abstracts(FETCH_BODY).unwrap();
        assert_eq!(abstracts.len(), 2);
        assert_eq!(
            abstracts["111"],
            "BACKGROUND: Smoking raises cardiovascular risk. RESULTS: Risk was 2.1 times higher & fell after quitting."
        );
        assert_eq!(abstracts["333"], "Plain text.");
        assert!(!abstracts.contains_key("222"));
        assert!(!abstracts.contains_key("999"));
    }

    #[test]
    fn test_parse_abstracts_malformed() {
        assert!(parse_abstracts("<PubmedArticleSet><PubmedArticle></PubmedArticleSet>").is_err());
    }

    #[test]
    fn test_attach_abstracts_by_id() {
        let ids = vec!["111".to_string(), "222".to_string()];
        let mut articles = parse_summaries(SUMMARY_BODY, &ids).unwrap();
        attach_abstracts(&mut articles, parse_abstracts(FETCH_BODY).unwrap());

        assert!(articles[0].abstract_text.as_deref().unwrap().starts_with("BACKGROUND: Smoking"));
        assert!(articles[1].abstract_text.is_none());

        let context = format_evidence_context(&articles);
        assert!(context.contains("Abstract: BACKGROUND: Smoking raises cardiovascular risk."));
    }

    #[test]
    fn test_queries_from_unit() {
        let queries = EvidenceRetriever::queries(&unit());
        assert_eq!(
            queries,
            vec![
                "65+ current smoker heart disease risk",
                "Older smokers heart disease risk",
                "heart disease risk",
            ]
        );
    }

    #[tokio::test]
    async fn test_retrieve_dedupes_and_caps() {
        let search = Arc::new(RecordingSearch {
            queries: Mutex::new(Vec::new()),
            fail: false,
        });
        let retriever = EvidenceRetriever::new(search.clone(), 3);
        let articles = retriever.retrieve(&unit()).await;

        assert_eq!(articles.len(), 3);
        assert_eq!(articles.iter().filter(|a| a.id == "1").count(), 1);
        assert_eq!(search.queries.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_retrieve_failure_is_empty() {
        let search = Arc::new(RecordingSearch {
            queries: Mutex::new(Vec::new()),
            fail: true,
        });
        let articles = EvidenceRetriever::new(search, 5).retrieve(&unit()).await;
        assert!(articles.is_empty());
    }

    #[test]
    fn test_format_context() {
        assert_eq!(format_evidence_context(&[]), "No evidence found.");

        let article = EvidenceArticle {
            id: "42".into(),
            title: "T".into(),
            authors: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            year: Some(2021),
            ..Default::default()
        };
        let context = format_evidence_context(&[article]);
        assert!(context.contains("Authors: A, B, C et al."));
        assert!(context.contains("https://pubmed.ncbi.nlm.nih.gov/42/"));
        assert!(context.contains("Year: 2021"));
    }
}
