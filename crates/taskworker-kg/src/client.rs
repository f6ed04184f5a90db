//! The knowledge-graph HTTP client (spec §6 "Knowledge-graph (consumed)").

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use taskworker_core::WorkerError;
use taskworker_envelope::{default_classify, Envelope};

use crate::entity::KgEntity;

pub struct KgClient {
    envelope: Envelope,
    base_url: String,
    sparql_url: String,
    pageviews_base: String,
    user_agent: String,
    language: String,
}

impl KgClient {
    pub fn new(
        envelope: Envelope,
        base_url: impl Into<String>,
        sparql_url: impl Into<String>,
        pageviews_base: impl Into<String>,
        user_agent: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            envelope,
            base_url: base_url.into(),
            sparql_url: sparql_url.into(),
            pageviews_base: pageviews_base.into(),
            user_agent: user_agent.into(),
            language: language.into(),
        }
    }

    fn host(&self) -> String {
        reqwest::Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| self.base_url.clone())
    }

    /// `wbsearchentities`: returns candidate IDs in search order, top-K only.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<String>, WorkerError> {
        let url = self.base_url.clone();
        let query = query.to_string();
        let language = self.language.clone();
        let user_agent = self.user_agent.clone();
        let host = self.host();

        let response = self
            .envelope
            .execute(
                &host,
                "kg/search",
                "GET",
                || {
                    self.envelope
                        .client()
                        .get(&url)
                        .header("User-Agent", user_agent.clone())
                        .query(&[
                            ("action", "wbsearchentities"),
                            ("search", query.as_str()),
                            ("language", language.as_str()),
                            ("limit", "50"),
                            ("type", "item"),
                            ("format", "json"),
                        ])
                },
                &default_classify,
            )
            .await?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| WorkerError::Fatal(format!("decoding search response: {e}")))?;

        let ids = body["search"]
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .take(top_k)
                    .filter_map(|e| e["id"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Ok(ids)
    }

    /// `wbgetentities`: one round trip for up to 50 IDs, returning `claims`,
    /// `labels`, `descriptions`.
    pub async fn fetch_batch(&self, ids: &[String]) -> Result<HashMap<String, KgEntity>, WorkerError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        debug_assert!(ids.len() <= 50, "caller must chunk to <=50 ids");

        let joined = ids.join("|");
        let url = self.base_url.clone();
        let language = self.language.clone();
        let user_agent = self.user_agent.clone();
        let host = self.host();

        let response = self
            .envelope
            .execute(
                &host,
                "kg/fetch",
                "GET",
                || {
                    self.envelope
                        .client()
                        .get(&url)
                        .header("User-Agent", user_agent.clone())
                        .query(&[
                            ("action", "wbgetentities"),
                            ("ids", joined.as_str()),
                            ("props", "claims|labels|descriptions|sitelinks"),
                            ("languages", language.as_str()),
                            ("format", "json"),
                        ])
                },
                &default_classify,
            )
            .await?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| WorkerError::Fatal(format!("decoding fetch response: {e}")))?;

        let entities = body["entities"].as_object().ok_or_else(|| {
            WorkerError::Fatal("fetch response missing 'entities'".to_string())
        })?;

        Ok(entities
            .iter()
            .map(|(id, raw)| (id.clone(), parse_entity(id, raw, &self.language)))
            .collect())
    }

    /// Inbound-link count via SPARQL. Advisory: any failure yields 0.
    pub async fn inbound_links(&self, id: &str) -> u64 {
        let query = format!(
            "SELECT (COUNT(*) AS ?count) WHERE {{ ?s ?p wd:{id} }}"
        );
        let url = self.sparql_url.clone();
        let user_agent = self.user_agent.clone();
        let host = self.host();

        let outcome = self
            .envelope
            .execute(
                &host,
                "kg/sparql",
                "GET",
                || {
                    self.envelope
                        .client()
                        .get(&url)
                        .header("User-Agent", user_agent.clone())
                        .query(&[("query", query.as_str()), ("format", "json")])
                },
                &default_classify,
            )
            .await;

        let Ok(response) = outcome else {
            return 0;
        };
        let Ok(body) = response.json::<Value>().await else {
            return 0;
        };
        body["results"]["bindings"][0]["count"]["value"]
            .as_str()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }

    /// Last-30-days pageview sum for `sitelink`. Advisory: any failure
    /// yields 0.
    pub async fn pageviews(&self, sitelink: &str) -> u64 {
        let url = format!("{}/{}", self.pageviews_base.trim_end_matches('/'), sitelink);
        let user_agent = self.user_agent.clone();
        let host = self.host();

        let outcome = self
            .envelope
            .execute(
                &host,
                "kg/pageviews",
                "GET",
                || {
                    self.envelope
                        .client()
                        .get(&url)
                        .header("User-Agent", user_agent.clone())
                        .timeout(Duration::from_secs(10))
                },
                &default_classify,
            )
            .await;

        let Ok(response) = outcome else {
            return 0;
        };
        let Ok(body) = response.json::<Value>().await else {
            return 0;
        };
        body["items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| i["views"].as_u64())
                    .sum()
            })
            .unwrap_or(0)
    }
}

fn parse_entity(id: &str, raw: &Value, language: &str) -> KgEntity {
    let label = raw["labels"][language]["value"]
        .as_str()
        .unwrap_or(id)
        .to_string();
    let description = raw["descriptions"][language]["value"]
        .as_str()
        .map(str::to_string);
    let sitelinks = raw["sitelinks"]
        .as_object()
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default();
    let instance_of = extract_claim_ids(raw, "P31");

    KgEntity {
        id: id.to_string(),
        label,
        description,
        aliases: Vec::new(),
        sitelinks,
        statements: raw["claims"].clone(),
        inbound_links: 0,
        pageviews: 0,
        followers: None,
        occupations: extract_claim_ids(raw, "P106"),
        positions: extract_claim_ids(raw, "P39"),
        awards: extract_claim_ids(raw, "P166"),
        instance_of,
    }
}

fn extract_claim_ids(raw: &Value, property: &str) -> Vec<String> {
    raw["claims"][property]
        .as_array()
        .map(|claims| {
            claims
                .iter()
                .filter_map(|c| {
                    c["mainsnak"]["datavalue"]["value"]["id"]
                        .as_str()
                        .map(str::to_string)
                })
                .collect()
        })
        .unwrap_or_default()
}
