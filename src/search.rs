//! Web-search fallback tool: Google Custom Search when configured, with a
//! DuckDuckGo instant-answer fallback. Results are formatted as a plain text
//! block for the agent loop.

use serde::Serialize;
use serde_json::Value;

use crate::core::errors::ApiError;

const MAX_RESULTS: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Run a web search and format the top hits for tool output.
pub async fn web_search(config: &Value, query: &str) -> Result<String, ApiError> {
    let results = perform_search(config, query).await?;
    if results.is_empty() {
        return Ok("[Web search: no results found]".to_string());
    }

    let formatted: Vec<String> = results
        .iter()
        .take(MAX_RESULTS)
        .map(|result| format!("- {}\n{}\n{}", result.title, result.snippet, result.url))
        .collect();
    Ok(formatted.join("\n\n"))
}

pub async fn perform_search(config: &Value, query: &str) -> Result<Vec<SearchResult>, ApiError> {
    let section = config.get("search");
    let api_key = section
        .and_then(|v| v.get("google_api_key"))
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let engine_id = section
        .and_then(|v| v.get("google_engine_id"))
        .and_then(|v| v.as_str())
        .unwrap_or("");

    if !api_key.is_empty() && !engine_id.is_empty() {
        match google_search(query, api_key, engine_id).await {
            Ok(results) if !results.is_empty() => return Ok(results),
            Ok(_) => {}
            Err(err) => tracing::warn!("Google search failed, falling back: {}", err),
        }
    }

    duckduckgo_search(query).await
}

async fn google_search(
    query: &str,
    api_key: &str,
    engine_id: &str,
) -> Result<Vec<SearchResult>, ApiError> {
    let url = format!(
        "https://www.googleapis.com/customsearch/v1?key={}&cx={}&q={}",
        api_key,
        engine_id,
        urlencoding::encode(query)
    );

    let response = reqwest::Client::new()
        .get(url)
        .send()
        .await
        .map_err(ApiError::internal)?;

    if !response.status().is_success() {
        return Err(ApiError::Internal(format!(
            "Google search failed: {}",
            response.status()
        )));
    }

    let payload: Value = response.json().await.map_err(ApiError::internal)?;
    let items = payload
        .get("items")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let mut results = Vec::new();
    for item in items {
        let title = field(&item, "title");
        let url = field(&item, "link");
        let snippet = field(&item, "snippet");
        if !title.is_empty() && !url.is_empty() {
            results.push(SearchResult {
                title,
                url,
                snippet,
            });
        }
    }
    Ok(results)
}

async fn duckduckgo_search(query: &str) -> Result<Vec<SearchResult>, ApiError> {
    let url = format!(
        "https://api.duckduckgo.com/?q={}&format=json&no_redirect=1&no_html=1",
        urlencoding::encode(query)
    );

    let response = reqwest::Client::new()
        .get(url)
        .send()
        .await
        .map_err(ApiError::internal)?;

    if !response.status().is_success() {
        return Err(ApiError::Internal(format!(
            "DuckDuckGo search failed: {}",
            response.status()
        )));
    }

    let payload: Value = response.json().await.map_err(ApiError::internal)?;
    let mut results = Vec::new();

    let abstract_text = field(&payload, "AbstractText");
    let abstract_url = field(&payload, "AbstractURL");
    if !abstract_text.is_empty() && !abstract_url.is_empty() {
        results.push(SearchResult {
            title: abstract_text
                .split(" - ")
                .next()
                .unwrap_or(&abstract_text)
                .to_string(),
            url: abstract_url,
            snippet: abstract_text,
        });
    }

    for key in ["Results", "RelatedTopics"] {
        if let Some(items) = payload.get(key).and_then(|v| v.as_array()) {
            collect_ddg_topics(items, &mut results);
        }
    }

    Ok(results)
}

fn collect_ddg_topics(items: &[Value], results: &mut Vec<SearchResult>) {
    for item in items {
        if let Some(topics) = item.get("Topics").and_then(|v| v.as_array()) {
            collect_ddg_topics(topics, results);
            continue;
        }
        let text = field(item, "Text");
        let url = field(item, "FirstURL");
        if text.is_empty() || url.is_empty() {
            continue;
        }
        results.push(SearchResult {
            title: text.split(" - ").next().unwrap_or(&text).to_string(),
            url,
            snippet: text,
        });
    }
}

fn field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}
