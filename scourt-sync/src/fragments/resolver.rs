//! Fragment reference resolution and caching
//!
//! Sub-fragment references appear in the base document in two shapes:
//!
//! 1. script calls: `wfScrtyCttLst.setSrc("/ui/ssgo003/SSGO003FA0.xml")`
//! 2. frame elements: `<w2:wframe id="wfRcntDxdyLst" src="SSGO003F32.xml">`
//!
//! Each reference is keyed by its data-list id, which is the frame id with
//! the `wf` prefix swapped for `dlt_` and the first letter lowered. Bare
//! filenames resolve under `ssgo003/`.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scourt_common::Result;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

static SET_SRC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"wf(\w+)\.setSrc\([^"']*["']/ui/([^"']+)["']"#).unwrap());
static WFRAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<w2:wframe\s+([^>]+)>").unwrap());
static WFRAME_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"id=["']wf(\w+)["']"#).unwrap());
static WFRAME_SRC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"src=["']([^"']+)["']"#).unwrap());

/// Where fragment XML comes from when the cache misses.
#[async_trait]
pub trait FragmentSource: Send + Sync {
    async fn download(&self, xml_path: &str) -> Result<String>;
}

#[async_trait]
impl FragmentSource for crate::portal::PortalClient {
    async fn download(&self, xml_path: &str) -> Result<String> {
        self.fetch_fragment_xml(xml_path).await
    }
}

/// Extract data-list-id to fragment-path mappings from a base document.
///
/// Both reference shapes are scanned; attribute order inside a frame element
/// does not matter, and either quote style is accepted.
pub fn resolve_fragment_paths(base_document: &str) -> BTreeMap<String, String> {
    let mut result = BTreeMap::new();

    for caps in SET_SRC_RE.captures_iter(base_document) {
        let data_list_id = data_list_id(&caps[1]);
        result.insert(data_list_id, caps[2].to_string());
    }

    for caps in WFRAME_RE.captures_iter(base_document) {
        let attrs = &caps[1];
        let (Some(id_caps), Some(src_caps)) =
            (WFRAME_ID_RE.captures(attrs), WFRAME_SRC_RE.captures(attrs))
        else {
            continue;
        };
        let data_list_id = data_list_id(&id_caps[1]);
        let file_name = &src_caps[1];
        let xml_path = if file_name.starts_with("ssgo") || file_name.contains('/') {
            file_name.to_string()
        } else {
            format!("ssgo003/{file_name}")
        };
        result.insert(data_list_id, xml_path);
    }

    result
}

fn data_list_id(var_name: &str) -> String {
    let mut chars = var_name.chars();
    match chars.next() {
        Some(first) => format!("dlt_{}{}", first.to_lowercase(), chars.as_str()),
        None => "dlt_".to_string(),
    }
}

/// Fetch a fragment, preferring the database cache. A successful download is
/// upserted so each path is fetched from the portal at most once unless a
/// refresh is forced.
pub async fn fetch_fragment(
    pool: &SqlitePool,
    source: &dyn FragmentSource,
    xml_path: &str,
    force_refresh: bool,
) -> Result<String> {
    if !force_refresh {
        let cached = sqlx::query("SELECT content FROM xml_cache WHERE xml_path = ?")
            .bind(xml_path)
            .fetch_optional(pool)
            .await?;
        if let Some(row) = cached {
            return Ok(row.get("content"));
        }
    }

    let content = source.download(xml_path).await?;

    sqlx::query(
        "INSERT INTO xml_cache (xml_path, content, fetched_at) VALUES (?, ?, datetime('now'))
         ON CONFLICT(xml_path) DO UPDATE SET content = excluded.content, fetched_at = excluded.fetched_at",
    )
    .bind(xml_path)
    .bind(&content)
    .execute(pool)
    .await?;

    Ok(content)
}
