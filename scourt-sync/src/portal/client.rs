//! Portal HTTP client
//!
//! Session lifecycle: a GET against the portal index yields JSESSIONID and
//! WMONID cookies. Supplying a stored WMONID keeps the identity binding, which
//! is what allows stored encrypted case numbers to skip the captcha. Sessions
//! older than the configured staleness window must be re-opened.

use crate::portal::codes::{case_type_code, court_code};
use crate::portal::types::{CaptchaChallenge, CaseQuery, SearchOutcome, SessionInfo};
use base64::Engine;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::SET_COOKIE;
use scourt_common::{Error, Result};
use serde_json::{json, Value};
use std::time::Duration;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

static JSESSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"JSESSIONID=([^;]+)").unwrap());
static WMONID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"WMONID=([^;]+)").unwrap());
static DATA_URI_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^data:image/\w+;base64,").unwrap());
static COOKIE_EXPIRES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)expires=([^;]+)").unwrap());

/// Client configuration. The base URL is swappable for tests.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: "https://ssgo.scourt.go.kr".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct PortalClient {
    http: reqwest::Client,
    config: PortalConfig,
    session: Option<SessionInfo>,
}

impl PortalClient {
    pub fn new(config: PortalConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Internal(format!("http client build: {e}")))?;
        Ok(Self {
            http,
            config,
            session: None,
        })
    }

    pub fn session(&self) -> Option<&SessionInfo> {
        self.session.as_ref()
    }

    /// True when no session exists or it has outlived the staleness window.
    pub fn is_stale(&self, max_age_minutes: i64) -> bool {
        match &self.session {
            Some(s) => s.age_minutes(Utc::now()) >= max_age_minutes,
            None => true,
        }
    }

    /// Open a portal session. A stored WMONID, when given, is replayed so the
    /// identity binding survives across sessions.
    pub async fn init_session(&mut self, existing_wmonid: Option<&str>) -> Result<&SessionInfo> {
        let url = format!("{}/ssgo/index.on?cortId=www", self.config.base_url);
        let mut request = self
            .http
            .get(&url)
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header("Accept-Language", "ko-KR,ko;q=0.9")
            .header("User-Agent", USER_AGENT);

        if let Some(wmonid) = existing_wmonid {
            request = request.header("Cookie", format!("WMONID={wmonid}"));
        }

        let response = request.send().await.map_err(classify_transport)?;

        let mut jsession_id = None;
        let mut wmonid = None;
        let mut wmonid_expires_at = None;
        for cookie in response.headers().get_all(SET_COOKIE) {
            let Ok(raw) = cookie.to_str() else { continue };
            if let Some(caps) = JSESSION_RE.captures(raw) {
                jsession_id = Some(caps[1].to_string());
            }
            if let Some(caps) = WMONID_RE.captures(raw) {
                wmonid = Some(caps[1].to_string());
                wmonid_expires_at = parse_cookie_expires(raw);
            }
        }

        // a replayed WMONID is usually not re-issued
        let wmonid = wmonid.or_else(|| existing_wmonid.map(str::to_string));

        match (jsession_id, wmonid) {
            (Some(jsession_id), Some(wmonid)) => {
                tracing::debug!(wmonid = %wmonid, "Portal session established");
                Ok(self.session.insert(SessionInfo {
                    jsession_id,
                    wmonid,
                    wmonid_expires_at,
                    created_at: Utc::now(),
                }))
            }
            _ => Err(Error::SessionInitFailed(
                "portal did not return session cookies".to_string(),
            )),
        }
    }

    /// Fetch a captcha image and its answer token.
    pub async fn fetch_captcha(&self) -> Result<CaptchaChallenge> {
        let session = self.require_session()?;
        let url = format!("{}/ssgo/ssgo10l/getCaptchaInf.on", self.config.base_url);

        let response = self
            .post_json_raw(
                &url,
                session,
                "mf_ssgoTopMainTab_contents_content1_body_sbm_captcha",
                String::new(),
            )
            .await?;

        let info = &response["data"]["dma_captchaInf"];
        let image_raw = info["image"].as_str().unwrap_or_default();
        if image_raw.is_empty() {
            return Err(Error::Parse {
                path: "dma_captchaInf.image".to_string(),
                message: "captcha image missing from response".to_string(),
            });
        }

        let stripped = DATA_URI_PREFIX.replace(image_raw, "");
        let image = base64::engine::general_purpose::STANDARD
            .decode(stripped.as_bytes())
            .map_err(|e| Error::Parse {
                path: "dma_captchaInf.image".to_string(),
                message: format!("base64 decode: {e}"),
            })?;

        Ok(CaptchaChallenge {
            image,
            token: info["answer"].as_str().unwrap_or_default().to_string(),
        })
    }

    /// Search for a case. The 14-digit case key (year + padded type code +
    /// padded serial) in the body is what makes the portal return the 64-char
    /// encrypted case number bound to this session's WMONID.
    pub async fn search_case(
        &self,
        query: &CaseQuery,
        captcha_answer: &str,
    ) -> Result<SearchOutcome> {
        let session = self.require_session()?;
        let url = format!("{}/ssgo/ssgo10l/selectHmpgMain.on", self.config.base_url);

        let cs_no_hist = scourt_common::case_number::build_cs_no(
            &query.year,
            &case_type_code(&query.case_type),
            &query.serial,
        );

        let body = json!({
            "dma_search": {
                "cortCd": query.court,
                "cdScope": "ALL",
                "csNoHistLst": cs_no_hist,
                "csDvsCd": query.case_type,
                "csYr": query.year,
                "csSerial": query.serial,
                "btprNm": query.party_name,
                "answer": captcha_answer,
                "fullCsNo": "",
            }
        });

        let response = self
            .post_json(
                &url,
                session,
                "mf_ssgoTopMainTab_contents_content1_body_sbm_search",
                &body,
            )
            .await?;

        check_portal_error(&response)?;

        let enc_cs_no = response["data"]["dlt_csNoHistLst"][0]["encCsNo"]
            .as_str()
            .map(str::to_string);

        Ok(SearchOutcome {
            enc_cs_no,
            raw: response,
        })
    }

    /// Fetch the general-content document. Captcha-free when a 64-char
    /// encrypted case number is presented under the binding WMONID; otherwise
    /// the answer must be recognized-text + token.
    pub async fn fetch_detail(
        &self,
        query: &CaseQuery,
        enc_cs_no: &str,
        captcha_answer: &str,
    ) -> Result<Value> {
        let session = self.require_session()?;
        let url = format!(
            "{}/ssgo/ssgo102/selectHmpgFmlyCsGnrlCtt.on",
            self.config.base_url
        );

        let body = json!({
            "dma_search": {
                "cortCd": court_code(&query.court),
                "csNo": "",
                "encCsNo": enc_cs_no,
                "csYear": query.year,
                "csDvsCd": case_type_code(&query.case_type),
                "csSerial": query.serial,
                "btprtNm": query.party_name,
                "captchaAnswer": captcha_answer,
            }
        });

        let response = self
            .post_json(
                &url,
                session,
                "mf_ssgoTopMainTab_contents_content1_body_sbm_search",
                &body,
            )
            .await?;

        check_portal_error(&response)?;
        Ok(response)
    }

    /// Fetch the progress-content document (separate endpoint from the
    /// general content; always captcha-free under a bound encrypted number).
    pub async fn fetch_progress(&self, query: &CaseQuery, enc_cs_no: &str) -> Result<Value> {
        let session = self.require_session()?;
        let url = format!(
            "{}/ssgo/ssgo102/selectHmpgFmlyCsProgCtt.on",
            self.config.base_url
        );

        let type_code = case_type_code(&query.case_type);
        let cs_no = scourt_common::case_number::build_cs_no(&query.year, &type_code, &query.serial);
        let padded_serial = format!("{:0>7}", query.serial);

        let body = json!({
            "dma_search": {
                "cortCd": court_code(&query.court),
                "csNo": cs_no,
                "encCsNo": enc_cs_no,
                "csYear": query.year,
                "csDvsCd": type_code,
                "csSerial": padded_serial,
                "progCttDvs": "0",
                "srchDvs": "06",
            }
        });

        let response = self
            .post_json(
                &url,
                session,
                "mf_ssgoTopMainTab_contents_content1_body_wfSsgoDetail_ssgoCsDetailTab_contents_ssgoTab2_body_sbm_srchProgCtt",
                &body,
            )
            .await?;

        check_portal_error(&response)?;
        Ok(response)
    }

    /// Download a UI fragment under `/ssgo/ui/`.
    pub async fn fetch_fragment_xml(&self, xml_path: &str) -> Result<String> {
        let url = format!("{}/ssgo/ui/{xml_path}", self.config.base_url);
        let response = self
            .http
            .get(&url)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/xml, text/xml, */*")
            .send()
            .await
            .map_err(classify_transport)?;

        if !response.status().is_success() {
            return Err(Error::Parse {
                path: xml_path.to_string(),
                message: format!("fragment download failed: {}", response.status()),
            });
        }

        let content = response.text().await.map_err(classify_transport)?;
        if !content.contains("<?xml") && !content.contains("<html") {
            return Err(Error::Parse {
                path: xml_path.to_string(),
                message: "fragment content is not XML".to_string(),
            });
        }
        Ok(content)
    }

    fn require_session(&self) -> Result<&SessionInfo> {
        self.session
            .as_ref()
            .ok_or_else(|| Error::SessionInitFailed("no portal session".to_string()))
    }

    async fn post_json(
        &self,
        url: &str,
        session: &SessionInfo,
        submission_id: &str,
        body: &Value,
    ) -> Result<Value> {
        let raw = serde_json::to_string(body)
            .map_err(|e| Error::Internal(format!("request serialize: {e}")))?;
        self.post_json_raw(url, session, submission_id, raw).await
    }

    async fn post_json_raw(
        &self,
        url: &str,
        session: &SessionInfo,
        submission_id: &str,
        body: String,
    ) -> Result<Value> {
        let response = self
            .http
            .post(url)
            .header("Accept", "application/json")
            .header("Accept-Language", "ko-KR,ko;q=0.9")
            .header("Content-Type", "application/json;charset=UTF-8")
            .header("User-Agent", USER_AGENT)
            .header("Origin", self.config.base_url.clone())
            .header(
                "Referer",
                format!("{}/ssgo/index.on?cortId=www", self.config.base_url),
            )
            .header("Cookie", session.cookie_header())
            .header("submissionid", submission_id)
            .body(body)
            .send()
            .await
            .map_err(classify_transport)?;

        response.json::<Value>().await.map_err(|e| Error::Parse {
            path: url.to_string(),
            message: format!("response was not JSON: {e}"),
        })
    }
}

/// Expiry attribute of a Set-Cookie line. Cookie dates come in both the
/// RFC 1123 form and the legacy dashed form ("26-Aug-2028").
fn parse_cookie_expires(raw: &str) -> Option<chrono::DateTime<Utc>> {
    let value = COOKIE_EXPIRES_RE.captures(raw)?.get(1)?.as_str().trim();
    chrono::DateTime::parse_from_rfc2822(value)
        .or_else(|_| chrono::DateTime::parse_from_rfc2822(&value.replace('-', " ")))
        .map(|d| d.with_timezone(&Utc))
        .ok()
}

fn classify_transport(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::NetworkTimeout(err.to_string())
    } else {
        Error::SessionInitFailed(err.to_string())
    }
}

/// Map a portal error payload onto the shared taxonomy.
///
/// The portal reports failures inline in otherwise-200 JSON bodies, under
/// several shapes. W_0107 is the portal's security block for over-eager
/// clients; captcha mismatches and missing cases come back as Korean
/// messages.
pub fn check_portal_error(response: &Value) -> Result<()> {
    let message = response["error"]
        .as_str()
        .or_else(|| response["errMsg"].as_str())
        .or_else(|| response["errors"]["errorMessage"].as_str());

    let Some(message) = message else {
        return Ok(());
    };

    if message.contains("W_0107") {
        return Err(Error::RateLimited(message.to_string()));
    }
    if is_captcha_mismatch(message) {
        return Err(Error::CaptchaRejected { attempts: 1 });
    }
    if message.contains("존재하지 않") || message.contains("검색결과가 없") {
        return Err(Error::CaseNotFound(message.to_string()));
    }
    Err(Error::Parse {
        path: "portal".to_string(),
        message: message.to_string(),
    })
}

/// True when a portal error message indicates a wrong captcha answer.
pub fn is_captcha_mismatch(message: &str) -> bool {
    message.contains("보안문자") || message.contains("자동입력") || message.contains("captcha")
}
