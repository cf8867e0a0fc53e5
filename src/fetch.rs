use std::path::{Path, PathBuf};

use anyhow::Context as _;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, COOKIE, HeaderMap, HeaderValue, REFERER, USER_AGENT};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::{DEFAULT_ACCEPT, DEFAULT_ACCEPT_LANGUAGE, MirrorConfig};
use crate::error::MirrorError;

pub trait PageFetcher {
    fn fetch_page(&mut self, url: &str) -> Result<String, MirrorError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
}

#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    cookies: Vec<StoredCookie>,
    default_domain: String,
}

impl CookieJar {
    pub fn new(cookies: Vec<StoredCookie>, default_domain: impl Into<String>) -> Self {
        Self {
            cookies,
            default_domain: default_domain.into(),
        }
    }

    pub fn file_for(dir: &Path, thread_url: &Url) -> Option<PathBuf> {
        let host = thread_url.host_str()?;
        Some(dir.join(format!("cookies_{}.json", host.replace('.', "_"))))
    }

    pub fn load_for(dir: &Path, thread_url: &Url) -> Self {
        let domain = thread_url.host_str().unwrap_or_default().to_owned();
        let Some(path) = Self::file_for(dir, thread_url) else {
            return Self::new(Vec::new(), domain);
        };
        match crate::json_file::read_json::<Vec<StoredCookie>>(&path) {
            Ok(Some(cookies)) => {
                tracing::info!(count = cookies.len(), path = %path.display(), "loaded saved cookies");
                Self::new(cookies, domain)
            }
            Ok(None) => Self::new(Vec::new(), domain),
            Err(err) => {
                tracing::warn!(path = %path.display(), ?err, "could not read cookies");
                Self::new(Vec::new(), domain)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// `Cookie` header value for a request to `url`, limited to cookies whose domain
    /// matches the request host.
    pub fn header_for(&self, url: &Url) -> Option<String> {
        let host = url.host_str()?;
        let pairs: Vec<String> = self
            .cookies
            .iter()
            .filter(|cookie| {
                if cookie.domain.is_empty() {
                    // host-only cookie
                    host.eq_ignore_ascii_case(&self.default_domain)
                } else {
                    domain_matches(host, &cookie.domain)
                }
            })
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect();
        (!pairs.is_empty()).then(|| pairs.join("; "))
    }
}

fn domain_matches(host: &str, domain: &str) -> bool {
    let domain = domain.trim_start_matches('.');
    if domain.is_empty() {
        return false;
    }
    host.eq_ignore_ascii_case(domain)
        || host
            .to_ascii_lowercase()
            .ends_with(&format!(".{}", domain.to_ascii_lowercase()))
}

#[derive(Debug, Clone)]
pub struct HttpSession {
    client: reqwest::blocking::Client,
    cookies: CookieJar,
}

impl HttpSession {
    pub fn new(config: &MirrorConfig, referer: &str, cookies: CookieJar) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("user agent header")?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(DEFAULT_ACCEPT_LANGUAGE));
        match HeaderValue::from_str(referer) {
            Ok(value) => {
                headers.insert(REFERER, value);
            }
            Err(err) => tracing::debug!(referer, ?err, "skipping invalid referer header"),
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .default_headers(headers)
            .build()
            .context("build http client")?;

        Ok(Self { client, cookies })
    }

    pub fn get(&self, url: &Url) -> reqwest::Result<reqwest::blocking::Response> {
        let mut request = self.client.get(url.clone());
        if let Some(cookie) = self.cookies.header_for(url) {
            request = request.header(COOKIE, cookie);
        }
        request.send()
    }
}

impl PageFetcher for HttpSession {
    fn fetch_page(&mut self, url: &str) -> Result<String, MirrorError> {
        let parsed = Url::parse(url).map_err(|source| MirrorError::InvalidUrl {
            url: url.to_owned(),
            source,
        })?;
        let response = self.get(&parsed).map_err(|source| MirrorError::PageFetch {
            url: url.to_owned(),
            source,
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(MirrorError::Http {
                url: url.to_owned(),
                status,
            });
        }
        response.text().map_err(|source| MirrorError::PageFetch {
            url: url.to_owned(),
            source,
        })
    }
}
