use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use std::{
    fmt::Display,
    fs,
    path::{Path, PathBuf},
};

use crate::{
    amount::Amount,
    auth::{check_auth, AuthContext},
    model::{Receipt, Receipts},
};

/// Endpoints and fixed client identifiers for the Lidl Plus API.
///
/// The defaults are the public values shipped in the vendor's mobile app.
/// They may change with app updates, so the credential and app version can
/// be overridden.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub token_url: String,
    pub tickets_url: String,
    /// Value of the `Authorization: Basic` header sent to the token endpoint.
    pub client_credential: String,
    pub app: String,
    pub app_version: String,
    pub operating_system: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            token_url: "https://accounts.lidl.com/connect/token".into(),
            tickets_url: "https://tickets.lidlplus.com/api/v1".into(),
            client_credential: "TGlkbFBsdXNOYXRpdmVDbGllbnQ6c2VjcmV0".into(),
            app: "com.lidl.eci.lidl.plus".into(),
            app_version: "999.99.9".into(),
            operating_system: "iOS".into(),
        }
    }
}

/// A status code and body, as returned by a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends blocking HTTP requests.
///
/// Implementations return `Err` only when no response was received; any
/// status code is an `Ok` [`Response`].
pub trait Transport {
    /// Sends a GET request to `url` with `headers`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be completed.
    fn get(&self, url: &str, headers: &[(&str, String)]) -> Result<Response>;

    /// Sends a form-encoded POST request to `url` with `headers`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be completed.
    fn post_form(
        &self,
        url: &str,
        headers: &[(&str, String)],
        form: &[(&str, &str)],
    ) -> Result<Response>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn get(&self, url: &str, headers: &[(&str, String)]) -> Result<Response> {
        (**self).get(url, headers)
    }

    fn post_form(
        &self,
        url: &str,
        headers: &[(&str, String)],
        form: &[(&str, &str)],
    ) -> Result<Response> {
        (**self).post_form(url, headers, form)
    }
}

/// [`Transport`] over a blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns an error if the HTTP client can't be initialised.
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .context("creating HTTP client")?;
        Ok(Self { client })
    }

    fn send(
        request: reqwest::blocking::RequestBuilder,
        url: &str,
        headers: &[(&str, String)],
    ) -> Result<Response> {
        let request = headers
            .iter()
            .fold(request, |req, (name, value)| req.header(*name, value.as_str()));
        let response = request.send().with_context(|| format!("requesting {url}"))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .with_context(|| format!("reading response from {url}"))?
            .to_vec();
        Ok(Response { status, body })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str, headers: &[(&str, String)]) -> Result<Response> {
        Self::send(self.client.get(url), url, headers)
    }

    fn post_form(
        &self,
        url: &str,
        headers: &[(&str, String)],
        form: &[(&str, &str)],
    ) -> Result<Response> {
        Self::send(self.client.post(url).form(form), url, headers)
    }
}

/// Returns the cache file for receipt `id` in `work_dir`.
///
/// # Errors
///
/// Returns an error if `id` can't be used as a file name.
pub fn cache_path(work_dir: &Path, id: &str) -> Result<PathBuf> {
    if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
        bail!("receipt id {id:?} can't be used as a cache file name");
    }
    Ok(work_dir.join(format!("{id}.json")))
}

/// Fetches receipts for one account, country and language.
///
/// Every request first re-validates the [`AuthContext`], so a refresh
/// during a long pagination run is carried into the following requests.
pub struct ReceiptClient<T> {
    transport: T,
    config: ApiConfig,
    auth: AuthContext,
    country_code: String,
    language_code: String,
}

impl<T: Transport> ReceiptClient<T> {
    #[must_use]
    pub fn new(
        transport: T,
        config: ApiConfig,
        auth: AuthContext,
        country_code: &str,
        language_code: &str,
    ) -> Self {
        Self {
            transport,
            config,
            auth,
            country_code: country_code.to_string(),
            language_code: language_code.to_string(),
        }
    }

    /// The token pair as of the last request.
    #[must_use]
    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    fn authorize(&mut self) -> Result<String> {
        self.auth = check_auth(&self.transport, &self.config, &self.auth)?;
        self.auth
            .access_token
            .clone()
            .context("no access token after refresh")
    }

    fn api_headers(&self, access_token: &str) -> Vec<(&'static str, String)> {
        vec![
            ("Accept-Language", self.language_code.clone()),
            ("App", self.config.app.clone()),
            ("App-Version", self.config.app_version.clone()),
            ("Operating-System", self.config.operating_system.clone()),
            ("Authorization", format!("Bearer {access_token}")),
        ]
    }

    /// Fetches one page of receipt summaries.
    ///
    /// # Errors
    ///
    /// Returns an error if authorization fails, the request fails, the API
    /// answers with anything but 200, or the page can't be parsed.
    pub fn list_page(&mut self, page: u32) -> Result<Receipts> {
        let token = self.authorize()?;
        let url = format!(
            "{}/{}/list/{page}",
            self.config.tickets_url, self.country_code
        );
        let response = self.transport.get(&url, &self.api_headers(&token))?;
        if response.status != 200 {
            bail!("failed to retrieve receipts page {page}: status {}", response.status);
        }
        serde_json::from_slice(&response.body)
            .with_context(|| format!("reading receipts page {page}"))
    }

    /// Fetches every page of receipt summaries.
    ///
    /// Pages are requested one after another. The accumulated records are
    /// capped at the listing's `totalCount`.
    ///
    /// # Errors
    ///
    /// Returns the first error from [`Self::list_page`]; nothing fetched
    /// so far is kept.
    pub fn all_receipts(&mut self) -> Result<Receipts> {
        let mut all = self.list_page(1)?;
        if all.total_count == 0 {
            info!("no receipts listed");
            return Ok(all);
        }
        if all.size == 0 {
            bail!(
                "listing reports {} receipts with a page size of 0",
                all.total_count
            );
        }
        let max_page = (all.total_count / all.size)
            .checked_add(1)
            .with_context(|| format!("listing reports too many pages ({} receipts)", all.total_count))?;
        info!("page 1/{max_page} - total: {}", all.total_count);
        for page in 2..=max_page {
            let next = self.list_page(page)?;
            all.records.extend(next.records);
            all.page = page;
            info!("page {page}/{max_page}: {}/{}", all.records.len(), all.total_count);
        }
        all.records.truncate(all.total_count as usize);
        info!("finished fetching all pages");
        Ok(all)
    }

    /// Fetches the receipt `id`, caching it as `{work_dir}/{id}.json`.
    ///
    /// If `prefer_cache` is set and the cache file exists, it is read
    /// instead and no request is made. A fetched receipt always overwrites
    /// the cache file.
    ///
    /// Returns `Ok(None)` if the API doesn't answer 200 or sends a body that
    /// isn't a receipt; nothing is cached in that case.
    ///
    /// # Errors
    ///
    /// Returns an error if authorization or the request fails, or if the
    /// cache file can't be read or written.
    pub fn ticket(&mut self, id: &str, work_dir: &Path, prefer_cache: bool) -> Result<Option<Receipt>> {
        let path = cache_path(work_dir, id)?;
        if prefer_cache && path.is_file() {
            debug!(id, "reading receipt from cache");
            return Receipt::from_file(&path).map(Some);
        }
        let token = self.authorize()?;
        let url = format!(
            "{}/{}/tickets/{id}",
            self.config.tickets_url, self.country_code
        );
        let response = self.transport.get(&url, &self.api_headers(&token))?;
        if response.status != 200 {
            warn!(id, status = response.status, "receipt unavailable");
            return Ok(None);
        }
        let receipt: Receipt = match serde_json::from_slice(&response.body) {
            Ok(receipt) => receipt,
            Err(err) => {
                warn!(id, "receipt unreadable: {err}");
                return Ok(None);
            }
        };
        let data = serde_json::to_vec_pretty(&receipt)?;
        let partial = path.with_extension("json.tmp");
        fs::write(&partial, data).with_context(|| format!("writing {}", partial.display()))?;
        fs::rename(&partial, &path).with_context(|| format!("writing {}", path.display()))?;
        debug!(id, "cached receipt");
        Ok(Some(receipt))
    }

    /// Lists every receipt and fetches each one into `work_dir`.
    ///
    /// Receipts that can't be fetched or cached under their ID are skipped
    /// and reported as missing.
    ///
    /// The summary's total is the sum of the listed receipt totals, not of
    /// the fetched line items.
    ///
    /// # Errors
    ///
    /// Returns an error if `work_dir` can't be created, or any error from
    /// [`Self::all_receipts`] or [`Self::ticket`].
    pub fn fetch_all(&mut self, work_dir: &Path, prefer_cache: bool) -> Result<FetchSummary> {
        fs::create_dir_all(work_dir)
            .with_context(|| format!("creating {}", work_dir.display()))?;
        let receipts = self.all_receipts()?;
        let mut summary = FetchSummary {
            listed: receipts.records.len(),
            ..FetchSummary::default()
        };
        for record in &receipts.records {
            summary.total += record.total_amount;
            let path = match cache_path(work_dir, &record.id) {
                Ok(path) => path,
                Err(err) => {
                    warn!("skipping receipt: {err}");
                    summary.missing.push(record.id.clone());
                    continue;
                }
            };
            let from_cache = prefer_cache && path.is_file();
            match self.ticket(&record.id, work_dir, prefer_cache)? {
                Some(_) if from_cache => summary.cached += 1,
                Some(_) => summary.downloaded += 1,
                None => summary.missing.push(record.id.clone()),
            }
        }
        info!("total: {}", summary.total);
        Ok(summary)
    }
}

/// The outcome of [`ReceiptClient::fetch_all`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FetchSummary {
    pub listed: usize,
    pub downloaded: usize,
    pub cached: usize,
    /// IDs of receipts the API wouldn't give us.
    pub missing: Vec<String>,
    pub total: Amount,
}

impl Display for FetchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{:<12} {:>12}", "Listed", self.listed)?;
        writeln!(f, "{:<12} {:>12}", "Downloaded", self.downloaded)?;
        writeln!(f, "{:<12} {:>12}", "From cache", self.cached)?;
        writeln!(f, "{:<12} {:>12}", "Unavailable", self.missing.len())?;
        writeln!(f, "{:-<25}", "")?;
        writeln!(f, "{:<12} {:>12}", "Total", self.total)?;
        Ok(())
    }
}
