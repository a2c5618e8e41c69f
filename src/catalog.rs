/*!
 * Remote catalog search and product download.
 *
 * The catalog is queried with a well-known-text geometry and a date range and
 * answers with pages of items, each pointing at a downloadable product file.
 * Downloads are strictly sequential; progress is reported through the `log`
 * facade at whatever level the caller configured.
 */

use crate::{
    error::{SwathPixError, SwathPixResult},
    geo::AreaOfInterest,
};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Deserialize;
use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

/// Catalog collection holding swath pixel-cloud products.
pub const PIXEL_CLOUD_COLLECTION: &str = "SWOT_L2_HR_PIXC";

const API_KEY_HEADER: &str = "X-API-Key";
const ITEMS_PER_PAGE: usize = 2000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TIME_QUERY_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// One product the catalog offers for download.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    #[serde(default)]
    pub properties: ItemProperties,
    #[serde(default)]
    pub assets: HashMap<String, Asset>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemProperties {
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Asset {
    pub href: String,
    #[serde(default)]
    pub title: Option<String>,
}

impl CatalogItem {
    /// The asset holding the product file itself.
    pub fn download_href(&self) -> Option<&str> {
        self.assets
            .get("data")
            .or_else(|| self.assets.values().next())
            .map(|asset| asset.href.as_str())
    }

    /// File name the product is stored under locally: the last segment of the
    /// download URL, or the item id when the URL has none.
    pub fn file_name(&self) -> String {
        self.download_href()
            .and_then(|href| href.trim_end_matches('/').rsplit('/').next())
            .filter(|name| !name.is_empty() && !name.contains(':'))
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}.nc", self.id))
    }
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    features: Vec<CatalogItem>,
}

/// Synchronous client for the product catalog.
pub struct CatalogClient {
    endpoint: String,
    collection: String,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
}

impl CatalogClient {
    pub fn new<E, C>(endpoint: E, collection: C) -> SwathPixResult<Self>
    where
        E: Into<String>,
        C: Into<String>,
    {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(CatalogClient {
            endpoint: endpoint.into(),
            collection: collection.into(),
            api_key: None,
            client,
        })
    }

    /// Authenticate requests with an API key.
    pub fn with_api_key<S: Into<String>>(mut self, api_key: S) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Search the catalog for products intersecting `geometry` within the
    /// date range, walking every result page.
    pub fn search(
        &self,
        geometry: &AreaOfInterest,
        dates: (DateTime<Utc>, DateTime<Utc>),
    ) -> SwathPixResult<Vec<CatalogItem>> {
        let (start, end) = dates;
        if end < start {
            return Err(SwathPixError::Catalog(format!(
                "empty date range: {start} to {end}"
            )));
        }

        let geom = geometry.to_wkt();
        let start_s = start.format(TIME_QUERY_FORMAT).to_string();
        let end_s = end.format(TIME_QUERY_FORMAT).to_string();
        let per_page_s = ITEMS_PER_PAGE.to_string();

        let url = format!("{}/search", self.endpoint.trim_end_matches('/'));

        let mut items = Vec::new();
        let mut page = 1usize;
        loop {
            let page_s = page.to_string();
            let query = [
                ("productType", self.collection.as_str()),
                ("geom", geom.as_str()),
                ("start", start_s.as_str()),
                ("end", end_s.as_str()),
                ("page", page_s.as_str()),
                ("items_per_page", per_page_s.as_str()),
            ];

            let mut request = self.client.get(&url).query(&query);
            if let Some(key) = &self.api_key {
                request = request.header(API_KEY_HEADER, key);
            }

            let response = request.send()?.error_for_status()?;
            let page_items: SearchPage = response.json()?;

            let count = page_items.features.len();
            debug!("catalog page {page} returned {count} items");
            items.extend(page_items.features);

            if count < ITEMS_PER_PAGE {
                break;
            }
            page += 1;
        }

        info!("catalog search matched {} products", items.len());
        Ok(items)
    }
}

/// Retrieves catalog products into a local directory, one at a time.
///
/// A product that is already present is skipped, and a partial download is
/// never visible under its final name: data is staged in a `.part` file and
/// renamed only after the full advertised length has arrived.
pub struct Downloader {
    catalog: CatalogClient,
    destination: PathBuf,
}

impl Downloader {
    pub fn new<P: Into<PathBuf>>(catalog: CatalogClient, destination: P) -> SwathPixResult<Self> {
        let destination = destination.into();
        fs::create_dir_all(&destination)?;

        Ok(Downloader {
            catalog,
            destination,
        })
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Search the catalog and download everything that matches. Returns the
    /// local paths of all product files, downloaded or already present.
    pub fn run(
        &self,
        geometry: &AreaOfInterest,
        dates: (DateTime<Utc>, DateTime<Utc>),
    ) -> SwathPixResult<Vec<PathBuf>> {
        let items = self.catalog.search(geometry, dates)?;

        let mut paths = Vec::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            debug!("[{}/{}] {}", idx + 1, items.len(), item.id);
            paths.extend(self.fetch(item)?);
        }

        Ok(paths)
    }

    /// Download a single product. Zip-packaged deliveries are unpacked into
    /// the destination directory and the contained file paths are returned.
    pub fn fetch(&self, item: &CatalogItem) -> SwathPixResult<Vec<PathBuf>> {
        let href = item.download_href().ok_or_else(|| {
            SwathPixError::Catalog(format!("product {} has no downloadable asset", item.id))
        })?;

        let file_name = item.file_name();
        let target = self.destination.join(&file_name);

        if target.is_file() {
            debug!("{file_name} already downloaded, skipping");
        } else {
            let part = self.destination.join(format!("{file_name}.part"));
            if let Err(err) = self.fetch_to(href, &part) {
                let _ = fs::remove_file(&part);
                return Err(err);
            }
            fs::rename(&part, &target)?;
            info!("downloaded {file_name}");
        }

        if file_name.ends_with(".zip") {
            self.extract_zip(&target)
        } else {
            Ok(vec![target])
        }
    }

    fn fetch_to(&self, url: &str, part: &Path) -> SwathPixResult<()> {
        let mut request = self.catalog.client.get(url);
        if let Some(key) = &self.catalog.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let mut response = request.send()?.error_for_status()?;
        let expected = response.content_length();

        let mut file = fs::File::create(part)?;
        let written = response.copy_to(&mut file)?;

        if let Some(expected) = expected {
            if written != expected {
                return Err(SwathPixError::IncompleteDownload {
                    url: url.to_string(),
                    got: written,
                    expected,
                });
            }
        }

        Ok(())
    }

    /// Unpack a zipped product delivery next to the archive. Entry paths are
    /// flattened; only file names land in the destination directory.
    fn extract_zip(&self, archive_path: &Path) -> SwathPixResult<Vec<PathBuf>> {
        let file = fs::File::open(archive_path)?;
        let mut archive = zip::ZipArchive::new(file)?;

        let mut extracted = Vec::new();
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            if entry.is_dir() {
                continue;
            }

            let entry_name = match entry.enclosed_name().and_then(|p| {
                p.file_name().map(|n| n.to_string_lossy().to_string())
            }) {
                Some(name) => name,
                None => continue,
            };

            let out_path = self.destination.join(entry_name);
            let mut out = fs::File::create(&out_path)?;
            io::copy(&mut entry, &mut out)?;
            extracted.push(out_path);
        }

        Ok(extracted)
    }
}
