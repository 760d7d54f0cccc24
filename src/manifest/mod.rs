use std::path::{Component, Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Deserializer};

use crate::error::{PatchError, Result};
use crate::networking::Fetcher;
use crate::util::short_version;

/// One file in the server's filelist.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
    #[serde(default, deserialize_with = "scalar_string")]
    pub name: String,
    #[serde(default, rename = "md5", deserialize_with = "scalar_string")]
    pub digest: String,
    #[serde(default, deserialize_with = "scalar_string")]
    pub date: String,
    #[serde(default, deserialize_with = "scalar_string")]
    pub zip: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub size: u64,
}

/// Desired state of the installation as published by the patch server.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    #[serde(default, deserialize_with = "scalar_string")]
    pub version: String,
    #[serde(default, rename = "downloadprefix", deserialize_with = "scalar_string")]
    pub download_prefix: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub deletes: Vec<FileEntry>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub downloads: Vec<FileEntry>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub unpacks: Vec<FileEntry>,
}

impl Manifest {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_yaml::from_slice(bytes).map_err(|e| PatchError::MalformedManifest(e.to_string()))
    }

    /// Sum of the declared sizes of every download entry.
    pub fn total_download_size(&self) -> u64 {
        self.downloads.iter().map(|entry| entry.size).sum()
    }

    /// Version label for log lines, or `None` when the token is too short to abbreviate.
    pub fn display_version(&self) -> Option<&str> {
        short_version(&self.version)
    }
}

impl FileEntry {
    /// Location of this entry under `root`, refusing anything that could escape it.
    pub fn local_path(&self, root: &Path) -> Result<PathBuf> {
        resolve_entry_path(root, &self.name)
    }

    /// Whether the entry lives under `prefix` (e.g. `maps/`), ignoring case.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.name
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    }
}

pub fn resolve_entry_path(root: &Path, name: &str) -> Result<PathBuf> {
    let unsafe_path = || PatchError::UnsafePath(name.to_owned());
    if name.is_empty()
        || name.contains("..")
        || name.contains(':')
        || name.starts_with('/')
        || name.starts_with('\\')
    {
        return Err(unsafe_path());
    }

    let mut path = root.to_path_buf();
    for segment in name.split(['/', '\\']).filter(|s| !s.is_empty() && *s != ".") {
        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None) => path.push(part),
            _ => return Err(unsafe_path()),
        }
    }
    if path == root {
        return Err(unsafe_path());
    }
    Ok(path)
}

pub fn manifest_urls(patcher_url: &str, client_tag: &str) -> [String; 2] {
    let base = patcher_url.trim_end_matches('/');
    [
        format!("{base}/filelist_{client_tag}.yml"),
        format!("{base}/{client_tag}/filelist_{client_tag}.yml"),
    ]
}

/// Download and decode the filelist, trying the legacy layout when the primary URL fails.
///
/// Only fetch failures fall back; a document that downloads but does not decode is final.
pub async fn fetch_manifest(
    fetcher: &dyn Fetcher,
    patcher_url: &str,
    client_tag: &str,
) -> Result<Manifest> {
    let [primary, legacy] = manifest_urls(patcher_url, client_tag);
    info!("Downloading {primary}");
    let body = match fetcher.fetch_bytes(&primary).await {
        Ok(body) => body,
        Err(err) => {
            warn!("manifest: {err}");
            info!("Downloading legacy {legacy}");
            fetcher.fetch_bytes(&legacy).await?
        }
    };
    let manifest = Manifest::decode(&body)?;
    info!(
        "manifest: version {} with {} downloads, {} deletes",
        manifest.display_version().unwrap_or(&manifest.version),
        manifest.downloads.len(),
        manifest.deletes.len()
    );
    if !manifest.unpacks.is_empty() {
        debug!("manifest: ignoring {} unpack entries", manifest.unpacks.len());
    }
    Ok(manifest)
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// Producers emit bare scalars (`version: 20240102`), so accept any of them as text.
fn scalar_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::Null => Ok(String::new()),
        serde_yaml::Value::String(text) => Ok(text),
        serde_yaml::Value::Number(number) => Ok(number.to_string()),
        serde_yaml::Value::Bool(flag) => Ok(flag.to_string()),
        other => Err(D::Error::custom(format!("expected a scalar, got {other:?}"))),
    }
}
