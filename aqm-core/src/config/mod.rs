//! Build configuration for PI cells, loadable from TOML or JSON files.

use bandwidth::Bandwidth;
#[cfg(feature = "serde")]
use figment::{
    providers::{Format, Json, Serialized, Toml},
    Figment,
};
#[cfg(feature = "serde")]
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::cells::pi::PiCell;
use crate::cells::Packet;
use crate::error::Error;
#[cfg(feature = "serde")]
use crate::error::ConfigError;
use crate::qdisc::pi::{PiQueueDisc, PiQueueDiscConfig};
use crate::qdisc::queue::DropTailQueue;
use crate::qdisc::{QueueDisc, QueueDiscBuilder};

#[cfg_attr(
    feature = "serde",
    serde_with::skip_serializing_none,
    derive(Serialize, Deserialize),
    serde(default)
)]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PiCellBuildConfig {
    #[cfg_attr(feature = "serde", serde(with = "human_bandwidth::serde"))]
    pub bandwidth: Option<Bandwidth>,
    pub queue_disc: PiQueueDiscConfig,
    /// Random stream early drop decisions are drawn from
    pub stream: Option<i64>,
}

impl PiCellBuildConfig {
    pub fn build_queue_disc<P: Packet>(
        &self,
    ) -> Result<QueueDisc<P, PiQueueDisc, DropTailQueue<P>>, Error> {
        let mut policy = PiQueueDisc::new(self.queue_disc.clone());
        if let Some(stream) = self.stream {
            policy.assign_streams(stream);
        }
        Ok(QueueDiscBuilder::new().build(policy)?)
    }

    /// Must be called within a tokio runtime.
    pub fn into_cell<P: Packet>(self) -> Result<PiCell<P>, Error> {
        debug!(?self, "Build PiCell");
        let queue_disc = self.build_queue_disc()?;
        PiCell::new(self.bandwidth, queue_disc)
    }
}

/// Load a configuration from a `.toml` or `.json` file. Fields missing from
/// the file keep the defaults of their own type.
#[cfg(feature = "serde")]
pub fn load<T: DeserializeOwned>(path: impl AsRef<std::path::Path>) -> Result<T, Error> {
    extract(Figment::new(), path.as_ref())
}

/// Like [`load`], but fields missing from the file, at any depth, are taken
/// from `defaults`.
#[cfg(feature = "serde")]
pub fn load_with_defaults<T>(
    path: impl AsRef<std::path::Path>,
    defaults: &T,
) -> Result<T, Error>
where
    T: Serialize + DeserializeOwned,
{
    extract(Figment::from(Serialized::defaults(defaults)), path.as_ref())
}

#[cfg(feature = "serde")]
fn extract<T: DeserializeOwned>(base: Figment, path: &std::path::Path) -> Result<T, Error> {
    // figment silently skips missing files
    std::fs::metadata(path)?;
    let figment = match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => base.merge(Toml::file(path)),
        Some("json") => base.merge(Json::file(path)),
        _ => {
            return Err(ConfigError::Load(format!(
                "unknown format of {}, expect .toml or .json",
                path.display()
            ))
            .into())
        }
    };
    debug!(path = %path.display(), "Load config");
    figment
        .extract()
        .map_err(|e| ConfigError::Load(e.to_string()).into())
}
