use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::credentials::AccountDirectory;
use crate::error::ConfigError;

/// Number of bounding box slots (`BOUNDING_BOX_1` .. `BOUNDING_BOX_5`).
pub const MAX_BOUNDING_BOXES: usize = 5;

const BOUNDING_BOX_PREFIX: &str = "BOUNDING_BOX_";

const DEFAULT_STREAM_URL: &str = "https://stream.twitter.com/1.1/statuses/filter.json";

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// Built once at startup from the process environment and never
// mutated afterwards.
//
// It defines:
// - Application (consumer) credentials
// - One harvester per configured bounding box
// - The account directory used to resolve OAuth tokens
// - Producer settings for the destination topic
//
#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppCredentials,

    /// Harvesters in slot order. Shared by reference with every
    /// worker generation spawned for the slot.
    pub harvesters: Vec<Arc<HarvesterConfig>>,

    pub accounts: AccountDirectory,

    pub producer: ProducerConfig,

    /// Filtered-stream endpoint
    pub stream_url: String,

    /// Upper bound for draining in-flight deliveries on shutdown
    pub drain_timeout: Duration,

    /// Log payloads instead of producing to the broker
    pub dry_run: bool,
}

impl Config {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&std::env::vars().collect())
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let app = AppCredentials {
            name: required(vars, "APP_PARAMS_NAME")?,
            key: required(vars, "APP_PARAMS_KEY")?,
            secret: required(vars, "APP_PARAMS_SECRET")?,
        };

        let harvesters = parse_bounding_box_slots(vars, &app)?;
        let accounts = AccountDirectory::from_vars(vars)?;
        let producer = ProducerConfig::from_vars(vars)?;

        let stream_url = vars
            .get("HARVESTER_STREAM_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_STREAM_URL.to_string());

        let drain_timeout =
            Duration::from_millis(parse_or(vars, "HARVESTER_DRAIN_TIMEOUT_MS", 10_000u64)?);

        let dry_run = parse_or(vars, "HARVESTER_DRY_RUN", false)?;

        Ok(Self {
            app,
            harvesters,
            accounts,
            producer,
            stream_url,
            drain_timeout,
            dry_run,
        })
    }
}

// ------------------------------------------------------------
// Application credentials
// ------------------------------------------------------------
//
// The consumer key/secret pair registered for the application.
// Shared by every stream; the per-account token comes from the
// account directory.
//
#[derive(Clone, PartialEq)]
pub struct AppCredentials {
    pub name: String,
    pub key: String,
    pub secret: String,
}

impl fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppCredentials")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

// ------------------------------------------------------------
// Bounding box
// ------------------------------------------------------------
//
// Rectangular geographic filter in (minLon, minLat, maxLon, maxLat)
// order, the order the filter endpoint expects.
//
// Invariant: min_lon < max_lon and min_lat < max_lat.
//
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Result<Self, String> {
        for lon in [min_lon, max_lon] {
            if !(-180.0..=180.0).contains(&lon) {
                return Err(format!("longitude {lon} outside [-180, 180]"));
            }
        }
        for lat in [min_lat, max_lat] {
            if !(-90.0..=90.0).contains(&lat) {
                return Err(format!("latitude {lat} outside [-90, 90]"));
            }
        }
        if min_lon >= max_lon {
            return Err(format!("minLon {min_lon} must be below maxLon {max_lon}"));
        }
        if min_lat >= max_lat {
            return Err(format!("minLat {min_lat} must be below maxLat {max_lat}"));
        }

        Ok(Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        })
    }

    /// Value of the `locations` filter parameter.
    pub fn to_locations(&self) -> String {
        format!(
            "{},{},{},{}",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }
}

// ------------------------------------------------------------
// Harvester configuration
// ------------------------------------------------------------
//
// One per configured stream. Immutable once constructed; a
// respawned worker receives the exact same instance.
//
#[derive(Debug, Clone, PartialEq)]
pub struct HarvesterConfig {
    /// Human readable label, also used as the message key
    pub label: String,

    /// Logical account whose OAuth token opens the stream
    pub account: String,

    pub bounding_box: BoundingBox,

    pub app: AppCredentials,
}

impl HarvesterConfig {
    /// Parses `label,account,minLon,minLat,maxLon,maxLat`.
    pub fn parse(key: &str, raw: &str, app: &AppCredentials) -> Result<Self, ConfigError> {
        let fields: Vec<&str> = raw.split(',').map(str::trim).collect();
        if fields.len() != 6 {
            return Err(ConfigError::BoundingBoxFields {
                key: key.to_string(),
                found: fields.len(),
            });
        }

        let label = fields[0];
        let account = fields[1];
        if label.is_empty() || account.is_empty() {
            return Err(ConfigError::Invalid {
                key: key.to_string(),
                reason: "label and account must not be empty".into(),
            });
        }

        let mut coords = [0f64; 4];
        for (slot, field) in coords.iter_mut().zip(&fields[2..]) {
            *slot = field.parse().map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                reason: format!("'{field}' is not a coordinate"),
            })?;
        }

        let bounding_box = BoundingBox::new(coords[0], coords[1], coords[2], coords[3])
            .map_err(|reason| ConfigError::BoundingBoxRange {
                key: key.to_string(),
                reason,
            })?;

        Ok(Self {
            label: label.to_string(),
            account: account.to_string(),
            bounding_box,
            app: app.clone(),
        })
    }
}

/// Collects `BOUNDING_BOX_1..=5` in slot order.
///
/// Empty slots are skipped. A `BOUNDING_BOX_*` key outside the
/// supported range is rejected instead of being ignored.
fn parse_bounding_box_slots(
    vars: &HashMap<String, String>,
    app: &AppCredentials,
) -> Result<Vec<Arc<HarvesterConfig>>, ConfigError> {
    for key in vars.keys() {
        if let Some(suffix) = key.strip_prefix(BOUNDING_BOX_PREFIX) {
            let supported = suffix
                .parse::<usize>()
                .is_ok_and(|n| (1..=MAX_BOUNDING_BOXES).contains(&n));
            if !supported {
                return Err(ConfigError::UnsupportedSlot {
                    key: key.clone(),
                    max: MAX_BOUNDING_BOXES,
                });
            }
        }
    }

    let mut harvesters = Vec::new();
    for slot in 1..=MAX_BOUNDING_BOXES {
        let key = format!("{BOUNDING_BOX_PREFIX}{slot}");
        if let Some(raw) = vars.get(&key) {
            harvesters.push(Arc::new(HarvesterConfig::parse(&key, raw, app)?));
        }
    }

    if harvesters.is_empty() {
        return Err(ConfigError::NoBoundingBoxes(MAX_BOUNDING_BOXES));
    }

    Ok(harvesters)
}

// ------------------------------------------------------------
// Producer configuration
// ------------------------------------------------------------
//
// Knobs for the durable producer behind the publisher.
//
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerConfig {
    /// Broker bootstrap list (host:port[,host:port])
    pub bootstrap_servers: String,

    /// Destination topic for qualifying events
    pub topic: String,

    pub compression: CompressionCodec,

    pub acks: Acks,

    /// Publisher-level retries after the first attempt
    pub retries: u32,

    /// Batching window
    pub linger: Duration,

    /// Fixed delay between publisher retries
    pub retry_backoff: Duration,
}

impl ProducerConfig {
    fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Ok(Self {
            bootstrap_servers: required(vars, "KAFKA_HOST_PORT")?,
            topic: required(vars, "TWEET_TOPIC")?,
            compression: parse_or(vars, "COMPRESSION_TYPE", CompressionCodec::Lz4)?,
            acks: parse_or(vars, "ACKS", Acks::Leader)?,
            retries: parse_or(vars, "RETRIES", 30)?,
            linger: Duration::from_millis(parse_or(vars, "LINGER_MS", 100)?),
            retry_backoff: Duration::from_millis(parse_or(vars, "RETRY_BACKOFF_MS", 1_000)?),
        })
    }
}

/// Compression applied by the producer to each batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionCodec {
    None,
    Gzip,
    Snappy,
    Lz4,
    Zstd,
}

impl CompressionCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Snappy => "snappy",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        }
    }
}

impl FromStr for CompressionCodec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "gzip" => Ok(Self::Gzip),
            "snappy" => Ok(Self::Snappy),
            "lz4" => Ok(Self::Lz4),
            "zstd" | "zstandard" => Ok(Self::Zstd),
            other => Err(format!("unknown compression codec '{other}'")),
        }
    }
}

/// How many replicas must confirm a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acks {
    /// Fire and forget
    None,
    /// Partition leader only
    Leader,
    /// Full in-sync replica quorum
    All,
}

impl Acks {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "0",
            Self::Leader => "1",
            Self::All => "all",
        }
    }
}

impl FromStr for Acks {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "none" => Ok(Self::None),
            "1" | "leader" => Ok(Self::Leader),
            "-1" | "all" => Ok(Self::All),
            other => Err(format!("unknown acknowledgement level '{other}'")),
        }
    }
}

// ------------------------------------------------------------
// Environment helpers
// ------------------------------------------------------------

fn required(vars: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    match vars.get(key).map(|v| v.trim()) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ConfigError::Missing(key.to_string())),
    }
}

fn parse_or<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match vars.get(key).map(|v| v.trim()) {
        None | Some("") => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key: key.to_string(),
            reason: e.to_string(),
        }),
    }
}
