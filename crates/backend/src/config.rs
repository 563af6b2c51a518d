//! Endpoint and network selection.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Errors that can occur when loading connection configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error parsing TOML syntax or shape.
	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),

	/// Error reading a configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// A URL setting could not be parsed.
	#[error("invalid URL for {key}: {value}")]
	InvalidUrl {
		/// Setting name.
		key: &'static str,
		/// Offending value.
		value: String,
	},

	/// `DFX_NETWORK` names something other than `local` or `ic`.
	#[error("unknown network: {0} (expected 'local' or 'ic')")]
	UnknownNetwork(String),
}

/// Which replica network the backend lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
	/// A development replica. Requires the trust bootstrap before use.
	Local,
	/// The public network.
	#[default]
	Ic,
}

impl Network {
	/// Parses the `DFX_NETWORK` spelling.
	pub fn parse(value: &str) -> Result<Self, ConfigError> {
		match value.trim() {
			"local" => Ok(Self::Local),
			"ic" => Ok(Self::Ic),
			other => Err(ConfigError::UnknownNetwork(other.to_string())),
		}
	}

	/// Default API host for the network.
	pub fn default_host(self) -> &'static str {
		match self {
			Self::Local => "http://127.0.0.1:8080",
			Self::Ic => "https://icp-api.io",
		}
	}

	/// Whether connecting must first fetch the replica's root key.
	pub fn needs_trust_bootstrap(self) -> bool {
		self == Self::Local
	}
}

/// Connection settings for the farm backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ConnectionConfig {
	pub network: Network,
	/// Canister id of the backend service.
	pub canister_id: String,
	/// Overrides the network's default API host.
	pub host: Option<String>,
	/// Login page of the delegated identity provider.
	pub identity_provider: String,
	/// Per-request timeout in seconds. Zero disables the client-side timeout.
	pub request_timeout_secs: u64,
	/// Chunk size used when streaming uploads.
	pub upload_chunk_size: usize,
}

impl Default for ConnectionConfig {
	fn default() -> Self {
		Self {
			network: Network::default(),
			canister_id: "uxrrr-q7777-77774-qaaaq-cai".to_string(),
			host: None,
			identity_provider: "https://identity.internetcomputer.org".to_string(),
			request_timeout_secs: 30,
			upload_chunk_size: 64 * 1024,
		}
	}
}

impl ConnectionConfig {
	/// Parse a TOML string into a [`ConnectionConfig`]. Missing keys take defaults.
	pub fn parse(input: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(input)?;
		config.validate()?;
		Ok(config)
	}

	/// Load from a TOML file.
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let input = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::parse(&input)
	}

	/// Build from process environment variables on top of defaults.
	///
	/// Reads `DFX_NETWORK`, `CANISTER_ID_BACKEND`, `II_URL` and `FURROW_HOST`.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	/// Like [`Self::from_env`] with an injectable variable source.
	pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
		let mut config = Self::default();
		if let Some(network) = lookup("DFX_NETWORK") {
			config.network = Network::parse(&network)?;
		}
		if let Some(canister_id) = lookup("CANISTER_ID_BACKEND").filter(|v| !v.is_empty()) {
			config.canister_id = canister_id;
		}
		if let Some(url) = lookup("II_URL").filter(|v| !v.is_empty()) {
			config.identity_provider = url;
		}
		config.host = lookup("FURROW_HOST").filter(|v| !v.is_empty());
		config.validate()?;
		Ok(config)
	}

	/// Resolved API host.
	pub fn host_url(&self) -> Result<Url, ConfigError> {
		let raw = self
			.host
			.as_deref()
			.unwrap_or_else(|| self.network.default_host());
		Url::parse(raw).map_err(|_| ConfigError::InvalidUrl {
			key: "host",
			value: raw.to_string(),
		})
	}

	/// Request timeout, `None` when disabled.
	pub fn request_timeout(&self) -> Option<Duration> {
		(self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
	}

	/// Upload chunk size, never zero.
	pub fn chunk_size(&self) -> usize {
		self.upload_chunk_size.max(1)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		self.host_url()?;
		Url::parse(&self.identity_provider).map_err(|_| ConfigError::InvalidUrl {
			key: "identity-provider",
			value: self.identity_provider.clone(),
		})?;
		Ok(())
	}
}
