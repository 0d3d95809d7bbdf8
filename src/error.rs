/// Errors raised while discovering and routing zeroconf services.
///
/// Only `ListenerUnavailable`, `AlreadyStarted`, `Stopped` and
/// `InvalidPattern` are ever returned to callers. The per-record variants are
/// produced inside a single pipeline, logged, and never abort the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// A property key was not ASCII; the property was dropped.
    #[error("malformed property in {name}: key {key:?} is not ASCII")]
    MalformedProperty { name: String, key: Vec<u8> },

    /// No usable address was found for the record.
    #[error("no usable address for {name}")]
    UnresolvedRecord { name: String },

    /// The HomeKit `sf` flag was present but not an integer.
    #[error("unparseable HomeKit pairing flag {value:?} in {name}")]
    HomeKitPairingFlagUnparseable { name: String, value: String },

    /// The network listener could not be created or could not browse.
    #[error("listener unavailable: {0}")]
    ListenerUnavailable(String),

    /// A configured glob pattern failed to compile.
    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("discovery already started")]
    AlreadyStarted,

    #[error("discovery has been stopped")]
    Stopped,
}
