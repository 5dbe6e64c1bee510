use facet::Facet;

/// Frame-stabilization knobs; see the native `stabilize` capability.
///
/// Capture is considered stable once `required_matches` consecutive
/// frames agree within `threshold`, after at least
/// `min_screenshots_count` frames, polling every `interval_ms` and
/// giving up after `timeout_ms`.
#[derive(Facet, Debug, Clone, PartialEq)]
#[facet(rename_all = "camelCase")]
pub struct StabilizationConfig {
    pub required_matches: u32,
    pub min_screenshots_count: u32,
    pub interval_ms: u64,
    pub timeout_ms: u64,
    pub save_screenshots: Option<bool>,
    pub threshold: f64,
    #[facet(rename = "includeAA")]
    pub include_aa: Option<bool>,
}

impl Default for StabilizationConfig {
    fn default() -> Self {
        Self {
            required_matches: 3,
            min_screenshots_count: 2,
            interval_ms: 250,
            timeout_ms: 15_000,
            save_screenshots: None,
            threshold: 0.0,
            include_aa: None,
        }
    }
}

/// Signed configuration the runner provisions before a session; testing
/// cannot proceed without it.
#[derive(Facet, Debug, Clone, PartialEq)]
#[facet(rename_all = "camelCase")]
pub struct DeviceConfig {
    pub include: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
    pub init_snapshot_index: Option<u32>,
    pub stabilization: StabilizationConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            include: None,
            exclude: None,
            init_snapshot_index: None,
            stabilization: StabilizationConfig::default(),
        }
    }
}
