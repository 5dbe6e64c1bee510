use sherlo_bridge::RunnerBridge;
use sherlo_device::LaunchMode;
use tracing::info;

/// Which face the SDK wrapper shows the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SherloMode {
    /// Mode not decided yet; nothing is rendered.
    Loading,
    /// Runner-driven capture session.
    Testing,
    /// Manual story browsing with sherlo chrome.
    Preview,
    /// The SDK stays out of the way entirely.
    Original,
}

/// Decides the mode for this launch: a testing launch with a trusted
/// config enters testing mode, anything else falls back to the app as
/// shipped.
pub async fn determine_mode(bridge: &RunnerBridge, launch_mode: LaunchMode) -> SherloMode {
    if launch_mode != LaunchMode::Testing {
        return SherloMode::Original;
    }
    match bridge.get_config().await {
        Ok(_) => SherloMode::Testing,
        Err(error) => {
            info!(%error, "no trusted config; staying in original mode");
            SherloMode::Original
        }
    }
}
