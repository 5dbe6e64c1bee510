use globset::{Glob, GlobSet, GlobSetBuilder};
use sherlo_types::{Snapshot, SnapshotMode, StoryRegistry, TargetPlatform};
use tracing::warn;

/// How [`prepare_snapshots`] turns the registry into a traversal plan.
#[derive(Debug, Clone, Default)]
pub struct PrepareOptions {
    /// Emit one snapshot per mode a story requests instead of only the
    /// default mode.
    pub split_by_mode: bool,
    /// When set, stories are filtered before snapshots are emitted.
    pub filter: Option<SnapshotFilter>,
}

/// Story-level filtering applied during preparation.
#[derive(Debug, Clone, Default)]
pub struct SnapshotFilter {
    /// Component-title globs that must match for a story to be kept.
    /// Empty means "keep everything".
    pub include: Vec<String>,
    /// Component-title globs that drop a story.
    pub exclude: Vec<String>,
    /// Platform this process runs on, compared against each story's
    /// `sherlo.platform` restriction.
    pub platform: Option<TargetPlatform>,
}

fn build_globset(patterns: &[String]) -> Option<GlobSet> {
    if patterns.is_empty() {
        return None;
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(error) => warn!(%pattern, %error, "ignoring unparseable filter glob"),
        }
    }
    builder.build().ok()
}

/// Turns the live story registry into the ordered snapshot list for one
/// testing session.
///
/// Stories come out in reverse registration order. That ordering is
/// load-bearing: existing baselines were captured against it, so it must
/// survive reimplementation even though nothing else depends on it.
///
/// The result is immutable; downstream code indexes it by position or by
/// `view_id`.
pub fn prepare_snapshots(registry: &StoryRegistry, options: &PrepareOptions) -> Vec<Snapshot> {
    let include = options
        .filter
        .as_ref()
        .and_then(|filter| build_globset(&filter.include));
    let exclude = options
        .filter
        .as_ref()
        .and_then(|filter| build_globset(&filter.exclude));

    let mut snapshots: Vec<Snapshot> = Vec::new();

    for story in &registry.stories {
        if let Some(filter) = &options.filter {
            let sherlo = story.parameters.sherlo.as_ref();

            if sherlo.and_then(|p| p.exclude) == Some(true) {
                continue;
            }
            if let Some(platform) = filter.platform
                && let Some(required) = sherlo.and_then(|p| p.platform)
                && required != platform
            {
                continue;
            }
            if let Some(include) = &include
                && !include.is_match(&story.title)
            {
                continue;
            }
            if let Some(exclude) = &exclude
                && exclude.is_match(&story.title)
            {
                continue;
            }
        }

        let mut modes = vec![SnapshotMode::DeviceHeight];
        if options.split_by_mode
            && let Some(requested) = story
                .parameters
                .sherlo
                .as_ref()
                .and_then(|p| p.mode.as_ref())
        {
            // Unsupported mode names are dropped silently; a story that
            // requests only unknown modes produces no snapshots.
            let parsed: Vec<SnapshotMode> = requested
                .iter()
                .filter_map(|mode| SnapshotMode::parse(mode).ok())
                .collect();
            if !parsed.is_empty() {
                modes = parsed;
            }
        }

        for mode in modes {
            snapshots.push(Snapshot::from_story(story, mode));
        }
    }

    snapshots.reverse();
    snapshots
}

/// Position of a snapshot in the traversal plan, by mailbox identity.
pub fn index_of_view_id(snapshots: &[Snapshot], view_id: &str) -> Option<usize> {
    snapshots
        .iter()
        .position(|snapshot| snapshot.view_id == view_id)
}
