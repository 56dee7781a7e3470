//! V8 coverage deltas around a test.
//!
//! A recorder snapshots the Profiler's per-function call counters before a
//! test and again after it; the difference tells which extension functions
//! the keys actually exercised. Content scripts run inside the page target,
//! so recording on a page client covers them; recording on the extension's
//! background client covers the service worker.

use crate::client::CdpClient;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::debug;

/// Counter for one source range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageRange {
    /// Start offset in the script source.
    pub start_offset: u32,
    /// End offset (exclusive).
    pub end_offset: u32,
    /// Execution count.
    pub count: u64,
}

/// Counters for one function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCoverage {
    /// Function name; empty for anonymous functions.
    pub function_name: String,
    /// Ranges, the first covering the whole function.
    pub ranges: Vec<CoverageRange>,
    /// Whether ranges are block-granular.
    #[serde(default)]
    pub is_block_coverage: bool,
}

/// Counters for one script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptCoverage {
    /// V8 script id.
    pub script_id: String,
    /// Script URL.
    pub url: String,
    /// Per-function counters.
    pub functions: Vec<FunctionCoverage>,
}

/// Coverage counters at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageSnapshot {
    /// Per-script counters.
    #[serde(rename = "result")]
    pub scripts: Vec<ScriptCoverage>,
}

type RangeKey = (String, String, u32, u32);

impl CoverageSnapshot {
    /// Sums counters per (url, function, start, end). Scripts loaded twice
    /// under one URL fold together.
    fn counters(&self) -> HashMap<RangeKey, u64> {
        let mut counters = HashMap::new();
        for script in &self.scripts {
            for function in &script.functions {
                for range in &function.ranges {
                    *counters
                        .entry((
                            script.url.clone(),
                            function.function_name.clone(),
                            range.start_offset,
                            range.end_offset,
                        ))
                        .or_insert(0) += range.count;
                }
            }
        }
        counters
    }
}

/// Increase of one range's counter between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaEntry {
    /// Script URL.
    pub url: String,
    /// Function name.
    pub function_name: String,
    /// Range start.
    pub start_offset: u32,
    /// Range end.
    pub end_offset: u32,
    /// Executions between the snapshots.
    pub hits: u64,
}

/// Counter increases between two snapshots, only positive entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageDelta {
    /// Entries ordered by url, then offsets.
    pub entries: Vec<DeltaEntry>,
}

impl CoverageDelta {
    /// Diffs two snapshots. Ranges missing from `before` count from zero;
    /// counters that went down (e.g. after a reload) are dropped.
    #[must_use]
    pub fn between(before: &CoverageSnapshot, after: &CoverageSnapshot) -> Self {
        let baseline = before.counters();
        let mut entries: Vec<DeltaEntry> = after
            .counters()
            .into_iter()
            .filter_map(|(key, count)| {
                let hits = count.saturating_sub(baseline.get(&key).copied().unwrap_or(0));
                let (url, function_name, start_offset, end_offset) = key;
                (hits > 0).then_some(DeltaEntry {
                    url,
                    function_name,
                    start_offset,
                    end_offset,
                    hits,
                })
            })
            .collect();

        entries.sort_by(|a, b| {
            (&a.url, a.start_offset, a.end_offset, &a.function_name).cmp(&(
                &b.url,
                b.start_offset,
                b.end_offset,
                &b.function_name,
            ))
        });
        Self { entries }
    }

    /// Keeps only entries whose URL starts with `prefix`
    /// (e.g. `chrome-extension://<id>/`).
    #[must_use]
    pub fn retain_url_prefix(mut self, prefix: &str) -> Self {
        self.entries.retain(|e| e.url.starts_with(prefix));
        self
    }

    /// Distinct (url, function) pairs that ran.
    #[must_use]
    pub fn functions_hit(&self) -> BTreeSet<(&str, &str)> {
        self.entries
            .iter()
            .map(|e| (e.url.as_str(), e.function_name.as_str()))
            .collect()
    }

    /// True if a function with this name ran.
    #[must_use]
    pub fn hit(&self, function_name: &str) -> bool {
        self.entries.iter().any(|e| e.function_name == function_name)
    }

    /// Sum of all hits.
    #[must_use]
    pub fn total_hits(&self) -> u64 {
        self.entries.iter().map(|e| e.hits).sum()
    }

    /// True if nothing ran.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes the delta as pretty JSON, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns `Io` or `Json` errors.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

/// Reads the current counters without resetting them.
///
/// # Errors
///
/// Returns an error if the Profiler call fails or its result is malformed.
pub async fn snapshot(client: &CdpClient) -> Result<CoverageSnapshot> {
    let result: Value = client
        .send("Profiler.getBestEffortCoverage", json!({}))
        .await?;
    Ok(serde_json::from_value(result)?)
}

/// Records a coverage delta on one target.
///
/// ```ignore
/// let recorder = CoverageRecorder::start(&page_client).await?;
/// send_keys(&page_client, "j", Duration::ZERO).await?;
/// let delta = recorder.finish().await?;
/// assert!(!delta.is_empty());
/// ```
#[derive(Debug)]
pub struct CoverageRecorder<'a> {
    client: &'a CdpClient,
    baseline: CoverageSnapshot,
}

impl<'a> CoverageRecorder<'a> {
    /// Starts precise call counting and takes the baseline snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the Profiler domain is unavailable.
    pub async fn start(client: &'a CdpClient) -> Result<Self> {
        client.enable("Profiler").await?;
        client
            .send(
                "Profiler.startPreciseCoverage",
                json!({ "callCount": true, "detailed": true }),
            )
            .await?;
        let baseline = snapshot(client).await?;
        debug!(scripts = baseline.scripts.len(), "coverage baseline taken");
        Ok(Self { client, baseline })
    }

    /// Snapshot taken at start.
    #[must_use]
    pub fn baseline(&self) -> &CoverageSnapshot {
        &self.baseline
    }

    /// Delta so far, leaving counting on.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot fails.
    pub async fn delta(&self) -> Result<CoverageDelta> {
        let after = snapshot(self.client).await?;
        Ok(CoverageDelta::between(&self.baseline, &after))
    }

    /// Takes the final delta and stops precise coverage.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot or stop call fails.
    pub async fn finish(self) -> Result<CoverageDelta> {
        let delta = self.delta().await?;
        self.client
            .send("Profiler.stopPreciseCoverage", json!({}))
            .await?;
        debug!(entries = delta.entries.len(), hits = delta.total_hits(), "coverage delta");
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_from(value: Value) -> CoverageSnapshot {
        serde_json::from_value(value).expect("snapshot parses")
    }

    fn before() -> CoverageSnapshot {
        snapshot_from(json!({
            "result": [{
                "scriptId": "12",
                "url": "chrome-extension://ext/content.js",
                "functions": [
                    {"functionName": "scrollDown", "isBlockCoverage": false,
                     "ranges": [{"startOffset": 10, "endOffset": 90, "count": 2}]},
                    {"functionName": "showHints", "isBlockCoverage": false,
                     "ranges": [{"startOffset": 100, "endOffset": 400, "count": 0}]}
                ]
            }]
        }))
    }

    fn after() -> CoverageSnapshot {
        snapshot_from(json!({
            "result": [
                {
                    "scriptId": "12",
                    "url": "chrome-extension://ext/content.js",
                    "functions": [
                        {"functionName": "scrollDown", "isBlockCoverage": false,
                         "ranges": [{"startOffset": 10, "endOffset": 90, "count": 5}]},
                        {"functionName": "showHints", "isBlockCoverage": false,
                         "ranges": [{"startOffset": 100, "endOffset": 400, "count": 0}]}
                    ]
                },
                {
                    "scriptId": "40",
                    "url": "http://127.0.0.1:9873/scroll-test.html",
                    "functions": [
                        {"functionName": "", "isBlockCoverage": false,
                         "ranges": [{"startOffset": 0, "endOffset": 50, "count": 1}]}
                    ]
                }
            ]
        }))
    }

    #[test]
    fn delta_counts_increases_only() {
        let delta = CoverageDelta::between(&before(), &after());
        assert_eq!(delta.entries.len(), 2);
        assert_eq!(delta.total_hits(), 4);
        assert!(delta.hit("scrollDown"));
        assert!(!delta.hit("showHints"));
    }

    #[test]
    fn new_scripts_count_from_zero() {
        let delta = CoverageDelta::between(&before(), &after());
        let page = delta
            .entries
            .iter()
            .find(|e| e.url.ends_with("scroll-test.html"))
            .expect("page script entry");
        assert_eq!(page.hits, 1);
    }

    #[test]
    fn decreased_counters_are_dropped() {
        let delta = CoverageDelta::between(&after(), &before());
        assert!(delta.is_empty());
    }

    #[test]
    fn prefix_filter_keeps_extension_scripts() {
        let delta =
            CoverageDelta::between(&before(), &after()).retain_url_prefix("chrome-extension://ext/");
        assert_eq!(delta.entries.len(), 1);
        assert_eq!(
            delta.functions_hit().into_iter().collect::<Vec<_>>(),
            vec![("chrome-extension://ext/content.js", "scrollDown")]
        );
    }

    #[test]
    fn duplicate_urls_fold_together() {
        let twice = snapshot_from(json!({
            "result": [
                {"scriptId": "1", "url": "a.js", "functions": [
                    {"functionName": "f", "ranges": [{"startOffset": 0, "endOffset": 5, "count": 1}]}
                ]},
                {"scriptId": "2", "url": "a.js", "functions": [
                    {"functionName": "f", "ranges": [{"startOffset": 0, "endOffset": 5, "count": 2}]}
                ]}
            ]
        }));
        let delta = CoverageDelta::between(&CoverageSnapshot::default(), &twice);
        assert_eq!(delta.entries.len(), 1);
        assert_eq!(delta.entries[0].hits, 3);
    }

    #[test]
    fn writes_json_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("scroll.json");
        let delta = CoverageDelta::between(&before(), &after());
        delta.write_json(&path).unwrap();

        let read: CoverageDelta =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(read, delta);
    }
}
