use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use crate::classifier::{ClassifiedStream, NormalizedResult, StreamCategory, StreamField};
use crate::error::{CacheCorruptError, CacheStoreError};

type StoredFields = BTreeMap<String, String>;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    format_name: Option<String>,
    /// Probe order as `<category>/<sequence>` entries
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    order: Vec<String>,
    /// category tag -> sequence -> fields
    #[serde(flatten)]
    categories: BTreeMap<String, BTreeMap<String, StoredFields>>,
}

fn position(stream: &ClassifiedStream) -> String {
    format!("{}/{}", stream.category.tag(), stream.sequence)
}

/// Serialize a normalized result into its cache record
pub fn encode(result: &NormalizedResult) -> serde_json::Result<Vec<u8>> {
    let mut record = CacheRecord {
        duration: result.duration.clone(),
        format_name: result.format_name.clone(),
        order: result.streams.iter().map(position).collect(),
        categories: BTreeMap::new(),
    };

    for stream in &result.streams {
        let fields = stream
            .fields
            .iter()
            .map(|(field, value)| (field.key().to_string(), value.to_text()))
            .collect();
        record
            .categories
            .entry(stream.category.tag().to_string())
            .or_default()
            .insert(stream.sequence.to_string(), fields);
    }

    serde_json::to_vec(&record)
}

/// Rebuild a normalized result from a cache record
pub fn decode(bytes: &[u8]) -> Result<NormalizedResult, CacheCorruptError> {
    let record: CacheRecord =
        serde_json::from_slice(bytes).map_err(|e| CacheCorruptError(e.to_string()))?;

    let mut streams = Vec::new();
    for (tag, entries) in record.categories {
        let category: StreamCategory = tag.parse().map_err(CacheCorruptError)?;

        let mut sequences = Vec::with_capacity(entries.len());
        for (seq, stored) in entries {
            let sequence: usize = seq.parse().map_err(|_| {
                CacheCorruptError(format!("non-numeric sequence {:?} under {}", seq, tag))
            })?;
            sequences.push(sequence);

            let mut fields = BTreeMap::new();
            for (key, text) in stored {
                let field = StreamField::from_key(&key)
                    .ok_or_else(|| CacheCorruptError(format!("unknown field {:?} under {}", key, tag)))?;
                fields.insert(field, field.value_from_text(&text));
            }
            streams.push(ClassifiedStream { category, sequence, fields });
        }

        sequences.sort_unstable();
        if sequences.iter().enumerate().any(|(i, s)| i != *s) {
            return Err(CacheCorruptError(format!("non-contiguous sequences under {}", tag)));
        }
    }

    let streams = if record.order.is_empty() {
        // Records without an order list: by raw stream index, unindexed streams last
        streams.sort_by_key(|s| (s.raw_index().is_none(), s.raw_index(), s.category, s.sequence));
        streams
    } else {
        restore_order(streams, &record.order)?
    };

    Ok(NormalizedResult {
        duration: record.duration,
        format_name: record.format_name,
        streams,
    })
}

fn restore_order(streams: Vec<ClassifiedStream>, order: &[String]) -> Result<Vec<ClassifiedStream>, CacheCorruptError> {
    let mut by_position: HashMap<String, ClassifiedStream> =
        streams.into_iter().map(|s| (position(&s), s)).collect();

    let mut ordered = Vec::with_capacity(order.len());
    for entry in order {
        let stream = by_position
            .remove(entry)
            .ok_or_else(|| CacheCorruptError(format!("order entry {:?} names no stream", entry)))?;
        ordered.push(stream);
    }
    if !by_position.is_empty() {
        return Err(CacheCorruptError(format!("{} streams missing from order", by_position.len())));
    }
    Ok(ordered)
}

/// Persistent location for cache records, addressed by content hash
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, CacheStoreError>;
    async fn store(&self, key: &str, bytes: &[u8]) -> Result<(), CacheStoreError>;
}

/// One JSON file per content hash under a directory
#[derive(Debug, Clone)]
pub struct FsCache {
    dir: PathBuf,
}

impl FsCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Get the path to the cache file for a given content hash
    pub fn entry_path(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

#[async_trait]
impl CacheStore for FsCache {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, CacheStoreError> {
        let path = self.entry_path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CacheStoreError { key: key.to_string(), source }),
        }
    }

    async fn store(&self, key: &str, bytes: &[u8]) -> Result<(), CacheStoreError> {
        let err = |source: std::io::Error| CacheStoreError { key: key.to_string(), source };
        let path = self.entry_path(key);

        tokio::fs::create_dir_all(&self.dir).await.map_err(err)?;

        // Write then rename so a reader never sees a half-written record
        let temp = self.dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&temp, bytes).await.map_err(err)?;
        if let Err(source) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(err(source));
        }

        debug!("Cached probe result at {}", path.display());
        Ok(())
    }
}

/// Process-local cache
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, CacheStoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn store(&self, key: &str, bytes: &[u8]) -> Result<(), CacheStoreError> {
        self.entries.lock().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use proptest::prelude::*;
    use crate::classifier::{classify, FieldValue};
    use crate::classifier::tests::{raw_record, raw_stream};
    use crate::ffprobe::FFProbeStream;
    use crate::projector::project;

    fn sample() -> NormalizedResult {
        let mut video = raw_stream(0, "video", "h264");
        video.width = Some("320".to_string());
        video.avg_frame_rate = Some("30000/1001".to_string());
        video.disposition = Some(HashMap::from([("default".to_string(), Some(1))]));
        let mut audio = raw_stream(1, "audio", "aac");
        audio.sample_rate = Some("44100".to_string());
        audio.tags = Some(HashMap::from([("title".to_string(), "2001".to_string())]));
        let subtitle = raw_stream(2, "subtitle", "subrip");
        let mut audio2 = raw_stream(3, "audio", "ac3");
        audio2.disposition = Some(HashMap::from([("forced".to_string(), Some(0))]));

        classify(&raw_record(vec![video, audio, subtitle, audio2]))
    }

    #[test]
    fn test_cache_hit_projects_like_fresh_probe() {
        let fresh = sample();
        let decoded = decode(&encode(&fresh).unwrap()).unwrap();
        assert_eq!(project(&decoded), project(&fresh));
        assert_eq!(decoded, fresh);
    }

    #[test]
    fn test_stored_layout_is_text_per_category() {
        let record: serde_json::Value = serde_json::from_slice(&encode(&sample()).unwrap()).unwrap();
        assert_eq!(record["duration"], "2");
        assert_eq!(record["formatName"], "mov,mp4");
        assert_eq!(record["video"]["0"]["width"], "320");
        assert_eq!(record["video"]["0"]["default"], "true");
        assert_eq!(record["audio"]["1"]["codec"], "ac3");
        assert_eq!(record["audio"]["1"]["forced"], "false");
        assert_eq!(record["subtitle"]["0"]["index"], "2");
    }

    #[test]
    fn test_numeric_looking_title_stays_text() {
        let decoded = decode(&encode(&sample()).unwrap()).unwrap();
        let audio = &decoded.streams[1];
        assert_eq!(audio.get(StreamField::Title), Some(&FieldValue::Text("2001".to_string())));
        assert_eq!(audio.get(StreamField::SampleRate), Some(&FieldValue::Integer(44100)));
    }

    #[test]
    fn test_sequences_sort_numerically() {
        let streams: Vec<FFProbeStream> = (0..12).map(|i| raw_stream(i, "audio", "aac")).collect();
        let fresh = classify(&raw_record(streams));
        let decoded = decode(&encode(&fresh).unwrap()).unwrap();
        assert_eq!(decoded, fresh);
    }

    #[test]
    fn test_corrupt_records() {
        let cases: [&[u8]; 8] = [
            b"{not json",
            br#"{"order": ["video/0", "video/1"], "video": {"0": {"codec": "x"}}}"#,
            br#"{"order": ["video/0", "video/0"], "video": {"0": {"codec": "x"}}}"#,
            br#"{"order": ["audio/0"], "video": {"0": {"codec": "x"}}, "audio": {"0": {"codec": "y"}}}"#,
            br#"{"data": {"0": {"codec": "x"}}}"#,
            br#"{"video": {"first": {"codec": "x"}}}"#,
            br#"{"video": {"0": {"pixels": "x"}}}"#,
            br#"{"video": {"1": {"codec": "x"}}}"#,
        ];
        for bytes in cases {
            assert!(decode(bytes).is_err(), "expected corruption for {}", String::from_utf8_lossy(bytes));
        }
    }

    #[test]
    fn test_order_survives_unindexed_and_shuffled_streams() {
        let mut subtitle = raw_stream(0, "subtitle", "subrip");
        subtitle.index = None;
        let fresh = classify(&raw_record(vec![subtitle, raw_stream(1, "audio", "aac")]));
        let decoded = decode(&encode(&fresh).unwrap()).unwrap();
        assert_eq!(project(&decoded), project(&fresh));
        assert_eq!(decoded.streams[0].category, StreamCategory::Subtitle);

        let fresh = classify(&raw_record(vec![raw_stream(1, "audio", "aac"), raw_stream(0, "video", "h264")]));
        let decoded = decode(&encode(&fresh).unwrap()).unwrap();
        assert_eq!(decoded, fresh);
        assert_eq!(decoded.streams[0].category, StreamCategory::Audio);
    }

    #[test]
    fn test_record_without_order_sorts_by_index() {
        let bytes = br#"{"audio": {"0": {"codec": "aac", "index": "1"}}, "video": {"0": {"codec": "h264", "index": "0"}}}"#;
        let decoded = decode(bytes).unwrap();
        let categories: Vec<_> = decoded.streams.iter().map(|s| s.category).collect();
        assert_eq!(categories, vec![StreamCategory::Video, StreamCategory::Audio]);
    }

    #[test]
    fn test_empty_record() {
        let decoded = decode(b"{}").unwrap();
        assert_eq!(decoded, NormalizedResult::default());
    }

    #[tokio::test]
    async fn test_fs_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FsCache::new(dir.path().join("nested"));

        assert_eq!(cache.load("abc123").await.unwrap(), None);
        cache.store("abc123", b"{}").await.unwrap();
        cache.store("abc123", b"{\"duration\":\"1\"}").await.unwrap();
        assert_eq!(cache.load("abc123").await.unwrap().as_deref(), Some(&b"{\"duration\":\"1\"}"[..]));
    }

    #[test]
    fn test_entry_path_is_confined() {
        let cache = FsCache::new("/var/cache/probe");
        assert_eq!(
            cache.entry_path("../../etc/passwd"),
            PathBuf::from("/var/cache/probe/______etc_passwd.json")
        );
    }

    #[tokio::test]
    async fn test_memory_cache() {
        let cache = MemoryCache::new();
        assert!(cache.is_empty());
        cache.store("k", b"v").await.unwrap();
        assert_eq!(cache.load("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(cache.len(), 1);
    }

    fn arb_raw_stream() -> impl Strategy<Value = FFProbeStream> {
        (
            prop_oneof![Just("video"), Just("audio"), Just("subtitle"), Just("data")],
            "[a-z0-9]{1,6}",
            proptest::option::of(prop_oneof![Just("N/A".to_string()), "[0-9]{1,4}"]),
            proptest::option::of(prop_oneof![Just("0/0".to_string()), Just("24/1".to_string())]),
            proptest::option::of("[a-zA-Z0-9 ]{0,10}"),
            proptest::option::of(0i64..2),
            any::<bool>(),
        )
            .prop_map(|(codec_type, codec, width, frame_rate, title, forced, cover)| {
                let mut disposition = HashMap::new();
                if let Some(flag) = forced {
                    disposition.insert("forced".to_string(), Some(flag));
                }
                if cover {
                    disposition.insert("attached_pic".to_string(), Some(1));
                }
                FFProbeStream {
                    codec_type: Some(codec_type.to_string()),
                    codec_name: Some(codec),
                    width,
                    avg_frame_rate: frame_rate,
                    sample_rate: Some("48000".to_string()),
                    disposition: Some(disposition),
                    tags: title.map(|t| HashMap::from([("title".to_string(), t)])),
                    ..Default::default()
                }
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_round_trip_preserves_projection(
            streams in prop::collection::vec((arb_raw_stream(), proptest::option::of(0i64..16)), 0..10)
        ) {
            let streams = streams
                .into_iter()
                .map(|(stream, index)| FFProbeStream { index, ..stream })
                .collect();
            let fresh = classify(&raw_record(streams));
            let decoded = decode(&encode(&fresh).unwrap()).unwrap();
            prop_assert_eq!(project(&decoded), project(&fresh));
        }
    }
}
