use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use log::debug;
use serde_json::Value;
use crate::ffprobe::{FFProbeData, FFProbeStream};

/// Category a retained stream belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StreamCategory {
    Video,
    Audio,
    Subtitle,
    EmbeddedImage,
}

impl StreamCategory {
    pub const ALL: [StreamCategory; 4] = [
        StreamCategory::Video,
        StreamCategory::Audio,
        StreamCategory::Subtitle,
        StreamCategory::EmbeddedImage,
    ];

    /// Map a raw stream to its category; `None` means the stream is dropped
    pub fn of(stream: &FFProbeStream) -> Option<Self> {
        match stream.codec_type.as_deref()? {
            "video" if stream.disposition_flag("attached_pic") == Some(true) => {
                Some(StreamCategory::EmbeddedImage)
            }
            "video" => Some(StreamCategory::Video),
            "audio" => Some(StreamCategory::Audio),
            "subtitle" => Some(StreamCategory::Subtitle),
            _ => None,
        }
    }

    /// Tag used in projected records and cache keys
    pub fn tag(self) -> &'static str {
        match self {
            StreamCategory::Video => "video",
            StreamCategory::Audio => "audio",
            StreamCategory::Subtitle => "subtitle",
            StreamCategory::EmbeddedImage => "image",
        }
    }
}

impl fmt::Display for StreamCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for StreamCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StreamCategory::ALL
            .into_iter()
            .find(|c| c.tag() == s)
            .ok_or_else(|| format!("unknown stream category: {}", s))
    }
}

/// How a field's text is typed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Boolean,
}

/// Normalized per-stream fields. Declaration order is projection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StreamField {
    Codec,
    Index,
    Duration,
    CodecType,
    Forced,
    Default,
    Language,
    Title,
    Width,
    Height,
    Bitrate,
    FrameRate,
    Rotation,
    SampleRate,
    ChannelLayout,
}

impl StreamField {
    pub const ALL: [StreamField; 15] = [
        StreamField::Codec,
        StreamField::Index,
        StreamField::Duration,
        StreamField::CodecType,
        StreamField::Forced,
        StreamField::Default,
        StreamField::Language,
        StreamField::Title,
        StreamField::Width,
        StreamField::Height,
        StreamField::Bitrate,
        StreamField::FrameRate,
        StreamField::Rotation,
        StreamField::SampleRate,
        StreamField::ChannelLayout,
    ];

    pub fn key(self) -> &'static str {
        match self {
            StreamField::Codec => "codec",
            StreamField::Index => "index",
            StreamField::Duration => "duration",
            StreamField::CodecType => "codecType",
            StreamField::Forced => "forced",
            StreamField::Default => "default",
            StreamField::Language => "language",
            StreamField::Title => "title",
            StreamField::Width => "width",
            StreamField::Height => "height",
            StreamField::Bitrate => "bitrate",
            StreamField::FrameRate => "frameRate",
            StreamField::Rotation => "rotation",
            StreamField::SampleRate => "sampleRate",
            StreamField::ChannelLayout => "channelLayout",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        StreamField::ALL.into_iter().find(|f| f.key() == key)
    }

    pub fn kind(self) -> FieldKind {
        match self {
            StreamField::Index
            | StreamField::Width
            | StreamField::Height
            | StreamField::Bitrate
            | StreamField::SampleRate => FieldKind::Integer,
            StreamField::Forced | StreamField::Default => FieldKind::Boolean,
            _ => FieldKind::Text,
        }
    }

    /// Whether the field appears in the projected stream record
    pub fn is_projected(self) -> bool {
        self != StreamField::CodecType
    }

    /// The only place sentinel values are recognised
    pub fn accept(self, raw: Option<&str>) -> Option<&str> {
        let raw = raw?;
        let sentinel = match self {
            StreamField::Width | StreamField::Height | StreamField::Bitrate => Some("N/A"),
            StreamField::FrameRate => Some("0/0"),
            _ => None,
        };
        if raw.is_empty() || Some(raw) == sentinel {
            None
        } else {
            Some(raw)
        }
    }

    /// Type a stored text value; fresh probes and cache reads both go through here
    pub fn value_from_text(self, text: &str) -> FieldValue {
        match self.kind() {
            FieldKind::Integer => text
                .parse::<i64>()
                .map(FieldValue::Integer)
                .unwrap_or_else(|_| FieldValue::Text(text.to_string())),
            FieldKind::Boolean => match text {
                "true" => FieldValue::Bool(true),
                "false" => FieldValue::Bool(false),
                _ => FieldValue::Text(text.to_string()),
            },
            FieldKind::Text => FieldValue::Text(text.to_string()),
        }
    }
}

/// A typed field value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Bool(bool),
}

impl FieldValue {
    /// Text form used in the cache
    pub fn to_text(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Integer(i) => i.to_string(),
            FieldValue::Bool(b) => b.to_string(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Integer(i) => Value::from(*i),
            FieldValue::Bool(b) => Value::Bool(*b),
        }
    }
}

/// One retained stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedStream {
    pub category: StreamCategory,
    /// 0-based position among streams of the same category
    pub sequence: usize,
    pub fields: BTreeMap<StreamField, FieldValue>,
}

impl ClassifiedStream {
    pub fn get(&self, field: StreamField) -> Option<&FieldValue> {
        self.fields.get(&field)
    }

    /// Raw stream index, when the probe reported one
    pub fn raw_index(&self) -> Option<i64> {
        match self.get(StreamField::Index)? {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

/// Canonical intermediate between probe, cache and projection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedResult {
    pub duration: Option<String>,
    pub format_name: Option<String>,
    pub streams: Vec<ClassifiedStream>,
}

/// Classify every stream of a probe record and normalize its fields
pub fn classify(raw: &FFProbeData) -> NormalizedResult {
    let mut next_sequence: BTreeMap<StreamCategory, usize> = BTreeMap::new();
    let mut streams = Vec::with_capacity(raw.streams.len());

    for stream in &raw.streams {
        let Some(category) = StreamCategory::of(stream) else {
            debug!("Dropping stream {:?} with codec type {:?}", stream.index, stream.codec_type);
            continue;
        };

        let counter = next_sequence.entry(category).or_insert(0);
        let sequence = *counter;
        *counter += 1;

        streams.push(ClassifiedStream {
            category,
            sequence,
            fields: map_fields(category, stream),
        });
    }

    NormalizedResult {
        duration: raw.format.duration.clone(),
        format_name: raw.format.format_name.clone(),
        streams,
    }
}

fn map_fields(category: StreamCategory, stream: &FFProbeStream) -> BTreeMap<StreamField, FieldValue> {
    let mut fields = BTreeMap::new();
    let mut put = |field: StreamField, raw: Option<&str>| {
        if let Some(text) = field.accept(raw) {
            fields.insert(field, field.value_from_text(text));
        }
    };

    let index = stream.index.map(|i| i.to_string());
    let forced = stream.disposition_flag("forced").map(|b| b.to_string());
    let default = stream.disposition_flag("default").map(|b| b.to_string());

    // Common fields
    put(StreamField::Codec, stream.codec_name.as_deref());
    put(StreamField::Index, index.as_deref());
    put(StreamField::Duration, stream.duration.as_deref());
    put(StreamField::CodecType, stream.codec_type.as_deref());
    put(StreamField::Forced, forced.as_deref());
    put(StreamField::Default, default.as_deref());
    put(StreamField::Language, stream.tag("language"));
    put(StreamField::Title, stream.tag("title"));

    match category {
        StreamCategory::Video => {
            put(StreamField::Width, stream.width.as_deref());
            put(StreamField::Height, stream.height.as_deref());
            put(StreamField::Bitrate, stream.bit_rate.as_deref());
            put(StreamField::FrameRate, stream.avg_frame_rate.as_deref());
            put(StreamField::Rotation, stream.tag("rotate"));
        }
        StreamCategory::Audio => {
            put(StreamField::SampleRate, stream.sample_rate.as_deref());
            put(StreamField::ChannelLayout, stream.channel_layout.as_deref());
        }
        StreamCategory::Subtitle | StreamCategory::EmbeddedImage => {}
    }

    fields
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use proptest::prelude::*;
    use crate::ffprobe::FFProbeFormat;

    pub(crate) fn raw_stream(index: i64, codec_type: &str, codec: &str) -> FFProbeStream {
        FFProbeStream {
            index: Some(index),
            codec_type: Some(codec_type.to_string()),
            codec_name: Some(codec.to_string()),
            ..Default::default()
        }
    }

    pub(crate) fn raw_record(streams: Vec<FFProbeStream>) -> FFProbeData {
        FFProbeData {
            streams,
            format: FFProbeFormat {
                duration: Some("2".to_string()),
                format_name: Some("mov,mp4".to_string()),
            },
        }
    }

    #[test]
    fn test_category_isolation_and_sequences() {
        let raw = raw_record(vec![
            raw_stream(0, "video", "h264"),
            raw_stream(1, "audio", "aac"),
            raw_stream(2, "audio", "ac3"),
            raw_stream(3, "subtitle", "subrip"),
        ]);

        let result = classify(&raw);
        let shape: Vec<_> = result.streams.iter().map(|s| (s.category, s.sequence)).collect();
        assert_eq!(
            shape,
            vec![
                (StreamCategory::Video, 0),
                (StreamCategory::Audio, 0),
                (StreamCategory::Audio, 1),
                (StreamCategory::Subtitle, 0),
            ]
        );
    }

    #[test]
    fn test_unknown_streams_are_not_counted() {
        let mut untyped = raw_stream(2, "video", "x");
        untyped.codec_type = None;
        let raw = raw_record(vec![
            raw_stream(0, "audio", "aac"),
            raw_stream(1, "data", "bin_data"),
            untyped,
            raw_stream(3, "audio", "opus"),
            raw_stream(4, "attachment", "ttf"),
        ]);

        let result = classify(&raw);
        assert_eq!(result.streams.len(), 2);
        assert_eq!(result.streams[1].sequence, 1);
        assert_eq!(result.streams[1].raw_index(), Some(3));
    }

    #[test]
    fn test_attached_picture_is_embedded_image() {
        let mut cover = raw_stream(2, "video", "mjpeg");
        cover.width = Some("600".to_string());
        cover.disposition = Some(HashMap::from([("attached_pic".to_string(), Some(1))]));
        let raw = raw_record(vec![raw_stream(0, "video", "h264"), cover]);

        let result = classify(&raw);
        assert_eq!(result.streams[1].category, StreamCategory::EmbeddedImage);
        assert_eq!(result.streams[1].sequence, 0);
        assert!(result.streams[1].get(StreamField::Width).is_none());
    }

    #[test]
    fn test_sentinels_are_filtered() {
        let mut video = raw_stream(0, "video", "h264");
        video.width = Some("N/A".to_string());
        video.height = Some("240".to_string());
        video.bit_rate = Some("N/A".to_string());
        video.avg_frame_rate = Some("0/0".to_string());
        video.duration = Some(String::new());

        let result = classify(&raw_record(vec![video]));
        let fields = &result.streams[0].fields;
        assert!(!fields.contains_key(&StreamField::Width));
        assert!(!fields.contains_key(&StreamField::Bitrate));
        assert!(!fields.contains_key(&StreamField::FrameRate));
        assert!(!fields.contains_key(&StreamField::Duration));
        assert_eq!(fields.get(&StreamField::Height), Some(&FieldValue::Integer(240)));
    }

    #[test]
    fn test_disposition_coercion() {
        let mut audio = raw_stream(1, "audio", "aac");
        audio.disposition = Some(HashMap::from([
            ("forced".to_string(), Some(1)),
            ("default".to_string(), Some(0)),
        ]));
        let bare = raw_stream(2, "audio", "aac");

        let result = classify(&raw_record(vec![audio, bare]));
        assert_eq!(result.streams[0].get(StreamField::Forced), Some(&FieldValue::Bool(true)));
        assert_eq!(result.streams[0].get(StreamField::Default), Some(&FieldValue::Bool(false)));
        assert!(result.streams[1].get(StreamField::Forced).is_none());
        assert!(result.streams[1].get(StreamField::Default).is_none());
    }

    #[test]
    fn test_zero_index_and_raw_tags() {
        let mut video = raw_stream(0, "video", "hevc");
        video.tags = Some(HashMap::from([
            ("rotate".to_string(), "-90".to_string()),
            ("language".to_string(), "eng".to_string()),
            ("title".to_string(), "1984".to_string()),
        ]));

        let result = classify(&raw_record(vec![video]));
        let stream = &result.streams[0];
        assert_eq!(stream.get(StreamField::Index), Some(&FieldValue::Integer(0)));
        assert_eq!(stream.get(StreamField::Rotation), Some(&FieldValue::Text("-90".to_string())));
        assert_eq!(stream.get(StreamField::Title), Some(&FieldValue::Text("1984".to_string())));
        assert_eq!(stream.get(StreamField::CodecType), Some(&FieldValue::Text("video".to_string())));
    }

    #[test]
    fn test_audio_fields_only_on_audio() {
        let mut video = raw_stream(0, "video", "h264");
        video.sample_rate = Some("48000".to_string());
        let mut audio = raw_stream(1, "audio", "aac");
        audio.sample_rate = Some("44100".to_string());
        audio.channel_layout = Some("stereo".to_string());
        audio.width = Some("320".to_string());

        let result = classify(&raw_record(vec![video, audio]));
        assert!(result.streams[0].get(StreamField::SampleRate).is_none());
        assert_eq!(result.streams[1].get(StreamField::SampleRate), Some(&FieldValue::Integer(44100)));
        assert!(result.streams[1].get(StreamField::Width).is_none());
    }

    #[test]
    fn test_category_tags_round_trip() {
        for category in StreamCategory::ALL {
            assert_eq!(category.tag().parse::<StreamCategory>(), Ok(category));
        }
        assert!("data".parse::<StreamCategory>().is_err());
    }

    fn codec_type() -> impl Strategy<Value = &'static str> {
        prop_oneof![
            Just("video"),
            Just("audio"),
            Just("subtitle"),
            Just("data"),
            Just("attachment"),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_sequences_are_contiguous_per_category(types in prop::collection::vec(codec_type(), 0..12)) {
            let raw = raw_record(
                types.iter().enumerate().map(|(i, t)| raw_stream(i as i64, t, "c")).collect()
            );
            let result = classify(&raw);

            for category in StreamCategory::ALL {
                let sequences: Vec<_> = result.streams.iter()
                    .filter(|s| s.category == category)
                    .map(|s| s.sequence)
                    .collect();
                let expected: Vec<_> = (0..sequences.len()).collect();
                prop_assert_eq!(sequences, expected);
            }

            let retained = types.iter().filter(|t| matches!(**t, "video" | "audio" | "subtitle")).count();
            prop_assert_eq!(result.streams.len(), retained);
        }
    }
}
