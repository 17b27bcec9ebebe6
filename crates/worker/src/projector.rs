use std::collections::BTreeMap;
use serde::ser::{Serialize, SerializeMap, Serializer};
use crate::classifier::{ClassifiedStream, NormalizedResult};

/// Flat key/value map handed to the metadata store
pub type FlatMetadataMap = BTreeMap<String, String>;

pub const DURATION_KEY: &str = "fileinfo/duration";
pub const FORMAT_NAME_KEY: &str = "fileinfo/formatName";
pub const STREAM_KEY_PREFIX: &str = "stream/";

/// Key for the n-th retained stream, counted across all categories
pub fn stream_key(n: usize) -> String {
    format!("{}{}", STREAM_KEY_PREFIX, n)
}

/// Serializes a stream as `{"type": ..., <fields in declaration order>}`
struct StreamRecord<'a>(&'a ClassifiedStream);

impl Serialize for StreamRecord<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let stream = self.0;
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", stream.category.tag())?;
        for (field, value) in stream.fields.iter().filter(|(f, _)| f.is_projected()) {
            map.serialize_entry(field.key(), &value.to_json())?;
        }
        map.end()
    }
}

/// Render the embedded record for one stream
pub fn stream_value(stream: &ClassifiedStream) -> String {
    // A map of strings, integers and booleans always serializes
    serde_json::to_string(&StreamRecord(stream)).unwrap_or_default()
}

/// Project a normalized result into the flat store schema
pub fn project(result: &NormalizedResult) -> FlatMetadataMap {
    let mut map = FlatMetadataMap::new();

    if let Some(duration) = &result.duration {
        map.insert(DURATION_KEY.to_string(), duration.clone());
    }
    if let Some(format_name) = &result.format_name {
        map.insert(FORMAT_NAME_KEY.to_string(), format_name.clone());
    }
    for (n, stream) in result.streams.iter().enumerate() {
        map.insert(stream_key(n), stream_value(stream));
    }

    map
}
