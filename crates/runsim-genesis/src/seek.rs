//! Incremental lookup of one top-level string property in a JSON object.
//!
//! Only the prefix of the document up to the matching property is parsed;
//! every other top-level value is skipped without being materialised.

use std::fmt;
use std::io::{BufRead, BufReader, Read};

use serde::de::{DeserializeSeed, Deserializer, IgnoredAny, MapAccess, Visitor};

use crate::error::GenesisError;

enum Lookup {
    Found(String),
    NotAString,
}

/// Read `reader` until the top-level property `field` is found.
pub(crate) fn seek_string_field<R: Read>(reader: R, field: &str) -> Result<String, GenesisError> {
    let mut reader = BufReader::new(reader);
    expect_object_start(&mut reader)?;

    let mut outcome = None;
    let mut de = serde_json::Deserializer::from_reader(reader);
    let parsed = FieldSeeker {
        field,
        outcome: &mut outcome,
    }
    .deserialize(&mut de);

    // An early return from the visitor leaves the object unterminated, so a
    // parse error is only meaningful when nothing was found.
    match (outcome, parsed) {
        (Some(Lookup::Found(value)), _) => Ok(value),
        (Some(Lookup::NotAString), _) => Err(GenesisError::InvalidFieldType {
            field: field.to_string(),
        }),
        (None, Err(err)) => Err(GenesisError::InvalidJson(err.to_string())),
        (None, Ok(())) => Err(GenesisError::FieldNotFound {
            field: field.to_string(),
        }),
    }
}

fn expect_object_start<R: Read>(reader: &mut BufReader<R>) -> Result<(), GenesisError> {
    loop {
        let (whitespace, first) = {
            let buf = reader
                .fill_buf()
                .map_err(|e| GenesisError::InvalidJson(format!("error getting initial token: {e}")))?;
            if buf.is_empty() {
                return Err(GenesisError::InvalidJson("empty document".to_string()));
            }
            let whitespace = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
            (whitespace, buf.get(whitespace).copied())
        };
        reader.consume(whitespace);

        match first {
            None => continue,
            Some(b'{') => return Ok(()),
            Some(other) => {
                return Err(GenesisError::InvalidJson(format!(
                    "starts with {:?}",
                    other as char
                )))
            }
        }
    }
}

struct FieldSeeker<'a> {
    field: &'a str,
    outcome: &'a mut Option<Lookup>,
}

impl<'de, 'a> DeserializeSeed<'de> for FieldSeeker<'a> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de, 'a> Visitor<'de> for FieldSeeker<'a> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<(), A::Error> {
        while let Some(key) = map.next_key::<String>()? {
            if key == self.field {
                let lookup = match map.next_value::<serde_json::Value>()? {
                    serde_json::Value::String(value) => Lookup::Found(value),
                    _ => Lookup::NotAString,
                };
                *self.outcome = Some(lookup);
                return Ok(());
            }
            map.next_value::<IgnoredAny>()?;
        }
        Ok(())
    }
}
