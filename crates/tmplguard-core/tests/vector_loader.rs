//! JSON test vector loader shared by grammar tests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct TestVector {
    pub description: String,
    pub template: TemplateSource,
    #[serde(default)]
    pub expect: Option<serde_json::Value>,
    #[serde(default)]
    pub expect_error: Option<ExpectError>,
}

#[derive(Debug, Deserialize)]
pub struct ExpectError {
    pub code: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct TemplateSource {
    pub encoding: String,
    pub data: serde_json::Value,
}

impl TemplateSource {
    /// `text` is a single string, `lines` is joined with `\n`.
    pub fn decode(&self) -> String {
        match self.encoding.as_str() {
            "text" => self.data.as_str().expect("text vector must be a string").to_string(),
            "lines" => self
                .data
                .as_array()
                .expect("lines vector must be an array")
                .iter()
                .map(|l| l.as_str().expect("line must be a string"))
                .collect::<Vec<_>>()
                .join("\n"),
            other => panic!("unsupported encoding: {other}"),
        }
    }
}
