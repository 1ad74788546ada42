use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::ConfigStore;

/// A JSON settings document patched in place.
///
/// Keys are dotted paths into nested objects (`profiles.defaults.font`).
/// Reads of non-string values return their JSON text. Writes store strings and
/// leave every other key, including unknown ones, where it was.
#[derive(Debug)]
pub struct JsonDocumentStore {
    path: PathBuf,
    io_lock: Mutex<()>,
}

impl JsonDocumentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io_lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<Value> {
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read settings document: {}", self.path.display()))?;
        let stripped = strip_json_comments(&raw);
        serde_json::from_str(&stripped).with_context(|| {
            format!(
                "failed to parse settings document: {}",
                self.path.display()
            )
        })
    }

    fn save(&self, document: &Value) -> Result<()> {
        let mut payload = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut payload, formatter);
        document
            .serialize(&mut serializer)
            .context("failed to serialize settings document")?;
        payload.push(b'\n');

        let staging = self.path.with_extension("json.shellshift-tmp");
        fs::write(&staging, &payload)
            .with_context(|| format!("failed to stage settings document: {}", staging.display()))?;
        if let Err(err) = fs::rename(&staging, &self.path) {
            let _ = fs::remove_file(&staging);
            return Err(err).with_context(|| {
                format!(
                    "failed to replace settings document: {}",
                    self.path.display()
                )
            });
        }
        Ok(())
    }
}

impl ConfigStore for JsonDocumentStore {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn exists(&self) -> Result<bool> {
        Ok(self.path.is_file())
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        let _guard = self
            .io_lock
            .lock()
            .map_err(|_| anyhow!("settings document lock poisoned"))?;
        let document = self.load()?;

        let mut current = &document;
        for segment in key_segments(key)? {
            match current.get(segment) {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }

        Ok(Some(match current {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }))
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self
            .io_lock
            .lock()
            .map_err(|_| anyhow!("settings document lock poisoned"))?;
        let mut document = self.load()?;

        let segments = key_segments(key)?;
        let (last, parents) = segments
            .split_last()
            .ok_or_else(|| anyhow!("settings key must not be empty"))?;

        let mut current = &mut document;
        for segment in parents {
            let object = current
                .as_object_mut()
                .ok_or_else(|| anyhow!("settings key '{key}' crosses a non-object value"))?;
            current = object
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }

        let object = current
            .as_object_mut()
            .ok_or_else(|| anyhow!("settings key '{key}' crosses a non-object value"))?;
        object.insert(last.to_string(), Value::String(value.to_string()));

        self.save(&document)
    }
}

fn key_segments(key: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = key.split('.').collect();
    if segments.iter().any(|segment| segment.trim().is_empty()) {
        return Err(anyhow!("invalid settings key: '{key}'"));
    }
    Ok(segments)
}

/// Removes `//` and `/* */` comments outside string literals; Windows Terminal
/// writes its settings file with comments.
pub(crate) fn strip_json_comments(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    let mut in_string = false;

    while let Some(ch) = chars.next() {
        if in_string {
            out.push(ch);
            match ch {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        let lookahead = chars.peek().copied();
        match (ch, lookahead) {
            ('"', _) => {
                in_string = true;
                out.push(ch);
            }
            ('/', Some('/')) => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut previous = '\0';
                for next in chars.by_ref() {
                    if previous == '*' && next == '/' {
                        break;
                    }
                    previous = next;
                }
            }
            _ => out.push(ch),
        }
    }

    out
}
