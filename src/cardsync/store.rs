//! The remote note store and its AnkiConnect implementation.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::kind_fail;
use crate::errors::{Error, ErrorKind, Result};
use crate::extract::Fields;
use crate::tags::join_tags;

pub const DEFAULT_ANKI_URL: &str = "http://127.0.0.1:8765";
pub const ANKI_CONNECT_VERSION: u32 = 6;

/// What the store knows about an existing note.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct RemoteNote {
    /// field name to current value
    pub fields: Fields,
    pub tags: BTreeSet<String>,
}

/// Note and tag operations against the flashcard application.
///
/// Every call is synchronous. `update` writes all given fields at once or
/// none of them.
pub trait NoteStore {
    fn create(&mut self, deck: &str, model: &str, fields: &Fields, tags: &BTreeSet<String>) -> Result<u64>;
    fn update(&mut self, remote_id: u64, fields: &Fields) -> Result<()>;
    fn add_tags(&mut self, remote_id: u64, tags: &BTreeSet<String>) -> Result<()>;
    fn remove_tags(&mut self, remote_id: u64, tags: &BTreeSet<String>) -> Result<()>;
    fn get_tags(&mut self, remote_id: u64) -> Result<BTreeSet<String>>;
    /// `None` when no note has this id
    fn note_info(&mut self, remote_id: u64) -> Result<Option<RemoteNote>>;
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    result: Value,
    error: Option<String>,
}

#[derive(Deserialize)]
struct FieldValue {
    #[serde(default)]
    value: String,
}

#[derive(Deserialize)]
struct NoteInfo {
    #[serde(rename = "noteId")]
    note_id: Option<u64>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    fields: BTreeMap<String, FieldValue>,
}

pub struct AnkiConnect {
    url: String,
    client: Client,
}

impl AnkiConnect {
    pub fn new(url: &str, timeout: Duration) -> Result<AnkiConnect> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(AnkiConnect {
            url: url.to_string(),
            client: client,
        })
    }

    pub fn payload(action: &str, params: Option<Value>) -> Value {
        let mut body = json!({ "action": action, "version": ANKI_CONNECT_VERSION });
        if let Some(p) = params {
            body["params"] = p;
        }
        body
    }

    fn request<T: DeserializeOwned>(&self, action: &str, params: Option<Value>) -> Result<T> {
        debug!(action = %action, "AnkiConnect request");
        let response = self.client
            .post(&self.url)
            .json(&AnkiConnect::payload(action, params))
            .send()?
            .error_for_status()?;
        let envelope: Envelope = response.json()?;
        if let Some(err) = envelope.error {
            return Err(Error {
                kind: ErrorKind::Api,
                desc: format!("AnkiConnect error for action={}", action),
                detail: Some(err),
            });
        }
        Ok(serde_json::from_value(envelope.result)?)
    }

    /// check the API is up; the whole run stops here if Anki is not reachable
    pub fn version(&self) -> Result<u64> {
        self.request("version", None)
    }

    fn notes_info(&self, remote_id: u64) -> Result<Option<NoteInfo>> {
        let infos: Vec<NoteInfo> = self.request("notesInfo", Some(json!({ "notes": [remote_id] })))?;
        Ok(infos.into_iter().find(|n| n.note_id == Some(remote_id)))
    }
}

impl NoteStore for AnkiConnect {
    fn create(&mut self, deck: &str, model: &str, fields: &Fields, tags: &BTreeSet<String>) -> Result<u64> {
        let params = json!({
            "note": {
                "deckName": deck,
                "modelName": model,
                "fields": fields,
                "tags": tags,
                "options": { "allowDuplicate": false }
            }
        });
        let id: Option<u64> = self.request("addNote", Some(params))?;
        match id {
            Some(id) => Ok(id),
            None => kind_fail!(Api, format!("addNote returned no id for deck {}", deck)),
        }
    }

    fn update(&mut self, remote_id: u64, fields: &Fields) -> Result<()> {
        let params = json!({ "note": { "id": remote_id, "fields": fields } });
        self.request::<Value>("updateNoteFields", Some(params))?;
        Ok(())
    }

    fn add_tags(&mut self, remote_id: u64, tags: &BTreeSet<String>) -> Result<()> {
        let params = json!({ "notes": [remote_id], "tags": join_tags(tags) });
        self.request::<Value>("addTags", Some(params))?;
        Ok(())
    }

    fn remove_tags(&mut self, remote_id: u64, tags: &BTreeSet<String>) -> Result<()> {
        let params = json!({ "notes": [remote_id], "tags": join_tags(tags) });
        self.request::<Value>("removeTags", Some(params))?;
        Ok(())
    }

    fn get_tags(&mut self, remote_id: u64) -> Result<BTreeSet<String>> {
        match self.notes_info(remote_id)? {
            Some(info) => Ok(info.tags.into_iter().collect()),
            None => kind_fail!(MappingInconsistency, format!("remote note {} does not exist", remote_id)),
        }
    }

    fn note_info(&mut self, remote_id: u64) -> Result<Option<RemoteNote>> {
        Ok(self.notes_info(remote_id)?.map(|info| RemoteNote {
            fields: info.fields.into_iter().map(|(name, f)| (name, f.value)).collect(),
            tags: info.tags.into_iter().collect(),
        }))
    }
}
