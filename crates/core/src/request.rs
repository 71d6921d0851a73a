//! Write-operation model and its translation into `_bulk` protocol lines.
//!
//! Queue items arrive as a tagged JSON object:
//!
//! ```text
//! {"type": "index", "index": {"index": "lr", "id": "1", "doc": {"field": "value"}}}
//! ```
//!
//! Only the sub-object named by `type` is read. The other sub-objects are
//! ignored without being validated.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

/// Applied when a `version` is given without a `versionType`.
pub const DEFAULT_VERSION_TYPE: &str = "internal";

// ============================================================================
// Operation kinds
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
  Index,
  Update,
  Delete,
}

impl OperationKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      OperationKind::Index => "index",
      OperationKind::Update => "update",
      OperationKind::Delete => "delete",
    }
  }
}

impl FromStr for OperationKind {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "index" => Ok(OperationKind::Index),
      "update" => Ok(OperationKind::Update),
      "delete" => Ok(OperationKind::Delete),
      other => Err(Error::InvalidOperationType(Some(other.to_string()))),
    }
  }
}

impl fmt::Display for OperationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// ============================================================================
// Wire types
// ============================================================================

/// Addressing and concurrency-control fields shared by every variant.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
  pub index: String,
  #[serde(rename = "type", default)]
  pub doc_type: Option<String>,
  #[serde(default)]
  pub id: Option<String>,
  #[serde(default)]
  pub parent: Option<String>,
  #[serde(default)]
  pub routing: Option<String>,
  /// When absent, matching is unconditional
  #[serde(default)]
  pub version: Option<i64>,
  #[serde(default, alias = "version_type")]
  pub version_type: Option<String>,
}

impl Target {
  /// Version type to render, only present alongside a version.
  fn effective_version_type(&self) -> Option<&str> {
    self
      .version
      .map(|_| non_empty(&self.version_type).unwrap_or(DEFAULT_VERSION_TYPE))
  }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexOp {
  #[serde(flatten)]
  pub target: Target,
  #[serde(default)]
  pub doc: Value,
  #[serde(default)]
  pub pipeline: Option<String>,
  #[serde(default, alias = "retry_on_conflict")]
  pub retry_on_conflict: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOp {
  #[serde(flatten)]
  pub target: Target,
  #[serde(default, alias = "detect_noop")]
  pub detect_noop: Option<bool>,
  #[serde(default)]
  pub doc: Option<Value>,
  #[serde(default, alias = "doc_as_upsert")]
  pub doc_as_upsert: Option<bool>,
  #[serde(default)]
  pub upsert: Option<Value>,
  #[serde(default)]
  pub script: Option<Script>,
  #[serde(default, alias = "retry_on_conflict")]
  pub retry_on_conflict: Option<i32>,
  #[serde(default, alias = "scripted_upsert")]
  pub scripted_upsert: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DeleteOp {
  #[serde(flatten)]
  pub target: Target,
}

/// Script descriptor for updates.
///
/// Accepts either a bare string (inline source) or an object.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Script {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub source: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub lang: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub params: Option<Map<String, Value>>,
}

impl<'de> Deserialize<'de> for Script {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum WireScript {
      Inline(String),
      Full {
        #[serde(default, alias = "inline")]
        source: Option<String>,
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        lang: Option<String>,
        #[serde(default)]
        params: Option<Map<String, Value>>,
      },
    }

    Ok(match WireScript::deserialize(deserializer)? {
      WireScript::Inline(source) => Script {
        source: Some(source),
        ..Default::default()
      },
      WireScript::Full {
        source,
        id,
        lang,
        params,
      } => Script {
        source,
        id,
        lang,
        params,
      },
    })
  }
}

/// Envelope as stored in the queue. Payloads stay untyped until the active one
/// is picked by `type`.
#[derive(Deserialize)]
struct WireRequest {
  #[serde(rename = "type", default)]
  kind: Option<Value>,
  #[serde(default)]
  index: Option<Value>,
  #[serde(default)]
  update: Option<Value>,
  #[serde(default)]
  delete: Option<Value>,
}

// ============================================================================
// Operation
// ============================================================================

/// A parsed write instruction, ready for translation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
  Index(IndexOp),
  Update(UpdateOp),
  Delete(DeleteOp),
}

impl Operation {
  /// Parse one raw queue item.
  pub fn parse(raw: &str) -> Result<Self, Error> {
    let wire: WireRequest = serde_json::from_str(raw)?;

    let kind = match wire.kind {
      Some(Value::String(kind)) => kind.parse::<OperationKind>()?,
      _ => return Err(Error::InvalidOperationType(None)),
    };

    let operation = match kind {
      OperationKind::Index => Operation::Index(serde_json::from_value(wire.index.unwrap_or(Value::Null))?),
      OperationKind::Update => Operation::Update(serde_json::from_value(wire.update.unwrap_or(Value::Null))?),
      OperationKind::Delete => Operation::Delete(serde_json::from_value(wire.delete.unwrap_or(Value::Null))?),
    };

    Ok(operation)
  }

  pub fn kind(&self) -> OperationKind {
    match self {
      Operation::Index(_) => OperationKind::Index,
      Operation::Update(_) => OperationKind::Update,
      Operation::Delete(_) => OperationKind::Delete,
    }
  }

  pub fn target(&self) -> &Target {
    match self {
      Operation::Index(op) => &op.target,
      Operation::Update(op) => &op.target,
      Operation::Delete(op) => &op.target,
    }
  }

  /// Name of the index this operation writes to.
  pub fn index(&self) -> &str {
    &self.target().index
  }

  /// Render the action/metadata line and the optional source line.
  pub fn to_bulk_lines(&self) -> Result<BulkLines, Error> {
    match self {
      Operation::Index(op) => {
        let meta = Action::Index(IndexMeta {
          index: &op.target.index,
          id: non_empty(&op.target.id),
          doc_type: non_empty(&op.target.doc_type),
          parent: non_empty(&op.target.parent),
          version: op.target.version,
          version_type: op.target.effective_version_type(),
          retry_on_conflict: op.retry_on_conflict,
          routing: non_empty(&op.target.routing),
          pipeline: non_empty(&op.pipeline),
        });

        Ok(BulkLines {
          metadata: serde_json::to_string(&meta)?,
          payload: Some(serde_json::to_string(&op.doc)?),
        })
      }

      Operation::Update(op) => {
        let meta = Action::Update(AddressMeta::new(&op.target, op.retry_on_conflict));
        let body = UpdateBody {
          detect_noop: op.detect_noop,
          doc: op.doc.as_ref(),
          doc_as_upsert: op.doc_as_upsert,
          upsert: op.upsert.as_ref(),
          script: op.script.as_ref(),
          scripted_upsert: op.script.as_ref().map(|_| op.scripted_upsert),
        };

        Ok(BulkLines {
          metadata: serde_json::to_string(&meta)?,
          payload: Some(serde_json::to_string(&body)?),
        })
      }

      Operation::Delete(op) => {
        let meta = Action::Delete(AddressMeta::new(&op.target, None));

        Ok(BulkLines {
          metadata: serde_json::to_string(&meta)?,
          payload: None,
        })
      }
    }
  }
}

impl fmt::Display for Operation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.to_bulk_lines() {
      Ok(lines) => write!(f, "{}", lines),
      Err(e) => write!(f, "error: {}", e),
    }
  }
}

/// One bulk unit: the action line plus the source line when the action has one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkLines {
  pub metadata: String,
  pub payload: Option<String>,
}

impl BulkLines {
  /// Append the lines to an NDJSON request body, each terminated by `\n`.
  pub fn write_ndjson(&self, body: &mut String) {
    body.push_str(&self.metadata);
    body.push('\n');
    if let Some(payload) = &self.payload {
      body.push_str(payload);
      body.push('\n');
    }
  }
}

impl fmt::Display for BulkLines {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.metadata)?;
    if let Some(payload) = &self.payload {
      write!(f, "\n{}", payload)?;
    }
    Ok(())
  }
}

// ============================================================================
// Rendering
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum Action<'a> {
  Index(IndexMeta<'a>),
  Update(AddressMeta<'a>),
  Delete(AddressMeta<'a>),
}

#[derive(Serialize)]
struct IndexMeta<'a> {
  #[serde(rename = "_index")]
  index: &'a str,
  #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
  id: Option<&'a str>,
  #[serde(rename = "_type", skip_serializing_if = "Option::is_none")]
  doc_type: Option<&'a str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  parent: Option<&'a str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  version: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  version_type: Option<&'a str>,
  retry_on_conflict: i32,
  #[serde(skip_serializing_if = "Option::is_none")]
  routing: Option<&'a str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pipeline: Option<&'a str>,
}

/// Metadata for update and delete actions.
#[derive(Serialize)]
struct AddressMeta<'a> {
  #[serde(rename = "_index")]
  index: &'a str,
  #[serde(rename = "_type", skip_serializing_if = "Option::is_none")]
  doc_type: Option<&'a str>,
  #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
  id: Option<&'a str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  parent: Option<&'a str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  version: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  version_type: Option<&'a str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  routing: Option<&'a str>,
  #[serde(skip_serializing_if = "Option::is_none")]
  retry_on_conflict: Option<i32>,
}

impl<'a> AddressMeta<'a> {
  fn new(target: &'a Target, retry_on_conflict: Option<i32>) -> Self {
    Self {
      index: &target.index,
      doc_type: non_empty(&target.doc_type),
      id: non_empty(&target.id),
      parent: non_empty(&target.parent),
      version: target.version,
      version_type: target.effective_version_type(),
      routing: non_empty(&target.routing),
      retry_on_conflict,
    }
  }
}

#[derive(Serialize)]
struct UpdateBody<'a> {
  #[serde(skip_serializing_if = "Option::is_none")]
  detect_noop: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  doc: Option<&'a Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  doc_as_upsert: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  upsert: Option<&'a Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  script: Option<&'a Script>,
  #[serde(skip_serializing_if = "Option::is_none")]
  scripted_upsert: Option<bool>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
  value.as_deref().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use serde_json::json;

  use super::*;

  fn lines(raw: &str) -> BulkLines {
    Operation::parse(raw)
      .expect("parse")
      .to_bulk_lines()
      .expect("render")
  }

  fn meta_json(lines: &BulkLines) -> Value {
    serde_json::from_str(&lines.metadata).expect("metadata is json")
  }

  #[test]
  fn test_index_to_bulk_lines() {
    let raw = r#"
      {
        "type": "index",
        "index": {
          "index": "lr",
          "type":  "enrolment",
          "id":    "123",
          "routing": "456",
          "doc": { "field1" : "value1" }
        }
      }
    "#;

    let lines = lines(raw);
    assert_eq!(
      lines.metadata,
      r#"{"index":{"_index":"lr","_id":"123","_type":"enrolment","retry_on_conflict":0,"routing":"456"}}"#
    );
    assert_eq!(lines.payload.as_deref(), Some(r#"{"field1":"value1"}"#));
  }

  #[test]
  fn test_update_to_bulk_lines() {
    let raw = r#"
      {
        "type": "update",
        "update": {
          "index": "lr",
          "type":  "enrolment",
          "id":    "123",
          "routing": "456",
          "doc": { "field2" : "value2" }
        }
      }
    "#;

    let lines = lines(raw);
    assert!(lines.metadata.contains(r#""update":{"_index":"lr""#));
    assert!(lines.metadata.contains(r#""_id":"123""#));
    assert!(lines.metadata.contains(r#""_type":"enrolment""#));
    assert!(lines.metadata.contains(r#""routing":"456""#));
    assert_eq!(lines.payload.as_deref(), Some(r#"{"doc":{"field2":"value2"}}"#));
  }

  #[test]
  fn test_delete_to_bulk_lines() {
    let raw = r#"
      {
        "type": "delete",
        "delete": {
          "index": "lr",
          "type":  "enrolment",
          "id":    "123",
          "routing": "456"
        }
      }
    "#;

    let lines = lines(raw);
    assert_eq!(
      lines.metadata,
      r#"{"delete":{"_index":"lr","_type":"enrolment","_id":"123","routing":"456"}}"#
    );
    assert_eq!(lines.payload, None);
  }

  #[test]
  fn test_display_joins_lines() {
    let op = Operation::parse(r#"{"type":"index","index":{"index":"lr","id":"1","doc":{"a":1}}}"#).unwrap();
    assert_eq!(
      op.to_string(),
      "{\"index\":{\"_index\":\"lr\",\"_id\":\"1\",\"retry_on_conflict\":0}}\n{\"a\":1}"
    );

    let op = Operation::parse(r#"{"type":"delete","delete":{"index":"lr","id":"1"}}"#).unwrap();
    assert_eq!(op.to_string(), r#"{"delete":{"_index":"lr","_id":"1"}}"#);
  }

  #[test]
  fn test_doc_key_order_preserved() {
    let lines = lines(r#"{"type":"index","index":{"index":"lr","doc":{"zeta":1,"alpha":2,"mid":{"b":1,"a":2}}}}"#);
    assert_eq!(lines.payload.as_deref(), Some(r#"{"zeta":1,"alpha":2,"mid":{"b":1,"a":2}}"#));
  }

  #[test]
  fn test_version_defaults_to_internal() {
    let lines = lines(r#"{"type":"delete","delete":{"index":"lr","id":"1","version":7}}"#);
    let meta = meta_json(&lines);
    assert_eq!(meta["delete"]["version"], json!(7));
    assert_eq!(meta["delete"]["version_type"], json!("internal"));
  }

  #[test]
  fn test_version_type_explicit_and_alias() {
    let camel = lines(r#"{"type":"index","index":{"index":"lr","version":3,"versionType":"external","doc":{}}}"#);
    assert_eq!(meta_json(&camel)["index"]["version_type"], json!("external"));

    let snake =
      lines(r#"{"type":"update","update":{"index":"lr","version":3,"version_type":"external_gte","doc":{}}}"#);
    assert_eq!(meta_json(&snake)["update"]["version_type"], json!("external_gte"));
  }

  #[test]
  fn test_no_version_renders_no_version_fields() {
    let lines = lines(r#"{"type":"update","update":{"index":"lr","id":"1","versionType":"external","doc":{}}}"#);
    let meta = meta_json(&lines);
    assert!(meta["update"].get("version").is_none());
    assert!(meta["update"].get("version_type").is_none());
  }

  #[test]
  fn test_empty_routing_omitted() {
    let lines = lines(r#"{"type":"index","index":{"index":"lr","id":"1","routing":"","doc":{}}}"#);
    assert_eq!(lines.metadata, r#"{"index":{"_index":"lr","_id":"1","retry_on_conflict":0}}"#);
  }

  #[test]
  fn test_index_pipeline_and_retry() {
    let lines = lines(r#"{"type":"index","index":{"index":"lr","id":"1","pipeline":"geo","retryOnConflict":3,"doc":{}}}"#);
    assert_eq!(
      lines.metadata,
      r#"{"index":{"_index":"lr","_id":"1","retry_on_conflict":3,"pipeline":"geo"}}"#
    );
  }

  #[test]
  fn test_update_optional_fields() {
    let raw = r#"{
      "type": "update",
      "update": {
        "index": "lr",
        "id": "1",
        "retry_on_conflict": 2,
        "detectNoop": true,
        "docAsUpsert": false,
        "upsert": {"count": 0},
        "script": {"source": "ctx._source.count += params.n", "lang": "painless", "params": {"n": 1}},
        "scriptedUpsert": true
      }
    }"#;

    let lines = lines(raw);
    let meta = meta_json(&lines);
    assert_eq!(meta["update"]["retry_on_conflict"], json!(2));

    let body: Value = serde_json::from_str(lines.payload.as_deref().unwrap()).unwrap();
    assert_eq!(
      body,
      json!({
        "detect_noop": true,
        "doc_as_upsert": false,
        "upsert": {"count": 0},
        "script": {"source": "ctx._source.count += params.n", "lang": "painless", "params": {"n": 1}},
        "scripted_upsert": true
      })
    );
  }

  #[test]
  fn test_scripted_upsert_ignored_without_script() {
    let lines = lines(r#"{"type":"update","update":{"index":"lr","id":"1","doc":{"a":1},"scriptedUpsert":true}}"#);
    assert_eq!(lines.payload.as_deref(), Some(r#"{"doc":{"a":1}}"#));
  }

  #[test]
  fn test_inline_script_string() {
    let op = Operation::parse(r#"{"type":"update","update":{"index":"lr","id":"1","script":"ctx._source.n++"}}"#).unwrap();
    let Operation::Update(update) = op else {
      panic!("expected update");
    };
    assert_eq!(update.script.unwrap().source.as_deref(), Some("ctx._source.n++"));
  }

  #[test]
  fn test_inline_script_alias() {
    let op =
      Operation::parse(r#"{"type":"update","update":{"index":"lr","id":"1","script":{"inline":"ctx._source.n++"}}}"#)
        .unwrap();
    let Operation::Update(update) = op else {
      panic!("expected update");
    };
    assert_eq!(update.script.unwrap().source.as_deref(), Some("ctx._source.n++"));
  }

  #[test]
  fn test_inactive_payloads_are_ignored() {
    let raw = r#"{"type":"delete","delete":{"index":"lr","id":"1"},"index":{"doc":"not an index payload"},"update":42}"#;
    let op = Operation::parse(raw).expect("inactive payloads must not be validated");
    assert_eq!(op.kind(), OperationKind::Delete);
    assert_eq!(op.index(), "lr");
  }

  #[test]
  fn test_unknown_fields_ignored() {
    let op = Operation::parse(r#"{"type":"delete","trace":"abc","delete":{"index":"lr","id":"1","extra":true}}"#);
    assert!(op.is_ok());
  }

  #[test]
  fn test_missing_type_is_invalid() {
    let err = Operation::parse(r#"{"index":{"index":"lr"}}"#).unwrap_err();
    assert!(matches!(err, Error::InvalidOperationType(None)));
  }

  #[test]
  fn test_non_string_type_is_invalid() {
    for raw in [
      r#"{"type":5,"index":{"index":"lr"}}"#,
      r#"{"type":null,"index":{"index":"lr"}}"#,
      r#"{"type":["index"],"index":{"index":"lr"}}"#,
    ] {
      let err = Operation::parse(raw).unwrap_err();
      assert!(matches!(err, Error::InvalidOperationType(None)), "{}", raw);
    }
  }

  #[test]
  fn test_unknown_type_is_invalid() {
    let err = Operation::parse(r#"{"type":"upsert","upsert":{"index":"lr"}}"#).unwrap_err();
    assert!(matches!(err, Error::InvalidOperationType(Some(ref t)) if t == "upsert"));
  }

  #[test]
  fn test_malformed_json_is_decode_error() {
    let err = Operation::parse(r#"{"type":"index","index":"#).unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
  }

  #[test]
  fn test_missing_active_payload_is_decode_error() {
    let err = Operation::parse(r#"{"type":"index"}"#).unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
  }

  #[test]
  fn test_missing_index_name_is_decode_error() {
    let err = Operation::parse(r#"{"type":"delete","delete":{"id":"1"}}"#).unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
  }

  #[test]
  fn test_write_ndjson() {
    let mut body = String::new();
    lines(r#"{"type":"index","index":{"index":"lr","id":"1","doc":{"a":1}}}"#).write_ndjson(&mut body);
    lines(r#"{"type":"delete","delete":{"index":"lr","id":"1"}}"#).write_ndjson(&mut body);
    assert_eq!(
      body,
      "{\"index\":{\"_index\":\"lr\",\"_id\":\"1\",\"retry_on_conflict\":0}}\n{\"a\":1}\n{\"delete\":{\"_index\":\"lr\",\"_id\":\"1\"}}\n"
    );
  }

  #[test]
  fn test_operation_kind_from_str() {
    assert_eq!("index".parse::<OperationKind>().unwrap(), OperationKind::Index);
    assert_eq!("update".parse::<OperationKind>().unwrap(), OperationKind::Update);
    assert_eq!("delete".parse::<OperationKind>().unwrap(), OperationKind::Delete);
    assert!("INDEX".parse::<OperationKind>().is_err());
  }
}
