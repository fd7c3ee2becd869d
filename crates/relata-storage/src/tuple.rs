//! Tuple types and the canonical string codec.
//!
//! Objects are encoded as `type:id` and users as one of `type:id`,
//! `type:id#relation` (userset) or `type:*` (typed wildcard). The wildcard
//! `*` is stored verbatim; matching it against concrete users is the
//! evaluator's job, not the datastore's.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Splits an object string at the first `:` into `(type, id)`.
///
/// A string without a `:` yields an empty type, which read filters treat
/// as unbound.
pub fn split_object(object: &str) -> (&str, &str) {
    match object.split_once(':') {
        Some((object_type, object_id)) => (object_type, object_id),
        None => ("", object),
    }
}

/// Joins `(type, id)` back into the canonical `type:id` form.
pub fn build_object(object_type: &str, object_id: &str) -> String {
    format!("{object_type}:{object_id}")
}

/// Splits a user string into `(user_object_type, user_object_id, user_relation)`.
///
/// Accepts all three canonical user forms; `type:*` yields the literal `*`
/// as the id.
pub fn to_user_parts(user: &str) -> (&str, &str, Option<&str>) {
    let (object, relation) = match user.split_once('#') {
        Some((object, relation)) => (object, Some(relation)),
        None => (user, None),
    };
    let (user_object_type, user_object_id) = split_object(object);
    (user_object_type, user_object_id, relation)
}

/// Joins user parts back into the canonical user string.
pub fn from_user_parts(
    user_object_type: &str,
    user_object_id: &str,
    user_relation: Option<&str>,
) -> String {
    let object = if user_object_type.is_empty() {
        user_object_id.to_string()
    } else {
        build_object(user_object_type, user_object_id)
    };
    match user_relation {
        Some(relation) if !relation.is_empty() => format!("{object}#{relation}"),
        _ => object,
    }
}

/// A condition attached to a tuple: a named expression from the
/// authorization model plus optional context parameters, both stored and
/// returned verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TupleCondition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Map<String, serde_json::Value>>,
}

/// A relationship tuple key: `object#relation@user`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TupleKey {
    /// Canonical `type:id` object string.
    pub object: String,
    pub relation: String,
    /// Canonical user string (`type:id`, `type:id#relation`, or `type:*`).
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<TupleCondition>,
}

impl TupleKey {
    pub fn new(
        object: impl Into<String>,
        relation: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            object: object.into(),
            relation: relation.into(),
            user: user.into(),
            condition: None,
        }
    }

    pub fn with_condition(mut self, condition: TupleCondition) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// A stored tuple as returned by read operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    pub key: TupleKey,
    /// Server-assigned UTC insertion time.
    pub timestamp: DateTime<Utc>,
}

/// Mutation kind recorded in the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TupleOperation {
    Write,
    Delete,
}

impl TupleOperation {
    pub fn code(self) -> i16 {
        match self {
            TupleOperation::Write => 0,
            TupleOperation::Delete => 1,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(TupleOperation::Write),
            1 => Some(TupleOperation::Delete),
            _ => None,
        }
    }
}

/// A single entry of the ordered change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleChange {
    pub tuple_key: TupleKey,
    pub operation: TupleOperation,
    pub timestamp: DateTime<Utc>,
}

/// Stored row shape shared by the backends: the tuple key split into its
/// indexed columns, plus the ordering ulid and insertion time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleRecord {
    pub object_type: String,
    pub object_id: String,
    pub relation: String,
    pub user_object_type: String,
    pub user_object_id: String,
    pub user_relation: Option<String>,
    pub condition_name: Option<String>,
    pub condition_context: Option<serde_json::Map<String, serde_json::Value>>,
    pub ulid: String,
    pub inserted_at: DateTime<Utc>,
}

impl TupleRecord {
    /// Splits a wire tuple key into a record. The ulid and timestamp are
    /// assigned by the write path.
    pub fn from_key(key: &TupleKey, ulid: String, inserted_at: DateTime<Utc>) -> Self {
        let (object_type, object_id) = split_object(&key.object);
        let (user_object_type, user_object_id, user_relation) = to_user_parts(&key.user);
        Self {
            object_type: object_type.to_string(),
            object_id: object_id.to_string(),
            relation: key.relation.clone(),
            user_object_type: user_object_type.to_string(),
            user_object_id: user_object_id.to_string(),
            user_relation: user_relation.map(str::to_string),
            condition_name: key.condition.as_ref().map(|c| c.name.clone()),
            condition_context: key.condition.as_ref().and_then(|c| c.context.clone()),
            ulid,
            inserted_at,
        }
    }

    /// Reassembles the canonical wire tuple from the stored columns.
    pub fn into_tuple(self) -> Tuple {
        let condition = self.condition_name.map(|name| TupleCondition {
            name,
            context: self.condition_context,
        });
        Tuple {
            key: TupleKey {
                object: build_object(&self.object_type, &self.object_id),
                relation: self.relation,
                user: from_user_parts(
                    &self.user_object_type,
                    &self.user_object_id,
                    self.user_relation.as_deref(),
                ),
                condition,
            },
            timestamp: self.inserted_at,
        }
    }

    /// Whether this record stores the given natural key.
    pub fn matches_key(&self, key: &TupleKey) -> bool {
        let (object_type, object_id) = split_object(&key.object);
        let (user_object_type, user_object_id, user_relation) = to_user_parts(&key.user);
        self.object_type == object_type
            && self.object_id == object_id
            && self.relation == key.relation
            && self.user_object_type == user_object_type
            && self.user_object_id == user_object_id
            && self.user_relation.as_deref() == user_relation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_object() {
        assert_eq!(split_object("document:budget"), ("document", "budget"));
        assert_eq!(split_object("group:eng:platform"), ("group", "eng:platform"));
        assert_eq!(split_object("no-colon"), ("", "no-colon"));
        assert_eq!(split_object(""), ("", ""));
    }

    #[test]
    fn test_build_object_round_trip() {
        let object = build_object("document", "budget");
        assert_eq!(object, "document:budget");
        assert_eq!(split_object(&object), ("document", "budget"));
    }

    #[test]
    fn test_to_user_parts() {
        assert_eq!(to_user_parts("user:anne"), ("user", "anne", None));
        assert_eq!(
            to_user_parts("group:eng#member"),
            ("group", "eng", Some("member"))
        );
        assert_eq!(to_user_parts("user:*"), ("user", "*", None));
        assert_eq!(to_user_parts("anne"), ("", "anne", None));
    }

    #[test]
    fn test_from_user_parts() {
        assert_eq!(from_user_parts("user", "anne", None), "user:anne");
        assert_eq!(
            from_user_parts("group", "eng", Some("member")),
            "group:eng#member"
        );
        assert_eq!(from_user_parts("user", "*", None), "user:*");
    }

    #[test]
    fn test_record_round_trip() {
        let key = TupleKey::new("document:budget", "viewer", "group:eng#member");
        let now = Utc::now();
        let record = TupleRecord::from_key(&key, "01HQX0".to_string(), now);

        assert_eq!(record.object_type, "document");
        assert_eq!(record.object_id, "budget");
        assert_eq!(record.user_object_type, "group");
        assert_eq!(record.user_object_id, "eng");
        assert_eq!(record.user_relation.as_deref(), Some("member"));

        let tuple = record.into_tuple();
        assert_eq!(tuple.key, key);
        assert_eq!(tuple.timestamp, now);
    }

    #[test]
    fn test_record_preserves_condition() {
        let mut context = serde_json::Map::new();
        context.insert("grant_time".to_string(), serde_json::json!("10m"));
        let key = TupleKey::new("document:budget", "viewer", "user:anne").with_condition(
            TupleCondition {
                name: "non_expired_grant".to_string(),
                context: Some(context.clone()),
            },
        );

        let record = TupleRecord::from_key(&key, "01HQX1".to_string(), Utc::now());
        assert_eq!(record.condition_name.as_deref(), Some("non_expired_grant"));
        assert_eq!(record.condition_context, Some(context));

        let tuple = record.into_tuple();
        assert_eq!(tuple.key.condition, key.condition);
    }

    #[test]
    fn test_matches_key_distinguishes_user_relation() {
        let record = TupleRecord::from_key(
            &TupleKey::new("document:budget", "viewer", "group:eng#member"),
            "01HQX2".to_string(),
            Utc::now(),
        );

        assert!(record.matches_key(&TupleKey::new(
            "document:budget",
            "viewer",
            "group:eng#member"
        )));
        assert!(!record.matches_key(&TupleKey::new("document:budget", "viewer", "group:eng")));
    }

    #[test]
    fn test_operation_codes() {
        assert_eq!(TupleOperation::Write.code(), 0);
        assert_eq!(TupleOperation::Delete.code(), 1);
        assert_eq!(TupleOperation::from_code(1), Some(TupleOperation::Delete));
        assert_eq!(TupleOperation::from_code(7), None);
    }
}
