//! Query filters that render to a Mongo filter document and can also be
//! evaluated against an in-memory document.

use std::cmp::Ordering;

use mongodb::bson::{doc, Bson, Document};

#[derive(Debug, Clone)]
enum Condition {
    /// Equality. An array field matches when any element is equal.
    Eq(String, Bson),
    Ne(String, Bson),
    In(String, Vec<Bson>),
    /// Case-insensitive substring match on any of the fields.
    Search(Vec<String>, String),
    Gte(String, Bson),
    Lte(String, Bson),
}

#[derive(Debug, Clone, Default)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: &str) -> Self {
        Self::new().eq("_id", id)
    }

    pub fn eq(mut self, field: &str, value: impl Into<Bson>) -> Self {
        self.conditions.push(Condition::Eq(field.to_string(), value.into()));
        self
    }

    pub fn ne(mut self, field: &str, value: impl Into<Bson>) -> Self {
        self.conditions.push(Condition::Ne(field.to_string(), value.into()));
        self
    }

    pub fn any_of(mut self, field: &str, values: Vec<Bson>) -> Self {
        self.conditions.push(Condition::In(field.to_string(), values));
        self
    }

    pub fn search(mut self, fields: &[&str], text: &str) -> Self {
        self.conditions.push(Condition::Search(
            fields.iter().map(|f| f.to_string()).collect(),
            text.to_string(),
        ));
        self
    }

    pub fn gte(mut self, field: &str, value: impl Into<Bson>) -> Self {
        self.conditions.push(Condition::Gte(field.to_string(), value.into()));
        self
    }

    pub fn lte(mut self, field: &str, value: impl Into<Bson>) -> Self {
        self.conditions.push(Condition::Lte(field.to_string(), value.into()));
        self
    }

    /// Adds an equality condition only when a value is present. Used for
    /// optional query-string filters.
    pub fn eq_opt<V: Into<Bson>>(self, field: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.eq(field, v),
            None => self,
        }
    }

    pub fn to_document(&self) -> Document {
        let mut parts: Vec<Document> = self.conditions.iter().map(condition_document).collect();
        match parts.len() {
            0 => Document::new(),
            1 => parts.remove(0),
            _ => doc! { "$and": parts },
        }
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.conditions.iter().all(|c| condition_matches(c, document))
    }
}

fn condition_document(condition: &Condition) -> Document {
    match condition {
        Condition::Eq(field, value) => doc! { field.as_str(): value.clone() },
        Condition::Ne(field, value) => doc! { field.as_str(): { "$ne": value.clone() } },
        Condition::In(field, values) => doc! { field.as_str(): { "$in": values.clone() } },
        Condition::Search(fields, text) => {
            let pattern = regex::escape(text);
            let alternatives: Vec<Document> = fields
                .iter()
                .map(|f| doc! { f.as_str(): { "$regex": pattern.as_str(), "$options": "i" } })
                .collect();
            doc! { "$or": alternatives }
        }
        Condition::Gte(field, value) => doc! { field.as_str(): { "$gte": value.clone() } },
        Condition::Lte(field, value) => doc! { field.as_str(): { "$lte": value.clone() } },
    }
}

fn condition_matches(condition: &Condition, document: &Document) -> bool {
    match condition {
        Condition::Eq(field, value) => field_equals(lookup(document, field), value),
        Condition::Ne(field, value) => !field_equals(lookup(document, field), value),
        Condition::In(field, values) => {
            let current = lookup(document, field);
            values.iter().any(|v| field_equals(current, v))
        }
        Condition::Search(fields, text) => {
            let needle = text.to_lowercase();
            fields.iter().any(|f| match lookup(document, f) {
                Some(Bson::String(s)) => s.to_lowercase().contains(&needle),
                _ => false,
            })
        }
        Condition::Gte(field, value) => matches!(
            lookup(document, field).and_then(|v| compare(v, value)),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Condition::Lte(field, value) => matches!(
            lookup(document, field).and_then(|v| compare(v, value)),
            Some(Ordering::Less | Ordering::Equal)
        ),
    }
}

/// Resolves a dotted path such as `location.city`.
pub(crate) fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Bson::Document(inner) => inner.get(part)?,
            _ => return None,
        };
    }
    Some(current)
}

fn field_equals(current: Option<&Bson>, expected: &Bson) -> bool {
    match current {
        // Mongo treats a missing field as equal to null.
        None => matches!(expected, Bson::Null),
        Some(Bson::Array(items)) if !matches!(expected, Bson::Array(_)) => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(value) => values_equal(value, expected),
    }
}

fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

/// Ordering between two values of the same kind; `None` across kinds.
pub(crate) fn compare(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        doc! {
            "_id": "c1",
            "companyName": "Anadolu Makina A.Ş.",
            "participants": ["u1", "u2"],
            "priority": 3,
            "location": { "city": "İzmir" },
            "endDate": "2026-11-01",
        }
    }

    #[test]
    fn array_fields_match_on_membership() {
        assert!(Filter::new().eq("participants", "u2").matches(&sample()));
        assert!(!Filter::new().eq("participants", "u3").matches(&sample()));
    }

    #[test]
    fn search_is_case_insensitive_substring() {
        let filter = Filter::new().search(&["companyName", "vkn"], "makina");
        assert!(filter.matches(&sample()));
        let rendered = filter.to_document();
        assert!(rendered.contains_key("$or"));
    }

    #[test]
    fn range_conditions_combine() {
        let filter = Filter::new().gte("endDate", "2026-10-16").lte("endDate", "2026-11-15");
        assert!(filter.matches(&sample()));
        let filter = Filter::new().gte("endDate", "2026-11-02");
        assert!(!filter.matches(&sample()));
        assert!(Filter::new().gte("endDate", "x").lte("endDate", "y").to_document().contains_key("$and"));
    }

    #[test]
    fn numeric_equality_spans_integer_widths() {
        assert!(Filter::new().eq("priority", 3i64).matches(&sample()));
        assert!(Filter::new().eq("location.city", "İzmir").matches(&sample()));
    }

    #[test]
    fn missing_field_equals_null() {
        assert!(Filter::new().eq("deletedAt", Bson::Null).matches(&sample()));
        assert!(Filter::new().ne("deletedAt", "x").matches(&sample()));
    }

    #[test]
    fn empty_filter_renders_empty_document() {
        assert!(Filter::new().to_document().is_empty());
        assert!(Filter::new().matches(&sample()));
    }
}
