/// Column Implementation
///
/// A Column is an array-like random-access data container indexed by row.
/// Each Column has a type specifying the type of every value stored; nulls are
/// stored in-line as `ColumnValue::Null` and only accepted by nullable columns.
///
/// # Link columns
///
/// `Link` and `LinkList` columns store row indices into a target table. They
/// are always allowed to be empty (a null link, an empty list) and are kept
/// pointing at the right target rows by `adjust_links`, which the owning table
/// calls whenever the target table changes shape.

use crate::changeset::{IndexAdjuster, RowChange};
use crate::error::{Result, TableError};
use crate::sequence::{new_sequence, Sequence};
use crate::table::StorageHint;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};

/// Column data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Bool,
    /// Milliseconds since the Unix epoch
    DateTime,
    Link,
    LinkList,
}

impl ColumnType {
    pub fn is_link(&self) -> bool {
        matches!(self, ColumnType::Link | ColumnType::LinkList)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, ColumnType::Int32 | ColumnType::Int64)
    }
}

/// Column value enum to support multiple types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnValue {
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bool(bool),
    DateTime(i64),
    Link(usize),
    LinkList(Vec<usize>),
    Null,
}

impl ColumnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            ColumnValue::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ColumnValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Either integer width, widened to i64.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ColumnValue::Int32(v) => Some(*v as i64),
            ColumnValue::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            ColumnValue::Float32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ColumnValue::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            ColumnValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ColumnValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<i64> {
        match self {
            ColumnValue::DateTime(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_link(&self) -> Option<usize> {
        match self {
            ColumnValue::Link(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_link_list(&self) -> Option<&[usize]> {
        match self {
            ColumnValue::LinkList(v) => Some(v),
            _ => None,
        }
    }

    /// Numeric value widened to f64 (integers and floats only).
    pub fn to_f64(&self) -> Option<f64> {
        match self {
            ColumnValue::Int32(n) => Some(*n as f64),
            ColumnValue::Int64(n) => Some(*n as f64),
            ColumnValue::Float32(f) => Some(*f as f64),
            ColumnValue::Float64(f) => Some(*f),
            _ => None,
        }
    }

    /// The column type this value belongs to, None for Null.
    pub fn value_type(&self) -> Option<ColumnType> {
        Some(match self {
            ColumnValue::Int32(_) => ColumnType::Int32,
            ColumnValue::Int64(_) => ColumnType::Int64,
            ColumnValue::Float32(_) => ColumnType::Float32,
            ColumnValue::Float64(_) => ColumnType::Float64,
            ColumnValue::String(_) => ColumnType::String,
            ColumnValue::Bool(_) => ColumnType::Bool,
            ColumnValue::DateTime(_) => ColumnType::DateTime,
            ColumnValue::Link(_) => ColumnType::Link,
            ColumnValue::LinkList(_) => ColumnType::LinkList,
            ColumnValue::Null => return None,
        })
    }

    pub fn to_json_value(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            ColumnValue::Int32(n) => Value::Number((*n).into()),
            ColumnValue::Int64(n) => Value::Number((*n).into()),
            ColumnValue::DateTime(ms) => Value::String(format_datetime(*ms)),
            ColumnValue::Float32(f) => serde_json::Number::from_f64(*f as f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ColumnValue::Float64(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ColumnValue::String(s) => Value::String(s.clone()),
            ColumnValue::Bool(b) => Value::Bool(*b),
            ColumnValue::Link(t) => Value::Number((*t as u64).into()),
            ColumnValue::LinkList(targets) => Value::Array(
                targets
                    .iter()
                    .map(|t| Value::Number((*t as u64).into()))
                    .collect(),
            ),
            ColumnValue::Null => Value::Null,
        }
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Int32(n) => write!(f, "{}", n),
            ColumnValue::Int64(n) => write!(f, "{}", n),
            ColumnValue::Float32(v) => write!(f, "{}", v),
            ColumnValue::Float64(v) => write!(f, "{}", v),
            ColumnValue::String(s) => write!(f, "{}", s),
            ColumnValue::Bool(b) => write!(f, "{}", b),
            ColumnValue::DateTime(ms) => write!(f, "{}", format_datetime(*ms)),
            ColumnValue::Link(t) => write!(f, "->{}", t),
            ColumnValue::LinkList(targets) => write!(f, "[{} links]", targets.len()),
            ColumnValue::Null => write!(f, "null"),
        }
    }
}

/// Hashable identity of a cell value, used by distinct scans and grouping.
/// Floats compare by bit pattern; null is a key of its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Int(i64),
    Float(u64),
    String(String),
    Bool(bool),
    DateTime(i64),
    Link(usize),
    LinkList(Vec<usize>),
    Null,
}

impl From<&ColumnValue> for ValueKey {
    fn from(value: &ColumnValue) -> Self {
        match value {
            ColumnValue::Int32(n) => ValueKey::Int(*n as i64),
            ColumnValue::Int64(n) => ValueKey::Int(*n),
            ColumnValue::Float32(v) => ValueKey::Float((*v as f64).to_bits()),
            ColumnValue::Float64(v) => ValueKey::Float(v.to_bits()),
            ColumnValue::String(s) => ValueKey::String(s.clone()),
            ColumnValue::Bool(b) => ValueKey::Bool(*b),
            ColumnValue::DateTime(ms) => ValueKey::DateTime(*ms),
            ColumnValue::Link(t) => ValueKey::Link(*t),
            ColumnValue::LinkList(targets) => ValueKey::LinkList(targets.clone()),
            ColumnValue::Null => ValueKey::Null,
        }
    }
}

/// Convert days since Unix epoch (1970-01-01) to (year, month, day)
fn ymd_from_days(days: i64) -> (i64, u32, u32) {
    // Algorithm from https://howardhinnant.github.io/date_algorithms.html
    let z = days + 719468;
    let era = z.div_euclid(146097);
    let doe = (z - era * 146097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = (yoe as i64) + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if m <= 2 { y + 1 } else { y };
    (year, m, d)
}

/// Format a datetime (milliseconds since epoch) as ISO 8601 datetime string
pub fn format_datetime(ms: i64) -> String {
    let days = ms.div_euclid(86_400_000);
    let time_ms = ms.rem_euclid(86_400_000) as u32;

    let (year, month, day) = ymd_from_days(days);
    let hour = time_ms / 3_600_000;
    let minute = (time_ms % 3_600_000) / 60_000;
    let second = (time_ms % 60_000) / 1000;
    let millisecond = time_ms % 1000;

    if millisecond > 0 {
        format!("{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}",
            year, month, day, hour, minute, second, millisecond)
    } else {
        format!("{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
            year, month, day, hour, minute, second)
    }
}

/// Typed column over a Sequence.
/// Handles type checking and nullable values.
pub struct Column {
    name: String,
    column_type: ColumnType,
    nullable: bool,
    hint: StorageHint,
    sequence: Box<dyn Sequence<ColumnValue>>,
}

impl Column {
    pub fn new(name: String, column_type: ColumnType, nullable: bool) -> Self {
        Self::with_hint(name, column_type, nullable, StorageHint::default())
    }

    pub fn with_hint(
        name: String,
        column_type: ColumnType,
        nullable: bool,
        hint: StorageHint,
    ) -> Self {
        Column {
            name,
            column_type,
            nullable,
            hint,
            sequence: new_sequence(hint),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Validate and normalize a value for this column.
    ///
    /// Link columns accept Null (an empty link); link-list columns turn Null
    /// into the empty list.
    pub fn validate_value(&self, value: ColumnValue) -> Result<ColumnValue> {
        if value.is_null() {
            return match self.column_type {
                ColumnType::Link => Ok(ColumnValue::Null),
                ColumnType::LinkList => Ok(ColumnValue::LinkList(Vec::new())),
                _ if self.nullable => Ok(ColumnValue::Null),
                _ => Err(TableError::NotNullable(self.name.clone())),
            };
        }

        if value.value_type() == Some(self.column_type) {
            Ok(value)
        } else {
            Err(TableError::TypeMismatch {
                expected: self.column_type,
                found: value,
            })
        }
    }

    /// Value stored for a row that was given no explicit value.
    pub fn default_value(&self) -> ColumnValue {
        if self.nullable {
            return ColumnValue::Null;
        }
        match self.column_type {
            ColumnType::Int32 => ColumnValue::Int32(0),
            ColumnType::Int64 => ColumnValue::Int64(0),
            ColumnType::Float32 => ColumnValue::Float32(0.0),
            ColumnType::Float64 => ColumnValue::Float64(0.0),
            ColumnType::String => ColumnValue::String(String::new()),
            ColumnType::Bool => ColumnValue::Bool(false),
            ColumnType::DateTime => ColumnValue::DateTime(0),
            ColumnType::Link => ColumnValue::Null,
            ColumnType::LinkList => ColumnValue::LinkList(Vec::new()),
        }
    }

    pub fn get(&self, index: usize) -> Result<ColumnValue> {
        self.sequence.get(index)
    }

    /// Borrow a value without cloning it.
    #[inline]
    pub fn get_ref(&self, index: usize) -> Option<&ColumnValue> {
        self.sequence.get_ref(index)
    }

    /// Fast integer access for aggregation. None for nulls and non-integers.
    #[inline]
    pub fn get_i64(&self, index: usize) -> Option<i64> {
        self.sequence.get_ref(index).and_then(ColumnValue::as_int)
    }

    /// Fast numeric access - returns the value as f64 without cloning ColumnValue.
    /// Returns None if the value is null, not a numeric type, or index out of bounds.
    #[inline]
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        self.sequence.get_ref(index).and_then(ColumnValue::to_f64)
    }

    #[inline]
    pub fn is_null_at(&self, index: usize) -> bool {
        matches!(self.sequence.get_ref(index), Some(ColumnValue::Null))
    }

    pub fn set(&mut self, index: usize, value: ColumnValue) -> Result<()> {
        let value = self.validate_value(value)?;
        self.sequence.set(index, value)
    }

    pub fn insert(&mut self, index: usize, value: ColumnValue) -> Result<()> {
        let value = self.validate_value(value)?;
        self.sequence.insert(index, value)
    }

    pub fn delete(&mut self, index: usize) -> Result<ColumnValue> {
        self.sequence.delete(index)
    }

    pub fn append(&mut self, value: ColumnValue) -> Result<()> {
        let value = self.validate_value(value)?;
        self.sequence.append(value);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.sequence.clear();
    }

    /// Apply a structural change of the link target table to every link in
    /// this column. Returns true if any cell changed.
    pub fn adjust_links(&mut self, change: &RowChange) -> bool {
        if !self.column_type.is_link() {
            return false;
        }
        let mut modified = false;
        self.sequence.for_each_mut(&mut |value| {
            let replacement = match value {
                ColumnValue::Link(target) => match IndexAdjuster::adjust(*target, change) {
                    Some(adjusted) if adjusted == *target => None,
                    Some(adjusted) => Some(ColumnValue::Link(adjusted)),
                    None => Some(ColumnValue::Null),
                },
                ColumnValue::LinkList(targets) => {
                    let adjusted: Vec<usize> = targets
                        .iter()
                        .filter_map(|t| IndexAdjuster::adjust(*t, change))
                        .collect();
                    (adjusted != *targets).then_some(ColumnValue::LinkList(adjusted))
                }
                _ => None,
            };
            if let Some(new_value) = replacement {
                *value = new_value;
                modified = true;
            }
        });
        modified
    }
}

impl Clone for Column {
    fn clone(&self) -> Self {
        Column {
            name: self.name.clone(),
            column_type: self.column_type,
            nullable: self.nullable,
            hint: self.hint,
            sequence: self.sequence.clone_box(),
        }
    }
}

impl Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Column {{ name: '{}', type: {:?}, nullable: {}, len: {} }}",
            self.name,
            self.column_type,
            self.nullable,
            self.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_basic() {
        let mut col = Column::new("test".to_string(), ColumnType::Int32, false);
        col.append(ColumnValue::Int32(10)).unwrap();
        col.append(ColumnValue::Int32(20)).unwrap();
        col.append(ColumnValue::Int32(30)).unwrap();

        assert_eq!(col.len(), 3);
        assert_eq!(col.get(0).unwrap().as_i32(), Some(10));
        assert_eq!(col.get_i64(1), Some(20));
        assert_eq!(col.get_f64(2), Some(30.0));
    }

    #[test]
    fn test_column_nullable() {
        let mut col = Column::new("test".to_string(), ColumnType::Int32, true);
        col.append(ColumnValue::Int32(10)).unwrap();
        col.append(ColumnValue::Null).unwrap();

        assert!(col.get(1).unwrap().is_null());
        assert!(col.is_null_at(1));
        assert_eq!(col.get_i64(1), None);

        let mut strict = Column::new("strict".to_string(), ColumnType::Int32, false);
        assert!(matches!(
            strict.append(ColumnValue::Null),
            Err(TableError::NotNullable(_))
        ));
    }

    #[test]
    fn test_column_type_mismatch() {
        let mut col = Column::new("test".to_string(), ColumnType::Int32, false);
        let err = col.append(ColumnValue::String("x".to_string())).unwrap_err();
        assert!(matches!(
            err,
            TableError::TypeMismatch {
                expected: ColumnType::Int32,
                ..
            }
        ));
        assert!(col.is_empty());
    }

    #[test]
    fn test_column_set_on_tiered_storage() {
        let mut col = Column::with_hint(
            "test".to_string(),
            ColumnType::Float64,
            false,
            StorageHint::FastUpdates,
        );
        for i in 0..100 {
            col.append(ColumnValue::Float64(i as f64)).unwrap();
        }
        col.set(50, ColumnValue::Float64(-1.0)).unwrap();
        col.insert(0, ColumnValue::Float64(7.5)).unwrap();
        assert_eq!(col.get_f64(51), Some(-1.0));
        assert_eq!(col.get_f64(0), Some(7.5));
        assert_eq!(col.len(), 101);
    }

    #[test]
    fn test_link_columns_accept_empty() {
        let mut links = Column::new("owner".to_string(), ColumnType::Link, false);
        links.append(ColumnValue::Null).unwrap();
        links.append(ColumnValue::Link(3)).unwrap();
        assert!(links.is_null_at(0));

        let mut lists = Column::new("items".to_string(), ColumnType::LinkList, false);
        lists.append(ColumnValue::Null).unwrap();
        assert_eq!(lists.get(0).unwrap(), ColumnValue::LinkList(vec![]));
    }

    #[test]
    fn test_adjust_links_on_target_erase() {
        let mut links = Column::new("owner".to_string(), ColumnType::Link, false);
        links.append(ColumnValue::Link(0)).unwrap();
        links.append(ColumnValue::Link(1)).unwrap();
        links.append(ColumnValue::Link(2)).unwrap();

        assert!(links.adjust_links(&RowChange::Erased { at: 1 }));
        assert_eq!(links.get(0).unwrap(), ColumnValue::Link(0));
        assert!(links.get(1).unwrap().is_null());
        assert_eq!(links.get(2).unwrap(), ColumnValue::Link(1));

        let mut lists = Column::new("items".to_string(), ColumnType::LinkList, false);
        lists.append(ColumnValue::LinkList(vec![4, 1, 2])).unwrap();
        assert!(lists.adjust_links(&RowChange::MovedOver { from: 4, to: 1 }));
        assert_eq!(lists.get(0).unwrap(), ColumnValue::LinkList(vec![1, 2]));

        // Inserting after every target touches nothing
        assert!(!lists.adjust_links(&RowChange::Inserted { at: 10, count: 1 }));
    }

    #[test]
    fn test_value_json_and_display() {
        assert_eq!(ColumnValue::Int32(5).to_json_value(), serde_json::json!(5));
        assert_eq!(
            ColumnValue::LinkList(vec![1, 2]).to_json_value(),
            serde_json::json!([1, 2])
        );
        assert_eq!(ColumnValue::Null.to_string(), "null");
        assert_eq!(ColumnValue::String("a".into()).to_string(), "a");
    }

    #[test]
    fn test_format_datetime() {
        assert_eq!(format_datetime(0), "1970-01-01T00:00:00");
        assert_eq!(format_datetime(86_400_000 + 1_500), "1970-01-02T00:00:01.500");
        assert_eq!(format_datetime(-1_000), "1969-12-31T23:59:59");
        assert_eq!(
            ColumnValue::DateTime(0).to_json_value(),
            serde_json::json!("1970-01-01T00:00:00")
        );
    }
}
