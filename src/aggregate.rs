//! Aggregates over the rows a view currently holds.
//!
//! Every aggregate scans the row mapping exactly as stored; none of them sync
//! the view first. Detached slots and null cells are skipped. An empty or
//! fully detached view yields 0 and leaves extremum index outputs untouched.

use crate::column::{Column, ColumnType, ColumnValue, ValueKey};
use crate::table::{Schema, Table, TableRef};
use crate::view::{checked_column, TableView, INT_TYPES};
use log::debug;
use std::collections::HashMap;
use std::fmt;

/// Reducer for grouped aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggrType {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggrType {
    pub fn name(&self) -> &'static str {
        match self {
            AggrType::Count => "count",
            AggrType::Sum => "sum",
            AggrType::Avg => "avg",
            AggrType::Min => "min",
            AggrType::Max => "max",
        }
    }
}

impl fmt::Display for AggrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const GROUP_KEY_TYPES: &[ColumnType] = &[
    ColumnType::Int32,
    ColumnType::Int64,
    ColumnType::Bool,
    ColumnType::String,
    ColumnType::DateTime,
];

const NUMERIC_TYPES: &[ColumnType] = &[
    ColumnType::Int32,
    ColumnType::Int64,
    ColumnType::Float32,
    ColumnType::Float64,
];

/// Running state of one reducer.
#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    count: usize,
    int_sum: i64,
    float_sum: f64,
}

impl Accumulator {
    fn push_int(&mut self, value: i64) {
        self.count += 1;
        self.int_sum = self.int_sum.wrapping_add(value);
    }

    fn push_float(&mut self, value: f64) {
        self.count += 1;
        self.float_sum += value;
    }

    fn average(&self, sum: f64) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            sum / self.count as f64
        }
    }
}

/// First strictly better value wins, so ties keep the earliest position.
fn fold_extremum<T: Copy + PartialOrd>(
    column: &Column,
    rows: &[(usize, usize)],
    extract: impl Fn(&ColumnValue) -> Option<T>,
    better: impl Fn(T, T) -> bool,
) -> Option<(usize, T)> {
    let mut best: Option<(usize, T)> = None;
    for &(pos, source) in rows {
        let Some(value) = column.get_ref(source).and_then(&extract) else {
            continue;
        };
        match best {
            Some((_, current)) if !better(value, current) => {}
            _ => best = Some((pos, value)),
        }
    }
    best
}

fn report_ndx<T: Default>(found: Option<(usize, T)>, return_ndx: Option<&mut usize>) -> T {
    match found {
        Some((pos, value)) => {
            if let Some(ndx) = return_ndx {
                *ndx = pos;
            }
            value
        }
        None => T::default(),
    }
}

impl TableView {
    /// Run `f` with the column (checked against `expected`) and the attached
    /// (position, source) pairs.
    fn scan<R>(
        &self,
        col: usize,
        expected: &[ColumnType],
        f: impl FnOnce(&Column, &[(usize, usize)]) -> R,
    ) -> R {
        let table_ref = self.table_ref();
        let table = table_ref.borrow();
        let column = checked_column(&table, col, expected);
        f(column, &self.attached_positions())
    }

    fn extremum<T: Copy + PartialOrd + Default>(
        &self,
        col: usize,
        expected: &[ColumnType],
        extract: impl Fn(&ColumnValue) -> Option<T>,
        better: impl Fn(T, T) -> bool,
        return_ndx: Option<&mut usize>,
    ) -> T {
        let found = self.scan(col, expected, |column, rows| {
            fold_extremum(column, rows, extract, better)
        });
        report_ndx(found, return_ndx)
    }

    fn accumulate(&self, col: usize, expected: &[ColumnType]) -> Accumulator {
        self.scan(col, expected, |column, rows| {
            let mut acc = Accumulator::default();
            for &(_, source) in rows {
                match column.get_ref(source) {
                    Some(ColumnValue::Int32(v)) => acc.push_int(*v as i64),
                    Some(ColumnValue::Int64(v)) => acc.push_int(*v),
                    Some(ColumnValue::Float32(v)) => acc.push_float(*v as f64),
                    Some(ColumnValue::Float64(v)) => acc.push_float(*v),
                    _ => {}
                }
            }
            acc
        })
    }

    // ==================== Sum ====================

    /// Wrapping 64-bit sum.
    pub fn sum_int(&self, col: usize) -> i64 {
        self.accumulate(col, INT_TYPES).int_sum
    }

    /// Accumulated in double precision.
    pub fn sum_float(&self, col: usize) -> f64 {
        self.accumulate(col, &[ColumnType::Float32]).float_sum
    }

    pub fn sum_double(&self, col: usize) -> f64 {
        self.accumulate(col, &[ColumnType::Float64]).float_sum
    }

    // ==================== Minimum / maximum ====================

    pub fn minimum_int(&self, col: usize, return_ndx: Option<&mut usize>) -> i64 {
        self.extremum(col, INT_TYPES, ColumnValue::as_int, |a, b| a < b, return_ndx)
    }

    pub fn maximum_int(&self, col: usize, return_ndx: Option<&mut usize>) -> i64 {
        self.extremum(col, INT_TYPES, ColumnValue::as_int, |a, b| a > b, return_ndx)
    }

    pub fn minimum_float(&self, col: usize, return_ndx: Option<&mut usize>) -> f32 {
        self.extremum(col, &[ColumnType::Float32], ColumnValue::as_f32, |a, b| a < b, return_ndx)
    }

    pub fn maximum_float(&self, col: usize, return_ndx: Option<&mut usize>) -> f32 {
        self.extremum(col, &[ColumnType::Float32], ColumnValue::as_f32, |a, b| a > b, return_ndx)
    }

    pub fn minimum_double(&self, col: usize, return_ndx: Option<&mut usize>) -> f64 {
        self.extremum(col, &[ColumnType::Float64], ColumnValue::as_f64, |a, b| a < b, return_ndx)
    }

    pub fn maximum_double(&self, col: usize, return_ndx: Option<&mut usize>) -> f64 {
        self.extremum(col, &[ColumnType::Float64], ColumnValue::as_f64, |a, b| a > b, return_ndx)
    }

    pub fn minimum_datetime(&self, col: usize, return_ndx: Option<&mut usize>) -> i64 {
        self.extremum(
            col,
            &[ColumnType::DateTime],
            ColumnValue::as_datetime,
            |a, b| a < b,
            return_ndx,
        )
    }

    pub fn maximum_datetime(&self, col: usize, return_ndx: Option<&mut usize>) -> i64 {
        self.extremum(
            col,
            &[ColumnType::DateTime],
            ColumnValue::as_datetime,
            |a, b| a > b,
            return_ndx,
        )
    }

    // ==================== Average ====================

    /// Sum over the number of attached non-null rows; 0 when there are none.
    pub fn average_int(&self, col: usize) -> f64 {
        let acc = self.accumulate(col, INT_TYPES);
        acc.average(acc.int_sum as f64)
    }

    pub fn average_float(&self, col: usize) -> f64 {
        let acc = self.accumulate(col, &[ColumnType::Float32]);
        acc.average(acc.float_sum)
    }

    pub fn average_double(&self, col: usize) -> f64 {
        let acc = self.accumulate(col, &[ColumnType::Float64]);
        acc.average(acc.float_sum)
    }

    // ==================== Count ====================

    fn count_matching(&self, col: usize, expected: &[ColumnType], matches: impl Fn(&ColumnValue) -> bool) -> usize {
        self.scan(col, expected, |column, rows| {
            rows.iter()
                .filter(|&&(_, source)| column.get_ref(source).is_some_and(&matches))
                .count()
        })
    }

    pub fn count_int(&self, col: usize, target: i64) -> usize {
        self.count_matching(col, INT_TYPES, |v| v.as_int() == Some(target))
    }

    pub fn count_float(&self, col: usize, target: f32) -> usize {
        self.count_matching(col, &[ColumnType::Float32], |v| v.as_f32() == Some(target))
    }

    pub fn count_double(&self, col: usize, target: f64) -> usize {
        self.count_matching(col, &[ColumnType::Float64], |v| v.as_f64() == Some(target))
    }

    pub fn count_string(&self, col: usize, target: &str) -> usize {
        self.count_matching(col, &[ColumnType::String], |v| v.as_string() == Some(target))
    }

    // ==================== Grouped aggregation ====================

    /// Group the attached rows by `group_by` and reduce `aggr_col` per group.
    ///
    /// The result has one row per group in first-occurrence order, with the
    /// columns `(<group column>, <op>_<aggregated column>)`. Rows whose group
    /// key is null form one group with a null key. `Count` counts rows; the
    /// other reducers skip null values, and `Min`/`Max` of a group without
    /// values is null.
    ///
    /// Panics if the group column is not an integer, bool, string or datetime
    /// column, or if the aggregated column is not numeric (`Min`/`Max` also
    /// accept datetime).
    pub fn aggregate(&self, group_by: usize, aggr_col: usize, op: AggrType) -> Table {
        let table_ref = self.table_ref();
        let table = table_ref.borrow();
        let group_column = checked_column(&table, group_by, GROUP_KEY_TYPES);
        let aggr_types: &[ColumnType] = match op {
            AggrType::Count => &[],
            AggrType::Sum | AggrType::Avg => NUMERIC_TYPES,
            AggrType::Min | AggrType::Max => &[
                ColumnType::Int32,
                ColumnType::Int64,
                ColumnType::Float32,
                ColumnType::Float64,
                ColumnType::DateTime,
            ],
        };
        let aggr_column = checked_column(&table, aggr_col, aggr_types);

        let mut order: Vec<(ColumnValue, Vec<usize>)> = Vec::new();
        let mut index: HashMap<ValueKey, usize> = HashMap::new();
        for (_, source) in self.attached_positions() {
            let key = group_column.get_ref(source).cloned().unwrap_or(ColumnValue::Null);
            let slot = *index.entry(ValueKey::from(&key)).or_insert_with(|| {
                order.push((key.clone(), Vec::new()));
                order.len() - 1
            });
            order[slot].1.push(source);
        }

        let value_type = match op {
            AggrType::Count => ColumnType::Int64,
            AggrType::Avg => ColumnType::Float64,
            AggrType::Sum if aggr_column.column_type().is_integer() => ColumnType::Int64,
            AggrType::Sum => ColumnType::Float64,
            AggrType::Min | AggrType::Max => aggr_column.column_type(),
        };
        let group_name = group_column.name().to_string();
        let value_name = format!("{}_{}", op, aggr_column.name());
        let mut result = Table::with_hint(
            format!("{}_by_{}", value_name, group_name),
            Schema::new(vec![
                (group_name.clone(), group_column.column_type(), true),
                (value_name.clone(), value_type, true),
            ]),
            table.hint(),
        );

        for (key, sources) in order {
            let value = reduce_group(aggr_column, &sources, op);
            let mut row = HashMap::new();
            row.insert(group_name.clone(), key);
            row.insert(value_name.clone(), value);
            if let Err(err) = result.append_row(row) {
                panic!("aggregate result row rejected: {}", err);
            }
        }
        debug!(
            "aggregated {} over '{}' into {} groups",
            value_name,
            table.name(),
            result.len()
        );
        result
    }

    /// `aggregate` wrapped in a shared handle so a view can be built on it.
    pub fn aggregate_ref(&self, group_by: usize, aggr_col: usize, op: AggrType) -> TableRef {
        self.aggregate(group_by, aggr_col, op).into_ref()
    }
}

fn reduce_group(column: &Column, sources: &[usize], op: AggrType) -> ColumnValue {
    let values = sources
        .iter()
        .filter_map(|&source| column.get_ref(source))
        .filter(|value| !value.is_null());
    match op {
        AggrType::Count => ColumnValue::Int64(sources.len() as i64),
        AggrType::Sum | AggrType::Avg => {
            let mut acc = Accumulator::default();
            for value in values {
                match value {
                    ColumnValue::Int32(v) => acc.push_int(*v as i64),
                    ColumnValue::Int64(v) => acc.push_int(*v),
                    other => acc.push_float(other.to_f64().unwrap_or_default()),
                }
            }
            let integer = column.column_type().is_integer();
            match (op, integer) {
                (AggrType::Sum, true) => ColumnValue::Int64(acc.int_sum),
                (AggrType::Sum, false) => ColumnValue::Float64(acc.float_sum),
                (_, true) => ColumnValue::Float64(acc.average(acc.int_sum as f64)),
                (_, false) => ColumnValue::Float64(acc.average(acc.float_sum)),
            }
        }
        AggrType::Min | AggrType::Max => {
            let mut best: Option<&ColumnValue> = None;
            for value in values {
                let better = match best {
                    None => true,
                    Some(current) => {
                        let ordering = compare_numeric(value, current);
                        if op == AggrType::Min {
                            ordering.is_lt()
                        } else {
                            ordering.is_gt()
                        }
                    }
                };
                if better {
                    best = Some(value);
                }
            }
            best.cloned().unwrap_or(ColumnValue::Null)
        }
    }
}

fn compare_numeric(a: &ColumnValue, b: &ColumnValue) -> std::cmp::Ordering {
    match (a, b) {
        (ColumnValue::DateTime(a), ColumnValue::DateTime(b)) => a.cmp(b),
        _ => match (a.as_int(), b.as_int()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => a
                .to_f64()
                .unwrap_or_default()
                .total_cmp(&b.to_f64().unwrap_or_default()),
        },
    }
}
