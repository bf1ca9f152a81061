//! Per-record evaluation of the operation chain.
//!
//! Operands resolve against three name-spaces in a fixed order: the record's
//! mapped columns, the active assumptions, then outputs already produced for
//! the same record by operations with a strictly smaller execution order.
//! Each record gets its own [`ResultSet`]; nothing is carried between records.

use std::{collections::HashMap, str::FromStr};

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, MathematicalOps, RoundingStrategy};
use serde::Serialize;

use crate::{
    document::CellValue,
    error::{EstimationError, Result},
    plan::{Operation, Operator, PlanConfiguration},
    resolver::ResolvedMapping,
};

const MAX_SCALE: u32 = 28;

static EMPTY_CELL: CellValue = CellValue::Empty;

/// Scale and rounding applied to every stored result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumericPolicy {
    pub scale: u32,
    pub rounding: RoundingStrategy,
}

impl Default for NumericPolicy {
    fn default() -> Self {
        NumericPolicy {
            scale: 2,
            rounding: RoundingStrategy::MidpointAwayFromZero,
        }
    }
}

impl NumericPolicy {
    pub fn apply(&self, value: Decimal) -> Decimal {
        value.round_dp_with_strategy(self.scale, self.rounding)
    }
}

/// Read-only view of one row or feature.
#[derive(Debug)]
pub struct Record<'a> {
    label: String,
    properties: HashMap<&'a str, &'a CellValue>,
}

impl<'a> Record<'a> {
    /// Pairs headers with cells, keyed by the trimmed header text. Blank
    /// headers are ignored and the first of several identical headers wins.
    pub fn new(
        label: impl Into<String>,
        headers: &'a [String],
        cells: &'a [CellValue],
    ) -> Self {
        let mut properties = HashMap::with_capacity(headers.len());
        for (idx, header) in headers.iter().enumerate() {
            let key = header.trim();
            if key.is_empty() {
                continue;
            }
            properties
                .entry(key)
                .or_insert_with(|| cells.get(idx).unwrap_or(&EMPTY_CELL));
        }
        Record {
            label: label.into(),
            properties,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn get(&self, column: &str) -> Option<&'a CellValue> {
        self.properties.get(column.trim()).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputedValue {
    pub output: String,
    pub operation_id: String,
    pub execution_order: i32,
    pub value: Decimal,
}

/// Outputs produced for a single record, in evaluation order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    values: Vec<ComputedValue>,
}

impl ResultSet {
    /// Latest value stored under `output`.
    pub fn get(&self, output: &str) -> Option<Decimal> {
        self.values
            .iter()
            .rev()
            .find(|computed| computed.output == output)
            .map(|computed| computed.value)
    }

    /// Latest value stored under `output` by an operation ordered strictly
    /// before `execution_order`.
    fn visible_before(&self, output: &str, execution_order: i32) -> Option<Decimal> {
        self.values
            .iter()
            .rev()
            .find(|computed| {
                computed.output == output && computed.execution_order < execution_order
            })
            .map(|computed| computed.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComputedValue> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct CalculationEngine {
    operations: Vec<Operation>,
    assumptions: HashMap<String, Decimal>,
    mapping: ResolvedMapping,
    policy: NumericPolicy,
}

impl CalculationEngine {
    /// Prepares the chain for `plan`. Fails before any record is touched when
    /// assumption keys collide, the scale is out of range, or an operand can
    /// never be resolved.
    pub fn new(
        plan: &PlanConfiguration,
        mapping: ResolvedMapping,
        policy: NumericPolicy,
    ) -> Result<Self> {
        if policy.scale > MAX_SCALE {
            return Err(EstimationError::InvalidPlan(format!(
                "result scale {} exceeds the maximum of {MAX_SCALE}",
                policy.scale
            )));
        }
        let assumptions = plan.assumption_map()?;
        let operations = plan
            .ordered_operations()
            .into_iter()
            .cloned()
            .collect::<Vec<_>>();
        let engine = CalculationEngine {
            operations,
            assumptions,
            mapping,
            policy,
        };
        engine.check_chain()?;
        Ok(engine)
    }

    fn check_chain(&self) -> Result<()> {
        for (position, operation) in self.operations.iter().enumerate() {
            if operation.output.trim().is_empty() {
                return Err(EstimationError::InvalidPlan(format!(
                    "operation '{}' has no output name",
                    operation.label()
                )));
            }
            for operand in [&operation.input, &operation.assumption_value] {
                if self.mapping.contains(operand) || self.assumptions.contains_key(operand) {
                    continue;
                }
                let produced_earlier = self.operations[..position].iter().any(|earlier| {
                    earlier.output == *operand
                        && earlier.execution_order < operation.execution_order
                });
                if produced_earlier {
                    continue;
                }
                let produced_anywhere = self
                    .operations
                    .iter()
                    .any(|candidate| candidate.output == *operand);
                return Err(if produced_anywhere {
                    EstimationError::ForwardReference {
                        operation: operation.label().to_string(),
                        operand: operand.clone(),
                    }
                } else {
                    EstimationError::UnresolvedOperand {
                        operand: operand.clone(),
                        operation: operation.label().to_string(),
                    }
                });
            }
        }
        Ok(())
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn mapping(&self) -> &ResolvedMapping {
        &self.mapping
    }

    pub fn evaluate(&self, record: &Record<'_>) -> Result<ResultSet> {
        let mut results = ResultSet::default();
        for operation in &self.operations {
            let left = self.operand(record, &results, operation, &operation.input)?;
            let right = self.operand(record, &results, operation, &operation.assumption_value)?;
            let value = apply(operation, left, right, record)?;
            results.values.push(ComputedValue {
                output: operation.output.clone(),
                operation_id: operation.id.clone(),
                execution_order: operation.execution_order,
                value: self.policy.apply(value),
            });
        }
        Ok(results)
    }

    fn operand(
        &self,
        record: &Record<'_>,
        results: &ResultSet,
        operation: &Operation,
        name: &str,
    ) -> Result<Decimal> {
        if let Some(column) = self.mapping.column_for(name) {
            let cell = record.get(column).unwrap_or(&EMPTY_CELL);
            return to_decimal(cell, record, column);
        }
        if let Some(value) = self.assumptions.get(name) {
            return Ok(*value);
        }
        results
            .visible_before(name, operation.execution_order)
            .ok_or_else(|| EstimationError::UnresolvedOperand {
                operand: name.to_string(),
                operation: operation.label().to_string(),
            })
    }
}

fn to_decimal(cell: &CellValue, record: &Record<'_>, column: &str) -> Result<Decimal> {
    let parsed = match cell {
        CellValue::Integer(value) => Some(Decimal::from(*value)),
        CellValue::Number(value) => Decimal::from_f64(*value),
        CellValue::Decimal(value) => Some(*value),
        CellValue::Text(text) => {
            let trimmed = text.trim();
            Decimal::from_str(trimmed)
                .or_else(|_| Decimal::from_scientific(trimmed))
                .ok()
        }
        _ => None,
    };
    parsed.ok_or_else(|| EstimationError::NonNumeric {
        record: record.label().to_string(),
        column: column.to_string(),
        value: cell.as_display(),
    })
}

fn apply(
    operation: &Operation,
    left: Decimal,
    right: Decimal,
    record: &Record<'_>,
) -> Result<Decimal> {
    let overflow = || EstimationError::Overflow {
        operation: operation.label().to_string(),
        record: record.label().to_string(),
    };
    let divide_by_zero = || EstimationError::DivideByZero {
        operation: operation.label().to_string(),
        record: record.label().to_string(),
    };
    match operation.operator {
        Operator::Add => left.checked_add(right).ok_or_else(overflow),
        Operator::Subtract => left.checked_sub(right).ok_or_else(overflow),
        Operator::Multiply => left.checked_mul(right).ok_or_else(overflow),
        Operator::Divide => {
            if right.is_zero() {
                return Err(divide_by_zero());
            }
            left.checked_div(right).ok_or_else(overflow)
        }
        Operator::Percent => left
            .checked_mul(right)
            .and_then(|product| product.checked_div(Decimal::ONE_HUNDRED))
            .ok_or_else(overflow),
        Operator::Exponential => {
            let exponent = right
                .fract()
                .is_zero()
                .then(|| right.to_i64())
                .flatten()
                .ok_or_else(|| EstimationError::InvalidExponent {
                    operation: operation.label().to_string(),
                    record: record.label().to_string(),
                    value: right.to_string(),
                })?;
            if left.is_zero() && exponent < 0 {
                return Err(divide_by_zero());
            }
            left.checked_powi(exponent).ok_or_else(overflow)
        }
    }
}
