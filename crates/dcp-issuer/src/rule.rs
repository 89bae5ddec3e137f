//! # Credential Rules
//!
//! Authorization rules evaluated against the claims gathered by the
//! attestation pipeline. A [`CredentialRuleDefinition`] names a rule type;
//! the [`RuleRegistry`] builds the rule from its configuration and
//! evaluates it. All rules must pass, and an unknown type or a bad
//! configuration counts as a failure.
//!
//! ## `expression`
//!
//! ```yaml
//! type: expression
//! configuration:
//!   claim: onboarding.signedDocuments   # dotted path into the claims
//!   operator: eq                        # eq | neq | gt | geq | lt | leq
//!   value: true
//! ```
//!
//! `eq` and `neq` compare the string forms of claim and value. The ordering
//! operators require an integer value and only pass for integer claims.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::attestation::Claims;
use crate::definition::CredentialRuleDefinition;

pub const EXPRESSION_RULE_TYPE: &str = "expression";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("no rule registered for type '{0}'")]
    UnknownType(String),

    #[error("invalid rule configuration: {0}")]
    Configuration(String),

    #[error("{0}")]
    Failed(String),
}

pub trait CredentialRule: Send + Sync {
    fn evaluate(&self, claims: &Claims) -> Result<(), RuleError>;
}

/// Builds a [`CredentialRule`] from its definition.
pub trait CredentialRuleFactory: Send + Sync {
    fn create(&self, definition: &CredentialRuleDefinition)
        -> Result<Box<dyn CredentialRule>, RuleError>;
}

#[derive(Clone)]
pub struct RuleRegistry {
    factories: HashMap<String, Arc<dyn CredentialRuleFactory>>,
}

impl Default for RuleRegistry {
    /// A registry with the built-in `expression` rule.
    fn default() -> Self {
        Self::empty().register(EXPRESSION_RULE_TYPE, Arc::new(ExpressionRuleFactory))
    }
}

impl RuleRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(
        mut self,
        rule_type: impl Into<String>,
        factory: Arc<dyn CredentialRuleFactory>,
    ) -> Self {
        self.factories.insert(rule_type.into(), factory);
        self
    }

    pub fn create(
        &self,
        definition: &CredentialRuleDefinition,
    ) -> Result<Box<dyn CredentialRule>, RuleError> {
        self.factories
            .get(&definition.rule_type)
            .ok_or_else(|| RuleError::UnknownType(definition.rule_type.clone()))?
            .create(definition)
    }

    /// Evaluate every rule against `claims`; the first failure is returned.
    pub fn evaluate_all<'a>(
        &self,
        rules: impl IntoIterator<Item = &'a CredentialRuleDefinition>,
        claims: &Claims,
    ) -> Result<(), RuleError> {
        for definition in rules {
            self.create(definition)?.evaluate(claims)?;
        }
        Ok(())
    }
}

// ---- Expression rule ----

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionOperator {
    Eq,
    Neq,
    Gt,
    Geq,
    Lt,
    Leq,
}

impl ExpressionOperator {
    fn is_ordering(self) -> bool {
        matches!(self, Self::Gt | Self::Geq | Self::Lt | Self::Leq)
    }

    fn failure(self) -> &'static str {
        match self {
            Self::Eq => "Values not equal",
            Self::Neq => "Values are equal",
            Self::Gt => "Value is not greater than",
            Self::Geq => "Value is not greater than or equal to",
            Self::Lt => "Value is not less than",
            Self::Leq => "Value is not less than or equal to",
        }
    }
}

impl FromStr for ExpressionOperator {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "eq" => Ok(Self::Eq),
            "neq" => Ok(Self::Neq),
            "gt" => Ok(Self::Gt),
            "geq" => Ok(Self::Geq),
            "lt" => Ok(Self::Lt),
            "leq" => Ok(Self::Leq),
            other => Err(RuleError::Configuration(format!("unknown operator '{other}'"))),
        }
    }
}

impl fmt::Display for ExpressionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Geq => "geq",
            Self::Lt => "lt",
            Self::Leq => "leq",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Text(String),
    Integer(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionRule {
    path: Vec<String>,
    operator: ExpressionOperator,
    operand: Operand,
}

impl ExpressionRule {
    pub fn new(claim: &str, operator: ExpressionOperator, value: &Value) -> Result<Self, RuleError> {
        if claim.trim().is_empty() {
            return Err(RuleError::Configuration("claim path must not be empty".into()));
        }
        let operand = if operator.is_ordering() {
            let n = match value {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            };
            Operand::Integer(n.ok_or_else(|| {
                RuleError::Configuration(format!(
                    "operator '{operator}' requires an integer value, got {value}"
                ))
            })?)
        } else {
            Operand::Text(string_form(value))
        };
        Ok(Self {
            path: claim.split('.').map(str::to_string).collect(),
            operator,
            operand,
        })
    }

    fn lookup<'a>(&self, claims: &'a Claims) -> Option<&'a Value> {
        let (first, rest) = self.path.split_first()?;
        rest.iter()
            .try_fold(claims.get(first)?, |value, segment| value.get(segment))
    }
}

impl CredentialRule for ExpressionRule {
    fn evaluate(&self, claims: &Claims) -> Result<(), RuleError> {
        let claim = self.lookup(claims).ok_or_else(|| {
            RuleError::Failed(format!("Claim '{}' not found", self.path.join(".")))
        })?;

        let passed = match (&self.operand, self.operator) {
            (Operand::Text(expected), ExpressionOperator::Eq) => string_form(claim) == *expected,
            (Operand::Text(expected), ExpressionOperator::Neq) => string_form(claim) != *expected,
            (Operand::Integer(expected), op) => match claim.as_i64() {
                Some(actual) => match op {
                    ExpressionOperator::Gt => actual > *expected,
                    ExpressionOperator::Geq => actual >= *expected,
                    ExpressionOperator::Lt => actual < *expected,
                    ExpressionOperator::Leq => actual <= *expected,
                    ExpressionOperator::Eq | ExpressionOperator::Neq => false,
                },
                None => false,
            },
            (Operand::Text(_), _) => false,
        };

        if passed {
            Ok(())
        } else {
            Err(RuleError::Failed(self.operator.failure().to_string()))
        }
    }
}

fn string_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub struct ExpressionRuleFactory;

impl CredentialRuleFactory for ExpressionRuleFactory {
    fn create(
        &self,
        definition: &CredentialRuleDefinition,
    ) -> Result<Box<dyn CredentialRule>, RuleError> {
        let config = &definition.configuration;
        let claim = config
            .get("claim")
            .and_then(Value::as_str)
            .ok_or_else(|| RuleError::Configuration("missing 'claim'".into()))?;
        let operator: ExpressionOperator = config
            .get("operator")
            .and_then(Value::as_str)
            .ok_or_else(|| RuleError::Configuration("missing 'operator'".into()))?
            .parse()?;
        let value = config
            .get("value")
            .ok_or_else(|| RuleError::Configuration("missing 'value'".into()))?;
        Ok(Box::new(ExpressionRule::new(claim, operator, value)?))
    }
}
