//! Reward expressions: the validation gate for `Init` and the evaluator the
//! trainer uses to score actions.
//!
//! Rewards are written per action as small arithmetic statements over the
//! pod's declared fields, e.g. `reward = close - prev.close`. External reward
//! functions are named expressions an action's reward may call with no
//! arguments.

pub mod expr;
pub mod validation;

pub use expr::{AssignOp, Expr, Scope, Statement};
pub use validation::{check_effect, PREV_PREFIX};

use crate::error::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use validation::RewardNames;

/// Check that every action reward and external reward function is well formed
/// and only references declared fields, actions and functions.
pub fn validate_rewards(
    action_rewards: &BTreeMap<String, String>,
    external_reward_funcs: &BTreeMap<String, String>,
    fields: &[String],
) -> Result<()> {
    RewardProgram::compile(action_rewards, external_reward_funcs, fields).map(|_| ())
}

/// Compiled rewards for one pod.
#[derive(Debug, Clone)]
pub struct RewardProgram {
    fields: Vec<String>,
    actions: Vec<String>,
    rewards: HashMap<String, Expr>,
    functions: HashMap<String, Expr>,
}

impl RewardProgram {
    pub fn compile(
        action_rewards: &BTreeMap<String, String>,
        external_reward_funcs: &BTreeMap<String, String>,
        fields: &[String],
    ) -> Result<Self> {
        let names = RewardNames::new(
            fields.iter().map(String::as_str),
            action_rewards.keys().map(String::as_str),
            external_reward_funcs.keys().map(String::as_str),
        );

        let functions = external_reward_funcs
            .iter()
            .map(|(name, source)| Ok((name.clone(), names.check_function(name, source)?)))
            .collect::<Result<HashMap<_, _>>>()?;

        let rewards = action_rewards
            .iter()
            .map(|(action, source)| Ok((action.clone(), names.check_reward(action, source)?.expr)))
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(Self {
            fields: fields.to_vec(),
            actions: action_rewards.keys().cloned().collect(),
            rewards,
            functions,
        })
    }

    /// Reward for taking `action` in the transition from `prev` to `current`.
    /// Rows are in declared field order.
    pub fn reward(&self, action: &str, prev: &[f64], current: &[f64]) -> Result<f64> {
        let expr = self
            .rewards
            .get(action)
            .ok_or_else(|| Error::Expression(format!("no reward for action '{}'", action)))?;
        let scope = TransitionScope {
            program: self,
            action,
            prev,
            current,
        };
        expr.eval(&scope)
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

/// Values visible while scoring one transition.
pub struct TransitionScope<'a> {
    program: &'a RewardProgram,
    action: &'a str,
    prev: &'a [f64],
    current: &'a [f64],
}

impl<'a> TransitionScope<'a> {
    fn field(&self, row: &[f64], name: &str) -> Option<f64> {
        let idx = self.program.fields.iter().position(|f| f == name)?;
        row.get(idx).copied()
    }
}

impl Scope for TransitionScope<'_> {
    fn var(&self, name: &str) -> Option<f64> {
        if let Some(field) = name.strip_prefix(PREV_PREFIX) {
            if let Some(value) = self.field(self.prev, field) {
                return Some(value);
            }
        }
        if let Some(value) = self.field(self.current, name) {
            return Some(value);
        }
        if self.program.actions.iter().any(|a| a == name) {
            return Some(if name == self.action { 1.0 } else { 0.0 });
        }
        None
    }

    fn call(&self, name: &str) -> Option<Result<f64>> {
        self.program.functions.get(name).map(|f| f.eval(self))
    }
}

/// Applies an effect statement to a row in place.
pub fn apply_effect(stmt: &Statement, fields: &[String], prev: &[f64], row: &mut [f64]) -> Result<()> {
    let (target, op) = stmt
        .target
        .as_ref()
        .ok_or_else(|| Error::Expression("effect assigns nothing".into()))?;
    let idx = fields
        .iter()
        .position(|f| f == target)
        .ok_or_else(|| Error::Expression(format!("undeclared field '{}'", target)))?;

    let value = {
        let scope = RowScope { fields, prev, row };
        stmt.expr.eval(&scope)?
    };
    match op {
        AssignOp::Set => row[idx] = value,
        AssignOp::Add => row[idx] += value,
        AssignOp::Sub => row[idx] -= value,
    }
    Ok(())
}

struct RowScope<'a> {
    fields: &'a [String],
    prev: &'a [f64],
    row: &'a [f64],
}

impl Scope for RowScope<'_> {
    fn var(&self, name: &str) -> Option<f64> {
        let (row, field) = match name.strip_prefix(PREV_PREFIX) {
            Some(field) if self.fields.iter().any(|f| f == field) => (self.prev, field),
            _ => (self.row, name),
        };
        let idx = self.fields.iter().position(|f| f == field)?;
        row.get(idx).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewards(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn fields() -> Vec<String> {
        vec!["price".to_string(), "usd".to_string()]
    }

    #[test]
    fn test_validate_rewards() {
        let fields = fields();
        let funcs = rewards(&[("trend", "price - prev.price")]);
        assert!(validate_rewards(&rewards(&[("buy", "trend()"), ("hold", "0")]), &funcs, &fields).is_ok());
        assert!(validate_rewards(&rewards(&[("buy", "btc")]), &funcs, &fields).is_err());
        assert!(validate_rewards(&rewards(&[("buy", "1 +")]), &funcs, &fields).is_err());
        assert!(validate_rewards(&rewards(&[("buy", "1")]), &rewards(&[("bad", "volume")]), &fields).is_err());
    }

    #[test]
    fn test_reward_evaluation() {
        let program = RewardProgram::compile(
            &rewards(&[("buy", "reward = trend() * 2"), ("sell", "-trend() + sell")]),
            &rewards(&[("trend", "price - prev.price")]),
            &fields(),
        )
        .unwrap();

        let prev = [100.0, 10.0];
        let current = [103.0, 10.0];
        assert_eq!(program.reward("buy", &prev, &current).unwrap(), 6.0);
        assert_eq!(program.reward("sell", &prev, &current).unwrap(), -2.0);
        assert!(program.reward("hold", &prev, &current).is_err());
    }

    #[test]
    fn test_apply_effect() {
        let fields = fields();
        let stmt = check_effect("usd -= price / 10", &fields).unwrap();
        let mut row = [50.0, 20.0];
        apply_effect(&stmt, &fields, &[0.0, 0.0], &mut row).unwrap();
        assert_eq!(row, [50.0, 15.0]);
    }
}
